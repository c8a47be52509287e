/// Cadence used until settings say otherwise.
pub const DEFAULT_WALK_PERIOD_HOURS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusView {
    pub last_walk: i64,
    pub walk_period_hours: u32,
    pub is_walking: bool,
    pub tracked_count: usize,
}
