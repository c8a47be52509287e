use crate::{ItemId, ScheduleSnapshot, SweepRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Replace schedule bookkeeping with values loaded from settings.
    RestoreSchedule(ScheduleSnapshot),
    /// Timer tick or explicit trigger asking for a sweep at `now` (Unix seconds).
    SweepRequested { request: SweepRequest, now: i64 },
    /// The running sweep processed its whole item set.
    SweepFinished {
        forced: bool,
        productive: bool,
        finished_at: i64,
    },
    /// User enrolled or withdrew an item.
    TrackedChanged { item_id: ItemId, tracked: bool },
    /// A sweep swapped an item for its replacement.
    ItemReplaced {
        old_item_id: ItemId,
        new_item_id: ItemId,
    },
    /// Walk cadence changed.
    PeriodChanged { hours: u32 },
    /// Fallback for placeholder wiring.
    NoOp,
}
