use crate::view_model::{StatusView, DEFAULT_WALK_PERIOD_HOURS};

/// Host-assigned identifier of a tracked item.
pub type ItemId = String;

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkSession {
    #[default]
    Idle,
    Walking,
}

/// What a caller asks the scheduler for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepRequest {
    /// Periodic timer: honours the walk period.
    Scheduled,
    /// On-demand sweep over every tracked item, ignoring the period.
    Forced,
    /// On-demand sweep over an explicit list; an empty list means every tracked item.
    Items(Vec<ItemId>),
}

/// The item set and mode of one admitted sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    pub items: Vec<ItemId>,
    pub forced: bool,
}

/// Schedule bookkeeping restored from persisted settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub last_walk: i64,
    pub walk_period_hours: u32,
    pub tracked: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkState {
    session: WalkSession,
    last_walk: i64,
    walk_period_hours: u32,
    tracked: Vec<ItemId>,
    dirty: bool,
}

impl Default for WalkState {
    fn default() -> Self {
        Self {
            session: WalkSession::Idle,
            last_walk: 0,
            walk_period_hours: DEFAULT_WALK_PERIOD_HOURS,
            tracked: Vec::new(),
            dirty: false,
        }
    }
}

impl WalkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> StatusView {
        StatusView {
            last_walk: self.last_walk,
            walk_period_hours: self.walk_period_hours,
            is_walking: self.is_walking(),
            tracked_count: self.tracked.len(),
        }
    }

    pub fn session(&self) -> WalkSession {
        self.session
    }

    pub fn is_walking(&self) -> bool {
        self.session == WalkSession::Walking
    }

    pub fn last_walk(&self) -> i64 {
        self.last_walk
    }

    pub fn walk_period_hours(&self) -> u32 {
        self.walk_period_hours
    }

    pub fn tracked(&self) -> &[ItemId] {
        &self.tracked
    }

    pub fn is_tracked(&self, item_id: &str) -> bool {
        self.tracked.iter().any(|id| id == item_id)
    }

    /// Earliest Unix time at which a scheduled sweep is admitted.
    pub fn next_walk_due(&self) -> i64 {
        self.last_walk
            .saturating_add(i64::from(self.walk_period_hours).saturating_mul(SECONDS_PER_HOUR))
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            last_walk: self.last_walk,
            walk_period_hours: self.walk_period_hours,
            tracked: self.tracked.clone(),
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn restore(&mut self, snapshot: ScheduleSnapshot) {
        self.last_walk = snapshot.last_walk;
        self.walk_period_hours = snapshot.walk_period_hours;
        self.tracked.clear();
        for item_id in snapshot.tracked {
            self.track(item_id);
        }
        self.dirty = true;
    }

    pub(crate) fn begin_walk(&mut self) {
        self.session = WalkSession::Walking;
        self.dirty = true;
    }

    pub(crate) fn finish_walk(&mut self, advance_to: Option<i64>) {
        if let Some(finished_at) = advance_to {
            self.last_walk = finished_at;
        }
        self.session = WalkSession::Idle;
        self.dirty = true;
    }

    pub(crate) fn set_period(&mut self, hours: u32) {
        self.walk_period_hours = hours;
        self.dirty = true;
    }

    /// Returns `true` when the set changed.
    pub(crate) fn track(&mut self, item_id: ItemId) -> bool {
        if self.is_tracked(&item_id) {
            return false;
        }
        self.tracked.push(item_id);
        self.dirty = true;
        true
    }

    /// Returns `true` when the set changed.
    pub(crate) fn untrack(&mut self, item_id: &str) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|id| id != item_id);
        let changed = self.tracked.len() != before;
        self.dirty |= changed;
        changed
    }
}
