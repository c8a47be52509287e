//! Updater core: pure walk-scheduling state machine and status helpers.
mod effect;
mod msg;
mod reference;
mod state;
mod update;
mod view_model;

pub use effect::{Effect, RejectReason};
pub use msg::Msg;
pub use reference::is_well_formed_reference;
pub use state::{ItemId, ScheduleSnapshot, SweepPlan, SweepRequest, WalkSession, WalkState};
pub use update::update;
pub use view_model::{StatusView, DEFAULT_WALK_PERIOD_HOURS};
