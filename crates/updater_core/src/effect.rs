use crate::SweepPlan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The scheduler moved to `Walking`; the caller must run exactly this sweep.
    StartSweep(SweepPlan),
    /// A sweep request was refused. Not an error.
    SweepRejected { reason: RejectReason },
    /// Persisted settings changed and should be saved.
    PersistSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyWalking,
    NotDue,
}
