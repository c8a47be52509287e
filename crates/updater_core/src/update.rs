use crate::{Effect, Msg, RejectReason, SweepPlan, SweepRequest, WalkState};

/// Pure update function: applies a message to state and returns any effects.
///
/// `SweepRequested` is the only way into `Walking`, and it is refused while a
/// sweep is running. Callers that share the state between threads must apply
/// the message and act on `Effect::StartSweep` under the same lock.
pub fn update(mut state: WalkState, msg: Msg) -> (WalkState, Vec<Effect>) {
    let effects = match msg {
        Msg::RestoreSchedule(snapshot) => {
            state.restore(snapshot);
            Vec::new()
        }
        Msg::SweepRequested { request, now } => {
            if state.is_walking() {
                return (
                    state,
                    vec![Effect::SweepRejected {
                        reason: RejectReason::AlreadyWalking,
                    }],
                );
            }
            let plan = match request {
                SweepRequest::Scheduled => {
                    if now < state.next_walk_due() {
                        return (
                            state,
                            vec![Effect::SweepRejected {
                                reason: RejectReason::NotDue,
                            }],
                        );
                    }
                    SweepPlan {
                        items: state.tracked().to_vec(),
                        forced: false,
                    }
                }
                SweepRequest::Forced => SweepPlan {
                    items: state.tracked().to_vec(),
                    forced: true,
                },
                SweepRequest::Items(items) if items.is_empty() => SweepPlan {
                    items: state.tracked().to_vec(),
                    forced: true,
                },
                SweepRequest::Items(items) => SweepPlan {
                    items,
                    forced: true,
                },
            };
            state.begin_walk();
            vec![Effect::StartSweep(plan)]
        }
        Msg::SweepFinished {
            forced,
            productive,
            finished_at,
        } => {
            if !state.is_walking() {
                return (state, Vec::new());
            }
            let advance_to = (productive && !forced).then_some(finished_at);
            state.finish_walk(advance_to);
            vec![Effect::PersistSettings]
        }
        Msg::TrackedChanged { item_id, tracked } => {
            let changed = if tracked {
                state.track(item_id)
            } else {
                state.untrack(&item_id)
            };
            if changed {
                vec![Effect::PersistSettings]
            } else {
                Vec::new()
            }
        }
        Msg::ItemReplaced {
            old_item_id,
            new_item_id,
        } => {
            if old_item_id == new_item_id {
                return (state, Vec::new());
            }
            state.track(new_item_id);
            state.untrack(&old_item_id);
            vec![Effect::PersistSettings]
        }
        Msg::PeriodChanged { hours } => {
            state.set_period(hours);
            vec![Effect::PersistSettings]
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
