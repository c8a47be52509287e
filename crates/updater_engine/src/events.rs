use std::sync::mpsc;

use crate::artifact::ContentHash;
use crate::ItemId;

/// Counters for one finished sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub forced: bool,
    /// At least one item had a usable source reference.
    pub productive: bool,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalkEvent {
    SweepStarted {
        forced: bool,
        item_count: usize,
    },
    SweepFinished(SweepReport),
    ItemUpdated {
        old_item_id: ItemId,
        new_item_id: ItemId,
        identity: ContentHash,
    },
    ItemError {
        item_id: ItemId,
        message: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: WalkEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<WalkEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<WalkEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: WalkEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drops every event; for hosts without notification consumers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: WalkEvent) {}
}
