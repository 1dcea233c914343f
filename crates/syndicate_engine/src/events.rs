//! Sync event notifications.

use parking_lot::Mutex;
use syndicate_config::{SyncAction, SyncReason};
use syndicate_record::EntityRef;

/// Direction of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Sent to the broker.
    Export,
    /// Received from the broker.
    Import,
}

/// A completed transfer, emitted after the record was saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// Transfer direction.
    pub direction: SyncDirection,
    /// The entity transferred.
    pub entity: EntityRef,
    /// The flow the transfer ran under.
    pub flow_id: String,
    /// The pool addressed.
    pub pool_id: String,
    /// The action performed.
    pub action: SyncAction,
    /// Why the transfer was started.
    pub reason: SyncReason,
}

/// Receives sync events.
pub trait EventSink: Send + Sync {
    /// Called once per performed transfer. Skips do not notify.
    fn notify(&self, event: &SyncEvent);
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: &SyncEvent) {}
}

/// Collects events for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SyncEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Counts events of one direction.
    pub fn count_of(&self, direction: SyncDirection) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.direction == direction)
            .count()
    }
}

impl EventSink for MemorySink {
    fn notify(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn memory_sink_collects() {
        let sink = MemorySink::new();
        let event = SyncEvent {
            direction: SyncDirection::Export,
            entity: EntityRef::new("node", Uuid::new_v4()),
            flow_id: "content".into(),
            pool_id: "main".into(),
            action: SyncAction::Create,
            reason: SyncReason::Automatic,
        };
        sink.notify(&event);
        sink.notify(&SyncEvent {
            direction: SyncDirection::Import,
            ..event.clone()
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count_of(SyncDirection::Export), 1);
        assert_eq!(sink.count_of(SyncDirection::Import), 1);
    }
}
