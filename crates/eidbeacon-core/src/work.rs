//! Deferred work.
//!
//! Slot encoding (which may run a key exchange) and persistence work are
//! queued by event handlers and executed by `BeaconCore::drain`, once per
//! driver loop iteration.

use std::collections::VecDeque;

use crate::slot::SlotIndex;

/// A unit of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Validate and encode a staged slot-data write
    EncodeSlot(SlotIndex),
    /// Snapshot a slot's configuration to storage
    PersistSlot(SlotIndex),
    /// Remove a destroyed key pair from storage
    DiscardKeyPair(SlotIndex),
}

/// FIFO of pending work. Duplicate items are coalesced.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item` unless an identical item is already pending.
    ///
    /// Returns true if the item was added.
    pub fn push(&mut self, item: WorkItem) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Next item in FIFO order.
    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_with_coalescing() {
        let mut queue = WorkQueue::new();
        let first = WorkItem::EncodeSlot(SlotIndex::FIRST);
        let second = WorkItem::PersistSlot(SlotIndex::FIRST);

        assert!(queue.push(first));
        assert!(queue.push(second));
        assert!(!queue.push(first));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(first));
        assert_eq!(queue.pop(), Some(second));
        assert!(queue.is_empty());
    }
}
