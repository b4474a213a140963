//! Slot pool and overflow queue.
//!
//! Each event loop owns a `SlotTable`: its share of the preallocated
//! connection slots plus a LIFO free stack (recently released slots are
//! hottest in cache). Requests that find no free slot wait in the shared
//! FIFO `PendingQueue`, drained by the queue-tick timer.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::conn::Slot;
use crate::request::PendingRequest;

/// Per-loop table of preallocated connection slots with a free list for
/// O(1) allocation.
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u16>,
}

impl SlotTable {
    pub(crate) fn new(count: usize, buf_size: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        for idx in 0..count {
            slots.push(Slot::new(idx as u16, buf_size));
        }
        // Reverse order so pop hands out the lowest index first.
        let free: Vec<u16> = (0..count as u16).rev().collect();
        SlotTable { slots, free }
    }

    /// Pop a free slot index.
    pub(crate) fn allocate(&mut self) -> Option<u16> {
        self.free.pop()
    }

    /// Return a slot to the free list. The slot must already be idle.
    pub(crate) fn release(&mut self, idx: u16) {
        debug_assert!(self.slots[idx as usize].is_idle());
        debug_assert!(!self.free.contains(&idx), "double release of slot {idx}");
        self.free.push(idx);
    }

    pub(crate) fn slot_mut(&mut self, idx: u16) -> &mut Slot {
        &mut self.slots[idx as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Indices of every slot currently in use.
    pub(crate) fn busy_indices(&self) -> Vec<u16> {
        (0..self.slots.len() as u16)
            .filter(|&i| !self.slots[i as usize].is_idle())
            .collect()
    }
}

/// Process-wide FIFO of requests waiting for a free slot.
pub(crate) struct PendingQueue {
    inner: Mutex<VecDeque<PendingRequest>>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        PendingQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, req: PendingRequest) {
        self.inner.lock().unwrap().push_back(req);
    }

    /// Put a request back at the head after a failed dispatch attempt,
    /// preserving FIFO order.
    pub(crate) fn push_front(&self, req: PendingRequest) {
        self.inner.lock().unwrap().push_front(req);
    }

    pub(crate) fn pop(&self) -> Option<PendingRequest> {
        self.inner.lock().unwrap().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_hands_out_lowest_first() {
        let mut table = SlotTable::new(4, 1024);
        assert_eq!(table.allocate(), Some(0));
        assert_eq!(table.allocate(), Some(1));
        assert_eq!(table.free_len(), 2);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut table = SlotTable::new(4, 1024);
        let a = table.allocate().unwrap();
        let b = table.allocate().unwrap();
        table.release(a);
        table.release(b);
        // The most recently released slot comes back first.
        assert_eq!(table.allocate(), Some(b));
        assert_eq!(table.allocate(), Some(a));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut table = SlotTable::new(2, 1024);
        assert!(table.allocate().is_some());
        assert!(table.allocate().is_some());
        assert_eq!(table.allocate(), None);
    }

    #[test]
    fn free_count_accounting() {
        let mut table = SlotTable::new(3, 1024);
        assert_eq!(table.free_len(), table.len());
        let idx = table.allocate().unwrap();
        assert_eq!(table.free_len(), 2);
        table.release(idx);
        assert_eq!(table.free_len(), 3);
    }
}
