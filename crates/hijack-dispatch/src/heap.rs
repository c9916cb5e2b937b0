//! Word-handle heap: where composite and string [`DynValue`]s live while a
//! raw machine word stands in for them at the call boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::value::DynValue;

/// A process-wide table of boxed values, indexed by handle.
///
/// One instance is shared by every stub built from the same [`crate::Dispatcher`];
/// handles are never reused across instances, so a stale handle from a freed
/// dispatcher simply misses rather than aliasing someone else's value.
pub struct ValueHeap {
    next: AtomicU64,
    slots: DashMap<u64, DynValue>,
}

impl ValueHeap {
    /// An empty heap, handles starting at 1 (0 is reserved as a null handle).
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            slots: DashMap::new(),
        }
    }

    /// Box `value`, returning its handle.
    pub fn put(&self, value: DynValue) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.slots.insert(handle, value);
        handle
    }

    /// Remove and return the value at `handle`, if still present.
    pub fn take(&self, handle: u64) -> Option<DynValue> {
        self.slots.remove(&handle).map(|(_, v)| v)
    }

    /// Read the value at `handle` without removing it.
    pub fn peek(&self, handle: u64) -> Option<DynValue> {
        self.slots.get(&handle).map(|r| r.clone())
    }

    /// Number of values currently boxed (test/diagnostic use).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the heap currently holds nothing.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ValueHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_the_slot() {
        let heap = ValueHeap::new();
        let h = heap.put(DynValue::Int(42));
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.take(h), Some(DynValue::Int(42)));
        assert_eq!(heap.take(h), None);
        assert!(heap.is_empty());
    }

    #[test]
    fn peek_leaves_the_slot_intact() {
        let heap = ValueHeap::new();
        let h = heap.put(DynValue::Bool(true));
        assert_eq!(heap.peek(h), Some(DynValue::Bool(true)));
        assert_eq!(heap.len(), 1);
    }
}
