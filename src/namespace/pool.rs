//! Bounded object pool amortizing per-call item allocation.

use parking_lot::Mutex;

pub struct SyncPool<T> {
    slots: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> SyncPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self { slots: Mutex::new(Vec::new()), capacity }
    }

    pub fn get(&self) -> Option<T> {
        self.slots.lock().pop()
    }

    /// Returns an object to the pool; dropped on the floor when full.
    pub fn put(&self, value: T) {
        let mut slots = self.slots.lock();
        if slots.len() < self.capacity {
            slots.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded() {
        let pool = SyncPool::new(2);
        pool.put(1);
        pool.put(2);
        pool.put(3);
        assert_eq!(pool.len(), 2);
        assert!(pool.get().is_some());
        assert!(pool.get().is_some());
        assert!(pool.get().is_none());
    }
}
