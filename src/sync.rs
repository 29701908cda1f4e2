/*!
Read-copy-update style publication of shared values.

Readers take a snapshot (an `Arc`) and traverse it without holding any lock.
Writers build a complete new value and publish it in one step, so a reader
sees either the old or the new value, never a partial one. A value that has
been replaced is freed when the last snapshot referring to it is dropped,
which is the grace period of the classic RCU scheme.
*/

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// A published value that can be replaced while readers hold snapshots.
pub struct Rcu<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Rcu<T> {
    /// Publishes the initial value
    pub fn new(value: T) -> Rcu<T> {
        Rcu {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// Takes a snapshot of the current value.
    /// The lock is held only for cloning the pointer.
    pub fn read(&self) -> Arc<T> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publishes `value` and returns the previous snapshot.
    /// Callers serialize their updates with an outer lock.
    pub fn publish(&self, value: T) -> Arc<T> {
        let new = Arc::new(value);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ::std::mem::replace(&mut *guard, new)
    }
}

impl<T: fmt::Debug> fmt::Debug for Rcu<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Rcu").field(&self.read()).finish()
    }
}

/// Locks `mutex`, ignoring poisoning. The guarded values stay consistent
/// because every writer publishes complete values.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_outlives_replacement() {
        let rcu = Rcu::new(vec![1, 2, 3]);
        let snapshot = rcu.read();
        let old = rcu.publish(vec![4]);
        assert_eq!(vec![1, 2, 3], *snapshot);
        assert_eq!(vec![4], *rcu.read());
        // the old value is still alive through the reader's snapshot
        assert_eq!(2, Arc::strong_count(&old));
        drop(snapshot);
        assert_eq!(1, Arc::strong_count(&old));
    }
}
