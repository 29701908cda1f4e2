/*!
An immutable list of flow entries in both lookup and serial order.

Tables publish a `FlowList` through an `Rcu` and derive every change as a
new list, so readers traverse a stable snapshot without locking.
*/

use flow::entry::FlowEntry;

use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FlowList {
    /// Descending priority, equal priorities in insertion order
    by_priority: Vec<Arc<FlowEntry>>,
    /// Ascending serial number
    by_serial: Vec<Arc<FlowEntry>>,
}

impl FlowList {
    pub fn new() -> FlowList {
        FlowList::default()
    }

    pub fn len(&self) -> usize {
        self.by_serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_serial.is_empty()
    }

    /// Gets the entries in lookup order
    pub fn by_priority(&self) -> &[Arc<FlowEntry>] {
        &self.by_priority
    }

    /// Gets the entries in serial order
    pub fn by_serial(&self) -> &[Arc<FlowEntry>] {
        &self.by_serial
    }

    /// Finds an entry that `flow` would replace
    pub fn find_identical(&self, flow: &FlowEntry) -> Option<&Arc<FlowEntry>> {
        self.by_serial.iter().find(|f| f.is_identical(flow))
    }

    /// Derives a list with `flow` added after all entries of equal or higher priority.
    /// Its serial must be higher than any in the list.
    pub fn with_inserted(&self, flow: Arc<FlowEntry>) -> FlowList {
        assert!(self.by_serial.last().map_or(true, |l| l.serial() < flow.serial()));
        let mut next = self.clone();
        let pos = next
            .by_priority
            .iter()
            .position(|f| f.priority() < flow.priority())
            .unwrap_or(next.by_priority.len());
        next.by_priority.insert(pos, Arc::clone(&flow));
        next.by_serial.push(flow);
        next
    }

    /// Derives a list with `new` in the positions of `old`
    pub fn with_replaced(&self, old: &Arc<FlowEntry>, new: Arc<FlowEntry>) -> FlowList {
        let mut next = self.clone();
        for slot in next.by_priority.iter_mut().chain(next.by_serial.iter_mut()) {
            if Arc::ptr_eq(slot, old) {
                *slot = Arc::clone(&new);
            }
        }
        next
    }

    /// Derives a list without the `removed` entries
    pub fn without(&self, removed: &[Arc<FlowEntry>]) -> FlowList {
        let keep = |f: &Arc<FlowEntry>| !removed.iter().any(|r| Arc::ptr_eq(r, f));
        FlowList {
            by_priority: self.by_priority.iter().filter(|f| keep(*f)).cloned().collect(),
            by_serial: self.by_serial.iter().filter(|f| keep(*f)).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table::tests::wild_entry;

    use std::time::Instant;

    fn arc(tp_dst: u16, priority: u16, serial: u64) -> Arc<FlowEntry> {
        let mut f = wild_entry(tp_dst, priority, 2, Instant::now());
        f.set_serial(serial);
        Arc::new(f)
    }

    fn priorities(list: &FlowList) -> Vec<(u16, u64)> {
        list.by_priority().iter().map(|f| (f.priority(), f.serial())).collect()
    }

    #[test]
    fn equal_priority_goes_last() {
        let list = FlowList::new()
            .with_inserted(arc(1, 10, 0))
            .with_inserted(arc(2, 20, 1))
            .with_inserted(arc(3, 10, 2))
            .with_inserted(arc(4, 5, 3));
        assert_eq!(vec![(20, 1), (10, 0), (10, 2), (5, 3)], priorities(&list));
        let serials: Vec<_> = list.by_serial().iter().map(|f| f.serial()).collect();
        assert_eq!(vec![0, 1, 2, 3], serials);
    }

    #[test]
    fn replace_keeps_position() {
        let a = arc(1, 10, 0);
        let b = arc(2, 10, 1);
        let list = FlowList::new().with_inserted(Arc::clone(&a)).with_inserted(b);
        let list = list.with_replaced(&a, arc(1, 10, 0));
        assert_eq!(vec![(10, 0), (10, 1)], priorities(&list));
        assert!(!Arc::ptr_eq(&a, &list.by_serial()[0]));
    }

    #[test]
    fn without_removes_from_both_orders() {
        let a = arc(1, 10, 0);
        let b = arc(2, 30, 1);
        let list = FlowList::new()
            .with_inserted(Arc::clone(&a))
            .with_inserted(Arc::clone(&b));
        let list = list.without(&[b]);
        assert_eq!(1, list.len());
        assert!(Arc::ptr_eq(&a, &list.by_priority()[0]));
        assert!(Arc::ptr_eq(&a, &list.by_serial()[0]));
    }
}
