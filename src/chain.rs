/*!
The chain of flow tables a packet is matched against.

Tables are consulted in order and the first match wins, so faster and more
specific tables go first. A separate emergency table takes over when the
datapath enters emergency mode.
*/

use flow::actions::ActionList;
use flow::entry::FlowEntry;
use flow::FlowKey;
use openflow::OfpFlowRemovedReason;
use sync::lock;
use table::{Error, Rejected, RemovalSink, Table};

use std::result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Reports every flushed entry as deleted
struct FlushSink<'a> {
    sink: &'a RemovalSink,
}

impl<'a> RemovalSink for FlushSink<'a> {
    fn flow_removed(&self, flow: &FlowEntry, _: OfpFlowRemovedReason, now: Instant) {
        self.sink.flow_removed(flow, OfpFlowRemovedReason::Delete, now)
    }
}

pub struct Chain {
    tables: Vec<Box<Table>>,
    emergency: Box<Table>,
    /// Serializes all structural changes
    mutation: Mutex<()>,
    emergency_mode: AtomicBool,
}

impl Chain {
    pub fn new(tables: Vec<Box<Table>>, emergency: Box<Table>) -> Chain {
        for table in &tables {
            info!("Chaining table {} ({})", table.name(), table.table_id());
        }
        Chain {
            tables: tables,
            emergency: emergency,
            mutation: Mutex::new(()),
            emergency_mode: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<()> {
        lock(&self.mutation)
    }

    /// Gets the normal tables in lookup order
    pub fn tables(&self) -> &[Box<Table>] {
        &self.tables
    }

    /// Gets the emergency table
    pub fn emergency_table(&self) -> &Table {
        &*self.emergency
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency_mode.load(Ordering::Acquire)
    }

    /// Finds the entry for a packet key. Never takes the chain lock.
    pub fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowEntry>> {
        if self.is_emergency() {
            let found = self.emergency.lookup(key);
            self.emergency.counters().record(found.is_some());
            return found;
        }
        for table in &self.tables {
            let found = table.lookup(key);
            table.counters().record(found.is_some());
            if found.is_some() {
                trace!("{} matched in table {}", key, table.name());
                return found;
            }
        }
        trace!("{} missed", key);
        None
    }

    /// Inserts `flow` into the first table that takes it.
    /// If no table does, the last table's reason is reported.
    pub fn insert(&self, flow: FlowEntry) -> result::Result<(), Rejected> {
        let _guard = self.lock();
        let mut rejected = Rejected::new(flow, Error::Full);
        for table in &self.tables {
            match table.insert(rejected.flow) {
                Ok(()) => return Ok(()),
                Err(r) => {
                    debug!("Table {} refused flow: {}", table.name(), r.reason);
                    rejected = r;
                }
            }
        }
        Err(rejected)
    }

    /// Inserts `flow` into the emergency table. Emergency flows must be permanent.
    pub fn insert_emergency(&self, flow: FlowEntry) -> result::Result<(), Rejected> {
        if !flow.idle_timeout().is_permanent() || !flow.hard_timeout().is_permanent() {
            return Err(Rejected::new(flow, Error::BadEmergencyTimeout));
        }
        let _guard = self.lock();
        self.emergency.insert(flow.with_emergency(true))
    }

    /// Checks the normal tables for an entry overlapping `key` at `priority`
    pub fn has_conflict(&self, key: &FlowKey, priority: u16) -> bool {
        let _guard = self.lock();
        self.tables.iter().any(|t| t.has_conflict(key, priority))
    }

    pub fn modify(
        &self,
        key: &FlowKey,
        priority: u16,
        strict: bool,
        actions: &ActionList,
        now: Instant,
    ) -> usize {
        let _guard = self.lock();
        self.tables
            .iter()
            .map(|t| t.modify(key, priority, strict, actions, now))
            .sum()
    }

    pub fn delete(
        &self,
        key: &FlowKey,
        out_port: u16,
        priority: u16,
        strict: bool,
        sink: &RemovalSink,
        now: Instant,
    ) -> usize {
        let _guard = self.lock();
        self.tables
            .iter()
            .map(|t| t.delete(key, out_port, priority, strict, sink, now))
            .sum()
    }

    pub fn delete_emergency(
        &self,
        key: &FlowKey,
        out_port: u16,
        priority: u16,
        strict: bool,
        sink: &RemovalSink,
        now: Instant,
    ) -> usize {
        let _guard = self.lock();
        self.emergency.delete(key, out_port, priority, strict, sink, now)
    }

    /// Expires entries in the normal tables
    pub fn timeout(&self, now: Instant, sink: &RemovalSink) -> usize {
        let _guard = self.lock();
        let n: usize = self.tables.iter().map(|t| t.timeout(now, sink)).sum();
        if n > 0 {
            debug!("{} flows expired", n);
        }
        n
    }

    /// Flushes the normal tables and serves lookups from the emergency table
    pub fn enter_emergency(&self, sink: &RemovalSink, now: Instant) -> usize {
        let _guard = self.lock();
        self.emergency_mode.store(true, Ordering::Release);
        let any = FlowKey::any();
        let flush = FlushSink { sink: sink };
        let n: usize = self
            .tables
            .iter()
            .map(|t| t.delete(&any, ::openflow::OFPP_NONE, 0, false, &flush, now))
            .sum();
        warn!("Entered emergency mode, flushed {} flows", n);
        n
    }

    /// Serves lookups from the normal tables again
    pub fn leave_emergency(&self) {
        let _guard = self.lock();
        if self.emergency_mode.swap(false, Ordering::AcqRel) {
            info!("Left emergency mode");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::actions::Action;
    use flow::entry::Timeout;
    use flow::tests::tcp_flow;
    use openflow::*;
    use table::hash::HashTable;
    use table::linear::LinearTable;
    use table::tests::*;
    use table::Discard;

    fn chain(linear_max: usize) -> Chain {
        let tables: Vec<Box<Table>> = vec![
            Box::new(HashTable::new("hash2", 0, 4)),
            Box::new(LinearTable::new("linear", 1, linear_max)),
        ];
        Chain::new(tables, Box::new(LinearTable::new("emergency", OFPTT_EMERG, 10)))
    }

    fn packet(src: u32, tp_dst: u16) -> FlowKey {
        FlowKey::from_packet(&tcp_flow(1, src, 0x0a00_0002, tp_dst))
    }

    #[test]
    fn exact_flows_differing_in_tos_or_pcp() {
        let now = Instant::now();
        let tables: Vec<Box<Table>> = vec![
            Box::new(HashTable::new("hash2", 0, 1 << 16)),
            Box::new(LinearTable::new("linear", 1, 10)),
        ];
        let chain = Chain::new(tables, Box::new(LinearTable::new("emergency", OFPTT_EMERG, 10)));

        let marked = |nw_tos: u8, dl_vlan_pcp: u8| {
            let mut f = tcp_flow(1, 7, 0x0a00_0002, 80);
            f.dl_vlan = 10;
            f.nw_tos = nw_tos;
            f.dl_vlan_pcp = dl_vlan_pcp;
            FlowKey::from_packet(&f)
        };
        let keys = vec![marked(0, 0), marked(0xb8, 0), marked(0x20, 0), marked(0, 6), marked(0, 7)];
        for (i, key) in keys.iter().enumerate() {
            let actions = ActionList::new(vec![Action::output(i as u16 + 1)]);
            chain.insert(FlowEntry::new(*key, 0, actions, now)).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            let found = chain.lookup(key).unwrap();
            assert_eq!(0, found.table_id());
            assert!(found.has_out_port(i as u16 + 1));
        }
        assert_eq!(0, chain.tables()[1].n_flows());
    }

    #[test]
    fn exact_flows_go_to_the_hash_table() {
        let now = Instant::now();
        let chain = chain(10);
        chain.insert(exact_entry(7, 2, now)).unwrap();
        chain.insert(wild_entry(443, 10, 3, now)).unwrap();
        assert_eq!(1, chain.tables()[0].n_flows());
        assert_eq!(1, chain.tables()[1].n_flows());
        assert_eq!(0, chain.lookup(&packet(7, 80)).unwrap().table_id());
        assert_eq!(1, chain.lookup(&packet(0x0a00_0001, 443)).unwrap().table_id());
    }

    #[test]
    fn lookup_counts_each_visited_table() {
        let now = Instant::now();
        let chain = chain(10);
        chain.insert(wild_entry(443, 10, 3, now)).unwrap();
        assert!(chain.lookup(&packet(0x0a00_0001, 443)).is_some());
        assert!(chain.lookup(&packet(0x0a00_0001, 444)).is_none());
        let hash = chain.tables()[0].stats();
        let linear = chain.tables()[1].stats();
        assert_eq!((2, 0), (hash.n_lookup, hash.n_matched));
        assert_eq!((2, 1), (linear.n_lookup, linear.n_matched));
    }

    #[test]
    fn last_error_is_reported() {
        let now = Instant::now();
        let chain = chain(0);
        let rejected = chain.insert(wild_entry(443, 10, 3, now)).unwrap_err();
        assert_eq!(Error::Full, rejected.reason);
    }

    #[test]
    fn emergency_flows_must_be_permanent() {
        let now = Instant::now();
        let chain = chain(10);
        let flow = wild_entry(80, 10, 2, now).with_timeouts(Timeout::ExpiresAfter(1), Timeout::Permanent);
        let rejected = chain.insert_emergency(flow).unwrap_err();
        assert_eq!(Error::BadEmergencyTimeout, rejected.reason);
        chain.insert_emergency(wild_entry(80, 10, 2, now)).unwrap();
        assert_eq!(1, chain.emergency_table().n_flows());
    }

    #[test]
    fn emergency_mode() {
        let now = Instant::now();
        let chain = chain(10);
        chain.insert(wild_entry(80, 10, 2, now)).unwrap();
        chain.insert(exact_entry(0x0a00_0001, 3, now)).unwrap();
        chain.insert_emergency(wild_entry(80, 5, 4, now)).unwrap();
        assert!(chain.lookup(&packet(0x0a00_0001, 80)).unwrap().has_out_port(3));

        let sink = Collect::default();
        assert_eq!(2, chain.enter_emergency(&sink, now));
        assert!(sink
            .removed
            .borrow()
            .iter()
            .all(|&(_, reason)| reason == OfpFlowRemovedReason::Delete));
        let found = chain.lookup(&packet(0x0a00_0001, 80)).unwrap();
        assert!(found.is_emergency());
        assert!(found.has_out_port(4));

        chain.leave_emergency();
        assert!(chain.lookup(&packet(0x0a00_0001, 80)).is_none());
    }

    #[test]
    fn modify_and_delete_span_tables() {
        let now = Instant::now();
        let chain = chain(10);
        chain.insert(exact_entry(7, 2, now)).unwrap();
        chain.insert(wild_entry(443, 10, 2, now)).unwrap();
        let actions = ActionList::new(vec![Action::output(4)]);
        assert_eq!(2, chain.modify(&FlowKey::any(), 0, false, &actions, now));
        assert!(chain.has_conflict(&packet(7, 80), 0));
        assert_eq!(2, chain.delete(&FlowKey::any(), 4, 0, false, &Discard, now));
        assert!(chain.lookup(&packet(7, 80)).is_none());
    }
}
