/*!
A software table that scans its entries linearly in priority order.

It takes any wildcard combination and is also used as the emergency table.
*/

use flow::actions::ActionList;
use flow::entry::FlowEntry;
use flow::{matches_rule_wildcards, FlowKey};
use openflow::*;
use sync::Rcu;
use table::*;

use std::result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default capacity of a linear table
pub const LINEAR_MAX_FLOWS: usize = 100;

pub struct LinearTable {
    name: String,
    table_id: u8,
    max_flows: usize,
    flows: Rcu<FlowList>,
    next_serial: AtomicU64,
    counters: LookupCounters,
}

impl LinearTable {
    pub fn new(name: &str, table_id: u8, max_flows: usize) -> LinearTable {
        info!("Creating linear table {} ({}) with room for {} flows", name, table_id, max_flows);
        LinearTable {
            name: name.to_owned(),
            table_id: table_id,
            max_flows: max_flows,
            flows: Rcu::new(FlowList::new()),
            next_serial: AtomicU64::new(0),
            counters: LookupCounters::default(),
        }
    }
}

impl Table for LinearTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn wildcards(&self) -> u32 {
        OFPFW_ALL
    }

    fn max_flows(&self) -> usize {
        self.max_flows
    }

    fn n_flows(&self) -> usize {
        self.flows.read().len()
    }

    fn counters(&self) -> &LookupCounters {
        &self.counters
    }

    fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowEntry>> {
        let flows = self.flows.read();
        let found = flows
            .by_priority()
            .iter()
            .find(|f| matches_rule_wildcards(key, f.key()))
            .cloned();
        found
    }

    fn insert(&self, mut flow: FlowEntry) -> result::Result<(), Rejected> {
        let flows = self.flows.read();
        flow.set_table_id(self.table_id);

        if let Some(old) = flows.find_identical(&flow) {
            flow.set_serial(old.serial());
            debug!("{}: replacing flow {}", self.name, flow);
            self.flows.publish(flows.with_replaced(old, Arc::new(flow)));
            return Ok(());
        }

        if flows.len() >= self.max_flows {
            debug!("{}: no room for flow {}", self.name, flow);
            return Err(Rejected::new(flow, Error::Full));
        }

        flow.set_serial(self.next_serial.fetch_add(1, Ordering::Relaxed));
        debug!("{}: inserting flow {}", self.name, flow);
        self.flows.publish(flows.with_inserted(Arc::new(flow)));
        Ok(())
    }

    fn has_conflict(&self, key: &FlowKey, priority: u16) -> bool {
        self.flows
            .read()
            .by_serial()
            .iter()
            .any(|f| conflicts(f, key, priority))
    }

    fn modify(
        &self,
        key: &FlowKey,
        priority: u16,
        strict: bool,
        actions: &ActionList,
        _: Instant,
    ) -> usize {
        let flows = self.flows.read();
        let mut count = 0;
        for flow in flows.by_serial() {
            if is_selected(flow, key, OFPP_NONE, priority, strict) {
                flow.replace_actions(actions.clone());
                count += 1;
            }
        }
        debug!("{}: modified {} flows", self.name, count);
        count
    }

    fn delete(
        &self,
        key: &FlowKey,
        out_port: u16,
        priority: u16,
        strict: bool,
        sink: &RemovalSink,
        now: Instant,
    ) -> usize {
        let flows = self.flows.read();
        let doomed: Vec<_> = flows
            .by_serial()
            .iter()
            .filter(|f| is_selected(f, key, out_port, priority, strict))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        for flow in &doomed {
            sink.flow_removed(flow, OfpFlowRemovedReason::Delete, now);
        }
        self.flows.publish(flows.without(&doomed));
        debug!("{}: deleted {} flows", self.name, doomed.len());
        doomed.len()
    }

    fn timeout(&self, now: Instant, sink: &RemovalSink) -> usize {
        let flows = self.flows.read();
        let gone = expired(&flows, now, sink);
        if !gone.is_empty() {
            self.flows.publish(flows.without(&gone));
        }
        gone.len()
    }

    fn iterate(
        &self,
        key: &FlowKey,
        out_port: u16,
        cursor: IterCursor,
        visit: &mut FnMut(&Arc<FlowEntry>) -> Visit,
    ) -> Iteration {
        let flows = self.flows.read();
        iterate_serial(flows.by_serial(), key, out_port, cursor, visit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::actions::Action;
    use flow::entry::Timeout;
    use flow::tests::tcp_flow;
    use table::tests::*;

    use std::time::Duration;

    fn packet(tp_dst: u16) -> FlowKey {
        FlowKey::from_packet(&tcp_flow(3, 0x0a00_0001, 0x0a00_0002, tp_dst))
    }

    #[test]
    fn insert_lookup_delete() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        assert!(table.insert(wild_entry(80, 10, 2, now)).is_ok());
        let found = table.lookup(&packet(80)).unwrap();
        assert!(found.has_out_port(2));
        assert!(table.lookup(&packet(81)).is_none());

        let key = *found.key();
        let sink = Collect::default();
        assert_eq!(1, table.delete(&key, OFPP_NONE, 10, true, &sink, now));
        assert_eq!(vec![(0, OfpFlowRemovedReason::Delete)], *sink.removed.borrow());
        assert!(table.lookup(&packet(80)).is_none());
        assert_eq!(0, table.n_flows());
    }

    #[test]
    fn highest_priority_wins() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        let any = FlowEntry::new(FlowKey::any(), 1, ActionList::new(vec![Action::output(4)]), now);
        table.insert(any).unwrap();
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        assert!(table.lookup(&packet(80)).unwrap().has_out_port(2));
        assert!(table.lookup(&packet(22)).unwrap().has_out_port(4));
    }

    #[test]
    fn identical_insert_replaces() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        table.insert(wild_entry(443, 10, 2, now)).unwrap();
        table.insert(wild_entry(80, 10, 3, now)).unwrap();
        assert_eq!(2, table.n_flows());
        let found = table.lookup(&packet(80)).unwrap();
        assert!(found.has_out_port(3));
        assert_eq!(0, found.serial());
    }

    #[test]
    fn full_table_hands_flow_back() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, 1);
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        let rejected = table.insert(wild_entry(81, 10, 2, now)).unwrap_err();
        assert_eq!(Error::Full, rejected.reason);
        assert_eq!(81, rejected.flow.key().flow().tp_dst);
    }

    #[test]
    fn strict_overlap_conflict() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        let flow = wild_entry(80, 10, 2, now);
        let key = *flow.key();
        table.insert(flow).unwrap();
        assert!(table.has_conflict(&key, 10));
        assert!(!table.has_conflict(&key, 11));
        let broader = FlowKey::new(tcp_flow(1, 0x0a00_0001, 0x0a00_0002, 0), OFPFW_IN_PORT | OFPFW_TP_DST);
        assert!(table.has_conflict(&broader, 10));
    }

    #[test]
    fn modify_swaps_actions() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        table.insert(wild_entry(81, 20, 2, now)).unwrap();
        let before = table.lookup(&packet(80)).unwrap();
        let actions = ActionList::new(vec![Action::output(4)]);
        let any = FlowKey::any();
        assert_eq!(0, table.modify(&any, 10, true, &actions, now));
        assert_eq!(2, table.modify(&any, 0, false, &actions, now));
        assert!(before.has_out_port(4));
    }

    #[test]
    fn delete_filters_by_out_port() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        table.insert(wild_entry(81, 10, 3, now)).unwrap();
        assert_eq!(1, table.delete(&FlowKey::any(), 3, 0, false, &Discard, now));
        assert!(table.lookup(&packet(80)).is_some());
        assert!(table.lookup(&packet(81)).is_none());
    }

    #[test]
    fn timeout_sweep() {
        let base = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        let idle = wild_entry(80, 10, 2, base).with_timeouts(Timeout::ExpiresAfter(5), Timeout::Permanent);
        table.insert(idle).unwrap();
        table.insert(wild_entry(81, 10, 2, base)).unwrap();
        table.lookup(&packet(80)).unwrap().touch(base + Duration::from_secs(4));

        let sink = Collect::default();
        assert_eq!(0, table.timeout(base + Duration::from_secs(9), &sink));
        assert_eq!(1, table.timeout(base + Duration::from_secs(10), &sink));
        assert_eq!(vec![(0, OfpFlowRemovedReason::IdleTimeout)], *sink.removed.borrow());
        assert_eq!(1, table.n_flows());
    }

    #[test]
    fn snapshot_survives_delete() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        table.insert(wild_entry(80, 10, 2, now)).unwrap();
        let held = table.lookup(&packet(80)).unwrap();
        table.delete(&FlowKey::any(), OFPP_NONE, 0, false, &Discard, now);
        assert!(held.has_out_port(2));
        assert_eq!(1, Arc::strong_count(&held));
    }

    #[test]
    fn iteration_resumes() {
        let now = Instant::now();
        let table = LinearTable::new("classifier", 0, LINEAR_MAX_FLOWS);
        for port in 0..6 {
            table.insert(wild_entry(1000 + port, 10, 2, now)).unwrap();
        }
        let any = FlowKey::any();
        let mut seen = vec![];
        let mut cursor = IterCursor::start();
        loop {
            let mut budget = 4;
            let result = table.iterate(&any, OFPP_NONE, cursor, &mut |f| {
                if budget == 0 {
                    return Visit::Full;
                }
                budget -= 1;
                seen.push(f.serial());
                Visit::Continue
            });
            match result {
                Iteration::Done => break,
                Iteration::Paused(next) => cursor = next,
            }
            // a flow added between pages is still visited
            if seen.len() == 4 {
                table.insert(wild_entry(2000, 10, 2, now)).unwrap();
            }
        }
        assert_eq!(vec![0, 1, 2, 3, 4, 5, 6], seen);
    }
}
