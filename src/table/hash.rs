/*!
A software exact-match table with two hash functions.

Every key has one candidate bucket in each of two arrays, indexed by CRC-32
digests with different polynomials. A key that finds both candidates taken
is refused, nothing is displaced.
*/

use flow::actions::ActionList;
use flow::digest::{KeyDigests, HASH2_POLY_1, HASH2_POLY_2};
use flow::entry::FlowEntry;
use flow::FlowKey;
use openflow::*;
use sync::Rcu;
use table::*;

use std::result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default number of buckets per hash function
pub const HASH2_BUCKETS: usize = 1 << 16;

/// One bucket, published on its own so a writer only copies what it touches
type Bucket = Rcu<Option<Arc<FlowEntry>>>;

fn buckets(n: usize) -> Vec<Bucket> {
    (0..n).map(|_| Rcu::new(None)).collect()
}

fn occupant(bucket: &Bucket) -> Option<Arc<FlowEntry>> {
    (*bucket.read()).clone()
}

pub struct HashTable {
    name: String,
    table_id: u8,
    mask: usize,
    digests: KeyDigests,
    first: Vec<Bucket>,
    second: Vec<Bucket>,
    flows: Rcu<FlowList>,
    next_serial: AtomicU64,
    counters: LookupCounters,
}

impl HashTable {
    /// Constructs a table with `n_buckets` buckets per hash function,
    /// which must be a power of two.
    pub fn new(name: &str, table_id: u8, n_buckets: usize) -> HashTable {
        assert!(n_buckets.is_power_of_two());
        info!("Creating hash table {} ({}) with 2x{} buckets", name, table_id, n_buckets);
        HashTable {
            name: name.to_owned(),
            table_id: table_id,
            mask: n_buckets - 1,
            digests: KeyDigests::new(HASH2_POLY_1, HASH2_POLY_2),
            first: buckets(n_buckets),
            second: buckets(n_buckets),
            flows: Rcu::new(FlowList::new()),
            next_serial: AtomicU64::new(0),
            counters: LookupCounters::default(),
        }
    }

    fn bucket_indices(&self, key: &FlowKey) -> (usize, usize) {
        let (d1, d2) = self.digests.digests(key);
        (d1 as usize & self.mask, d2 as usize & self.mask)
    }

    fn candidates(&self, key: &FlowKey) -> [&Bucket; 2] {
        let (b1, b2) = self.bucket_indices(key);
        [&self.first[b1], &self.second[b2]]
    }

    fn find(&self, key: &FlowKey) -> Option<Arc<FlowEntry>> {
        self.candidates(key)
            .iter()
            .filter_map(|b| occupant(b))
            .find(|f| f.key() == key)
    }

    /// Puts `new` into the bucket that holds `old`
    fn swap(&self, old: &Arc<FlowEntry>, new: Option<Arc<FlowEntry>>) {
        for bucket in &self.candidates(old.key()) {
            if occupant(bucket).map_or(false, |f| Arc::ptr_eq(&f, old)) {
                bucket.publish(new);
                return;
            }
        }
    }

    fn remove(&self, flows: &FlowList, doomed: &[Arc<FlowEntry>]) {
        self.flows.publish(flows.without(doomed));
        for flow in doomed {
            self.swap(flow, None);
        }
    }
}

impl Table for HashTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn wildcards(&self) -> u32 {
        0
    }

    fn max_flows(&self) -> usize {
        2 * (self.mask + 1)
    }

    fn n_flows(&self) -> usize {
        self.flows.read().len()
    }

    fn counters(&self) -> &LookupCounters {
        &self.counters
    }

    fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowEntry>> {
        self.find(key)
    }

    fn insert(&self, mut flow: FlowEntry) -> result::Result<(), Rejected> {
        if !flow.key().is_exact() {
            return Err(Rejected::new(flow, Error::Unsupported));
        }
        flow.set_table_id(self.table_id);

        let flows = self.flows.read();
        if let Some(old) = self.find(flow.key()) {
            flow.set_serial(old.serial());
            debug!("{}: replacing flow {}", self.name, flow);
            let new = Arc::new(flow);
            self.swap(&old, Some(Arc::clone(&new)));
            self.flows.publish(flows.with_replaced(&old, new));
            return Ok(());
        }

        let free = self.candidates(flow.key()).iter().find(|b| b.read().is_none()).cloned();
        let bucket = match free {
            Some(bucket) => bucket,
            None => {
                debug!("{}: buckets {:?} are taken for flow {}", self.name, self.bucket_indices(flow.key()), flow);
                return Err(Rejected::new(flow, Error::Collision));
            }
        };

        flow.set_serial(self.next_serial.fetch_add(1, Ordering::Relaxed));
        let flow = Arc::new(flow);
        debug!("{}: inserting flow {}", self.name, flow);
        self.flows.publish(flows.with_inserted(Arc::clone(&flow)));
        bucket.publish(Some(flow));
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
        if !doomed.is_empty() {
            for flow in &doomed {
                sink.flow_removed(flow, OfpFlowRemovedReason::Delete, now);
            }
            self.remove(&flows, &doomed);
            debug!("{}: deleted {} flows", self.name, doomed.len());
        }
        doomed.len()
    }

    fn timeout(&self, now: Instant, sink: &RemovalSink) -> usize {
        let flows = self.flows.read();
        let gone = expired(&flows, now, sink);
        if !gone.is_empty() {
            self.remove(&flows, &gone);
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
    use flow::tests::tcp_flow;
    use table::tests::*;

    use std::collections::HashMap;

    fn packet(src: u32) -> FlowKey {
        FlowKey::from_packet(&tcp_flow(1, src, 0x0a00_0002, 80))
    }

    fn marked(nw_tos: u8, dl_vlan_pcp: u8) -> FlowKey {
        let mut f = tcp_flow(1, 7, 0x0a00_0002, 80);
        f.dl_vlan = 10;
        f.nw_tos = nw_tos;
        f.dl_vlan_pcp = dl_vlan_pcp;
        FlowKey::from_packet(&f)
    }

    #[test]
    fn tos_and_pcp_pick_other_buckets() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, HASH2_BUCKETS);
        let keys: Vec<FlowKey> = [(0, 0), (4, 0), (8, 0), (0, 3), (0, 5)]
            .iter()
            .map(|&(tos, pcp)| marked(tos, pcp))
            .collect();
        for (i, key) in keys.iter().enumerate() {
            let actions = ActionList::new(vec![Action::output(i as u16 + 1)]);
            table.insert(FlowEntry::new(*key, 0, actions, now)).unwrap();
        }
        assert_eq!(keys.len(), table.n_flows());
        for (i, key) in keys.iter().enumerate() {
            assert!(table.lookup(key).unwrap().has_out_port(i as u16 + 1));
        }
    }

    #[test]
    fn removal_frees_only_its_bucket() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, 64);
        table.insert(exact_entry(7, 2, now)).unwrap();
        table.insert(exact_entry(8, 3, now)).unwrap();
        let snapshot = table.lookup(&packet(7)).unwrap();
        assert_eq!(1, table.delete(snapshot.key(), OFPP_NONE, 0, true, &Discard, now));
        assert!(table.lookup(&packet(7)).is_none());
        assert!(table.lookup(&packet(8)).unwrap().has_out_port(3));
        // a reader's snapshot stays usable after the unlink
        assert!(snapshot.has_out_port(2));
    }

    #[test]
    fn insert_lookup_delete() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, 64);
        table.insert(exact_entry(7, 2, now)).unwrap();
        let found = table.lookup(&packet(7)).unwrap();
        assert_eq!(u16::MAX, found.priority());
        assert!(table.lookup(&packet(8)).is_none());

        let key = *found.key();
        assert_eq!(1, table.delete(&key, OFPP_NONE, 0, true, &Discard, now));
        assert!(table.lookup(&packet(7)).is_none());
        assert_eq!(0, table.n_flows());
    }

    #[test]
    fn wildcards_are_unsupported() {
        let table = HashTable::new("hash2", 0, 64);
        let rejected = table.insert(wild_entry(80, 10, 2, Instant::now())).unwrap_err();
        assert_eq!(Error::Unsupported, rejected.reason);
        assert_eq!(0, table.wildcards());
    }

    #[test]
    fn reinsert_replaces() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, 64);
        table.insert(exact_entry(7, 2, now)).unwrap();
        table.insert(exact_entry(7, 3, now)).unwrap();
        assert_eq!(1, table.n_flows());
        assert!(table.lookup(&packet(7)).unwrap().has_out_port(3));
    }

    #[test]
    fn double_hash_collision() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, 4);

        // find three keys that share both of their buckets
        let mut by_buckets = HashMap::new();
        let mut colliding = None;
        for src in 0..10_000u32 {
            let keys = by_buckets
                .entry(table.bucket_indices(&packet(src)))
                .or_insert_with(Vec::new);
            keys.push(src);
            if keys.len() == 3 {
                colliding = Some(keys.clone());
                break;
            }
        }
        let colliding = colliding.unwrap();

        table.insert(exact_entry(colliding[0], 2, now)).unwrap();
        table.insert(exact_entry(colliding[1], 2, now)).unwrap();
        let rejected = table.insert(exact_entry(colliding[2], 2, now)).unwrap_err();
        assert_eq!(Error::Collision, rejected.reason);
        assert_eq!(2, table.n_flows());
        assert!(table.lookup(&packet(colliding[0])).is_some());
        assert!(table.lookup(&packet(colliding[1])).is_some());
        assert!(table.lookup(&packet(colliding[2])).is_none());

        // a freed bucket takes the refused key
        let gone = packet(colliding[0]);
        assert_eq!(1, table.delete(&gone, OFPP_NONE, 0, true, &Discard, now));
        table.insert(rejected.flow).unwrap();
        assert!(table.lookup(&packet(colliding[2])).is_some());
    }

    #[test]
    fn serials_skip_refused_flows() {
        let now = Instant::now();
        let table = HashTable::new("hash2", 0, 1);
        table.insert(exact_entry(1, 2, now)).unwrap();
        table.insert(exact_entry(2, 2, now)).unwrap();
        assert!(table.insert(exact_entry(3, 2, now)).is_err());
        assert_eq!(1, table.lookup(&packet(2)).unwrap().serial());
    }
}
