/*!
The flow table contract shared by all backends.

A table stores flow entries and answers lookups for packet keys. Lookups run
lock-free against an RCU snapshot of the table's contents. All structural
changes are serialized by the owning chain, so a backend only has to make
sure a reader never observes a half-built snapshot.
*/

pub mod hash;
pub mod linear;
mod list;

pub use self::list::FlowList;

use flow::actions::ActionList;
use flow::entry::{effective_priority, FlowEntry};
use flow::{matches_strict, FlowKey};
use openflow::OfpFlowRemovedReason;

use std::error;
use std::fmt;
use std::result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Why a table refused an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The table cannot represent the key or the actions
    Unsupported,
    /// There is no room left
    Full,
    /// Both hash slots of an exact key are taken
    Collision,
    /// The hardware behind the table does not respond
    DeviceUnavailable,
    /// Emergency flows must not time out
    BadEmergencyTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Unsupported => write!(f, "The table does not support this flow"),
            Error::Full => write!(f, "The table is full"),
            Error::Collision => write!(f, "Both hash buckets of the flow are occupied"),
            Error::DeviceUnavailable => write!(f, "The flow table device is unavailable"),
            Error::BadEmergencyTimeout => write!(f, "Emergency flows must be permanent"),
        }
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "Flow table error"
    }
}

pub type Result<T> = result::Result<T, Error>;

/// An entry the table did not take, handed back with the reason
#[derive(Debug)]
pub struct Rejected {
    pub flow: FlowEntry,
    pub reason: Error,
}

impl Rejected {
    pub fn new(flow: FlowEntry, reason: Error) -> Rejected {
        Rejected {
            flow: flow,
            reason: reason,
        }
    }
}

/// Receives every entry a table unlinks, before the table drops its reference
pub trait RemovalSink {
    fn flow_removed(&self, flow: &FlowEntry, reason: OfpFlowRemovedReason, now: Instant);
}

/// A `RemovalSink` for callers that do not care about removals
pub struct Discard;

impl RemovalSink for Discard {
    fn flow_removed(&self, _: &FlowEntry, _: OfpFlowRemovedReason, _: Instant) {}
}

/// The answer of an iteration visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// The entry was consumed, go on
    Continue,
    /// The entry did not fit, pause before it
    Full,
}

/// Where an iteration resumes: strictly after the last consumed serial
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterCursor {
    last_serial: Option<u64>,
}

impl IterCursor {
    /// A cursor before the first entry
    pub fn start() -> IterCursor {
        IterCursor::default()
    }

    /// A cursor after the entry with `serial`
    pub fn after(serial: u64) -> IterCursor {
        IterCursor {
            last_serial: Some(serial),
        }
    }

    fn admits(&self, serial: u64) -> bool {
        match self.last_serial {
            Some(last) => serial > last,
            None => true,
        }
    }
}

/// The outcome of `Table::iterate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Done,
    Paused(IterCursor),
}

/// Per table lookup counters, updated by the chain on the packet path
#[derive(Debug, Default)]
pub struct LookupCounters {
    n_lookup: AtomicU64,
    n_matched: AtomicU64,
}

impl LookupCounters {
    pub fn record(&self, matched: bool) {
        self.n_lookup.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.n_matched.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn n_lookup(&self) -> u64 {
        self.n_lookup.load(Ordering::Relaxed)
    }

    pub fn n_matched(&self) -> u64 {
        self.n_matched.load(Ordering::Relaxed)
    }
}

/// Table statistics as reported to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub name: String,
    pub table_id: u8,
    /// Wildcards the table is able to store
    pub wildcards: u32,
    pub max_flows: usize,
    pub n_flows: usize,
    pub n_lookup: u64,
    pub n_matched: u64,
}

/// A flow table backend
pub trait Table: Send + Sync {
    /// Gets the name reported in table stats
    fn name(&self) -> &str;

    /// Gets the table id
    fn table_id(&self) -> u8;

    /// Gets the wildcard bits the table is able to store
    fn wildcards(&self) -> u32;

    /// Gets the capacity
    fn max_flows(&self) -> usize;

    /// Gets the number of stored entries
    fn n_flows(&self) -> usize;

    /// Gets the lookup counters
    fn counters(&self) -> &LookupCounters;

    /// Finds the highest priority entry matching the packet `key`
    fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowEntry>>;

    /// Stores `flow`, replacing an identical entry
    fn insert(&self, flow: FlowEntry) -> result::Result<(), Rejected>;

    /// Checks if an entry of the same priority overlaps `key`
    fn has_conflict(&self, key: &FlowKey, priority: u16) -> bool;

    /// Replaces the actions of all selected entries and returns their number
    fn modify(
        &self,
        key: &FlowKey,
        priority: u16,
        strict: bool,
        actions: &ActionList,
        now: Instant,
    ) -> usize;

    /// Unlinks all selected entries and returns their number
    fn delete(
        &self,
        key: &FlowKey,
        out_port: u16,
        priority: u16,
        strict: bool,
        sink: &RemovalSink,
        now: Instant,
    ) -> usize;

    /// Unlinks all expired entries and returns their number
    fn timeout(&self, now: Instant, sink: &RemovalSink) -> usize;

    /// Visits the entries overlapping `key` in serial order, starting after `cursor`
    fn iterate(
        &self,
        key: &FlowKey,
        out_port: u16,
        cursor: IterCursor,
        visit: &mut FnMut(&Arc<FlowEntry>) -> Visit,
    ) -> Iteration;

    /// Collects the table statistics
    fn stats(&self) -> TableStats {
        TableStats {
            name: self.name().to_owned(),
            table_id: self.table_id(),
            wildcards: self.wildcards(),
            max_flows: self.max_flows(),
            n_flows: self.n_flows(),
            n_lookup: self.counters().n_lookup(),
            n_matched: self.counters().n_matched(),
        }
    }
}

/// Checks if a modify, delete or iterate request selects `flow`.
/// Strict requests also need an equal (normalized) priority.
pub fn is_selected(flow: &FlowEntry, key: &FlowKey, out_port: u16, priority: u16, strict: bool) -> bool {
    matches_strict(flow.key(), key, strict)
        && (!strict || flow.priority() == effective_priority(key, priority))
        && flow.has_out_port(out_port)
}

/// Checks if `flow` overlaps `key` with the same priority
pub fn conflicts(flow: &FlowEntry, key: &FlowKey, priority: u16) -> bool {
    flow.priority() == effective_priority(key, priority) && ::flow::matches_symmetric(flow.key(), key)
}

/// Runs an iteration over entries in serial order
pub fn iterate_serial(
    by_serial: &[Arc<FlowEntry>],
    key: &FlowKey,
    out_port: u16,
    cursor: IterCursor,
    visit: &mut FnMut(&Arc<FlowEntry>) -> Visit,
) -> Iteration {
    let mut last = cursor;
    for flow in by_serial.iter().filter(|f| cursor.admits(f.serial())) {
        if !::flow::matches_symmetric(flow.key(), key) || !flow.has_out_port(out_port) {
            continue;
        }
        match visit(flow) {
            Visit::Continue => last = IterCursor::after(flow.serial()),
            Visit::Full => return Iteration::Paused(last),
        }
    }
    Iteration::Done
}

/// Splits the expired entries off `list` and reports them to `sink`
pub fn expired(list: &FlowList, now: Instant, sink: &RemovalSink) -> Vec<Arc<FlowEntry>> {
    let mut gone = vec![];
    for flow in list.by_serial() {
        if let Some(reason) = flow.timeout_reason(now) {
            debug!("flow {} expired: {:?}", flow, reason);
            sink.flow_removed(flow, reason, now);
            gone.push(Arc::clone(flow));
        }
    }
    gone
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use flow::actions::Action;
    use flow::tests::tcp_flow;
    use openflow::*;

    use std::cell::RefCell;

    /// Collects removals for assertions
    #[derive(Default)]
    pub struct Collect {
        pub removed: RefCell<Vec<(u64, OfpFlowRemovedReason)>>,
    }

    impl RemovalSink for Collect {
        fn flow_removed(&self, flow: &FlowEntry, reason: OfpFlowRemovedReason, _: Instant) {
            self.removed.borrow_mut().push((flow.serial(), reason));
        }
    }

    pub fn wild_entry(tp_dst: u16, priority: u16, out: u16, now: Instant) -> FlowEntry {
        let key = FlowKey::new(tcp_flow(1, 0x0a00_0001, 0x0a00_0002, tp_dst), OFPFW_IN_PORT);
        FlowEntry::new(key, priority, ActionList::new(vec![Action::output(out)]), now)
    }

    pub fn exact_entry(src: u32, out: u16, now: Instant) -> FlowEntry {
        let key = FlowKey::from_packet(&tcp_flow(1, src, 0x0a00_0002, 80));
        FlowEntry::new(key, 0, ActionList::new(vec![Action::output(out)]), now)
    }

    #[test]
    fn cursor_is_exclusive() {
        assert!(IterCursor::start().admits(0));
        assert!(!IterCursor::after(3).admits(3));
        assert!(IterCursor::after(3).admits(4));
    }

    #[test]
    fn strict_selection_normalizes_priority() {
        let now = Instant::now();
        let exact = exact_entry(1, 2, now);
        let key = *exact.key();
        assert!(is_selected(&exact, &key, OFPP_NONE, 7, true));
        assert!(is_selected(&exact, &key, 2, 7, true));
        assert!(!is_selected(&exact, &key, 3, 7, true));

        let wild = wild_entry(80, 100, 2, now);
        let key = *wild.key();
        assert!(is_selected(&wild, &key, OFPP_NONE, 100, true));
        assert!(!is_selected(&wild, &key, OFPP_NONE, 99, true));
        assert!(is_selected(&wild, &key, OFPP_NONE, 99, false));
    }

    #[test]
    fn lookup_counters() {
        let c = LookupCounters::default();
        c.record(true);
        c.record(false);
        assert_eq!(2, c.n_lookup());
        assert_eq!(1, c.n_matched());
    }

    #[test]
    fn iteration_pauses_before_full_entry() {
        let now = Instant::now();
        let flows: Vec<_> = (0..5)
            .map(|i| {
                let mut f = wild_entry(80 + i, 10, 2, now);
                f.set_serial(u64::from(i));
                Arc::new(f)
            })
            .collect();
        let mut seen = vec![];
        let mut budget = 2;
        let any = FlowKey::any();
        let result = iterate_serial(&flows, &any, OFPP_NONE, IterCursor::start(), &mut |f| {
            if budget == 0 {
                return Visit::Full;
            }
            budget -= 1;
            seen.push(f.serial());
            Visit::Continue
        });
        assert_eq!(Iteration::Paused(IterCursor::after(1)), result);
        let result = iterate_serial(&flows, &any, OFPP_NONE, IterCursor::after(1), &mut |f| {
            seen.push(f.serial());
            Visit::Continue
        });
        assert_eq!(Iteration::Done, result);
        assert_eq!(vec![0, 1, 2, 3, 4], seen);
    }
}
