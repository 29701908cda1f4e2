/*!
Flow entries: a match, its actions, counters and timeout policy.

An entry is built by the control integration and handed to exactly one
table. Once a table has published it, the entry is shared with the packet
path through `Arc`s and is never mutated in place, except for its atomic
counters and an action list swap.
*/

use flow::actions::ActionList;
use flow::FlowKey;
use openflow::*;
use sync::Rcu;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long before a flow entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Never expires
    Permanent,
    /// Expires after the given number of seconds
    ExpiresAfter(u16),
}

impl Timeout {
    /// Converts the OpenFlow representation, where 0 is permanent.
    pub fn from_secs(secs: u16) -> Timeout {
        if secs == OFP_FLOW_PERMANENT {
            Timeout::Permanent
        }
        else {
            Timeout::ExpiresAfter(secs)
        }
    }

    /// Converts to the OpenFlow representation
    pub fn as_secs(&self) -> u16 {
        match *self {
            Timeout::Permanent => OFP_FLOW_PERMANENT,
            Timeout::ExpiresAfter(secs) => secs,
        }
    }

    /// Checks if this timeout is `Timeout::Permanent`
    pub fn is_permanent(&self) -> bool {
        *self == Timeout::Permanent
    }

    /// Checks if more than this timeout has passed between `since` and `now`.
    fn has_elapsed(&self, since: Instant, now: Instant) -> bool {
        match *self {
            Timeout::Permanent => false,
            Timeout::ExpiresAfter(secs) => now > since + Duration::from_secs(u64::from(secs)),
        }
    }
}

/// Entries without wildcards always take precedence over wildcarded ones,
/// so their priority is fixed at the maximum. The same normalization is
/// applied to the priority of strict modify/delete requests.
pub fn effective_priority(key: &FlowKey, priority: u16) -> u16 {
    if key.is_exact() {
        u16::MAX
    }
    else {
        priority
    }
}

/// A flow table entry
pub struct FlowEntry {
    key: FlowKey,
    priority: u16,
    cookie: u64,
    idle_timeout: Timeout,
    hard_timeout: Timeout,
    send_flow_rem: bool,
    emergency: bool,
    created: Instant,
    /// Nanoseconds between `created` and the last use
    used: AtomicU64,
    packet_count: AtomicU64,
    byte_count: AtomicU64,
    actions: Rcu<ActionList>,
    serial: u64,
    table_id: u8,
    /// Placement data of the table the entry lives in
    private: Option<Box<Any + Send + Sync>>,
}

impl FlowEntry {
    /// Constructs a permanent flow entry created at `now`
    pub fn new(key: FlowKey, priority: u16, actions: ActionList, now: Instant) -> FlowEntry {
        FlowEntry {
            key: key,
            priority: effective_priority(&key, priority),
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            send_flow_rem: false,
            emergency: false,
            created: now,
            used: AtomicU64::new(0),
            packet_count: AtomicU64::new(0),
            byte_count: AtomicU64::new(0),
            actions: Rcu::new(actions),
            serial: 0,
            table_id: 0,
            private: None,
        }
    }

    /// Sets the opaque controller cookie
    pub fn with_cookie(mut self, cookie: u64) -> FlowEntry {
        self.cookie = cookie;
        self
    }

    /// Sets the idle and hard timeout
    pub fn with_timeouts(mut self, idle: Timeout, hard: Timeout) -> FlowEntry {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    /// Requests a flow removed message when the entry goes away
    pub fn with_removal_notification(mut self, send_flow_rem: bool) -> FlowEntry {
        self.send_flow_rem = send_flow_rem;
        self
    }

    /// Marks the entry as emergency flow
    pub fn with_emergency(mut self, emergency: bool) -> FlowEntry {
        self.emergency = emergency;
        self
    }

    /// Gets the match
    pub fn key(&self) -> &FlowKey {
        &self.key
    }
    /// Gets the priority
    pub fn priority(&self) -> u16 {
        self.priority
    }
    /// Gets the cookie
    pub fn cookie(&self) -> u64 {
        self.cookie
    }
    /// Gets the idle timeout
    pub fn idle_timeout(&self) -> Timeout {
        self.idle_timeout
    }
    /// Gets the hard timeout
    pub fn hard_timeout(&self) -> Timeout {
        self.hard_timeout
    }
    /// Checks if a flow removed message is requested
    pub fn send_flow_rem(&self) -> bool {
        self.send_flow_rem
    }
    /// Checks if this is an emergency flow
    pub fn is_emergency(&self) -> bool {
        self.emergency
    }
    /// Gets the serial number assigned by the owning table
    pub fn serial(&self) -> u64 {
        self.serial
    }
    /// Gets the id of the owning table
    pub fn table_id(&self) -> u8 {
        self.table_id
    }
    /// Gets the creation time
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Gets the time of the last use, initially the creation time
    pub fn used(&self) -> Instant {
        self.created + Duration::from_nanos(self.used.load(Ordering::Relaxed))
    }

    /// Gets the number of packets that hit this entry
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Gets the number of bytes that hit this entry
    pub fn byte_count(&self) -> u64 {
        self.byte_count.load(Ordering::Relaxed)
    }

    /// Gets how long the entry has been alive
    pub fn duration(&self, now: Instant) -> Duration {
        if now > self.created {
            now - self.created
        }
        else {
            Duration::from_secs(0)
        }
    }

    /// Marks the entry as used at `now`. The last use never moves backwards.
    pub fn touch(&self, now: Instant) {
        let nanos = self.duration(now).as_nanos() as u64;
        self.used.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Accounts one packet of `bytes` length matched on the packet path
    pub fn record_use(&self, now: Instant, bytes: u64) {
        self.add_counts(1, bytes);
        self.touch(now);
    }

    /// Accumulates counts harvested from somewhere else, e.g. hardware
    pub fn add_counts(&self, packets: u64, bytes: u64) {
        self.packet_count.fetch_add(packets, Ordering::Relaxed);
        self.byte_count.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Takes a snapshot of the actions
    pub fn actions(&self) -> Arc<ActionList> {
        self.actions.read()
    }

    /// Publishes a new action list. Readers holding the old list keep it
    /// alive until they are done with it.
    pub fn replace_actions(&self, actions: ActionList) -> Arc<ActionList> {
        self.actions.publish(actions)
    }

    /// Checks if the actions forward to `out_port` (`OFPP_NONE` for any)
    pub fn has_out_port(&self, out_port: u16) -> bool {
        self.actions.read().has_out_port(out_port)
    }

    /// Checks the entry's timeouts. The idle timeout is checked first.
    pub fn timeout_reason(&self, now: Instant) -> Option<OfpFlowRemovedReason> {
        if self.idle_timeout.has_elapsed(self.used(), now) {
            Some(OfpFlowRemovedReason::IdleTimeout)
        }
        else if self.hard_timeout.has_elapsed(self.created, now) {
            Some(OfpFlowRemovedReason::HardTimeout)
        }
        else {
            None
        }
    }

    /// Checks if `other` is the same rule, so one replaces the other on insert
    pub fn is_identical(&self, other: &FlowEntry) -> bool {
        self.priority == other.priority
            && self.key.wildcards().bits() == other.key.wildcards().bits()
            && ::flow::matches_symmetric(&self.key, &other.key)
    }

    /// Assigns the table's serial number. Only called before publishing.
    pub fn set_serial(&mut self, serial: u64) {
        self.serial = serial;
    }

    /// Assigns the owning table. Only called before publishing.
    pub fn set_table_id(&mut self, table_id: u8) {
        self.table_id = table_id;
    }

    /// Attaches table placement data. Only called before publishing.
    pub fn set_private<T: Any + Send + Sync>(&mut self, private: T) {
        self.private = Some(Box::new(private));
    }

    /// Gets the table placement data if it is of type `T`
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowEntry")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("serial", &self.serial)
            .field("table_id", &self.table_id)
            .field("actions", &self.actions)
            .field("idle_timeout", &self.idle_timeout)
            .field("hard_timeout", &self.hard_timeout)
            .field("emergency", &self.emergency)
            .finish()
    }
}

impl fmt::Display for FlowEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "priority={} {} actions={}",
            self.priority,
            self.key,
            self.actions.read()
        )
    }
}

impl Drop for FlowEntry {
    fn drop(&mut self) {
        trace!("reclaiming flow serial {} of table {}", self.serial, self.table_id);
    }
}
