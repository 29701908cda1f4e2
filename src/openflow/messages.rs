/*!
The parsed forms of the OpenFlow 1.0 messages the datapath handles.

The control channel decodes the wire messages into these types and encodes
the replies, so matches are already `FlowKey`s and actions `ActionList`s.
*/

use flow::actions::ActionList;
use flow::entry::FlowEntry;
use flow::FlowKey;
use openflow::*;

use std::sync::Arc;
use std::time::Instant;

pub use table::TableStats;

/// Flow setup and teardown (controller -> datapath).
#[derive(Debug, Clone)]
pub struct FlowMod {
    /// Fields to match.
    pub key: FlowKey,
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    pub command: OfpFlowModCommand,
    /// Idle time before discarding (seconds).
    pub idle_timeout: u16,
    /// Max time before discarding (seconds).
    pub hard_timeout: u16,
    /// Priority level of flow entry.
    pub priority: u16,
    /// Buffered packet to apply to, or `OFP_NO_BUFFER`.
    /// Not meaningful for delete commands.
    pub buffer_id: u32,
    /// For delete commands, require matching entries to include this as an
    /// output port. A value of `OFPP_NONE` indicates no restriction.
    pub out_port: u16,
    /// Bitmap of `OFPFF_*` flags.
    pub flags: u16,
    pub actions: ActionList,
}

impl FlowMod {
    /// Constructs a flow mod with the OpenFlow defaults
    pub fn new(command: OfpFlowModCommand, key: FlowKey, priority: u16) -> FlowMod {
        FlowMod {
            key: key,
            cookie: 0,
            command: command,
            idle_timeout: OFP_FLOW_PERMANENT,
            hard_timeout: OFP_FLOW_PERMANENT,
            priority: priority,
            buffer_id: OFP_NO_BUFFER,
            out_port: OFPP_NONE,
            flags: 0,
            actions: ActionList::default(),
        }
    }

    /// Constructs an add command
    pub fn add(key: FlowKey, priority: u16, actions: ActionList) -> FlowMod {
        FlowMod {
            actions: actions,
            ..FlowMod::new(OfpFlowModCommand::Add, key, priority)
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.flags & OFPFF_EMERG != 0
    }

    pub fn checks_overlap(&self) -> bool {
        self.flags & OFPFF_CHECK_OVERLAP != 0
    }

    pub fn sends_flow_rem(&self) -> bool {
        self.flags & OFPFF_SEND_FLOW_REM != 0
    }
}

/// Flow removed (datapath -> controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRemoved {
    /// Description of fields.
    pub key: FlowKey,
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    /// Priority level of flow entry.
    pub priority: u16,
    pub reason: OfpFlowRemovedReason,
    /// Time flow was alive in seconds.
    pub duration_sec: u32,
    /// Time flow was alive in nanoseconds beyond `duration_sec`.
    pub duration_nsec: u32,
    /// Idle timeout from original flow mod.
    pub idle_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
}

impl FlowRemoved {
    pub fn new(flow: &FlowEntry, reason: OfpFlowRemovedReason, now: Instant) -> FlowRemoved {
        let duration = flow.duration(now);
        FlowRemoved {
            key: *flow.key(),
            cookie: flow.cookie(),
            priority: flow.priority(),
            reason: reason,
            duration_sec: duration.as_secs() as u32,
            duration_nsec: duration.subsec_nanos(),
            idle_timeout: flow.idle_timeout().as_secs(),
            packet_count: flow.packet_count(),
            byte_count: flow.byte_count(),
        }
    }
}

/// Body for a flow or aggregate stats request.
#[derive(Debug, Clone, Copy)]
pub struct FlowStatsRequest {
    /// Fields to match.
    pub key: FlowKey,
    /// ID of table to read (from `TableStats`), `OFPTT_ALL` for all normal
    /// tables or `OFPTT_EMERG` for the emergency table.
    pub table_id: u8,
    /// Require matching entries to include this as an output port.
    /// A value of `OFPP_NONE` indicates no restriction.
    pub out_port: u16,
}

impl FlowStatsRequest {
    /// Requests all flows of all normal tables
    pub fn all() -> FlowStatsRequest {
        FlowStatsRequest {
            key: FlowKey::any(),
            table_id: OFPTT_ALL,
            out_port: OFPP_NONE,
        }
    }
}

/// Body of a flow stats reply.
#[derive(Debug, Clone)]
pub struct FlowStats {
    /// ID of table flow came from.
    pub table_id: u8,
    /// Description of fields.
    pub key: FlowKey,
    /// Time flow has been alive in seconds.
    pub duration_sec: u32,
    /// Time flow has been alive in nanoseconds beyond `duration_sec`.
    pub duration_nsec: u32,
    /// Priority of the entry. Only meaningful
    /// when this is not an exact-match entry.
    pub priority: u16,
    /// Number of seconds idle before expiration.
    pub idle_timeout: u16,
    /// Number of seconds before expiration.
    pub hard_timeout: u16,
    /// Opaque controller-issued identifier.
    pub cookie: u64,
    /// Number of packets in flow.
    pub packet_count: u64,
    /// Number of bytes in flow.
    pub byte_count: u64,
    pub actions: Arc<ActionList>,
}

impl FlowStats {
    pub fn new(flow: &FlowEntry, now: Instant) -> FlowStats {
        let duration = flow.duration(now);
        FlowStats {
            table_id: flow.table_id(),
            key: *flow.key(),
            duration_sec: duration.as_secs() as u32,
            duration_nsec: duration.subsec_nanos(),
            priority: flow.priority(),
            idle_timeout: flow.idle_timeout().as_secs(),
            hard_timeout: flow.hard_timeout().as_secs(),
            cookie: flow.cookie(),
            packet_count: flow.packet_count(),
            byte_count: flow.byte_count(),
            actions: flow.actions(),
        }
    }

    /// Gets the length of this body on the wire
    pub fn wire_len(&self) -> usize {
        OFP_FLOW_STATS_LEN + self.actions.wire_len()
    }
}

/// Body of an aggregate stats reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Number of packets in flows.
    pub packet_count: u64,
    /// Number of bytes in flows.
    pub byte_count: u64,
    /// Number of flows.
    pub flow_count: u32,
}

/// Body of a port stats reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub port_no: u16,
    /// Number of received packets.
    pub rx_packets: u64,
    /// Number of transmitted packets.
    pub tx_packets: u64,
    /// Number of received bytes.
    pub rx_bytes: u64,
    /// Number of transmitted bytes.
    pub tx_bytes: u64,
    /// Number of packets dropped by RX.
    pub rx_dropped: u64,
    /// Number of packets dropped by TX.
    pub tx_dropped: u64,
}
