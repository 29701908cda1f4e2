/*!
Flow keys and the wildcard comparison algebra.

A `FlowKey` is a canonicalized set of packet header fields plus an
OpenFlow 1.0 wildcard bitmask. Rules and packets share the same
representation: a packet key simply has no wildcards.

Three comparisons are provided and they are deliberately distinct:

* `matches_rule_wildcards` honors only the rule's wildcards (packet lookup),
* `matches_symmetric` honors the union of both sides' wildcards (rule overlap,
  stats queries),
* `matches_strict` additionally requires identical wildcards (strict
  modify/delete).
*/

pub mod actions;
pub mod digest;
pub mod entry;

use byteorder::{ByteOrder, NetworkEndian};
use openflow::*;

use std::fmt;

/// Ethernet type of IPv4.
pub const ETH_TYPE_IP: u16 = 0x0800;
/// Ethernet type of ARP.
pub const ETH_TYPE_ARP: u16 = 0x0806;

/// IP protocol number of ICMP.
pub const IP_PROTO_ICMP: u8 = 1;
/// IP protocol number of TCP.
pub const IP_PROTO_TCP: u8 = 6;
/// IP protocol number of UDP.
pub const IP_PROTO_UDP: u8 = 17;

/// Length of the canonical byte image of a flow key.
pub const KEY_IMAGE_LEN: usize = 32;

const OFPFW_TP: u32 = OFPFW_TP_SRC | OFPFW_TP_DST;
const OFPFW_NW: u32 = OFPFW_NW_TOS | OFPFW_NW_PROTO | OFPFW_NW_SRC_MASK | OFPFW_NW_DST_MASK;

/// The header fields of a packet, as extracted by the packet I/O layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flow {
    /// Input switch port.
    pub in_port: u16,
    /// Input VLAN id, `OFP_VLAN_NONE` if untagged.
    pub dl_vlan: u16,
    /// Input VLAN priority.
    pub dl_vlan_pcp: u8,
    /// Ethernet source address.
    pub dl_src: [u8; 6],
    /// Ethernet destination address.
    pub dl_dst: [u8; 6],
    /// Ethernet frame type.
    pub dl_type: u16,
    /// IP ToS (DSCP field, 6 bits).
    pub nw_tos: u8,
    /// IP protocol or lower 8 bits of ARP opcode.
    pub nw_proto: u8,
    /// IP source address.
    pub nw_src: u32,
    /// IP destination address.
    pub nw_dst: u32,
    /// TCP/UDP source port or ICMP type.
    pub tp_src: u16,
    /// TCP/UDP destination port or ICMP code.
    pub tp_dst: u16,
}

/// Converts a prefix-wildcard width into an address mask.
/// Widths of 32 or more wildcard the whole address.
pub fn make_nw_mask(n_wild_bits: u32) -> u32 {
    let n = n_wild_bits & ((1 << OFPFW_NW_SRC_BITS) - 1);
    if n < 32 {
        !((1u32 << n) - 1)
    }
    else {
        0
    }
}

/// Clamps the two IP wildcard widths of a raw bitmask to 32.
fn clamp_nw_widths(bits: u32) -> u32 {
    let src = ((bits & OFPFW_NW_SRC_MASK) >> OFPFW_NW_SRC_SHIFT).min(32);
    let dst = ((bits & OFPFW_NW_DST_MASK) >> OFPFW_NW_DST_SHIFT).min(32);
    (bits & !(OFPFW_NW_SRC_MASK | OFPFW_NW_DST_MASK))
        | (src << OFPFW_NW_SRC_SHIFT)
        | (dst << OFPFW_NW_DST_SHIFT)
}

/// A wildcard bitmask with the precomputed IP prefix masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Wildcards {
    bits: u32,
    nw_src_mask: u32,
    nw_dst_mask: u32,
}

impl Wildcards {
    /// Constructs wildcards from an OpenFlow 1.0 bitmask.
    pub fn new(bits: u32) -> Wildcards {
        let bits = clamp_nw_widths(bits & OFPFW_ALL);
        Wildcards {
            bits: bits,
            nw_src_mask: make_nw_mask(bits >> OFPFW_NW_SRC_SHIFT),
            nw_dst_mask: make_nw_mask(bits >> OFPFW_NW_DST_SHIFT),
        }
    }

    /// No field is wildcarded.
    pub fn exact() -> Wildcards {
        Wildcards::new(0)
    }

    /// Every field is wildcarded.
    pub fn all() -> Wildcards {
        Wildcards::new(OFPFW_ALL)
    }

    /// Gets the raw bitmask
    pub fn bits(&self) -> u32 {
        self.bits
    }
    /// Gets the IP source mask, bits set must match
    pub fn nw_src_mask(&self) -> u32 {
        self.nw_src_mask
    }
    /// Gets the IP destination mask, bits set must match
    pub fn nw_dst_mask(&self) -> u32 {
        self.nw_dst_mask
    }

    /// Checks if all of `flags` are wildcarded
    pub fn has(&self, flags: u32) -> bool {
        self.bits & flags == flags
    }

    /// Number of wildcarded low bits of the IP source address
    pub fn nw_src_bits(&self) -> u32 {
        (self.bits & OFPFW_NW_SRC_MASK) >> OFPFW_NW_SRC_SHIFT
    }
    /// Number of wildcarded low bits of the IP destination address
    pub fn nw_dst_bits(&self) -> u32 {
        (self.bits & OFPFW_NW_DST_MASK) >> OFPFW_NW_DST_SHIFT
    }

    fn set(&mut self, flags: u32) {
        *self = Wildcards::new(self.bits | flags);
    }

    fn clear(&mut self, flags: u32) {
        *self = Wildcards::new(self.bits & !flags);
    }
}

/// A canonicalized flow match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    flow: Flow,
    wildcards: Wildcards,
}

impl FlowKey {
    /// Builds a rule key from header fields and an OpenFlow 1.0 wildcard bitmask.
    ///
    /// Irrelevant layers are canonicalized: they are wildcarded if the layer
    /// below is, and made exact-match zero if the layer below says they are
    /// undefined. Wildcarded fields are zeroed so equal rules compare equal
    /// byte by byte.
    pub fn new(fields: Flow, wildcard_bits: u32) -> FlowKey {
        let mut w = Wildcards::new(wildcard_bits);
        let mut flow = Flow {
            in_port: fields.in_port,
            dl_vlan: fields.dl_vlan,
            dl_vlan_pcp: fields.dl_vlan_pcp,
            dl_src: fields.dl_src,
            dl_dst: fields.dl_dst,
            dl_type: fields.dl_type,
            ..Flow::default()
        };

        if w.has(OFPFW_DL_TYPE) {
            w.set(OFPFW_NW | OFPFW_TP);
        }
        else if fields.dl_type == ETH_TYPE_IP {
            flow.nw_tos = fields.nw_tos & 0xfc;
            flow.nw_proto = fields.nw_proto;
            flow.nw_src = fields.nw_src;
            flow.nw_dst = fields.nw_dst;

            if w.has(OFPFW_NW_PROTO) {
                w.set(OFPFW_TP);
            }
            else if fields.nw_proto == IP_PROTO_TCP
                || fields.nw_proto == IP_PROTO_UDP
                || fields.nw_proto == IP_PROTO_ICMP
            {
                flow.tp_src = fields.tp_src;
                flow.tp_dst = fields.tp_dst;
            }
            else {
                // undefined transport layer: exact zero
                w.clear(OFPFW_TP);
            }
        }
        else if fields.dl_type == ETH_TYPE_ARP {
            flow.nw_proto = fields.nw_proto;
            flow.nw_src = fields.nw_src;
            flow.nw_dst = fields.nw_dst;
            w.clear(OFPFW_NW_TOS | OFPFW_TP);
        }
        else {
            w.clear(OFPFW_NW | OFPFW_TP);
        }

        FlowKey::zero_wildcarded(&mut flow, &w);
        FlowKey {
            flow: flow,
            wildcards: w,
        }
    }

    /// Builds the key of a received packet: no wildcards, undefined layers zeroed.
    pub fn from_packet(fields: &Flow) -> FlowKey {
        FlowKey::new(*fields, 0)
    }

    /// A key that matches every packet.
    pub fn any() -> FlowKey {
        FlowKey::new(Flow::default(), OFPFW_ALL)
    }

    fn zero_wildcarded(flow: &mut Flow, w: &Wildcards) {
        if w.has(OFPFW_IN_PORT) {
            flow.in_port = 0;
        }
        if w.has(OFPFW_DL_VLAN) {
            flow.dl_vlan = 0;
        }
        if w.has(OFPFW_DL_VLAN_PCP) {
            flow.dl_vlan_pcp = 0;
        }
        if w.has(OFPFW_DL_SRC) {
            flow.dl_src = [0; 6];
        }
        if w.has(OFPFW_DL_DST) {
            flow.dl_dst = [0; 6];
        }
        if w.has(OFPFW_DL_TYPE) {
            flow.dl_type = 0;
        }
        if w.has(OFPFW_NW_TOS) {
            flow.nw_tos = 0;
        }
        if w.has(OFPFW_NW_PROTO) {
            flow.nw_proto = 0;
        }
        if w.has(OFPFW_TP_SRC) {
            flow.tp_src = 0;
        }
        if w.has(OFPFW_TP_DST) {
            flow.tp_dst = 0;
        }
        flow.nw_src &= w.nw_src_mask();
        flow.nw_dst &= w.nw_dst_mask();
    }

    /// Gets the header fields
    pub fn flow(&self) -> &Flow {
        &self.flow
    }
    /// Gets the wildcards
    pub fn wildcards(&self) -> &Wildcards {
        &self.wildcards
    }

    /// Checks that no field at all is wildcarded
    pub fn is_exact(&self) -> bool {
        self.wildcards.bits() == 0
    }

    /// Writes the 32 byte canonical image in network byte order.
    /// Hash digests and hardware entry rows are computed from it.
    /// The VLAN PCP has no place in the image, digests add it separately.
    pub fn image(&self) -> [u8; KEY_IMAGE_LEN] {
        let f = &self.flow;
        let mut image = [0; KEY_IMAGE_LEN];
        NetworkEndian::write_u16(&mut image[0..2], f.in_port);
        NetworkEndian::write_u16(&mut image[2..4], f.dl_vlan);
        image[4..10].copy_from_slice(&f.dl_src);
        image[10..16].copy_from_slice(&f.dl_dst);
        NetworkEndian::write_u16(&mut image[16..18], f.dl_type);
        NetworkEndian::write_u32(&mut image[18..22], f.nw_src);
        NetworkEndian::write_u32(&mut image[22..26], f.nw_dst);
        image[26] = f.nw_proto;
        image[27] = f.nw_tos;
        NetworkEndian::write_u16(&mut image[28..30], f.tp_src);
        NetworkEndian::write_u16(&mut image[30..32], f.tp_dst);
        image
    }
}

impl Default for FlowKey {
    fn default() -> Self {
        FlowKey::any()
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let w = &self.wildcards;
        let fl = &self.flow;
        write!(f, "wildcards={:#x}", w.bits())?;
        if !w.has(OFPFW_IN_PORT) {
            write!(f, " in_port={}", fl.in_port)?;
        }
        if !w.has(OFPFW_DL_VLAN) {
            write!(f, " dl_vlan={:#x}", fl.dl_vlan)?;
        }
        if !w.has(OFPFW_DL_TYPE) {
            write!(f, " dl_type={:#06x}", fl.dl_type)?;
        }
        if w.nw_src_mask() != 0 {
            write!(f, " nw_src={}/{}", ip_to_string(fl.nw_src), 32 - w.nw_src_bits())?;
        }
        if w.nw_dst_mask() != 0 {
            write!(f, " nw_dst={}/{}", ip_to_string(fl.nw_dst), 32 - w.nw_dst_bits())?;
        }
        if !w.has(OFPFW_NW_PROTO) {
            write!(f, " nw_proto={}", fl.nw_proto)?;
        }
        if !w.has(OFPFW_TP_SRC) {
            write!(f, " tp_src={}", fl.tp_src)?;
        }
        if !w.has(OFPFW_TP_DST) {
            write!(f, " tp_dst={}", fl.tp_dst)?;
        }
        Ok(())
    }
}

fn ip_to_string(ip: u32) -> String {
    format!("{}.{}.{}.{}", ip >> 24, (ip >> 16) & 0xff, (ip >> 8) & 0xff, ip & 0xff)
}

/// Field by field comparison of `a` and `b` under wildcard bitmask `w`
/// and the given IP prefix masks.
fn fields_match(a: &Flow, b: &Flow, w: u32, src_mask: u32, dst_mask: u32) -> bool {
    (w & OFPFW_IN_PORT != 0 || a.in_port == b.in_port)
        && (w & OFPFW_DL_VLAN != 0 || a.dl_vlan == b.dl_vlan)
        && (w & OFPFW_DL_VLAN_PCP != 0 || a.dl_vlan_pcp == b.dl_vlan_pcp)
        && (w & OFPFW_DL_SRC != 0 || a.dl_src == b.dl_src)
        && (w & OFPFW_DL_DST != 0 || a.dl_dst == b.dl_dst)
        && (w & OFPFW_DL_TYPE != 0 || a.dl_type == b.dl_type)
        && (a.nw_src ^ b.nw_src) & src_mask == 0
        && (a.nw_dst ^ b.nw_dst) & dst_mask == 0
        && (w & OFPFW_NW_PROTO != 0 || a.nw_proto == b.nw_proto)
        && (w & OFPFW_NW_TOS != 0 || a.nw_tos == b.nw_tos)
        && (w & OFPFW_TP_SRC != 0 || a.tp_src == b.tp_src)
        && (w & OFPFW_TP_DST != 0 || a.tp_dst == b.tp_dst)
}

/// Compares `candidate` against `rule` honoring only the rule's wildcards.
pub fn matches_rule_wildcards(candidate: &FlowKey, rule: &FlowKey) -> bool {
    let w = &rule.wildcards;
    fields_match(
        &candidate.flow,
        &rule.flow,
        w.bits(),
        w.nw_src_mask(),
        w.nw_dst_mask(),
    )
}

/// Compares two rules honoring the wildcards of both.
pub fn matches_symmetric(a: &FlowKey, b: &FlowKey) -> bool {
    let (wa, wb) = (&a.wildcards, &b.wildcards);
    fields_match(
        &a.flow,
        &b.flow,
        wa.bits() | wb.bits(),
        wa.nw_src_mask() & wb.nw_src_mask(),
        wa.nw_dst_mask() & wb.nw_dst_mask(),
    )
}

/// Like `matches_symmetric`, but if `strict` the wildcards must be identical.
pub fn matches_strict(a: &FlowKey, b: &FlowKey, strict: bool) -> bool {
    if strict && a.wildcards.bits() != b.wildcards.bits() {
        return false;
    }
    matches_symmetric(a, b)
}
