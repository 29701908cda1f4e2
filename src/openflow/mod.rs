/*!
The OpenFlow 1.0 protocol definitions the datapath works with.

This is based on the openflow.h from OpenFlow Switch Specification 1.0.0.
The type names are changed to align with the Rust conventions.
Wire framing is done by the control channel, so only the parsed forms of
messages are defined here (see `messages`).
*/

pub mod error;
pub mod messages;

/* Copyright (c) 2008 The Board of Trustees of The Leland Stanford Junior University
 *
 * We are making the OpenFlow specification and associated documentation
 * (Software) available for public use and benefit with the expectation
 * that others will use, modify and enhance the Software and contribute
 * those enhancements back to the community. However, since we would
 * like to make the Software available for broadest use, with as few
 * restrictions as possible permission is hereby granted, free of
 * charge, to any person obtaining a copy of this Software to deal in
 * the Software under the copyrights without restriction, including
 * without limitation the rights to use, copy, modify, merge, publish,
 * distribute, sublicense, and/or sell copies of the Software, and to
 * permit persons to whom the Software is furnished to do so, subject to
 * the following conditions:
 *
 * The above copyright notice and this permission notice shall be
 * included in all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
 * EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
 * MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
 * NONINFRINGEMENT.  IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
 * BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
 * ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
 * CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 *
 * The name and trademarks of copyright holder(s) may NOT be used in
 * advertising or publicity pertaining to the Software or any
 * derivatives without specific, written prior permission.
 */

/* ## ----------------- ## */
/* ## Port numbering.   ## */
/* ## ----------------- ## */

/// Maximum number of physical switch ports.
pub const OFPP_MAX: u16 = 0xff00;
/// Send the packet out the input port. This virtual port must be explicitly
/// used in order to send back out of the input port.
pub const OFPP_IN_PORT: u16 = 0xfff8;
/// Perform actions in flow table.
/// NB: This can only be the destination port for packet-out messages.
pub const OFPP_TABLE: u16 = 0xfff9;
/// Process with normal L2/L3 switching.
pub const OFPP_NORMAL: u16 = 0xfffa;
/// All physical ports except input port and those disabled by STP.
pub const OFPP_FLOOD: u16 = 0xfffb;
/// All physical ports except input port.
pub const OFPP_ALL: u16 = 0xfffc;
/// Send to controller.
pub const OFPP_CONTROLLER: u16 = 0xfffd;
/// Local openflow "port".
pub const OFPP_LOCAL: u16 = 0xfffe;
/// Not associated with a physical port.
/// In delete and stats requests it means "any port".
pub const OFPP_NONE: u16 = 0xffff;

/// The VLAN id value used when no VLAN tag is present.
pub const OFP_VLAN_NONE: u16 = 0xffff;

/// Default number of bytes of a missed packet sent to the controller.
pub const OFP_DEFAULT_MISS_SEND_LEN: u16 = 128;

/* ## -------------------------- ## */
/* ## Flow match wildcards.      ## */
/* ## -------------------------- ## */

/// Switch input port.
pub const OFPFW_IN_PORT: u32 = 1 << 0;
/// VLAN id.
pub const OFPFW_DL_VLAN: u32 = 1 << 1;
/// Ethernet source address.
pub const OFPFW_DL_SRC: u32 = 1 << 2;
/// Ethernet destination address.
pub const OFPFW_DL_DST: u32 = 1 << 3;
/// Ethernet frame type.
pub const OFPFW_DL_TYPE: u32 = 1 << 4;
/// IP protocol.
pub const OFPFW_NW_PROTO: u32 = 1 << 5;
/// TCP/UDP source port.
pub const OFPFW_TP_SRC: u32 = 1 << 6;
/// TCP/UDP destination port.
pub const OFPFW_TP_DST: u32 = 1 << 7;

/// IP source address wildcard bit count. Use
/// `(wildcards & OFPFW_NW_SRC_MASK) >> OFPFW_NW_SRC_SHIFT` to get the
/// number of low bits to wildcard. 0 is exact match, 1 ignores the LSB,
/// 2 ignores the 2 least-significant bits, ..., 32 and higher wildcard
/// the entire field.
pub const OFPFW_NW_SRC_SHIFT: u32 = 8;
/// Width of the IP source wildcard bit count.
pub const OFPFW_NW_SRC_BITS: u32 = 6;
/// Mask of the IP source wildcard bit count.
pub const OFPFW_NW_SRC_MASK: u32 = ((1 << OFPFW_NW_SRC_BITS) - 1) << OFPFW_NW_SRC_SHIFT;
/// The IP source address is entirely wildcarded.
pub const OFPFW_NW_SRC_ALL: u32 = 32 << OFPFW_NW_SRC_SHIFT;

/// IP destination address wildcard bit count. Same format as source.
pub const OFPFW_NW_DST_SHIFT: u32 = 14;
/// Width of the IP destination wildcard bit count.
pub const OFPFW_NW_DST_BITS: u32 = 6;
/// Mask of the IP destination wildcard bit count.
pub const OFPFW_NW_DST_MASK: u32 = ((1 << OFPFW_NW_DST_BITS) - 1) << OFPFW_NW_DST_SHIFT;

/// VLAN priority.
pub const OFPFW_DL_VLAN_PCP: u32 = 1 << 20;
/// IP ToS (DSCP field, 6 bits).
pub const OFPFW_NW_TOS: u32 = 1 << 21;

/// Wildcard all fields.
pub const OFPFW_ALL: u32 = (1 << 22) - 1;

/* ## --------------------------- ## */
/* ## OpenFlow Flow Modification. ## */
/* ## --------------------------- ## */

/// Value used in `idle_timeout` and `hard_timeout` to indicate that the entry is permanent.
pub const OFP_FLOW_PERMANENT: u16 = 0;

/// By default, choose a priority in the middle.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/// Send flow removed message when flow expires or is deleted.
pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;
/// Check for overlapping entries first.
pub const OFPFF_CHECK_OVERLAP: u16 = 1 << 1;
/// Remark this is for emergency.
pub const OFPFF_EMERG: u16 = 1 << 2;

/// A reserved buffer ID to express that no buffer is assigned
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// Table id of the emergency table in stats requests.
pub const OFPTT_EMERG: u8 = 0xfe;
/// Wildcard table used for table config, flow stats and flow deletes.
pub const OFPTT_ALL: u8 = 0xff;

/// The command that is embedded in a flow mod message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfpFlowModCommand {
    /// New flow.
    Add = 0,
    /// Modify all matching flows.
    Modify = 1,
    /// Modify entry strictly matching wildcards and priority.
    ModifyStrict = 2,
    /// Delete all matching flows.
    Delete = 3,
    /// Delete entry strictly matching wildcards and priority.
    DeleteStrict = 4,
}

impl OfpFlowModCommand {
    /// Checks if the command matches with strict wildcards and priority
    pub fn is_strict(&self) -> bool {
        *self == OfpFlowModCommand::ModifyStrict || *self == OfpFlowModCommand::DeleteStrict
    }
}

/// Why a flow was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfpFlowRemovedReason {
    /// Flow idle time exceeded idle_timeout.
    IdleTimeout = 0,
    /// Time exceeded hard_timeout.
    HardTimeout = 1,
    /// Evicted by a DELETE flow mod.
    Delete = 2,
}

/// Why a packet is sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfpPacketInReason {
    /// No matching flow.
    NoMatch = 0,
}

/* ## ----------------- ## */
/* ## Statistics.       ## */
/* ## ----------------- ## */

/// Length of an `ofp_flow_stats` body without its actions.
pub const OFP_FLOW_STATS_LEN: usize = 88;
