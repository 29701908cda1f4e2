/*!
Encoding of flow keys and actions into hardware rows.

The entry row is the canonical key image as eight big-endian words. The mask
row has the same layout with every ignored bit set. Hardware flows always
wildcard the ToS byte, so exact rows hold zero there and the device skips it. The action row is:

| Word | Content                                       |
|------|-----------------------------------------------|
| 0    | forward port bitmask << 16, rewrite flags     |
| 1    | vlan id << 16, vlan pcp << 8, nw tos          |
| 2..5 | dl src (6 bytes), dl dst (6 bytes)            |
| 5    | nw src                                        |
| 6    | nw dst                                        |
| 7    | tp src << 16, tp dst                          |
| 8..10| reserved                                      |
*/

use flow::actions::{Action, ActionList};
use flow::{FlowKey, ETH_TYPE_IP, KEY_IMAGE_LEN};
use openflow::*;
use table::Error;

use byteorder::{ByteOrder, NetworkEndian};

pub const ENTRY_WORDS: usize = KEY_IMAGE_LEN / 4;
pub const ACTION_WORDS: usize = 10;

/// Number of physical ports
pub const NF2_PORTS: u16 = 4;
const ALL_PORTS: u16 = (1 << NF2_PORTS) - 1;

pub const FLAG_SET_VLAN_VID: u16 = 1 << 0;
pub const FLAG_SET_VLAN_PCP: u16 = 1 << 1;
pub const FLAG_STRIP_VLAN: u16 = 1 << 2;
pub const FLAG_SET_DL_SRC: u16 = 1 << 3;
pub const FLAG_SET_DL_DST: u16 = 1 << 4;
pub const FLAG_SET_NW_SRC: u16 = 1 << 5;
pub const FLAG_SET_NW_DST: u16 = 1 << 6;
pub const FLAG_SET_NW_TOS: u16 = 1 << 7;
pub const FLAG_SET_TP_SRC: u16 = 1 << 8;
pub const FLAG_SET_TP_DST: u16 = 1 << 9;

/// Forwarding and rewrites of one hardware slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HwAction {
    pub forward: u16,
    pub flags: u16,
    pub vlan_vid: u16,
    pub vlan_pcp: u8,
    pub nw_tos: u8,
    pub dl_src: [u8; 6],
    pub dl_dst: [u8; 6],
    pub nw_src: u32,
    pub nw_dst: u32,
    pub tp_src: u16,
    pub tp_dst: u16,
}

fn is_physical(port: u16) -> bool {
    port >= 1 && port <= NF2_PORTS
}

/// Maps an OpenFlow port to its bit in the forward bitmask
pub fn port_bit(port: u16) -> u16 {
    assert!(is_physical(port));
    1 << (port - 1)
}

/// Checks that the hardware can match `key`
pub fn key_supported(key: &FlowKey) -> bool {
    let w = key.wildcards();
    let tos = w.has(OFPFW_NW_TOS) || key.flow().dl_type != ETH_TYPE_IP || w.has(OFPFW_DL_TYPE);
    let in_port = w.has(OFPFW_IN_PORT) || is_physical(key.flow().in_port);
    tos && w.has(OFPFW_DL_VLAN_PCP) && in_port
}

/// Checks that every field the hardware matches on is exact
pub fn is_hw_exact(key: &FlowKey) -> bool {
    key.wildcards().bits() & !(OFPFW_NW_TOS | OFPFW_DL_VLAN_PCP) == 0
}

/// Checks if `actions` flood with a wildcarded input port, which takes one
/// slot per physical input port
pub fn needs_port_expansion(key: &FlowKey, actions: &ActionList) -> bool {
    key.wildcards().has(OFPFW_IN_PORT)
        && actions
            .iter()
            .any(|a| a.out_port() == Some(OFPP_ALL) || a.out_port() == Some(OFPP_FLOOD))
}

/// Translates `actions` for a slot that matches packets from `in_port`
/// (`None` if wildcarded).
pub fn translate(actions: &ActionList, in_port: Option<u16>) -> Result<HwAction, Error> {
    if actions.is_empty() {
        return Err(Error::Unsupported);
    }
    let mut hw = HwAction::default();
    let mut has_output = false;
    for action in actions {
        if has_output && action.is_set_field() {
            return Err(Error::Unsupported);
        }
        match *action {
            Action::Output { port, .. } => {
                has_output = true;
                hw.forward |= match (port, in_port) {
                    (p, _) if is_physical(p) => port_bit(p),
                    (OFPP_IN_PORT, Some(p)) => port_bit(p),
                    (OFPP_ALL, Some(p)) | (OFPP_FLOOD, Some(p)) => ALL_PORTS & !port_bit(p),
                    _ => return Err(Error::Unsupported),
                };
            }
            Action::SetVlanVid(vid) => {
                hw.flags |= FLAG_SET_VLAN_VID;
                hw.vlan_vid = vid;
            }
            Action::SetVlanPcp(pcp) => {
                hw.flags |= FLAG_SET_VLAN_PCP;
                hw.vlan_pcp = pcp;
            }
            Action::StripVlan => hw.flags |= FLAG_STRIP_VLAN,
            Action::SetDlSrc(mac) => {
                hw.flags |= FLAG_SET_DL_SRC;
                hw.dl_src = mac;
            }
            Action::SetDlDst(mac) => {
                hw.flags |= FLAG_SET_DL_DST;
                hw.dl_dst = mac;
            }
            Action::SetNwSrc(ip) => {
                hw.flags |= FLAG_SET_NW_SRC;
                hw.nw_src = ip;
            }
            Action::SetNwDst(ip) => {
                hw.flags |= FLAG_SET_NW_DST;
                hw.nw_dst = ip;
            }
            Action::SetNwTos(tos) => {
                hw.flags |= FLAG_SET_NW_TOS;
                hw.nw_tos = tos;
            }
            Action::SetTpSrc(port) => {
                hw.flags |= FLAG_SET_TP_SRC;
                hw.tp_src = port;
            }
            Action::SetTpDst(port) => {
                hw.flags |= FLAG_SET_TP_DST;
                hw.tp_dst = port;
            }
            Action::Enqueue { .. } => return Err(Error::Unsupported),
        }
    }
    Ok(hw)
}

fn words(image: &[u8; KEY_IMAGE_LEN]) -> Vec<u32> {
    image.chunks(4).map(NetworkEndian::read_u32).collect()
}

/// Encodes the entry row, with the input port replaced if given
pub fn entry_row(key: &FlowKey, in_port: Option<u16>) -> Vec<u32> {
    let mut image = key.image();
    if let Some(port) = in_port {
        NetworkEndian::write_u16(&mut image[0..2], port);
    }
    words(&image)
}

/// Encodes the mask row, with the input port compared if `in_port` is given
pub fn mask_row(key: &FlowKey, in_port: Option<u16>) -> Vec<u32> {
    let w = key.wildcards();
    let mut image = [0; KEY_IMAGE_LEN];
    {
        let mut ignore = |flag: u32, range: ::std::ops::Range<usize>| {
            if w.has(flag) {
                for byte in &mut image[range] {
                    *byte = 0xff;
                }
            }
        };
        if in_port.is_none() {
            ignore(OFPFW_IN_PORT, 0..2);
        }
        ignore(OFPFW_DL_VLAN, 2..4);
        ignore(OFPFW_DL_SRC, 4..10);
        ignore(OFPFW_DL_DST, 10..16);
        ignore(OFPFW_DL_TYPE, 16..18);
        ignore(OFPFW_NW_PROTO, 26..27);
        ignore(OFPFW_NW_TOS, 27..28);
        ignore(OFPFW_TP_SRC, 28..30);
        ignore(OFPFW_TP_DST, 30..32);
    }
    NetworkEndian::write_u32(&mut image[18..22], !w.nw_src_mask());
    NetworkEndian::write_u32(&mut image[22..26], !w.nw_dst_mask());
    words(&image)
}

/// Encodes the action row
pub fn action_row(hw: &HwAction) -> Vec<u32> {
    let mut macs = [0; 12];
    macs[0..6].copy_from_slice(&hw.dl_src);
    macs[6..12].copy_from_slice(&hw.dl_dst);
    let mut row = vec![
        u32::from(hw.forward) << 16 | u32::from(hw.flags),
        u32::from(hw.vlan_vid) << 16 | u32::from(hw.vlan_pcp) << 8 | u32::from(hw.nw_tos),
    ];
    row.extend(macs.chunks(4).map(NetworkEndian::read_u32));
    row.push(hw.nw_src);
    row.push(hw.nw_dst);
    row.push(u32::from(hw.tp_src) << 16 | u32::from(hw.tp_dst));
    row.extend_from_slice(&[0, 0]);
    row
}
