/*!
Flow actions and action lists.

An `ActionList` is immutable once built. Flow entries replace their list as a
whole, never edit it.
*/

use openflow::*;

use std::fmt;
use std::slice;

/// An OpenFlow 1.0 action in parsed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Output to switch port. `max_len` bytes are sent if the port is the controller.
    Output { port: u16, max_len: u16 },
    /// Set the 802.1q VLAN id.
    SetVlanVid(u16),
    /// Set the 802.1q priority.
    SetVlanPcp(u8),
    /// Strip the 802.1q header.
    StripVlan,
    /// Ethernet source address.
    SetDlSrc([u8; 6]),
    /// Ethernet destination address.
    SetDlDst([u8; 6]),
    /// IP source address.
    SetNwSrc(u32),
    /// IP destination address.
    SetNwDst(u32),
    /// IP ToS (DSCP field, 6 bits).
    SetNwTos(u8),
    /// TCP/UDP source port.
    SetTpSrc(u16),
    /// TCP/UDP destination port.
    SetTpDst(u16),
    /// Output to a queue of a port.
    Enqueue { port: u16, queue_id: u32 },
}

/// Why an action was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    /// The output port is not valid for a flow
    BadOutPort(u16),
    /// A set-field argument is out of range
    BadArgument,
}

impl Action {
    /// Shortcut for an output action without controller truncation
    pub fn output(port: u16) -> Action {
        Action::Output {
            port: port,
            max_len: 0,
        }
    }

    /// Length of the action on the wire, including padding to 64 bits.
    pub fn wire_len(&self) -> usize {
        match *self {
            Action::SetDlSrc(_) | Action::SetDlDst(_) | Action::Enqueue { .. } => 16,
            _ => 8,
        }
    }

    /// The port a packet leaves through, if this action forwards at all.
    pub fn out_port(&self) -> Option<u16> {
        match *self {
            Action::Output { port, .. } | Action::Enqueue { port, .. } => Some(port),
            _ => None,
        }
    }

    /// Checks whether the action rewrites a header field
    pub fn is_set_field(&self) -> bool {
        self.out_port().is_none()
    }

    fn validate(&self, n_ports: u16) -> Result<(), ActionError> {
        match *self {
            Action::Output { port, .. } => check_output_port(port, n_ports),
            Action::Enqueue { port, .. } => {
                if port == OFPP_IN_PORT {
                    Ok(())
                }
                else {
                    check_physical_port(port, n_ports)
                }
            }
            Action::SetVlanVid(vid) if vid > 0x0fff => Err(ActionError::BadArgument),
            Action::SetVlanPcp(pcp) if pcp > 7 => Err(ActionError::BadArgument),
            Action::SetNwTos(tos) if tos & 0x03 != 0 => Err(ActionError::BadArgument),
            _ => Ok(()),
        }
    }
}

fn check_physical_port(port: u16, n_ports: u16) -> Result<(), ActionError> {
    if port == 0 || port > n_ports {
        Err(ActionError::BadOutPort(port))
    }
    else {
        Ok(())
    }
}

fn check_output_port(port: u16, n_ports: u16) -> Result<(), ActionError> {
    match port {
        OFPP_IN_PORT | OFPP_NORMAL | OFPP_FLOOD | OFPP_ALL | OFPP_CONTROLLER | OFPP_LOCAL => Ok(()),
        // only meaningful for packet-out
        OFPP_TABLE | OFPP_NONE => Err(ActionError::BadOutPort(port)),
        p if p < OFPP_MAX => check_physical_port(p, n_ports),
        p => Err(ActionError::BadOutPort(p)),
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Action::Output { port, .. } => match port {
                OFPP_IN_PORT => write!(f, "output:in_port"),
                OFPP_FLOOD => write!(f, "flood"),
                OFPP_ALL => write!(f, "all"),
                OFPP_CONTROLLER => write!(f, "controller"),
                OFPP_LOCAL => write!(f, "local"),
                OFPP_NORMAL => write!(f, "normal"),
                p => write!(f, "output:{}", p),
            },
            Action::Enqueue { port, queue_id } => write!(f, "enqueue:{}:{}", port, queue_id),
            ref a => write!(f, "{:?}", a),
        }
    }
}

/// An immutable list of actions together with its wire length.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionList {
    actions: Vec<Action>,
    wire_len: usize,
}

impl ActionList {
    /// Constructs an `ActionList`. An empty list drops matching packets.
    pub fn new(actions: Vec<Action>) -> ActionList {
        let wire_len = actions.iter().map(Action::wire_len).sum();
        ActionList {
            actions: actions,
            wire_len: wire_len,
        }
    }

    /// Validates all actions against a switch with `n_ports` physical ports
    pub fn validate(&self, n_ports: u16) -> Result<(), ActionError> {
        for action in &self.actions {
            action.validate(n_ports)?;
        }
        Ok(())
    }

    /// Gets the accumulated wire length of all actions
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Checks if the list forwards to `out_port`.
    /// `OFPP_NONE` matches any list.
    pub fn has_out_port(&self, out_port: u16) -> bool {
        out_port == OFPP_NONE || self.actions.iter().any(|a| a.out_port() == Some(out_port))
    }

    /// Iterates over the actions
    pub fn iter(&self) -> slice::Iter<Action> {
        self.actions.iter()
    }

    /// Gets the number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Checks for a drop list
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<'a> IntoIterator for &'a ActionList {
    type Item = &'a Action;
    type IntoIter = slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}

impl fmt::Display for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "drop");
        }
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", action)?;
        }
        Ok(())
    }
}
