/*!
OpenFlow error messages the datapath answers failed requests with.
*/

use flow::actions::ActionError;
use table;

use std::error;
use std::fmt;

/// Values for 'type' in `OfpErrorMsg`. These values are immutable: they will
/// not change in future versions of the protocol (although new values may be added).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpErrorType {
    /// Error in action description.
    BadAction = 2,
    /// Problem modifying flow entry.
    FlowModFailed = 3,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::BadAction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpBadActionCode {
    /// Problem validating output action.
    BadOutPort = 4,
    /// Bad action argument.
    BadArgument = 5,
}

/// `OfpErrorMsg` 'code' values for `OfpErrorType::FlowModFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfpFlowModFailedCode {
    /// Flow not added because of full tables.
    AllTablesFull = 0,
    /// Attempted to add overlapping flow with CHECK_OVERLAP flag set.
    Overlap = 1,
    /// Flow not added because of non-zero idle/hard timeout.
    BadEmergTimeout = 3,
    /// Unsupported action list - cannot process in the order specified.
    Unsupported = 5,
}

/// Error message (datapath -> controller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpErrorMsg {
    typ: OfpErrorType,
    code: u16,
}

impl OfpErrorMsg {
    /// Constructs a Bad Action error
    pub fn bad_action(code: OfpBadActionCode) -> OfpErrorMsg {
        OfpErrorMsg {
            typ: OfpErrorType::BadAction,
            code: code as u16,
        }
    }

    /// Constructs a Flow Mod Failed error
    pub fn flow_mod_failed(code: OfpFlowModFailedCode) -> OfpErrorMsg {
        OfpErrorMsg {
            typ: OfpErrorType::FlowModFailed,
            code: code as u16,
        }
    }

    pub fn typ(&self) -> OfpErrorType {
        self.typ
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Checks if this `OfpErrorMsg` describes all tables being full
    pub fn check_tables_full(&self) -> bool {
        self.typ == OfpErrorType::FlowModFailed && self.code == OfpFlowModFailedCode::AllTablesFull as u16
    }
}

impl From<table::Error> for OfpErrorMsg {
    fn from(e: table::Error) -> Self {
        let code = match e {
            table::Error::Unsupported => OfpFlowModFailedCode::Unsupported,
            table::Error::BadEmergencyTimeout => OfpFlowModFailedCode::BadEmergTimeout,
            table::Error::Full | table::Error::Collision | table::Error::DeviceUnavailable => {
                OfpFlowModFailedCode::AllTablesFull
            }
        };
        OfpErrorMsg::flow_mod_failed(code)
    }
}

impl From<ActionError> for OfpErrorMsg {
    fn from(e: ActionError) -> Self {
        match e {
            ActionError::BadOutPort(_) => OfpErrorMsg::bad_action(OfpBadActionCode::BadOutPort),
            ActionError::BadArgument => OfpErrorMsg::bad_action(OfpBadActionCode::BadArgument),
        }
    }
}

impl error::Error for OfpErrorMsg {
    fn description(&self) -> &str {
        "OpenFlow request failed"
    }
}

impl fmt::Display for OfpErrorMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpenFlow Error: {:?}, code({})", self.typ, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_errors() {
        let full = OfpErrorMsg::from(table::Error::Collision);
        assert!(full.check_tables_full());
        assert_eq!(OfpErrorType::FlowModFailed, full.typ());

        let emerg = OfpErrorMsg::from(table::Error::BadEmergencyTimeout);
        assert_eq!(OfpFlowModFailedCode::BadEmergTimeout as u16, emerg.code());
        assert!(!emerg.check_tables_full());

        let unsupported = OfpErrorMsg::from(table::Error::Unsupported);
        assert_eq!(OfpFlowModFailedCode::Unsupported as u16, unsupported.code());
        assert!(OfpErrorMsg::from(table::Error::DeviceUnavailable).check_tables_full());
    }

    #[test]
    fn action_errors() {
        let port = OfpErrorMsg::from(ActionError::BadOutPort(9));
        assert_eq!((OfpErrorType::BadAction, 4), (port.typ(), port.code()));
        assert_eq!("OpenFlow Error: BadAction, code(4)", port.to_string());
    }
}
