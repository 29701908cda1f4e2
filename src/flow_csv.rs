/*!
A CSV parser for files with static flows.

# Syntax

The CSV is separated by semicolons.
Empty lines and lines beginning with `#` are ignored.
You can place a `*` if you want to express a wildcard.
Whitespaces surrounding the values are ignored.

Each line describes one flow by its match, priority and actions, e.g.

```csv
# in_port;src_cidr    ;src_port;dst_cidr     ;dst_port;proto;priority;actions
1        ;192.0.2.0/24;*       ;192.0.2.10/32;80      ;TCP  ;100     ;output:2
*        ;*           ;*       ;*            ;*       ;*    ;0       ;controller
```

You have to use IPv4 CIDR suffix notation.
The IP Protocol (proto) value can be ICMP, TCP, UDP or `*`.
If it is `*` or ICMP, the port numbers have to be `*`.
The actions are separated by commas and can be `output:<port>`, `in_port`,
`all`, `flood` and `controller`. A single `drop` is an empty action list.
*/

use flow::actions::{Action, ActionList};
use flow::{Flow, FlowKey, ETH_TYPE_IP};
use openflow::messages::FlowMod;
use openflow::*;

use ipnetwork::{IpNetworkError, Ipv4Network};

use notify;
use notify::{DebouncedEvent, RecursiveMode, Watcher};

use std::collections::HashSet;
use std::convert::From;
use std::error;
use std::fmt;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::str::FromStr;
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

/// The polling frequency
const NOTIFY_SECONDS: u64 = 1;

/// The CSV delimiter.
const DELIMITER: char = ';';

/// The delimiter of actions.
const ACTION_DELIMITER: char = ',';

/// The char introducing a line comment.
const COMMENT: char = '#';

const VALUE_COUNT: usize = 8;

/// Represents all errors that can occur while
/// parsing a CSV file with static flows
#[derive(Debug, PartialEq)]
pub enum Error {
    /// A line does not have exactly 8 values
    ValueCount(String),
    /// A line does have an empty value
    EmptyValue(String),
    /// An invalid CIDR form occured
    InvalidCidr(IpNetworkError, String),
    /// A switch, UDP or TCP port number is invalid
    InvalidPortNumber(String),
    /// An IP protocol is referenced that is not supported
    InvalidProtocol(String),
    /// A priority is not a 16 bit number
    InvalidPriority(String),
    /// An action is unknown or malformed
    InvalidAction(String),
    /// A line contains at least one port
    /// number with protocol being a wildcard
    PortWithProtocolWildcard(String),
    /// A line contains at least one port number with ICMP
    PortWithIcmp(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ValueCount(ref s) => {
                write!(f, "The following line does not have exactly {} values: {}", VALUE_COUNT, s)
            }
            Error::EmptyValue(ref s) => {
                write!(f, "The following line has an empty value: {}", s)
            }
            Error::InvalidCidr(ref e, ref s) => {
                write!(f, "{} -- Violating line: {}", e, s)
            }
            Error::InvalidPortNumber(ref p) => {
                write!(f, "{} is an invalid port number.", p)
            }
            Error::InvalidProtocol(ref p) => {
                write!(f, "{} is an invalid protocol.", p)
            }
            Error::InvalidPriority(ref p) => {
                write!(f, "{} is an invalid priority.", p)
            }
            Error::InvalidAction(ref a) => {
                write!(f, "{} is an invalid action list.", a)
            }
            Error::PortWithProtocolWildcard(ref s) => {
                write!(f, "The following line contains at least one port number with protocol being a wildcard: {}", s)
            }
            Error::PortWithIcmp(ref s) => {
                write!(f, "The following line contains at least one port number with ICMP: {}", s)
            }
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "flow_csv parser error"
    }
}

/// Each of the IP protocols that a static flow can match
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy)]
pub enum IpProtocol {
    /// Internet Control Message Protocol
    Icmp = 1,
    /// Transmission Control Protocol
    Tcp = 6,
    /// User Datagram Protocol
    Udp = 17,
}

/// Represents one static flow.
/// A match wildcard is represented as None value.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct FlowRecord {
    in_port: Option<u16>,
    src_ip: Option<Ipv4Network>,
    src_port: Option<u16>,
    dst_ip: Option<Ipv4Network>,
    dst_port: Option<u16>,
    proto: Option<IpProtocol>,
    priority: u16,
    actions: Vec<Action>,
}

/// Sets the wildcard bit count of an IP address field
fn nw_wildcards(bits: u32, mask: u32, shift: u32, net: Option<Ipv4Network>) -> u32 {
    match net {
        Some(net) => (bits & !mask) | (u32::from(32 - net.prefix()) << shift),
        None => bits,
    }
}

impl FlowRecord {
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Builds the match of this flow
    pub fn key(&self) -> FlowKey {
        let mut flow = Flow::default();
        let mut wildcards = OFPFW_ALL;

        if let Some(port) = self.in_port {
            flow.in_port = port;
            wildcards &= !OFPFW_IN_PORT;
        }
        let ip = self.src_ip.is_some() || self.dst_ip.is_some() || self.proto.is_some();
        if ip {
            flow.dl_type = ETH_TYPE_IP;
            wildcards &= !OFPFW_DL_TYPE;
        }
        if let Some(net) = self.src_ip {
            flow.nw_src = u32::from(net.network());
        }
        wildcards = nw_wildcards(wildcards, OFPFW_NW_SRC_MASK, OFPFW_NW_SRC_SHIFT, self.src_ip);
        if let Some(net) = self.dst_ip {
            flow.nw_dst = u32::from(net.network());
        }
        wildcards = nw_wildcards(wildcards, OFPFW_NW_DST_MASK, OFPFW_NW_DST_SHIFT, self.dst_ip);
        if let Some(proto) = self.proto {
            flow.nw_proto = proto as u8;
            wildcards &= !OFPFW_NW_PROTO;
        }
        if let Some(port) = self.src_port {
            flow.tp_src = port;
            wildcards &= !OFPFW_TP_SRC;
        }
        if let Some(port) = self.dst_port {
            flow.tp_dst = port;
            wildcards &= !OFPFW_TP_DST;
        }
        FlowKey::new(flow, wildcards)
    }

    /// Builds the flow mod that installs this flow.
    /// Static flows report their removal.
    pub fn add(&self) -> FlowMod {
        FlowMod {
            flags: OFPFF_SEND_FLOW_REM,
            ..FlowMod::add(self.key(), self.priority, ActionList::new(self.actions.clone()))
        }
    }

    /// Builds the flow mod that removes exactly this flow
    pub fn delete(&self) -> FlowMod {
        FlowMod::new(OfpFlowModCommand::DeleteStrict, self.key(), self.priority)
    }
}

/// Computes the flow mods that turn the `installed` flows into the `wanted`
/// ones. Deletes come first so a changed flow is replaced.
pub fn flow_mods(installed: &HashSet<FlowRecord>, wanted: &HashSet<FlowRecord>) -> Vec<FlowMod> {
    let deletes = installed.difference(wanted).map(FlowRecord::delete);
    let adds = wanted.difference(installed).map(FlowRecord::add);
    deletes.chain(adds).collect()
}

fn parse_port_number(ps: &str) -> Result<u16, Error> {
    ps.parse()
        .map_err(|_| Error::InvalidPortNumber(ps.to_string()))
}

fn parse_switch_port(ps: &str) -> Result<u16, Error> {
    match parse_port_number(ps)? {
        0 => Err(Error::InvalidPortNumber(ps.to_string())),
        p if p >= OFPP_MAX => Err(Error::InvalidPortNumber(ps.to_string())),
        p => Ok(p),
    }
}

fn parse_protocol(ps: &str) -> Result<IpProtocol, Error> {
    match ps {
        "ICMP" | "icmp" => Ok(IpProtocol::Icmp),
        "UDP" | "udp" => Ok(IpProtocol::Udp),
        "TCP" | "tcp" => Ok(IpProtocol::Tcp),
        _ => Err(Error::InvalidProtocol(ps.to_string())),
    }
}

fn parse_action(action: &str) -> Result<Action, Error> {
    let invalid = || Error::InvalidAction(action.to_string());
    match action {
        "in_port" => Ok(Action::output(OFPP_IN_PORT)),
        "all" => Ok(Action::output(OFPP_ALL)),
        "flood" => Ok(Action::output(OFPP_FLOOD)),
        "controller" => Ok(Action::Output {
            port: OFPP_CONTROLLER,
            max_len: OFP_DEFAULT_MISS_SEND_LEN,
        }),
        a if a.starts_with("output:") => {
            let port = parse_switch_port(a["output:".len()..].trim()).map_err(|_| invalid())?;
            Ok(Action::output(port))
        }
        _ => Err(invalid()),
    }
}

fn parse_actions(actions: &str) -> Result<Vec<Action>, Error> {
    if actions == "drop" {
        return Ok(vec![]);
    }
    actions
        .split(ACTION_DELIMITER)
        .map(|a| parse_action(a.trim()))
        .collect()
}

fn parse_cidr(ip: Option<&str>, line: &str) -> Result<Option<Ipv4Network>, Error> {
    match ip {
        Some(ip) => {
            let invalid_cidr = |e| Error::InvalidCidr(e, line.to_string());
            Ok(Some(Ipv4Network::from_str(ip).map_err(invalid_cidr)?))
        }
        _ => Ok(None),
    }
}

/// Parses one CSV line and validates it semantically
fn parse_line(line: &str) -> Result<Option<FlowRecord>, Error> {
    if line.trim().is_empty() || line.starts_with(COMMENT) {
        return Ok(None);
    }

    let mut csv_elems = vec![];
    for item in line.split(DELIMITER) {
        let trimmed = match item.trim() {
            // check wildcard
            "*" => None,
            "" => return Err(Error::EmptyValue(line.to_string())),
            trm => Some(trm),
        };
        csv_elems.push(trimmed);
    }

    if csv_elems.len() != VALUE_COUNT {
        return Err(Error::ValueCount(line.to_string()));
    }

    let in_port = match csv_elems[0] {
        Some(p) => Some(parse_switch_port(p)?),
        _ => None,
    };
    let src_ip = parse_cidr(csv_elems[1], line)?;
    let src_port = match csv_elems[2] {
        Some(p) => Some(parse_port_number(p)?),
        _ => None,
    };
    let dst_ip = parse_cidr(csv_elems[3], line)?;
    let dst_port = match csv_elems[4] {
        Some(p) => Some(parse_port_number(p)?),
        _ => None,
    };
    let proto = match csv_elems[5] {
        Some(proto) => Some(parse_protocol(proto)?),
        _ => None,
    };
    // priority and actions cannot be wildcards
    let priority = match csv_elems[6] {
        Some(p) => p.parse().map_err(|_| Error::InvalidPriority(p.to_string()))?,
        None => return Err(Error::InvalidPriority("*".to_string())),
    };
    let actions = match csv_elems[7] {
        Some(a) => parse_actions(a)?,
        None => return Err(Error::InvalidAction("*".to_string())),
    };

    // check for semantic errors
    if (src_port != None || dst_port != None) && proto == None {
        return Err(Error::PortWithProtocolWildcard(line.to_string()));
    }
    if (src_port != None || dst_port != None) && proto == Some(IpProtocol::Icmp) {
        return Err(Error::PortWithIcmp(line.to_string()));
    }

    let rec = FlowRecord {
        in_port: in_port,
        src_ip: src_ip,
        src_port: src_port,
        dst_ip: dst_ip,
        dst_port: dst_port,
        proto: proto,
        priority: priority,
        actions: actions,
    };
    debug!("Got {:?}", rec);
    Ok(Some(rec))
}

/// The line oriented parser for CSV static flows
pub struct CsvParser {
    path: String,
}

impl CsvParser {
    /// Gets the path of the file that this parser operates on
    pub fn path(&self) -> &str {
        &self.path
    }
    /// Constructs a new `CsvParser`
    pub fn new(path: String) -> CsvParser {
        CsvParser { path: path }
    }

    /// Parses a CSV file and returns its records
    pub fn parse_file(&self) -> io::Result<HashSet<FlowRecord>> {
        info!("Reading CSV file {}", self.path);

        let file = File::open(&self.path).map_err(|e| {
            io::Error::new(e.kind(), format!("Unable to open `{:?}`: {}", self.path, e))
        })?;
        let reader = io::BufReader::new(file);

        let mut records = HashSet::new();
        for line_res in reader.lines() {
            let line = line_res?;
            if let Some(rec) = parse_line(&line)? {
                records.insert(rec);
            }
        }
        Ok(records)
    }

    /// Registers a file as notify target.
    /// If the registering fails, the file is tried to be reregistered
    /// until the receiving end of `record_tx` is gone.
    pub fn watch_file(&self, record_tx: &Sender<HashSet<FlowRecord>>) {
        loop {
            let (tx, rx) = mpsc::channel();
            if let Ok(mut watcher) = notify::watcher(tx, Duration::from_secs(NOTIFY_SECONDS)) {
                if watcher
                    .watch(&self.path(), RecursiveMode::NonRecursive)
                    .is_ok()
                {
                    info!("Watching file {}", self.path());
                    match self.handle_file_events(&rx, record_tx) {
                        Ok(true) => warn!("file watch removed"),
                        Ok(false) => return,
                        Err(e) => error!("{}", e),
                    }
                }
            }
            thread::sleep(Duration::from_secs(NOTIFY_SECONDS));
        }
    }

    /// Reads inode events and parses the corresponding file.
    /// If the inode is removed, it is unregistered from notify and `true`
    /// is returned. `false` means nobody listens for records anymore.
    fn handle_file_events(
        &self,
        rx: &Receiver<DebouncedEvent>,
        tx: &Sender<HashSet<FlowRecord>>,
    ) -> notify::Result<bool> {
        while let Ok(event) = rx.recv() {
            match event {
                DebouncedEvent::NoticeRemove(_) | DebouncedEvent::Remove(_) => {
                    return Ok(true);
                }
                DebouncedEvent::Error(error, _) => {
                    return Err(error);
                }
                DebouncedEvent::NoticeWrite(_) | DebouncedEvent::Chmod(_) | DebouncedEvent::Rescan => {}
                _ => match self.parse_file() {
                    Ok(recs) => {
                        if tx.send(recs).is_err() {
                            return Ok(false);
                        }
                    }
                    Err(io_err) => {
                        return Err(notify::Error::Io(io_err));
                    }
                },
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> FlowRecord {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn wrong_value_count() {
        let testee = parse_line("1;*;*;*;*;*;10");
        assert_eq!(Error::ValueCount("1;*;*;*;*;*;10".to_string()), testee.unwrap_err());
    }

    #[test]
    fn empty_value() {
        let line = "1;;*;*;*;*;10;drop";
        assert_eq!(Error::EmptyValue(line.to_string()), parse_line(line).unwrap_err());
    }

    #[test]
    fn ignored_lines() {
        assert_eq!(Ok(None), parse_line(""));
        assert_eq!(Ok(None), parse_line("   "));
        assert_eq!(Ok(None), parse_line("# 1;*;*;*;*;*;10;drop"));
    }

    #[test]
    fn invalid_values() {
        assert_eq!(Error::InvalidPortNumber("0".to_string()), parse_line("0;*;*;*;*;*;1;drop").unwrap_err());
        assert_eq!(
            Error::InvalidPortNumber("70000".to_string()),
            parse_line("*;*;70000;*;*;TCP;1;drop").unwrap_err()
        );
        assert_eq!(Error::InvalidProtocol("SCTP".to_string()), parse_line("*;*;*;*;*;SCTP;1;drop").unwrap_err());
        assert_eq!(Error::InvalidPriority("high".to_string()), parse_line("*;*;*;*;*;*;high;drop").unwrap_err());
        assert_eq!(Error::InvalidPriority("*".to_string()), parse_line("*;*;*;*;*;*;*;drop").unwrap_err());
        assert_eq!(
            Error::InvalidAction("output:x".to_string()),
            parse_line("*;*;*;*;*;*;1;output:x").unwrap_err()
        );
        assert_eq!(Error::InvalidAction("drop".to_string()), parse_line("*;*;*;*;*;*;1;all,drop").unwrap_err());
        match parse_line("*;192.0.2.0/33;*;*;*;*;1;drop") {
            Err(Error::InvalidCidr(..)) => {}
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn ports_need_a_protocol() {
        let line = "*;*;*;*;80;*;1;drop";
        assert_eq!(Error::PortWithProtocolWildcard(line.to_string()), parse_line(line).unwrap_err());
        let line = "*;*;*;*;80;ICMP;1;drop";
        assert_eq!(Error::PortWithIcmp(line.to_string()), parse_line(line).unwrap_err());
    }

    #[test]
    fn match_all() {
        let rec = record("*;*;*;*;*;*;0;controller");
        assert_eq!(FlowKey::any(), rec.key());
        assert_eq!(
            vec![Action::Output {
                port: OFPP_CONTROLLER,
                max_len: 128,
            }],
            rec.actions
        );
    }

    #[test]
    fn tcp_key() {
        let rec = record(" 2 ; 192.0.2.0/24 ; * ; 192.0.2.10/32 ; 80 ; TCP ; 100 ; output:3, in_port ");
        let key = rec.key();
        let w = key.wildcards();
        assert!(!w.has(OFPFW_IN_PORT) && !w.has(OFPFW_DL_TYPE) && !w.has(OFPFW_NW_PROTO) && !w.has(OFPFW_TP_DST));
        assert!(w.has(OFPFW_TP_SRC) && w.has(OFPFW_DL_SRC) && w.has(OFPFW_NW_TOS));
        assert_eq!((8, 0), (w.nw_src_bits(), w.nw_dst_bits()));
        assert_eq!(2, key.flow().in_port);
        assert_eq!(0xc000_0200, key.flow().nw_src);
        assert_eq!(0xc000_020a, key.flow().nw_dst);
        assert_eq!((6, 80), (key.flow().nw_proto, key.flow().tp_dst));
        assert_eq!(vec![Action::output(3), Action::output(OFPP_IN_PORT)], rec.actions);
        assert_eq!(100, rec.priority());
    }

    #[test]
    fn changes_become_flow_mods() {
        let kept = record("*;*;*;*;*;*;0;controller");
        let old = record("1;*;*;*;*;*;5;output:2");
        let new = record("1;*;*;*;*;*;5;output:3");
        let installed: HashSet<_> = vec![kept.clone(), old].into_iter().collect();
        let wanted: HashSet<_> = vec![kept, new.clone()].into_iter().collect();

        let mods = flow_mods(&installed, &wanted);
        assert_eq!(2, mods.len());
        assert_eq!(OfpFlowModCommand::DeleteStrict, mods[0].command);
        assert_eq!((new.key(), 5), (mods[0].key, mods[0].priority));
        assert_eq!(OfpFlowModCommand::Add, mods[1].command);
        assert!(mods[1].sends_flow_rem());
        assert!(mods[1].actions.has_out_port(3));
    }

    #[test]
    fn missing_file() {
        let parser = CsvParser::new("/nonexistent/flows.csv".to_string());
        assert_eq!(io::ErrorKind::NotFound, parser.parse_file().unwrap_err().kind());
    }
}
