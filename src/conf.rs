/*!
A parser for an INI file with the following structure:

```ini
[Datapath]
; hex with 0x prefix or decimal, random if absent
id=0x00000000cafe
ports=4
miss_send_len=128

[Tables]
linear_max=100
hash_buckets=65536
emergency_max=100

[Hardware]
enabled=true
exact_slots=1024
wildcard_slots=32

[Timeouts]
sweep_millis=1000
```

Every section and key is optional.
*/

use hw::regs::WILDCARD_MAX_SLOTS;
use hw::{NF2_EXACT_SLOTS, NF2_WILDCARD_SLOTS};
use openflow::{OFPP_MAX, OFP_DEFAULT_MISS_SEND_LEN};
use table::hash::HASH2_BUCKETS;
use table::linear::LINEAR_MAX_FLOWS;

use ini::ini;
use ini::Ini;

use rand;
use rand::Rng;

use std::convert::From;
use std::error;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

const DATAPATH_SECTION: &str = "Datapath";
const ID_KEY: &str = "id";
const PORTS_KEY: &str = "ports";
const MISS_SEND_LEN_KEY: &str = "miss_send_len";

const TABLES_SECTION: &str = "Tables";
const LINEAR_MAX_KEY: &str = "linear_max";
const HASH_BUCKETS_KEY: &str = "hash_buckets";
const EMERGENCY_MAX_KEY: &str = "emergency_max";

const HARDWARE_SECTION: &str = "Hardware";
const ENABLED_KEY: &str = "enabled";
const EXACT_SLOTS_KEY: &str = "exact_slots";
const WILDCARD_SLOTS_KEY: &str = "wildcard_slots";

const TIMEOUTS_SECTION: &str = "Timeouts";
const SWEEP_KEY: &str = "sweep_millis";

const DEFAULT_PORTS: u16 = 4;
const DEFAULT_SWEEP_MILLIS: u64 = 1000;
/// Datapath ids are 48 bits
const DATAPATH_ID_MASK: u64 = 0xffff_ffff_ffff;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Ini(ini::Error),
    InvalidValue(&'static str, &'static str, String),
    NotPowerOfTwo(&'static str, &'static str, usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "{}", e),
            Error::Ini(ref e) => write!(f, "{}", e),
            Error::InvalidValue(s, k, ref v) => {
                write!(f, "The INI [{}] section has an invalid '{}' value: {}", s, k, v)
            }
            Error::NotPowerOfTwo(s, k, v) => {
                write!(f, "The INI [{}] section's '{}' value {} is not a power of two", s, k, v)
            }
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(ioe) => ioe,
            _ => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
impl From<ini::Error> for Error {
    fn from(e: ini::Error) -> Self {
        Error::Ini(e)
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        "INI configuration parser error"
    }
}

trait Section {
    type S;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error>;
}

/// Gets a key of a section, if both exist
fn entry<'a>(conf: &'a Ini, section: &'static str, key: &'static str) -> Option<&'a str> {
    conf.section(Some(section.to_owned()))
        .and_then(|s| s.get(key))
        .map(|v| v.trim())
}

/// Parses a key of a section, `default` if the key does not exist
fn parse_entry<T: FromStr>(conf: &Ini, section: &'static str, key: &'static str, default: T) -> Result<T, Error> {
    match entry(conf, section, key) {
        Some(value) => value
            .parse()
            .map_err(|_| Error::InvalidValue(section, key, value.to_owned())),
        None => Ok(default),
    }
}

fn power_of_two(section: &'static str, key: &'static str, value: usize) -> Result<usize, Error> {
    if value.is_power_of_two() {
        Ok(value)
    }
    else {
        Err(Error::NotPowerOfTwo(section, key, value))
    }
}

fn parse_bool(section: &'static str, key: &'static str, value: &str) -> Result<bool, Error> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidValue(section, key, value.to_owned())),
    }
}

fn parse_datapath_id(value: &str) -> Result<u64, Error> {
    let invalid = || Error::InvalidValue(DATAPATH_SECTION, ID_KEY, value.to_owned());
    let id = if value.starts_with("0x") || value.starts_with("0X") {
        u64::from_str_radix(&value[2..], 16).map_err(|_| invalid())?
    }
    else {
        value.parse().map_err(|_| invalid())?
    };
    if id > DATAPATH_ID_MASK {
        return Err(invalid());
    }
    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatapathConf {
    pub id: u64,
    pub ports: u16,
    pub miss_send_len: u16,
}

impl Section for DatapathConf {
    type S = DatapathConf;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", DATAPATH_SECTION);

        let id = match entry(conf, DATAPATH_SECTION, ID_KEY) {
            Some(id) => parse_datapath_id(id)?,
            None => {
                let id = rand::thread_rng().gen::<u64>() & DATAPATH_ID_MASK;
                info!("No datapath id configured, using {:012x}", id);
                id
            }
        };
        let ports = parse_entry(conf, DATAPATH_SECTION, PORTS_KEY, DEFAULT_PORTS)?;
        if ports == 0 || ports >= OFPP_MAX {
            return Err(Error::InvalidValue(DATAPATH_SECTION, PORTS_KEY, ports.to_string()));
        }

        let datapath = DatapathConf {
            id: id,
            ports: ports,
            miss_send_len: parse_entry(conf, DATAPATH_SECTION, MISS_SEND_LEN_KEY, OFP_DEFAULT_MISS_SEND_LEN)?,
        };
        debug!("Got {:?}", datapath);
        Ok(datapath)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablesConf {
    pub linear_max: usize,
    pub hash_buckets: usize,
    pub emergency_max: usize,
}

impl Section for TablesConf {
    type S = TablesConf;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", TABLES_SECTION);

        let buckets = parse_entry(conf, TABLES_SECTION, HASH_BUCKETS_KEY, HASH2_BUCKETS)?;
        let tables = TablesConf {
            linear_max: parse_entry(conf, TABLES_SECTION, LINEAR_MAX_KEY, LINEAR_MAX_FLOWS)?,
            hash_buckets: power_of_two(TABLES_SECTION, HASH_BUCKETS_KEY, buckets)?,
            emergency_max: parse_entry(conf, TABLES_SECTION, EMERGENCY_MAX_KEY, LINEAR_MAX_FLOWS)?,
        };
        debug!("Got {:?}", tables);
        Ok(tables)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareConf {
    pub enabled: bool,
    pub exact_slots: usize,
    pub wildcard_slots: usize,
}

impl Section for HardwareConf {
    type S = HardwareConf;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", HARDWARE_SECTION);

        let enabled = match entry(conf, HARDWARE_SECTION, ENABLED_KEY) {
            Some(value) => parse_bool(HARDWARE_SECTION, ENABLED_KEY, value)?,
            None => false,
        };
        let exact = parse_entry(conf, HARDWARE_SECTION, EXACT_SLOTS_KEY, NF2_EXACT_SLOTS)?;
        let wildcard = parse_entry(conf, HARDWARE_SECTION, WILDCARD_SLOTS_KEY, NF2_WILDCARD_SLOTS)?;
        if wildcard > WILDCARD_MAX_SLOTS {
            return Err(Error::InvalidValue(HARDWARE_SECTION, WILDCARD_SLOTS_KEY, wildcard.to_string()));
        }

        let hardware = HardwareConf {
            enabled: enabled,
            exact_slots: power_of_two(HARDWARE_SECTION, EXACT_SLOTS_KEY, exact)?,
            wildcard_slots: wildcard,
        };
        debug!("Got {:?}", hardware);
        Ok(hardware)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutsConf {
    /// How often flows are checked for expiry
    pub sweep: Duration,
}

impl Section for TimeoutsConf {
    type S = TimeoutsConf;

    fn from_ini(conf: &Ini) -> Result<Self::S, Error> {
        debug!("Reading [{}] section", TIMEOUTS_SECTION);

        let millis = parse_entry(conf, TIMEOUTS_SECTION, SWEEP_KEY, DEFAULT_SWEEP_MILLIS)?;
        if millis == 0 {
            return Err(Error::InvalidValue(TIMEOUTS_SECTION, SWEEP_KEY, millis.to_string()));
        }
        Ok(TimeoutsConf {
            sweep: Duration::from_millis(millis),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conf {
    pub datapath: DatapathConf,
    pub tables: TablesConf,
    pub hardware: HardwareConf,
    pub timeouts: TimeoutsConf,
}

fn from_ini(conf: &Ini) -> Result<Conf, Error> {
    Ok(Conf {
        datapath: DatapathConf::from_ini(conf)?,
        tables: TablesConf::from_ini(conf)?,
        hardware: HardwareConf::from_ini(conf)?,
        timeouts: TimeoutsConf::from_ini(conf)?,
    })
}

/// Reads the configuration, all defaults if there is no file
pub fn parse_file(path: Option<&str>) -> Result<Conf, Error> {
    match path {
        Some(path) => {
            info!("Reading INI file {}", path);
            from_ini(&Ini::load_from_file(path)?)
        }
        None => from_ini(&Ini::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Conf, Error> {
        from_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn full_file() {
        let conf = parse(
            "[Datapath]\nid=0x1234\nports=8\nmiss_send_len=256\n\
             [Tables]\nlinear_max=50\nhash_buckets=1024\nemergency_max=5\n\
             [Hardware]\nenabled=yes\nexact_slots=64\nwildcard_slots=16\n\
             [Timeouts]\nsweep_millis=250\n",
        ).unwrap();
        assert_eq!(
            DatapathConf {
                id: 0x1234,
                ports: 8,
                miss_send_len: 256,
            },
            conf.datapath
        );
        assert_eq!((50, 1024, 5), (conf.tables.linear_max, conf.tables.hash_buckets, conf.tables.emergency_max));
        assert_eq!(
            HardwareConf {
                enabled: true,
                exact_slots: 64,
                wildcard_slots: 16,
            },
            conf.hardware
        );
        assert_eq!(Duration::from_millis(250), conf.timeouts.sweep);
    }

    #[test]
    fn defaults() {
        let conf = parse_file(None).unwrap();
        assert!(conf.datapath.id <= DATAPATH_ID_MASK);
        assert_eq!((4, 128), (conf.datapath.ports, conf.datapath.miss_send_len));
        assert_eq!(LINEAR_MAX_FLOWS, conf.tables.linear_max);
        assert_eq!(HASH2_BUCKETS, conf.tables.hash_buckets);
        assert!(!conf.hardware.enabled);
        assert_eq!(Duration::from_secs(1), conf.timeouts.sweep);
    }

    #[test]
    fn decimal_id() {
        assert_eq!(42, parse("[Datapath]\nid=42\n").unwrap().datapath.id);
    }

    #[test]
    fn invalid_values() {
        let invalid = vec![
            "[Datapath]\nid=0x1000000000000\n",
            "[Datapath]\nid=switch\n",
            "[Datapath]\nports=0\n",
            "[Tables]\nlinear_max=-1\n",
            "[Hardware]\nenabled=maybe\n",
            "[Hardware]\nwildcard_slots=4096\n",
            "[Timeouts]\nsweep_millis=0\n",
        ];
        for text in invalid {
            match parse(text) {
                Err(Error::InvalidValue(..)) => {}
                r => panic!("{} gave {:?}", text, r),
            }
        }
        match parse("[Tables]\nhash_buckets=1000\n") {
            Err(Error::NotPowerOfTwo(TABLES_SECTION, HASH_BUCKETS_KEY, 1000)) => {}
            r => panic!("gave {:?}", r),
        }
    }
}
