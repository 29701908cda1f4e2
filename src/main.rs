/*!
A reference OpenFlow 1.0 switch datapath.

Packets are looked up in a chain of flow tables: an optional hardware table
mirroring a NetFPGA-style register device, a double-hash exact-match table
and a linear wildcard table. A separate emergency table takes over when the
controller connection is lost.

Static flows can be loaded from a CSV file, which is watched for changes.
To run a datapath with the default configuration and the flows in
`flows.csv` you can type:

```sh
$ ofswitch -vv flows.csv
```
*/

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate ini;
extern crate ipnetwork;
extern crate notify;
extern crate rand;
extern crate simple_logger;

#[cfg(unix)]
extern crate libc;
#[cfg(unix)]
extern crate log_panics;
#[cfg(unix)]
extern crate syslog;

mod chain;
mod conf;
mod datapath;
mod flow;
mod flow_csv;
mod hw;
mod openflow;
mod sync;
mod table;

use chain::Chain;
use conf::Conf;
use datapath::Datapath;
use flow_csv::{CsvParser, FlowRecord};
use hw::regs::SimulatedDevice;
use hw::HardwareTable;
use openflow::messages::FlowRemoved;
use openflow::OFPTT_EMERG;
use table::hash::HashTable;
use table::linear::LinearTable;
use table::Table;

use std::collections::HashSet;
#[cfg(unix)]
use std::fs::File;
use std::io;
#[cfg(unix)]
use std::io::prelude::*;
use std::process::exit;
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Instant;

/// Builds the table chain in lookup order.
/// A hardware table whose device fails to initialize is left out.
fn build_chain(conf: &Conf) -> Chain {
    let mut tables: Vec<Box<Table>> = Vec::new();

    if conf.hardware.enabled {
        let device = Box::new(SimulatedDevice::new());
        match HardwareTable::new(device, 0, conf.hardware.exact_slots, conf.hardware.wildcard_slots) {
            Ok(table) => tables.push(Box::new(table)),
            Err(e) => error!("Continuing without hardware table: {}", e),
        }
    }
    let hash_id = tables.len() as u8;
    tables.push(Box::new(HashTable::new("hash2", hash_id, conf.tables.hash_buckets)));
    let linear_id = tables.len() as u8;
    tables.push(Box::new(LinearTable::new("linear", linear_id, conf.tables.linear_max)));

    let emergency = LinearTable::new("emergency", OFPTT_EMERG, conf.tables.emergency_max);
    Chain::new(tables, Box::new(emergency))
}

/// Installs the difference between the `installed` and `wanted` static flows.
fn apply_flows(dp: &Datapath, installed: &HashSet<FlowRecord>, wanted: &HashSet<FlowRecord>) {
    for fm in flow_csv::flow_mods(installed, wanted) {
        let command = fm.command;
        match dp.flow_mod(fm, Instant::now()) {
            Ok(res) => debug!("{:?} affected {} flows", command, res.affected),
            Err(e) => error!("{:?} failed: {}", command, e),
        }
    }
    info!("{} static flows installed", wanted.len());
}

/// Logs the flow removed messages until the datapath is gone.
fn log_removals(rx: Receiver<FlowRemoved>) {
    for removed in rx {
        info!(
            "Flow removed ({:?}): priority {}, cookie {:#x}, alive {}.{:09}s, {} packets, {} bytes",
            removed.reason,
            removed.priority,
            removed.cookie,
            removed.duration_sec,
            removed.duration_nsec,
            removed.packet_count,
            removed.byte_count
        );
    }
}

/// Applies static flow changes and sweeps timeouts forever.
fn run(dp: &Datapath, conf: &Conf, parser: Option<CsvParser>) -> io::Result<()> {
    let mut installed = HashSet::new();
    let (tx, rx) = mpsc::channel();

    if let Some(parser) = parser {
        // first file read that terminates the program on errors
        let records = parser.parse_file()?;
        apply_flows(dp, &installed, &records);
        installed = records;
        thread::spawn(move || parser.watch_file(&tx));
    }

    loop {
        match rx.recv_timeout(conf.timeouts.sweep) {
            Ok(records) => {
                apply_flows(dp, &installed, &records);
                installed = records;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => thread::sleep(conf.timeouts.sweep),
        }
        let expired = dp.run_timeouts(Instant::now());
        if expired > 0 {
            debug!("{} flows expired", expired);
        }
    }
}

/// Maps any printable error to an `io::Error`.
fn other_error<E: ToString>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Reads command line arguments and calls the corresponding functions.
fn handle_cli_args() -> io::Result<()> {
    #[cfg(unix)]
    let unix_opts = "-p, --pid [file] 'Daemonizes the process and writes a PID file'
        -s, --syslog      'Logs via syslog'
        ";
    #[cfg(not(unix))]
    let unix_opts = "";

    let usage = &format!(
        "{}-v...          'Repeat to set the level of verbosity'
        -c, --conf [ini]  'The INI configuration file'
        [flows]           'The CSV file with static flows'",
        unix_opts
    );
    let matches = app_from_crate!().args_from_usage(usage).get_matches();

    let log_lvl = match matches.occurrences_of("v") {
        0 => log::Level::Error,
        1 => log::Level::Warn,
        2 => log::Level::Info,
        3 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    #[cfg(unix)]
    let use_syslog = matches.is_present("syslog");
    #[cfg(not(unix))]
    let use_syslog = false;

    if use_syslog {
        #[cfg(unix)]
        {
            let filter = log_lvl.to_level_filter();
            syslog::init(syslog::Facility::LOG_USER, filter, Some(crate_name!())).map_err(other_error)?;
            log_panics::init();
        }
    } else {
        simple_logger::init_with_level(log_lvl).map_err(other_error)?;
    }

    let conf = conf::parse_file(matches.value_of("conf"))?;
    let parser = matches.value_of("flows").map(|path| CsvParser::new(path.to_string()));

    #[cfg(unix)]
    {
        if let Some(pid_path) = matches.value_of("pid") {
            let pid = unsafe { libc::fork() };
            if pid < 0 {
                return Err(io::Error::last_os_error());
            } else if pid > 0 {
                // exit the parent process
                exit(0);
            }
            let mut file = File::create(pid_path)?;
            write!(file, "{}", unsafe { libc::getpid() })?;
        }
    }

    let (removed_tx, removed_rx) = mpsc::channel();
    thread::spawn(move || log_removals(removed_rx));

    let chain = build_chain(&conf);
    let dp = Datapath::new(conf.datapath.id, conf.datapath.ports, conf.datapath.miss_send_len, chain)
        .notify_removals(removed_tx);
    run(&dp, &conf, parser)
}

/// Entry function with top level error handling.
fn main() {
    if let Err(e) = handle_cli_args() {
        error!("{}", e);
        exit(1);
    }
}
