/*!
The datapath: the flow table chain and the switch ports, as driven by the
control channel and the packet path.

Flow mods and stats requests arrive already parsed (see `openflow::messages`).
Flow removed notifications leave through an `mpsc` channel.
*/

use chain::Chain;
use flow::actions::ActionList;
use flow::entry::{FlowEntry, Timeout};
use flow::{Flow, FlowKey};
use openflow::error::{OfpErrorMsg, OfpFlowModFailedCode};
use openflow::messages::*;
use openflow::*;
use sync::lock;
use table::{IterCursor, Iteration, RemovalSink, Table, Visit};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// What a flow mod did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowModResult {
    /// Number of entries added, modified or deleted
    pub affected: usize,
    /// The buffered packet to release through the new actions
    pub buffer_id: Option<u32>,
}

/// What to do with a received packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Apply the actions of the matched entry
    Apply { actions: Arc<ActionList> },
    /// Send the first `max_len` bytes to the controller
    ToController {
        in_port: u16,
        max_len: u16,
        reason: OfpPacketInReason,
    },
}

/// Where a paused flow stats dump continues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCursor {
    table: usize,
    cursor: IterCursor,
}

impl StatsCursor {
    pub fn start() -> StatsCursor {
        StatsCursor::default()
    }
}

#[derive(Debug, Default)]
struct PortCounters {
    rx_packets: AtomicU64,
    tx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    rx_dropped: AtomicU64,
}

impl PortCounters {
    fn stats(&self, port_no: u16) -> PortStats {
        PortStats {
            port_no: port_no,
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_dropped: 0,
        }
    }
}

/// Sends flow removed messages for the entries that asked for them
struct Notifier<'a> {
    tx: &'a Mutex<Option<Sender<FlowRemoved>>>,
}

impl<'a> RemovalSink for Notifier<'a> {
    fn flow_removed(&self, flow: &FlowEntry, reason: OfpFlowRemovedReason, now: Instant) {
        if !flow.send_flow_rem() || flow.is_emergency() {
            return;
        }
        if let Some(ref tx) = *lock(self.tx) {
            trace!("Notifying removal of flow {}: {:?}", flow, reason);
            if tx.send(FlowRemoved::new(flow, reason, now)).is_err() {
                warn!("Flow removed receiver is gone");
            }
        }
    }
}

pub struct Datapath {
    id: u64,
    miss_send_len: u16,
    chain: Chain,
    ports: Vec<PortCounters>,
    notifier: Mutex<Option<Sender<FlowRemoved>>>,
}

impl Datapath {
    pub fn new(id: u64, n_ports: u16, miss_send_len: u16, chain: Chain) -> Datapath {
        info!("Datapath {:016x} with {} ports", id, n_ports);
        Datapath {
            id: id,
            miss_send_len: miss_send_len,
            chain: chain,
            ports: (0..n_ports).map(|_| PortCounters::default()).collect(),
            notifier: Mutex::new(None),
        }
    }

    /// Sends flow removed messages to `tx` from now on
    pub fn notify_removals(self, tx: Sender<FlowRemoved>) -> Datapath {
        *lock(&self.notifier) = Some(tx);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn n_ports(&self) -> u16 {
        self.ports.len() as u16
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    fn notifier(&self) -> Notifier {
        Notifier { tx: &self.notifier }
    }

    fn port(&self, port_no: u16) -> Option<&PortCounters> {
        if port_no == 0 {
            None
        }
        else {
            self.ports.get(port_no as usize - 1)
        }
    }

    /// Executes a flow mod
    pub fn flow_mod(&self, fm: FlowMod, now: Instant) -> Result<FlowModResult, OfpErrorMsg> {
        debug!("{:?} {} priority {} actions {}", fm.command, fm.key, fm.priority, fm.actions);
        let buffer_id = if fm.buffer_id == OFP_NO_BUFFER {
            None
        }
        else {
            Some(fm.buffer_id)
        };
        let affected = match fm.command {
            OfpFlowModCommand::Add => self.add_flow(fm, now)?,
            OfpFlowModCommand::Modify | OfpFlowModCommand::ModifyStrict => self.modify_flow(fm, now)?,
            OfpFlowModCommand::Delete | OfpFlowModCommand::DeleteStrict => self.delete_flow(&fm, now),
        };
        Ok(FlowModResult {
            affected: affected,
            buffer_id: buffer_id,
        })
    }

    fn add_flow(&self, fm: FlowMod, now: Instant) -> Result<usize, OfpErrorMsg> {
        fm.actions.validate(self.n_ports())?;
        if fm.checks_overlap() && self.chain.has_conflict(&fm.key, fm.priority) {
            debug!("Flow {} overlaps", fm.key);
            return Err(OfpErrorMsg::flow_mod_failed(OfpFlowModFailedCode::Overlap));
        }
        let emergency = fm.is_emergency();
        let flow = FlowEntry::new(fm.key, fm.priority, fm.actions, now)
            .with_cookie(fm.cookie)
            .with_timeouts(Timeout::from_secs(fm.idle_timeout), Timeout::from_secs(fm.hard_timeout))
            .with_removal_notification(fm.flags & OFPFF_SEND_FLOW_REM != 0);
        let inserted = if emergency {
            self.chain.insert_emergency(flow)
        }
        else {
            self.chain.insert(flow)
        };
        match inserted {
            Ok(()) => Ok(1),
            Err(rejected) => {
                warn!("Cannot add flow {}: {}", rejected.flow, rejected.reason);
                Err(OfpErrorMsg::from(rejected.reason))
            }
        }
    }

    /// Modifies the selected entries. If there are none, the flow is added.
    fn modify_flow(&self, fm: FlowMod, now: Instant) -> Result<usize, OfpErrorMsg> {
        fm.actions.validate(self.n_ports())?;
        let strict = fm.command.is_strict();
        match self.chain.modify(&fm.key, fm.priority, strict, &fm.actions, now) {
            0 => self.add_flow(fm, now),
            n => Ok(n),
        }
    }

    fn delete_flow(&self, fm: &FlowMod, now: Instant) -> usize {
        let strict = fm.command.is_strict();
        let notifier = self.notifier();
        if fm.is_emergency() {
            self.chain.delete_emergency(&fm.key, fm.out_port, fm.priority, strict, &notifier, now)
        }
        else {
            self.chain.delete(&fm.key, fm.out_port, fm.priority, strict, &notifier, now)
        }
    }

    /// Classifies a packet of `len` bytes
    pub fn receive(&self, packet: &Flow, len: usize, now: Instant) -> Verdict {
        let port = self.port(packet.in_port);
        if let Some(port) = port {
            port.rx_packets.fetch_add(1, Ordering::Relaxed);
            port.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
        }
        match self.chain.lookup(&FlowKey::from_packet(packet)) {
            Some(flow) => {
                flow.record_use(now, len as u64);
                let actions = flow.actions();
                if actions.is_empty() {
                    if let Some(port) = port {
                        port.rx_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Verdict::Apply { actions: actions }
            }
            None => Verdict::ToController {
                in_port: packet.in_port,
                max_len: self.miss_send_len,
                reason: OfpPacketInReason::NoMatch,
            },
        }
    }

    /// Accounts a packet sent out of `port_no`
    pub fn record_tx(&self, port_no: u16, len: usize) {
        if let Some(port) = self.port(port_no) {
            port.tx_packets.fetch_add(1, Ordering::Relaxed);
            port.tx_bytes.fetch_add(len as u64, Ordering::Relaxed);
        }
    }

    /// Expires idle and hard timeouts
    pub fn run_timeouts(&self, now: Instant) -> usize {
        self.chain.timeout(now, &self.notifier())
    }

    pub fn enter_emergency(&self, now: Instant) -> usize {
        self.chain.enter_emergency(&self.notifier(), now)
    }

    pub fn leave_emergency(&self) {
        self.chain.leave_emergency()
    }

    fn select_tables(&self, table_id: u8) -> Vec<&Table> {
        match table_id {
            OFPTT_ALL => self.chain.tables().iter().map(|t| &**t).collect(),
            OFPTT_EMERG => vec![self.chain.emergency_table()],
            id => self
                .chain
                .tables()
                .iter()
                .filter(|t| t.table_id() == id)
                .map(|t| &**t)
                .collect(),
        }
    }

    /// Collects flow stats until the reply would exceed `budget` bytes.
    /// Returns the cursor to continue with if the dump is not complete.
    pub fn flow_stats(
        &self,
        req: &FlowStatsRequest,
        cursor: StatsCursor,
        budget: usize,
        now: Instant,
    ) -> (Vec<FlowStats>, Option<StatsCursor>) {
        let tables = self.select_tables(req.table_id);
        let mut stats: Vec<FlowStats> = vec![];
        let mut used = 0;
        let mut position = cursor;
        while position.table < tables.len() {
            let iteration = tables[position.table].iterate(&req.key, req.out_port, position.cursor, &mut |flow: &Arc<FlowEntry>| {
                let entry = FlowStats::new(flow, now);
                // a page takes at least one entry so a dump always advances
                if !stats.is_empty() && used + entry.wire_len() > budget {
                    return Visit::Full;
                }
                used += entry.wire_len();
                stats.push(entry);
                Visit::Continue
            });
            match iteration {
                Iteration::Done => {
                    position = StatsCursor {
                        table: position.table + 1,
                        cursor: IterCursor::start(),
                    }
                }
                Iteration::Paused(cursor) => {
                    return (
                        stats,
                        Some(StatsCursor {
                            table: position.table,
                            cursor: cursor,
                        }),
                    )
                }
            }
        }
        (stats, None)
    }

    pub fn aggregate_stats(&self, req: &FlowStatsRequest) -> AggregateStats {
        let mut aggregate = AggregateStats::default();
        for table in self.select_tables(req.table_id) {
            table.iterate(&req.key, req.out_port, IterCursor::start(), &mut |flow: &Arc<FlowEntry>| {
                aggregate.packet_count += flow.packet_count();
                aggregate.byte_count += flow.byte_count();
                aggregate.flow_count += 1;
                Visit::Continue
            });
        }
        aggregate
    }

    pub fn table_stats(&self) -> Vec<TableStats> {
        self.chain.tables().iter().map(|t| t.stats()).collect()
    }

    /// Gets the stats of one port, or of all ports for `OFPP_NONE`
    pub fn port_stats(&self, port_no: u16) -> Vec<PortStats> {
        if port_no == OFPP_NONE {
            return self
                .ports
                .iter()
                .enumerate()
                .map(|(i, port)| port.stats(i as u16 + 1))
                .collect();
        }
        self.port(port_no).map(|port| port.stats(port_no)).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::actions::Action;
    use flow::tests::tcp_flow;
    use openflow::error::*;
    use table::hash::HashTable;
    use table::linear::LinearTable;

    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    fn datapath() -> (Datapath, Receiver<FlowRemoved>) {
        let tables: Vec<Box<Table>> = vec![
            Box::new(HashTable::new("hash2", 0, 16)),
            Box::new(LinearTable::new("linear", 1, 10)),
        ];
        let chain = Chain::new(tables, Box::new(LinearTable::new("emergency", OFPTT_EMERG, 10)));
        let (tx, rx) = mpsc::channel();
        (Datapath::new(1, 4, OFP_DEFAULT_MISS_SEND_LEN, chain).notify_removals(tx), rx)
    }

    fn wild_key(tp_dst: u16) -> FlowKey {
        FlowKey::new(tcp_flow(1, 0x0a00_0001, 0x0a00_0002, tp_dst), OFPFW_IN_PORT)
    }

    fn add(key: FlowKey, priority: u16, out: u16) -> FlowMod {
        FlowMod::add(key, priority, ActionList::new(vec![Action::output(out)]))
    }

    fn packet(in_port: u16, tp_dst: u16) -> Flow {
        tcp_flow(in_port, 0x0a00_0001, 0x0a00_0002, tp_dst)
    }

    #[test]
    fn packets_hit_or_miss() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        let mut fm = add(wild_key(80), 10, 2);
        fm.buffer_id = 42;
        let result = dp.flow_mod(fm, now).unwrap();
        assert_eq!(FlowModResult { affected: 1, buffer_id: Some(42) }, result);

        match dp.receive(&packet(3, 80), 100, now) {
            Verdict::Apply { actions } => assert!(actions.has_out_port(2)),
            v => panic!("unexpected verdict {:?}", v),
        }
        assert_eq!(
            Verdict::ToController {
                in_port: 3,
                max_len: 128,
                reason: OfpPacketInReason::NoMatch,
            },
            dp.receive(&packet(3, 81), 60, now)
        );
        let port = dp.port_stats(3)[0];
        assert_eq!((2, 160), (port.rx_packets, port.rx_bytes));

        dp.record_tx(2, 100);
        assert_eq!(1, dp.port_stats(2)[0].tx_packets);
        assert_eq!(4, dp.port_stats(OFPP_NONE).len());
        assert!(dp.port_stats(5).is_empty());
    }

    #[test]
    fn invalid_adds() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        let bad_port = dp.flow_mod(add(wild_key(80), 10, 9), now).unwrap_err();
        assert_eq!((OfpErrorType::BadAction, OfpBadActionCode::BadOutPort as u16), (bad_port.typ(), bad_port.code()));

        dp.flow_mod(add(wild_key(80), 10, 2), now).unwrap();
        let mut overlapping = add(FlowKey::new(packet(1, 80), OFPFW_IN_PORT | OFPFW_TP_DST), 10, 3);
        overlapping.flags = OFPFF_CHECK_OVERLAP;
        let overlap = dp.flow_mod(overlapping, now).unwrap_err();
        assert_eq!(OfpFlowModFailedCode::Overlap as u16, overlap.code());

        let mut emergency = add(wild_key(80), 10, 2);
        emergency.flags = OFPFF_EMERG;
        emergency.idle_timeout = 10;
        let timeout = dp.flow_mod(emergency, now).unwrap_err();
        assert_eq!(OfpFlowModFailedCode::BadEmergTimeout as u16, timeout.code());
    }

    #[test]
    fn full_tables() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        for tp_dst in 0..10 {
            dp.flow_mod(add(wild_key(tp_dst), 10, 2), now).unwrap();
        }
        let full = dp.flow_mod(add(wild_key(10), 10, 2), now).unwrap_err();
        assert!(full.check_tables_full());
    }

    #[test]
    fn modify_without_match_adds() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        let mut fm = add(wild_key(80), 10, 2);
        fm.command = OfpFlowModCommand::ModifyStrict;
        assert_eq!(1, dp.flow_mod(fm.clone(), now).unwrap().affected);
        fm.actions = ActionList::new(vec![Action::output(4)]);
        assert_eq!(1, dp.flow_mod(fm, now).unwrap().affected);
        assert_eq!(1, dp.chain().tables()[1].n_flows());
        assert!(dp.chain().lookup(&FlowKey::from_packet(&packet(1, 80))).unwrap().has_out_port(4));
    }

    #[test]
    fn removals_are_notified_once() {
        let base = Instant::now();
        let (dp, rx) = datapath();
        let mut notified = add(wild_key(80), 10, 2);
        notified.flags = OFPFF_SEND_FLOW_REM;
        notified.idle_timeout = 5;
        notified.cookie = 7;
        dp.flow_mod(notified, base).unwrap();
        dp.flow_mod(add(wild_key(81), 10, 2), base).unwrap();

        let mut delete = FlowMod::new(OfpFlowModCommand::Delete, wild_key(81), 0);
        delete.flags = OFPFF_SEND_FLOW_REM;
        assert_eq!(1, dp.flow_mod(delete, base).unwrap().affected);
        assert!(rx.try_recv().is_err());

        assert_eq!(1, dp.run_timeouts(base + Duration::from_secs(6)));
        let removed = rx.try_recv().unwrap();
        assert_eq!((7, OfpFlowRemovedReason::IdleTimeout), (removed.cookie, removed.reason));
        assert_eq!((6, 5), (removed.duration_sec, removed.idle_timeout));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emergency_entries_stay_silent() {
        let now = Instant::now();
        let (dp, rx) = datapath();
        let mut normal = add(wild_key(80), 10, 2);
        normal.flags = OFPFF_SEND_FLOW_REM;
        dp.flow_mod(normal, now).unwrap();
        let mut emergency = add(wild_key(80), 10, 3);
        emergency.flags = OFPFF_EMERG | OFPFF_SEND_FLOW_REM;
        dp.flow_mod(emergency, now).unwrap();

        assert_eq!(1, dp.enter_emergency(now));
        assert_eq!(OfpFlowRemovedReason::Delete, rx.try_recv().unwrap().reason);
        match dp.receive(&packet(1, 80), 64, now) {
            Verdict::Apply { actions } => assert!(actions.has_out_port(3)),
            v => panic!("unexpected verdict {:?}", v),
        }

        let mut delete = FlowMod::new(OfpFlowModCommand::Delete, FlowKey::any(), 0);
        delete.flags = OFPFF_EMERG;
        assert_eq!(1, dp.flow_mod(delete, now).unwrap().affected);
        assert!(rx.try_recv().is_err());
        dp.leave_emergency();
    }

    #[test]
    fn flow_stats_pages() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        for tp_dst in 0..5 {
            dp.flow_mod(add(wild_key(tp_dst), 10, 2), now).unwrap();
        }
        let exact = FlowKey::from_packet(&packet(1, 80));
        dp.flow_mod(add(exact, 0, 2), now).unwrap();

        // each entry takes 88 + 8 bytes
        let req = FlowStatsRequest::all();
        let mut seen = vec![];
        let mut pages = 0;
        let mut cursor = StatsCursor::start();
        loop {
            let (stats, next) = dp.flow_stats(&req, cursor, 200, now);
            assert!(stats.len() <= 2);
            seen.extend(stats.iter().map(|s| (s.table_id, s.key)));
            pages += 1;
            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        assert_eq!(3, pages);
        assert_eq!(6, seen.len());
        assert_eq!((0, exact), seen[0]);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(6, unique.len());
        assert!(seen[1..].iter().all(|&(table_id, _)| table_id == 1));
    }

    #[test]
    fn table_selection() {
        let now = Instant::now();
        let (dp, _rx) = datapath();
        dp.flow_mod(add(FlowKey::from_packet(&packet(1, 80)), 0, 2), now).unwrap();
        dp.flow_mod(add(wild_key(80), 10, 2), now).unwrap();
        let mut emergency = add(wild_key(81), 10, 2);
        emergency.flags = OFPFF_EMERG;
        dp.flow_mod(emergency, now).unwrap();
        dp.receive(&packet(1, 80), 1000, now);

        let mut req = FlowStatsRequest::all();
        let all = dp.aggregate_stats(&req);
        assert_eq!(AggregateStats { packet_count: 1, byte_count: 1000, flow_count: 2 }, all);
        req.table_id = OFPTT_EMERG;
        assert_eq!(1, dp.aggregate_stats(&req).flow_count);
        req.table_id = 1;
        assert_eq!(1, dp.flow_stats(&req, StatsCursor::start(), 1000, now).0.len());

        let tables = dp.table_stats();
        assert_eq!(vec!["hash2", "linear"], tables.iter().map(|t| t.name.as_str()).collect::<Vec<_>>());
        assert_eq!((1, 1, 1), (tables[0].n_flows, tables[0].n_lookup, tables[0].n_matched));
        assert_eq!(0, tables[1].n_lookup);
    }
}
