/*!
The NetFPGA ("nf2") hardware flow table.

Flows live in one of two hardware memories: an exact-match SRAM indexed by
two CRC-32 digests, and a small wildcard TCAM. The table keeps a software
mirror of its flows for lookups, stats and iteration, and harvests the
hardware counters into the flows during timeout sweeps.

Any register I/O error makes the table fail closed: it refuses new flows,
lookups miss and slots that could not be cleared are never reused.
*/

pub mod counters;
pub mod layout;
pub mod pool;
pub mod regs;

use self::counters::SlotCounters;
use self::layout::*;
use self::pool::{ExactPool, Pool, WildcardPool};
use self::regs::*;

use flow::actions::ActionList;
use flow::digest::{KeyDigests, NF2_POLY_1, NF2_POLY_2};
use flow::entry::FlowEntry;
use flow::{matches_rule_wildcards, FlowKey};
use openflow::*;
use sync::{lock, Rcu};
use table::*;

use std::io;
use std::result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const NF2_NAME: &str = "nf2";
/// Default number of exact-match rows
pub const NF2_EXACT_SLOTS: usize = 1024;
/// Default number of wildcard rows
pub const NF2_WILDCARD_SLOTS: usize = 32;

/// The hardware slots of a flow and their last counter readings
#[derive(Debug)]
pub struct HwPlacement {
    pool: Pool,
    slots: Mutex<Vec<SlotCounters>>,
}

impl HwPlacement {
    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn slot_indices(&self) -> Vec<u32> {
        lock(&self.slots).iter().map(|s| s.index).collect()
    }

    fn n_slots(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// The encoded rows of one slot
struct SlotRows {
    entry: Vec<u32>,
    mask: Vec<u32>,
    action: Vec<u32>,
}

/// Where and how a flow goes into hardware
struct Plan {
    pool: Pool,
    rows: Vec<SlotRows>,
}

struct Pools {
    exact: ExactPool,
    wildcard: WildcardPool,
}

impl Pools {
    fn release(&mut self, pool: Pool, slot: u32) {
        match pool {
            Pool::Exact => self.exact.release(slot),
            Pool::Wildcard => self.wildcard.release(slot),
        }
    }

    fn quarantine(&mut self, pool: Pool, slot: u32) {
        match pool {
            Pool::Exact => self.exact.quarantine(slot),
            Pool::Wildcard => self.wildcard.quarantine(slot),
        }
    }
}

fn counter_regs(pool: Pool, slot: u32) -> (u32, u32) {
    match pool {
        Pool::Exact => (exact_pkts_reg(slot), exact_bytes_reg(slot)),
        Pool::Wildcard => (wildcard_pkts_reg(slot), wildcard_bytes_reg(slot)),
    }
}

fn placement_pool(flow: &FlowEntry) -> Option<Pool> {
    flow.private::<HwPlacement>().map(HwPlacement::pool)
}

/// Writes the rows of a slot and takes the counter baseline.
/// Exact rows get the action first so the entry never points to garbage.
fn write_slot(io: &mut RegisterIo, pool: Pool, slot: u32, rows: &SlotRows) -> io::Result<SlotCounters> {
    assert_eq!(ENTRY_WORDS, rows.entry.len());
    assert_eq!(ENTRY_WORDS, rows.mask.len());
    assert_eq!(ACTION_WORDS, rows.action.len());
    match pool {
        Pool::Exact => {
            write_words(io, exact_action_reg(slot), &rows.action)?;
            write_words(io, exact_entry_reg(slot), &rows.entry)?;
        }
        Pool::Wildcard => {
            write_words(io, WILDCARD_CMP_BASE, &rows.entry)?;
            write_words(io, WILDCARD_MASK_BASE, &rows.mask)?;
            write_words(io, WILDCARD_ACTION_BASE, &rows.action)?;
            io.write(WILDCARD_WRITE_ADDR, slot)?;
        }
    }
    let (pkts, bytes) = counter_regs(pool, slot);
    Ok(SlotCounters::new(slot, io.read(pkts)?, io.read(bytes)?))
}

/// Zeroes a slot, the entry first. No packet arrives on port 0,
/// so a zeroed row matches nothing.
fn clear_slot(io: &mut RegisterIo, pool: Pool, slot: u32) -> io::Result<()> {
    match pool {
        Pool::Exact => {
            write_words(io, exact_entry_reg(slot), &[0; ENTRY_WORDS])?;
            write_words(io, exact_action_reg(slot), &[0; ACTION_WORDS])
        }
        Pool::Wildcard => {
            write_words(io, WILDCARD_CMP_BASE, &[0; ENTRY_WORDS])?;
            write_words(io, WILDCARD_MASK_BASE, &[0; ENTRY_WORDS])?;
            write_words(io, WILDCARD_ACTION_BASE, &[0; ACTION_WORDS])?;
            io.write(WILDCARD_WRITE_ADDR, slot)
        }
    }
}

/// Adds the counter deltas of all slots of `flow` to its counters
/// and returns the packet delta.
fn harvest(io: &mut RegisterIo, flow: &FlowEntry) -> io::Result<u64> {
    let placement = match flow.private::<HwPlacement>() {
        Some(placement) => placement,
        None => return Ok(0),
    };
    let mut packets = 0;
    for slot in lock(&placement.slots).iter_mut() {
        let (pkts_reg, bytes_reg) = counter_regs(placement.pool, slot.index);
        let (pkts, bytes) = slot.advance(io.read(pkts_reg)?, io.read(bytes_reg)?);
        flow.add_counts(pkts, bytes);
        packets += pkts;
    }
    if packets > 0 {
        trace!("flow {} hit {} packets in hardware", flow.serial(), packets);
    }
    Ok(packets)
}

pub struct HardwareTable {
    table_id: u8,
    io: Mutex<Box<RegisterIo>>,
    pools: Mutex<Pools>,
    digests: KeyDigests,
    flows: Rcu<FlowList>,
    available: AtomicBool,
    next_serial: AtomicU64,
    counters: LookupCounters,
}

impl HardwareTable {
    /// Checks the device behind `io` and sets up the slot pools.
    /// The number of exact slots must be a power of two.
    pub fn new(
        mut io: Box<RegisterIo>,
        table_id: u8,
        exact_slots: usize,
        wildcard_slots: usize,
    ) -> ::table::Result<HardwareTable> {
        assert!(wildcard_slots <= WILDCARD_MAX_SLOTS);
        match io.read(DEVICE_ID_REG) {
            Ok(DEVICE_ID) => {}
            Ok(id) => {
                error!("Unexpected flow table device id {:#x}", id);
                return Err(Error::DeviceUnavailable);
            }
            Err(e) => {
                error!("Cannot read the flow table device: {}", e);
                return Err(Error::DeviceUnavailable);
            }
        }
        info!(
            "Creating hardware table {} ({}) with {} exact and {} wildcard slots",
            NF2_NAME, table_id, exact_slots, wildcard_slots
        );
        Ok(HardwareTable {
            table_id: table_id,
            io: Mutex::new(io),
            pools: Mutex::new(Pools {
                exact: ExactPool::new(exact_slots),
                wildcard: WildcardPool::new(wildcard_slots),
            }),
            digests: KeyDigests::new(NF2_POLY_1, NF2_POLY_2),
            flows: Rcu::new(FlowList::new()),
            available: AtomicBool::new(true),
            next_serial: AtomicU64::new(0),
            counters: LookupCounters::default(),
        })
    }

    /// Checks if the device has not failed yet
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn device_failed(&self, e: &io::Error) {
        if self.available.swap(false, Ordering::AcqRel) {
            error!("Flow table device failed, refusing further flows: {}", e);
        }
    }

    fn plan(&self, key: &FlowKey, actions: &ActionList) -> ::table::Result<Plan> {
        if !key_supported(key) {
            return Err(Error::Unsupported);
        }
        let pool = if is_hw_exact(key) {
            Pool::Exact
        }
        else {
            Pool::Wildcard
        };
        let in_ports: Vec<Option<u16>> = if needs_port_expansion(key, actions) {
            (1..=NF2_PORTS).map(Some).collect()
        }
        else if key.wildcards().has(OFPFW_IN_PORT) {
            vec![None]
        }
        else {
            vec![Some(key.flow().in_port)]
        };
        let rows = in_ports
            .into_iter()
            .map(|in_port| {
                let hw = translate(actions, in_port)?;
                Ok(SlotRows {
                    entry: entry_row(key, in_port),
                    mask: mask_row(key, in_port),
                    action: action_row(&hw),
                })
            })
            .collect::<::table::Result<Vec<_>>>()?;
        Ok(Plan {
            pool: pool,
            rows: rows,
        })
    }

    fn reserve(&self, pools: &mut Pools, key: &FlowKey, plan: &Plan) -> ::table::Result<Vec<u32>> {
        match plan.pool {
            Pool::Exact => Ok(vec![pools.exact.place(self.digests.digests(key))?]),
            Pool::Wildcard if plan.rows.len() == 1 => Ok(vec![pools.wildcard.reserve()?]),
            Pool::Wildcard => pools.wildcard.reserve_contiguous(plan.rows.len()),
        }
    }

    /// Clears the slots of a flow that is being unlinked and gives them back.
    /// Slots that cannot be cleared are quarantined.
    fn retire(&self, io: &mut RegisterIo, pools: &mut Pools, flow: &FlowEntry) {
        let placement = match flow.private::<HwPlacement>() {
            Some(placement) => placement,
            None => return,
        };
        for slot in placement.slot_indices() {
            if !self.is_available() {
                pools.quarantine(placement.pool, slot);
                continue;
            }
            match clear_slot(io, placement.pool, slot) {
                Ok(()) => pools.release(placement.pool, slot),
                Err(e) => {
                    self.device_failed(&e);
                    pools.quarantine(placement.pool, slot);
                }
            }
        }
    }

    /// Rewrites the action rows of a flow's slots
    fn rewrite(&self, io: &mut RegisterIo, flow: &FlowEntry, plan: &Plan, now: Instant) -> io::Result<()> {
        let placement = match flow.private::<HwPlacement>() {
            Some(placement) => placement,
            None => return Ok(()),
        };
        if placement.pool == Pool::Wildcard {
            // a commit clears the slot counters, so take them first
            if harvest(io, flow)? > 0 {
                flow.touch(now);
            }
        }
        let mut slots = lock(&placement.slots);
        let indices: Vec<u32> = slots.iter().map(|slot| slot.index).collect();
        for (i, (slot, rows)) in slots.iter_mut().zip(&plan.rows).enumerate() {
            let written = match placement.pool {
                Pool::Exact => write_words(io, exact_action_reg(slot.index), &rows.action),
                Pool::Wildcard => write_slot(io, Pool::Wildcard, slot.index, rows).map(|counters| *slot = counters),
            };
            if let Err(e) = written {
                if i > 0 {
                    error!(
                        "{}: flow {} has new actions in slots {:?} but old ones in {:?}",
                        NF2_NAME,
                        flow,
                        &indices[..i],
                        &indices[i..]
                    );
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Table for HardwareTable {
    fn name(&self) -> &str {
        NF2_NAME
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn wildcards(&self) -> u32 {
        OFPFW_ALL & !(OFPFW_NW_TOS | OFPFW_DL_VLAN_PCP)
    }

    fn max_flows(&self) -> usize {
        let pools = lock(&self.pools);
        pools.exact.size() + pools.wildcard.size()
    }

    fn n_flows(&self) -> usize {
        self.flows.read().len()
    }

    fn counters(&self) -> &LookupCounters {
        &self.counters
    }

    /// Mirrors the hardware: exact rows take precedence over wildcard rows,
    /// which match in priority order.
    fn lookup(&self, key: &FlowKey) -> Option<Arc<FlowEntry>> {
        if !self.is_available() {
            return None;
        }
        let flows = self.flows.read();
        for pool in &[Pool::Exact, Pool::Wildcard] {
            let found = flows
                .by_priority()
                .iter()
                .find(|f| placement_pool(f) == Some(*pool) && matches_rule_wildcards(key, f.key()));
            if let Some(flow) = found {
                return Some(Arc::clone(flow));
            }
        }
        None
    }

    fn insert(&self, mut flow: FlowEntry) -> result::Result<(), Rejected> {
        if !self.is_available() {
            return Err(Rejected::new(flow, Error::DeviceUnavailable));
        }
        let plan = match self.plan(flow.key(), &flow.actions()) {
            Ok(plan) => plan,
            Err(e) => {
                debug!("{}: cannot take flow {}: {}", NF2_NAME, flow, e);
                return Err(Rejected::new(flow, e));
            }
        };
        flow.set_table_id(self.table_id);

        let flows = self.flows.read();
        let old = flows.find_identical(&flow).cloned();
        let mut pools = lock(&self.pools);
        let mut io = lock(&self.io);

        // an identical flow with the same slot shape is rewritten in place
        let reused = old
            .as_ref()
            .and_then(|o| o.private::<HwPlacement>())
            .filter(|p| p.pool == plan.pool && p.n_slots() == plan.rows.len())
            .map(HwPlacement::slot_indices);
        let slots = match reused {
            Some(ref slots) => slots.clone(),
            None => match self.reserve(&mut pools, flow.key(), &plan) {
                Ok(slots) => slots,
                Err(e) => {
                    debug!("{}: no slot for flow {}: {}", NF2_NAME, flow, e);
                    return Err(Rejected::new(flow, e));
                }
            },
        };

        let mut written = Vec::with_capacity(slots.len());
        for (&slot, rows) in slots.iter().zip(&plan.rows) {
            match write_slot(&mut **io, plan.pool, slot, rows) {
                Ok(counters) => written.push(counters),
                Err(e) => {
                    self.device_failed(&e);
                    if reused.is_none() {
                        for &slot in &slots {
                            pools.quarantine(plan.pool, slot);
                        }
                    }
                    return Err(Rejected::new(flow, Error::DeviceUnavailable));
                }
            }
        }
        debug!("{}: {:?} slots {:?} for flow {}", NF2_NAME, plan.pool, slots, flow);
        flow.set_private(HwPlacement {
            pool: plan.pool,
            slots: Mutex::new(written),
        });

        match old {
            Some(old) => {
                flow.set_serial(old.serial());
                if reused.is_none() {
                    self.retire(&mut **io, &mut pools, &old);
                }
                self.flows.publish(flows.with_replaced(&old, Arc::new(flow)));
            }
            None => {
                flow.set_serial(self.next_serial.fetch_add(1, Ordering::Relaxed));
                self.flows.publish(flows.with_inserted(Arc::new(flow)));
            }
        }
        Ok(())
    }

    fn has_conflict(&self, key: &FlowKey, priority: u16) -> bool {
        self.flows
            .read()
            .by_serial()
            .iter()
            .any(|f| conflicts(f, key, priority))
    }

    /// Either every selected flow takes the new actions or none does
    fn modify(
        &self,
        key: &FlowKey,
        priority: u16,
        strict: bool,
        actions: &ActionList,
        now: Instant,
    ) -> usize {
        if !self.is_available() {
            return 0;
        }
        let flows = self.flows.read();
        let selected: Vec<&Arc<FlowEntry>> = flows
            .by_serial()
            .iter()
            .filter(|f| is_selected(f, key, OFPP_NONE, priority, strict))
            .collect();

        let mut plans = Vec::with_capacity(selected.len());
        for flow in &selected {
            let n_slots = flow.private::<HwPlacement>().map_or(0, HwPlacement::n_slots);
            match self.plan(flow.key(), actions) {
                Ok(ref plan) if plan.rows.len() != n_slots => {
                    debug!("{}: new actions need other slots for flow {}", NF2_NAME, flow);
                    return 0;
                }
                Ok(plan) => plans.push(plan),
                Err(e) => {
                    debug!("{}: cannot modify flow {}: {}", NF2_NAME, flow, e);
                    return 0;
                }
            }
        }

        let mut io = lock(&self.io);
        let mut count = 0;
        for (flow, plan) in selected.iter().zip(&plans) {
            if let Err(e) = self.rewrite(&mut **io, flow, plan, now) {
                self.device_failed(&e);
                let stale: Vec<u64> = selected[count..].iter().map(|f| f.serial()).collect();
                error!("{}: modify stopped after {} flows, flows {:?} keep their old actions", NF2_NAME, count, stale);
                break;
            }
            flow.replace_actions(actions.clone());
            count += 1;
        }
        count
    }

    fn delete(
        &self,
        key: &FlowKey,
        out_port: u16,
        priority: u16,
        strict: bool,
        sink: &RemovalSink,
        now: Instant,
    ) -> usize {
        let flows = self.flows.read();
        let doomed: Vec<_> = flows
            .by_serial()
            .iter()
            .filter(|f| is_selected(f, key, out_port, priority, strict))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut pools = lock(&self.pools);
        let mut io = lock(&self.io);
        for flow in &doomed {
            if self.is_available() {
                if let Err(e) = harvest(&mut **io, flow) {
                    self.device_failed(&e);
                }
            }
            sink.flow_removed(flow, OfpFlowRemovedReason::Delete, now);
            self.retire(&mut **io, &mut pools, flow);
        }
        self.flows.publish(flows.without(&doomed));
        debug!("{}: deleted {} flows", NF2_NAME, doomed.len());
        doomed.len()
    }

    fn timeout(&self, now: Instant, sink: &RemovalSink) -> usize {
        let flows = self.flows.read();
        let mut pools = lock(&self.pools);
        let mut io = lock(&self.io);

        if self.is_available() {
            for flow in flows.by_serial() {
                match harvest(&mut **io, flow) {
                    Ok(0) => {}
                    Ok(_) => flow.touch(now),
                    Err(e) => {
                        self.device_failed(&e);
                        break;
                    }
                }
            }
        }

        let gone = expired(&flows, now, sink);
        if !gone.is_empty() {
            for flow in &gone {
                self.retire(&mut **io, &mut pools, flow);
            }
            self.flows.publish(flows.without(&gone));
        }
        gone.len()
    }

    fn iterate(
        &self,
        key: &FlowKey,
        out_port: u16,
        cursor: IterCursor,
        visit: &mut FnMut(&Arc<FlowEntry>) -> Visit,
    ) -> Iteration {
        let flows = self.flows.read();
        iterate_serial(flows.by_serial(), key, out_port, cursor, visit)
    }
}
