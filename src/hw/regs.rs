/*!
The register map of the NetFPGA OpenFlow datapath and the transport to it.

All registers are 32 bits wide and byte addressed.

| Address                   | Register                                      |
|---------------------------|-----------------------------------------------|
| `0x0000`                  | device id                                     |
| `0x0100..0x0120`          | wildcard compare row (staged)                 |
| `0x0120..0x0140`          | wildcard mask row (staged)                    |
| `0x0140..0x0168`          | wildcard action row (staged)                  |
| `0x0170`                  | wildcard write address, commits the staging   |
| `0x1000 + 4 * slot`       | wildcard packet counter                       |
| `0x2000 + 4 * slot`       | wildcard byte counter                         |
| `0x10_0000 + 0x80 * slot` | exact SRAM row: entry, action, pkts, bytes    |
*/

use hw::layout::{ACTION_WORDS, ENTRY_WORDS};
use sync::lock;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

pub const DEVICE_ID_REG: u32 = 0x0000;
/// The id an OpenFlow datapath bitstream reports
pub const DEVICE_ID: u32 = 0x4f46_3130;

pub const WILDCARD_CMP_BASE: u32 = 0x0100;
pub const WILDCARD_MASK_BASE: u32 = 0x0120;
pub const WILDCARD_ACTION_BASE: u32 = 0x0140;
pub const WILDCARD_WRITE_ADDR: u32 = 0x0170;
pub const WILDCARD_PKTS_BASE: u32 = 0x1000;
pub const WILDCARD_BYTES_BASE: u32 = 0x2000;
/// Number of wildcard slots the counter banks can address
pub const WILDCARD_MAX_SLOTS: usize = 1024;

pub const EXACT_BASE: u32 = 0x10_0000;
pub const EXACT_ROW_STRIDE: u32 = 0x80;
const EXACT_ACTION_WORD: u32 = ENTRY_WORDS as u32;
const EXACT_PKTS_WORD: u32 = EXACT_ACTION_WORD + ACTION_WORDS as u32;
const EXACT_BYTES_WORD: u32 = EXACT_PKTS_WORD + 1;

/// Access to the device registers
pub trait RegisterIo: Send {
    fn read(&mut self, addr: u32) -> io::Result<u32>;
    fn write(&mut self, addr: u32, value: u32) -> io::Result<()>;
}

pub fn wildcard_pkts_reg(slot: u32) -> u32 {
    WILDCARD_PKTS_BASE + 4 * slot
}

pub fn wildcard_bytes_reg(slot: u32) -> u32 {
    WILDCARD_BYTES_BASE + 4 * slot
}

pub fn exact_entry_reg(slot: u32) -> u32 {
    EXACT_BASE + EXACT_ROW_STRIDE * slot
}

pub fn exact_action_reg(slot: u32) -> u32 {
    exact_entry_reg(slot) + 4 * EXACT_ACTION_WORD
}

pub fn exact_pkts_reg(slot: u32) -> u32 {
    exact_entry_reg(slot) + 4 * EXACT_PKTS_WORD
}

pub fn exact_bytes_reg(slot: u32) -> u32 {
    exact_entry_reg(slot) + 4 * EXACT_BYTES_WORD
}

/// Writes consecutive words starting at `base`
pub fn write_words(io: &mut RegisterIo, base: u32, words: &[u32]) -> io::Result<()> {
    for (i, word) in words.iter().enumerate() {
        io.write(base + 4 * i as u32, *word)?;
    }
    Ok(())
}

#[derive(Debug)]
struct DeviceState {
    present: bool,
    regs: HashMap<u32, u32>,
    /// Committed wildcard rows: compare, mask and action words
    wildcard_rows: HashMap<u32, Vec<u32>>,
}

/// An in-memory register file behaving like the datapath's register map.
/// Clones share the same registers.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    pub fn new() -> SimulatedDevice {
        let mut regs = HashMap::new();
        regs.insert(DEVICE_ID_REG, DEVICE_ID);
        SimulatedDevice {
            state: Arc::new(Mutex::new(DeviceState {
                present: true,
                regs: regs,
                wildcard_rows: HashMap::new(),
            })),
        }
    }

    /// Makes all further accesses fail or succeed again
    pub fn set_present(&self, present: bool) {
        lock(&self.state).present = present;
    }

    /// Sets a register without going through the transport
    pub fn poke(&self, addr: u32, value: u32) {
        lock(&self.state).regs.insert(addr, value);
    }

    /// Reads a register without going through the transport
    pub fn peek(&self, addr: u32) -> u32 {
        lock(&self.state).regs.get(&addr).cloned().unwrap_or(0)
    }

    /// Gets the committed compare, mask and action words of a wildcard slot
    pub fn wildcard_row(&self, slot: u32) -> Option<Vec<u32>> {
        lock(&self.state).wildcard_rows.get(&slot).cloned()
    }

    fn commit(state: &mut DeviceState, slot: u32) {
        let staged = (0..(2 * ENTRY_WORDS + ACTION_WORDS) as u32)
            .map(|i| state.regs.get(&(WILDCARD_CMP_BASE + 4 * i)).cloned().unwrap_or(0))
            .collect();
        state.wildcard_rows.insert(slot, staged);
        state.regs.insert(wildcard_pkts_reg(slot), 0);
        state.regs.insert(wildcard_bytes_reg(slot), 0);
    }
}

impl RegisterIo for SimulatedDevice {
    fn read(&mut self, addr: u32) -> io::Result<u32> {
        let state = lock(&self.state);
        if !state.present {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device removed"));
        }
        Ok(state.regs.get(&addr).cloned().unwrap_or(0))
    }

    fn write(&mut self, addr: u32, value: u32) -> io::Result<()> {
        let mut state = lock(&self.state);
        if !state.present {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device removed"));
        }
        state.regs.insert(addr, value);
        if addr == WILDCARD_WRITE_ADDR {
            SimulatedDevice::commit(&mut state, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_row_addresses() {
        assert_eq!(0x10_0080, exact_entry_reg(1));
        assert_eq!(0x10_00a0, exact_action_reg(1));
        assert_eq!(0x10_00c8, exact_pkts_reg(1));
        assert_eq!(0x10_00cc, exact_bytes_reg(1));
    }

    #[test]
    fn staging_ranges_do_not_overlap() {
        assert_eq!(WILDCARD_MASK_BASE, WILDCARD_CMP_BASE + 4 * ENTRY_WORDS as u32);
        assert_eq!(WILDCARD_ACTION_BASE, WILDCARD_MASK_BASE + 4 * ENTRY_WORDS as u32);
        assert!(WILDCARD_ACTION_BASE + 4 * ACTION_WORDS as u32 <= WILDCARD_WRITE_ADDR);
        assert!(wildcard_pkts_reg(WILDCARD_MAX_SLOTS as u32 - 1) < WILDCARD_BYTES_BASE);
    }

    #[test]
    fn commit_copies_staging_and_clears_counters() {
        let mut dev = SimulatedDevice::new();
        dev.poke(wildcard_pkts_reg(3), 17);
        write_words(&mut dev, WILDCARD_CMP_BASE, &[1; ENTRY_WORDS]).unwrap();
        write_words(&mut dev, WILDCARD_ACTION_BASE, &[9; ACTION_WORDS]).unwrap();
        dev.write(WILDCARD_WRITE_ADDR, 3).unwrap();
        let row = dev.wildcard_row(3).unwrap();
        assert_eq!(2 * ENTRY_WORDS + ACTION_WORDS, row.len());
        assert_eq!(1, row[0]);
        assert_eq!(0, row[ENTRY_WORDS]);
        assert_eq!(9, row[2 * ENTRY_WORDS]);
        assert_eq!(0, dev.peek(wildcard_pkts_reg(3)));
    }

    #[test]
    fn removed_device_fails() {
        let mut dev = SimulatedDevice::new();
        assert_eq!(DEVICE_ID, dev.read(DEVICE_ID_REG).unwrap());
        dev.clone().set_present(false);
        assert!(dev.read(DEVICE_ID_REG).is_err());
        assert!(dev.write(0x100, 1).is_err());
    }
}
