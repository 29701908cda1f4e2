/*!
Harvesting of the 32 bit hardware counters into 64 bit flow counters.
*/

/// Computes how far a wrapping 32 bit counter moved from `last` to `now`
pub fn counter_delta(last: u32, now: u32) -> u64 {
    if now >= last {
        u64::from(now - last)
    }
    else {
        (1 << 32) - u64::from(last) + u64::from(now)
    }
}

/// The last counter readings of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCounters {
    pub index: u32,
    last_pkts: u32,
    last_bytes: u32,
}

impl SlotCounters {
    /// Starts from the readings taken right after the slot was written
    pub fn new(index: u32, pkts: u32, bytes: u32) -> SlotCounters {
        SlotCounters {
            index: index,
            last_pkts: pkts,
            last_bytes: bytes,
        }
    }

    /// Takes new readings and returns the packet and byte deltas
    pub fn advance(&mut self, pkts: u32, bytes: u32) -> (u64, u64) {
        let delta = (
            counter_delta(self.last_pkts, pkts),
            counter_delta(self.last_bytes, bytes),
        );
        self.last_pkts = pkts;
        self.last_bytes = bytes;
        delta
    }
}
