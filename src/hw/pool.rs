/*!
Slot allocation for the exact-match SRAM and the wildcard TCAM.
*/

use table::Error;

use std::collections::BTreeSet;

/// The hardware memory a flow is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Exact,
    Wildcard,
}

/// Exact-match rows, indexed by either of two hash digests
#[derive(Debug)]
pub struct ExactPool {
    occupied: Vec<bool>,
    quarantined: usize,
}

impl ExactPool {
    /// Constructs a pool of `size` rows, which must be a power of two
    pub fn new(size: usize) -> ExactPool {
        assert!(size.is_power_of_two(), "exact pool size {} is not a power of two", size);
        ExactPool {
            occupied: vec![false; size],
            quarantined: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.occupied.len()
    }

    pub fn n_used(&self) -> usize {
        self.occupied.iter().filter(|o| **o).count() - self.quarantined
    }

    /// Gets the two candidate rows of a pair of digests
    pub fn candidates(&self, (d1, d2): (u32, u32)) -> (u32, u32) {
        let mask = self.occupied.len() as u32 - 1;
        (d1 & mask, d2 & mask)
    }

    /// Occupies the first free candidate row
    pub fn place(&mut self, digests: (u32, u32)) -> Result<u32, Error> {
        let (first, second) = self.candidates(digests);
        for &slot in &[first, second] {
            if !self.occupied[slot as usize] {
                self.occupied[slot as usize] = true;
                return Ok(slot);
            }
        }
        Err(Error::Collision)
    }

    pub fn release(&mut self, slot: u32) {
        assert!(self.occupied[slot as usize], "exact slot {} is not in use", slot);
        self.occupied[slot as usize] = false;
    }

    /// Keeps a row whose contents are unknown out of use for good
    pub fn quarantine(&mut self, slot: u32) {
        warn!("Quarantining exact slot {}", slot);
        self.quarantined += 1;
    }
}

/// Wildcard rows, handed out lowest index first
#[derive(Debug)]
pub struct WildcardPool {
    size: usize,
    free: BTreeSet<u32>,
    quarantined: usize,
}

impl WildcardPool {
    pub fn new(size: usize) -> WildcardPool {
        WildcardPool {
            size: size,
            free: (0..size as u32).collect(),
            quarantined: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_used(&self) -> usize {
        self.size - self.free.len() - self.quarantined
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    /// Takes the lowest free slot
    pub fn reserve(&mut self) -> Result<u32, Error> {
        let slot = *self.free.iter().next().ok_or(Error::Full)?;
        self.free.remove(&slot);
        Ok(slot)
    }

    /// Takes the lowest run of `n` consecutive free slots. A run that cannot
    /// be completed gives its slots back before the next start is tried.
    pub fn reserve_contiguous(&mut self, n: usize) -> Result<Vec<u32>, Error> {
        let starts: Vec<u32> = self.free.iter().cloned().collect();
        for start in starts {
            let mut run = Vec::with_capacity(n);
            for slot in start..start + n as u32 {
                if !self.free.remove(&slot) {
                    break;
                }
                run.push(slot);
            }
            if run.len() == n {
                return Ok(run);
            }
            for slot in run {
                self.free.insert(slot);
            }
        }
        Err(Error::Full)
    }

    pub fn release(&mut self, slot: u32) {
        let was_used = self.free.insert(slot);
        assert!((slot as usize) < self.size && was_used, "wildcard slot {} is not in use", slot);
    }

    /// Keeps a slot whose contents are unknown out of use for good
    pub fn quarantine(&mut self, slot: u32) {
        warn!("Quarantining wildcard slot {}", slot);
        self.quarantined += 1;
    }
}
