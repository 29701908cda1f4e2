/*!
CRC-32 digests of flow keys for the double-hash tables.

The hash tables in software and in the NetFPGA exact-match pool index their
slots with two CRC-32s of different polynomials over the key's canonical
image, followed by the VLAN PCP byte. The hardware computes a plain MSB-first CRC (zero initial value, no
final xor), so this is a table-driven implementation of exactly that
variant with the polynomial as a parameter.
*/

use flow::FlowKey;

/// Polynomial of the first software hash table (CRC-32C, Castagnoli).
pub const HASH2_POLY_1: u32 = 0x1EDC_6F41;
/// Polynomial of the second software hash table (Koopman).
pub const HASH2_POLY_2: u32 = 0x741B_8CD7;

/// Polynomial of the first hardware hash unit (IEEE 802.3).
pub const NF2_POLY_1: u32 = 0x04C1_1DB7;
/// Polynomial of the second hardware hash unit (CRC-32C, Castagnoli).
pub const NF2_POLY_2: u32 = 0x1EDC_6F41;

/// A CRC-32 calculator for one polynomial.
pub struct Crc32 {
    table: [u32; 256],
}

impl Crc32 {
    /// Precomputes the lookup table for `polynomial` (normal representation).
    pub fn new(polynomial: u32) -> Crc32 {
        let mut table = [0; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut reg = (i as u32) << 24;
            for _ in 0..8 {
                let top_bit = reg & 0x8000_0000 != 0;
                reg <<= 1;
                if top_bit {
                    reg ^= polynomial;
                }
            }
            *slot = reg;
        }
        Crc32 { table: table }
    }

    /// Calculates the CRC of `data`
    pub fn calculate(&self, data: &[u8]) -> u32 {
        self.extend(0, data)
    }

    /// Continues the calculation of `crc` over `data`
    pub fn extend(&self, crc: u32, data: &[u8]) -> u32 {
        data.iter().fold(crc, |crc, &byte| {
            (crc << 8) ^ self.table[((crc >> 24) as u8 ^ byte) as usize]
        })
    }
}

/// The pair of hash functions of a double-hash table.
pub struct KeyDigests {
    first: Crc32,
    second: Crc32,
}

impl KeyDigests {
    /// Constructs the two hash functions from two distinct polynomials
    pub fn new(poly1: u32, poly2: u32) -> KeyDigests {
        assert!(poly1 != poly2, "double hashing needs two distinct polynomials");
        KeyDigests {
            first: Crc32::new(poly1),
            second: Crc32::new(poly2),
        }
    }

    /// Computes both digests of `key`
    pub fn digests(&self, key: &FlowKey) -> (u32, u32) {
        let image = key.image();
        let pcp = [key.flow().dl_vlan_pcp];
        let digest = |crc: &Crc32| crc.extend(crc.calculate(&image), &pcp);
        (digest(&self.first), digest(&self.second))
    }
}
