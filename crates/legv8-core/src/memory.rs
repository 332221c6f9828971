//! Flat little-endian data memory with bounds and natural-alignment policy.

use std::fmt;

use crate::Fault;

/// Default data memory capacity in bytes.
pub const DEFAULT_MEMORY_BYTES: usize = 4096;

/// Access widths supported by the load/store unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessSize {
    /// 1 byte.
    Byte,
    /// 2 bytes.
    Half,
    /// 4 bytes.
    Word,
    /// 8 bytes.
    Double,
}

impl AccessSize {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
            Self::Double => 8,
        }
    }

    /// Access width implied by a load/store mnemonic.
    #[must_use]
    pub fn for_mnemonic(mnemonic: &str) -> Self {
        let upper = mnemonic.to_ascii_uppercase();
        match upper.as_str() {
            "LDURSW" | "STURW" => Self::Word,
            "LDURH" | "STURH" => Self::Half,
            "LDURB" | "STURB" => Self::Byte,
            _ => Self::Double,
        }
    }
}

impl fmt::Display for AccessSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// Byte-addressable data memory of fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BYTES)
    }
}

impl Memory {
    /// Allocates zeroed memory of `capacity` bytes, rounded down to whole doublewords.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity - capacity % AccessSize::Double.bytes();
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
        }
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Validates an access and returns its start offset.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::MemoryOutOfBounds`] when the access leaves
    /// `0..capacity` and [`Fault::MemoryMisaligned`] when `address` is not a
    /// multiple of the access width.
    pub fn validate(&self, address: i64, size: AccessSize) -> Result<usize, Fault> {
        let width = size.bytes();
        let out_of_bounds = Fault::MemoryOutOfBounds {
            address,
            size: width,
        };
        let start = usize::try_from(address).map_err(|_| out_of_bounds.clone())?;
        match start.checked_add(width) {
            Some(end) if end <= self.bytes.len() => {}
            _ => return Err(out_of_bounds),
        }
        if start % width != 0 {
            return Err(Fault::MemoryMisaligned {
                address,
                size: width,
            });
        }
        Ok(start)
    }

    /// Loads `size` bytes at `address`, sign- or zero-extending to 64 bits.
    ///
    /// # Errors
    ///
    /// Propagates [`Memory::validate`] faults.
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    pub fn load(&self, address: i64, size: AccessSize, signed: bool) -> Result<i64, Fault> {
        let start = self.validate(address, size)?;
        let width = size.bytes();
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(&self.bytes[start..start + width]);
        let value = u64::from_le_bytes(raw);
        if signed && width < 8 {
            let shift = 64 - 8 * width as u32;
            Ok(((value << shift) as i64) >> shift)
        } else {
            Ok(value as i64)
        }
    }

    /// Stores the low `size` bytes of `value` at `address`.
    ///
    /// # Errors
    ///
    /// Propagates [`Memory::validate`] faults; nothing is written on failure.
    pub fn store(&mut self, address: i64, value: i64, size: AccessSize) -> Result<(), Fault> {
        let start = self.validate(address, size)?;
        let width = size.bytes();
        self.bytes[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(())
    }

    /// Non-zero 8-byte-aligned doublewords as `(address, value)` pairs.
    #[must_use]
    pub fn doublewords(&self) -> Vec<(u64, i64)> {
        self.bytes
            .chunks_exact(8)
            .zip((0u64..).step_by(8))
            .filter_map(|(chunk, address)| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                let value = i64::from_le_bytes(raw);
                (value != 0).then_some((address, value))
            })
            .collect()
    }

    /// Zeroes memory and writes back the given doublewords.
    ///
    /// Entries that no longer fit the capacity are dropped.
    pub fn restore(&mut self, doublewords: &[(u64, i64)]) {
        self.clear();
        for &(address, value) in doublewords {
            let Ok(address) = i64::try_from(address) else {
                continue;
            };
            if self.store(address, value, AccessSize::Double).is_err() {
                tracing::warn!(address, "dropping snapshot doubleword outside memory");
            }
        }
    }

    /// Zeroes every byte.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessSize, Memory, DEFAULT_MEMORY_BYTES};
    use crate::Fault;

    #[test]
    fn default_capacity_is_zeroed() {
        let memory = Memory::default();
        assert_eq!(memory.capacity(), DEFAULT_MEMORY_BYTES);
        assert!(memory.doublewords().is_empty());
    }

    #[test]
    fn stores_are_little_endian() {
        let mut memory = Memory::new(64);
        memory
            .store(8, 0x0102_0304_0506_0708, AccessSize::Double)
            .expect("aligned");
        assert_eq!(memory.load(8, AccessSize::Byte, false), Ok(0x08));
        assert_eq!(memory.load(8, AccessSize::Half, false), Ok(0x0708));
        assert_eq!(memory.load(12, AccessSize::Word, false), Ok(0x0102_0304));
        assert_eq!(memory.doublewords(), vec![(8, 0x0102_0304_0506_0708)]);
    }

    #[test]
    fn signed_word_load_extends() {
        let mut memory = Memory::new(16);
        memory.store(4, -2, AccessSize::Word).expect("aligned");
        assert_eq!(memory.load(4, AccessSize::Word, true), Ok(-2));
        assert_eq!(memory.load(4, AccessSize::Word, false), Ok(0xFFFF_FFFE));
    }

    #[test]
    fn bounds_and_alignment_are_enforced() {
        let mut memory = Memory::new(16);
        assert_eq!(
            memory.load(-8, AccessSize::Double, false),
            Err(Fault::MemoryOutOfBounds {
                address: -8,
                size: 8
            })
        );
        assert_eq!(
            memory.store(16, 1, AccessSize::Double),
            Err(Fault::MemoryOutOfBounds {
                address: 16,
                size: 8
            })
        );
        assert_eq!(
            memory.store(4, 1, AccessSize::Double),
            Err(Fault::MemoryMisaligned {
                address: 4,
                size: 8
            })
        );
        assert_eq!(memory.load(3, AccessSize::Byte, false), Ok(0));
        assert!(memory.doublewords().is_empty());
    }

    #[test]
    fn restore_replaces_contents() {
        let mut memory = Memory::new(32);
        memory.store(0, 5, AccessSize::Double).expect("aligned");
        memory.restore(&[(16, 9), (64, 1)]);
        assert_eq!(memory.doublewords(), vec![(16, 9)]);
    }

    #[test]
    fn capacity_rounds_down_to_doublewords() {
        assert_eq!(Memory::new(20).capacity(), 16);
        assert_eq!(Memory::new(7).capacity(), 0);
    }

    #[test]
    fn access_size_from_mnemonic() {
        assert_eq!(AccessSize::for_mnemonic("ldur"), AccessSize::Double);
        assert_eq!(AccessSize::for_mnemonic("LDURSW"), AccessSize::Word);
        assert_eq!(AccessSize::for_mnemonic("STURH"), AccessSize::Half);
        assert_eq!(AccessSize::for_mnemonic("STURB"), AccessSize::Byte);
    }
}
