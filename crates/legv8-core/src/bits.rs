//! Fixed-width field extraction and insertion on 32-bit instruction words.

use crate::Fault;

/// Highest valid bit index in an instruction word.
pub const WORD_TOP_BIT: u32 = 31;

const fn field_mask(low: u32, high: u32) -> u32 {
    let width = high - low + 1;
    if width == 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

const fn is_valid_range(low: u32, high: u32) -> bool {
    low <= high && high <= WORD_TOP_BIT
}

/// Returns the unsigned value formed by bits `low..=high` of `word`.
///
/// # Errors
///
/// Returns [`Fault::InvalidRange`] when `low > high` or `high > 31`.
pub fn extract_bits(word: u32, low: u32, high: u32) -> Result<u32, Fault> {
    if is_valid_range(low, high) {
        Ok((word >> low) & field_mask(low, high))
    } else {
        Err(Fault::InvalidRange { low, high })
    }
}

/// Writes `value`, truncated to the field width, into bits `low..=high` of `word`.
///
/// # Errors
///
/// Returns [`Fault::InvalidRange`] when `low > high` or `high > 31`.
pub fn set_bits(word: u32, value: u32, low: u32, high: u32) -> Result<u32, Fault> {
    if is_valid_range(low, high) {
        let mask = field_mask(low, high);
        Ok((word & !(mask << low)) | ((value & mask) << low))
    } else {
        Err(Fault::InvalidRange { low, high })
    }
}

/// Sign-extends the low `width` bits of `value` to 64 bits.
#[must_use]
pub const fn sign_extend(value: u32, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value as i64) << shift) >> shift
}

/// An inclusive bit range inside an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitRange {
    /// Low bit index.
    pub low: u32,
    /// High bit index.
    pub high: u32,
}

impl BitRange {
    /// Creates a range; validity is checked on use.
    #[must_use]
    pub const fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Number of bits covered.
    #[must_use]
    pub const fn width(self) -> u32 {
        self.high - self.low + 1
    }

    /// Extracts this field from `word`.
    ///
    /// Invalid ranges read as zero.
    #[must_use]
    pub const fn get(self, word: u32) -> u32 {
        if is_valid_range(self.low, self.high) {
            (word >> self.low) & field_mask(self.low, self.high)
        } else {
            0
        }
    }

    /// Inserts `value` into this field of `word`; invalid ranges leave it unchanged.
    #[must_use]
    pub const fn put(self, word: u32, value: u32) -> u32 {
        if is_valid_range(self.low, self.high) {
            let mask = field_mask(self.low, self.high);
            (word & !(mask << self.low)) | ((value & mask) << self.low)
        } else {
            word
        }
    }
}
