//! 64-bit arithmetic logic unit with N/Z/C/V flag semantics.

use std::fmt;
use std::str::FromStr;

use crate::Fault;

/// Condition flags produced by the ALU and held by the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Flags {
    /// Result was negative.
    pub negative: bool,
    /// Result was zero.
    pub zero: bool,
    /// Unsigned carry out (add) or no borrow (sub).
    pub carry: bool,
    /// Signed overflow.
    pub overflow: bool,
}

impl Flags {
    /// All flags cleared.
    pub const CLEAR: Self = Self {
        negative: false,
        zero: false,
        carry: false,
        overflow: false,
    };
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |set: bool, name: char| if set { name } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            bit(self.negative, 'N'),
            bit(self.zero, 'Z'),
            bit(self.carry, 'C'),
            bit(self.overflow, 'V')
        )
    }
}

/// Value and flags produced by one ALU evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AluResult {
    /// Two's-complement 64-bit result.
    pub value: i64,
    /// Flags derived from the result.
    pub flags: Flags,
}

/// Operation selector understood by the ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AluOperation {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Orr,
    /// Bitwise exclusive OR.
    Eor,
    /// Low 64 bits of the product.
    Mul,
    /// High 64 bits of the signed 128-bit product.
    Smulh,
    /// High 64 bits of the unsigned 128-bit product.
    Umulh,
    /// Signed truncating division.
    Sdiv,
    /// Unsigned division.
    Udiv,
    /// Logical shift left.
    Lsl,
    /// Logical shift right.
    Lsr,
    /// Arithmetic shift right.
    Asr,
    /// Second operand passes through unchanged.
    Pass,
}

impl AluOperation {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::And => "AND",
            Self::Orr => "ORR",
            Self::Eor => "EOR",
            Self::Mul => "MUL",
            Self::Smulh => "SMULH",
            Self::Umulh => "UMULH",
            Self::Sdiv => "SDIV",
            Self::Udiv => "UDIV",
            Self::Lsl => "LSL",
            Self::Lsr => "LSR",
            Self::Asr => "ASR",
            Self::Pass => "PASS",
        }
    }

    /// Returns true for shifts, whose second operand comes from `shamt`.
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Lsl | Self::Lsr | Self::Asr)
    }
}

impl fmt::Display for AluOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AluOperation {
    type Err = Fault;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let operation = match tag.trim().to_ascii_uppercase().as_str() {
            "ADD" | "ADDS" => Self::Add,
            "SUB" | "SUBS" | "CMP" => Self::Sub,
            "AND" | "ANDS" => Self::And,
            "ORR" => Self::Orr,
            "EOR" => Self::Eor,
            "MUL" => Self::Mul,
            "SMULH" => Self::Smulh,
            "UMULH" => Self::Umulh,
            "SDIV" => Self::Sdiv,
            "UDIV" => Self::Udiv,
            "LSL" => Self::Lsl,
            "LSR" => Self::Lsr,
            "ASR" => Self::Asr,
            "PASS" => Self::Pass,
            _ => return Err(Fault::UnsupportedOperation(tag.to_string())),
        };
        Ok(operation)
    }
}

const fn nz(value: i64) -> Flags {
    Flags {
        negative: value < 0,
        zero: value == 0,
        carry: false,
        overflow: false,
    }
}

/// Evaluates `operation` on `a` and `b`.
///
/// # Errors
///
/// Returns [`Fault::DivisionByZero`] for `SDIV`/`UDIV` with `b == 0`.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub fn execute(a: i64, b: i64, operation: AluOperation) -> Result<AluResult, Fault> {
    let value = match operation {
        AluOperation::Add => {
            let (sum, carry) = (a as u64).overflowing_add(b as u64);
            let value = sum as i64;
            let overflow = (a < 0) == (b < 0) && (value < 0) != (a < 0);
            return Ok(with_carry(value, carry, overflow));
        }
        AluOperation::Sub => {
            let value = a.wrapping_sub(b);
            let carry = (a as u64) >= (b as u64);
            let overflow = (a < 0) != (b < 0) && (value < 0) == (b < 0);
            return Ok(with_carry(value, carry, overflow));
        }
        AluOperation::And => a & b,
        AluOperation::Orr => a | b,
        AluOperation::Eor => a ^ b,
        AluOperation::Mul => a.wrapping_mul(b),
        AluOperation::Smulh => ((i128::from(a) * i128::from(b)) >> 64) as i64,
        AluOperation::Umulh => ((u128::from(a as u64) * u128::from(b as u64)) >> 64) as i64,
        AluOperation::Sdiv => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            a.wrapping_div(b)
        }
        AluOperation::Udiv => {
            if b == 0 {
                return Err(Fault::DivisionByZero);
            }
            ((a as u64) / (b as u64)) as i64
        }
        AluOperation::Lsl => ((a as u64) << (b & 63)) as i64,
        AluOperation::Lsr => ((a as u64) >> (b & 63)) as i64,
        AluOperation::Asr => a >> (b & 63),
        AluOperation::Pass => b,
    };
    Ok(AluResult {
        value,
        flags: nz(value),
    })
}

const fn with_carry(value: i64, carry: bool, overflow: bool) -> AluResult {
    AluResult {
        value,
        flags: Flags {
            carry,
            overflow,
            ..nz(value)
        },
    }
}

/// Evaluates an operation named by a textual selector such as `"ADDS"`.
///
/// # Errors
///
/// Returns [`Fault::UnsupportedOperation`] for unknown names and propagates
/// [`execute`] faults.
pub fn execute_tag(a: i64, b: i64, tag: &str) -> Result<AluResult, Fault> {
    execute(a, b, tag.parse()?)
}
