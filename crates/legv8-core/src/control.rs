//! Control unit: signal lookup, operand routing and branch-condition evaluation.

use std::fmt;

use crate::alu::Flags;
use crate::decoder::{Instruction, InstructionFields, Register};
use crate::isa::{ControlSignals, Format};
use crate::Fault;

/// Condition codes carried in the `rt` field of `B.cond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Condition {
    Eq,
    Ne,
    Hs,
    Lo,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
    Nv,
}

impl Condition {
    /// Every condition in encoding order.
    pub const ALL: [Self; 16] = [
        Self::Eq,
        Self::Ne,
        Self::Hs,
        Self::Lo,
        Self::Mi,
        Self::Pl,
        Self::Vs,
        Self::Vc,
        Self::Hi,
        Self::Ls,
        Self::Ge,
        Self::Lt,
        Self::Gt,
        Self::Le,
        Self::Al,
        Self::Nv,
    ];

    /// Decodes a 4-bit condition field.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        if (code as usize) < Self::ALL.len() {
            Some(Self::ALL[code as usize])
        } else {
            None
        }
    }

    /// 4-bit encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Upper-case suffix used after `B.`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Hs => "HS",
            Self::Lo => "LO",
            Self::Mi => "MI",
            Self::Pl => "PL",
            Self::Vs => "VS",
            Self::Vc => "VC",
            Self::Hi => "HI",
            Self::Ls => "LS",
            Self::Ge => "GE",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::Le => "LE",
            Self::Al => "AL",
            Self::Nv => "NV",
        }
    }

    /// Parses a condition suffix, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|condition| condition.name().eq_ignore_ascii_case(name))
    }

    /// Evaluates the condition against `flags`.
    ///
    /// Returns `None` for `NV`, which this machine leaves unassigned.
    #[must_use]
    pub const fn evaluate(self, flags: Flags) -> Option<bool> {
        let Flags {
            negative: n,
            zero: z,
            carry: c,
            overflow: v,
        } = flags;
        let taken = match self {
            Self::Eq => z,
            Self::Ne => !z,
            Self::Hs => c,
            Self::Lo => !c,
            Self::Mi => n,
            Self::Pl => !n,
            Self::Vs => v,
            Self::Vc => !v,
            Self::Hi => c && !z,
            Self::Ls => !c || z,
            Self::Ge => n == v,
            Self::Lt => n != v,
            Self::Gt => !z && n == v,
            Self::Le => z || n != v,
            Self::Al => true,
            Self::Nv => return None,
        };
        Some(taken)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static control signals of `instruction`.
#[must_use]
pub fn signals(instruction: &Instruction) -> &ControlSignals {
    instruction.signals()
}

/// Registers fed to the two read ports.
///
/// The second port takes `rt` when `reg2Loc` is raised, `rm` otherwise. Shift
/// instructions and `BR` leave the second port idle.
#[must_use]
pub fn read_ports(instruction: &Instruction) -> (Option<Register>, Option<Register>) {
    let signals = instruction.signals();
    match *instruction.fields() {
        InstructionFields::R { rm, rn, .. } => {
            if signals.operation.is_shift() || signals.uncond_branch {
                (Some(rn), None)
            } else {
                (Some(rn), Some(rm))
            }
        }
        InstructionFields::I { rn, .. } => (Some(rn), None),
        InstructionFields::D { rn, rt, .. } => (Some(rn), signals.reg2loc.then_some(rt)),
        InstructionFields::CB { rt, .. } => (None, signals.reg2loc.then_some(rt)),
        InstructionFields::B { .. } | InstructionFields::IM { .. } => (None, None),
    }
}

/// Register that write-back targets, if any.
#[must_use]
pub fn destination(instruction: &Instruction) -> Option<Register> {
    if !instruction.signals().register_write {
        return None;
    }
    match *instruction.fields() {
        InstructionFields::R { rd, .. }
        | InstructionFields::I { rd, .. }
        | InstructionFields::IM { rd, .. } => Some(rd),
        InstructionFields::D { rt, .. } => Some(rt),
        InstructionFields::B { .. } | InstructionFields::CB { .. } => Some(Register::LR),
    }
}

/// Immediate selected by `aluSrc`, already extended to 64 bits.
///
/// Shifts take `shamt`; `MOVZ`/`MOVK` take `imm16 << (16 * hw)`.
#[must_use]
pub fn immediate(instruction: &Instruction) -> Option<i64> {
    match *instruction.fields() {
        InstructionFields::R { shamt, .. } if instruction.signals().operation.is_shift() => {
            Some(i64::from(shamt))
        }
        InstructionFields::I { imm12, .. } if instruction.signals().alu_src => {
            Some(i64::from(imm12))
        }
        InstructionFields::D { offset, .. } => Some(i64::from(offset)),
        InstructionFields::IM { hw, imm16, .. } => Some(i64::from(imm16) << (16 * u32::from(hw))),
        _ => None,
    }
}

/// Condition named by a `B.cond` instruction.
#[must_use]
pub fn condition(instruction: &Instruction) -> Option<Condition> {
    match *instruction.fields() {
        InstructionFields::CB { rt, .. } if instruction.signals().flag_branch => {
            Condition::from_code(rt.number())
        }
        _ => None,
    }
}

/// Decides whether a branch-format instruction is taken.
///
/// `tested` is the value read through the second port (`CBZ`/`CBNZ`); the
/// low opcode bit picks branch-on-non-zero, whatever the mnemonic.
/// Unconditional branches always take. An unassigned condition code does not
/// take unless `strict` is set, in which case it faults.
///
/// # Errors
///
/// Returns [`Fault::InvalidCondition`] for an unassigned code under `strict`.
pub fn branch_taken(
    instruction: &Instruction,
    flags: Flags,
    tested: i64,
    strict: bool,
) -> Result<bool, Fault> {
    let signals = instruction.signals();
    if signals.uncond_branch {
        return Ok(true);
    }
    if signals.zero_branch {
        // Opcode bit 24 selects CBNZ.
        let branch_if_zero = instruction.definition().opcode & 1 == 0;
        return Ok((tested == 0) == branch_if_zero);
    }
    if signals.flag_branch {
        let code = match *instruction.fields() {
            InstructionFields::CB { rt, .. } => rt.number(),
            _ => return Ok(false),
        };
        return match Condition::from_code(code).and_then(|c| c.evaluate(flags)) {
            Some(taken) => Ok(taken),
            None if strict => Err(Fault::InvalidCondition(code)),
            None => {
                tracing::warn!(code, "unassigned branch condition, treating as not taken");
                Ok(false)
            }
        };
    }
    Ok(false)
}

/// Returns true for instructions whose micro-step list ends in a branch step.
#[must_use]
pub fn is_branch(instruction: &Instruction) -> bool {
    instruction.format().is_branch()
        || (instruction.format() == Format::R && instruction.signals().uncond_branch)
}
