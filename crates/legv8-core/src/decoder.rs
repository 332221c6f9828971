//! Instruction decoder for LEGv8 words.
//!
//! Words are classified by trying each [`Format`] in priority order against the
//! opcode patterns of the active [`InstructionTable`]. The first definition
//! whose opcode matches wins; its fields are then sliced out of the word with
//! the fixed layout of that format.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::bits::{sign_extend, BitRange};
use crate::isa::{ControlSignals, Format, InstructionDefinition, InstructionTable};
use crate::Fault;

const RM: BitRange = BitRange::new(16, 20);
const SHAMT: BitRange = BitRange::new(10, 15);
const RN: BitRange = BitRange::new(5, 9);
const RD: BitRange = BitRange::new(0, 4);
const IMM12: BitRange = BitRange::new(10, 21);
const OFFSET9: BitRange = BitRange::new(12, 20);
const OP2: BitRange = BitRange::new(10, 11);
const OFFSET26: BitRange = BitRange::new(0, 25);
const HW: BitRange = BitRange::new(21, 22);
const IMM16: BitRange = BitRange::new(5, 20);
const OFFSET19: BitRange = BitRange::new(5, 23);

/// Architectural register index `X0..=X31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Register(u8);

impl Register {
    /// Number of architectural registers.
    pub const COUNT: usize = 32;
    /// Stack pointer alias (`X28`).
    pub const SP: Self = Self(28);
    /// Frame pointer alias (`X29`).
    pub const FP: Self = Self(29);
    /// Link register (`X30`), written by `BL`.
    pub const LR: Self = Self(30);
    /// Zero register (`X31`).
    pub const XZR: Self = Self(31);

    /// Creates a register from an index, rejecting values above 31.
    #[must_use]
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < Self::COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Creates a register from a 5-bit instruction field.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_field(bits: u32) -> Self {
        Self((bits & 0x1F) as u8)
    }

    /// Register number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Register number as a slot index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the hard-wired zero register.
    #[must_use]
    pub const fn is_zero_register(self) -> bool {
        self.0 == 31
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero_register() {
            f.write_str("XZR")
        } else {
            write!(f, "X{}", self.0)
        }
    }
}

impl FromStr for Register {
    type Err = Fault;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let upper = token.trim().to_ascii_uppercase();
        let register = match upper.as_str() {
            "XZR" => Some(Self::XZR),
            "LR" => Some(Self::LR),
            "FP" => Some(Self::FP),
            "SP" => Some(Self::SP),
            other => other
                .strip_prefix('X')
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u8>().ok())
                .and_then(Self::new),
        };
        register.ok_or_else(|| Fault::invalid_operand(token, "expected register X0..X31"))
    }
}

/// Decoded operand fields, one variant per format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum InstructionFields {
    /// Register format.
    R {
        /// Second source register.
        rm: Register,
        /// Shift amount, 6 bits.
        shamt: u8,
        /// First source register.
        rn: Register,
        /// Destination register.
        rd: Register,
    },
    /// Immediate format.
    I {
        /// Zero-extended 12-bit immediate.
        imm12: u16,
        /// Source register.
        rn: Register,
        /// Destination register.
        rd: Register,
    },
    /// Data transfer format.
    D {
        /// Sign-extended 9-bit byte offset.
        offset: i16,
        /// Two-bit `op2` field.
        op2: u8,
        /// Base register.
        rn: Register,
        /// Transfer register.
        rt: Register,
    },
    /// Branch format.
    B {
        /// Sign-extended 26-bit word offset.
        offset: i32,
    },
    /// Wide immediate format.
    IM {
        /// Shift group; the immediate is shifted left by `16 * hw`.
        hw: u8,
        /// 16-bit immediate.
        imm16: u16,
        /// Destination register.
        rd: Register,
    },
    /// Compare-and-branch format.
    CB {
        /// Sign-extended 19-bit word offset.
        offset: i32,
        /// Tested register, or the condition code for `B.cond`.
        rt: Register,
    },
}

impl InstructionFields {
    /// Format these fields belong to.
    #[must_use]
    pub const fn format(&self) -> Format {
        match self {
            Self::R { .. } => Format::R,
            Self::I { .. } => Format::I,
            Self::D { .. } => Format::D,
            Self::B { .. } => Format::B,
            Self::IM { .. } => Format::IM,
            Self::CB { .. } => Format::CB,
        }
    }

    /// Slices the operand fields of `format` out of `word`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn extract(format: Format, word: u32) -> Self {
        match format {
            Format::R => Self::R {
                rm: Register::from_field(RM.get(word)),
                shamt: SHAMT.get(word) as u8,
                rn: Register::from_field(RN.get(word)),
                rd: Register::from_field(RD.get(word)),
            },
            Format::I => Self::I {
                imm12: IMM12.get(word) as u16,
                rn: Register::from_field(RN.get(word)),
                rd: Register::from_field(RD.get(word)),
            },
            Format::D => Self::D {
                offset: sign_extend(OFFSET9.get(word), OFFSET9.width()) as i16,
                op2: OP2.get(word) as u8,
                rn: Register::from_field(RN.get(word)),
                rt: Register::from_field(RD.get(word)),
            },
            Format::B => Self::B {
                offset: sign_extend(OFFSET26.get(word), OFFSET26.width()) as i32,
            },
            Format::IM => Self::IM {
                hw: HW.get(word) as u8,
                imm16: IMM16.get(word) as u16,
                rd: Register::from_field(RD.get(word)),
            },
            Format::CB => Self::CB {
                offset: sign_extend(OFFSET19.get(word), OFFSET19.width()) as i32,
                rt: Register::from_field(RD.get(word)),
            },
        }
    }

    /// Writes these fields into `word`, truncating each to its width.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn insert(&self, word: u32) -> u32 {
        match *self {
            Self::R { rm, shamt, rn, rd } => {
                let word = RM.put(word, rm.number() as u32);
                let word = SHAMT.put(word, shamt as u32);
                let word = RN.put(word, rn.number() as u32);
                RD.put(word, rd.number() as u32)
            }
            Self::I { imm12, rn, rd } => {
                let word = IMM12.put(word, imm12 as u32);
                let word = RN.put(word, rn.number() as u32);
                RD.put(word, rd.number() as u32)
            }
            Self::D { offset, op2, rn, rt } => {
                let word = OFFSET9.put(word, offset as u32);
                let word = OP2.put(word, op2 as u32);
                let word = RN.put(word, rn.number() as u32);
                RD.put(word, rt.number() as u32)
            }
            Self::B { offset } => OFFSET26.put(word, offset as u32),
            Self::IM { hw, imm16, rd } => {
                let word = HW.put(word, hw as u32);
                let word = IMM16.put(word, imm16 as u32);
                RD.put(word, rd.number() as u32)
            }
            Self::CB { offset, rt } => {
                let word = OFFSET19.put(word, offset as u32);
                RD.put(word, rt.number() as u32)
            }
        }
    }

    /// Word offset for branch formats.
    #[must_use]
    pub const fn branch_offset(&self) -> Option<i32> {
        match *self {
            Self::B { offset } | Self::CB { offset, .. } => Some(offset),
            _ => None,
        }
    }
}

/// A decoded instruction: shared definition, raw word and operand fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    definition: Arc<InstructionDefinition>,
    word: u32,
    fields: InstructionFields,
}

impl Instruction {
    /// Static definition.
    #[must_use]
    pub fn definition(&self) -> &InstructionDefinition {
        &self.definition
    }

    /// Shared handle to the static definition.
    #[must_use]
    pub fn definition_handle(&self) -> Arc<InstructionDefinition> {
        Arc::clone(&self.definition)
    }

    /// Raw 32-bit word.
    #[must_use]
    pub const fn word(&self) -> u32 {
        self.word
    }

    /// Decoded operand fields.
    #[must_use]
    pub const fn fields(&self) -> &InstructionFields {
        &self.fields
    }

    /// Encoding format.
    #[must_use]
    pub fn format(&self) -> Format {
        self.definition.format
    }

    /// Control signals of the definition.
    #[must_use]
    pub fn signals(&self) -> &ControlSignals {
        &self.definition.signals
    }

    /// Upper-cased mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> String {
        self.definition.canonical_mnemonic()
    }

    /// Rebuilds the instruction word from opcode and fields.
    #[must_use]
    pub fn encode(&self) -> u32 {
        encode(&self.definition, &self.fields)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::asm::disassemble(self))
    }
}

/// Builds a word from a definition's opcode and a set of fields.
#[must_use]
pub fn encode(definition: &InstructionDefinition, fields: &InstructionFields) -> u32 {
    let word = definition.format.opcode_range().put(0, definition.opcode);
    fields.insert(word)
}

/// Decodes `word` against `table`.
///
/// # Errors
///
/// Returns [`Fault::UnknownOpcode`] when no definition of any format matches.
pub fn decode(word: u32, table: &InstructionTable) -> Result<Instruction, Fault> {
    Format::DECODE_ORDER
        .iter()
        .find_map(|&format| {
            table.match_word(format, word).map(|definition| Instruction {
                definition: Arc::clone(definition),
                word,
                fields: InstructionFields::extract(format, word),
            })
        })
        .ok_or(Fault::UnknownOpcode { word })
}

#[cfg(test)]
mod tests {
    use super::{decode, InstructionFields, Register};
    use crate::isa::{Format, InstructionTable};
    use crate::Fault;

    fn table() -> InstructionTable {
        InstructionTable::builtin()
    }

    #[test]
    fn decodes_r_format_add() {
        let instruction = decode(0x8B02_0023, &table()).expect("ADD X3, X1, X2");
        assert_eq!(instruction.mnemonic(), "ADD");
        assert_eq!(
            *instruction.fields(),
            InstructionFields::R {
                rm: Register::from_field(2),
                shamt: 0,
                rn: Register::from_field(1),
                rd: Register::from_field(3),
            }
        );
        assert_eq!(instruction.encode(), 0x8B02_0023);
    }

    #[test]
    fn decodes_negative_d_offset() {
        // LDUR X1, [X2, #-8]
        let word = 0xF85F_8041;
        let instruction = decode(word, &table()).expect("LDUR");
        assert_eq!(instruction.format(), Format::D);
        match *instruction.fields() {
            InstructionFields::D { offset, rn, rt, .. } => {
                assert_eq!(offset, -8);
                assert_eq!(rn.number(), 2);
                assert_eq!(rt.number(), 1);
            }
            other => panic!("unexpected fields {other:?}"),
        }
    }

    #[test]
    fn decodes_backward_branch() {
        // B #-1
        let instruction = decode(0x17FF_FFFF, &table()).expect("B");
        assert_eq!(instruction.fields().branch_offset(), Some(-1));
    }

    #[test]
    fn decodes_cb_and_im_formats() {
        // CBZ X1, #-2
        let cbz = decode(0xB4FF_FFC1, &table()).expect("CBZ");
        assert_eq!(cbz.mnemonic(), "CBZ");
        assert_eq!(cbz.fields().branch_offset(), Some(-2));

        // MOVZ X1, #5, LSL #16
        let movz = decode(0xD2A0_00A1, &table()).expect("MOVZ");
        assert_eq!(
            *movz.fields(),
            InstructionFields::IM {
                hw: 1,
                imm16: 5,
                rd: Register::from_field(1)
            }
        );
    }

    #[test]
    fn unknown_word_faults() {
        assert_eq!(
            decode(0, &table()).map(|i| i.word()),
            Err(Fault::UnknownOpcode { word: 0 })
        );
    }

    #[test]
    fn register_tokens_and_aliases() {
        assert_eq!("x7".parse::<Register>().map(Register::number), Ok(7));
        assert_eq!("XZR".parse::<Register>(), Ok(Register::XZR));
        assert_eq!("lr".parse::<Register>(), Ok(Register::LR));
        assert!("X32".parse::<Register>().is_err());
        assert!("X".parse::<Register>().is_err());
        assert!("W1".parse::<Register>().is_err());
        assert_eq!(Register::XZR.to_string(), "XZR");
        assert_eq!(Register::LR.to_string(), "X30");
    }
}
