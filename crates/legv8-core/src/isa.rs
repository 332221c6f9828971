//! Instruction definition table: formats, opcode patterns and control signals.
//!
//! The table is read from a small line-oriented text format so that teaching
//! setups can swap in their own instruction subsets. A default LEGv8 table is
//! compiled into the crate.

use std::fmt;
use std::sync::Arc;

use crate::alu::AluOperation;
use crate::bits::BitRange;

/// Text of the built-in LEGv8 definition table.
pub const BUILTIN_TABLE: &str = include_str!("legv8.def");

/// Number of whitespace/comma separated fields in one table record.
pub const RECORD_FIELD_COUNT: usize = 15;

/// Instruction encoding formats, in decode priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Format {
    /// Register-register arithmetic, shifts and `BR`.
    R,
    /// Register-immediate arithmetic.
    I,
    /// Loads and stores.
    D,
    /// Unconditional branches.
    B,
    /// Wide immediate moves.
    IM,
    /// Compare-and-branch and conditional branches.
    CB,
}

impl Format {
    /// Order in which the decoder tries formats.
    pub const DECODE_ORDER: [Self; 6] = [Self::R, Self::I, Self::D, Self::B, Self::IM, Self::CB];

    /// Number of leading opcode bits for this format.
    #[must_use]
    pub const fn opcode_width(self) -> u32 {
        match self {
            Self::R | Self::D => 11,
            Self::I => 10,
            Self::B => 6,
            Self::IM => 9,
            Self::CB => 8,
        }
    }

    /// Bit range holding the opcode.
    #[must_use]
    pub const fn opcode_range(self) -> BitRange {
        BitRange::new(32 - self.opcode_width(), 31)
    }

    /// Single-letter tag used in definition tables.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::R => "R",
            Self::I => "I",
            Self::D => "D",
            Self::B => "B",
            Self::IM => "M",
            Self::CB => "C",
        }
    }

    /// Parses a definition-table format tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "R" => Some(Self::R),
            "I" => Some(Self::I),
            "D" => Some(Self::D),
            "B" => Some(Self::B),
            "M" | "IM" => Some(Self::IM),
            "C" | "CB" => Some(Self::CB),
            _ => None,
        }
    }

    /// Returns true for formats that end in a branch step.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(self, Self::B | Self::CB)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IM => f.write_str("IM"),
            Self::CB => f.write_str("CB"),
            other => f.write_str(other.tag()),
        }
    }
}

/// Fixed control-signal tuple attached to one instruction definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct ControlSignals {
    /// Result is written to the destination register.
    pub register_write: bool,
    /// Second ALU operand is the immediate.
    pub alu_src: bool,
    /// Data memory is written.
    pub mem_write: bool,
    /// Data memory is read.
    pub mem_read: bool,
    /// Write-back value comes from memory.
    pub mem_to_reg: bool,
    /// Branch on register zero test.
    pub zero_branch: bool,
    /// Branch on condition flags.
    pub flag_branch: bool,
    /// Unconditional branch.
    pub uncond_branch: bool,
    /// Second register read port takes `rt` instead of `rm`.
    pub reg2loc: bool,
    /// ALU flags are committed.
    pub flag_write: bool,
    /// Two-bit ALU-op class.
    pub alu_op: u8,
    /// ALU operation selector.
    pub operation: AluOperation,
}

impl ControlSignals {
    /// Returns true if any branch signal is raised.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        self.zero_branch || self.flag_branch || self.uncond_branch
    }
}

impl fmt::Display for ControlSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = |flag: bool| u8::from(flag);
        write!(
            f,
            "RegWrite={} ALUSrc={} MemWrite={} MemRead={} MemToReg={} ZeroBranch={} \
             FlagBranch={} UncondBranch={} Reg2Loc={} FlagWrite={} ALUOp={:02b} Op={}",
            b(self.register_write),
            b(self.alu_src),
            b(self.mem_write),
            b(self.mem_read),
            b(self.mem_to_reg),
            b(self.zero_branch),
            b(self.flag_branch),
            b(self.uncond_branch),
            b(self.reg2loc),
            b(self.flag_write),
            self.alu_op,
            self.operation
        )
    }
}

/// Static description of one mnemonic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct InstructionDefinition {
    /// Mnemonic as written in the table.
    pub mnemonic: String,
    /// Encoding format.
    pub format: Format,
    /// Opcode value occupying `format.opcode_range()`.
    pub opcode: u32,
    /// Control signals.
    pub signals: ControlSignals,
}

impl InstructionDefinition {
    /// Upper-cased mnemonic used for lookups and display.
    #[must_use]
    pub fn canonical_mnemonic(&self) -> String {
        self.mnemonic.to_ascii_uppercase()
    }
}

/// Parsed instruction definition table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstructionTable {
    definitions: Vec<Arc<InstructionDefinition>>,
}

impl InstructionTable {
    /// Parses table text, skipping malformed records with a warning.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            match parse_record(line) {
                Ok(definition) => table.insert(definition),
                Err(reason) => {
                    tracing::warn!(line = index + 1, text = line, reason, "skipping definition");
                }
            }
        }
        tracing::debug!(count = table.len(), "instruction table parsed");
        table
    }

    /// The built-in LEGv8 table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_TABLE)
    }

    /// Adds a definition; a definition with the same mnemonic is replaced.
    pub fn insert(&mut self, definition: InstructionDefinition) {
        let definition = Arc::new(definition);
        if let Some(slot) = self
            .definitions
            .iter_mut()
            .find(|existing| existing.mnemonic.eq_ignore_ascii_case(&definition.mnemonic))
        {
            tracing::warn!(
                mnemonic = %definition.mnemonic,
                "duplicate mnemonic, later definition wins"
            );
            *slot = definition;
        } else {
            self.definitions.push(definition);
        }
    }

    /// Finds a definition by mnemonic, ignoring case.
    #[must_use]
    pub fn lookup(&self, mnemonic: &str) -> Option<&Arc<InstructionDefinition>> {
        self.definitions
            .iter()
            .find(|definition| definition.mnemonic.eq_ignore_ascii_case(mnemonic))
    }

    /// Finds the definition of `format` whose opcode matches the top bits of `word`.
    #[must_use]
    pub fn match_word(&self, format: Format, word: u32) -> Option<&Arc<InstructionDefinition>> {
        let opcode = format.opcode_range().get(word);
        self.definitions
            .iter()
            .find(|definition| definition.format == format && definition.opcode == opcode)
    }

    /// Iterates definitions in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<InstructionDefinition>> {
        self.definitions.iter()
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if the table holds no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn parse_flag(token: &str) -> Result<bool, &'static str> {
    match token.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err("bad boolean field"),
    }
}

fn parse_pattern(token: &str, width: usize) -> Result<u32, &'static str> {
    if token.len() != width || !token.bytes().all(|b| b == b'0' || b == b'1') {
        return Err("bad bit pattern");
    }
    u32::from_str_radix(token, 2).map_err(|_| "bad bit pattern")
}

fn parse_record(line: &str) -> Result<InstructionDefinition, &'static str> {
    let fields: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|field| !field.is_empty())
        .collect();
    if fields.len() != RECORD_FIELD_COUNT {
        return Err("wrong field count");
    }

    let format = Format::from_tag(fields[1]).ok_or("unknown format tag")?;
    let opcode = parse_pattern(fields[2], format.opcode_width() as usize)?;

    let mut flags = [false; 10];
    for (slot, token) in flags.iter_mut().zip(&fields[3..13]) {
        *slot = parse_flag(token)?;
    }
    let alu_op = u8::try_from(parse_pattern(fields[13], 2)?).map_err(|_| "bad ALU-op class")?;
    let operation = fields[14]
        .parse::<AluOperation>()
        .map_err(|_| "unknown ALU operation")?;

    let [
        register_write,
        alu_src,
        mem_write,
        mem_read,
        mem_to_reg,
        zero_branch,
        flag_branch,
        uncond_branch,
        reg2loc,
        flag_write,
    ] = flags;

    Ok(InstructionDefinition {
        mnemonic: fields[0].to_string(),
        format,
        opcode,
        signals: ControlSignals {
            register_write,
            alu_src,
            mem_write,
            mem_read,
            mem_to_reg,
            zero_branch,
            flag_branch,
            uncond_branch,
            reg2loc,
            flag_write,
            alu_op,
            operation,
        },
    })
}
