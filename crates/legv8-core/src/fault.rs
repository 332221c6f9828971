use thiserror::Error;

/// Fault classes used for reporting and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Word or bit-field could not be classified.
    Decode,
    /// Assembly text could not be turned into an instruction.
    Assembly,
    /// Arithmetic unit rejected the operation.
    Alu,
    /// Data memory bounds or alignment violation.
    Memory,
    /// Register index outside the architectural file.
    Register,
    /// Control-flow target or condition could not be resolved.
    Branch,
    /// History navigation or program availability.
    Navigation,
}

/// Fault taxonomy for decode, assembly, execution and history navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum Fault {
    /// No instruction format matched the word.
    #[error("no instruction format matches word {word:#010x}")]
    UnknownOpcode {
        /// Raw instruction word.
        word: u32,
    },
    /// Mnemonic is not present in the instruction definition table.
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    /// Operand token is malformed or out of range.
    #[error("invalid operand `{token}`: {reason}")]
    InvalidOperand {
        /// Offending token as written.
        token: String,
        /// Short description of the problem.
        reason: &'static str,
    },
    /// Operation selector names no ALU operation.
    #[error("unsupported ALU operation `{0}`")]
    UnsupportedOperation(String),
    /// `SDIV`/`UDIV` with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// Access falls outside `0..capacity`.
    #[error("memory access of {size} bytes at {address} is out of bounds")]
    MemoryOutOfBounds {
        /// Effective address as computed (may be negative).
        address: i64,
        /// Access width in bytes.
        size: usize,
    },
    /// Access is not naturally aligned to its width.
    #[error("memory access of {size} bytes at {address:#x} is misaligned")]
    MemoryMisaligned {
        /// Effective address.
        address: i64,
        /// Access width in bytes.
        size: usize,
    },
    /// Register index outside `0..=31`.
    #[error("register index {0} is outside X0..X31")]
    InvalidRegisterIndex(usize),
    /// Bit range is reversed or exceeds bit 31.
    #[error("invalid bit range {low}..={high}")]
    InvalidRange {
        /// Low bit index.
        low: u32,
        /// High bit index.
        high: u32,
    },
    /// Branch condition code is not one the evaluator recognizes.
    #[error("unrecognized branch condition code {0:#x}")]
    InvalidCondition(u8),
    /// Taken branch target is negative or not word aligned.
    #[error("branch target {0} is not a valid instruction address")]
    InvalidBranchTarget(i64),
    /// History cursor is already at the requested boundary.
    #[error("no history in the requested direction")]
    NoHistory,
    /// Stepping was requested before any program was loaded.
    #[error("no program loaded")]
    NoProgram,
}

impl Fault {
    /// Returns the reporting class for this fault.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        match self {
            Self::UnknownOpcode { .. } | Self::InvalidRange { .. } => FaultClass::Decode,
            Self::UnknownMnemonic(_) | Self::InvalidOperand { .. } => FaultClass::Assembly,
            Self::UnsupportedOperation(_) | Self::DivisionByZero => FaultClass::Alu,
            Self::MemoryOutOfBounds { .. } | Self::MemoryMisaligned { .. } => FaultClass::Memory,
            Self::InvalidRegisterIndex(_) => FaultClass::Register,
            Self::InvalidCondition(_) | Self::InvalidBranchTarget(_) => FaultClass::Branch,
            Self::NoHistory | Self::NoProgram => FaultClass::Navigation,
        }
    }

    pub(crate) fn invalid_operand(token: &str, reason: &'static str) -> Self {
        Self::InvalidOperand {
            token: token.to_string(),
            reason,
        }
    }
}

/// Program load failure pinned to its source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {fault} (`{text}`)")]
pub struct ProgramError {
    /// 1-indexed source line number.
    pub line: usize,
    /// Source text of the failing line.
    pub text: String,
    /// Originating fault.
    #[source]
    pub fault: Fault,
}
