//! Core crate for the reversible micro-stepping LEGv8 emulator.
//!
//! Programs are assembled against a data-driven [`InstructionTable`], each
//! instruction is expanded into datapath [`MicroStep`]s, and a [`Machine`]
//! applies them one at a time while recording snapshots for undo and redo.

/// Fault taxonomy shared by every layer.
pub mod fault;
pub use fault::{Fault, FaultClass, ProgramError};

/// Bit-field extraction, insertion and sign extension.
pub mod bits;
pub use bits::{extract_bits, set_bits, sign_extend, BitRange};

/// Instruction definition table and control signal bundles.
pub mod isa;
pub use isa::{ControlSignals, Format, InstructionDefinition, InstructionTable, BUILTIN_TABLE};

/// 64-bit ALU with NZCV flag computation.
pub mod alu;
pub use alu::{AluOperation, AluResult, Flags};

/// Instruction word decoding and encoding.
pub mod decoder;
pub use decoder::{decode, encode, Instruction, InstructionFields, Register};

/// Text assembler, disassembler and program loader.
pub mod asm;
pub use asm::{assemble, disassemble, load_program, Labels};

/// General-purpose register file.
pub mod registers;
pub use registers::{RegisterFile, GENERAL_REGISTER_COUNT};

/// Byte-addressed little-endian data memory.
pub mod memory;
pub use memory::{AccessSize, Memory, DEFAULT_MEMORY_BYTES};

/// Control unit helpers and branch conditions.
pub mod control;
pub use control::Condition;

/// Micro-step generation for the single-cycle datapath.
pub mod sequencer;
pub use sequencer::{generate, Bus, Component, MachineView, MicroAction, MicroStep, Stage};

/// Snapshot log for stepping backward and forward.
pub mod history;
pub use history::{ExecutionHistory, ExecutionState, DEFAULT_HISTORY_CAPACITY};

/// Host-facing configuration and export types.
pub mod api;
pub use api::{MachineConfig, MachineExport, RunOutcome, StepOutcome, StepView};

/// Machine aggregate driving micro-steps and history.
pub mod machine;
pub use machine::{Machine, INSTRUCTION_BYTES};

#[cfg(test)]
use rstest as _;
