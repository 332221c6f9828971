//! The machine aggregate: owns all architectural state and drives micro-steps.
//!
//! A [`Machine`] keeps the micro-step list of the instruction at the program
//! counter generated at all times. [`Machine::step`] applies exactly one
//! micro-step and records a snapshot; [`Machine::step_back`] and
//! [`Machine::step_forward`] replace the live state with a recorded snapshot
//! and regenerate the step list at the recorded index.

use std::sync::Arc;

use crate::alu::Flags;
use crate::api::{MachineConfig, MachineExport, RunOutcome, StepOutcome, StepView};
use crate::asm::{disassemble, load_program};
use crate::decoder::{decode, Instruction};
use crate::history::{ExecutionHistory, ExecutionState};
use crate::isa::InstructionTable;
use crate::memory::Memory;
use crate::registers::RegisterFile;
use crate::sequencer::{generate, MachineView, MicroAction, MicroStep};
use crate::{Fault, ProgramError};

/// Byte distance between consecutive instructions.
pub const INSTRUCTION_BYTES: u64 = 4;

/// Reversible micro-stepping LEGv8 machine.
#[derive(Debug, Clone)]
pub struct Machine {
    config: MachineConfig,
    table: Arc<InstructionTable>,
    registers: RegisterFile,
    memory: Memory,
    flags: Flags,
    pc: u64,
    program: Vec<Instruction>,
    loaded: bool,
    steps: Vec<MicroStep>,
    step_index: usize,
    pending_branch: Option<u64>,
    last_executed: Option<String>,
    finished: bool,
    history: ExecutionHistory,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

impl Machine {
    /// Creates a machine using the built-in instruction table.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self::with_table(config, Arc::new(InstructionTable::builtin()))
    }

    /// Creates a machine using a custom instruction table.
    #[must_use]
    pub fn with_table(config: MachineConfig, table: Arc<InstructionTable>) -> Self {
        Self {
            config,
            table,
            registers: RegisterFile::default(),
            memory: Memory::new(config.memory_bytes),
            flags: Flags::CLEAR,
            pc: 0,
            program: Vec::new(),
            loaded: false,
            steps: Vec::new(),
            step_index: 0,
            pending_branch: None,
            last_executed: None,
            finished: false,
            history: ExecutionHistory::new(config.history_capacity),
        }
    }

    /// Assembles `lines` and installs the result, resetting all state.
    ///
    /// # Errors
    ///
    /// Returns the first failing line; the previous program stays loaded.
    pub fn load_program<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<(), ProgramError> {
        let program = load_program(lines, &self.table)?;
        self.install(program);
        Ok(())
    }

    /// Decodes raw instruction words and installs them, resetting all state.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::UnknownOpcode`] for the first undecodable word.
    pub fn load_words(&mut self, words: &[u32]) -> Result<(), Fault> {
        let program = words
            .iter()
            .map(|&word| decode(word, &self.table))
            .collect::<Result<Vec<_>, _>>()?;
        self.install(program);
        Ok(())
    }

    fn install(&mut self, program: Vec<Instruction>) {
        self.program = program;
        self.loaded = true;
        self.reset();
    }

    /// Clears registers, memory, flags, PC, the step list and history.
    ///
    /// The program stays loaded and a fresh initial snapshot is recorded. An
    /// empty program is finished from the start.
    pub fn reset(&mut self) {
        self.registers.clear();
        self.memory.clear();
        self.flags = Flags::CLEAR;
        self.pc = 0;
        self.steps.clear();
        self.step_index = 0;
        self.pending_branch = None;
        self.last_executed = None;
        self.finished = false;
        self.history.clear();
        if self.loaded {
            self.regenerate();
            self.finished = self.steps.is_empty();
            self.record("initial state".to_string());
        }
        tracing::debug!(instructions = self.program.len(), "machine reset");
    }

    /// Presets a register before or between steps and records the change.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::InvalidRegisterIndex`] for indices above 31.
    pub fn set_register(&mut self, index: usize, value: i64) -> Result<(), Fault> {
        self.registers.set(index, value)?;
        self.regenerate();
        if self.loaded {
            self.record(format!("set X{index} = {value}"));
        }
        Ok(())
    }

    /// Applies the next micro-step.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::NoProgram`] before a program is loaded, or the fault
    /// carried by the step. A faulting step leaves the step index unchanged.
    pub fn step(&mut self) -> Result<StepOutcome, Fault> {
        if !self.loaded {
            return Err(Fault::NoProgram);
        }
        if self.finished {
            return Ok(StepOutcome::Finished);
        }
        if self.steps.is_empty() {
            self.regenerate();
        }
        let Some(step) = self.steps.get(self.step_index) else {
            return Ok(StepOutcome::Finished);
        };
        let label = step.label.clone();
        let stage = step.stage;
        if let Some(action) = step.action.clone() {
            self.apply(action)?;
        }

        self.step_index += 1;
        let retired = self.step_index >= self.steps.len();
        if retired {
            self.retire();
        }
        self.record(label.clone());
        Ok(StepOutcome::Stepped {
            label,
            stage,
            retired,
        })
    }

    /// Applies micro-steps until the current instruction retires.
    ///
    /// # Errors
    ///
    /// Propagates [`Machine::step`] faults.
    pub fn step_instruction(&mut self) -> Result<RunOutcome, Fault> {
        let mut steps = 0;
        loop {
            let outcome = self.step()?;
            let done = match outcome {
                StepOutcome::Stepped { retired, .. } => {
                    steps += 1;
                    retired
                }
                StepOutcome::Finished => true,
            };
            if done {
                return Ok(RunOutcome {
                    steps,
                    final_step: outcome,
                });
            }
        }
    }

    /// Applies micro-steps until the program finishes or `max_steps` is hit.
    ///
    /// # Errors
    ///
    /// Propagates [`Machine::step`] faults.
    pub fn run(&mut self, max_steps: usize) -> Result<RunOutcome, Fault> {
        let mut steps = 0;
        let mut final_step = StepOutcome::Finished;
        while steps < max_steps {
            final_step = self.step()?;
            if final_step == StepOutcome::Finished {
                break;
            }
            steps += 1;
        }
        if self.finished {
            final_step = StepOutcome::Finished;
        }
        tracing::debug!(steps, finished = self.finished, "run stopped");
        Ok(RunOutcome { steps, final_step })
    }

    /// Restores the previous snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::NoHistory`] at the oldest snapshot.
    pub fn step_back(&mut self) -> Result<(), Fault> {
        let state = self.history.step_back()?.clone();
        tracing::debug!(pc = state.pc, index = state.micro_step_index, "history back");
        self.restore(&state);
        Ok(())
    }

    /// Restores the next snapshot after a [`Machine::step_back`].
    ///
    /// # Errors
    ///
    /// Returns [`Fault::NoHistory`] at the newest snapshot.
    pub fn step_forward(&mut self) -> Result<(), Fault> {
        let state = self.history.step_forward()?.clone();
        tracing::debug!(pc = state.pc, index = state.micro_step_index, "history forward");
        self.restore(&state);
        Ok(())
    }

    fn apply(&mut self, action: MicroAction) -> Result<(), Fault> {
        tracing::trace!(?action, pc = self.pc, index = self.step_index, "apply");
        match action {
            MicroAction::WriteRegister { register, value } => self.registers.write(register, value),
            MicroAction::WriteMemory {
                address,
                value,
                size,
            } => self.memory.store(address, value, size)?,
            MicroAction::UpdateFlags { result } => self.flags = result.flags,
            MicroAction::SetBranchTarget { pc } => {
                tracing::debug!(from = self.pc, to = pc, "branch taken");
                self.pending_branch = Some(pc);
            }
            MicroAction::Fault(fault) => {
                tracing::debug!(%fault, pc = self.pc, index = self.step_index, "step faulted");
                return Err(fault);
            }
        }
        Ok(())
    }

    fn retire(&mut self) {
        let text = self.current_instruction().map(disassemble);
        tracing::debug!(pc = self.pc, instruction = text.as_deref(), "retired");
        self.last_executed = text;
        self.pc = self
            .pending_branch
            .take()
            .unwrap_or_else(|| self.pc.wrapping_add(INSTRUCTION_BYTES));
        self.step_index = 0;
        self.regenerate();
        if self.steps.is_empty() {
            self.finished = true;
            tracing::debug!(pc = self.pc, "program finished");
        }
    }

    fn regenerate(&mut self) {
        let Some(instruction) = self.current_instruction() else {
            self.steps.clear();
            return;
        };
        let view = MachineView {
            pc: self.pc,
            flags: self.flags,
            registers: &self.registers,
            memory: &self.memory,
            strict_conditions: self.config.strict_conditions,
        };
        let steps = generate(instruction, &view);
        self.steps = steps;
    }

    fn snapshot(&self, description: String) -> ExecutionState {
        ExecutionState {
            pc: self.pc,
            flags: self.flags,
            last_instruction: self.last_executed.clone(),
            finished: self.finished,
            micro_step_index: self.step_index,
            registers: self.registers.snapshot(),
            memory: self.memory.doublewords(),
            description,
        }
    }

    fn record(&mut self, description: String) {
        let state = self.snapshot(description);
        self.history.record(state);
    }

    fn restore(&mut self, state: &ExecutionState) {
        self.registers.restore(&state.registers);
        self.memory.restore(&state.memory);
        self.flags = state.flags;
        self.pc = state.pc;
        self.last_executed.clone_from(&state.last_instruction);
        self.finished = state.finished;
        self.pending_branch = None;
        self.regenerate();
        self.step_index = state.micro_step_index.min(self.steps.len());
    }

    /// Instruction at the program counter, if any.
    #[must_use]
    pub fn current_instruction(&self) -> Option<&Instruction> {
        usize::try_from(self.pc / INSTRUCTION_BYTES)
            .ok()
            .and_then(|index| self.program.get(index))
    }

    /// Next micro-step to apply.
    #[must_use]
    pub fn current_step(&self) -> Option<&MicroStep> {
        if self.finished {
            None
        } else {
            self.steps.get(self.step_index)
        }
    }

    /// Micro-step list of the current instruction.
    #[must_use]
    pub fn micro_steps(&self) -> &[MicroStep] {
        &self.steps
    }

    /// Micro-steps of the current instruction already applied.
    #[must_use]
    pub const fn step_index(&self) -> usize {
        self.step_index
    }

    /// Display export of the full machine state.
    #[must_use]
    pub fn export(&self) -> MachineExport {
        MachineExport {
            registers: self.registers.snapshot(),
            memory: self.memory.doublewords().into_iter().collect(),
            flags: self.flags,
            pc: self.pc,
            last_instruction: self.last_executed.clone(),
            finished: self.finished,
            micro_step_index: self.step_index,
            current_step: self.current_step().map(StepView::from),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Active instruction table.
    #[must_use]
    pub fn table(&self) -> &InstructionTable {
        &self.table
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// Data memory.
    #[must_use]
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Condition flags.
    #[must_use]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u64 {
        self.pc
    }

    /// Loaded program.
    #[must_use]
    pub fn program(&self) -> &[Instruction] {
        &self.program
    }

    /// Execution history.
    #[must_use]
    pub const fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// Program ran past its last instruction.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Disassembly of the last retired instruction.
    #[must_use]
    pub fn last_executed(&self) -> Option<&str> {
        self.last_executed.as_deref()
    }
}
