//! Micro-step sequencer.
//!
//! Expands one decoded instruction into its ordered datapath micro-steps:
//! fetch, decode, control, execute, memory access, write-back and, for
//! branches, the final PC selection.
//!
//! Generation is a pure function of the instruction and a [`MachineView`].
//! Every value a step needs is computed up front and captured in its
//! [`MicroAction`]; nothing re-reads live state when the step is applied.
//! Registers and the link register are only written by the last steps and
//! memory is only written after every read of the same instruction, so
//! regenerating mid-instruction reproduces the remaining steps exactly.

use std::collections::BTreeMap;
use std::fmt;

use crate::alu::{self, AluOperation, AluResult, Flags};
use crate::asm::disassemble;
use crate::bits::sign_extend;
use crate::control;
use crate::decoder::{Instruction, InstructionFields, Register};
use crate::isa::Format;
use crate::memory::{AccessSize, Memory};
use crate::registers::RegisterFile;
use crate::Fault;

/// Pipeline stage a micro-step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Stage {
    /// Instruction fetch.
    Fetch,
    /// Decode and register read.
    Decode,
    /// ALU evaluation.
    Execute,
    /// Data memory access.
    MemoryAccess,
    /// Register write-back.
    WriteBack,
    /// Outside the five classic stages.
    None,
}

impl Stage {
    /// Upper-case stage tag.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fetch => "FETCH",
            Self::Decode => "DECODE",
            Self::Execute => "EXECUTE",
            Self::MemoryAccess => "MEMORY_ACCESS",
            Self::WriteBack => "WRITE_BACK",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! datapath_ids {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $id:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[allow(missing_docs)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Stable identifier used by datapath renderers.
            #[must_use]
            pub const fn id(self) -> &'static str {
                match self {
                    $(Self::$variant => $id),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.id())
            }
        }
    };
}

datapath_ids! {
    /// Datapath components that a micro-step can activate.
    Component {
        Pc => "pc",
        InstructionMemory => "instruction-memory",
        PcAdder => "pc-adder",
        RegisterFile => "register-file",
        Reg2LocMux => "reg2loc-mux",
        SignExtend => "sign-extend",
        ControlUnit => "control-unit",
        AluControl => "alu-control",
        AluSrcMux => "alu-src-mux",
        Alu => "alu",
        FlagsRegister => "flags",
        DataMemory => "data-memory",
        MemToRegMux => "mem-to-reg-mux",
        ShiftLeft2 => "shift-left-2",
        BranchAdder => "branch-adder",
        BranchLogic => "branch-logic",
        PcSrcMux => "pc-src-mux",
    }
}

datapath_ids! {
    /// Datapath buses that a micro-step can drive.
    Bus {
        Pc => "pc",
        PcPlus4 => "pc-plus-4",
        Instruction => "instruction",
        ReadRegister1 => "read-register-1",
        ReadRegister2 => "read-register-2",
        ReadData1 => "read-data-1",
        ReadData2 => "read-data-2",
        Immediate => "immediate",
        ControlSignals => "control-signals",
        AluInputA => "alu-input-a",
        AluInputB => "alu-input-b",
        AluResult => "alu-result",
        Flags => "flags",
        MemoryAddress => "memory-address",
        MemoryWriteData => "memory-write-data",
        MemoryReadData => "memory-read-data",
        WriteRegister => "write-register",
        WriteData => "write-data",
        BranchTarget => "branch-target",
        BranchTaken => "branch-taken",
        NextPc => "next-pc",
    }
}

/// Deferred side effect of a micro-step, applied exactly once by the machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MicroAction {
    /// Write a general register.
    WriteRegister {
        /// Destination.
        register: Register,
        /// Value to store.
        value: i64,
    },
    /// Store to data memory.
    WriteMemory {
        /// Effective address, already validated.
        address: i64,
        /// Value whose low bytes are stored.
        value: i64,
        /// Access width.
        size: AccessSize,
    },
    /// Commit ALU flags.
    UpdateFlags {
        /// ALU output carrying the flags.
        result: AluResult,
    },
    /// Redirect the program counter once the instruction retires.
    SetBranchTarget {
        /// Byte address of the next instruction.
        pc: u64,
    },
    /// The computation behind this step failed during generation.
    Fault(Fault),
}

/// One datapath micro-operation with its display payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroStep {
    /// Human-readable description.
    pub label: String,
    /// Stage tag.
    pub stage: Stage,
    /// Active components in activation order.
    pub components: Vec<Component>,
    /// Active buses in activation order.
    pub buses: Vec<Bus>,
    /// Display values keyed by bus id.
    pub bus_values: BTreeMap<String, String>,
    /// Deferred side effect.
    pub action: Option<MicroAction>,
}

impl MicroStep {
    fn new(stage: Stage, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stage,
            components: Vec::new(),
            buses: Vec::new(),
            bus_values: BTreeMap::new(),
            action: None,
        }
    }

    fn touch(mut self, components: &[Component]) -> Self {
        for component in components {
            if !self.components.contains(component) {
                self.components.push(*component);
            }
        }
        self
    }

    fn drive(mut self, bus: Bus, value: impl fmt::Display) -> Self {
        if !self.buses.contains(&bus) {
            self.buses.push(bus);
        }
        self.bus_values.insert(bus.id().to_string(), value.to_string());
        self
    }

    fn act(mut self, action: Option<MicroAction>) -> Self {
        self.action = action;
        self
    }
}

/// Read-only machine state the sequencer generates against.
#[derive(Debug, Clone, Copy)]
pub struct MachineView<'a> {
    /// Address of the instruction being expanded.
    pub pc: u64,
    /// Current condition flags.
    pub flags: Flags,
    /// Register file.
    pub registers: &'a RegisterFile,
    /// Data memory.
    pub memory: &'a Memory,
    /// Fault on unassigned branch conditions instead of falling through.
    pub strict_conditions: bool,
}

impl MachineView<'_> {
    fn read(&self, register: Option<Register>) -> Option<i64> {
        register.map(|register| self.registers.read(register))
    }
}

fn fault_action<T>(outcome: &Result<T, Fault>) -> Option<MicroAction> {
    outcome.as_ref().err().cloned().map(MicroAction::Fault)
}

/// Builds the ordered micro-step list for `instruction`.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn generate(instruction: &Instruction, view: &MachineView<'_>) -> Vec<MicroStep> {
    let signals = *instruction.signals();
    let text = disassemble(instruction);
    let pc = view.pc;
    let next_pc = pc.wrapping_add(4);
    let mut steps = Vec::with_capacity(6);

    steps.push(
        MicroStep::new(Stage::Fetch, format!("Fetch `{text}` from {pc:#x}"))
            .touch(&[
                Component::Pc,
                Component::InstructionMemory,
                Component::PcAdder,
            ])
            .drive(Bus::Pc, format!("{pc:#x}"))
            .drive(Bus::PcPlus4, format!("{next_pc:#x}"))
            .drive(Bus::Instruction, format!("{:#010x}", instruction.word())),
    );

    // Decode: register reads, immediate extension and branch target.
    let (port1, port2) = control::read_ports(instruction);
    let read1 = view.read(port1);
    let read2 = view.read(port2);
    let immediate = control::immediate(instruction);
    let is_branch = control::is_branch(instruction);
    let target = if is_branch {
        branch_target(instruction, pc, read1)
    } else {
        None
    };

    let mut decode = MicroStep::new(Stage::Decode, decode_label(port1, read1, port2, read2))
        .touch(&[Component::InstructionMemory, Component::RegisterFile]);
    if let (Some(register), Some(value)) = (port1, read1) {
        decode = decode
            .drive(Bus::ReadRegister1, register)
            .drive(Bus::ReadData1, value);
    }
    if let (Some(register), Some(value)) = (port2, read2) {
        decode = decode
            .touch(&[Component::Reg2LocMux])
            .drive(Bus::ReadRegister2, register)
            .drive(Bus::ReadData2, value);
    }
    if let Some(immediate) = immediate {
        decode = decode
            .touch(&[Component::SignExtend])
            .drive(Bus::Immediate, immediate_text(instruction, immediate));
    }
    if let Some(target) = target {
        if instruction.format().is_branch() {
            decode = decode.touch(&[Component::ShiftLeft2, Component::BranchAdder]);
        }
        decode = decode.drive(Bus::BranchTarget, format!("{target:#x}"));
    }
    steps.push(decode);

    // Control: static signals, plus the branch decision against current flags.
    let decision = is_branch.then(|| {
        control::branch_taken(
            instruction,
            view.flags,
            read2.unwrap_or(0),
            view.strict_conditions,
        )
    });
    let mut control_step = MicroStep::new(
        Stage::Decode,
        format!("Control signals for {}", instruction.mnemonic()),
    )
    .touch(&[Component::ControlUnit])
    .drive(Bus::ControlSignals, signals);
    if let Some(decision) = &decision {
        control_step = control_step.touch(&[Component::BranchLogic]);
        if signals.flag_branch {
            control_step = control_step
                .touch(&[Component::FlagsRegister])
                .drive(Bus::Flags, view.flags);
        }
        control_step = match decision {
            Ok(taken) => {
                let verdict = if *taken { "taken" } else { "not taken" };
                control_step.label = format!("{}: branch {verdict}", control_step.label);
                control_step.drive(Bus::BranchTaken, taken)
            }
            Err(fault) => control_step
                .drive(Bus::BranchTaken, "fault")
                .act(Some(MicroAction::Fault(fault.clone()))),
        };
    }
    steps.push(control_step);

    let destination = control::destination(instruction);
    let mnemonic = instruction.mnemonic();

    if is_branch {
        let tested = read2.unwrap_or(0);
        let mut execute = MicroStep::new(Stage::Execute, "Execute: no ALU result needed");
        if signals.zero_branch {
            execute = MicroStep::new(Stage::Execute, format!("Execute: test {tested} against zero"))
                .touch(&[Component::AluControl, Component::Alu])
                .drive(Bus::AluInputB, tested)
                .drive(Bus::AluResult, tested);
        }
        steps.push(execute);

        let link = destination.map(|register| (register, signed(next_pc)));
        steps.push(write_back(link, false));

        let taken = matches!(decision, Some(Ok(true)));
        let mut branch = MicroStep::new(Stage::None, "Branch: not taken, PC <- PC + 4")
            .touch(&[Component::PcSrcMux, Component::Pc])
            .drive(Bus::NextPc, format!("{next_pc:#x}"));
        if taken {
            let outcome = target
                .and_then(|target| u64::try_from(target).ok().filter(|pc| pc % 4 == 0))
                .ok_or(Fault::InvalidBranchTarget(target.unwrap_or(-1)));
            branch = match outcome {
                Ok(address) => MicroStep::new(Stage::None, format!("Branch: PC <- {address:#x}"))
                    .touch(&[Component::PcSrcMux, Component::Pc])
                    .drive(Bus::NextPc, format!("{address:#x}"))
                    .act(Some(MicroAction::SetBranchTarget { pc: address })),
                Err(fault) => MicroStep::new(Stage::None, format!("Branch: {fault}"))
                    .touch(&[Component::PcSrcMux])
                    .act(Some(MicroAction::Fault(fault))),
            };
        } else if matches!(decision, Some(Err(_))) {
            branch.label = "Branch: condition faulted".to_string();
        }
        steps.push(branch);
        return steps;
    }

    // Execute: ALU with operand selection by aluSrc.
    let operand_a = read1.unwrap_or(0);
    let operand_b = match (instruction.fields(), immediate) {
        (InstructionFields::IM { hw, .. }, Some(imm)) if mnemonic == "MOVK" => {
            let old = view.registers.read(destination.unwrap_or(Register::XZR));
            let mask = 0xFFFF_i64 << (16 * u32::from(*hw));
            (old & !mask) | imm
        }
        (_, Some(imm)) if signals.alu_src || signals.operation.is_shift() => imm,
        _ => read2.unwrap_or(0),
    };
    let operation = if instruction.format() == Format::D {
        AluOperation::Add
    } else {
        signals.operation
    };
    let outcome = alu::execute(operand_a, operand_b, operation);
    let execute_label = match &outcome {
        Ok(result) => format!(
            "Execute: {operation} {operand_a}, {operand_b} = {}",
            result.value
        ),
        Err(fault) => format!("Execute: {operation} {operand_a}, {operand_b} failed: {fault}"),
    };
    let mut execute = MicroStep::new(Stage::Execute, execute_label)
        .touch(&[Component::AluControl, Component::AluSrcMux, Component::Alu])
        .drive(Bus::AluInputA, operand_a)
        .drive(Bus::AluInputB, operand_b);
    match &outcome {
        Ok(result) => {
            execute = execute.drive(Bus::AluResult, result.value);
            if signals.flag_write {
                execute = execute
                    .touch(&[Component::FlagsRegister])
                    .drive(Bus::Flags, result.flags)
                    .act(Some(MicroAction::UpdateFlags { result: *result }));
            }
        }
        Err(_) => execute = execute.act(fault_action(&outcome)),
    }
    steps.push(execute);

    if instruction.format() != Format::D {
        let value = outcome.ok().map(|result| result.value);
        steps.push(write_back(destination.zip(value), false));
        return steps;
    }

    // Memory access: validated, never clamped.
    let address = outcome.map(|result| result.value).unwrap_or_default();
    let size = AccessSize::for_mnemonic(&mnemonic);
    let mut memory = MicroStep::new(Stage::MemoryAccess, "Memory access")
        .touch(&[Component::DataMemory])
        .drive(Bus::MemoryAddress, address);
    let mut loaded = None;
    if signals.mem_read {
        let load = view.memory.load(address, size, mnemonic == "LDURSW");
        memory.label = match &load {
            Ok(value) => format!("Memory access: load {size} bytes at {address} = {value}"),
            Err(fault) => format!("Memory access: {fault}"),
        };
        memory = match &load {
            Ok(value) => memory.drive(Bus::MemoryReadData, value),
            Err(_) => memory.act(fault_action(&load)),
        };
        loaded = load.ok();
    } else if signals.mem_write {
        let value = read2.unwrap_or(0);
        let store = view.memory.validate(address, size);
        memory.label = match &store {
            Ok(_) => format!("Memory access: store {value} ({size} bytes) at {address}"),
            Err(fault) => format!("Memory access: {fault}"),
        };
        memory = memory.drive(Bus::MemoryWriteData, value).act(match store {
            Ok(_) => Some(MicroAction::WriteMemory {
                address,
                value,
                size,
            }),
            Err(fault) => Some(MicroAction::Fault(fault)),
        });
    }
    steps.push(memory);

    let value = if signals.mem_to_reg { loaded } else { Some(address) };
    steps.push(write_back(destination.zip(value), signals.mem_to_reg));
    steps
}

#[allow(clippy::cast_possible_wrap)]
const fn signed(address: u64) -> i64 {
    address as i64
}

fn branch_target(instruction: &Instruction, pc: u64, read1: Option<i64>) -> Option<i64> {
    match instruction.fields().branch_offset() {
        Some(offset) => Some(signed(pc).wrapping_add(i64::from(offset) * 4)),
        None => read1,
    }
}

fn decode_label(
    port1: Option<Register>,
    read1: Option<i64>,
    port2: Option<Register>,
    read2: Option<i64>,
) -> String {
    let reads: Vec<String> = [(port1, read1), (port2, read2)]
        .into_iter()
        .filter_map(|(register, value)| Some(format!("{}={}", register?, value?)))
        .collect();
    if reads.is_empty() {
        "Decode: no register reads".to_string()
    } else {
        format!("Decode: read {}", reads.join(", "))
    }
}

/// `imm12` feeds the ALU zero-extended; the signed reading is shown beside it.
fn immediate_text(instruction: &Instruction, immediate: i64) -> String {
    match *instruction.fields() {
        InstructionFields::I { imm12, .. } => {
            let signed = sign_extend(u32::from(imm12), 12);
            if signed == immediate {
                immediate.to_string()
            } else {
                format!("{immediate} ({signed})")
            }
        }
        _ => immediate.to_string(),
    }
}

fn write_back(target: Option<(Register, i64)>, from_memory: bool) -> MicroStep {
    match target {
        Some((register, value)) => {
            let label = format!("Write-back: {register} <- {value}");
            let mut step = MicroStep::new(Stage::WriteBack, label)
                .touch(&[Component::MemToRegMux, Component::RegisterFile])
                .drive(Bus::WriteRegister, register)
                .drive(Bus::WriteData, value)
                .act(Some(MicroAction::WriteRegister { register, value }));
            if from_memory {
                step = step.touch(&[Component::DataMemory]);
            }
            step
        }
        None => MicroStep::new(Stage::WriteBack, "Write-back: no register written"),
    }
}

#[cfg(test)]
mod tests {
    use super::{generate, MachineView, MicroAction, Stage};
    use crate::alu::Flags;
    use crate::asm::assemble;
    use crate::decoder::Register;
    use crate::isa::InstructionTable;
    use crate::memory::{AccessSize, Memory};
    use crate::registers::RegisterFile;
    use crate::Fault;

    struct Fixture {
        table: InstructionTable,
        registers: RegisterFile,
        memory: Memory,
        flags: Flags,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: InstructionTable::builtin(),
                registers: RegisterFile::default(),
                memory: Memory::new(64),
                flags: Flags::CLEAR,
            }
        }

        fn steps(&self, text: &str, pc: u64) -> Vec<super::MicroStep> {
            let instruction = assemble(text, &self.table).expect(text);
            generate(
                &instruction,
                &MachineView {
                    pc,
                    flags: self.flags,
                    registers: &self.registers,
                    memory: &self.memory,
                    strict_conditions: false,
                },
            )
        }
    }

    fn stages(steps: &[super::MicroStep]) -> Vec<Stage> {
        steps.iter().map(|step| step.stage).collect()
    }

    #[test]
    fn arithmetic_has_five_steps_ending_in_write_back() {
        let mut fixture = Fixture::new();
        fixture.registers.write(Register::from_field(1), 5);
        fixture.registers.write(Register::from_field(2), 15);
        let steps = fixture.steps("ADD X3, X1, X2", 0);
        assert_eq!(
            stages(&steps),
            vec![
                Stage::Fetch,
                Stage::Decode,
                Stage::Decode,
                Stage::Execute,
                Stage::WriteBack
            ]
        );
        assert_eq!(steps[3].action, None);
        assert_eq!(
            steps[4].action,
            Some(MicroAction::WriteRegister {
                register: Register::from_field(3),
                value: 20
            })
        );
        assert_eq!(steps[0].bus_values.get("pc-plus-4").map(String::as_str), Some("0x4"));
    }

    #[test]
    fn flag_setting_ops_carry_update_flags() {
        let fixture = Fixture::new();
        let steps = fixture.steps("SUBS X0, X1, X1", 0);
        match &steps[3].action {
            Some(MicroAction::UpdateFlags { result }) => {
                assert!(result.flags.zero && result.flags.carry);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn loads_and_stores_add_memory_stage() {
        let mut fixture = Fixture::new();
        fixture.registers.write(Register::from_field(2), 42);
        let store = fixture.steps("STUR X2, [X1, #8]", 4);
        assert_eq!(store.len(), 6);
        assert_eq!(store[4].stage, Stage::MemoryAccess);
        assert_eq!(
            store[4].action,
            Some(MicroAction::WriteMemory {
                address: 8,
                value: 42,
                size: AccessSize::Double
            })
        );
        assert_eq!(store[5].action, None);

        fixture
            .memory
            .store(16, -3, AccessSize::Word)
            .expect("aligned");
        let load = fixture.steps("LDURSW X5, [X1, #16]", 0);
        assert_eq!(
            load[5].action,
            Some(MicroAction::WriteRegister {
                register: Register::from_field(5),
                value: -3
            })
        );
    }

    #[test]
    fn misaligned_store_faults_at_memory_step() {
        let fixture = Fixture::new();
        let steps = fixture.steps("STUR X2, [X1, #4]", 0);
        assert_eq!(
            steps[4].action,
            Some(MicroAction::Fault(Fault::MemoryMisaligned {
                address: 4,
                size: 8
            }))
        );
    }

    #[test]
    fn division_by_zero_faults_at_execute_and_skips_write_back() {
        let fixture = Fixture::new();
        let steps = fixture.steps("SDIV X1, X2, X3", 0);
        assert_eq!(steps[3].action, Some(MicroAction::Fault(Fault::DivisionByZero)));
        assert_eq!(steps[4].action, None);
    }

    #[test]
    fn branch_and_link_writes_return_address_then_branches() {
        let fixture = Fixture::new();
        let steps = fixture.steps("BL #3", 8);
        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[4].action,
            Some(MicroAction::WriteRegister {
                register: Register::LR,
                value: 12
            })
        );
        assert_eq!(steps[5].stage, Stage::None);
        assert_eq!(
            steps[5].action,
            Some(MicroAction::SetBranchTarget { pc: 20 })
        );
    }

    #[test]
    fn untaken_conditional_branch_has_no_branch_action() {
        let fixture = Fixture::new();
        let steps = fixture.steps("B.EQ #2", 0);
        assert_eq!(steps[5].action, None);
        assert_eq!(steps[2].bus_values.get("branch-taken").map(String::as_str), Some("false"));
    }

    #[test]
    fn branch_before_program_start_faults() {
        let fixture = Fixture::new();
        let steps = fixture.steps("B #-2", 4);
        assert_eq!(
            steps[5].action,
            Some(MicroAction::Fault(Fault::InvalidBranchTarget(-4)))
        );
    }

    #[test]
    fn movk_merges_with_destination() {
        let mut fixture = Fixture::new();
        fixture.registers.write(Register::from_field(1), 0x1234_0000_5678);
        let steps = fixture.steps("MOVK X1, #0xBEEF, LSL #16", 0);
        assert_eq!(
            steps[4].action,
            Some(MicroAction::WriteRegister {
                register: Register::from_field(1),
                value: 0x1234_BEEF_5678
            })
        );
    }

    #[test]
    fn immediate_bus_shows_signed_reading_of_imm12() {
        let fixture = Fixture::new();
        let steps = fixture.steps("ADDI X1, X2, #4095", 0);
        assert_eq!(
            steps[1].bus_values.get("immediate").map(String::as_str),
            Some("4095 (-1)")
        );
        assert_eq!(
            steps[4].action,
            Some(MicroAction::WriteRegister {
                register: Register::from_field(1),
                value: 4095
            })
        );

        let steps = fixture.steps("ADDI X1, X2, #7", 0);
        assert_eq!(steps[1].bus_values.get("immediate").map(String::as_str), Some("7"));
    }

    #[test]
    fn generation_is_deterministic() {
        let mut fixture = Fixture::new();
        fixture.registers.write(Register::from_field(1), 7);
        for text in ["ADDI X2, X1, #3", "LDUR X3, [X1, #1]", "CBNZ X1, #-1", "BR X1"] {
            assert_eq!(fixture.steps(text, 12), fixture.steps(text, 12), "{text}");
        }
    }
}
