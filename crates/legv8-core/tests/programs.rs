//! End-to-end programs driven through the machine one micro-step at a time.

#![allow(clippy::pedantic, clippy::nursery)]

use legv8_core::{
    Fault, Flags, Machine, MachineConfig, MicroAction, Register, Stage, StepOutcome,
};
use proptest as _;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const RUN_LIMIT: usize = 10_000;

fn load(lines: &[&str]) -> Machine {
    let mut machine = Machine::default();
    machine.load_program(lines).expect("program assembles");
    machine
}

fn x(machine: &Machine, number: u8) -> i64 {
    machine.registers().read(Register::from_field(u32::from(number)))
}

#[test]
fn comment_only_program_is_finished_immediately() {
    let mut machine = load(&["// nothing here", "", "# still nothing"]);
    assert!(machine.program().is_empty());
    assert!(machine.is_finished());
    assert_eq!(machine.history().len(), 1);
    assert!(machine.current_step().is_none());

    assert_eq!(machine.step(), Ok(StepOutcome::Finished));
    let outcome = machine.run(10).expect("nothing to run");
    assert_eq!(outcome.steps, 0);
    assert_eq!(outcome.final_step, StepOutcome::Finished);
    assert_eq!(machine.step_back(), Err(Fault::NoHistory));
}

#[test]
fn arithmetic_chain_runs_to_completion_without_touching_flags() {
    let mut machine = load(&["MOVZ X1, #5", "ADDI X2, X1, #10", "ADD X3, X1, X2"]);
    let outcome = machine.run(RUN_LIMIT).expect("runs");

    assert_eq!(outcome.steps, 15);
    assert_eq!(outcome.final_step, StepOutcome::Finished);
    assert!(machine.is_finished());
    assert_eq!((x(&machine, 1), x(&machine, 2), x(&machine, 3)), (5, 15, 20));
    assert_eq!(machine.flags(), Flags::CLEAR);
    assert_eq!(machine.last_executed(), Some("ADD X3, X1, X2"));
}

#[test]
fn subs_of_equal_values_sets_zero_and_carry() {
    let mut machine = load(&["SUBS X0, X1, X1"]);
    machine.set_register(1, 0).expect("X1");
    machine.run(RUN_LIMIT).expect("runs");

    assert_eq!(x(&machine, 0), 0);
    let flags = machine.flags();
    assert!(flags.zero);
    assert!(!flags.negative);
    assert!(flags.carry);
    assert!(!flags.overflow);
}

#[rstest]
#[case::spaced(["ADDI X1, XZR, #0", "STUR X2, [X1, #0]", "LDUR X3, [X1, #0]"])]
#[case::compact(["ADDI X1,XZR,#0", "STUR X2,[X1,#0]", "LDUR X3,[X1,#0]"])]
fn store_then_load_round_trips_through_memory(#[case] program: [&str; 3]) {
    let mut machine = load(&program);
    machine.set_register(2, 42).expect("X2");

    machine.step_instruction().expect("ADDI");
    let stages: Vec<Stage> = machine.micro_steps().iter().map(|step| step.stage).collect();
    assert_eq!(
        stages,
        [
            Stage::Fetch,
            Stage::Decode,
            Stage::Decode,
            Stage::Execute,
            Stage::MemoryAccess,
            Stage::WriteBack,
        ]
    );
    machine.step_instruction().expect("STUR");
    assert_eq!(machine.memory().doublewords(), vec![(0, 42)]);
    machine.step_instruction().expect("LDUR");

    assert_eq!(x(&machine, 3), 42);
    assert!(machine.is_finished());
}

#[test]
fn counted_loop_with_labels_accumulates() {
    let mut machine = load(&[
        "// sum 5 + 4 + 3 + 2 + 1",
        "        ADDI X1, XZR, #5",
        "        ADDI X2, XZR, #0",
        "loop:   ADD X2, X2, X1",
        "        SUBI X1, X1, #1",
        "        CBNZ X1, loop",
        "        STUR X2, [XZR, #8]",
    ]);
    machine.run(RUN_LIMIT).expect("runs");

    assert!(machine.is_finished());
    assert_eq!(x(&machine, 2), 15);
    assert_eq!(machine.memory().load(8, legv8_core::AccessSize::Double, false), Ok(15));
    assert_eq!(machine.pc(), 24);
}

#[rstest]
#[case::equal(3, 3, "B.EQ", true)]
#[case::not_equal(3, 4, "B.EQ", false)]
#[case::signed_less(-1, 2, "B.LT", true)]
#[case::signed_greater(5, 2, "B.GT", true)]
#[case::unsigned_lower(-1, 2, "B.LO", false)]
#[case::unsigned_higher_or_same(-1, 2, "B.HS", true)]
#[case::always(0, 9, "B.AL", true)]
fn conditional_branch_follows_compare(
    #[case] left: i64,
    #[case] right: i64,
    #[case] branch: &str,
    #[case] taken: bool,
) {
    let source = [
        "CMP X1, X2".to_string(),
        format!("{branch} skip"),
        "ADDI X3, XZR, #1".to_string(),
        "skip: ADDI X4, XZR, #1".to_string(),
    ];
    let mut machine = Machine::default();
    machine.load_program(&source).expect("assembles");
    machine.set_register(1, left).expect("X1");
    machine.set_register(2, right).expect("X2");
    machine.run(RUN_LIMIT).expect("runs");

    assert_eq!(x(&machine, 3), i64::from(!taken));
    assert_eq!(x(&machine, 4), 1);
}

#[test]
fn branch_and_link_then_return() {
    let mut machine = load(&[
        "BL double",
        "B end",
        "double: ADD X0, X0, X0",
        "BR LR",
        "end: ADDI X5, XZR, #1",
    ]);
    machine.set_register(0, 21).expect("X0");
    machine.run(RUN_LIMIT).expect("runs");

    assert_eq!(x(&machine, 0), 42);
    assert_eq!(x(&machine, 30), 4);
    assert_eq!(x(&machine, 5), 1);
    assert!(machine.is_finished());
}

#[test]
fn movk_inserts_halfword_without_clearing_others() {
    let mut machine = load(&["MOVZ X1, #0x1234", "MOVK X1, #0xABCD, LSL #16"]);
    machine.run(RUN_LIMIT).expect("runs");
    assert_eq!(x(&machine, 1), 0xABCD_1234);
}

#[test]
fn never_condition_falls_through_unless_strict() {
    let source = ["B.NV skip", "ADDI X1, XZR, #1", "skip: ADDI X2, XZR, #1"];

    let mut lenient = load(&source);
    lenient.run(RUN_LIMIT).expect("runs");
    assert_eq!(x(&lenient, 1), 1);

    let mut strict = Machine::new(MachineConfig {
        strict_conditions: true,
        ..MachineConfig::default()
    });
    strict.load_program(&source).expect("assembles");
    assert_eq!(strict.run(RUN_LIMIT), Err(Fault::InvalidCondition(15)));
    assert_eq!(strict.pc(), 0);
}

#[test]
fn misaligned_store_faults_without_committing() {
    let mut machine = load(&["ADDI X1, XZR, #3", "ADDI X2, XZR, #7", "STUR X2, [X1, #0]"]);
    let error = machine.run(RUN_LIMIT).expect_err("misaligned");

    assert_eq!(
        error,
        Fault::MemoryMisaligned {
            address: 3,
            size: 8
        }
    );
    assert!(machine.memory().doublewords().is_empty());
    assert_eq!(machine.pc(), 8);
    assert_eq!(machine.current_step().map(|step| step.stage), Some(Stage::MemoryAccess));
    assert!(matches!(
        machine.current_step().and_then(|step| step.action.clone()),
        Some(MicroAction::Fault(_))
    ));
}

#[test]
fn out_of_bounds_load_faults_and_keeps_registers() {
    let mut machine = load(&["ADDI X1, XZR, #4095", "LDUR X2, [X1, #1]"]);
    machine.set_register(2, 77).expect("X2");
    let error = machine.run(RUN_LIMIT).expect_err("out of bounds");

    assert_eq!(
        error,
        Fault::MemoryOutOfBounds {
            address: 4096,
            size: 8
        }
    );
    assert_eq!(x(&machine, 2), 77);
}

#[test]
fn division_by_zero_stops_at_execute() {
    let mut machine = load(&["UDIV X1, X2, X3"]);
    assert_eq!(machine.run(RUN_LIMIT), Err(Fault::DivisionByZero));
    assert_eq!(machine.step_index(), 3);
    assert!(!machine.is_finished());
}

#[test]
fn branch_register_to_misaligned_target_faults() {
    let mut machine = load(&["ADDI X9, XZR, #6", "BR X9"]);
    assert_eq!(machine.run(RUN_LIMIT), Err(Fault::InvalidBranchTarget(6)));
    assert_eq!(machine.pc(), 4);
}

#[test]
fn xzr_destination_is_discarded() {
    let mut machine = load(&["ADDI XZR, XZR, #12", "ADD X1, XZR, XZR"]);
    machine.run(RUN_LIMIT).expect("runs");
    assert_eq!(x(&machine, 31), 0);
    assert_eq!(x(&machine, 1), 0);
}

#[test]
fn run_limit_stops_mid_instruction() {
    let mut machine = load(&["ADDI X1, XZR, #1", "ADDI X2, XZR, #2"]);
    let outcome = machine.run(7).expect("runs");
    assert_eq!(outcome.steps, 7);
    assert!(matches!(
        outcome.final_step,
        StepOutcome::Stepped { retired: false, .. }
    ));
    assert_eq!(machine.pc(), 4);
    assert_eq!(machine.step_index(), 2);
}

#[test]
fn invalid_register_index_is_rejected() {
    let mut machine = load(&["ADDI X1, XZR, #1"]);
    assert_eq!(
        machine.set_register(32, 1),
        Err(Fault::InvalidRegisterIndex(32))
    );
}
