//! ISA conformance: ALU flag semantics, encode/decode round trips, table loading.

#![allow(clippy::pedantic, clippy::nursery)]

use legv8_core::alu::execute;
use legv8_core::{
    assemble, decode, disassemble, generate, AluOperation, Fault, Flags, Format,
    InstructionTable, MachineView, Memory, RegisterFile, BUILTIN_TABLE,
};
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

proptest! {
    #[test]
    fn add_flags_match_unsigned_and_signed_overflow(a in any::<i64>(), b in any::<i64>()) {
        let result = execute(a, b, AluOperation::Add).expect("add never faults");
        let (wrapped, carry) = (a as u64).overflowing_add(b as u64);
        prop_assert_eq!(result.value, wrapped as i64);
        prop_assert_eq!(result.flags.carry, carry);
        let sum_sign = result.value < 0;
        prop_assert_eq!(result.flags.overflow, (a < 0) == (b < 0) && (a < 0) != sum_sign);
        prop_assert_eq!(result.flags.zero, result.value == 0);
        prop_assert_eq!(result.flags.negative, sum_sign);
    }

    #[test]
    fn sub_carry_means_no_borrow(a in any::<i64>(), b in any::<i64>()) {
        let result = execute(a, b, AluOperation::Sub).expect("sub never faults");
        prop_assert_eq!(result.flags.carry, (a as u64) >= (b as u64));
        prop_assert_eq!(result.value, a.wrapping_sub(b));
    }

    #[test]
    fn division_by_zero_always_faults(a in any::<i64>()) {
        prop_assert_eq!(execute(a, 0, AluOperation::Sdiv), Err(Fault::DivisionByZero));
        prop_assert_eq!(execute(a, 0, AluOperation::Udiv), Err(Fault::DivisionByZero));
    }

    #[test]
    fn register_31_reads_zero_after_any_write(value in any::<i64>()) {
        let mut registers = RegisterFile::default();
        registers.set(31, value).expect("index in range");
        prop_assert_eq!(registers.get(31), Ok(0));
    }

    #[test]
    fn arbitrary_words_decode_or_report_unknown_opcode(word in any::<u32>()) {
        let table = InstructionTable::builtin();
        match decode(word, &table) {
            Ok(instruction) => prop_assert_eq!(instruction.word(), word),
            Err(fault) => prop_assert_eq!(fault, Fault::UnknownOpcode { word }),
        }
    }
}

#[rstest]
#[case::register("ADD X3, X1, X2", Format::R)]
#[case::shift("LSL X4, X5, #3", Format::R)]
#[case::branch_register("BR X30", Format::R)]
#[case::immediate("SUBI X9, X10, #4095", Format::I)]
#[case::data("LDUR X1, [X2, #-8]", Format::D)]
#[case::byte_store("STURB X7, [X28, #255]", Format::D)]
#[case::branch("B #-4", Format::B)]
#[case::link("BL #100", Format::B)]
#[case::wide("MOVK X2, #65535, LSL #48", Format::IM)]
#[case::compare_branch("CBZ X5, #-2", Format::CB)]
#[case::conditional("B.GE #7", Format::CB)]
fn decode_encode_round_trip(#[case] text: &str, #[case] format: Format) {
    let table = InstructionTable::builtin();
    let instruction = assemble(text, &table).expect("assembles");
    assert_eq!(instruction.format(), format);

    let decoded = decode(instruction.encode(), &table).expect("decodes");
    assert_eq!(disassemble(&decoded), text);
    assert_eq!(decoded.word(), instruction.word());
}

#[test]
fn builtin_table_parses_every_record() {
    let table = InstructionTable::parse(BUILTIN_TABLE);
    assert_eq!(table.len(), 40);
    assert!(table.lookup("ldursw").is_some());
}

#[test]
fn malformed_table_lines_are_skipped() {
    let text = "\
# custom table
ADD  R 10001011000 1 0 0 0 0 0 0 0 0 0 10 ADD
BROKEN R 101 1 0
SUBI I 1101000100 1 1 0 0 0 0 0 0 0 0 10 SUB
BAD Q 1101000100 1 1 0 0 0 0 0 0 0 0 10 SUB
";
    let table = InstructionTable::parse(text);
    assert_eq!(table.len(), 2);
    assert!(table.lookup("BROKEN").is_none());

    let instruction = assemble("SUBI X1, X2, #3", &table).expect("custom table");
    assert_eq!(instruction.signals().operation, AluOperation::Sub);
    assert_eq!(
        assemble("ORR X1, X2, X3", &table).map(|i| i.word()),
        Err(Fault::UnknownMnemonic("ORR".to_string()))
    );
}

#[test]
fn generation_is_deterministic() {
    let table = InstructionTable::builtin();
    let memory = Memory::new(256);
    let mut registers = RegisterFile::default();
    registers.set(2, 40).expect("X2");
    let view = MachineView {
        pc: 8,
        flags: Flags::CLEAR,
        registers: &registers,
        memory: &memory,
        strict_conditions: false,
    };
    for text in ["ADDS X1, X2, X3", "LDUR X1, [X2, #8]", "CBNZ X2, #3", "B.MI #-2"] {
        let instruction = assemble(text, &table).expect("assembles");
        let first = generate(&instruction, &view);
        let second = generate(&instruction, &view);
        assert_eq!(first, second, "{text}");
    }
}
