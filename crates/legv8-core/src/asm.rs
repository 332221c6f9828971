//! Assembly text front end: line assembly, canonical disassembly and
//! two-pass program loading with labels.
//!
//! Every line is encoded through the same field layout the decoder uses and
//! then decoded again, so an assembled [`Instruction`] is indistinguishable
//! from one decoded out of a raw word.

use std::collections::HashMap;
use std::sync::Arc;

use crate::control::Condition;
use crate::decoder::{decode, encode, Instruction, InstructionFields, Register};
use crate::isa::{Format, InstructionDefinition, InstructionTable};
use crate::{Fault, ProgramError};

/// Label name to instruction index.
pub type Labels = HashMap<String, usize>;

const IMM12_MAX: i64 = 4095;
const IMM16_MAX: i64 = 0xFFFF;
const SHAMT_MAX: i64 = 63;
const D_OFFSET_MIN: i64 = -256;
const D_OFFSET_MAX: i64 = 255;
const B_OFFSET_BITS: u32 = 26;
const CB_OFFSET_BITS: u32 = 19;

/// Table mnemonic that all `B.<cond>` spellings resolve to.
pub const CONDITIONAL_BRANCH_MNEMONIC: &str = "B.cond";

/// Assembles a single line with no label context.
///
/// # Errors
///
/// Returns [`Fault::UnknownMnemonic`] or [`Fault::InvalidOperand`] for
/// malformed input.
pub fn assemble(line: &str, table: &InstructionTable) -> Result<Instruction, Fault> {
    assemble_at(line, table, &Labels::new(), 0)
}

/// Assembles a line located at instruction `index`, resolving branch labels.
///
/// # Errors
///
/// Returns [`Fault::UnknownMnemonic`] or [`Fault::InvalidOperand`] for
/// malformed input or unknown labels.
pub fn assemble_at(
    line: &str,
    table: &InstructionTable,
    labels: &Labels,
    index: usize,
) -> Result<Instruction, Fault> {
    let text = line.trim();
    let (mnemonic, rest) = text
        .split_once(char::is_whitespace)
        .map_or((text, ""), |(head, tail)| (head, tail.trim()));
    if mnemonic.is_empty() {
        return Err(Fault::invalid_operand(line, "empty instruction"));
    }
    let mut operands: Vec<&str> = rest
        .split(',')
        .map(str::trim)
        .filter(|operand| !operand.is_empty())
        .collect();

    let (definition, condition) = resolve_mnemonic(mnemonic, &mut operands, table)?;
    let context = OperandContext {
        line,
        labels,
        index,
    };
    let fields = build_fields(&definition, condition, &operands, &context)?;
    decode(encode(&definition, &fields), table)
}

/// Canonical text for `instruction`.
#[must_use]
pub fn disassemble(instruction: &Instruction) -> String {
    let mnemonic = instruction.mnemonic();
    let signals = instruction.signals();
    match *instruction.fields() {
        InstructionFields::R { rm, shamt, rn, rd } => {
            if signals.uncond_branch {
                format!("{mnemonic} {rn}")
            } else if signals.operation.is_shift() {
                format!("{mnemonic} {rd}, {rn}, #{shamt}")
            } else {
                format!("{mnemonic} {rd}, {rn}, {rm}")
            }
        }
        InstructionFields::I { imm12, rn, rd } => format!("{mnemonic} {rd}, {rn}, #{imm12}"),
        InstructionFields::D { offset, rn, rt, .. } => {
            format!("{mnemonic} {rt}, [{rn}, #{offset}]")
        }
        InstructionFields::B { offset } => format!("{mnemonic} #{offset}"),
        InstructionFields::IM { hw, imm16, rd } => {
            if hw == 0 {
                format!("{mnemonic} {rd}, #{imm16}")
            } else {
                format!("{mnemonic} {rd}, #{imm16}, LSL #{}", u32::from(hw) * 16)
            }
        }
        InstructionFields::CB { offset, rt } => {
            if signals.flag_branch {
                match Condition::from_code(rt.number()) {
                    Some(condition) => format!("B.{condition} #{offset}"),
                    None => format!("{mnemonic} #{offset}"),
                }
            } else {
                format!("{mnemonic} {rt}, #{offset}")
            }
        }
    }
}

/// Loads a program: strips comments, collects labels, assembles each line.
///
/// # Errors
///
/// Returns the first failing line as a [`ProgramError`].
pub fn load_program<S: AsRef<str>>(
    lines: &[S],
    table: &InstructionTable,
) -> Result<Vec<Instruction>, ProgramError> {
    let mut labels = Labels::new();
    let mut statements = Vec::new();

    for (number, raw) in lines.iter().enumerate() {
        let raw = raw.as_ref();
        let fail = |fault: Fault| ProgramError {
            line: number + 1,
            text: raw.trim().to_string(),
            fault,
        };
        let mut text = strip_comment(raw).trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        if let Some((label, rest)) = split_label(text) {
            if labels.insert(label.to_string(), statements.len()).is_some() {
                return Err(fail(Fault::invalid_operand(label, "duplicate label")));
            }
            text = rest.trim();
            if text.is_empty() {
                continue;
            }
        }
        statements.push((number + 1, raw, text));
    }

    let mut program = Vec::with_capacity(statements.len());
    for (index, (line, raw, text)) in statements.into_iter().enumerate() {
        let instruction =
            assemble_at(text, table, &labels, index).map_err(|fault| ProgramError {
                line,
                text: raw.trim().to_string(),
                fault,
            })?;
        program.push(instruction);
    }
    tracing::debug!(
        instructions = program.len(),
        labels = labels.len(),
        "program loaded"
    );
    Ok(program)
}

fn strip_comment(line: &str) -> &str {
    line.find("//").map_or(line, |pos| &line[..pos])
}

fn split_label(text: &str) -> Option<(&str, &str)> {
    let (label, rest) = text.split_once(':')?;
    let label = label.trim();
    is_valid_label(label).then_some((label, rest))
}

fn is_valid_label(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

type Resolved = (Arc<InstructionDefinition>, Option<Condition>);

/// Maps a written mnemonic to a definition, expanding aliases in place.
fn resolve_mnemonic(
    mnemonic: &str,
    operands: &mut Vec<&str>,
    table: &InstructionTable,
) -> Result<Resolved, Fault> {
    if let Some(definition) = table.lookup(mnemonic) {
        return Ok((Arc::clone(definition), None));
    }

    let upper = mnemonic.to_ascii_uppercase();
    if let Some(suffix) = upper.strip_prefix("B.") {
        let condition = Condition::from_name(suffix)
            .ok_or_else(|| Fault::invalid_operand(mnemonic, "unknown branch condition"))?;
        let definition = table
            .lookup(CONDITIONAL_BRANCH_MNEMONIC)
            .ok_or_else(|| Fault::UnknownMnemonic(mnemonic.to_string()))?;
        return Ok((Arc::clone(definition), Some(condition)));
    }

    let target = match upper.as_str() {
        "CMP" => {
            operands.insert(0, "XZR");
            "SUBS"
        }
        "CMPI" => {
            operands.insert(0, "XZR");
            "SUBIS"
        }
        "MOV" if operands.len() == 2 => {
            operands.insert(1, "XZR");
            "ORR"
        }
        _ => return Err(Fault::UnknownMnemonic(mnemonic.to_string())),
    };
    table
        .lookup(target)
        .map(|definition| (Arc::clone(definition), None))
        .ok_or_else(|| Fault::UnknownMnemonic(mnemonic.to_string()))
}

struct OperandContext<'a> {
    line: &'a str,
    labels: &'a Labels,
    index: usize,
}

impl OperandContext<'_> {
    fn expect_count(&self, operands: &[&str], allowed: &[usize]) -> Result<(), Fault> {
        if allowed.contains(&operands.len()) {
            Ok(())
        } else {
            Err(Fault::invalid_operand(self.line, "wrong operand count"))
        }
    }

    /// Word offset from the current instruction to a numeric or label target.
    fn branch_offset(&self, token: &str, bits: u32) -> Result<i32, Fault> {
        let offset = if is_valid_label(token) {
            let target = self
                .labels
                .get(token)
                .ok_or_else(|| Fault::invalid_operand(token, "unknown label"))?;
            i64::try_from(*target).unwrap_or(i64::MAX) - i64::try_from(self.index).unwrap_or(0)
        } else {
            parse_immediate(token)?
        };
        let limit = 1i64 << (bits - 1);
        let offset = in_range(token, offset, -limit, limit - 1)?;
        i32::try_from(offset)
            .map_err(|_| Fault::invalid_operand(token, "branch offset out of range"))
    }
}

fn build_fields(
    definition: &InstructionDefinition,
    condition: Option<Condition>,
    operands: &[&str],
    context: &OperandContext<'_>,
) -> Result<InstructionFields, Fault> {
    let signals = &definition.signals;
    match definition.format {
        Format::R if signals.uncond_branch => {
            context.expect_count(operands, &[1])?;
            Ok(InstructionFields::R {
                rm: Register::XZR,
                shamt: 0,
                rn: parse_register(operands[0])?,
                rd: Register::XZR,
            })
        }
        Format::R if signals.operation.is_shift() => {
            context.expect_count(operands, &[3])?;
            let shamt = in_range(operands[2], parse_immediate(operands[2])?, 0, SHAMT_MAX)?;
            Ok(InstructionFields::R {
                rm: Register::XZR,
                shamt: narrow(operands[2], shamt)?,
                rn: parse_register(operands[1])?,
                rd: parse_register(operands[0])?,
            })
        }
        Format::R => {
            context.expect_count(operands, &[3])?;
            Ok(InstructionFields::R {
                rm: parse_register(operands[2])?,
                shamt: 0,
                rn: parse_register(operands[1])?,
                rd: parse_register(operands[0])?,
            })
        }
        Format::I => {
            context.expect_count(operands, &[3])?;
            let imm = in_range(operands[2], parse_immediate(operands[2])?, 0, IMM12_MAX)?;
            Ok(InstructionFields::I {
                imm12: narrow(operands[2], imm)?,
                rn: parse_register(operands[1])?,
                rd: parse_register(operands[0])?,
            })
        }
        Format::D => {
            context.expect_count(operands, &[2, 3])?;
            if !operands[1].starts_with('[') {
                return Err(Fault::invalid_operand(operands[1], "expected [Xn, #offset]"));
            }
            let offset = match operands.get(2) {
                Some(token) => {
                    if !token.ends_with(']') {
                        return Err(Fault::invalid_operand(token, "expected closing ]"));
                    }
                    in_range(token, parse_immediate(token)?, D_OFFSET_MIN, D_OFFSET_MAX)?
                }
                None => {
                    if !operands[1].ends_with(']') {
                        return Err(Fault::invalid_operand(operands[1], "expected closing ]"));
                    }
                    0
                }
            };
            Ok(InstructionFields::D {
                offset: narrow(context.line, offset)?,
                op2: 0,
                rn: parse_register(operands[1])?,
                rt: parse_register(operands[0])?,
            })
        }
        Format::B => {
            context.expect_count(operands, &[1])?;
            Ok(InstructionFields::B {
                offset: context.branch_offset(operands[0], B_OFFSET_BITS)?,
            })
        }
        Format::IM => {
            context.expect_count(operands, &[2, 3])?;
            let imm = in_range(operands[1], parse_immediate(operands[1])?, 0, IMM16_MAX)?;
            let hw = match operands.get(2) {
                Some(token) => parse_lsl_group(token)?,
                None => 0,
            };
            Ok(InstructionFields::IM {
                hw,
                imm16: narrow(operands[1], imm)?,
                rd: parse_register(operands[0])?,
            })
        }
        Format::CB => match condition {
            Some(condition) => {
                context.expect_count(operands, &[1])?;
                Ok(InstructionFields::CB {
                    offset: context.branch_offset(operands[0], CB_OFFSET_BITS)?,
                    rt: Register::from_field(u32::from(condition.code())),
                })
            }
            None if signals.flag_branch => Err(Fault::invalid_operand(
                context.line,
                "conditional branch needs a B.<cond> mnemonic",
            )),
            None => {
                context.expect_count(operands, &[2])?;
                Ok(InstructionFields::CB {
                    offset: context.branch_offset(operands[1], CB_OFFSET_BITS)?,
                    rt: parse_register(operands[0])?,
                })
            }
        },
    }
}

fn strip_decoration(token: &str) -> &str {
    token
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
}

fn parse_register(token: &str) -> Result<Register, Fault> {
    strip_decoration(token).parse()
}

/// Parses `#imm`, `imm`, `0x..`, `0b..` and negative forms.
fn parse_immediate(token: &str) -> Result<i64, Fault> {
    let text = strip_decoration(token);
    let text = text.strip_prefix('#').unwrap_or(text).trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits
        .strip_prefix("0b")
        .or_else(|| digits.strip_prefix("0B"))
    {
        i64::from_str_radix(bin, 2)
    } else {
        digits.parse::<i64>()
    }
    .map_err(|_| Fault::invalid_operand(token, "expected an immediate"))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn parse_lsl_group(token: &str) -> Result<u8, Fault> {
    let text = token.trim();
    let amount = text
        .get(..3)
        .filter(|prefix| prefix.eq_ignore_ascii_case("LSL"))
        .map(|_| &text[3..])
        .ok_or_else(|| Fault::invalid_operand(token, "expected LSL #shift"))?;
    match parse_immediate(amount)? {
        0 => Ok(0),
        16 => Ok(1),
        32 => Ok(2),
        48 => Ok(3),
        _ => Err(Fault::invalid_operand(token, "shift must be 0, 16, 32 or 48")),
    }
}

fn in_range(token: &str, value: i64, min: i64, max: i64) -> Result<i64, Fault> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Fault::invalid_operand(token, "immediate out of range"))
    }
}

fn narrow<T: TryFrom<i64>>(token: &str, value: i64) -> Result<T, Fault> {
    T::try_from(value).map_err(|_| Fault::invalid_operand(token, "immediate out of range"))
}
