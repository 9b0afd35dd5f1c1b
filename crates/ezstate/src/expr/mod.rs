//! Stack-machine decoder for packed expressions.
//!
//! Condition guards and command arguments are small postfix programs. Each
//! byte either pushes a value or folds values already on the stack; the
//! decoder mirrors that with a stack of [`Expr`] nodes. Decoding never fails:
//! unknown bytes, truncated literals and stack underflow all degrade to
//! visible placeholders.

mod ast;
pub mod literal;
mod opcodes;

pub use ast::{Expr, Marker};
pub use opcodes::{CompareOp, OpcodeTable, COMPARE_OPCODES};

use crate::codec::read_utf16z;

pub const REGISTER_COUNT: usize = 8;

const STORE_REGISTER: std::ops::RangeInclusive<u8> = 0xA7..=0xAE;
const LOAD_REGISTER: std::ops::RangeInclusive<u8> = 0xAF..=0xB6;

/// Eight scratch slots holding decoded values as text.
///
/// One register file covers the conditions of a single state. Command
/// arguments decode against their own, empty file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    slots: [String; REGISTER_COUNT],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, slot: usize, value: String) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = value;
        }
    }

    pub fn load(&self, slot: usize) -> &str {
        self.slots.get(slot).map(String::as_str).unwrap_or("")
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct ExprDecoder<'t> {
    table: &'t OpcodeTable,
    full_brackets: bool,
}

fn pop(stack: &mut Vec<Expr>) -> Expr {
    stack.pop().unwrap_or_else(|| {
        log::warn!("expression stack underflow");
        Expr::Missing
    })
}

fn take<const N: usize>(bytes: &[u8], pos: &mut usize) -> Option<[u8; N]> {
    let raw: [u8; N] = bytes.get(*pos..*pos + N)?.try_into().ok()?;
    *pos += N;
    Some(raw)
}

impl<'t> ExprDecoder<'t> {
    pub fn new(table: &'t OpcodeTable) -> Self {
        Self {
            table,
            full_brackets: false,
        }
    }

    pub fn with_full_brackets(mut self, full_brackets: bool) -> Self {
        self.full_brackets = full_brackets;
        self
    }

    pub fn table(&self) -> &OpcodeTable {
        self.table
    }

    pub fn full_brackets(&self) -> bool {
        self.full_brackets
    }

    /// Decode against a fresh register file.
    pub fn decode_isolated(&self, bytes: &[u8]) -> Expr {
        self.decode(bytes, &mut RegisterFile::new())
    }

    /// Decode exactly `bytes`. The caller owns the extent; 0xA1 is never a terminator.
    pub fn decode(&self, bytes: &[u8], regs: &mut RegisterFile) -> Expr {
        let mut stack: Vec<Expr> = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let b = bytes[pos];
            pos += 1;

            match b {
                0x3F..=0x7F => stack.push(Expr::Int(b as i32 - 0x40)),
                0x80 => match take::<4>(bytes, &mut pos) {
                    Some(raw) => stack.push(Expr::Float(f32::from_le_bytes(raw))),
                    None => pos = self.truncated(&mut stack, b, bytes.len()),
                },
                0x81 => match take::<8>(bytes, &mut pos) {
                    Some(raw) => stack.push(Expr::Double(f64::from_le_bytes(raw))),
                    None => pos = self.truncated(&mut stack, b, bytes.len()),
                },
                0x82 => match take::<4>(bytes, &mut pos) {
                    Some(raw) => stack.push(Expr::Int(i32::from_le_bytes(raw))),
                    None => pos = self.truncated(&mut stack, b, bytes.len()),
                },
                0x84..=0x86 => {
                    let argc = (b - 0x84) as usize;
                    let mut args: Vec<Expr> = (0..argc).map(|_| pop(&mut stack)).collect();
                    args.reverse();
                    let func = pop(&mut stack);
                    stack.push(self.call(func, args));
                }
                0x91..=0x96 => match self.table.comparisons.get(&b) {
                    Some(op) => {
                        let rhs = pop(&mut stack);
                        let lhs = pop(&mut stack);
                        stack.push(Expr::Compare {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        });
                    }
                    None => stack.push(Expr::Unknown(b)),
                },
                0x98 | 0x99 => {
                    let rhs = Box::new(pop(&mut stack));
                    let lhs = Box::new(pop(&mut stack));
                    stack.push(if b == 0x98 {
                        Expr::And(lhs, rhs)
                    } else {
                        Expr::Or(lhs, rhs)
                    });
                }
                literal::END_OF_LINE => {}
                0xA5 if self.table.string_literals => match read_utf16z(bytes, pos) {
                    Ok((s, consumed)) => {
                        pos += consumed;
                        stack.push(Expr::Str(s));
                    }
                    Err(e) => {
                        log::warn!("bad string literal in expression: {e}");
                        pos = self.truncated(&mut stack, b, bytes.len());
                    }
                },
                0xA6 => annotate(&mut stack, Marker::ForceContinue),
                0xB7 => annotate(&mut stack, Marker::HaltIfFalse),
                b if STORE_REGISTER.contains(&b) => {
                    let value = pop(&mut stack);
                    regs.store((b - 0xA7) as usize, value.render(self.full_brackets));
                }
                b if LOAD_REGISTER.contains(&b) => {
                    let slot = b - 0xAF;
                    stack.push(Expr::Register {
                        slot,
                        value: regs.load(slot as usize).to_string(),
                    });
                }
                _ => stack.push(Expr::Unknown(b)),
            }
        }

        match <[Expr; 1]>::try_from(stack) {
            Ok([expr]) => expr,
            Err(rest) => {
                if rest.len() > 1 {
                    log::warn!("expression left {} values on the stack", rest.len());
                }
                Expr::Sequence(rest)
            }
        }
    }

    /// A literal ran past the end of its byte range. The rest is its payload.
    fn truncated(&self, stack: &mut Vec<Expr>, opcode: u8, end: usize) -> usize {
        log::warn!("truncated literal for opcode {opcode:#04x}");
        stack.push(Expr::Unknown(opcode));
        end
    }

    fn call(&self, func: Expr, args: Vec<Expr>) -> Expr {
        let name = match func.as_int() {
            Some(index) => self.table.function_name(index),
            None => format!("F-{}", func.render(self.full_brackets)),
        };
        Expr::Call { name, args }
    }
}

fn annotate(stack: &mut Vec<Expr>, marker: Marker) {
    let inner = Box::new(pop(stack));
    stack.push(Expr::Annotated { inner, marker });
}
