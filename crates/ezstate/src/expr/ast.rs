use std::fmt::{self, Write};

use itertools::Itertools;

use super::opcodes::CompareOp;

/// Suffix annotations whose evaluator semantics are not confirmed.
///
/// They are carried as opaque markers on the decoded value and rendered as
/// suffixes; nothing in the decoder acts on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// 0xA6, rendered `^`. Hypothesis: keep evaluating even if the value is false.
    ForceContinue,
    /// 0xB7, rendered `!`. Hypothesis: stop evaluating if the value is false.
    HaltIfFalse,
}

impl Marker {
    pub fn suffix(self) -> char {
        match self {
            Marker::ForceContinue => '^',
            Marker::HaltIfFalse => '!',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i32),
    Float(f32),
    Double(f64),
    Str(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// A value loaded back from a register, with the text it held at load time.
    Register {
        slot: u8,
        value: String,
    },
    Annotated {
        inner: Box<Expr>,
        marker: Marker,
    },
    /// Unrecognised opcode byte, kept visible.
    Unknown(u8),
    /// An operand the stack did not have.
    Missing,
    /// Leftover stack values of a malformed or partial expression.
    Sequence(Vec<Expr>),
}

impl Expr {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        !matches!(self, Expr::Sequence(_))
    }

    /// Render as text. `full_brackets` parenthesises both sides of `and`/`or`.
    pub fn render(&self, full_brackets: bool) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_to(&mut out, full_brackets);
        out
    }

    fn write_to(&self, out: &mut String, full: bool) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(out, "{v}"),
            Expr::Float(v) => write!(out, "{v:?}"),
            Expr::Double(v) => write!(out, "{v:?}"),
            Expr::Str(s) => write!(out, "{s:?}"),
            Expr::Call { name, args } => {
                write!(out, "{name}(")?;
                write!(out, "{}", args.iter().map(|a| a.render(full)).join(", "))?;
                out.write_char(')')
            }
            Expr::Compare { op, lhs, rhs } => {
                write!(out, "({} {op} {})", lhs.render(full), rhs.render(full))
            }
            Expr::And(lhs, rhs) => logical(out, "and", lhs, rhs, full),
            Expr::Or(lhs, rhs) => logical(out, "or", lhs, rhs, full),
            Expr::Register { value, .. } => write!(out, "&{value}"),
            Expr::Annotated { inner, marker } => {
                inner.write_to(out, full)?;
                out.write_char(marker.suffix())
            }
            Expr::Unknown(b) => write!(out, "[{b:02x}]"),
            Expr::Missing => out.write_char('?'),
            Expr::Sequence(items) => {
                write!(out, "{}", items.iter().map(|e| e.render(full)).join(" "))
            }
        }
    }
}

fn logical(out: &mut String, op: &str, lhs: &Expr, rhs: &Expr, full: bool) -> fmt::Result {
    if full {
        write!(out, "({}) {op} ({})", lhs.render(full), rhs.render(full))
    } else {
        write!(out, "{} {op} {}", lhs.render(full), rhs.render(full))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}
