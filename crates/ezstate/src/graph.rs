//! State graph and the builder that resolves raw table pointers into it.
//!
//! Every pointer stored in a row is `base + index * width` relative to the
//! data region. Resolving recomputes the index and rejects anything that does
//! not land exactly on a row boundary. Next-state references stay logical
//! state ids, so cycles in the state machine never become ownership cycles.

use std::ops::Range;

use itertools::Itertools;
use serde::{Serialize, Serializer};

use crate::error::{Corruption, DecodeResult};
use crate::expr::{Expr, ExprDecoder, OpcodeTable, RegisterFile};
use crate::names::CommandCatalog;
use crate::tables::{
    typed_rows, ArgRow, CommandRow, ConditionPtrRow, ConditionRow, Layout, RawTables, Row, Span,
    StateRow, TableKind,
};

pub const DEFAULT_MAX_SUBCONDITION_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub opcodes: OpcodeTable,
    pub full_brackets: bool,
    pub max_subcondition_depth: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            opcodes: OpcodeTable::extended(),
            full_brackets: false,
            max_subcondition_depth: DEFAULT_MAX_SUBCONDITION_DEPTH,
        }
    }
}

fn serialize_hex<S: Serializer>(raw: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex(raw))
}

fn hex(raw: &[u8]) -> String {
    raw.iter().map(|b| format!("{b:02x}")).join(" ")
}

/// A packed expression: the raw bytecode plus what it decoded to.
///
/// `raw` is authoritative. Repacking writes it back unchanged and never
/// re-synthesises bytecode from the decoded form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    #[serde(serialize_with = "serialize_hex")]
    pub raw: Vec<u8>,
    pub text: String,
    #[serde(skip)]
    pub decoded: Expr,
}

impl Expression {
    pub fn decode(raw: Vec<u8>, decoder: &ExprDecoder<'_>, regs: &mut RegisterFile) -> Self {
        let decoded = decoder.decode(&raw, regs);
        Self {
            text: decoded.render(decoder.full_brackets()),
            raw,
            decoded,
        }
    }

    /// Swap in new bytecode, decoding it in an isolated register scope.
    pub fn replace_raw(&mut self, raw: Vec<u8>, decoder: &ExprDecoder<'_>) {
        *self = Self::decode(raw, decoder, &mut RegisterFile::new());
    }

    pub fn hex(&self) -> String {
        hex(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub bank: i32,
    pub id: i32,
    pub args: Vec<Expression>,
}

impl Command {
    /// `Name(arg=value, ...)`, or the id with raw argument bytes when the command is unknown.
    pub fn signature(&self, catalog: &CommandCatalog) -> String {
        let name = catalog.lookup(self.id);
        match name.name() {
            Some(n) => {
                let args = self
                    .args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| match name.arg_name(i) {
                        Some(arg) => format!("{arg}={}", a.text),
                        None => a.text.clone(),
                    })
                    .join(", ");
                format!("{n}({args})")
            }
            None => {
                log::warn!("unknown command id {}", self.id);
                let args = self.args.iter().map(|a| format!("[{}]", a.hex())).join(", ");
                format!("{}({args})", catalog.display_name(self.id))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    /// Logical id of the target state.
    pub next_state: Option<i32>,
    pub expression: Expression,
    pub commands: Vec<Command>,
    pub subconditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandList {
    Enter,
    Exit,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    pub index: i32,
    /// Evaluated in order; the first that holds wins.
    pub conditions: Vec<Condition>,
    pub enter_commands: Vec<Command>,
    pub exit_commands: Vec<Command>,
    pub unknown_commands: Vec<Command>,
}

impl State {
    pub fn commands(&self, list: CommandList) -> &[Command] {
        match list {
            CommandList::Enter => &self.enter_commands,
            CommandList::Exit => &self.exit_commands,
            CommandList::Unknown => &self.unknown_commands,
        }
    }

    pub fn commands_mut(&mut self, list: CommandList) -> &mut Vec<Command> {
        match list {
            CommandList::Enter => &mut self.enter_commands,
            CommandList::Exit => &mut self.exit_commands,
            CommandList::Unknown => &mut self.unknown_commands,
        }
    }
}

pub struct GraphBuilder<'a> {
    states: Vec<StateRow>,
    conditions: Vec<ConditionRow>,
    commands: Vec<CommandRow>,
    args: Vec<ArgRow>,
    condition_ptrs: Vec<ConditionPtrRow>,
    layout: Layout,
    blob: &'a [u8],
    decoder: ExprDecoder<'a>,
    max_depth: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(tables: &'a RawTables, options: &'a BuildOptions) -> DecodeResult<Self> {
        Ok(Self {
            states: typed_rows(&tables.states)?,
            conditions: typed_rows(&tables.conditions)?,
            commands: typed_rows(&tables.commands)?,
            args: typed_rows(&tables.args)?,
            condition_ptrs: typed_rows(&tables.condition_ptrs)?,
            layout: tables.layout,
            blob: &tables.blob,
            decoder: ExprDecoder::new(&options.opcodes).with_full_brackets(options.full_brackets),
            max_depth: options.max_subcondition_depth,
        })
    }

    pub fn build(&self) -> DecodeResult<Vec<State>> {
        for index in self.states.iter().map(|s| s.index).duplicates() {
            log::warn!("state index {index} is not unique; transitions to it are ambiguous");
        }
        self.states.iter().map(|row| self.build_state(row)).collect()
    }

    fn rows(&self, kind: TableKind) -> usize {
        match kind {
            TableKind::State => self.states.len(),
            TableKind::Condition => self.conditions.len(),
            TableKind::Command => self.commands.len(),
            TableKind::CommandArg => self.args.len(),
            TableKind::ConditionPointer => self.condition_ptrs.len(),
            TableKind::Expression => self.blob.len(),
        }
    }

    fn width(kind: TableKind) -> usize {
        match kind {
            TableKind::State => StateRow::width(),
            TableKind::Condition => ConditionRow::width(),
            TableKind::Command => CommandRow::width(),
            TableKind::CommandArg => ArgRow::width(),
            TableKind::ConditionPointer => ConditionPtrRow::width(),
            TableKind::Expression => 1,
        }
    }

    /// Row index for a stored pointer. The pointer may sit one past the last
    /// row; callers that dereference it check the bound themselves.
    fn index_of(&self, kind: TableKind, stored: i32) -> DecodeResult<usize> {
        let base = self.layout.base(kind);
        let width = Self::width(kind);
        let rel = stored as i64 - base as i64;
        if rel % width as i64 != 0 {
            return Err(Corruption::MisalignedPointer {
                table: kind,
                value: stored as i64,
                base,
                width,
            }
            .into());
        }
        let index = rel / width as i64;
        if index < 0 || index as usize > self.rows(kind) {
            return Err(Corruption::PointerOutOfRange {
                table: kind,
                start: index,
                end: index + 1,
                rows: self.rows(kind),
            }
            .into());
        }
        Ok(index as usize)
    }

    fn resolve_span(&self, kind: TableKind, span: Span) -> DecodeResult<Range<usize>> {
        if span.count < 0 {
            return Err(Corruption::NegativeCount {
                what: "span",
                value: span.count,
            }
            .into());
        }
        if span.is_absent() {
            if span.count != 0 {
                return Err(Corruption::SpanWithoutOffset {
                    table: kind,
                    count: span.count,
                }
                .into());
            }
            return Ok(0..0);
        }

        let start = self.index_of(kind, span.offset)?;
        let end = start + span.count as usize;
        if end > self.rows(kind) {
            return Err(Corruption::PointerOutOfRange {
                table: kind,
                start: start as i64,
                end: end as i64,
                rows: self.rows(kind),
            }
            .into());
        }
        Ok(start..end)
    }

    fn expr_bytes(&self, expr: Span) -> DecodeResult<Vec<u8>> {
        let range = self.resolve_span(TableKind::Expression, expr)?;
        Ok(self.blob[range].to_vec())
    }

    fn state_id_at(&self, stored: i32) -> DecodeResult<i32> {
        let i = self.index_of(TableKind::State, stored)?;
        self.states.get(i).map(|s| s.index).ok_or_else(|| {
            Corruption::PointerOutOfRange {
                table: TableKind::State,
                start: i as i64,
                end: i as i64 + 1,
                rows: self.states.len(),
            }
            .into()
        })
    }

    fn build_state(&self, row: &StateRow) -> DecodeResult<State> {
        log::trace!("building state {}", row.index);

        // Registers live for one state's condition evaluation.
        let mut regs = RegisterFile::new();
        let conditions = self.build_condition_list(row.conditions, &mut regs, 0)?;

        Ok(State {
            index: row.index,
            conditions,
            enter_commands: self.build_commands(row.enter)?,
            exit_commands: self.build_commands(row.exit)?,
            unknown_commands: self.build_commands(row.unknown)?,
        })
    }

    fn build_condition_list(
        &self,
        span: Span,
        regs: &mut RegisterFile,
        depth: usize,
    ) -> DecodeResult<Vec<Condition>> {
        if span.count > 0 && depth > self.max_depth {
            return Err(Corruption::SubconditionDepth {
                limit: self.max_depth,
            }
            .into());
        }

        let range = self.resolve_span(TableKind::ConditionPointer, span)?;
        let mut out = Vec::with_capacity(range.len());
        for i in range {
            let stored = self.condition_ptrs[i].condition;
            let ci = self.index_of(TableKind::Condition, stored)?;
            out.push(self.build_condition(ci, regs, depth)?);
        }
        Ok(out)
    }

    fn build_condition(
        &self,
        ci: usize,
        regs: &mut RegisterFile,
        depth: usize,
    ) -> DecodeResult<Condition> {
        let row = *self.conditions.get(ci).ok_or(Corruption::PointerOutOfRange {
            table: TableKind::Condition,
            start: ci as i64,
            end: ci as i64 + 1,
            rows: self.conditions.len(),
        })?;

        let next_state = match row.next_state {
            -1 => None,
            stored => Some(self.state_id_at(stored)?),
        };
        let expression = Expression::decode(self.expr_bytes(row.expr)?, &self.decoder, regs);
        if !expression.decoded.is_well_formed() {
            log::debug!("condition {ci} decoded to a partial expression: {}", expression.text);
        }

        Ok(Condition {
            next_state,
            expression,
            commands: self.build_commands(row.commands)?,
            subconditions: self.build_condition_list(row.subconditions, regs, depth + 1)?,
        })
    }

    fn build_commands(&self, span: Span) -> DecodeResult<Vec<Command>> {
        let range = self.resolve_span(TableKind::Command, span)?;
        let mut out = Vec::with_capacity(range.len());
        for i in range {
            let row = self.commands[i];
            let arg_rows = self.resolve_span(TableKind::CommandArg, row.args)?;
            let mut args = Vec::with_capacity(arg_rows.len());
            for a in arg_rows {
                // Arguments never see the condition registers.
                let raw = self.expr_bytes(self.args[a].expr)?;
                args.push(Expression::decode(raw, &self.decoder, &mut RegisterFile::new()));
            }
            out.push(Command {
                bank: row.bank,
                id: row.id,
                args,
            });
        }
        Ok(out)
    }
}

/// Resolve raw tables into the ordered state list.
pub fn build(tables: &RawTables, options: &BuildOptions) -> DecodeResult<Vec<State>> {
    GraphBuilder::new(tables, options)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::CommandCatalog;

    fn expr(raw: &[u8]) -> Expression {
        let table = OpcodeTable::basic();
        Expression::decode(raw.to_vec(), &ExprDecoder::new(&table), &mut RegisterFile::new())
    }

    #[test]
    fn signature_uses_argument_names() {
        let cmd = Command {
            bank: 1,
            id: 11,
            args: vec![expr(&[0x82, 0x10, 0x27, 0, 0, 0xA1]), expr(&[0x41, 0xA1])],
        };
        assert_eq!(
            cmd.signature(&CommandCatalog::builtin()),
            "SetEventFlag(event_flag_id=10000, state=1)"
        );
    }

    #[test]
    fn unknown_command_shows_raw_bytes() {
        let cmd = Command {
            bank: 1,
            id: 99,
            args: vec![expr(&[0x41, 0xA1])],
        };
        assert_eq!(cmd.signature(&CommandCatalog::builtin()), "Unknown (99)([41 a1])");
    }

    #[test]
    fn replace_raw_redecodes() {
        let mut e = expr(&[0x41, 0xA1]);
        let table = OpcodeTable::basic();
        e.replace_raw(vec![0x42, 0x43, 0x95, 0xA1], &ExprDecoder::new(&table));
        assert_eq!(e.text, "(2 == 3)");
        assert_eq!(e.hex(), "42 43 95 a1");
    }
}
