//! Raw table layer: splits an ESD file into its header, five fixed-width
//! tables, the packed-expression blob and the untouched file tail.
//!
//! Offsets stored in rows are left exactly as found. Turning them into row
//! indices is the graph builder's job.

use std::fmt;

use crate::codec::{
    decode_records, encode_records, record_size, Field, FieldKind, FieldValue, RawTable, Record,
    Schema,
};
use crate::error::{Corruption, DecodeError, DecodeResult, EncodeResult};
use crate::header::{EsdHeader, StateMachineHeader, FILE_HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    State,
    Condition,
    Command,
    CommandArg,
    ConditionPointer,
    Expression,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::State => "state",
            TableKind::Condition => "condition",
            TableKind::Command => "command",
            TableKind::CommandArg => "command argument",
            TableKind::ConditionPointer => "condition pointer",
            TableKind::Expression => "packed expression",
        };
        f.write_str(s)
    }
}

use FieldKind::I32;

pub static STATE_SCHEMA: Schema = Schema {
    name: "state",
    fields: &[
        Field::new("index", I32),
        Field::new("condition_ptr_offset", I32),
        Field::new("condition_ptr_count", I32),
        Field::new("enter_cmd_offset", I32),
        Field::new("enter_cmd_count", I32),
        Field::new("exit_cmd_offset", I32),
        Field::new("exit_cmd_count", I32),
        Field::new("unknown_cmd_offset", I32),
        Field::new("unknown_cmd_count", I32),
    ],
};

pub static CONDITION_SCHEMA: Schema = Schema {
    name: "condition",
    fields: &[
        Field::new("next_state_offset", I32),
        Field::new("commands_offset", I32),
        Field::new("commands_count", I32),
        Field::new("subcondition_ptr_offset", I32),
        Field::new("subcondition_ptr_count", I32),
        Field::new("expr_offset", I32),
        Field::new("expr_size", I32),
    ],
};

pub static COMMAND_SCHEMA: Schema = Schema {
    name: "command",
    fields: &[
        Field::new("bank", I32),
        Field::new("command_index", I32),
        Field::new("args_offset", I32),
        Field::new("args_count", I32),
    ],
};

pub static ARG_SCHEMA: Schema = Schema {
    name: "command argument",
    fields: &[Field::new("expr_offset", I32), Field::new("expr_size", I32)],
};

pub static CONDITION_PTR_SCHEMA: Schema = Schema {
    name: "condition pointer",
    fields: &[Field::new("condition_offset", I32)],
};

pub static NAME_SCHEMA: Schema = Schema {
    name: "name",
    fields: &[Field::new("name", FieldKind::Utf16Str)],
};

/// An (offset, count) pair as stored in a row. An absent span has offset -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub offset: i32,
    pub count: i32,
}

impl Span {
    pub const EMPTY: Span = Span { offset: -1, count: 0 };

    pub fn is_absent(&self) -> bool {
        self.offset == -1
    }
}

/// A typed view over one table's records.
pub trait Row: Sized {
    const KIND: TableKind;

    fn schema() -> &'static Schema;
    fn from_record(record: &Record) -> DecodeResult<Self>;
    fn to_record(&self) -> Record;

    fn width() -> usize {
        record_size(Self::schema())
    }
}

fn span(record: &Record, schema: &'static Schema, at: usize) -> DecodeResult<Span> {
    Ok(Span {
        offset: record.i32(schema, at)?,
        count: record.i32(schema, at + 1)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRow {
    pub index: i32,
    pub conditions: Span,
    pub enter: Span,
    pub exit: Span,
    pub unknown: Span,
}

impl Row for StateRow {
    const KIND: TableKind = TableKind::State;

    fn schema() -> &'static Schema {
        &STATE_SCHEMA
    }

    fn from_record(r: &Record) -> DecodeResult<Self> {
        let s = Self::schema();
        Ok(Self {
            index: r.i32(s, 0)?,
            conditions: span(r, s, 1)?,
            enter: span(r, s, 3)?,
            exit: span(r, s, 5)?,
            unknown: span(r, s, 7)?,
        })
    }

    fn to_record(&self) -> Record {
        Record::from_ints(&[
            self.index,
            self.conditions.offset,
            self.conditions.count,
            self.enter.offset,
            self.enter.count,
            self.exit.offset,
            self.exit.count,
            self.unknown.offset,
            self.unknown.count,
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionRow {
    pub next_state: i32,
    pub commands: Span,
    pub subconditions: Span,
    /// Offset and byte size of the guard expression.
    pub expr: Span,
}

impl Row for ConditionRow {
    const KIND: TableKind = TableKind::Condition;

    fn schema() -> &'static Schema {
        &CONDITION_SCHEMA
    }

    fn from_record(r: &Record) -> DecodeResult<Self> {
        let s = Self::schema();
        Ok(Self {
            next_state: r.i32(s, 0)?,
            commands: span(r, s, 1)?,
            subconditions: span(r, s, 3)?,
            expr: span(r, s, 5)?,
        })
    }

    fn to_record(&self) -> Record {
        Record::from_ints(&[
            self.next_state,
            self.commands.offset,
            self.commands.count,
            self.subconditions.offset,
            self.subconditions.count,
            self.expr.offset,
            self.expr.count,
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRow {
    /// Always 1 in observed files.
    pub bank: i32,
    pub id: i32,
    pub args: Span,
}

impl Row for CommandRow {
    const KIND: TableKind = TableKind::Command;

    fn schema() -> &'static Schema {
        &COMMAND_SCHEMA
    }

    fn from_record(r: &Record) -> DecodeResult<Self> {
        let s = Self::schema();
        Ok(Self {
            bank: r.i32(s, 0)?,
            id: r.i32(s, 1)?,
            args: span(r, s, 2)?,
        })
    }

    fn to_record(&self) -> Record {
        Record::from_ints(&[self.bank, self.id, self.args.offset, self.args.count])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgRow {
    pub expr: Span,
}

impl Row for ArgRow {
    const KIND: TableKind = TableKind::CommandArg;

    fn schema() -> &'static Schema {
        &ARG_SCHEMA
    }

    fn from_record(r: &Record) -> DecodeResult<Self> {
        Ok(Self {
            expr: span(r, Self::schema(), 0)?,
        })
    }

    fn to_record(&self) -> Record {
        Record::from_ints(&[self.expr.offset, self.expr.count])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionPtrRow {
    pub condition: i32,
}

impl Row for ConditionPtrRow {
    const KIND: TableKind = TableKind::ConditionPointer;

    fn schema() -> &'static Schema {
        &CONDITION_PTR_SCHEMA
    }

    fn from_record(r: &Record) -> DecodeResult<Self> {
        Ok(Self {
            condition: r.i32(Self::schema(), 0)?,
        })
    }

    fn to_record(&self) -> Record {
        Record::from_ints(&[self.condition])
    }
}

pub fn typed_rows<T: Row>(table: &RawTable) -> DecodeResult<Vec<T>> {
    table.records().map(T::from_record).collect()
}

/// Build a raw table from typed rows laid out contiguously from `start`.
pub fn raw_table<T: Row>(rows: &[T], start: usize) -> RawTable {
    let width = T::width();
    RawTable {
        schema: T::schema(),
        rows: rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i * width, row.to_record()))
            .collect(),
        end: start + rows.len() * width,
    }
}

/// Start of each region, relative to the data region (the byte after the file header).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    pub state: usize,
    pub condition: usize,
    pub command: usize,
    pub arg: usize,
    pub condition_ptr: usize,
    pub blob: usize,
    pub tail: usize,
}

impl Layout {
    /// Table starts for the given row counts; `blob_len` fixes where the tail begins.
    pub fn compute(machine_header_size: usize, counts: [usize; 5], blob_len: usize) -> Self {
        let [states, conditions, commands, args, ptrs] = counts;
        let state = machine_header_size;
        let condition = state + states * StateRow::width();
        let command = condition + conditions * ConditionRow::width();
        let arg = command + commands * CommandRow::width();
        let condition_ptr = arg + args * ArgRow::width();
        let blob = condition_ptr + ptrs * ConditionPtrRow::width();
        Self {
            state,
            condition,
            command,
            arg,
            condition_ptr,
            blob,
            tail: blob + blob_len,
        }
    }

    pub fn base(&self, kind: TableKind) -> usize {
        match kind {
            TableKind::State => self.state,
            TableKind::Condition => self.condition,
            TableKind::Command => self.command,
            TableKind::CommandArg => self.arg,
            TableKind::ConditionPointer => self.condition_ptr,
            TableKind::Expression => self.blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTables {
    pub header: EsdHeader,
    pub machines: StateMachineHeader,
    pub states: RawTable,
    pub conditions: RawTable,
    pub commands: RawTable,
    pub args: RawTable,
    pub condition_ptrs: RawTable,
    pub layout: Layout,
    /// Packed expressions, from the end of the pointer table to the end of the
    /// last referenced expression.
    pub blob: Vec<u8>,
    /// Everything after the blob, kept verbatim.
    pub tail: Vec<u8>,
}

fn count(what: &'static str, value: i32) -> DecodeResult<usize> {
    usize::try_from(value).map_err(|_| Corruption::NegativeCount { what, value }.into())
}

fn check_width<T: Row>(stored: i32) -> DecodeResult<()> {
    if stored as i64 != T::width() as i64 {
        return Err(DecodeError::UnsupportedVariant(format!(
            "{} rows are {stored} bytes wide, expected {}",
            T::KIND,
            T::width()
        )));
    }
    Ok(())
}

/// Extent of a packed expression referenced by a row.
fn check_expr(expr: Span, layout: &Layout, data_len: usize) -> DecodeResult<Option<usize>> {
    if expr.is_absent() {
        return Ok(None);
    }
    let start = expr.offset as i64;
    let end = start + expr.count as i64;
    if start < layout.blob as i64 || expr.count < 0 {
        return Err(Corruption::PointerOutOfRange {
            table: TableKind::Expression,
            start: start - layout.blob as i64,
            end: end - layout.blob as i64,
            rows: data_len.saturating_sub(layout.blob),
        }
        .into());
    }
    if end as usize > data_len {
        return Err(Corruption::UnexpectedEof {
            offset: data_len,
            needed: end as usize - data_len,
        }
        .into());
    }
    Ok(Some(end as usize))
}

impl RawTables {
    pub fn parse(file: &[u8]) -> DecodeResult<Self> {
        let header = EsdHeader::parse(file)?;

        check_width::<StateRow>(header.state_width)?;
        check_width::<ConditionRow>(header.condition_width)?;
        check_width::<CommandRow>(header.command_width)?;
        check_width::<ArgRow>(header.arg_width)?;

        let machine_count = match header.state_table_count {
            n @ (1 | 2) => n as usize,
            n => {
                return Err(DecodeError::UnsupportedVariant(format!(
                    "state table count {n}"
                )))
            }
        };

        let data = &file[FILE_HEADER_SIZE..];
        let machines = StateMachineHeader::parse(data, machine_count)?;

        let counts = [
            count("state", header.state_count)?,
            count("condition", header.condition_count)?,
            count("command", header.command_count)?,
            count("command argument", header.arg_count)?,
            count("condition pointer", header.condition_ptr_count)?,
        ];
        let mut layout = Layout::compute(machines.size(), counts, 0);

        if header.condition_ptr_offset as i64 != layout.condition_ptr as i64 {
            return Err(Corruption::LayoutMismatch {
                what: "condition pointer table",
                stored: header.condition_ptr_offset as i64,
                computed: layout.condition_ptr as i64,
            }
            .into());
        }

        let covered: i64 = machines.machines.iter().map(|m| m.count as i64).sum();
        if covered != counts[0] as i64 {
            log::warn!(
                "state table header covers {} states, file header declares {}",
                covered,
                counts[0]
            );
        }

        let states = decode_records(&STATE_SCHEMA, data, layout.state, counts[0])?;
        let conditions = decode_records(&CONDITION_SCHEMA, data, layout.condition, counts[1])?;
        let commands = decode_records(&COMMAND_SCHEMA, data, layout.command, counts[2])?;
        let args = decode_records(&ARG_SCHEMA, data, layout.arg, counts[3])?;
        let condition_ptrs =
            decode_records(&CONDITION_PTR_SCHEMA, data, layout.condition_ptr, counts[4])?;

        // The end-of-line marker can occur inside literals, so the blob ends
        // where the furthest referenced expression ends.
        let mut blob_end = layout.blob;
        for row in typed_rows::<ConditionRow>(&conditions)? {
            if let Some(end) = check_expr(row.expr, &layout, data.len())? {
                blob_end = blob_end.max(end);
            }
        }
        for row in typed_rows::<ArgRow>(&args)? {
            if let Some(end) = check_expr(row.expr, &layout, data.len())? {
                blob_end = blob_end.max(end);
            }
        }
        layout.tail = blob_end;

        log::debug!(
            "esd tables: {} states, {} conditions, {} commands, {} args, {} condition pointers, \
             blob {} bytes, tail {} bytes",
            counts[0],
            counts[1],
            counts[2],
            counts[3],
            counts[4],
            blob_end - layout.blob,
            data.len() - blob_end
        );

        Ok(Self {
            header,
            machines,
            states,
            conditions,
            commands,
            args,
            condition_ptrs,
            layout,
            blob: data[layout.blob..blob_end].to_vec(),
            tail: data[blob_end..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> EncodeResult<Vec<u8>> {
        let mut out = self.header.to_bytes()?;
        out.extend(self.machines.to_bytes()?);
        out.extend(encode_records(self.states.schema, self.states.records())?);
        out.extend(encode_records(self.conditions.schema, self.conditions.records())?);
        out.extend(encode_records(self.commands.schema, self.commands.records())?);
        out.extend(encode_records(self.args.schema, self.args.records())?);
        out.extend(encode_records(
            self.condition_ptrs.schema,
            self.condition_ptrs.records(),
        )?);
        out.extend_from_slice(&self.blob);
        out.extend_from_slice(&self.tail);
        Ok(out)
    }

    /// Decode auxiliary name `slot` (0..3) when it points into the file tail.
    pub fn aux_name(&self, slot: usize) -> DecodeResult<Option<String>> {
        let Some(range) = self.header.names.get(slot) else {
            return Ok(None);
        };
        if !range.is_present() || (range.offset as usize) < self.layout.tail {
            return Ok(None);
        }
        let start = range.offset as usize - self.layout.tail;
        if start >= self.tail.len() {
            return Ok(None);
        }
        let table = decode_records(&NAME_SCHEMA, &self.tail, start, 1)?;
        let name = table.records().next().and_then(|r| match r.0.first() {
            Some(FieldValue::Str(s)) => Some(s.clone()),
            _ => None,
        });
        Ok(name)
    }
}
