use thiserror::Error;

use crate::tables::TableKind;

/// Structural inconsistencies found while reading a file.
///
/// Any of these aborts the whole decode: the input is either corrupted or was
/// crafted by hand, and guessing a repair would hide that.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("unexpected end of data at offset {offset:#x} (needed {needed} more bytes)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("{table} pointer {value:#x} is not aligned to a row (base {base:#x}, width {width})")]
    MisalignedPointer {
        table: TableKind,
        value: i64,
        base: usize,
        width: usize,
    },

    #[error("{table} rows {start}..{end} are out of range (table has {rows} rows)")]
    PointerOutOfRange {
        table: TableKind,
        start: i64,
        end: i64,
        rows: usize,
    },

    #[error("negative {what} count {value}")]
    NegativeCount { what: &'static str, value: i32 },

    #[error("{table} span has count {count} but no offset")]
    SpanWithoutOffset { table: TableKind, count: i32 },

    #[error("subconditions nested deeper than {limit} levels")]
    SubconditionDepth { limit: usize },

    #[error("layout mismatch for {what}: header says {stored:#x}, tables imply {computed:#x}")]
    LayoutMismatch {
        what: &'static str,
        stored: i64,
        computed: i64,
    },

    #[error("field `{field}` of {schema} holds a {found} value")]
    FieldType {
        schema: &'static str,
        field: &'static str,
        found: &'static str,
    },

    #[error("invalid UTF-16 string at offset {offset:#x}")]
    InvalidUtf16 { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("corrupt ESD data: {0}")]
    Corruption(#[from] Corruption),

    #[error("unsupported ESD variant: {0}")]
    UnsupportedVariant(String),
}

impl DecodeError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, DecodeError::Corruption(_))
    }
}

/// Failures while serialising records or repacking a graph.
///
/// These point at a caller building inconsistent data, never at bad input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("record does not match schema {schema}: {detail}")]
    SchemaMismatch { schema: &'static str, detail: String },

    #[error("no state with index {index} exists for a condition's next state")]
    UnresolvedState { index: i32 },

    #[error("state index {index} is used by more than one state; transitions to it are ambiguous")]
    AmbiguousState { index: i32 },

    #[error("state machine entries cover {covered} states but the script has {states}")]
    StateMachinePartition { covered: usize, states: usize },

    #[error("{what} does not fit in a 32-bit field")]
    Overflow { what: &'static str },
}

pub type DecodeResult<T> = Result<T, DecodeError>;
pub type EncodeResult<T> = Result<T, EncodeError>;
