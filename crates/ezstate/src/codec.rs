//! Declarative fixed-width record codec.
//!
//! A [`Schema`] lists named fields with their binary widths. [`decode_records`]
//! reads a run of records into a [`RawTable`] keyed by byte offset within the
//! table, and [`encode_records`] writes them back contiguously. The codec knows
//! nothing about what the values mean; pointer interpretation lives in
//! [`crate::graph`].

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use encoding_rs::UTF_16LE;

use crate::error::{Corruption, DecodeResult, EncodeError, EncodeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    /// UTF-16LE code units up to a two-byte zero terminator. Has no declared width.
    Utf16Str,
}

impl FieldKind {
    pub fn width(self) -> Option<usize> {
        match self {
            FieldKind::I8 | FieldKind::U8 => Some(1),
            FieldKind::I16 | FieldKind::U16 => Some(2),
            FieldKind::I32 | FieldKind::U32 | FieldKind::F32 => Some(4),
            FieldKind::Utf16Str => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Sum of the fixed field widths. String fields contribute nothing.
pub fn record_size(schema: &Schema) -> usize {
    schema.fields.iter().filter_map(|f| f.kind.width()).sum()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f32),
    Str(String),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record(pub Vec<FieldValue>);

impl Record {
    /// Read field `idx` as a 32-bit integer.
    pub fn i32(&self, schema: &'static Schema, idx: usize) -> DecodeResult<i32> {
        let field = schema.fields[idx].name;
        match self.0.get(idx) {
            Some(FieldValue::Int(v)) => i32::try_from(*v).map_err(|_| {
                Corruption::FieldType {
                    schema: schema.name,
                    field,
                    found: "out-of-range integer",
                }
                .into()
            }),
            Some(other) => Err(Corruption::FieldType {
                schema: schema.name,
                field,
                found: other.kind_name(),
            }
            .into()),
            None => Err(Corruption::FieldType {
                schema: schema.name,
                field,
                found: "missing",
            }
            .into()),
        }
    }

    pub fn from_ints(values: &[i32]) -> Self {
        Record(values.iter().map(|v| FieldValue::Int(*v as i64)).collect())
    }
}

/// Records of one table, keyed by byte offset from the table start.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub schema: &'static Schema,
    pub rows: BTreeMap<usize, Record>,
    /// Absolute position right after the last record.
    pub end: usize,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_width(&self) -> usize {
        record_size(self.schema)
    }

    pub fn get(&self, offset: usize) -> Option<&Record> {
        self.rows.get(&offset)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.rows.values()
    }
}

/// Read a zero-terminated UTF-16LE string starting at `offset`.
///
/// Returns the string and the number of bytes consumed, terminator included.
pub fn read_utf16z(data: &[u8], offset: usize) -> Result<(String, usize), Corruption> {
    let mut pos = offset;
    loop {
        let unit = data.get(pos..pos + 2).ok_or(Corruption::UnexpectedEof {
            offset: pos,
            needed: 2,
        })?;
        if unit == [0, 0] {
            break;
        }
        pos += 2;
    }
    let s = UTF_16LE
        .decode_without_bom_handling_and_without_replacement(&data[offset..pos])
        .ok_or(Corruption::InvalidUtf16 { offset })?;
    Ok((s.into_owned(), pos + 2 - offset))
}

pub fn write_utf16z(out: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

fn read_field(cur: &mut Cursor<&[u8]>, kind: FieldKind) -> DecodeResult<FieldValue> {
    let offset = cur.position() as usize;
    let eof = |_| Corruption::UnexpectedEof {
        offset,
        needed: kind.width().unwrap_or(2),
    };

    let value = match kind {
        FieldKind::I8 => FieldValue::Int(cur.read_i8().map_err(eof)? as i64),
        FieldKind::U8 => FieldValue::Int(cur.read_u8().map_err(eof)? as i64),
        FieldKind::I16 => FieldValue::Int(cur.read_i16::<LittleEndian>().map_err(eof)? as i64),
        FieldKind::U16 => FieldValue::Int(cur.read_u16::<LittleEndian>().map_err(eof)? as i64),
        FieldKind::I32 => FieldValue::Int(cur.read_i32::<LittleEndian>().map_err(eof)? as i64),
        FieldKind::U32 => FieldValue::Int(cur.read_u32::<LittleEndian>().map_err(eof)? as i64),
        FieldKind::F32 => FieldValue::Float(cur.read_f32::<LittleEndian>().map_err(eof)?),
        FieldKind::Utf16Str => {
            let (s, consumed) = read_utf16z(cur.get_ref(), offset)?;
            cur.set_position((offset + consumed) as u64);
            FieldValue::Str(s)
        }
    };
    Ok(value)
}

/// Read exactly `count` records starting at absolute position `start`.
pub fn decode_records(
    schema: &'static Schema,
    data: &[u8],
    start: usize,
    count: usize,
) -> DecodeResult<RawTable> {
    let mut cur = Cursor::new(data);
    cur.set_position(start as u64);

    let mut rows = BTreeMap::new();
    for _ in 0..count {
        let pos = cur.position() as usize;
        let mut values = Vec::with_capacity(schema.fields.len());
        for field in schema.fields {
            values.push(read_field(&mut cur, field.kind)?);
        }
        rows.insert(pos - start, Record(values));
    }

    Ok(RawTable {
        schema,
        rows,
        end: cur.position() as usize,
    })
}

fn mismatch(schema: &Schema, detail: String) -> EncodeError {
    EncodeError::SchemaMismatch {
        schema: schema.name,
        detail,
    }
}

fn write_field(
    out: &mut Vec<u8>,
    schema: &Schema,
    field: &Field,
    value: &FieldValue,
) -> EncodeResult<()> {
    let int = |v: &FieldValue| -> EncodeResult<i64> {
        match v {
            FieldValue::Int(i) => Ok(*i),
            other => Err(mismatch(
                schema,
                format!("field `{}` expects an integer, got {}", field.name, other.kind_name()),
            )),
        }
    };
    let range = |v: i64| mismatch(schema, format!("value {v} does not fit field `{}`", field.name));

    // Writes into a Vec never fail.
    let res = match field.kind {
        FieldKind::I8 => {
            let v = int(value)?;
            out.write_i8(i8::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::U8 => {
            let v = int(value)?;
            out.write_u8(u8::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::I16 => {
            let v = int(value)?;
            out.write_i16::<LittleEndian>(i16::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::U16 => {
            let v = int(value)?;
            out.write_u16::<LittleEndian>(u16::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::I32 => {
            let v = int(value)?;
            out.write_i32::<LittleEndian>(i32::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::U32 => {
            let v = int(value)?;
            out.write_u32::<LittleEndian>(u32::try_from(v).map_err(|_| range(v))?)
        }
        FieldKind::F32 => match value {
            FieldValue::Float(f) => out.write_f32::<LittleEndian>(*f),
            other => {
                return Err(mismatch(
                    schema,
                    format!("field `{}` expects a float, got {}", field.name, other.kind_name()),
                ))
            }
        },
        FieldKind::Utf16Str => match value {
            FieldValue::Str(s) => {
                write_utf16z(out, s);
                Ok(())
            }
            other => {
                return Err(mismatch(
                    schema,
                    format!("field `{}` expects a string, got {}", field.name, other.kind_name()),
                ))
            }
        },
    };
    res.map_err(|e| mismatch(schema, e.to_string()))
}

/// Serialise positional records contiguously.
pub fn encode_records<'r, I>(schema: &Schema, records: I) -> EncodeResult<Vec<u8>>
where
    I: IntoIterator<Item = &'r Record>,
{
    let mut out = Vec::new();
    for (n, record) in records.into_iter().enumerate() {
        if record.0.len() != schema.fields.len() {
            return Err(mismatch(
                schema,
                format!(
                    "record {n} has {} values, schema has {} fields",
                    record.0.len(),
                    schema.fields.len()
                ),
            ));
        }
        for (field, value) in schema.fields.iter().zip(&record.0) {
            write_field(&mut out, schema, field, value)?;
        }
    }
    Ok(out)
}

/// Serialise records given as name -> value maps. The key set must equal the schema's field names.
pub fn encode_named_records(
    schema: &Schema,
    records: &[BTreeMap<String, FieldValue>],
) -> EncodeResult<Vec<u8>> {
    let expected: BTreeSet<&str> = schema.fields.iter().map(|f| f.name).collect();

    let mut positional = Vec::with_capacity(records.len());
    for (n, map) in records.iter().enumerate() {
        let got: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        if got != expected {
            let missing: Vec<_> = expected.difference(&got).collect();
            let extra: Vec<_> = got.difference(&expected).collect();
            return Err(mismatch(
                schema,
                format!("record {n} keys differ: missing {missing:?}, unexpected {extra:?}"),
            ));
        }
        let values = schema
            .fields
            .iter()
            .filter_map(|f| map.get(f.name).cloned())
            .collect();
        positional.push(Record(values));
    }

    encode_records(schema, &positional)
}
