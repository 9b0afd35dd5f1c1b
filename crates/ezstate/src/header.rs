use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::error::{Corruption, DecodeError, DecodeResult, EncodeError, EncodeResult};

/// Size of [`EsdHeader`] on disk. Every table offset in the file is relative to
/// the first byte after it.
pub const FILE_HEADER_SIZE: usize = 27 * 4;

/// Fields of the state-table header that precede the per-machine entries.
pub const MACHINE_PREFIX_FIELDS: usize = 11;
pub const MACHINE_ENTRY_FIELDS: usize = 4;

/// An (offset, size) pair locating an auxiliary name string.
#[binrw]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuxRange {
    pub offset: i32,
    pub size: i32,
}

impl AuxRange {
    pub fn is_present(&self) -> bool {
        self.offset >= 0 && self.size > 0
    }
}

/// The fixed 27-field file header.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsdHeader {
    /// Format version tag.
    pub magic: u32,
    pub version: [i32; 3],
    pub table_size: i32,
    /// Byte length of everything after this header.
    pub data_size: i32,
    pub unk: [i32; 4],
    /// 1, or 2 for the most complex scripts.
    pub state_table_count: i32,

    pub state_width: i32,
    pub state_count: i32,
    pub condition_width: i32,
    pub condition_count: i32,
    pub command_width: i32,
    pub command_count: i32,
    pub arg_width: i32,
    pub arg_count: i32,

    pub condition_ptr_offset: i32,
    pub condition_ptr_count: i32,

    pub names: [AuxRange; 3],
}

impl EsdHeader {
    pub fn parse(data: &[u8]) -> DecodeResult<Self> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(Corruption::UnexpectedEof {
                offset: data.len(),
                needed: FILE_HEADER_SIZE - data.len(),
            }
            .into());
        }
        EsdHeader::read(&mut Cursor::new(&data[..FILE_HEADER_SIZE]))
            .map_err(|e| DecodeError::UnsupportedVariant(format!("file header: {e}")))
    }

    pub fn to_bytes(&self) -> EncodeResult<Vec<u8>> {
        let mut cur = Cursor::new(Vec::with_capacity(FILE_HEADER_SIZE));
        self.write(&mut cur).map_err(|e| EncodeError::SchemaMismatch {
            schema: "file header",
            detail: e.to_string(),
        })?;
        Ok(cur.into_inner())
    }

    /// Number of 32-bit fields in the state-table header that follows.
    pub fn machine_header_fields(&self) -> usize {
        MACHINE_PREFIX_FIELDS + MACHINE_ENTRY_FIELDS * self.state_table_count.max(0) as usize
    }
}

/// Location of one state table inside the data region.
#[binrw]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateMachineEntry {
    pub id: i32,
    pub offset: i32,
    pub size: i32,
    pub count: i32,
}

/// The variant-sized block at data offset 0: 15 fields for one state table, 19 for two.
#[binrw]
#[brw(little)]
#[br(import(machine_count: usize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachineHeader {
    pub prefix: [i32; MACHINE_PREFIX_FIELDS],
    #[br(count = machine_count)]
    pub machines: Vec<StateMachineEntry>,
}

impl StateMachineHeader {
    pub fn parse(data: &[u8], machines: usize) -> DecodeResult<Self> {
        let size = Self::size_for(machines);
        if data.len() < size {
            return Err(Corruption::UnexpectedEof {
                offset: FILE_HEADER_SIZE + data.len(),
                needed: size - data.len(),
            }
            .into());
        }
        StateMachineHeader::read_args(&mut Cursor::new(&data[..size]), (machines,))
            .map_err(|e| DecodeError::UnsupportedVariant(format!("state table header: {e}")))
    }

    pub fn size_for(machines: usize) -> usize {
        (MACHINE_PREFIX_FIELDS + MACHINE_ENTRY_FIELDS * machines) * 4
    }

    pub fn size(&self) -> usize {
        Self::size_for(self.machines.len())
    }

    pub fn to_bytes(&self) -> EncodeResult<Vec<u8>> {
        let mut cur = Cursor::new(Vec::with_capacity(self.size()));
        self.write(&mut cur).map_err(|e| EncodeError::SchemaMismatch {
            schema: "state table header",
            detail: e.to_string(),
        })?;
        Ok(cur.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> EsdHeader {
        EsdHeader {
            magic: 0x4C53_5366,
            version: [1, 1, 1],
            table_size: 0x54,
            data_size: 0,
            unk: [6, 0x2C, 1, 0x10],
            state_table_count: 2,
            state_width: 36,
            state_count: 3,
            condition_width: 28,
            condition_count: 4,
            command_width: 16,
            command_count: 5,
            arg_width: 8,
            arg_count: 6,
            condition_ptr_offset: 0x200,
            condition_ptr_count: 7,
            names: [
                AuxRange { offset: 0x300, size: 10 },
                AuxRange { offset: -1, size: 0 },
                AuxRange::default(),
            ],
        }
    }

    #[test]
    fn header_is_27_fields() {
        let bytes = sample_header().to_bytes().unwrap();
        assert_eq!(bytes.len(), FILE_HEADER_SIZE);
        assert_eq!(&bytes[12 * 4..13 * 4], &3i32.to_le_bytes());
        assert_eq!(&bytes[19 * 4..20 * 4], &0x200i32.to_le_bytes());
        assert_eq!(EsdHeader::parse(&bytes).unwrap(), sample_header());
        assert_eq!(sample_header().machine_header_fields(), 19);
    }

    #[test]
    fn short_header_is_corruption() {
        let err = EsdHeader::parse(&[0u8; 20]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn machine_header_sizes() {
        assert_eq!(StateMachineHeader::size_for(1), 60);
        assert_eq!(StateMachineHeader::size_for(2), 76);

        let hdr = StateMachineHeader {
            prefix: [1; MACHINE_PREFIX_FIELDS],
            machines: vec![StateMachineEntry { id: 0, offset: 60, size: 72, count: 2 }],
        };
        let bytes = hdr.to_bytes().unwrap();
        assert_eq!(bytes.len(), 60);
        assert_eq!(StateMachineHeader::parse(&bytes, 1).unwrap(), hdr);
    }
}
