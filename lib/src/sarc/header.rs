use binrw::prelude::*;
use binrw::Endian;

use crate::binary::Reader;
use crate::{Error, Result};

pub const HEADER_SIZE: u16 = 0x14;
pub const SFAT_HEADER_SIZE: u16 = 0x0C;
pub const SFNT_HEADER_SIZE: u16 = 0x08;
pub const ENTRY_SIZE: u64 = 0x10;
pub const VERSION: u16 = 0x0100;
pub const MAX_FILES: u16 = 0x3FFF;

#[binrw]
#[brw(magic = b"SARC")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// The header at the start of every archive.
pub struct Header {
    pub header_size: u16,
    pub bom: u16,
    pub file_size: u32,
    pub data_offset: u32,
    pub version: u16,
    pub reserved: u16,
}

#[binrw]
#[brw(magic = b"SFAT")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Occurs right after [Header], describes the entry table.
pub struct FatHeader {
    pub header_size: u16,
    pub file_count: u16,
    pub hash_multiplier: u32,
}

#[binrw]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// One SFAT entry. Data offsets are relative to [Header::data_offset].
pub struct FatEntry {
    pub name_hash: u32,
    pub name_attrs: u32,
    pub data_begin: u32,
    pub data_end: u32,
}

impl FatEntry {
    pub const fn is_named(&self) -> bool {
        self.name_attrs != 0
    }

    /// Offset of the name relative to the start of the name data.
    pub const fn name_offset(&self) -> u64 {
        ((self.name_attrs & 0x00FF_FFFF) * 4) as u64
    }
}

#[binrw]
#[brw(magic = b"SFNT")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FntHeader {
    pub header_size: u16,
    pub reserved: u16,
}

/// Byte order from the BOM bytes at offset 6. `FE FF` read in order means big endian.
pub fn detect_endian(data: &[u8]) -> Result<Endian> {
    match data.get(6..8) {
        Some([0xFE, 0xFF]) => Ok(Endian::Big),
        Some([0xFF, 0xFE]) => Ok(Endian::Little),
        Some(_) => Err(Error::invalid("SARC", "invalid byte order mark")),
        None => Err(Error::invalid("SARC", "file too short")),
    }
}

/// Reads and validates the three headers, leaving the reader at the first SFAT entry.
pub fn read_headers(reader: &mut Reader) -> Result<(Header, FatHeader)> {
    let header: Header = reader.read()?;
    if header.header_size != HEADER_SIZE {
        return Err(Error::invalid(
            "SARC",
            format!("header size {:#x}", header.header_size),
        ));
    }
    if header.bom != 0xFEFF {
        return Err(Error::invalid("SARC", "invalid byte order mark"));
    }
    if header.data_offset as u64 > reader.len() {
        return Err(Error::invalid("SARC", "data offset past end of file"));
    }
    let fat: FatHeader = reader.read()?;
    if fat.header_size != SFAT_HEADER_SIZE {
        return Err(Error::invalid(
            "SARC",
            format!("SFAT header size {:#x}", fat.header_size),
        ));
    }
    if fat.file_count > MAX_FILES {
        return Err(Error::invalid(
            "SARC",
            format!("too many files ({})", fat.file_count),
        ));
    }
    Ok((header, fat))
}
