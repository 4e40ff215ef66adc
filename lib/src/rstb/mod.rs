//! The resource size table (RSTB): how much memory the engine reserves per resource.

use std::collections::BTreeMap;

use binrw::prelude::*;
use binrw::Endian;
use serde::Serialize;
use tracing::debug;

use crate::binary::{Endianness, Reader, Writer};
use crate::hash::resource_hash;
use crate::{decompress_if, Error, Result};

pub mod calc;
pub mod names;
pub mod scan;

pub use calc::{calc_size, Estimate};
pub use names::NameTable;
pub use scan::{scan, ScanReport, Skipped};

const NAME_SIZE: usize = 128;
const CRC_ENTRY_SIZE: u64 = 8;
const NAME_ENTRY_SIZE: u64 = NAME_SIZE as u64 + 4;

#[binrw]
#[brw(magic = b"RSTB")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Header {
    crc_count: u32,
    name_count: u32,
}

#[binrw]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct CrcEntry {
    crc: u32,
    size: u32,
}

/// How a table key addresses an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Hash(u32),
    Name(String),
}

impl Key {
    /// Decimal and `0x` hex keys address a hash directly; anything else is a path.
    pub fn parse(key: &str) -> Self {
        let key = key.trim();
        let hash = match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) => key.parse().ok(),
            None => None,
        };
        match hash {
            Some(hash) => Key::Hash(hash),
            None => Key::Name(key.to_string()),
        }
    }

    pub fn hash(&self) -> u32 {
        match self {
            Key::Hash(hash) => *hash,
            Key::Name(name) => resource_hash(name),
        }
    }
}

/// One row of the table as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeTableEntry {
    pub key: String,
    pub size: u32,
}

/// A decoded RSTB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTable {
    pub crc_table: BTreeMap<u32, u32>,
    /// Entries whose hashes collide, keyed by full path.
    pub name_table: BTreeMap<String, u32>,
    pub endian: Endian,
}

impl SizeTable {
    pub fn new(endian: Endian) -> Self {
        Self {
            crc_table: BTreeMap::new(),
            name_table: BTreeMap::new(),
            endian,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endian.into()
    }

    fn detect_endian(data: &[u8]) -> Result<Endian> {
        let counts = |endian: Endian| -> Result<u64> {
            let mut reader = Reader::new(data, endian);
            let header: Header = reader.read()?;
            Ok(12 + CRC_ENTRY_SIZE * header.crc_count as u64
                + NAME_ENTRY_SIZE * header.name_count as u64)
        };
        let len = data.len() as u64;
        if counts(Endian::Big)? == len {
            Ok(Endian::Big)
        } else if counts(Endian::Little)? == len {
            Ok(Endian::Little)
        } else {
            Err(Error::invalid("RSTB", "entry counts do not match file size"))
        }
    }

    /// Decodes a table. Yaz0 input is decompressed first.
    pub fn read(data: &[u8]) -> Result<Self> {
        let data = decompress_if(data)?;
        Self::read_raw(&data).map_err(|e| e.into_format("RSTB"))
    }

    fn read_raw(data: &[u8]) -> Result<Self> {
        let endian = Self::detect_endian(data)?;
        let mut reader = Reader::new(data, endian);
        let header: Header = reader.read()?;
        let mut table = Self::new(endian);
        for _ in 0..header.crc_count {
            let entry: CrcEntry = reader.read()?;
            table.crc_table.insert(entry.crc, entry.size);
        }
        for _ in 0..header.name_count {
            let name = reader.fixed_string(NAME_SIZE)?;
            let size = reader.u32()?;
            table.name_table.insert(name, size);
        }
        debug!(
            crcs = header.crc_count,
            names = header.name_count,
            ?endian,
            "decoded RSTB"
        );
        Ok(table)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(self.endian);
        writer.write(&Header {
            crc_count: self.crc_table.len() as u32,
            name_count: self.name_table.len() as u32,
        })?;
        for (crc, size) in &self.crc_table {
            writer.write(&CrcEntry {
                crc: *crc,
                size: *size,
            })?;
        }
        for (name, size) in &self.name_table {
            writer.fixed_string(name, NAME_SIZE)?;
            writer.u32(*size)?;
        }
        Ok(writer.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        match Key::parse(key) {
            Key::Name(name) => self
                .name_table
                .get(&name)
                .or_else(|| self.crc_table.get(&resource_hash(&name)))
                .copied(),
            Key::Hash(hash) => self.crc_table.get(&hash).copied(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or updates an entry.
    pub fn set(&mut self, key: &str, size: u64) -> Result<()> {
        let size = u32::try_from(size).map_err(|_| Error::ValueOutOfRange {
            field: "resource size",
            value: size,
        })?;
        match Key::parse(key) {
            Key::Name(name) if self.name_table.contains_key(&name) => {
                self.name_table.insert(name, size);
            }
            key => {
                self.crc_table.insert(key.hash(), size);
            }
        }
        Ok(())
    }

    /// Removes an entry. Absent keys are ignored.
    pub fn delete(&mut self, key: &str) {
        match Key::parse(key) {
            Key::Name(name) if self.name_table.remove(&name).is_some() => {}
            key => {
                self.crc_table.remove(&key.hash());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.crc_table.len() + self.name_table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows for display: hashes resolved through `names` where possible, then name entries.
    pub fn entries(&self, names: &NameTable) -> Vec<SizeTableEntry> {
        self.crc_table
            .iter()
            .map(|(crc, size)| SizeTableEntry {
                key: names
                    .resolve(*crc)
                    .map_or_else(|| crc.to_string(), str::to_string),
                size: *size,
            })
            .chain(self.name_table.iter().map(|(name, size)| SizeTableEntry {
                key: name.clone(),
                size: *size,
            }))
            .collect()
    }

    /// JSON export with the layout `{"hash_map": {crc: size}, "name_map": {name: size}}`.
    pub fn to_json(&self) -> Result<String> {
        let hash_map: BTreeMap<String, u32> = self
            .crc_table
            .iter()
            .map(|(crc, size)| (crc.to_string(), *size))
            .collect();
        Ok(serde_json::to_string_pretty(&serde_json::json!({
            "hash_map": hash_map,
            "name_map": self.name_table,
        }))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_parse_as_hashes_or_names() {
        assert_eq!(Key::parse("12345"), Key::Hash(12345));
        assert_eq!(Key::parse("0xDEADBEEF"), Key::Hash(0xDEAD_BEEF));
        assert_eq!(
            Key::parse("Actor/Link.bxml"),
            Key::Name("Actor/Link.bxml".into())
        );
        assert_eq!(Key::parse("99999999999"), Key::Name("99999999999".into()));
    }

    #[test]
    fn set_get_delete() {
        let mut table = SizeTable::new(Endian::Big);
        table.set("Actor/Link.bxml", 1024).unwrap();
        assert_eq!(table.get("Actor/Link.bxml"), Some(1024));
        assert_eq!(
            table.get(&resource_hash("Actor/Link.bxml").to_string()),
            Some(1024)
        );
        table.delete("Actor/Link.bxml");
        assert_eq!(table.get("Actor/Link.bxml"), None);
        table.delete("Actor/Link.bxml");
        assert!(matches!(
            table.set("x", u32::MAX as u64 + 1),
            Err(Error::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn name_entries_take_priority() {
        let mut table = SizeTable::new(Endian::Little);
        table.name_table.insert("Collide/A.bin".into(), 10);
        table.set("Collide/A.bin", 20).unwrap();
        assert_eq!(table.name_table["Collide/A.bin"], 20);
        assert!(table.crc_table.is_empty());
        table.delete("Collide/A.bin");
        assert!(table.is_empty());
    }

    #[test]
    fn binary_round_trip_both_endians() {
        for endian in [Endian::Big, Endian::Little] {
            let mut table = SizeTable::new(endian);
            table.set("Actor/Link.bxml", 1024).unwrap();
            table.set("0x00000001", 5).unwrap();
            table.name_table.insert("Collide/A.bin".into(), 77);
            let bytes = table.to_binary().unwrap();
            assert_eq!(bytes.len(), 12 + 8 * 2 + 132);
            let decoded = SizeTable::read(&bytes).unwrap();
            assert_eq!(decoded, table);
        }
    }

    #[test]
    fn crc_entries_written_ascending() {
        let mut table = SizeTable::new(Endian::Big);
        for name in ["b", "a", "c", "Actor/Link.bxml"] {
            table.set(name, 1).unwrap();
        }
        let bytes = table.to_binary().unwrap();
        let crcs: Vec<u32> = bytes[12..]
            .chunks(8)
            .map(|c| u32::from_be_bytes(c[..4].try_into().unwrap()))
            .collect();
        assert!(crcs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn long_names_are_rejected() {
        let mut table = SizeTable::new(Endian::Big);
        table.name_table.insert("x".repeat(128), 1);
        assert!(matches!(
            table.to_binary(),
            Err(Error::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            SizeTable::read(b"RSTB\0\0\0\x05\0\0\0\0"),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(
            SizeTable::read(b"NOPE\0\0\0\0\0\0\0\0"),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn entries_resolve_known_hashes() {
        let mut table = SizeTable::new(Endian::Big);
        table.set("Actor/Link.bxml", 3).unwrap();
        table.set("123", 4).unwrap();
        let mut names = NameTable::default();
        names.add("Actor/Link.bxml");
        let keys: Vec<_> = table.entries(&names).into_iter().map(|e| e.key).collect();
        assert!(keys.contains(&"Actor/Link.bxml".to_string()));
        assert!(keys.contains(&"123".to_string()));
    }
}
