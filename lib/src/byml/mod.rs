//! BYML binary documents, versions 2 to 4.
//!
//! Layout: a 0x10 byte header (`BY` big endian or `YB` little endian, u16 version, then
//! offsets of the hash key table, the string table and the root node), followed by the
//! two sorted string tables and the node tree. Containers store one u32 slot per child;
//! small values live in the slot, everything else is referenced by offset.

use std::collections::{BTreeMap, BTreeSet};

use binrw::prelude::*;
use binrw::Endian;
use tracing::debug;

use crate::binary::{Reader, Writer};
use crate::{Error, Result};

pub mod text;

const MAX_DEPTH: usize = 128;
pub const DEFAULT_VERSION: u16 = 2;

#[binrw]
#[brw(repr = u8)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeType {
    String = 0xA0,
    Binary = 0xA1,
    Array = 0xC0,
    Hash = 0xC1,
    StringTable = 0xC2,
    Bool = 0xD0,
    Int = 0xD1,
    Float = 0xD2,
    UInt = 0xD3,
    Int64 = 0xD4,
    UInt64 = 0xD5,
    Double = 0xD6,
    Null = 0xFF,
}

#[binrw]
#[derive(Debug, Clone, Copy)]
struct Header {
    version: u16,
    hash_key_table_offset: u32,
    string_table_offset: u32,
    root_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Byml {
    #[default]
    Null,
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Byml>),
    Hash(BTreeMap<String, Byml>),
    Bool(bool),
    Int(i32),
    Float(f32),
    UInt(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid("BYML", reason)
}

impl Byml {
    fn node_type(&self) -> NodeType {
        match self {
            Byml::Null => NodeType::Null,
            Byml::String(_) => NodeType::String,
            Byml::Binary(_) => NodeType::Binary,
            Byml::Array(_) => NodeType::Array,
            Byml::Hash(_) => NodeType::Hash,
            Byml::Bool(_) => NodeType::Bool,
            Byml::Int(_) => NodeType::Int,
            Byml::Float(_) => NodeType::Float,
            Byml::UInt(_) => NodeType::UInt,
            Byml::Int64(_) => NodeType::Int64,
            Byml::UInt64(_) => NodeType::UInt64,
            Byml::Double(_) => NodeType::Double,
        }
    }

    /// Values that fit in a container slot.
    fn is_inline(&self) -> bool {
        matches!(
            self,
            Byml::Null | Byml::String(_) | Byml::Bool(_) | Byml::Int(_) | Byml::Float(_) | Byml::UInt(_)
        )
    }

    pub fn get(&self, key: &str) -> Option<&Byml> {
        match self {
            Byml::Hash(map) => map.get(key),
            _ => None,
        }
    }

    pub fn index(&self, idx: usize) -> Option<&Byml> {
        match self {
            Byml::Array(items) => items.get(idx),
            _ => None,
        }
    }

    /// Byte order and version of a BYML buffer.
    pub fn detect(data: &[u8]) -> Result<(Endian, u16)> {
        let endian = match data.get(..2) {
            Some(b"BY") => Endian::Big,
            Some(b"YB") => Endian::Little,
            _ => return Err(invalid("bad magic")),
        };
        let mut reader = Reader::new(data, endian);
        reader.skip(2)?;
        let version = reader.u16().map_err(|e| e.into_format("BYML"))?;
        if !(2..=4).contains(&version) {
            return Err(invalid(format!("unsupported version {version}")));
        }
        Ok((endian, version))
    }

    pub fn read(data: &[u8]) -> Result<Byml> {
        Self::read_raw(data).map_err(|e| e.into_format("BYML"))
    }

    fn read_raw(data: &[u8]) -> Result<Byml> {
        let (endian, _) = Self::detect(data)?;
        let mut reader = Reader::new(data, endian);
        reader.skip(2)?;
        let header: Header = reader.read()?;
        let keys = read_string_table(&mut reader, header.hash_key_table_offset)?;
        let strings = read_string_table(&mut reader, header.string_table_offset)?;
        debug!(keys = keys.len(), strings = strings.len(), "decoding BYML");
        let mut parser = Parser {
            reader,
            keys,
            strings,
        };
        if header.root_offset == 0 {
            return Ok(Byml::Null);
        }
        let root_type: NodeType = parser
            .reader
            .seek_task(header.root_offset as u64, |r| r.read())?;
        match root_type {
            NodeType::Array | NodeType::Hash => parser.node(root_type, header.root_offset, 0),
            other => Err(invalid(format!("root node is {other:?}"))),
        }
    }

    fn collect_strings<'a>(&'a self, keys: &mut BTreeSet<&'a str>, strings: &mut BTreeSet<&'a str>) {
        match self {
            Byml::String(s) => {
                strings.insert(s);
            }
            Byml::Array(items) => items.iter().for_each(|i| i.collect_strings(keys, strings)),
            Byml::Hash(map) => {
                for (key, value) in map {
                    keys.insert(key);
                    value.collect_strings(keys, strings);
                }
            }
            _ => {}
        }
    }

    pub fn to_binary(&self, endian: Endian, version: u16) -> Result<Vec<u8>> {
        if !(2..=4).contains(&version) {
            return Err(Error::ValueOutOfRange {
                field: "BYML version",
                value: version as u64,
            });
        }
        if !matches!(self, Byml::Null | Byml::Array(_) | Byml::Hash(_)) {
            return Err(invalid("the root must be an array, a hash or null"));
        }
        let mut keys = BTreeSet::new();
        let mut strings = BTreeSet::new();
        self.collect_strings(&mut keys, &mut strings);
        let tables = Tables {
            keys: keys.into_iter().collect(),
            strings: strings.into_iter().collect(),
        };

        let mut writer = Writer::new(endian);
        writer.bytes(match endian {
            Endian::Big => b"BY",
            Endian::Little => b"YB",
        })?;
        writer.write(&Header {
            version,
            hash_key_table_offset: 0,
            string_table_offset: 0,
            root_offset: 0,
        })?;
        if !tables.keys.is_empty() {
            let pos = offset32(writer.position())?;
            writer.write_at(4, &pos)?;
            write_string_table(&mut writer, &tables.keys)?;
        }
        if !tables.strings.is_empty() {
            let pos = offset32(writer.position())?;
            writer.write_at(8, &pos)?;
            write_string_table(&mut writer, &tables.strings)?;
        }
        if !matches!(self, Byml::Null) {
            let root = write_container(&mut writer, self, &tables)?;
            writer.write_at(12, &root)?;
        }
        Ok(writer.into_inner())
    }
}

fn read_string_table(reader: &mut Reader, offset: u32) -> Result<Vec<String>> {
    if offset == 0 {
        return Ok(vec![]);
    }
    let start = offset as u64;
    reader.seek_task(start, |r| {
        let ty: NodeType = r.read()?;
        if ty != NodeType::StringTable {
            return Err(invalid(format!("expected a string table at {start:#x}")));
        }
        let count = r.u24()?;
        let offsets = (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
        offsets
            .into_iter()
            .map(|o| r.null_string_at(start + o as u64))
            .collect()
    })
}

struct Parser<'a> {
    reader: Reader<'a>,
    keys: Vec<String>,
    strings: Vec<String>,
}

impl Parser<'_> {
    fn node(&mut self, ty: NodeType, value: u32, depth: usize) -> Result<Byml> {
        let pos = value as u64;
        Ok(match ty {
            NodeType::String => Byml::String(
                self.strings
                    .get(value as usize)
                    .cloned()
                    .ok_or_else(|| invalid(format!("string index {value} out of range")))?,
            ),
            NodeType::Binary => self.reader.seek_task(pos, |r| {
                let len = r.u32()?;
                Ok(Byml::Binary(r.bytes(len as usize)?.to_vec()))
            })?,
            NodeType::Array => self.array(pos, depth + 1)?,
            NodeType::Hash => self.hash(pos, depth + 1)?,
            NodeType::StringTable => return Err(invalid("string table used as a value")),
            NodeType::Bool => Byml::Bool(value != 0),
            NodeType::Int => Byml::Int(value as i32),
            NodeType::Float => Byml::Float(f32::from_bits(value)),
            NodeType::UInt => Byml::UInt(value),
            NodeType::Int64 => Byml::Int64(self.reader.seek_task(pos, |r| r.i64())?),
            NodeType::UInt64 => Byml::UInt64(self.reader.seek_task(pos, |r| r.u64())?),
            NodeType::Double => Byml::Double(self.reader.seek_task(pos, |r| r.f64())?),
            NodeType::Null => Byml::Null,
        })
    }

    fn container_header(&mut self, pos: u64, expected: NodeType, depth: usize) -> Result<u32> {
        if depth > MAX_DEPTH {
            return Err(invalid("nodes nested too deeply"));
        }
        let (ty, count) = self
            .reader
            .seek_task(pos, |r| Ok((r.read::<NodeType>()?, r.u24()?)))?;
        if ty != expected {
            return Err(invalid(format!("expected {expected:?} at {pos:#x}, found {ty:?}")));
        }
        Ok(count)
    }

    fn array(&mut self, pos: u64, depth: usize) -> Result<Byml> {
        let count = self.container_header(pos, NodeType::Array, depth)?;
        let types: Vec<NodeType> = self
            .reader
            .seek_task(pos + 4, |r| (0..count).map(|_| r.read()).collect())?;
        let values_start = (pos + 4 + count as u64).next_multiple_of(4);
        let mut items = Vec::with_capacity(types.len());
        for (i, ty) in types.into_iter().enumerate() {
            let value = self
                .reader
                .seek_task(values_start + 4 * i as u64, |r| r.u32())?;
            items.push(self.node(ty, value, depth)?);
        }
        Ok(Byml::Array(items))
    }

    fn hash(&mut self, pos: u64, depth: usize) -> Result<Byml> {
        let count = self.container_header(pos, NodeType::Hash, depth)?;
        let mut map = BTreeMap::new();
        for i in 0..count as u64 {
            let (key_idx, ty, value) = self.reader.seek_task(pos + 4 + 8 * i, |r| {
                Ok((r.u24()?, r.read::<NodeType>()?, r.u32()?))
            })?;
            let key = self
                .keys
                .get(key_idx as usize)
                .cloned()
                .ok_or_else(|| invalid(format!("hash key index {key_idx} out of range")))?;
            let node = self.node(ty, value, depth)?;
            map.insert(key, node);
        }
        Ok(Byml::Hash(map))
    }
}

struct Tables<'a> {
    keys: Vec<&'a str>,
    strings: Vec<&'a str>,
}

fn table_index(table: &[&str], value: &str) -> Result<u32> {
    table
        .binary_search(&value)
        .map(|idx| idx as u32)
        .map_err(|_| invalid(format!("{value:?} missing from string table")))
}

fn offset32(pos: u64) -> Result<u32> {
    u32::try_from(pos).map_err(|_| Error::ValueOutOfRange {
        field: "BYML offset",
        value: pos,
    })
}

fn write_string_table(writer: &mut Writer, items: &[&str]) -> Result<()> {
    writer.write(&NodeType::StringTable)?;
    writer.u24(items.len() as u32)?;
    let mut offset = 4 + 4 * (items.len() as u64 + 1);
    for item in items {
        writer.u32(offset32(offset)?)?;
        offset += item.len() as u64 + 1;
    }
    writer.u32(offset32(offset)?)?;
    for item in items {
        writer.null_string(item)?;
    }
    writer.align(4)
}

fn inline_value(node: &Byml, tables: &Tables) -> Result<u32> {
    Ok(match node {
        Byml::String(s) => table_index(&tables.strings, s)?,
        Byml::Bool(b) => *b as u32,
        Byml::Int(i) => *i as u32,
        Byml::Float(f) => f.to_bits(),
        Byml::UInt(u) => *u,
        _ => 0,
    })
}

/// Writes a container and, after it, every child that does not fit in a slot.
/// Returns the container's offset.
fn write_container<'a>(writer: &mut Writer, node: &'a Byml, tables: &Tables) -> Result<u32> {
    writer.align(4)?;
    let start = offset32(writer.position())?;
    let mut deferred: Vec<(u64, &'a Byml)> = vec![];
    let mut slot = |writer: &mut Writer, child: &'a Byml| -> Result<()> {
        if !child.is_inline() {
            deferred.push((writer.position(), child));
        }
        writer.u32(inline_value(child, tables)?)
    };
    match node {
        Byml::Array(items) => {
            writer.write(&NodeType::Array)?;
            writer.u24(items.len() as u32)?;
            for item in items {
                writer.write(&item.node_type())?;
            }
            writer.align(4)?;
            for item in items {
                slot(writer, item)?;
            }
        }
        Byml::Hash(map) => {
            writer.write(&NodeType::Hash)?;
            writer.u24(map.len() as u32)?;
            for (key, value) in map {
                writer.u24(table_index(&tables.keys, key)?)?;
                writer.write(&value.node_type())?;
                slot(writer, value)?;
            }
        }
        _ => return Err(invalid("expected a container")),
    }
    for (slot_pos, child) in deferred {
        let pos = match child {
            Byml::Array(_) | Byml::Hash(_) => write_container(writer, child, tables)?,
            _ => {
                writer.align(4)?;
                let pos = offset32(writer.position())?;
                match child {
                    Byml::Int64(v) => writer.i64(*v)?,
                    Byml::UInt64(v) => writer.u64(*v)?,
                    Byml::Double(v) => writer.f64(*v)?,
                    Byml::Binary(data) => {
                        writer.u32(offset32(data.len() as u64)?)?;
                        writer.bytes(data)?;
                    }
                    _ => {}
                }
                pos
            }
        };
        writer.write_at(slot_pos, &pos)?;
    }
    Ok(start)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample() -> Byml {
        let mut inner = BTreeMap::new();
        inner.insert("name".to_string(), Byml::String("Link".into()));
        inner.insert("hp".to_string(), Byml::Int(-3));
        inner.insert("scale".to_string(), Byml::Float(1.5));
        let mut root = BTreeMap::new();
        root.insert("Actor".to_string(), Byml::Hash(inner));
        root.insert(
            "Values".to_string(),
            Byml::Array(vec![
                Byml::Bool(true),
                Byml::UInt(0xFFFF_FFFF),
                Byml::Int64(-1 << 40),
                Byml::UInt64(1 << 63),
                Byml::Double(0.1),
                Byml::Null,
                Byml::String("Link".into()),
                Byml::Array(vec![]),
            ]),
        );
        root.insert("Blob".to_string(), Byml::Binary(vec![1, 2, 3, 4, 5]));
        Byml::Hash(root)
    }

    #[test]
    fn binary_round_trip() {
        let doc = sample();
        for endian in [Endian::Big, Endian::Little] {
            for version in [2, 3, 4] {
                let bytes = doc.to_binary(endian, version).unwrap();
                assert_eq!(Byml::detect(&bytes).unwrap(), (endian, version));
                let decoded = Byml::read(&bytes).unwrap();
                assert_eq!(decoded, doc);
                assert_eq!(decoded.to_binary(endian, version).unwrap(), bytes);
            }
        }
    }

    #[test]
    fn known_layout() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Byml::Int(1));
        let bytes = Byml::Hash(map).to_binary(Endian::Big, 2).unwrap();
        let expected: &[u8] = &[
            b'B', b'Y', 0, 2, 0, 0, 0, 0x10, 0, 0, 0, 0, 0, 0, 0, 0x20, // header
            0xC2, 0, 0, 1, 0, 0, 0, 0x0C, 0, 0, 0, 0x0E, b'a', 0, 0, 0, // keys
            0xC1, 0, 0, 1, 0, 0, 0, 0xD1, 0, 0, 0, 1, // root
        ];
        assert_eq!(bytes, expected);

        let little = Byml::read(&Byml::Hash(BTreeMap::new()).to_binary(Endian::Little, 2).unwrap());
        assert_eq!(little.unwrap(), Byml::Hash(BTreeMap::new()));
    }

    #[test]
    fn null_root_and_scalar_root() {
        let bytes = Byml::Null.to_binary(Endian::Little, 2).unwrap();
        assert_eq!(bytes.len(), 0x10);
        assert_eq!(Byml::read(&bytes).unwrap(), Byml::Null);
        assert!(Byml::Int(1).to_binary(Endian::Little, 2).is_err());
        assert!(Byml::Null.to_binary(Endian::Little, 7).is_err());
    }

    #[test]
    fn malformed_input() {
        let bytes = sample().to_binary(Endian::Little, 2).unwrap();
        assert!(matches!(
            Byml::read(&bytes[..0x30]),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(Byml::read(b"XX\0\x02"), Err(Error::InvalidFormat { .. })));
        assert!(matches!(Byml::read(b"BY\0\x01"), Err(Error::InvalidFormat { .. })));
    }

    #[test]
    fn lookups() {
        let doc = sample();
        assert_eq!(doc.get("Actor").and_then(|a| a.get("hp")), Some(&Byml::Int(-3)));
        assert_eq!(
            doc.get("Values").and_then(|v| v.index(6)),
            Some(&Byml::String("Link".into()))
        );
    }
}
