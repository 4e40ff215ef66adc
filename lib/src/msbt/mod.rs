//! MSBT message files.
//!
//! A 0x20 byte `MsgStdBn` header is followed by 16-byte aligned sections. `LBL1` maps
//! labels to message indices through a bucketed hash table, `ATR1` holds fixed-size
//! attribute records, `TSY1` style indices and `TXT2` the messages themselves, with
//! inline control sequences. Other sections are carried through untouched.

use std::collections::HashMap;

use binrw::prelude::*;
use binrw::Endian;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binary::{Reader, Writer};
use crate::hash::label_hash;
use crate::{Error, Result};

pub mod text;

const HEADER_SIZE: u64 = 0x20;
const SECTION_HEADER_SIZE: u64 = 0x10;
const FILE_SIZE_OFFSET: u64 = 0x12;
pub const DEFAULT_LABEL_SLOTS: u32 = 101;

const CONTROL_START: u16 = 0x0E;
const CONTROL_CLOSE: u16 = 0x0F;

#[binrw]
#[brw(magic = b"MsgStdBn")]
#[derive(Debug, Clone, Copy)]
struct Header {
    bom: u16,
    unknown: u16,
    encoding: u8,
    version: u8,
    section_count: u16,
    unknown2: u16,
    file_size: u32,
    reserved: [u8; 10],
}

#[binrw]
#[derive(Debug, Clone, Copy)]
struct SectionHeader {
    magic: [u8; 4],
    size: u32,
    reserved: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Utf16,
}

/// Hex strings in text, bytes in memory.
mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum KnownSection {
    LBL1,
    ATR1,
    TSY1,
    TXT2,
}

impl KnownSection {
    fn magic(self) -> [u8; 4] {
        match self {
            KnownSection::LBL1 => *b"LBL1",
            KnownSection::ATR1 => *b"ATR1",
            KnownSection::TSY1 => *b"TSY1",
            KnownSection::TXT2 => *b"TXT2",
        }
    }
}

/// One section in file order. Sections this crate does not model keep their bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section {
    Known(KnownSection),
    Raw {
        magic: String,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}

/// A piece of message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Control {
        group: u16,
        #[serde(rename = "type")]
        kind: u16,
        #[serde(default, with = "hex_bytes")]
        params: Vec<u8>,
    },
    Close {
        group: u16,
        #[serde(rename = "type")]
        kind: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "hex_bytes")]
    pub attributes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<u32>,
    #[serde(default)]
    pub contents: Vec<Content>,
}

fn default_label_slots() -> u32 {
    DEFAULT_LABEL_SLOTS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msbt {
    pub encoding: Encoding,
    pub version: u8,
    #[serde(default = "default_label_slots")]
    pub label_slots: u32,
    #[serde(default)]
    pub attribute_size: u32,
    /// ATR1 bytes after the fixed-size records.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "hex_bytes")]
    pub attribute_tail: Vec<u8>,
    pub sections: Vec<Section>,
    pub entries: Vec<Entry>,
}

impl Default for Msbt {
    fn default() -> Self {
        Self {
            encoding: Encoding::Utf16,
            version: 3,
            label_slots: DEFAULT_LABEL_SLOTS,
            attribute_size: 0,
            attribute_tail: vec![],
            sections: vec![
                Section::Known(KnownSection::LBL1),
                Section::Known(KnownSection::TXT2),
            ],
            entries: vec![],
        }
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::invalid("MSBT", reason)
}

struct Attributes {
    size: u32,
    records: Vec<Vec<u8>>,
    tail: Vec<u8>,
}

fn read_labels(r: &mut Reader) -> Result<(u32, HashMap<u32, String>)> {
    let slots = r.u32()?;
    let mut labels = HashMap::new();
    for slot in 0..slots as u64 {
        let (count, offset) = r.seek_task(4 + 8 * slot, |r| Ok((r.u32()?, r.u32()?)))?;
        r.seek(offset as u64)?;
        for _ in 0..count {
            let name = r.u8_prefixed_string()?;
            let index = r.u32()?;
            labels.entry(index).or_insert(name);
        }
    }
    Ok((slots, labels))
}

fn read_attributes(r: &mut Reader) -> Result<Attributes> {
    let count = r.u32()?;
    let size = r.u32()?;
    let records = (0..count)
        .map(|_| r.bytes(size as usize).map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>>>()?;
    let rest = (r.len() - r.position()) as usize;
    let tail = r.bytes(rest)?.to_vec();
    Ok(Attributes {
        size,
        records,
        tail,
    })
}

fn read_styles(r: &mut Reader) -> Result<Vec<u32>> {
    (0..r.len() / 4).map(|_| r.u32()).collect()
}

fn flush_text(encoding: Encoding, units: &mut Vec<u16>, contents: &mut Vec<Content>) -> Result<()> {
    if units.is_empty() {
        return Ok(());
    }
    let text = match encoding {
        Encoding::Utf16 => String::from_utf16(units).map_err(|e| invalid(e.to_string()))?,
        Encoding::Utf8 => {
            let bytes: Vec<u8> = units.iter().map(|u| *u as u8).collect();
            String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?
        }
    };
    units.clear();
    contents.push(Content::Text(text));
    Ok(())
}

fn read_message(r: &mut Reader, end: u64, encoding: Encoding) -> Result<Vec<Content>> {
    let mut contents = vec![];
    let mut units = vec![];
    while r.position() < end {
        let unit = match encoding {
            Encoding::Utf16 => r.u16()?,
            Encoding::Utf8 => r.u8()? as u16,
        };
        match unit {
            0 => break,
            CONTROL_START => {
                flush_text(encoding, &mut units, &mut contents)?;
                let group = r.u16()?;
                let kind = r.u16()?;
                let size = r.u16()?;
                let params = r.bytes(size as usize)?.to_vec();
                contents.push(Content::Control {
                    group,
                    kind,
                    params,
                });
            }
            CONTROL_CLOSE => {
                flush_text(encoding, &mut units, &mut contents)?;
                let group = r.u16()?;
                let kind = r.u16()?;
                contents.push(Content::Close { group, kind });
            }
            other => units.push(other),
        }
    }
    flush_text(encoding, &mut units, &mut contents)?;
    Ok(contents)
}

fn read_texts(r: &mut Reader, encoding: Encoding) -> Result<Vec<Vec<Content>>> {
    let count = r.u32()?;
    let offsets = (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?;
    let mut messages = Vec::with_capacity(offsets.len());
    for (i, start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).map_or(r.len(), |o| *o as u64);
        r.seek(*start as u64)?;
        messages.push(read_message(r, end, encoding)?);
    }
    Ok(messages)
}

impl Msbt {
    /// Byte order from the byte order mark at 0x08.
    pub fn detect_endian(data: &[u8]) -> Result<Endian> {
        if !data.starts_with(b"MsgStdBn") {
            return Err(invalid("bad magic"));
        }
        match data.get(8..10) {
            Some([0xFE, 0xFF]) => Ok(Endian::Big),
            Some([0xFF, 0xFE]) => Ok(Endian::Little),
            _ => Err(invalid("bad byte order mark")),
        }
    }

    pub fn read(data: &[u8]) -> Result<Self> {
        Self::read_raw(data).map_err(|e| e.into_format("MSBT"))
    }

    fn read_raw(data: &[u8]) -> Result<Self> {
        let endian = Self::detect_endian(data)?;
        let mut reader = Reader::new(data, endian);
        let header: Header = reader.read()?;
        let encoding = match header.encoding {
            0 => Encoding::Utf8,
            1 => Encoding::Utf16,
            other => return Err(invalid(format!("unknown text encoding {other}"))),
        };

        let mut msbt = Msbt {
            encoding,
            version: header.version,
            sections: vec![],
            ..Msbt::default()
        };
        let mut labels = HashMap::new();
        let mut attributes = None;
        let mut styles = None;
        let mut texts = None;
        let mut pos = HEADER_SIZE;
        for _ in 0..header.section_count {
            let section: SectionHeader = reader.seek_task(pos, |r| r.read())?;
            let start = pos + SECTION_HEADER_SIZE;
            let body = reader.seek_task(start, |r| r.bytes(section.size as usize))?;
            let mut r = Reader::new(body, endian);
            let known = match &section.magic {
                b"LBL1" => {
                    let (slots, found) = read_labels(&mut r)?;
                    msbt.label_slots = slots;
                    labels = found;
                    Some(KnownSection::LBL1)
                }
                b"ATR1" => {
                    attributes = Some(read_attributes(&mut r)?);
                    Some(KnownSection::ATR1)
                }
                b"TSY1" => {
                    styles = Some(read_styles(&mut r)?);
                    Some(KnownSection::TSY1)
                }
                b"TXT2" => {
                    texts = Some(read_texts(&mut r, encoding)?);
                    Some(KnownSection::TXT2)
                }
                _ => None,
            };
            let entry = match known {
                Some(kind) if msbt.sections.contains(&Section::Known(kind)) => {
                    return Err(invalid(format!("duplicate {kind:?} section")))
                }
                Some(kind) => Section::Known(kind),
                None => Section::Raw {
                    magic: String::from_utf8_lossy(&section.magic).into_owned(),
                    data: body.to_vec(),
                },
            };
            msbt.sections.push(entry);
            pos = (start + section.size as u64).next_multiple_of(16);
        }

        let texts = texts.unwrap_or_default();
        let count = texts
            .len()
            .max(labels.keys().map(|i| *i as usize + 1).max().unwrap_or(0))
            .max(attributes.as_ref().map_or(0, |a| a.records.len()))
            .max(styles.as_ref().map_or(0, Vec::len));
        let mut texts = texts.into_iter();
        for i in 0..count {
            msbt.entries.push(Entry {
                label: labels.remove(&(i as u32)).unwrap_or_default(),
                attributes: attributes
                    .as_ref()
                    .and_then(|a| a.records.get(i).cloned())
                    .unwrap_or_default(),
                style: styles.as_ref().and_then(|s| s.get(i).copied()),
                contents: texts.next().unwrap_or_default(),
            });
        }
        if let Some(attributes) = attributes {
            msbt.attribute_size = attributes.size;
            msbt.attribute_tail = attributes.tail;
        }
        debug!(entries = msbt.entries.len(), sections = msbt.sections.len(), "decoded MSBT");
        Ok(msbt)
    }

    fn has(&self, kind: KnownSection) -> bool {
        self.sections.contains(&Section::Known(kind))
    }

    /// Checks what the binary layout cannot express.
    pub fn validate(&self) -> Result<()> {
        let schema = |message: String| Error::schema("MSBT", message);
        if self.has(KnownSection::LBL1) && self.label_slots == 0 {
            return Err(schema("label_slots must be at least 1".into()));
        }
        for section in &self.sections {
            if let Section::Raw { magic, .. } = section {
                if magic.len() != 4 {
                    return Err(schema(format!("section magic {magic:?} is not 4 bytes")));
                }
            }
        }
        for entry in &self.entries {
            if self.has(KnownSection::ATR1) && entry.attributes.len() != self.attribute_size as usize {
                return Err(schema(format!(
                    "{}: attributes are {} bytes, expected {}",
                    entry.label,
                    entry.attributes.len(),
                    self.attribute_size
                )));
            }
            for content in &entry.contents {
                match content {
                    Content::Text(text) if text.contains(['\0', '\u{e}', '\u{f}']) => {
                        return Err(schema(format!("{}: text contains a control character", entry.label)))
                    }
                    Content::Control { params, .. } if params.len() > u16::MAX as usize => {
                        return Err(schema(format!("{}: control parameters too long", entry.label)))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn to_binary(&self, endian: Endian) -> Result<Vec<u8>> {
        self.validate()?;
        let mut writer = Writer::new(endian);
        writer.write(&Header {
            bom: 0xFEFF,
            unknown: 0,
            encoding: match self.encoding {
                Encoding::Utf8 => 0,
                Encoding::Utf16 => 1,
            },
            version: self.version,
            section_count: self.sections.len() as u16,
            unknown2: 0,
            file_size: 0,
            reserved: [0; 10],
        })?;
        for section in &self.sections {
            let (magic, body) = match section {
                Section::Known(kind) => {
                    let body = match kind {
                        KnownSection::LBL1 => self.write_labels(endian)?,
                        KnownSection::ATR1 => self.write_attributes(endian)?,
                        KnownSection::TSY1 => self.write_styles(endian)?,
                        KnownSection::TXT2 => self.write_texts(endian)?,
                    };
                    (kind.magic(), body)
                }
                Section::Raw { magic, data } => {
                    let mut bytes = [0u8; 4];
                    bytes.copy_from_slice(magic.as_bytes());
                    (bytes, data.clone())
                }
            };
            writer.write(&SectionHeader {
                magic,
                size: body.len() as u32,
                reserved: [0; 8],
            })?;
            writer.bytes(&body)?;
            writer.align_with(16, 0xAB)?;
        }
        let size = writer.position() as u32;
        writer.write_at(FILE_SIZE_OFFSET, &size)?;
        Ok(writer.into_inner())
    }

    fn write_labels(&self, endian: Endian) -> Result<Vec<u8>> {
        let slots = self.label_slots;
        let mut buckets: Vec<Vec<(&str, u32)>> = vec![vec![]; slots as usize];
        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.label.is_empty() {
                let bucket = label_hash(&entry.label, slots) as usize;
                buckets[bucket].push((&entry.label, idx as u32));
            }
        }
        let mut w = Writer::new(endian);
        w.u32(slots)?;
        let mut offset = 4 + 8 * slots as u64;
        for bucket in &buckets {
            w.u32(bucket.len() as u32)?;
            w.u32(offset as u32)?;
            offset += bucket.iter().map(|(l, _)| l.len() as u64 + 5).sum::<u64>();
        }
        for (label, idx) in buckets.iter().flatten() {
            w.u8_prefixed_string(label)?;
            w.u32(*idx)?;
        }
        Ok(w.into_inner())
    }

    fn write_attributes(&self, endian: Endian) -> Result<Vec<u8>> {
        let mut w = Writer::new(endian);
        w.u32(self.entries.len() as u32)?;
        w.u32(self.attribute_size)?;
        for entry in &self.entries {
            w.bytes(&entry.attributes)?;
        }
        w.bytes(&self.attribute_tail)?;
        Ok(w.into_inner())
    }

    fn write_styles(&self, endian: Endian) -> Result<Vec<u8>> {
        let mut w = Writer::new(endian);
        for entry in &self.entries {
            w.u32(entry.style.unwrap_or_default())?;
        }
        Ok(w.into_inner())
    }

    fn write_texts(&self, endian: Endian) -> Result<Vec<u8>> {
        let encoding = self.encoding;
        let unit = |w: &mut Writer, value: u16| match encoding {
            Encoding::Utf16 => w.u16(value),
            Encoding::Utf8 => w.u8(value as u8),
        };
        let mut w = Writer::new(endian);
        let count = self.entries.len() as u64;
        w.u32(count as u32)?;
        w.seek(4 + 4 * count)?;
        for (idx, entry) in self.entries.iter().enumerate() {
            let pos = w.position() as u32;
            w.write_at(4 + 4 * idx as u64, &pos)?;
            for content in &entry.contents {
                match content {
                    Content::Text(text) => match encoding {
                        Encoding::Utf16 => text.encode_utf16().try_for_each(|u| w.u16(u))?,
                        Encoding::Utf8 => w.bytes(text.as_bytes())?,
                    },
                    Content::Control {
                        group,
                        kind,
                        params,
                    } => {
                        unit(&mut w, CONTROL_START)?;
                        w.u16(*group)?;
                        w.u16(*kind)?;
                        w.u16(params.len() as u16)?;
                        w.bytes(params)?;
                    }
                    Content::Close { group, kind } => {
                        unit(&mut w, CONTROL_CLOSE)?;
                        w.u16(*group)?;
                        w.u16(*kind)?;
                    }
                }
            }
            unit(&mut w, 0)?;
        }
        Ok(w.into_inner())
    }
}
