//! SARC archives: decoding, encoding and tree edits, including edits inside nested archives.

use binrw::Endian;
use tracing::debug;

use crate::binary::{Endianness, Reader, Writer};
use crate::extensions::should_compress;
use crate::hash::{sarc_name_hash, SARC_HASH_MULTIPLIER};
use crate::{compress_yaz0, decompress_if, is_yaz0, Error, Result};

pub mod header;
pub mod nodes;
pub mod path;
pub mod table;

use header::{FatEntry, FatHeader, FntHeader, Header};
pub use nodes::{ArchiveNode, Directory, File, TreeEntry};
pub use path::NestedPath;
use table::NameTable;

pub const DEFAULT_ALIGNMENT: u32 = 4;
/// Highest alignment recovered from file offsets on decode.
pub const MAX_RECOVERED_ALIGNMENT: u32 = 0x80;
/// Alignment nested archives and BFRES models need.
pub const RESOURCE_ALIGNMENT: u32 = 0x2000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A decoded SARC archive.
pub struct Archive {
    pub root: Directory,
    pub endian: Endian,
    pub alignment: u32,
    /// Member names carry a leading slash.
    pub rooted: bool,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new(Endian::Little, DEFAULT_ALIGNMENT)
    }
}

fn format_alignment(data: &[u8]) -> Option<u32> {
    let magic = data.get(..4)?;
    match magic {
        b"SARC" | b"Yaz0" | b"FRES" => Some(RESOURCE_ALIGNMENT),
        _ => None,
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

impl Archive {
    pub fn new(endian: Endian, alignment: u32) -> Self {
        Self {
            root: Directory::default(),
            endian,
            alignment,
            rooted: false,
        }
    }

    /// Validates an alignment requested for a new archive. The name table already
    /// ends on a 4-byte boundary, so smaller alignments would not survive a round trip.
    pub fn check_alignment(alignment: u32) -> Result<u32> {
        if alignment.is_power_of_two()
            && (DEFAULT_ALIGNMENT..=MAX_RECOVERED_ALIGNMENT).contains(&alignment)
        {
            Ok(alignment)
        } else {
            Err(Error::ValueOutOfRange {
                field: "alignment",
                value: alignment as u64,
            })
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endian.into()
    }

    /// Decodes an archive. Yaz0 input is decompressed first.
    pub fn read(data: &[u8]) -> Result<Self> {
        if is_yaz0(data) {
            let data = decompress_if(data)?;
            return Self::read(&data);
        }
        Self::read_raw(data).map_err(|e| e.into_format("SARC"))
    }

    fn read_raw(data: &[u8]) -> Result<Self> {
        if !data.starts_with(b"SARC") {
            return Err(Error::invalid("SARC", "bad magic"));
        }
        let endian = header::detect_endian(data)?;
        let mut reader = Reader::new(data, endian);
        let (header, fat) = header::read_headers(&mut reader)?;
        let mut entries = Vec::with_capacity(fat.file_count as usize);
        for _ in 0..fat.file_count {
            entries.push(reader.read::<FatEntry>()?);
        }
        let fnt: FntHeader = reader.read()?;
        if fnt.header_size != header::SFNT_HEADER_SIZE {
            return Err(Error::invalid(
                "SARC",
                format!("SFNT header size {:#x}", fnt.header_size),
            ));
        }
        let names_start = reader.position();
        let data_offset = header.data_offset as u64;

        let mut named = Vec::with_capacity(entries.len());
        for entry in &entries {
            let name = if entry.is_named() {
                let pos = names_start + entry.name_offset();
                if pos >= data_offset {
                    return Err(Error::invalid("SARC", "name offset outside name table"));
                }
                Some(reader.null_string_at(pos)?)
            } else {
                None
            };
            let begin = data_offset + entry.data_begin as u64;
            let end = data_offset + entry.data_end as u64;
            if begin > end || end > reader.len() {
                return Err(Error::invalid(
                    "SARC",
                    format!("file data {begin:#x}..{end:#x} out of bounds"),
                ));
            }
            named.push((name, entry.name_hash, begin, end));
        }

        let rooted = named
            .iter()
            .filter_map(|(name, ..)| name.as_ref())
            .fold(None, |acc, name| Some(acc.unwrap_or(true) && name.starts_with('/')))
            .unwrap_or(false);

        let mut root = Directory::default();
        let mut offsets = vec![data_offset];
        for (name, hash, begin, end) in named {
            let bytes = data[begin as usize..end as usize].to_vec();
            if format_alignment(&bytes).is_none() {
                offsets.push(begin);
            }
            let file = match name {
                Some(name) => File::new(name, bytes),
                None => File {
                    path: format!("0x{hash:08x}"),
                    data: bytes,
                    unnamed_hash: Some(hash),
                },
            };
            root.insert(file).map_err(|e| match e {
                Error::DuplicatePath(path) => {
                    Error::invalid("SARC", format!("duplicate entry {path}"))
                }
                other => other,
            })?;
        }

        let gcd = offsets.into_iter().fold(0, gcd);
        let alignment = match gcd {
            0 => DEFAULT_ALIGNMENT,
            gcd => (1u64 << gcd.trailing_zeros()).min(MAX_RECOVERED_ALIGNMENT as u64) as u32,
        };
        debug!(
            files = fat.file_count,
            ?endian,
            alignment,
            rooted,
            "decoded SARC"
        );
        Ok(Self {
            root,
            endian,
            alignment,
            rooted,
        })
    }

    /// Encodes the archive in its stored endianness.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        let files = self.root.files();
        if files.len() > header::MAX_FILES as usize {
            return Err(Error::ValueOutOfRange {
                field: "file count",
                value: files.len() as u64,
            });
        }
        let mut entries: Vec<(u32, Option<String>, &File)> = files
            .into_iter()
            .map(|file| match file.unnamed_hash {
                Some(hash) => (hash, None, file),
                None => {
                    let name = if self.rooted {
                        format!("/{}", file.path)
                    } else {
                        file.path.clone()
                    };
                    (sarc_name_hash(&name, SARC_HASH_MULTIPLIER), Some(name), file)
                }
            })
            .collect();
        entries.sort_by_key(|(hash, ..)| *hash);

        let mut names = NameTable::default();
        let mut attrs = Vec::with_capacity(entries.len());
        let mut prev_hash = None;
        let mut collision = 0u32;
        for (hash, name, _) in &entries {
            collision = if prev_hash == Some(*hash) { collision + 1 } else { 1 };
            prev_hash = Some(*hash);
            attrs.push(match name {
                Some(name) => {
                    let offset = names.add(name) / 4;
                    if offset > 0x00FF_FFFF {
                        return Err(Error::ValueOutOfRange {
                            field: "name offset",
                            value: offset as u64,
                        });
                    }
                    if collision > 0xFF {
                        return Err(Error::ValueOutOfRange {
                            field: "hash collisions",
                            value: collision as u64,
                        });
                    }
                    (collision << 24) | offset
                }
                None => 0,
            });
        }

        let alignment = self.alignment.max(1) as u64;
        let names_end = 0x20 + header::ENTRY_SIZE * entries.len() as u64 + 8 + names.total_size() as u64;
        let data_offset = odd_multiple(names_end, alignment);

        let mut layout = Vec::with_capacity(entries.len());
        let mut pos = data_offset;
        let mut placed_ordinary = false;
        for (_, _, file) in &entries {
            pos = match format_alignment(&file.data) {
                Some(align) => pos.next_multiple_of(align.max(self.alignment) as u64),
                None if !placed_ordinary => {
                    placed_ordinary = true;
                    odd_multiple(pos, alignment)
                }
                None => pos.next_multiple_of(alignment),
            };
            let begin = pos - data_offset;
            pos += file.data.len() as u64;
            layout.push((begin, pos - data_offset));
        }
        let file_size = u32::try_from(pos).map_err(|_| Error::ValueOutOfRange {
            field: "archive size",
            value: pos,
        })?;

        let mut writer = Writer::new(self.endian);
        writer.write(&Header {
            header_size: header::HEADER_SIZE,
            bom: 0xFEFF,
            file_size,
            data_offset: data_offset as u32,
            version: header::VERSION,
            reserved: 0,
        })?;
        writer.write(&FatHeader {
            header_size: header::SFAT_HEADER_SIZE,
            file_count: entries.len() as u16,
            hash_multiplier: SARC_HASH_MULTIPLIER,
        })?;
        for ((hash, ..), (attr, (begin, end))) in entries.iter().zip(attrs.iter().zip(&layout)) {
            writer.write(&FatEntry {
                name_hash: *hash,
                name_attrs: *attr,
                data_begin: *begin as u32,
                data_end: *end as u32,
            })?;
        }
        writer.write(&FntHeader {
            header_size: header::SFNT_HEADER_SIZE,
            reserved: 0,
        })?;
        names.write(&mut writer)?;
        pad_to(&mut writer, data_offset)?;
        for ((_, _, file), (begin, _)) in entries.iter().zip(&layout) {
            pad_to(&mut writer, data_offset + begin)?;
            writer.bytes(&file.data)?;
        }
        Ok(writer.into_inner())
    }

    pub fn get_file(&self, path: &str) -> Result<&File> {
        self.root
            .get_file(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    pub fn add(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        self.root.insert(File::new(path, data))
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        self.root.remove(path).map(|_| ())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.root.rename(old, new)
    }

    pub fn replace(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        self.root.replace(path, data).map(|_| ())
    }

    /// Adds the file, or overwrites it if it already exists.
    pub fn upsert(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        match self.root.get(path) {
            Some(ArchiveNode::File(_)) => self.replace(path, data),
            _ => self.add(path, data),
        }
    }

    pub fn files(&self) -> Vec<&File> {
        self.root.files()
    }

    /// The file tree, with `modded` deciding each file's modded flag.
    pub fn tree(&self, modded: &dyn Fn(&str, &File) -> bool) -> Vec<TreeEntry> {
        self.root.tree("", modded)
    }

    /// Decodes the member at `path` as an archive.
    pub fn open_nested(&self, path: &str) -> Result<Archive> {
        let file = self.get_file(path)?;
        Archive::read(&file.data).map_err(|e| Error::nested(path, e))
    }

    /// Applies `op` to the archive holding the leaf of `path`, then re-encodes every
    /// archive on the way back up. Nothing changes unless the whole cascade succeeds.
    pub fn update_nested<T, F>(
        &mut self,
        path: &[String],
        level: yaz0::CompressionLevel,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Archive, &str) -> Result<T>,
    {
        match path {
            [] => Err(Error::NotFound(String::new())),
            [leaf] => op(self, leaf.as_str()),
            [first, rest @ ..] => {
                let member = self.get_file(first)?;
                let compressed = is_yaz0(&member.data) || should_compress(first.as_str());
                let mut child = self.open_nested(first)?;
                let out = child
                    .update_nested(rest, level, op)
                    .map_err(|e| Error::nested(first.as_str(), e))?;
                let mut data = child.to_binary()?;
                if compressed {
                    data = compress_yaz0(data, level)?;
                }
                self.replace(first, data)?;
                Ok(out)
            }
        }
    }

    /// Reads the bytes at a nested path, decoding each archive on the way.
    pub fn read_nested(&self, path: &NestedPath) -> Result<Vec<u8>> {
        let mut current: Option<Archive> = None;
        for level in path.archives() {
            let archive = current.as_ref().unwrap_or(self);
            let next = archive.open_nested(level)?;
            current = Some(next);
        }
        let archive = current.as_ref().unwrap_or(self);
        Ok(archive.get_file(path.leaf())?.data.clone())
    }
}

fn pad_to(writer: &mut Writer, target: u64) -> Result<()> {
    let pos = writer.position();
    if target > pos {
        writer.bytes(&vec![0u8; (target - pos) as usize])?;
    }
    Ok(())
}

/// Smallest odd multiple of `alignment` at or after `pos`.
fn odd_multiple(pos: u64, alignment: u64) -> u64 {
    let pos = pos.next_multiple_of(alignment);
    if alignment > 1 && (pos / alignment) % 2 == 0 {
        pos + alignment
    } else {
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(endian: Endian, alignment: u32) -> Archive {
        let mut archive = Archive::new(endian, alignment);
        archive.add("Actor/Link.bxml", b"AAMP test data".to_vec()).unwrap();
        archive.add("Actor/Zelda.bxml", vec![1, 2, 3]).unwrap();
        archive.add("Model/Empty.bin", vec![]).unwrap();
        archive.add("Pack/Inner.sarc", Archive::new(endian, 4).to_binary().unwrap()).unwrap();
        archive
    }

    fn paths(archive: &Archive) -> Vec<(String, Vec<u8>)> {
        let mut out: Vec<_> = archive
            .files()
            .into_iter()
            .map(|f| (f.path.clone(), f.data.clone()))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn round_trip_keeps_files_endianness_and_alignment() {
        for endian in [Endian::Big, Endian::Little] {
            for alignment in [4, 8, 0x20, 0x80] {
                let archive = sample(endian, alignment);
                let bytes = archive.to_binary().unwrap();
                let decoded = Archive::read(&bytes).unwrap();
                assert_eq!(paths(&decoded), paths(&archive));
                assert_eq!(decoded.endian, endian);
                assert_eq!(decoded.alignment, alignment);
                assert_eq!(decoded.to_binary().unwrap(), bytes);
            }
        }
    }

    #[test]
    fn alignments_that_cannot_round_trip_are_rejected() {
        for alignment in [0, 1, 2, 3, 12, 0x100] {
            let err = Archive::check_alignment(alignment).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::ValueOutOfRange);
        }
        for alignment in [4, 8, 0x10, 0x40, 0x80] {
            let created = Archive::check_alignment(alignment).unwrap();
            let mut archive = Archive::new(Endian::Big, created);
            archive.add("A.bin", vec![1, 2, 3, 4]).unwrap();
            archive.add("B.bin", vec![5, 6, 7, 8]).unwrap();
            let decoded = Archive::read(&archive.to_binary().unwrap()).unwrap();
            assert_eq!(decoded.alignment, alignment);
        }
    }

    #[test]
    fn header_layout() {
        let bytes = sample(Endian::Big, 4).to_binary().unwrap();
        assert_eq!(&bytes[..4], b"SARC");
        assert_eq!(&bytes[4..8], &[0x00, 0x14, 0xFE, 0xFF]);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize, bytes.len());
        assert_eq!(&bytes[0x14..0x18], b"SFAT");
        assert_eq!(u16::from_be_bytes([bytes[0x1A], bytes[0x1B]]), 4);
        assert_eq!(u32::from_be_bytes(bytes[0x1C..0x20].try_into().unwrap()), 0x65);

        let little = sample(Endian::Little, 4).to_binary().unwrap();
        assert_eq!(&little[4..8], &[0x14, 0x00, 0xFF, 0xFE]);
    }

    #[test]
    fn entries_sorted_by_hash_and_nested_archive_aligned() {
        let archive = sample(Endian::Little, 4);
        let bytes = archive.to_binary().unwrap();
        let mut reader = Reader::new(&bytes, Endian::Little);
        let (header, fat) = header::read_headers(&mut reader).unwrap();
        let entries: Vec<FatEntry> = (0..fat.file_count).map(|_| reader.read().unwrap()).collect();
        assert!(entries.windows(2).all(|w| w[0].name_hash <= w[1].name_hash));
        let inner_hash = sarc_name_hash("Pack/Inner.sarc", SARC_HASH_MULTIPLIER);
        let inner = entries.iter().find(|e| e.name_hash == inner_hash).unwrap();
        assert_eq!((header.data_offset + inner.data_begin) % RESOURCE_ALIGNMENT, 0);
        assert!(entries.iter().all(|e| e.name_attrs >> 24 == 1));
    }

    #[test]
    fn rooted_archives_keep_their_slash() {
        let mut archive = Archive::new(Endian::Big, 4);
        archive.rooted = true;
        archive.add("Actor/Link.bxml", vec![5]).unwrap();
        let bytes = archive.to_binary().unwrap();
        assert!(bytes.windows(16).any(|w| w == b"/Actor/Link.bxml"));
        let decoded = Archive::read(&bytes).unwrap();
        assert!(decoded.rooted);
        assert_eq!(decoded.get_file("Actor/Link.bxml").unwrap().data, vec![5]);
    }

    #[test]
    fn unnamed_entries_survive() {
        let mut archive = Archive::new(Endian::Big, 4);
        archive
            .root
            .insert(File {
                path: "0x12345678".into(),
                data: vec![7, 7],
                unnamed_hash: Some(0x1234_5678),
            })
            .unwrap();
        let decoded = Archive::read(&archive.to_binary().unwrap()).unwrap();
        let file = decoded.get_file("0x12345678").unwrap();
        assert_eq!(file.unnamed_hash, Some(0x1234_5678));
        assert_eq!(file.data, vec![7, 7]);
    }

    #[test]
    fn malformed_input_is_invalid_format() {
        assert!(matches!(Archive::read(b"NOPE"), Err(Error::InvalidFormat { .. })));
        let bytes = sample(Endian::Big, 4).to_binary().unwrap();
        assert!(matches!(
            Archive::read(&bytes[..0x30]),
            Err(Error::InvalidFormat { .. })
        ));
        let mut bad = bytes.clone();
        bad[0x14..0x18].copy_from_slice(b"XFAT");
        assert!(matches!(Archive::read(&bad), Err(Error::InvalidFormat { .. })));
    }

    #[test]
    fn yaz0_archives_are_decompressed() {
        let archive = sample(Endian::Big, 4);
        let packed = compress_yaz0(
            archive.to_binary().unwrap(),
            yaz0::CompressionLevel::Lookahead { quality: 6 },
        )
        .unwrap();
        assert_eq!(paths(&Archive::read(&packed).unwrap()), paths(&archive));
    }

    #[test]
    fn nested_updates_cascade() {
        let mut inner = Archive::new(Endian::Big, 4);
        inner.add("Actor/Link.bxml", vec![1]).unwrap();
        let mut outer = Archive::new(Endian::Big, 4);
        outer
            .add("Actor/Pack/Inner.sbactorpack", compress_yaz0(inner.to_binary().unwrap(), yaz0::CompressionLevel::Naive { quality: 1 }).unwrap())
            .unwrap();

        let path = NestedPath::parse("Actor/Pack/Inner.sbactorpack//Actor/Link.bxml");
        outer
            .update_nested(path.levels(), yaz0::CompressionLevel::Naive { quality: 1 }, |archive, leaf| {
                archive.replace(leaf, vec![2, 2])
            })
            .unwrap();
        assert!(is_yaz0(&outer.get_file("Actor/Pack/Inner.sbactorpack").unwrap().data));
        assert_eq!(outer.read_nested(&path).unwrap(), vec![2, 2]);

        let missing = NestedPath::parse("Actor/Pack/Inner.sbactorpack//Nope.bxml");
        let before = outer.clone();
        let err = outer
            .update_nested(missing.levels(), yaz0::CompressionLevel::Naive { quality: 1 }, |archive, leaf| {
                archive.replace(leaf, vec![])
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert_eq!(err.path(), Some("Nope.bxml"));
        assert_eq!(outer, before);
    }
}
