//! Editing sessions: one open archive, size table or structured document each.
//!
//! A session owns the decoded document, the path it came from and what changed since
//! the last save. Sessions never touch each other; [`crate::Workspace`] wires them
//! together.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use binrw::Endian;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;
use yaz0::CompressionLevel;

use crate::aamp::AampNames;
use crate::binary::Endianness;
use crate::extensions::{canonical_member_name, sniff_document, should_compress, DocumentKind};
use crate::rstb::{self, Estimate, NameTable, ScanReport, SizeTable, SizeTableEntry};
use crate::sarc::path::NESTED_SEPARATOR;
use crate::sarc::{Archive, File, NestedPath, TreeEntry};
use crate::stock::StockHashes;
use crate::{compress_yaz0, decompress_if, is_yaz0, Document, Error, Result};

/// Prefix marking a structured document that lives inside the open archive.
pub const ARCHIVE_SOURCE_PREFIX: &str = "ARCHIVE:";

/// Characters that may not appear in an entry name.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '\'', '<', '>', '|'];

fn level(quality: usize) -> CompressionLevel {
    CompressionLevel::Lookahead {
        quality: quality.clamp(1, 10),
    }
}

/// Treats an empty path as a dismissed file picker.
pub fn required_path(path: &str) -> Result<&Path> {
    if path.trim().is_empty() {
        Err(Error::Cancelled)
    } else {
        Ok(Path::new(path))
    }
}

pub(crate) fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(err),
    })
}

/// Writes `data` to `path`, Yaz0-compressing it when the extension asks for it.
pub(crate) fn write_output(path: &Path, data: Vec<u8>, quality: usize) -> Result<()> {
    let data = if should_compress(path) && !is_yaz0(&data) {
        compress_yaz0(data, level(quality))?
    } else {
        data
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// Normalized form of an entry path, as stored in the modified set.
/// `path` as a relative path that cannot leave the directory it is joined to.
fn contained(path: &str) -> Result<&Path> {
    let relative = Path::new(path);
    if relative.components().all(|part| matches!(part, Component::Normal(_))) {
        Ok(relative)
    } else {
        Err(Error::invalid("entry path", format!("{path} escapes the output directory")))
    }
}

fn normalize(path: &str) -> String {
    NestedPath::parse(path).to_string()
}

/// True when `key` is `path` or lies below it, in a folder or a nested archive.
fn is_under(key: &str, path: &str) -> bool {
    key == path
        || key
            .strip_prefix(path)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// True when a cache entry for `key` may be stale after a change at `path`: both sit
/// in the same top-level member, or `key` is inside a folder `path` names.
fn shares_member(key: &NestedPath, path: &NestedPath) -> bool {
    let (Some(key), Some(path)) = (key.levels().first(), path.levels().first()) else {
        return true;
    };
    is_under(key, path) || is_under(path, key)
}

fn check_entry_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Cancelled);
    }
    match name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        Some(bad) => Err(Error::invalid(
            "entry name",
            format!("{name:?} contains {bad:?}"),
        )),
        None => Ok(()),
    }
}

/// What the UI shows for a selected archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryInfo {
    pub name: String,
    pub size: usize,
    pub is_structured_document: bool,
    pub format_kind: Option<DocumentKind>,
    pub is_archive: bool,
    pub modified: bool,
    pub modded: bool,
    pub estimate: Option<Estimate>,
    pub current_rstb_size: Option<u32>,
}

/// The part of [`EntryInfo`] that only changes when the entry does.
#[derive(Debug, Clone)]
struct EntryFacts {
    name: String,
    size: usize,
    kind: Option<DocumentKind>,
    is_archive: bool,
    modded: bool,
    estimate: Option<Estimate>,
}

/// An open SARC archive.
#[derive(Debug)]
pub struct ArchiveSession {
    path: Option<PathBuf>,
    archive: Archive,
    modified: BTreeSet<String>,
    dirty: bool,
    quality: usize,
    /// Nested archives decoded so far, keyed by their nested path.
    nested: Mutex<HashMap<String, Arc<Archive>>>,
    facts: Mutex<HashMap<String, EntryFacts>>,
    stock: Option<Arc<StockHashes>>,
    /// Stock comparisons so far, keyed like the modified set.
    stock_checks: Mutex<HashMap<String, bool>>,
}

impl ArchiveSession {
    fn with_archive(archive: Archive, path: Option<PathBuf>, quality: usize) -> Self {
        Self {
            path,
            archive,
            modified: BTreeSet::new(),
            dirty: false,
            quality,
            nested: Mutex::new(HashMap::new()),
            facts: Mutex::new(HashMap::new()),
            stock: None,
            stock_checks: Mutex::new(HashMap::new()),
        }
    }

    /// Flags entries against `stock`. Without a table nothing is flagged.
    pub fn with_stock_hashes(mut self, stock: Option<Arc<StockHashes>>) -> Self {
        self.stock = stock;
        self.stock_checks.lock().clear();
        self
    }

    /// True when the entry at `key` differs from the stock game file.
    fn is_modded(&self, key: &str, data: &[u8]) -> bool {
        let Some(stock) = &self.stock else {
            return false;
        };
        let cached = self.stock_checks.lock().get(key).copied();
        if let Some(modded) = cached {
            return modded;
        }
        let modded = stock.is_modded(NestedPath::parse(key).leaf(), data);
        self.stock_checks.lock().insert(key.to_string(), modded);
        modded
    }

    pub fn open(path: &Path, quality: usize) -> Result<Self> {
        let data = read_source(path)?;
        let archive = Archive::read(&data)?;
        info!(
            path = %path.display(),
            files = archive.files().len(),
            endian = ?archive.endian,
            "opened archive"
        );
        Ok(Self::with_archive(archive, Some(path.to_path_buf()), quality))
    }

    pub fn create(big_endian: bool, alignment: u32, quality: usize) -> Result<Self> {
        let alignment = Archive::check_alignment(alignment)?;
        let endian = if big_endian { Endian::Big } else { Endian::Little };
        info!(?endian, alignment, "created archive");
        Ok(Self::with_archive(
            Archive::new(endian, alignment),
            None,
            quality,
        ))
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn endianness(&self) -> Endianness {
        self.archive.endianness()
    }

    pub fn tree(&self) -> Vec<TreeEntry> {
        self.archive
            .tree(&|path: &str, file: &File| self.is_modded(&normalize(path), &file.data))
    }

    pub fn modified(&self) -> Vec<String> {
        self.modified.iter().cloned().collect()
    }

    pub fn is_modified(&self, path: &str) -> bool {
        self.modified.contains(&normalize(path))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Encodes the archive and writes it to `dest`, or to the path it was opened from.
    pub fn save(&mut self, dest: Option<&Path>) -> Result<PathBuf> {
        let dest = match dest.or(self.path.as_deref()) {
            Some(dest) => dest.to_path_buf(),
            None => return Err(Error::Cancelled),
        };
        let data = self.archive.to_binary()?;
        write_output(&dest, data, self.quality)?;
        info!(path = %dest.display(), changes = self.modified.len(), "saved archive");
        self.modified.clear();
        self.dirty = false;
        self.path = Some(dest.clone());
        Ok(dest)
    }

    /// Decodes (or fetches from cache) the archive named by `levels`, each level a
    /// member of the one before.
    fn nested_archive(&self, levels: &[String]) -> Result<Arc<Archive>> {
        let key = levels.join(NESTED_SEPARATOR);
        let cached = self.nested.lock().get(&key).cloned();
        if let Some(archive) = cached {
            return Ok(archive);
        }
        let (leaf, parents) = levels
            .split_last()
            .ok_or_else(|| Error::NotFound(String::new()))?;
        let decoded = if parents.is_empty() {
            self.archive.open_nested(leaf)?
        } else {
            self.nested_archive(parents)?
                .open_nested(leaf)
                .map_err(|e| Error::nested(parents.join(NESTED_SEPARATOR), e))?
        };
        debug!(path = %key, files = decoded.files().len(), "decoded nested archive");
        let decoded = Arc::new(decoded);
        self.nested.lock().insert(key, Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Opens a nested archive for browsing and returns its tree.
    pub fn open_nested(&self, path: &str) -> Result<Vec<TreeEntry>> {
        let path = NestedPath::parse(path);
        Ok(self.nested_archive(path.levels())?.tree(&|member: &str, file: &File| {
            self.is_modded(&path.join(member).to_string(), &file.data)
        }))
    }

    /// Raw bytes stored for an entry, as they sit in their archive.
    pub fn read_entry(&self, path: &str) -> Result<Vec<u8>> {
        let path = NestedPath::parse(path);
        if !path.is_nested() {
            return Ok(self.archive.get_file(path.leaf())?.data.clone());
        }
        let parent = self.nested_archive(path.archives())?;
        let data = parent
            .get_file(path.leaf())
            .map_err(|e| Error::nested(path.archives().join(NESTED_SEPARATOR), e))?
            .data
            .clone();
        Ok(data)
    }

    pub fn extract(&self, path: &str, dest: &Path) -> Result<()> {
        let data = self.read_entry(path)?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, data)?;
        debug!(entry = path, dest = %dest.display(), "extracted entry");
        Ok(())
    }

    /// Writes every file of the root archive under `dir`, keeping folder structure.
    pub fn extract_all(&self, dir: &Path) -> Result<usize> {
        let files = self.archive.files();
        files.par_iter().try_for_each(|file| -> Result<()> {
            let dest = dir.join(contained(&file.path)?);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &file.data)?;
            Ok(())
        })?;
        info!(count = files.len(), dir = %dir.display(), "extracted archive");
        Ok(files.len())
    }

    /// Runs `op` in the archive holding the leaf of `path`, re-encoding every
    /// nested archive on the way back up, then drops stale cache entries.
    fn mutate<T, F>(&mut self, path: &NestedPath, op: F) -> Result<T>
    where
        F: FnOnce(&mut Archive, &str) -> Result<T>,
    {
        let out = self
            .archive
            .update_nested(path.levels(), level(self.quality), op)?;
        self.invalidate(path);
        self.dirty = true;
        Ok(out)
    }

    fn invalidate(&self, path: &NestedPath) {
        self.nested
            .lock()
            .retain(|key, _| !shares_member(&NestedPath::parse(key), path));
        self.facts
            .lock()
            .retain(|key, _| !shares_member(&NestedPath::parse(key), path));
        self.stock_checks
            .lock()
            .retain(|key, _| !shares_member(&NestedPath::parse(key), path));
    }

    /// Records a change at `path` and at every archive containing it.
    fn mark(&mut self, path: &NestedPath) {
        for depth in 1..=path.levels().len() {
            self.modified.insert(path.prefix(depth));
        }
    }

    /// Forgets changes recorded at or below `path`.
    fn unmark(&mut self, path: &NestedPath) -> Vec<String> {
        let path = path.to_string();
        let (gone, kept) = std::mem::take(&mut self.modified)
            .into_iter()
            .partition(|key| is_under(key, &path));
        self.modified = kept;
        gone.into_iter().collect()
    }

    pub fn add(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = NestedPath::parse(path);
        self.mutate(&path, |archive, leaf| archive.add(leaf, data))?;
        self.mark(&path);
        debug!(entry = %path, "added entry");
        Ok(())
    }

    /// Deletes a file or a whole folder.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = NestedPath::parse(path);
        self.mutate(&path, |archive, leaf| archive.delete(leaf))?;
        self.unmark(&path);
        if path.is_nested() {
            self.mark(&NestedPath::parse(&path.prefix(path.levels().len() - 1)));
        }
        debug!(entry = %path, "deleted entry");
        Ok(())
    }

    /// Renames an entry in place. `new_name` is a single path component.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<String> {
        check_entry_name(new_name)?;
        let old = NestedPath::parse(path);
        let new_leaf = match old.leaf().rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{new_name}"),
            None => new_name.to_string(),
        };
        let new = match old.archives() {
            [] => NestedPath::parse(&new_leaf),
            archives => NestedPath::parse(&archives.join(NESTED_SEPARATOR)).join(&new_leaf),
        };
        self.mutate(&old, |archive, leaf| archive.rename(leaf, &new_leaf))?;
        self.invalidate(&new);
        let old_key = old.to_string();
        let new_key = new.to_string();
        let moved = self.unmark(&old);
        self.mark(&new);
        for key in moved {
            if let Some(rest) = key.strip_prefix(&old_key) {
                self.modified.insert(format!("{new_key}{rest}"));
            }
        }
        debug!(from = %old, to = %new, "renamed entry");
        Ok(new_key)
    }

    pub fn replace(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = NestedPath::parse(path);
        self.mutate(&path, |archive, leaf| archive.replace(leaf, data))?;
        self.mark(&path);
        debug!(entry = %path, "replaced entry");
        Ok(())
    }

    /// Stores an edited document at `path`, creating the entry if needed. Entries with a
    /// compressed-form extension are stored Yaz0-compressed.
    pub fn write_entry(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = NestedPath::parse(path);
        let data = if should_compress(path.leaf()) && !is_yaz0(&data) {
            compress_yaz0(data, level(self.quality))?
        } else {
            data
        };
        self.mutate(&path, |archive, leaf| archive.upsert(leaf, data))?;
        self.mark(&path);
        debug!(entry = %path, "wrote entry");
        Ok(())
    }

    /// Copies every file under `folder` into the root archive, overwriting entries that
    /// already exist. All files are read before the archive changes.
    pub fn update_from_folder(&mut self, folder: &Path) -> Result<usize> {
        if !folder.is_dir() {
            return Err(Error::NotFound(folder.display().to_string()));
        }
        let mut files = vec![];
        for entry in WalkDir::new(folder).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(folder)
                .map_err(|_| Error::NotFound(entry.path().display().to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            files.push((rel, fs::read(entry.path())?));
        }
        let mut updated = self.archive.clone();
        for (rel, data) in &files {
            updated.upsert(rel, data.clone())?;
        }
        self.archive = updated;
        self.nested.lock().clear();
        self.facts.lock().clear();
        self.stock_checks.lock().clear();
        self.dirty = self.dirty || !files.is_empty();
        for (rel, _) in &files {
            self.modified.insert(normalize(rel));
        }
        info!(count = files.len(), folder = %folder.display(), "updated archive from folder");
        Ok(files.len())
    }

    fn facts(&self, path: &str) -> Result<EntryFacts> {
        let key = normalize(path);
        let cached = self.facts.lock().get(&key).cloned();
        if let Some(facts) = cached {
            return Ok(facts);
        }
        let stored = self.read_entry(&key)?;
        let parsed = NestedPath::parse(&key);
        let leaf = parsed.leaf();
        let data = decompress_if(&stored)?;
        let name = leaf.rsplit('/').next().unwrap_or(leaf).to_string();
        let estimate = rstb::calc_size(&data, &canonical_member_name(leaf), self.archive.endian)
            .ok()
            .filter(|est| est.size > 0);
        let facts = EntryFacts {
            name,
            size: stored.len(),
            kind: sniff_document(leaf, &data),
            is_archive: crate::sarc::nodes::is_archive_data(leaf, &data),
            modded: self.is_modded(&key, &stored),
            estimate,
        };
        self.facts.lock().insert(key, facts.clone());
        Ok(facts)
    }

    /// Details of one entry. Decoding work is remembered until the entry changes.
    pub fn entry_info(&self, path: &str) -> Result<EntryInfo> {
        let facts = self.facts(path)?;
        Ok(EntryInfo {
            name: facts.name,
            size: facts.size,
            is_structured_document: facts.kind.is_some(),
            format_kind: facts.kind,
            is_archive: facts.is_archive,
            modified: self.is_modified(path),
            modded: facts.modded,
            estimate: facts.estimate,
            current_rstb_size: None,
        })
    }
}

/// An open resource size table.
#[derive(Debug)]
pub struct SizeTableSession {
    path: Option<PathBuf>,
    table: SizeTable,
    dirty: bool,
    quality: usize,
}

impl SizeTableSession {
    pub fn open(path: &Path, quality: usize) -> Result<Self> {
        let table = SizeTable::read(&read_source(path)?)?;
        info!(path = %path.display(), entries = table.len(), "opened RSTB");
        Ok(Self {
            path: Some(path.to_path_buf()),
            table,
            dirty: false,
            quality,
        })
    }

    pub fn table(&self) -> &SizeTable {
        &self.table
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn endianness(&self) -> Endianness {
        self.table.endianness()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entries(&self, names: &NameTable) -> Vec<SizeTableEntry> {
        self.table.entries(names)
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.table.get(key)
    }

    pub fn set(&mut self, key: &str, size: u64) -> Result<()> {
        self.table.set(key, size)?;
        self.dirty = true;
        debug!(key, size, "set RSTB entry");
        Ok(())
    }

    pub fn delete(&mut self, key: &str) {
        if self.table.contains(key) {
            self.table.delete(key);
            self.dirty = true;
            debug!(key, "deleted RSTB entry");
        }
    }

    pub fn scan(&mut self, dir: &Path, names: &mut NameTable) -> Result<ScanReport> {
        let mut updated = self.table.clone();
        let report = rstb::scan(dir, &mut updated, names)?;
        if report.inserted_count > 0 {
            self.table = updated;
            self.dirty = true;
        }
        Ok(report)
    }

    pub fn export_json(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, self.table.to_json()?)?;
        info!(path = %dest.display(), "exported RSTB as JSON");
        Ok(())
    }

    pub fn save(&mut self, dest: Option<&Path>) -> Result<PathBuf> {
        let dest = match dest.or(self.path.as_deref()) {
            Some(dest) => dest.to_path_buf(),
            None => return Err(Error::Cancelled),
        };
        write_output(&dest, self.table.to_binary()?, self.quality)?;
        info!(path = %dest.display(), entries = self.table.len(), "saved RSTB");
        self.dirty = false;
        self.path = Some(dest.clone());
        Ok(dest)
    }
}

/// Where a structured document was loaded from or is saved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    File(PathBuf),
    /// An entry path inside the open archive.
    Archive(String),
}

impl DocumentSource {
    /// Parses `ARCHIVE:<entry>` or a plain file path. Empty input means cancelled.
    pub fn parse(source: &str) -> Result<Self> {
        match source.strip_prefix(ARCHIVE_SOURCE_PREFIX) {
            Some(entry) if entry.trim().is_empty() => Err(Error::Cancelled),
            Some(entry) => Ok(DocumentSource::Archive(normalize(entry))),
            None => Ok(DocumentSource::File(required_path(source)?.to_path_buf())),
        }
    }

    /// Name used to pick the document kind from its extension.
    pub fn file_name(&self) -> String {
        match self {
            DocumentSource::File(path) => path.to_string_lossy().replace('\\', "/"),
            DocumentSource::Archive(entry) => NestedPath::parse(entry).leaf().to_string(),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::File(path) => write!(f, "{}", path.display()),
            DocumentSource::Archive(entry) => write!(f, "{ARCHIVE_SOURCE_PREFIX}{entry}"),
        }
    }
}

/// An open AAMP, BYML or MSBT document.
#[derive(Debug)]
pub struct DocumentSession {
    source: DocumentSource,
    document: Document,
    dirty: bool,
}

impl DocumentSession {
    pub fn decode(source: DocumentSource, data: &[u8]) -> Result<Self> {
        let document = Document::decode(data)?;
        info!(%source, kind = ?document.kind(), "opened document");
        Ok(Self {
            source,
            document,
            dirty: false,
        })
    }

    pub fn open_file(path: &Path) -> Result<Self> {
        let data = read_source(path)?;
        Self::decode(DocumentSource::File(path.to_path_buf()), &data)
    }

    pub fn saved(source: DocumentSource, document: Document) -> Self {
        Self {
            source,
            document,
            dirty: false,
        }
    }

    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn text(&self, names: &AampNames) -> Result<String> {
        self.document.to_text(names)
    }

    /// Replaces the document with edited text. Invalid text leaves it untouched.
    pub fn update(&mut self, text: &str, names: &mut AampNames) -> Result<()> {
        self.document.update_text(text, names)?;
        self.dirty = true;
        Ok(())
    }

    /// Builds the document a save should write: the open one, re-parsed from `text`
    /// when the kind matches (keeping format details such as the BYML version),
    /// otherwise a fresh document.
    pub fn prepare(
        open: Option<&Document>,
        kind: DocumentKind,
        text: &str,
        endianness: Endianness,
        names: &mut AampNames,
    ) -> Result<Document> {
        match open {
            Some(doc) if doc.kind() == kind => {
                let mut doc = doc.clone();
                doc.endianness = endianness;
                doc.update_text(text, names)?;
                Ok(doc)
            }
            _ => Document::from_text(kind, text, endianness, names),
        }
    }
}
