//! The request/response boundary the UI talks to.
//!
//! A [`Workspace`] holds at most one open archive, one RSTB and one structured
//! document. Every operation is a method returning a typed payload; [`Workspace::handle`]
//! dispatches a deserialized [`Request`] and wraps the outcome in a [`Response`].

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::aamp::AampNames;
use crate::binary::Endianness;
use crate::extensions::{canonical_member_name, canonical_name, DocumentKind};
use crate::rstb::{calc_size, Estimate, Key, NameTable, ScanReport, SizeTableEntry};
use crate::sarc::{NestedPath, TreeEntry};
use crate::session::{
    read_source, required_path, write_output, ArchiveSession, DocumentSession, DocumentSource,
    EntryInfo, SizeTableSession,
};
use crate::stock::StockHashes;
use crate::{Config, Error, ErrorKind, Result};

/// One boundary call, as sent by the UI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    OpenArchive { file_path: String },
    SaveArchive { file_path: Option<String> },
    NewArchive { big_endian: bool, alignment: u32 },
    AddFile { source_path: String, dest_path: String },
    ExtractFile { entry_path: String, dest_path: String },
    ExtractAll { dest_directory: String },
    RenameEntry { old_path: String, new_name: String },
    DeleteEntry { entry_path: String },
    ReplaceEntry { entry_path: String, source_path: String },
    GetEntryInfo { entry_path: String },
    OpenNested { entry_path: String },
    UpdateFromFolder { folder: String },
    OpenRstb { file_path: String },
    SaveRstb { file_path: Option<String> },
    SetRstbEntry { key: String, size: u64 },
    DeleteRstbEntry { key: String },
    GetRstbEntry { key: String },
    CalcSize { file_path: String },
    ScanModDirectory { dir_path: String },
    ExportRstbJson { file_path: String },
    AddName { name: String },
    OpenStructuredDocument { source: String },
    SaveStructuredDocument {
        text: String,
        format_kind: DocumentKind,
        endianness: Endianness,
        dest_path: String,
    },
    UpdateStructuredDocument { text: String },
    Close { editor: Editor },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Editor {
    Archive,
    Rstb,
    Document,
}

/// Error half of a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        let location = err.location();
        Self {
            kind: err.kind(),
            message: err.to_string(),
            path: err.path().map(str::to_string),
            line: location.map(|(line, _)| line),
            column: location.map(|(_, column)| column),
        }
    }
}

/// Outcome of a [`Request`]. Successful payloads are flattened next to the status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok(Value),
    Err { error: ErrorPayload },
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveView {
    pub path: Option<String>,
    pub tree: Vec<TreeEntry>,
    pub endianness: Endianness,
    pub alignment: u32,
    pub modified_set: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeUpdate {
    pub tree: Vec<TreeEntry>,
    pub modified_set: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rstb_updated: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NestedTree {
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Saved {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Count {
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize)]
pub struct RstbView {
    pub path: String,
    pub entries: Vec<SizeTableEntry>,
    pub endianness: Endianness,
}

#[derive(Debug, Clone, Serialize)]
pub struct RstbLookup {
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameAdded {
    pub hash: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub path: String,
    pub text: String,
    pub format_kind: DocumentKind,
    pub endianness: Endianness,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSaved {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_set: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rstb_updated: Option<bool>,
}

fn payload<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Open sessions plus the name tables shared between them.
#[derive(Debug)]
pub struct Workspace {
    config: Config,
    archive: RwLock<Option<ArchiveSession>>,
    rstb: RwLock<Option<SizeTableSession>>,
    document: RwLock<Option<DocumentSession>>,
    names: Mutex<NameTable>,
    aamp_names: Mutex<AampNames>,
    stock: Option<Arc<StockHashes>>,
}

impl Workspace {
    pub fn new(config: Config) -> Result<Self> {
        let names = NameTable::load(config.stock_names.as_deref(), &config.names_path())?;
        let stock = config
            .stock_hashes
            .as_deref()
            .map(StockHashes::load)
            .transpose()?
            .map(Arc::new);
        info!(
            names = names.len(),
            stock_files = stock.as_ref().map_or(0, |s| s.len()),
            data_dir = %config.data_dir.display(),
            "workspace ready"
        );
        Ok(Self {
            config,
            archive: RwLock::new(None),
            rstb: RwLock::new(None),
            document: RwLock::new(None),
            names: Mutex::new(names),
            aamp_names: Mutex::new(AampNames::builtin()),
            stock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn quality(&self) -> usize {
        self.config.yaz0_quality
    }

    pub fn handle(&self, request: Request) -> Response {
        debug!(?request, "handling request");
        let result = match request {
            Request::OpenArchive { file_path } => self.open_archive(&file_path).and_then(payload),
            Request::SaveArchive { file_path } => {
                self.save_archive(file_path.as_deref()).and_then(payload)
            }
            Request::NewArchive {
                big_endian,
                alignment,
            } => self.new_archive(big_endian, alignment).and_then(payload),
            Request::AddFile {
                source_path,
                dest_path,
            } => self.add_file(&source_path, &dest_path).and_then(payload),
            Request::ExtractFile {
                entry_path,
                dest_path,
            } => self.extract_file(&entry_path, &dest_path).and_then(payload),
            Request::ExtractAll { dest_directory } => {
                self.extract_all(&dest_directory).and_then(payload)
            }
            Request::RenameEntry { old_path, new_name } => {
                self.rename_entry(&old_path, &new_name).and_then(payload)
            }
            Request::DeleteEntry { entry_path } => self.delete_entry(&entry_path).and_then(payload),
            Request::ReplaceEntry {
                entry_path,
                source_path,
            } => self.replace_entry(&entry_path, &source_path).and_then(payload),
            Request::GetEntryInfo { entry_path } => {
                self.get_entry_info(&entry_path).and_then(payload)
            }
            Request::OpenNested { entry_path } => self.open_nested(&entry_path).and_then(payload),
            Request::UpdateFromFolder { folder } => {
                self.update_from_folder(&folder).and_then(payload)
            }
            Request::OpenRstb { file_path } => self.open_rstb(&file_path).and_then(payload),
            Request::SaveRstb { file_path } => {
                self.save_rstb(file_path.as_deref()).and_then(payload)
            }
            Request::SetRstbEntry { key, size } => {
                self.set_rstb_entry(&key, size).and_then(payload)
            }
            Request::DeleteRstbEntry { key } => self.delete_rstb_entry(&key).and_then(payload),
            Request::GetRstbEntry { key } => self.get_rstb_entry(&key).and_then(payload),
            Request::CalcSize { file_path } => self.calc_size(&file_path).and_then(payload),
            Request::ScanModDirectory { dir_path } => {
                self.scan_mod_directory(&dir_path).and_then(payload)
            }
            Request::ExportRstbJson { file_path } => {
                self.export_rstb_json(&file_path).and_then(payload)
            }
            Request::AddName { name } => self.add_name(&name).and_then(payload),
            Request::OpenStructuredDocument { source } => {
                self.open_structured_document(&source).and_then(payload)
            }
            Request::SaveStructuredDocument {
                text,
                format_kind,
                endianness,
                dest_path,
            } => self
                .save_structured_document(&text, format_kind, endianness, &dest_path)
                .and_then(payload),
            Request::UpdateStructuredDocument { text } => {
                self.update_structured_document(&text).and_then(payload)
            }
            Request::Close { editor } => payload(self.close(editor)),
        };
        match result {
            Ok(value) => Response::Ok(value),
            Err(err) => {
                if err.kind() == ErrorKind::Cancelled {
                    debug!("request cancelled");
                } else {
                    warn!(%err, "request failed");
                }
                Response::Err {
                    error: ErrorPayload::from(&err),
                }
            }
        }
    }

    // Archive

    fn archive_view(session: &ArchiveSession) -> ArchiveView {
        ArchiveView {
            path: session.path().map(|p| p.display().to_string()),
            tree: session.tree(),
            endianness: session.endianness(),
            alignment: session.archive().alignment,
            modified_set: session.modified(),
        }
    }

    fn tree_update(session: &ArchiveSession, rstb_updated: Option<bool>) -> TreeUpdate {
        TreeUpdate {
            tree: session.tree(),
            modified_set: session.modified(),
            rstb_updated,
        }
    }

    /// Runs `op` against the open archive under the write lock.
    fn with_archive_mut<T>(&self, op: impl FnOnce(&mut ArchiveSession) -> Result<T>) -> Result<T> {
        let mut guard = self.archive.write();
        let session = guard.as_mut().ok_or(Error::NotOpen("archive"))?;
        op(session)
    }

    fn with_archive<T>(&self, op: impl FnOnce(&ArchiveSession) -> Result<T>) -> Result<T> {
        let guard = self.archive.read();
        let session = guard.as_ref().ok_or(Error::NotOpen("archive"))?;
        op(session)
    }

    pub fn open_archive(&self, file_path: &str) -> Result<ArchiveView> {
        let session = ArchiveSession::open(required_path(file_path)?, self.quality())?
            .with_stock_hashes(self.stock.clone());
        let view = Self::archive_view(&session);
        *self.archive.write() = Some(session);
        Ok(view)
    }

    pub fn save_archive(&self, file_path: Option<&str>) -> Result<Saved> {
        let dest = file_path.map(required_path).transpose()?;
        self.with_archive_mut(|session| {
            let path = session.save(dest)?;
            Ok(Saved {
                path: path.display().to_string(),
            })
        })
    }

    pub fn new_archive(&self, big_endian: bool, alignment: u32) -> Result<ArchiveView> {
        let session = ArchiveSession::create(big_endian, alignment, self.quality())?
            .with_stock_hashes(self.stock.clone());
        let view = Self::archive_view(&session);
        *self.archive.write() = Some(session);
        Ok(view)
    }

    pub fn add_file(&self, source_path: &str, dest_path: &str) -> Result<TreeUpdate> {
        let data = read_source(required_path(source_path)?)?;
        required_path(dest_path)?;
        let tree = self.with_archive_mut(|session| {
            session.add(dest_path, data.clone())?;
            Ok(Self::tree_update(session, None))
        })?;
        let updated = self.sync_rstb(dest_path, &data, true);
        Ok(TreeUpdate {
            rstb_updated: Some(updated),
            ..tree
        })
    }

    pub fn extract_file(&self, entry_path: &str, dest_path: &str) -> Result<Empty> {
        let dest = required_path(dest_path)?;
        self.with_archive(|session| session.extract(entry_path, dest))?;
        Ok(Empty {})
    }

    pub fn extract_all(&self, dest_directory: &str) -> Result<Count> {
        let dir = required_path(dest_directory)?;
        let count = self.with_archive(|session| session.extract_all(dir))?;
        Ok(Count { count })
    }

    pub fn rename_entry(&self, old_path: &str, new_name: &str) -> Result<TreeUpdate> {
        self.with_archive_mut(|session| {
            session.rename(old_path, new_name)?;
            Ok(Self::tree_update(session, None))
        })
    }

    pub fn delete_entry(&self, entry_path: &str) -> Result<TreeUpdate> {
        self.with_archive_mut(|session| {
            session.delete(entry_path)?;
            Ok(Self::tree_update(session, None))
        })
    }

    pub fn replace_entry(&self, entry_path: &str, source_path: &str) -> Result<TreeUpdate> {
        let data = read_source(required_path(source_path)?)?;
        let tree = self.with_archive_mut(|session| {
            session.replace(entry_path, data.clone())?;
            Ok(Self::tree_update(session, None))
        })?;
        let updated = self.sync_rstb(entry_path, &data, false);
        Ok(TreeUpdate {
            rstb_updated: Some(updated),
            ..tree
        })
    }

    /// Entry details plus the size the open RSTB currently lists for it.
    pub fn get_entry_info(&self, entry_path: &str) -> Result<EntryInfo> {
        let mut info = self.with_archive(|session| session.entry_info(entry_path))?;
        let key = canonical_member_name(NestedPath::parse(entry_path).leaf());
        info.current_rstb_size = self.rstb.read().as_ref().and_then(|rstb| rstb.get(&key));
        Ok(info)
    }

    pub fn open_nested(&self, entry_path: &str) -> Result<NestedTree> {
        let tree = self.with_archive(|session| session.open_nested(entry_path))?;
        Ok(NestedTree { tree })
    }

    pub fn update_from_folder(&self, folder: &str) -> Result<TreeUpdate> {
        let folder = required_path(folder)?;
        self.with_archive_mut(|session| {
            session.update_from_folder(folder)?;
            Ok(Self::tree_update(session, None))
        })
    }

    /// Refreshes the open RSTB after an archive entry changed. Existing entries take the
    /// new estimate; new entries are only inserted for exact estimates of added files.
    fn sync_rstb(&self, entry_path: &str, data: &[u8], added: bool) -> bool {
        let mut guard = self.rstb.write();
        let Some(rstb) = guard.as_mut() else {
            return false;
        };
        let key = canonical_member_name(NestedPath::parse(entry_path).leaf());
        let estimate = match calc_size(data, &key, rstb.table().endian) {
            Ok(estimate) if estimate.size > 0 => estimate,
            Ok(_) => return false,
            Err(err) => {
                warn!(%key, %err, "could not estimate resource size");
                return false;
            }
        };
        let known = rstb.get(&key).is_some();
        if !known && !(added && !estimate.is_guess) {
            return false;
        }
        if let Err(err) = rstb.set(&key, estimate.size as u64) {
            warn!(%key, %err, "could not update RSTB");
            return false;
        }
        let mut names = self.names.lock();
        names.add(&key);
        self.flush_names(&names);
        debug!(%key, size = estimate.size, "updated RSTB from archive");
        true
    }

    // RSTB

    fn with_rstb_mut<T>(&self, op: impl FnOnce(&mut SizeTableSession) -> Result<T>) -> Result<T> {
        let mut guard = self.rstb.write();
        let session = guard.as_mut().ok_or(Error::NotOpen("RSTB"))?;
        op(session)
    }

    fn flush_names(&self, names: &NameTable) {
        let path = self.config.names_path();
        if let Err(err) = names.flush(&path) {
            warn!(path = %path.display(), %err, "could not save name table");
        }
    }

    pub fn open_rstb(&self, file_path: &str) -> Result<RstbView> {
        let path = required_path(file_path)?;
        let session = SizeTableSession::open(path, self.quality())?;
        let view = RstbView {
            path: path.display().to_string(),
            entries: session.entries(&self.names.lock()),
            endianness: session.endianness(),
        };
        *self.rstb.write() = Some(session);
        Ok(view)
    }

    pub fn save_rstb(&self, file_path: Option<&str>) -> Result<Saved> {
        let dest = file_path.map(required_path).transpose()?;
        self.with_rstb_mut(|session| {
            let path = session.save(dest)?;
            Ok(Saved {
                path: path.display().to_string(),
            })
        })
    }

    /// Sets a size. Keys given as paths are also taught to the name table.
    pub fn set_rstb_entry(&self, key: &str, size: u64) -> Result<Empty> {
        self.with_rstb_mut(|session| session.set(key, size))?;
        if let Key::Name(name) = Key::parse(key) {
            let mut names = self.names.lock();
            names.add(&name);
            self.flush_names(&names);
        }
        Ok(Empty {})
    }

    pub fn delete_rstb_entry(&self, key: &str) -> Result<Empty> {
        self.with_rstb_mut(|session| {
            session.delete(key);
            Ok(())
        })?;
        Ok(Empty {})
    }

    pub fn get_rstb_entry(&self, key: &str) -> Result<RstbLookup> {
        let guard = self.rstb.read();
        let session = guard.as_ref().ok_or(Error::NotOpen("RSTB"))?;
        Ok(RstbLookup {
            size: session.get(key),
        })
    }

    /// Current RSTB rows, hashes resolved through the name table.
    pub fn rstb_entries(&self) -> Result<Vec<SizeTableEntry>> {
        let guard = self.rstb.read();
        let session = guard.as_ref().ok_or(Error::NotOpen("RSTB"))?;
        Ok(session.entries(&self.names.lock()))
    }

    /// Estimates a file on disk for the open RSTB's platform, or the configured one.
    pub fn calc_size(&self, file_path: &str) -> Result<Estimate> {
        let path = required_path(file_path)?;
        let data = read_source(path)?;
        let name = canonical_name(path).unwrap_or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let endian = self
            .rstb
            .read()
            .as_ref()
            .map_or(self.config.default_endianness, |rstb| rstb.endianness());
        calc_size(&data, &name, endian.into())
    }

    pub fn scan_mod_directory(&self, dir_path: &str) -> Result<ScanReport> {
        let dir = required_path(dir_path)?;
        let report = self.with_rstb_mut(|session| {
            let mut names = self.names.lock();
            let report = session.scan(dir, &mut names)?;
            self.flush_names(&names);
            Ok(report)
        })?;
        Ok(report)
    }

    pub fn export_rstb_json(&self, file_path: &str) -> Result<Empty> {
        let dest = required_path(file_path)?;
        self.with_rstb_mut(|session| session.export_json(dest))?;
        Ok(Empty {})
    }

    /// Teaches the name table a path so hash-only RSTB rows show it.
    pub fn add_name(&self, name: &str) -> Result<NameAdded> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Cancelled);
        }
        let mut names = self.names.lock();
        let hash = names.add(name);
        self.flush_names(&names);
        Ok(NameAdded { hash })
    }

    // Structured documents

    pub fn open_structured_document(&self, source: &str) -> Result<DocumentView> {
        let source = DocumentSource::parse(source)?;
        let session = match &source {
            DocumentSource::File(path) => DocumentSession::open_file(path)?,
            DocumentSource::Archive(entry) => {
                let data = self.with_archive(|archive| archive.read_entry(entry))?;
                DocumentSession::decode(source.clone(), &data)?
            }
        };
        let text = session.text(&self.aamp_names.lock())?;
        let document = session.document();
        let view = DocumentView {
            path: source.to_string(),
            text,
            format_kind: document.kind(),
            endianness: document.endianness,
        };
        *self.document.write() = Some(session);
        Ok(view)
    }

    /// Encodes `text` and writes it to a file, or into the open archive for
    /// `ARCHIVE:` destinations. The open document is replaced by what was saved.
    pub fn save_structured_document(
        &self,
        text: &str,
        format_kind: DocumentKind,
        endianness: Endianness,
        dest_path: &str,
    ) -> Result<DocumentSaved> {
        let dest = DocumentSource::parse(dest_path)?;
        let mut doc_guard = self.document.write();
        let document = DocumentSession::prepare(
            doc_guard.as_ref().map(DocumentSession::document),
            format_kind,
            text,
            endianness,
            &mut self.aamp_names.lock(),
        )?;
        let data = document.encode()?;
        let saved = match &dest {
            DocumentSource::File(path) => {
                write_output(path, data, self.quality())?;
                DocumentSaved {
                    modified_set: None,
                    rstb_updated: None,
                }
            }
            DocumentSource::Archive(entry) => {
                let modified = self.with_archive_mut(|session| {
                    session.write_entry(entry, data.clone())?;
                    Ok(session.modified())
                })?;
                let updated = self.sync_rstb(entry, &data, false);
                DocumentSaved {
                    modified_set: Some(modified),
                    rstb_updated: Some(updated),
                }
            }
        };
        info!(dest = %dest, kind = ?format_kind, "saved document");
        *doc_guard = Some(DocumentSession::saved(dest, document));
        Ok(saved)
    }

    pub fn update_structured_document(&self, text: &str) -> Result<Empty> {
        let mut guard = self.document.write();
        let session = guard.as_mut().ok_or(Error::NotOpen("document"))?;
        session.update(text, &mut self.aamp_names.lock())?;
        Ok(Empty {})
    }

    pub fn close(&self, editor: Editor) -> Empty {
        match editor {
            Editor::Archive => *self.archive.write() = None,
            Editor::Rstb => *self.rstb.write() = None,
            Editor::Document => *self.document.write() = None,
        }
        info!(?editor, "closed");
        Empty {}
    }

    /// True when the given editor has unsaved changes.
    pub fn is_dirty(&self, editor: Editor) -> bool {
        match editor {
            Editor::Archive => self.archive.read().as_ref().is_some_and(ArchiveSession::is_dirty),
            Editor::Rstb => self.rstb.read().as_ref().is_some_and(SizeTableSession::is_dirty),
            Editor::Document => self
                .document
                .read()
                .as_ref()
                .is_some_and(DocumentSession::is_dirty),
        }
    }
}
