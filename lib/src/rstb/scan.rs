use std::fs;
use std::path::{Path, PathBuf};

use binrw::Endian;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{calc_size, NameTable, SizeTable};
use crate::extensions::{canonical_member_name, canonical_name, extension, is_archive_ext};
use crate::sarc::{nodes::is_archive_data, Archive};
use crate::Result;

/// A file the scan could not use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub inserted_count: usize,
    pub inserted: Vec<String>,
    pub skipped: Vec<Skipped>,
}

/// A resource found during a scan. Members without an estimate only teach a name.
struct Found {
    key: String,
    size: Option<u32>,
}

fn skip(path: &Path, reason: impl Into<String>) -> Skipped {
    Skipped {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn members(archive: &Archive, endian: Endian, out: &mut Vec<Found>) {
    for file in archive.files() {
        if file.unnamed_hash.is_some() {
            continue;
        }
        let key = canonical_member_name(&file.path);
        let size = calc_size(&file.data, &key, endian)
            .ok()
            .map(|est| est.size)
            .filter(|size| *size > 0);
        let ext = extension(&file.path);
        let nested = file.data.len() > 0x40
            && is_archive_data(&file.path, &file.data)
            && !matches!(ext, "sarc" | "farc" | "larc");
        out.push(Found { key, size });
        if nested {
            match Archive::read(&file.data) {
                Ok(inner) => members(&inner, endian, out),
                Err(err) => debug!(path = %file.path, %err, "nested member is not an archive"),
            }
        }
    }
}

fn scan_file(path: &Path, endian: Endian) -> std::result::Result<Vec<Found>, Skipped> {
    let key = canonical_name(path).ok_or_else(|| skip(path, "not under a content, romfs or aoc folder"))?;
    let data = fs::read(path).map_err(|e| skip(path, format!("unreadable: {e}")))?;
    let estimate = calc_size(&data, &key, endian).map_err(|e| skip(path, e.to_string()))?;
    let archive = is_archive_ext(extension(&key));
    if estimate.size == 0 && !archive {
        return Err(skip(path, "unknown resource kind"));
    }
    let mut found = vec![Found {
        key,
        size: (estimate.size > 0).then_some(estimate.size),
    }];
    if archive {
        let parsed = Archive::read(&data).map_err(|e| skip(path, format!("bad archive: {e}")))?;
        members(&parsed, endian, &mut found);
    }
    Ok(found)
}

/// Estimates every resource under `dir` and records the results in `table` and `names`.
/// Files that cannot be used are reported instead of aborting the scan.
pub fn scan(dir: &Path, table: &mut SizeTable, names: &mut NameTable) -> Result<ScanReport> {
    if !dir.is_dir() {
        return Err(crate::Error::NotFound(dir.display().to_string()));
    }
    let mut files: Vec<PathBuf> = vec![];
    let mut walk_errors: Vec<std::result::Result<Vec<Found>, Skipped>> = vec![];
    for entry in WalkDir::new(dir).follow_links(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => walk_errors.push(Err(skip(
                err.path().unwrap_or(dir),
                format!("unreadable: {err}"),
            ))),
        }
    }
    let endian = table.endian;
    let results: Vec<_> = files
        .par_iter()
        .map(|path| scan_file(path, endian))
        .collect();

    let mut report = ScanReport::default();
    let mut found = vec![];
    for result in walk_errors.into_iter().chain(results) {
        match result {
            Ok(mut list) => found.append(&mut list),
            Err(skipped) => {
                warn!(path = %skipped.path, reason = %skipped.reason, "skipped file");
                report.skipped.push(skipped);
            }
        }
    }
    found.sort_by(|a, b| a.key.cmp(&b.key));
    for Found { key, size } in found {
        names.add(&key);
        if let Some(size) = size {
            table.set(&key, size as u64)?;
            if report.inserted.last() != Some(&key) {
                report.inserted.push(key);
            }
        }
    }
    report.inserted_count = report.inserted.len();
    info!(
        inserted = report.inserted_count,
        skipped = report.skipped.len(),
        "scanned {}",
        dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::resource_hash;

    #[test]
    fn scan_collects_sizes_names_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("content");
        fs::create_dir_all(content.join("Map")).unwrap();
        fs::create_dir_all(content.join("Actor/Pack")).unwrap();
        fs::write(content.join("Map/A-1.mubin"), vec![0u8; 64]).unwrap();
        fs::write(content.join("Map/notes.txt"), b"hello").unwrap();
        fs::write(content.join("Actor/Pack/Broken.bactorpack"), b"nope").unwrap();

        let mut pack = Archive::new(Endian::Big, 4);
        pack.add("Actor/Physics/Link.bphysics", vec![0u8; 32]).unwrap();
        fs::write(
            content.join("Actor/Pack/Link.bactorpack"),
            pack.to_binary().unwrap(),
        )
        .unwrap();

        let mut table = SizeTable::new(Endian::Big);
        let mut names = NameTable::default();
        let report = scan(dir.path(), &mut table, &mut names).unwrap();

        assert_eq!(
            report.inserted,
            [
                "Actor/Pack/Link.bactorpack",
                "Actor/Physics/Link.bphysics",
                "Map/A-1.mubin"
            ]
        );
        assert_eq!(report.inserted_count, 3);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped.iter().any(|s| s.reason.contains("unknown")));
        assert!(report.skipped.iter().any(|s| s.reason.contains("bad archive")));
        assert!(table.get("Map/A-1.mubin").is_some());
        assert_eq!(
            names.resolve(resource_hash("Actor/Physics/Link.bphysics")),
            Some("Actor/Physics/Link.bphysics")
        );
    }

    #[cfg(unix)]
    #[test]
    fn broken_links_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("content").join("Map");
        fs::create_dir_all(&map).unwrap();
        fs::write(map.join("A-1.mubin"), vec![0u8; 16]).unwrap();
        let dangling = map.join("Gone.mubin");
        std::os::unix::fs::symlink(dir.path().join("missing.mubin"), &dangling).unwrap();

        let mut table = SizeTable::new(Endian::Big);
        let mut names = NameTable::default();
        let report = scan(dir.path(), &mut table, &mut names).unwrap();
        assert_eq!(report.inserted, ["Map/A-1.mubin"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].path, dangling.display().to_string());
        assert!(report.skipped[0].reason.starts_with("unreadable"));
    }

    #[test]
    fn missing_directory_is_not_found() {
        let mut table = SizeTable::new(Endian::Big);
        let mut names = NameTable::default();
        assert!(scan(Path::new("/definitely/not/here"), &mut table, &mut names).is_err());
    }
}
