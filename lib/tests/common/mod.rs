//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use libbits::binrw::Endian;
use libbits::yaz0::CompressionLevel;
use libbits::{compress_yaz0, Archive, Config, Workspace};

/// A workspace whose name table lives under `dir/data`.
pub fn workspace(dir: &Path) -> Workspace {
    Workspace::new(Config {
        data_dir: dir.join("data"),
        yaz0_quality: 1,
        ..Config::default()
    })
    .unwrap()
}

pub fn archive(endian: Endian, files: &[(&str, &[u8])]) -> Archive {
    let mut archive = Archive::new(endian, 4);
    for (path, data) in files {
        archive.add(path, data.to_vec()).unwrap();
    }
    archive
}

/// Encodes an archive of `files` and writes it to `dir/name`.
pub fn write_archive(dir: &Path, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, archive(Endian::Big, files).to_binary().unwrap()).unwrap();
    path
}

pub fn yaz0(data: Vec<u8>) -> Vec<u8> {
    compress_yaz0(data, CompressionLevel::Lookahead { quality: 1 }).unwrap()
}

/// Sorted (path, bytes) pairs of an archive.
pub fn contents(archive: &Archive) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = archive
        .files()
        .into_iter()
        .map(|file| (file.path.clone(), file.data.clone()))
        .collect();
    files.sort();
    files
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
