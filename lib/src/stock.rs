//! Hashes of unmodified game files, used to flag archive entries a mod changed.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::extensions::canonical_member_name;
use crate::{decompress_if, Result};

/// CRC32 of a file's decompressed contents, as stored in a stock hash table.
pub fn file_hash(data: &[u8]) -> Result<u32> {
    Ok(crc32fast::hash(&decompress_if(data)?))
}

/// Canonical resource name to the hashes of every stock version of that file.
///
/// The on-disk form is a JSON map `{"Actor/Pack/Link.bactorpack": [crc, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockHashes {
    table: HashMap<String, HashSet<u32>>,
}

impl StockHashes {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let raw: HashMap<String, Vec<u32>> = serde_json::from_str(&text)?;
        let table: HashMap<_, _> = raw
            .into_iter()
            .map(|(name, hashes)| (name, hashes.into_iter().collect()))
            .collect();
        debug!(files = table.len(), path = %path.display(), "loaded stock hashes");
        Ok(Self { table })
    }

    /// Records `data` as a stock version of `name`.
    pub fn insert(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let hash = file_hash(data)?;
        self.table
            .entry(canonical_member_name(name))
            .or_default()
            .insert(hash);
        Ok(())
    }

    /// True when `data` is not a stock version of `name`. Files the game does not
    /// ship count as modded.
    pub fn is_modded(&self, name: &str, data: &[u8]) -> bool {
        match self.table.get(&canonical_member_name(name)) {
            Some(stock) => file_hash(data).map_or(true, |hash| !stock.contains(&hash)),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yaz0::CompressionLevel;

    #[test]
    fn modded_when_contents_or_name_differ() {
        let mut stock = StockHashes::default();
        stock.insert("Actor/Link.bxml", b"stock link").unwrap();
        assert!(!stock.is_modded("Actor/Link.bxml", b"stock link"));
        assert!(!stock.is_modded("/Actor/Link.sbxml", b"stock link"));
        assert!(stock.is_modded("Actor/Link.bxml", b"edited link"));
        assert!(stock.is_modded("Actor/New.bxml", b"stock link"));

        let packed =
            crate::compress_yaz0(b"stock link", CompressionLevel::Naive { quality: 1 }).unwrap();
        assert!(!stock.is_modded("Actor/Link.sbxml", &packed));
    }

    #[test]
    fn loads_json_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hashes.json");
        let hash = file_hash(b"data").unwrap();
        fs::write(&path, format!(r#"{{"Map/A.mubin": [1, {hash}]}}"#)).unwrap();
        let stock = StockHashes::load(&path).unwrap();
        assert_eq!(stock.len(), 1);
        assert!(!stock.is_modded("Map/A.mubin", b"data"));
        assert!(stock.is_modded("Map/A.mubin", b"other"));
    }
}
