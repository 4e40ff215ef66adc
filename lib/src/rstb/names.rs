use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::hash::resource_hash;
use crate::Result;

/// Resolves resource hashes back to paths.
///
/// Stock names come from an optional JSON list shipped with the game dump; user names
/// are everything learned since (added by hand or found by scans) and are what gets
/// persisted to `names.json`.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    stock: HashMap<u32, String>,
    user: HashMap<u32, String>,
}

fn read_map(path: &Path) -> Result<HashMap<u32, String>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

impl NameTable {
    /// Loads the stock list (if any) and the user names file (if it exists).
    pub fn load(stock: Option<&Path>, user: &Path) -> Result<Self> {
        let stock = match stock {
            Some(path) => read_map(path)?,
            None => HashMap::new(),
        };
        let user = if user.exists() {
            read_map(user)?
        } else {
            HashMap::new()
        };
        debug!(stock = stock.len(), user = user.len(), "loaded name table");
        Ok(Self { stock, user })
    }

    /// Registers `name` and returns its hash.
    pub fn add(&mut self, name: &str) -> u32 {
        let hash = resource_hash(name);
        if self.stock.get(&hash).map(String::as_str) != Some(name) {
            self.user.insert(hash, name.to_string());
        }
        hash
    }

    pub fn resolve(&self, hash: u32) -> Option<&str> {
        self.user
            .get(&hash)
            .or_else(|| self.stock.get(&hash))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stock.len() + self.user.keys().filter(|k| !self.stock.contains_key(k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.stock.is_empty() && self.user.is_empty()
    }

    /// Writes the names not already in the stock list.
    pub fn flush(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(&self.user)?)?;
        info!(names = self.user.len(), path = %path.display(), "saved name table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_resolve_and_persist_only_new_names() {
        let dir = tempfile::tempdir().unwrap();
        let stock_path = dir.path().join("stock.json");
        let user_path = dir.path().join("data").join("names.json");
        let stock_hash = resource_hash("Actor/Pack/Link.bactorpack");
        fs::write(
            &stock_path,
            format!(r#"{{"{stock_hash}": "Actor/Pack/Link.bactorpack"}}"#),
        )
        .unwrap();

        let mut names = NameTable::load(Some(&stock_path), &user_path).unwrap();
        assert_eq!(names.resolve(stock_hash), Some("Actor/Pack/Link.bactorpack"));
        assert_eq!(names.add("Actor/Pack/Link.bactorpack"), stock_hash);
        let hash = names.add("Mod/New.bxml");
        assert_eq!(names.resolve(hash), Some("Mod/New.bxml"));
        assert_eq!(names.len(), 2);
        names.flush(&user_path).unwrap();

        let reloaded = NameTable::load(None, &user_path).unwrap();
        assert_eq!(reloaded.resolve(hash), Some("Mod/New.bxml"));
        assert_eq!(reloaded.resolve(stock_hash), None);
    }
}
