//! Persistent user settings.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binary::Endianness;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where `names.json` and other runtime data live.
    pub data_dir: PathBuf,
    /// Optional JSON map of `hash -> path` merged under the user name table.
    pub stock_names: Option<PathBuf>,
    /// Optional JSON map of `path -> [crc32]` for unmodified game files. Archive
    /// entries are flagged as modded against it.
    pub stock_hashes: Option<PathBuf>,
    /// Platform assumed when estimating sizes with no RSTB open.
    pub default_endianness: Endianness,
    /// Yaz0 lookahead quality, 1 to 10.
    pub yaz0_quality: usize,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::default_dir(),
            stock_names: None,
            stock_hashes: None,
            default_endianness: Endianness::Big,
            yaz0_quality: 6,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wildbits")
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// Loads the config at `path`, or the defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn names_path(&self) -> PathBuf {
        self.data_dir.join("names.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"yaz0_quality": 3}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.yaz0_quality, 3);
        assert_eq!(config.default_endianness, Endianness::Big);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            default_endianness: Endianness::Little,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
        assert_eq!(config.names_path(), dir.path().join("names.json"));
    }
}
