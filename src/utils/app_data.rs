use crate::error::{BuildError, Result};
use crate::utils::collate::{CaseMap, Collation};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "flatdex";
const CONFIG_FILE: &str = "config.json";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bytes in ascending collation priority; unlisted bytes follow in byte order
    #[serde(default)]
    pub collate_order: Option<String>,

    /// Collate ASCII lowercase letters equal to uppercase
    #[serde(default)]
    pub collate_ignore_case: bool,

    /// Case fold for signature indexes as `from,to` character pairs.
    /// None means ASCII uppercase.
    #[serde(default)]
    pub case_map: Option<String>,

    /// Default sort memory for B-tree builds, in KiB
    #[serde(default = "default_sort_memory_kb")]
    pub sort_memory_kb: usize,

    /// Default bit-plane memory for signature builds, in KiB
    #[serde(default = "default_aim_memory_kb")]
    pub aim_memory_kb: usize,

    /// Default directory for sort spill files
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_sort_memory_kb() -> usize {
    4096
}

fn default_aim_memory_kb() -> usize {
    2048
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            collate_order: None,
            collate_ignore_case: false,
            case_map: None,
            sort_memory_kb: default_sort_memory_kb(),
            aim_memory_kb: default_aim_memory_kb(),
            work_dir: None,
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        match get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from an explicit file; the file must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| BuildError::open(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            BuildError::bad_argument(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Collation table, if the configuration asks for one
    pub fn collation(&self) -> Option<Collation> {
        match (&self.collate_order, self.collate_ignore_case) {
            (None, false) => None,
            (order, ignore_case) => Some(Collation::from_order(
                order.as_deref().unwrap_or("").as_bytes(),
                ignore_case,
            )),
        }
    }

    pub fn case_map(&self) -> CaseMap {
        match &self.case_map {
            Some(pairs) => CaseMap::from_pairs(pairs.as_bytes()),
            None => CaseMap::default(),
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Option<PathBuf> {
    app_data_base().map(|base| base.join(APP_NAME).join(CONFIG_FILE))
}

fn app_data_base() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Application Support"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    }
}
