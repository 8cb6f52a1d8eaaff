use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ScriptError;

/// Runtime configuration for the script subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Directory every module path is resolved against.
    pub script_root: PathBuf,
    /// Runtime heap limit in bytes (0 = unlimited).
    pub memory_limit: usize,
    /// Runs slower than this are logged at warn level (0 = never).
    pub run_budget_us: u64,
    /// Extensions loaded as structured data instead of code.
    pub data_extensions: Vec<String>,
    /// Extensions whose exports are just their root-relative path.
    pub asset_extensions: Vec<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            script_root: PathBuf::from("scripts"),
            memory_limit: 16 * 1024 * 1024,
            run_budget_us: 33_000,
            data_extensions: vec!["json".to_string(), "toml".to_string()],
            asset_extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "wav".to_string(),
                "ogg".to_string(),
            ],
        }
    }
}

impl ScriptConfig {
    /// Config rooted at `root` with every other field defaulted.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            script_root: root.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document whose top level is the script config.
    pub fn from_toml_str(content: &str) -> Result<Self, ScriptError> {
        toml::from_str(content).map_err(|e| ScriptError::Config(e.to_string()))
    }

    pub fn is_data_extension(&self, path: &Path) -> bool {
        has_extension(path, &self.data_extensions)
    }

    pub fn is_asset_extension(&self, path: &Path) -> bool {
        has_extension(path, &self.asset_extensions)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
