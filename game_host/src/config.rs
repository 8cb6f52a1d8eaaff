use std::path::{Path, PathBuf};

use serde::Deserialize;

use scripting::ScriptConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub title: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            title: "game_host".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptSection {
    pub scripts_dir: String,
    /// Module loaded at startup, relative to `scripts_dir`.
    pub entry: String,
    pub memory_limit_kb: usize,
    pub run_budget_ms: u64,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            scripts_dir: "scripts".to_string(),
            entry: "main.lua".to_string(),
            memory_limit_kb: 16384, // 16 MB
            run_budget_ms: 33,
        }
    }
}

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub host: HostSection,
    pub scripting: ScriptSection,
}

impl HostConfig {
    /// Load configuration from an optional TOML file path.
    pub fn load(config_path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path {
            Some(path) if Path::new(path).exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        Ok(config)
    }

    /// Convert scripting section to scripting crate's ScriptConfig.
    pub fn to_script_config(&self) -> ScriptConfig {
        ScriptConfig {
            script_root: PathBuf::from(&self.scripting.scripts_dir),
            memory_limit: self.scripting.memory_limit_kb * 1024,
            run_budget_us: self.scripting.run_budget_ms * 1000,
            ..ScriptConfig::default()
        }
    }
}

/// Parse CLI arguments and load config.
/// Supports: --config <path>
pub fn parse_cli_args() -> HostConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(val) = args.get(i + 1) {
                    config_path = Some(val.as_str());
                    i += 2;
                } else {
                    eprintln!("--config requires a path argument");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    match HostConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
