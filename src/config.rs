//! Configuration Module - User preferences from ~/.hallmark/config.toml
//!
//! Supports:
//! - Default signature database path
//! - Scan bounds and worker counts
//! - Identification fallback behaviour

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Hallmark Configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Signature database settings
    pub signatures: SignaturesConfig,
    /// Identification run settings
    pub scan: ScanConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
    /// Show a progress bar during identification runs
    pub show_progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), show_progress: true }
    }
}

/// Signature database settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignaturesConfig {
    /// Path to the signature database (JSON)
    pub path: Option<PathBuf>,
}

/// Identification run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of parallel workers (0 = auto)
    pub workers: usize,
    /// Max bytes to scan from each end of a file (0 = unlimited)
    pub max_bytes_to_scan: i64,
    /// Recurse into directories by default
    pub recursive: bool,
    /// Fall back to extension matching when no signature hits
    pub extension_fallback: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 0, // auto-detect
            max_bytes_to_scan: 0,
            recursive: true,
            extension_fallback: true,
        }
    }
}

impl Config {
    /// Load config from default path or return defaults
    pub fn load() -> Self {
        Self::load_from(&Self::default_path()).unwrap_or_default()
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(config)
    }

    /// Save config to default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        Ok(())
    }

    /// Get default config path
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("dev", "hallmark", "hallmark")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".hallmark")
                    .join("config.toml")
            })
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::default_path().exists()
    }

    /// Create default config file if it doesn't exist
    pub fn ensure_exists() -> Result<()> {
        let path = Self::default_path();
        if !path.exists() {
            let config = Config::default();
            config.save_to(&path)?;
            tracing::info!("Created default config at {}", path.display());
        }
        Ok(())
    }
}

/// Generate a sample config file with comments
pub fn generate_sample_config() -> String {
    r#"# Hallmark Configuration
# Location: ~/.config/hallmark/config.toml (or %APPDATA%\hallmark on Windows)

[general]
# Log level: trace, debug, info, warn, error
log_level = "info"

# Show a progress bar during identification runs
show_progress = true

[signatures]
# Path to the signature database (JSON)
# path = "/home/user/signatures.json"

[scan]
# Number of parallel workers (0 = auto-detect CPU count)
workers = 0

# Max bytes to scan from each end of a file (0 = unlimited)
max_bytes_to_scan = 0

# Recurse into directories
recursive = true

# Fall back to extension matching when no signature hits
extension_fallback = true
"#
    .to_string()
}
