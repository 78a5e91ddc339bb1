//! Configuration loaded once at startup from a JSON file.
//!
//! ```json
//! {
//!   "sql": { "database": "/var/lib/wp/wordpress.sqlite", "table_prefix": "wp_" },
//!   "wp_server": {
//!     "wp_uploads": "/var/www/html/wp-content/uploads/",
//!     "png_q": 32,
//!     "webp_mp_to_max_q": { "0": 70, "1": 60, "2": 50, "4": 50 }
//!   }
//! }
//! ```
//!
//! `png_q` is the palette colour count. `webp_mp_to_max_q` maps megapixel
//! lower bounds to webp quality; only key `"0"` is required.

use crate::error::{Result, ShrinkError};
use crate::quality::QualityPolicy;
use crate::scaler::SizeCaps;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_LEDGER_PATH: &str = "latest_mods.csv";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub sql: StoreConfig,
    pub wp_server: ServerConfig,
    #[serde(default)]
    pub sizes: SizesConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// File this configuration was read from.
    #[serde(skip_deserializing, default = "default_config_path")]
    pub source: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file holding the `<prefix>postmeta` table.
    pub database: PathBuf,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub wp_uploads: PathBuf,
    pub png_q: u32,
    pub webp_mp_to_max_q: BTreeMap<String, u32>,
}

/// Upload-time size settings of the CMS. Changing them later does not
/// affect images already uploaded, so the defaults fit nearly every site.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SizesConfig {
    pub medium: [u32; 2],
    pub large: [u32; 2],
    pub thumbnail: [u32; 2],
}

impl Default for SizesConfig {
    fn default() -> Self {
        let caps = SizeCaps::default();
        Self {
            medium: [caps.medium.0, caps.medium.1],
            large: [caps.large.0, caps.large.1],
            thumbnail: [caps.thumbnail.0, caps.thumbnail.1],
        }
    }
}

impl SizesConfig {
    pub fn caps(&self) -> SizeCaps {
        SizeCaps {
            medium: (self.medium[0], self.medium[1]),
            large: (self.large[0], self.large[1]),
            thumbnail: (self.thumbnail[0], self.thumbnail[1]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    pub staging_dir: Option<PathBuf>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "convert".into(),
            staging_dir: None,
        }
    }
}

impl EncoderConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_table_prefix() -> String {
    "wp_".into()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}

fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

impl Config {
    /// Parse and validate, including the existence of the managed root.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            ShrinkError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&contents)?;
        config.source = path.to_path_buf();
        ensure_root_exists(&config.wp_server.wp_uploads, &config.source)?;
        Ok(config)
    }

    /// Parse and validate everything that does not touch the filesystem.
    pub fn from_json(contents: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.encoder.program = self.encoder.program.trim().to_string();
        if self.encoder.program.is_empty() {
            self.encoder.program = EncoderConfig::default().program;
        }
    }

    fn validate(&self) -> Result<()> {
        if !self
            .sql
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ShrinkError::Config(format!(
                "table_prefix {:?} may only contain ASCII letters, digits and '_'",
                self.sql.table_prefix
            )));
        }
        if self.wp_server.png_q == 0 {
            return Err(ShrinkError::Config("png_q must be greater than 0".into()));
        }
        for (name, [w, h]) in [
            ("medium", self.sizes.medium),
            ("large", self.sizes.large),
            ("thumbnail", self.sizes.thumbnail),
        ] {
            if w == 0 || h == 0 {
                return Err(ShrinkError::Config(format!(
                    "sizes.{} must be positive, got {}x{}",
                    name, w, h
                )));
            }
        }
        self.quality_policy().map(|_| ())
    }

    pub fn quality_policy(&self) -> Result<QualityPolicy> {
        QualityPolicy::from_config(self.wp_server.png_q, &self.wp_server.webp_mp_to_max_q)
    }
}

/// Fails with `RootNotFound`, naming both paths resolved against the working
/// directory, when the managed root is not a directory.
pub fn ensure_root_exists(root: &Path, config_path: &Path) -> Result<()> {
    if root.is_dir() {
        return Ok(());
    }
    Err(ShrinkError::RootNotFound {
        root: absolute(root),
        config: absolute(config_path),
    })
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
