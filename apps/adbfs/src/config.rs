// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate adbfs TOML configuration.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::read::TransferConfig;
use crate::session::SessionOptions;
use crate::{ATTR_TTL, DIR_TTL, MIRROR_DIR_NAME};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "ADBFS_CONFIG";

/// Resolved adbfs configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbfsConfig {
    /// Host adb invocation settings.
    pub adb: AdbConfig,
    /// Cache freshness windows.
    pub cache: CacheConfig,
    /// Read pipeline parameters.
    pub transfer: TransferConfig,
    /// Local mirror store settings.
    pub mirror: MirrorConfig,
}

/// Host adb invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbConfig {
    /// Path or name of the adb program.
    pub program: PathBuf,
}

/// Cache freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Attribute record TTL.
    pub attr_ttl: Duration,
    /// Directory listing TTL.
    pub dir_ttl: Duration,
}

/// Local mirror store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Root directory receiving pulled chunks.
    pub root: PathBuf,
}

impl Default for AdbfsConfig {
    fn default() -> Self {
        Self {
            adb: AdbConfig {
                program: PathBuf::from(adb_shell::DEFAULT_ADB_PROGRAM),
            },
            cache: CacheConfig {
                attr_ttl: ATTR_TTL,
                dir_ttl: DIR_TTL,
            },
            transfer: TransferConfig::default(),
            mirror: MirrorConfig {
                root: default_mirror_root(),
            },
        }
    }
}

impl AdbfsConfig {
    /// Session options derived from this configuration.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            attr_ttl: self.cache.attr_ttl,
            dir_ttl: self.cache.dir_ttl,
            transfer: self.transfer.clone(),
            mirror_root: self.mirror.root.clone(),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.cache.attr_ttl.is_zero() {
            return Err(anyhow!("cache.attr_ttl_secs must be greater than zero"));
        }
        if self.cache.dir_ttl.is_zero() {
            return Err(anyhow!("cache.dir_ttl_secs must be greater than zero"));
        }
        if self.transfer.block_size == 0 {
            return Err(anyhow!("transfer.block_size must be greater than zero"));
        }
        if self.transfer.block_count == 0 {
            return Err(anyhow!("transfer.block_count must be greater than zero"));
        }
        if !self.transfer.staging_path.starts_with('/') {
            return Err(anyhow!(
                "transfer.staging_path must be absolute, got '{}'",
                self.transfer.staging_path
            ));
        }
        if self.adb.program.as_os_str().is_empty() {
            return Err(anyhow!("adb.program must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    adb: AdbTomlSection,
    #[serde(default)]
    cache: CacheTomlSection,
    #[serde(default)]
    transfer: TransferTomlSection,
    #[serde(default)]
    mirror: MirrorTomlSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdbTomlSection {
    program: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheTomlSection {
    attr_ttl_secs: Option<u64>,
    dir_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferTomlSection {
    block_size: Option<u64>,
    block_count: Option<u64>,
    staging_path: Option<String>,
    stage_chunks: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MirrorTomlSection {
    root: Option<PathBuf>,
}

/// Default mirror store root, `~/.adbfs`.
#[must_use]
pub fn default_mirror_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(MIRROR_DIR_NAME)
}

/// Return the per-user configuration file if one exists.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    let candidate = dirs::config_dir()?.join("adbfs").join("adbfs.toml");
    candidate.is_file().then_some(candidate)
}

/// Parse configuration text, filling unset keys with defaults.
pub fn parse_config(text: &str) -> Result<AdbfsConfig> {
    let parsed: ConfigToml = toml::from_str(text).context("invalid adbfs configuration TOML")?;
    let defaults = AdbfsConfig::default();
    let config = AdbfsConfig {
        adb: AdbConfig {
            program: parsed.adb.program.unwrap_or(defaults.adb.program),
        },
        cache: CacheConfig {
            attr_ttl: parsed
                .cache
                .attr_ttl_secs
                .map_or(defaults.cache.attr_ttl, Duration::from_secs),
            dir_ttl: parsed
                .cache
                .dir_ttl_secs
                .map_or(defaults.cache.dir_ttl, Duration::from_secs),
        },
        transfer: TransferConfig {
            block_size: parsed
                .transfer
                .block_size
                .unwrap_or(defaults.transfer.block_size),
            block_count: parsed
                .transfer
                .block_count
                .unwrap_or(defaults.transfer.block_count),
            staging_path: parsed
                .transfer
                .staging_path
                .unwrap_or(defaults.transfer.staging_path),
            stage_chunks: parsed
                .transfer
                .stage_chunks
                .unwrap_or(defaults.transfer.stage_chunks),
        },
        mirror: MirrorConfig {
            root: parsed.mirror.root.unwrap_or(defaults.mirror.root),
        },
    };
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<AdbfsConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read adbfs config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid adbfs config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").expect("parse");
        assert_eq!(config, AdbfsConfig::default());
        assert_eq!(config.cache.attr_ttl, Duration::from_secs(60));
        assert_eq!(config.cache.dir_ttl, Duration::from_secs(180));
        assert_eq!(config.transfer.chunk_bytes(), 2_097_152);
        assert!(config.mirror.root.ends_with(".adbfs"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
[adb]
program = "/opt/platform-tools/adb"

[cache]
attr_ttl_secs = 5

[transfer]
block_size = 4096
stage_chunks = false
staging_path = "/data/local/tmp/adbfs.swp"

[mirror]
root = "/var/tmp/adbfs"
"#,
        )
        .expect("parse");
        assert_eq!(config.adb.program, PathBuf::from("/opt/platform-tools/adb"));
        assert_eq!(config.cache.attr_ttl, Duration::from_secs(5));
        assert_eq!(config.cache.dir_ttl, DIR_TTL);
        assert_eq!(config.transfer.block_size, 4096);
        assert_eq!(config.transfer.block_count, 2048);
        assert!(!config.transfer.stage_chunks);
        assert_eq!(config.transfer.staging_path, "/data/local/tmp/adbfs.swp");
        let options = config.session_options();
        assert_eq!(options.mirror_root, PathBuf::from("/var/tmp/adbfs"));
        assert_eq!(options.attr_ttl, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse_config("[cache]\nattr_ttl_secs = 0\n").is_err());
        assert!(parse_config("[transfer]\nblock_count = 0\n").is_err());
        assert!(parse_config("[transfer]\nstaging_path = \"tmp/x\"\n").is_err());
        assert!(parse_config("[cache]\nttl = 3\n").is_err());
        assert!(parse_config("[device]\nserial = \"abc\"\n").is_err());
    }
}
