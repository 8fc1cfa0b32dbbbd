//! Rules configuration loading.
//!
//! This module handles:
//! - Resolving which rules file applies (CLI > env > XDG > built-in preset)
//! - Parsing and semantic validation (every rule must compile)
//! - Building the shared [`RedactionEngine`]
//! - Config snapshots for job reports

use hs_redact::{
    HashAlgorithm, HashConfig, Hasher, Preset, RedactionEngine, RedactionError, RuleSet,
    RulesFile, TrimLength,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default XDG config directory name.
const CONFIG_DIR_NAME: &str = "histsan";

/// Rules file looked up in the config directory.
pub const RULES_FILE_NAME: &str = "rules.json";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "HISTSAN_CONFIG";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Rules file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rules file {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: RedactionError,
    },

    #[error("Cannot build redaction engine: {0}")]
    Engine(#[source] RedactionError),
}

/// Where the rules came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesSource {
    /// `--rules` or `HISTSAN_RULES`.
    Explicit,
    /// `rules.json` in the config directory.
    ConfigDir,
    /// No rules file; built-in preset only.
    Builtin,
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config directory (highest priority).
    pub config_dir: Option<PathBuf>,
    /// Explicit rules file path.
    pub rules_path: Option<PathBuf>,
    /// Preset overriding the one named in the rules file.
    pub preset: Option<Preset>,
    /// Algorithm overriding the rules file's hash section.
    pub algorithm: Option<HashAlgorithm>,
    /// Key file overriding the rules file's hash section.
    pub key_path: Option<PathBuf>,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub rules: RulesFile,
    /// Path to the rules file (None if using the built-in preset).
    pub rules_path: Option<PathBuf>,
    /// Short SHA-256 of the rules file content.
    pub rules_hash: Option<String>,
    pub source: RulesSource,
    /// The config directory used for resolution.
    pub config_dir: PathBuf,
    algorithm: Option<HashAlgorithm>,
    key_path: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Algorithm the engine will use.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
            .or(self.rules.hash.algorithm)
            .unwrap_or_default()
    }

    /// Key file the engine will load, if any.
    pub fn key_path(&self) -> Option<&Path> {
        self.key_path
            .as_deref()
            .or(self.rules.hash.key_path.as_deref())
    }

    /// Compile the rules and load key material.
    ///
    /// Every failure here is a configuration error: bad rules, a keyed
    /// algorithm without a key, or an unreadable key file.
    pub fn build_engine(&self) -> Result<RedactionEngine, ConfigError> {
        RedactionEngine::from_rules_file(&self.rules, self.algorithm, self.key_path.as_deref())
            .map_err(ConfigError::Engine)
    }

    /// Create a config snapshot for job reports.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            rules_path: self.rules_path.clone(),
            rules_hash: self.rules_hash.clone(),
            rules_source: self.source,
            preset: self.rules.preset,
            algorithm: self.algorithm(),
            rule_count: self.rules.effective_rules().len(),
        }
    }
}

/// Config snapshot for job reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub rules_path: Option<PathBuf>,
    pub rules_hash: Option<String>,
    pub rules_source: RulesSource,
    pub preset: Preset,
    pub algorithm: HashAlgorithm,
    pub rule_count: usize,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit rules path (CLI flag or `HISTSAN_RULES`, via ConfigOptions)
/// 2. `rules.json` in the config directory (`HISTSAN_CONFIG`, then
///    `$XDG_CONFIG_HOME/histsan/`)
/// 3. Built-in preset
///
/// An explicit `preset` replaces the preset named by the file.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let config_dir = resolve_config_dir(options);

    let (mut rules, rules_path, rules_hash, source) = match &options.rules_path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound { path: path.clone() });
            }
            let (rules, hash) = load_rules_file(path)?;
            (rules, Some(path.clone()), Some(hash), RulesSource::Explicit)
        }
        None => {
            let default_path = config_dir.join(RULES_FILE_NAME);
            if default_path.exists() {
                let (rules, hash) = load_rules_file(&default_path)?;
                (rules, Some(default_path), Some(hash), RulesSource::ConfigDir)
            } else {
                (RulesFile::default(), None, None, RulesSource::Builtin)
            }
        }
    };

    if let Some(preset) = options.preset {
        rules.preset = preset;
    }

    Ok(ResolvedConfig {
        rules,
        rules_path,
        rules_hash,
        source,
        config_dir,
        algorithm: options.algorithm,
        key_path: options.key_path.clone(),
    })
}

/// Resolve the config directory using the standard resolution order.
fn resolve_config_dir(options: &ConfigOptions) -> PathBuf {
    // 1. Explicit option
    if let Some(dir) = &options.config_dir {
        return dir.clone();
    }

    // 2. Environment variable
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }

    // 3. XDG config home
    let xdg_config = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });

    xdg_config.join(CONFIG_DIR_NAME)
}

/// Read, parse and semantically validate one rules file.
///
/// Returns the file and a short hash of its content.
pub fn load_rules_file(path: &Path) -> Result<(RulesFile, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = compute_hash(&content);

    let invalid = |source| ConfigError::Invalid {
        path: path.to_path_buf(),
        source,
    };
    let rules = RulesFile::parse(&content).map_err(invalid)?;
    RuleSet::compile(rules.effective_rules()).map_err(invalid)?;

    Ok((rules, hash))
}

/// Short SHA-256 of file content, for provenance.
fn compute_hash(content: &str) -> String {
    match Hasher::new(HashConfig::new(HashAlgorithm::Sha256, TrimLength::new(16)), None) {
        Ok(hasher) => hasher.token(content.as_bytes()),
        Err(_) => String::new(),
    }
}
