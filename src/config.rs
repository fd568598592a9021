/// Configuration module for the retriever.
///
/// Handles loading, validating, and providing default configuration values.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ontology::Cui;
use crate::retriever::window::{DEFAULT_SENTENCE_WINDOW_SIZE, DEFAULT_TOKEN_WINDOW_SIZE};
use crate::text::{NormalizeMode, Normalizer, RuleNormalizer};

const DEFAULT_CONFIG_PATH: &str = "config.json";

// ── Default value functions ──────────────────────────────────────────

fn default_lookup_dir() -> String {
    "./snomed_lookup".to_string()
}

fn default_true() -> bool {
    true
}

fn default_token_window_size() -> usize {
    DEFAULT_TOKEN_WINDOW_SIZE
}

fn default_sentence_window_size() -> usize {
    DEFAULT_SENTENCE_WINDOW_SIZE
}

// ── Config struct ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the persisted lookup JSON files.
    #[serde(default = "default_lookup_dir")]
    pub lookup_dir: String,

    /// Raw RF2 release directory, only needed to rebuild the lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_dir: Option<String>,

    /// Root concepts compiled into the phrase index.
    #[serde(default)]
    pub root_cuis: Vec<Cui>,

    #[serde(default)]
    pub keep_child_cuis: bool,

    #[serde(default = "default_true")]
    pub include_child_cuis: bool,

    #[serde(default = "default_token_window_size")]
    pub token_window_size: usize,

    #[serde(default = "default_sentence_window_size")]
    pub sentence_window_size: usize,

    #[serde(default)]
    pub normalization: NormalizeMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_dir: default_lookup_dir(),
            release_dir: None,
            root_cuis: Vec::new(),
            keep_child_cuis: false,
            include_child_cuis: default_true(),
            token_window_size: default_token_window_size(),
            sentence_window_size: default_sentence_window_size(),
            normalization: NormalizeMode::default(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// An empty `config_path` means `"config.json"`. A missing file yields the
    /// defaults (and, for the default path, a template to fill in); a file
    /// that exists but does not parse is an error. Call [`Config::validate`]
    /// before building an index from the result.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = Path::new(if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        });

        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("{} not found, using defaults", path.display());
                let cfg = Self::default();
                if path == Path::new(DEFAULT_CONFIG_PATH) {
                    cfg.write_template(path);
                }
                return Ok(cfg);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };

        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON: {}", path.display()))?;
        info!(
            "Loaded configuration from {} ({} root concepts)",
            path.display(),
            cfg.root_cuis.len()
        );
        Ok(cfg)
    }

    fn write_template(&self, path: &Path) {
        match path.to_str().map(|p| self.save(p)) {
            Some(Ok(())) => warn!(
                "Generated config template {}; set root_cuis before extracting",
                path.display()
            ),
            Some(Err(e)) => warn!("Failed to generate config template: {e}"),
            None => {}
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.token_window_size > 0,
            "token_window_size must be positive"
        );
        anyhow::ensure!(
            !self.lookup_dir.trim().is_empty(),
            "lookup_dir must not be empty"
        );
        anyhow::ensure!(
            !self.root_cuis.is_empty(),
            "root_cuis must name at least one concept"
        );
        anyhow::ensure!(
            self.root_cuis.iter().all(|&cui| cui > 0),
            "root_cuis must be positive concept ids"
        );
        Ok(())
    }

    #[must_use]
    pub fn lookup_path(&self) -> PathBuf {
        PathBuf::from(&self.lookup_dir)
    }

    /// The normalizer selected by `normalization`.
    #[must_use]
    pub fn normalizer(&self) -> Arc<dyn Normalizer> {
        Arc::new(RuleNormalizer::new(self.normalization))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
