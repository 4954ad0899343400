//! Configuration loading and validation.
//!
//! This module handles:
//! - The estimator construction parameters ([`ThmmConfig`])
//! - Loading them from TOML or JSON, chosen by file extension
//! - Resolution order (explicit path > env > XDG > defaults)
//! - Semantic validation (ranges, mask alphabet, prior strengths)

pub mod priors;

pub use priors::PriorConfig;

use crate::logging::{event_names, Stage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use thmm_common::{CovarianceKind, ParamsMask};

/// Default XDG config directory name.
const CONFIG_DIR_NAME: &str = "tied_hmm";

/// Default config file name inside the config directory.
const CONFIG_FILE_NAME: &str = "thmm.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "THMM_CONFIG";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid TOML in config file {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for thmm_common::Error {
    fn from(err: ConfigError) -> Self {
        thmm_common::Error::Configuration(err.to_string())
    }
}

/// Construction parameters of a [`TiedHmm`](crate::TiedHmm).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThmmConfig {
    /// Number of semantic states exposed in the parameter space.
    pub n_unique: usize,
    /// Replicas per unique state (sub-chain length).
    pub n_tied: usize,
    /// Observation dimension.
    pub n_features: usize,
    /// Emission covariance parameterisation.
    pub covariance: CovarianceKind,
    /// Maximum EM iterations per `fit`.
    pub n_iter: usize,
    /// Stop once the log-likelihood gain falls below this.
    pub tol: f64,
    /// Parameter kinds updated by the M-step.
    pub params: ParamsMask,
    /// Parameter kinds re-initialised before the first iteration.
    pub init_params: ParamsMask,
    /// Seed for initialisation and sampling; `None` means seed 0.
    pub random_state: Option<u64>,
    /// Probability that an inner replica advances to the next one.
    pub advance_prob: f64,
    /// Scalar prior strengths.
    pub priors: PriorConfig,
}

impl Default for ThmmConfig {
    fn default() -> Self {
        Self {
            n_unique: 2,
            n_tied: 1,
            n_features: 1,
            covariance: CovarianceKind::Diagonal,
            n_iter: 10,
            tol: 1e-4,
            params: ParamsMask::all(),
            init_params: ParamsMask::all(),
            random_state: None,
            advance_prob: 1.0,
            priors: PriorConfig::default(),
        }
    }
}

impl ThmmConfig {
    /// Config with `n_unique` states and defaults elsewhere.
    pub fn new(n_unique: usize) -> Self {
        Self {
            n_unique,
            ..Self::default()
        }
    }

    pub fn with_n_tied(mut self, n_tied: usize) -> Self {
        self.n_tied = n_tied;
        self
    }

    pub fn with_n_features(mut self, n_features: usize) -> Self {
        self.n_features = n_features;
        self
    }

    pub fn with_covariance(mut self, covariance: CovarianceKind) -> Self {
        self.covariance = covariance;
        self
    }

    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Replace the M-step mask; unknown characters are a configuration error.
    pub fn with_params(mut self, params: &str) -> thmm_common::Result<Self> {
        self.params = params.parse()?;
        Ok(self)
    }

    /// Replace the initialisation mask; unknown characters are a configuration error.
    pub fn with_init_params(mut self, init_params: &str) -> thmm_common::Result<Self> {
        self.init_params = init_params.parse()?;
        Ok(self)
    }

    /// Seed actually used for the estimator RNG.
    pub fn seed(&self) -> u64 {
        self.random_state.unwrap_or(0)
    }

    /// Semantic validation beyond what serde checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_unique < 1 {
            return Err(ConfigError::Validation("n_unique must be >= 1".into()));
        }
        if self.n_tied < 1 {
            return Err(ConfigError::Validation("n_tied must be >= 1".into()));
        }
        if self.n_features < 1 {
            return Err(ConfigError::Validation("n_features must be >= 1".into()));
        }
        if !self.tol.is_finite() || self.tol < 0.0 {
            return Err(ConfigError::Validation(format!(
                "tol must be finite and >= 0, got {}",
                self.tol
            )));
        }
        if !(self.advance_prob > 0.0 && self.advance_prob <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "advance_prob must lie in (0, 1], got {}",
                self.advance_prob
            )));
        }
        self.priors.validate().map_err(ConfigError::Validation)
    }
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ThmmConfig,
    /// File the config was read from (None if using defaults).
    pub source: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit path (via ConfigOptions); must exist
/// 2. THMM_CONFIG environment variable; must exist
/// 3. `$XDG_CONFIG_HOME/tied_hmm/thmm.toml`, if present
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let resolved = match resolve_config_path(options, |key| std::env::var(key).ok()) {
        Some((path, required)) if required || path.exists() => ResolvedConfig {
            config: load_config_file(&path)?,
            source: Some(path),
        },
        _ => ResolvedConfig {
            config: ThmmConfig::default(),
            source: None,
        },
    };
    resolved.config.validate()?;

    tracing::info!(
        event = event_names::CONFIG_LOADED,
        stage = %Stage::Init,
        source = ?resolved.source,
        n_unique = resolved.config.n_unique,
        n_tied = resolved.config.n_tied,
        "configuration loaded"
    );
    Ok(resolved)
}

/// Pick the candidate path and whether it must exist.
fn resolve_config_path(
    options: &ConfigOptions,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<(PathBuf, bool)> {
    if let Some(path) = &options.config_path {
        return Some((path.clone(), true));
    }

    if let Some(path) = lookup(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some((PathBuf::from(path), true));
    }

    let xdg_config = lookup("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some((xdg_config.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME), false))
}

/// Read and parse one config file. Files ending in `.json` are JSON,
/// everything else is TOML.
pub fn load_config_file(path: &Path) -> Result<ThmmConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|source| ConfigError::JsonParse {
            path: path.to_path_buf(),
            source,
        })
    } else {
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
