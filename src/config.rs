//! Pipeline configuration
//!
//! Loaded from a YAML file. Every field has a default, so an empty file (or
//! no file) gives a working in-memory setup with the stock timings.
//!
//! ```yaml
//! pages_per_chunk: 25
//! page_break: form_feed          # or { marker: "--- Page" }
//! retry:
//!   max_attempts: 5
//!   initial_delay_ms: 2000
//! chunk_delay_ms: 1200
//! service:
//!   command: folio-analyze
//!   args: ["--model", "default"]
//! profiles:
//!   - id: house
//!     name: House style
//!     documents:
//!       - { title: Style guide, path: rules/style.md }
//! database: ~/.local/share/folio/folio.db
//! ```

use crate::backoff::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::chunk::{Chunker, PageBreak, DEFAULT_PAGES_PER_CHUNK};
use crate::rules::{ProfileLibrary, RuleProfile};
use crate::service::CommandService;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default courtesy delay between consecutive chunk-level compliance calls.
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 1200;

/// Default cap on the text sent to whole-document stages, in characters.
pub const DEFAULT_DOCUMENT_EXCERPT_CHARS: usize = 120_000;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_attempts, Duration::from_millis(self.initial_delay_ms))
    }
}

/// Subprocess analysis service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Program to run per call; `None` means no real service is configured
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 120,
        }
    }
}

impl ServiceConfig {
    /// Build the subprocess client, if a command is configured
    pub fn command_service(&self) -> Option<CommandService> {
        self.command.as_ref().map(|program| {
            CommandService::new(program.clone())
                .with_args(self.args.clone())
                .with_timeout(Duration::from_secs(self.timeout_secs))
        })
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub pages_per_chunk: usize,
    pub page_break: PageBreak,
    pub retry: RetryConfig,
    pub chunk_delay_ms: u64,
    pub document_excerpt_chars: usize,
    pub service: ServiceConfig,
    pub profiles: Vec<RuleProfile>,
    /// SQLite database; in-memory only when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// User credited in usage entries when a job names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Directory of the loaded file; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pages_per_chunk: DEFAULT_PAGES_PER_CHUNK,
            page_break: PageBreak::FormFeed,
            retry: RetryConfig::default(),
            chunk_delay_ms: DEFAULT_CHUNK_DELAY_MS,
            document_excerpt_chars: DEFAULT_DOCUMENT_EXCERPT_CHARS,
            service: ServiceConfig::default(),
            profiles: Vec::new(),
            database: None,
            user: None,
            base_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = if yaml.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&yaml)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pages_per_chunk == 0 {
            return Err(ConfigError::Invalid("pages_per_chunk must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.document_excerpt_chars == 0 {
            return Err(ConfigError::Invalid(
                "document_excerpt_chars must be at least 1".into(),
            ));
        }
        if let PageBreak::Marker(marker) = &self.page_break {
            if marker.trim().is_empty() {
                return Err(ConfigError::Invalid("page_break marker is empty".into()));
            }
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if profile.id.trim().is_empty() {
                return Err(ConfigError::Invalid("profile with empty id".into()));
            }
            if !seen.insert(profile.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile id '{}'",
                    profile.id
                )));
            }
        }
        Ok(())
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.pages_per_chunk).with_page_break(self.page_break.clone())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.retry.policy()
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    /// Rule profiles as a library, relative paths resolved against the
    /// config file's directory
    pub fn profile_library(&self) -> ProfileLibrary {
        let library = match &self.base_dir {
            Some(dir) => ProfileLibrary::new().with_base_dir(dir.clone()),
            None => ProfileLibrary::new(),
        };
        for profile in &self.profiles {
            library.insert(profile.clone());
        }
        library
    }

    /// Database path with `~/` expanded and relative paths resolved
    pub fn database_path(&self) -> Option<PathBuf> {
        let path = self.database.as_ref()?;
        if let Ok(rest) = path.strip_prefix("~") {
            return dirs::home_dir().map(|home| home.join(rest));
        }
        match &self.base_dir {
            Some(dir) if path.is_relative() => Some(dir.join(path)),
            _ => Some(path.clone()),
        }
    }
}

/// Default database location: `<data dir>/folio/folio.db`
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("folio").join("folio.db"))
}
