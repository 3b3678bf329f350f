//! Main configuration: a directory of YAML files.
//!
//! Every `*.yaml` file in the directory is keyed by its upper-cased stem.
//! Two sections are required:
//!
//! ```yaml
//! # site.yaml
//! SITE_NAME: BCH
//! REMOTE:
//!   URL: https://entities.example.org/api
//!   TIMEOUT_SECS: 30
//! ```
//!
//! ```yaml
//! # users.yaml
//! alice:
//!   SYN_USERNAME: alice@example.org
//!   API_KEY: "..."
//! ```
//!
//! Any other file (`projects.yaml`, ...) is accepted and left alone.

pub mod defaults;
pub mod push;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::remote::Credentials;

pub use defaults::{ConfigKind, write_defaults};
pub use push::{InteractionConfig, PushConfig};

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "DAGPUSH_CONFIG_DIR";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory {0} does not exist (run `dagpush config` to create one)")]
    MissingDir(PathBuf),

    #[error("Could not determine a default config directory; pass --config-dir")]
    NoDefaultDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Required config section {section} not found in {dir} (expected {file})")]
    MissingSection {
        section: &'static str,
        file: &'static str,
        dir: PathBuf,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SITE has no REMOTE.URL; set it in site.yaml or use --dry-run")]
    MissingRemote,
}

/// `SITE.REMOTE`: where the live entity store lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SiteConfig {
    pub site_name: String,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

/// One operator entry of `USERS`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct UserConfig {
    pub syn_username: String,
    pub api_key: String,
}

impl UserConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.syn_username, &self.api_key)
    }
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("syn_username", &self.syn_username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Loaded main configuration.
#[derive(Debug, Clone)]
pub struct MainConfig {
    pub site: SiteConfig,
    pub users: BTreeMap<String, UserConfig>,
    pub dir: PathBuf,
}

impl MainConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::MissingDir(dir.to_path_buf()));
        }

        let mut site = None;
        let mut users = None;
        for path in yaml_files(dir)? {
            let section = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_uppercase())
                .unwrap_or_default();
            match section.as_str() {
                "SITE" => site = read_yaml::<SiteConfig>(&path)?,
                "USERS" => users = read_yaml::<BTreeMap<String, UserConfig>>(&path)?,
                other => tracing::trace!(section = other, path = %path.display(), "ignoring config file"),
            }
        }

        let site = site.ok_or_else(|| ConfigError::MissingSection {
            section: "SITE",
            file: "site.yaml",
            dir: dir.to_path_buf(),
        })?;
        let users = users.ok_or_else(|| ConfigError::MissingSection {
            section: "USERS",
            file: "users.yaml",
            dir: dir.to_path_buf(),
        })?;

        tracing::debug!(dir = %dir.display(), site = %site.site_name, users = users.len(), "loaded main config");
        Ok(Self {
            site,
            users,
            dir: dir.to_path_buf(),
        })
    }

    pub fn user(&self, id: &str) -> Option<&UserConfig> {
        self.users.get(id)
    }

    pub fn remote(&self) -> Result<&RemoteConfig, ConfigError> {
        self.site.remote.as_ref().ok_or(ConfigError::MissingRemote)
    }
}

/// Platform config directory, e.g. `~/.config/dagpush` on Linux.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("org", "dagpush", "dagpush")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(ConfigError::NoDefaultDir)
}

/// `*.yaml` files directly inside `dir`, sorted by name.
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one YAML document. An empty file yields `None`.
pub(crate) fn read_yaml<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_yaml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
