//! Configuration loading and cache directory management.
//!
//! Settings are merged from four layers with fixed precedence:
//! CLI flags > config file (`~/.md-qa/config.yaml`) > environment > defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_RELOAD_INTERVAL: u64 = 300;
pub const DEFAULT_INDEX_NAME: &str = "default";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_LLM_MODEL: &str = "qwen-flash";

pub const ENV_API_BASE_URL: &str = "MARKDOWN_QA_API_BASE_URL";
pub const ENV_API_KEY: &str = "MARKDOWN_QA_API_KEY";
pub const ENV_EMBEDDING_MODEL: &str = "MARKDOWN_QA_EMBEDDING_MODEL";
pub const ENV_LLM_MODEL: &str = "MARKDOWN_QA_LLM_MODEL";
/// Overrides the `~/.md-qa` configuration directory (used by tests).
pub const ENV_CONFIG_DIR: &str = "MARKDOWN_QA_CONFIG_DIR";

/// Remote API settings shared by the embedding and chat clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
    pub llm_model: String,
}

/// One immutable configuration snapshot. A new snapshot is produced on every
/// (re)load; components are reconfigured by handing them the new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub api: ApiConfig,
    pub port: u16,
    pub directories: Vec<PathBuf>,
    /// Seconds between incremental reloads.
    pub reload_interval: u64,
    pub index_name: String,
}

/// Values given on the command line. `None` means "not provided"; provided
/// values survive config-file hot reloads.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub directories: Option<Vec<PathBuf>>,
    pub reload_interval: Option<u64>,
    pub index_name: Option<String>,
    pub config_file: Option<PathBuf>,
}

// ---------------------------------------------------------------
// Config file schema
// ---------------------------------------------------------------

/// `directories` accepts either a YAML list or one comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DirectoriesField {
    List(Vec<String>),
    CommaSeparated(String),
}

impl DirectoriesField {
    fn into_paths(self) -> Vec<PathBuf> {
        let entries = match self {
            DirectoriesField::List(list) => list,
            DirectoriesField::CommaSeparated(s) => {
                s.split(',').map(|p| p.to_string()).collect()
            }
        };
        entries
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiSection {
    base_url: Option<String>,
    api_key: Option<String>,
    embedding_model: Option<String>,
    llm_model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerSection {
    port: Option<u32>,
    directories: Option<DirectoriesField>,
    reload_interval: Option<i64>,
    index_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    api: ApiSection,
    #[serde(default)]
    server: ServerSection,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unreadable config file {}: {e}", path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config file {}: {e}", path.display())))
    }
}

// ---------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------

/// Resolve the configuration directory: `$MARKDOWN_QA_CONFIG_DIR` if set,
/// otherwise `~/.md-qa`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(ENV_CONFIG_DIR) {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".md-qa"),
        None => PathBuf::from(".md-qa"),
    }
}

/// Path of the config file that would be read for the given CLI overrides,
/// whether or not it exists. Watched for hot reload.
pub fn config_file_path(cli: &CliOverrides) -> PathBuf {
    cli.config_file
        .clone()
        .unwrap_or_else(|| config_dir().join("config.yaml"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Build a snapshot by merging CLI flags, the config file, environment
    /// variables, and defaults, in that order of precedence.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let file_path = config_file_path(cli);
        let file = if file_path.exists() {
            ConfigFile::load(&file_path)?
        } else {
            if cli.config_file.is_some() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    file_path.display()
                )));
            }
            ConfigFile::default()
        };

        let base_url = file
            .api
            .base_url
            .or_else(|| env_var(ENV_API_BASE_URL))
            .ok_or_else(|| missing_api_field("base_url", ENV_API_BASE_URL))?;
        let api_key = file
            .api
            .api_key
            .or_else(|| env_var(ENV_API_KEY))
            .ok_or_else(|| missing_api_field("api_key", ENV_API_KEY))?;
        let embedding_model = file
            .api
            .embedding_model
            .or_else(|| env_var(ENV_EMBEDDING_MODEL))
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        let llm_model = file
            .api
            .llm_model
            .or_else(|| env_var(ENV_LLM_MODEL))
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string());

        let port = match cli.port {
            Some(p) => p,
            None => match file.server.port {
                Some(p) => u16::try_from(p)
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| Error::Config(format!("invalid port: {p} (expected 1..65535)")))?,
                None => DEFAULT_PORT,
            },
        };

        let directories = cli
            .directories
            .clone()
            .or_else(|| file.server.directories.clone().map(DirectoriesField::into_paths))
            .unwrap_or_default();
        if directories.is_empty() {
            warn!("no directories configured; the index will be empty");
        }

        let reload_interval = match cli.reload_interval {
            Some(i) => i,
            None => match file.server.reload_interval {
                Some(i) if i >= 1 => i as u64,
                Some(i) => {
                    return Err(Error::Config(format!(
                        "invalid reload_interval: {i} (expected a positive integer)"
                    )))
                }
                None => DEFAULT_RELOAD_INTERVAL,
            },
        };
        if reload_interval == 0 {
            return Err(Error::Config(
                "invalid reload_interval: 0 (expected a positive integer)".into(),
            ));
        }

        let index_name = cli
            .index_name
            .clone()
            .or(file.server.index_name)
            .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());

        Ok(Self {
            api: ApiConfig {
                base_url,
                api_key,
                embedding_model,
                llm_model,
            },
            port,
            directories,
            reload_interval,
            index_name,
        })
    }
}

fn missing_api_field(field: &str, env: &str) -> Error {
    Error::ApiConfig(format!(
        "api.{field} is not set. Provide it in {} or via {env}",
        config_dir().join("config.yaml").display()
    ))
}

// ---------------------------------------------------------------
// Cache layout
// ---------------------------------------------------------------

/// Paths under the cache directory. Creates directories on construction.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub cache_dir: PathBuf,
    pub embeddings_dir: PathBuf,
    pub manifest_file: PathBuf,
}

impl CachePaths {
    pub fn new(config_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let cache_dir = config_dir.as_ref().join("cache");
        let paths = Self {
            embeddings_dir: cache_dir.join("embeddings"),
            manifest_file: cache_dir.join("indexes.json"),
            cache_dir,
        };
        std::fs::create_dir_all(&paths.cache_dir)?;
        std::fs::create_dir_all(&paths.embeddings_dir)?;
        Ok(paths)
    }

    /// Similarity-structure and chunk-table files for a named index.
    pub fn index_files(&self, index_name: &str) -> (PathBuf, PathBuf) {
        (
            self.cache_dir.join(format!("{index_name}.faiss")),
            self.cache_dir.join(format!("{index_name}.meta")),
        )
    }

    pub fn index_exists(&self, index_name: &str) -> bool {
        let (vectors, meta) = self.index_files(index_name);
        vectors.exists() && meta.exists()
    }
}
