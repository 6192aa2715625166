//! Configuration for contentflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONTENTFLOW_HOME, CONTENTFLOW_DB, CONTENTFLOW_WORKER_ID)
//! 2. Config file (.contentflow/config.yaml)
//! 3. Defaults (~/.contentflow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .contentflow/config.yaml
//! - Paths in config file are relative to the .contentflow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".contentflow";
const DATABASE_FILE: &str = "contentflow.db";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub images: ImageSettings,
    #[serde(default)]
    pub transcription: TranscriptionSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .contentflow/)
    pub home: Option<String>,
    /// SQLite database file (relative to .contentflow/)
    pub database: Option<String>,
}

/// Sequential processor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Checkout lifetime; handlers renew it during long phases
    pub checkout_ttl_secs: u64,
    /// Claims not refreshed for this long are presumed orphaned; longer
    /// than any handler bound that runs without heartbeats
    pub claim_ttl_secs: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Delay before a task that lost a checkout race is retried
    pub contention_delay_ms: u64,
    pub idle_min_ms: u64,
    pub idle_max_ms: u64,
    pub reclaim_interval_secs: u64,
    /// Sleep after the store itself failed
    pub error_backoff_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            checkout_ttl_secs: 900,
            claim_ttl_secs: 3600,
            max_attempts: 5,
            retry_base_ms: 30_000,
            retry_max_ms: 3_600_000,
            contention_delay_ms: 5_000,
            idle_min_ms: 500,
            idle_max_ms: 30_000,
            reclaim_interval_secs: 60,
            error_backoff_ms: 5_000,
        }
    }
}

impl WorkerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.retry_base_ms,
            max_delay_ms: self.retry_max_ms,
            backoff_multiplier: 2.0,
        }
    }

    pub fn checkout_ttl(&self) -> Duration {
        Duration::from_secs(self.checkout_ttl_secs)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Retry TLS failures of requests without credentials with
    /// certificate checks disabled
    pub insecure_fallback: bool,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 2,
            retry_delay_ms: 500,
            insecure_fallback: true,
            user_agent: format!("contentflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 120,
            max_tokens: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub size: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/images/generations".to_string(),
            model: "dall-e-3".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            size: "1024x1024".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub whisper_binary: String,
    pub model: String,
    pub max_download_bytes: usize,
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            whisper_binary: "whisper".to_string(),
            model: "base".to_string(),
            max_download_bytes: 200 * 1024 * 1024,
            timeout_secs: 1_800,
        }
    }
}

/// Which optional phases run, and content budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub illustrate: bool,
    pub fetch_discussion: bool,
    /// Character budget for text handed to the language model
    pub max_text_chars: usize,
    pub max_feed_items: usize,
    pub max_comments: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            illustrate: true,
            fetch_discussion: true,
            max_text_chars: 24_000,
            max_feed_items: 20,
            max_comments: 50,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// SQLite database shared by all workers
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Identifier this process claims tasks under
    pub worker_id: String,
    pub worker: WorkerSettings,
    pub http: HttpSettings,
    pub llm: LlmSettings,
    pub images: ImageSettings,
    pub transcription: TranscriptionSettings,
    pub pipeline: PipelineSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Worker id for processes that were not given one
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
}

/// Merge the config file (if any), environment and defaults
fn resolve(
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };

    // Relative paths in the file are anchored at .contentflow/
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let home = if let Some(env_home) = env("CONTENTFLOW_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home_path)) = (&config_dir, &config.paths.home) {
        resolve_path(dir, home_path)
    } else {
        default_home
    };

    let database = if let Some(env_db) = env("CONTENTFLOW_DB") {
        PathBuf::from(env_db)
    } else if let (Some(dir), Some(db_path)) = (&config_dir, &config.paths.database) {
        resolve_path(dir, db_path)
    } else {
        home.join(DATABASE_FILE)
    };

    let worker_id = env("CONTENTFLOW_WORKER_ID")
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(default_worker_id);

    ResolvedConfig {
        home,
        database,
        config_file,
        worker_id,
        worker: config.worker,
        http: config.http,
        llm: config.llm,
        images: config.images,
        transcription: config.transcription,
        pipeline: config.pipeline,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(resolve(file, |key| std::env::var(key).ok(), default_home))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, no_env, PathBuf::from("/home/test/.contentflow"));

        assert_eq!(config.home, PathBuf::from("/home/test/.contentflow"));
        assert_eq!(
            config.database,
            PathBuf::from("/home/test/.contentflow/contentflow.db")
        );
        assert!(config.config_file.is_none());
        assert_eq!(config.worker.checkout_ttl_secs, 900);
        assert_eq!(config.worker.claim_ttl_secs, 3600);
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1"
paths:
  home: ./state
  database: ./state/queue.db
worker:
  checkout_ttl_secs: 120
  max_attempts: 3
pipeline:
  illustrate: false
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version.as_deref(), Some("1"));
        assert_eq!(parsed.worker.checkout_ttl_secs, 120);
        // Unset keys keep their defaults
        assert_eq!(parsed.worker.claim_ttl_secs, 3600);
        assert!(!parsed.pipeline.illustrate);
        assert!(parsed.pipeline.fetch_discussion);

        let config = resolve(
            Some((config_path, parsed)),
            no_env,
            PathBuf::from("/unused"),
        );
        assert_eq!(config.home, config_dir.join("./state"));
        assert_eq!(config.database, config_dir.join("./state/queue.db"));
        assert_eq!(config.worker.max_attempts, 3);
    }

    #[test]
    fn test_env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("CONTENTFLOW_HOME", "/env/home"),
            ("CONTENTFLOW_WORKER_ID", "worker-7"),
        ]
        .into_iter()
        .collect();

        let file = ConfigFile {
            paths: PathsConfig {
                home: Some("./ignored".to_string()),
                database: None,
            },
            ..ConfigFile::default()
        };

        let config = resolve(
            Some((PathBuf::from("/project/.contentflow/config.yaml"), file)),
            |key| env.get(key).map(|v| v.to_string()),
            PathBuf::from("/unused"),
        );
        assert_eq!(config.home, PathBuf::from("/env/home"));
        assert_eq!(config.database, PathBuf::from("/env/home/contentflow.db"));
        assert_eq!(config.worker_id, "worker-7");
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_retry_policy_from_worker_settings() {
        let settings = WorkerSettings::default();
        let policy = settings.retry_policy();
        assert_eq!(policy.base_delay_ms, 30_000);
        assert_eq!(policy.max_delay_ms, 3_600_000);
    }
}
