//! Application configuration for PageWatch.
//!
//! User config lives at `~/.pagewatch/pagewatch.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PageWatchError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pagewatch.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pagewatch";

// ---------------------------------------------------------------------------
// Config structs (matching pagewatch.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub storage: StorageSection,

    /// Generation service used for summaries.
    #[serde(default)]
    pub generation: GenerationSection,

    /// Page fetching.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Trigger evaluation.
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.pagewatch/pagewatch.db".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Set to `false` to store observations without summaries.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Non-streaming generate endpoint (Ollama `/api/generate` compatible).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound for a single generation request.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_endpoint() -> String {
    "http://localhost:11434/api/generate".into()
}
fn default_model() -> String {
    "glm4:latest".into()
}
fn default_generation_timeout() -> u64 {
    120
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// User-Agent header sent with page requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound for loading a page.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Maximum redirects followed per page load.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout(),
            max_redirects: default_max_redirects(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Time zone schedules are evaluated in: `local` or `utc`.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// How often `serve` re-reads targets and reconciles triggers.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            sync_interval_secs: default_sync_interval(),
        }
    }
}

fn default_timezone() -> String {
    "local".into()
}
fn default_sync_interval() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.fetch.user_agent.clone(),
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            max_redirects: config.fetch.max_redirects,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime generation-service configuration.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl From<&AppConfig> for GenerationConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            enabled: config.generation.enabled,
            endpoint: config.generation.endpoint.clone(),
            model: config.generation.model.clone(),
            timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }
}

/// Time zone in which weekly schedules are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTimezone {
    Local,
    Utc,
}

/// Runtime scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub timezone: ScheduleTimezone,
    pub sync_interval: Duration,
}

impl TryFrom<&AppConfig> for SchedulerConfig {
    type Error = PageWatchError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let timezone = match config.scheduler.timezone.to_ascii_lowercase().as_str() {
            "local" => ScheduleTimezone::Local,
            "utc" => ScheduleTimezone::Utc,
            other => {
                return Err(PageWatchError::config(format!(
                    "unknown scheduler timezone '{other}': expected 'local' or 'utc'"
                )));
            }
        };
        if config.scheduler.sync_interval_secs == 0 {
            return Err(PageWatchError::config("sync_interval_secs must be positive"));
        }
        Ok(Self {
            timezone,
            sync_interval: Duration::from_secs(config.scheduler.sync_interval_secs),
        })
    }
}

impl AppConfig {
    /// Resolve the database path, expanding a leading `~`.
    pub fn db_path(&self) -> Result<PathBuf> {
        expand_home(&self.storage.db_path)
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| PageWatchError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pagewatch/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PageWatchError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pagewatch/pagewatch.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PageWatchError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PageWatchError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PageWatchError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PageWatchError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PageWatchError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("/api/generate"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.generation.model, "glm4:latest");
        assert_eq!(parsed.fetch.timeout_secs, 30);
        assert_eq!(parsed.scheduler.timezone, "local");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[generation]
endpoint = "http://gpu-box:11434/api/generate"
timeout_secs = 45

[scheduler]
timezone = "UTC"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.generation.model, "glm4:latest");
        assert!(config.generation.enabled);

        let generation = GenerationConfig::from(&config);
        assert_eq!(generation.timeout, Duration::from_secs(45));

        let scheduler = SchedulerConfig::try_from(&config).expect("scheduler config");
        assert_eq!(scheduler.timezone, ScheduleTimezone::Utc);
        assert_eq!(scheduler.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut config = AppConfig::default();
        config.scheduler.timezone = "Asia/Shanghai".into();
        let err = SchedulerConfig::try_from(&config).unwrap_err();
        assert!(err.to_string().contains("Asia/Shanghai"));
    }

    #[test]
    fn db_path_expands_home() {
        let mut config = AppConfig::default();
        config.storage.db_path = "/var/lib/pagewatch/pw.db".into();
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/var/lib/pagewatch/pw.db"));

        config.storage.db_path = "~/pw.db".into();
        let resolved = config.db_path().unwrap();
        assert!(resolved.ends_with("pw.db"));
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }
}
