//! Configuration resolution for whitesync.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. TOML config file (`--config`, or `<config dir>/whitesync/config.toml`)
//! 3. Environment variables (`WHITESYNC_*`, secrets and log level only)
//! 4. CLI arguments (applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete whitesync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
    #[serde(default)]
    pub mcsm: McsmConfig,
    /// Chat group access. Without it no membership check or group
    /// notification is possible.
    #[serde(default)]
    pub onebot: Option<OneBotConfig>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Log level wrapper so the default is explicit in serialized configs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

/// Shared HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Feishu Bitable access: credentials, table location and search policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeishuConfig {
    pub base_url: String,
    pub app_id: String,
    pub app_secret: String,
    /// Bitable app token (the `base` id in the table URL).
    pub base_id: String,
    pub table_id: String,
    /// Where the tenant access token is persisted between runs.
    pub token_cache_path: Option<PathBuf>,
    pub page_size: u32,
    /// Upper bound on fetched pages per search.
    pub max_pages: usize,
    pub fields: FieldMapping,
    /// Search filter for the add flow, passed to the store verbatim.
    pub conditions: Vec<FilterCondition>,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.feishu.cn".to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            base_id: String::new(),
            table_id: String::new(),
            token_cache_path: None,
            page_size: 50,
            max_pages: 100,
            fields: FieldMapping::default(),
            conditions: vec![
                FilterCondition {
                    field_name: "总分".to_string(),
                    operator: "isGreater".to_string(),
                    value: vec![serde_json::Value::from(75)],
                },
                FilterCondition {
                    field_name: "提交时间".to_string(),
                    operator: "is".to_string(),
                    value: vec![serde_json::Value::from("TheLastMonth")],
                },
            ],
        }
    }
}

/// Column names of the submission table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub qq_number: String,
    pub game_id: String,
    pub score: String,
    pub submitted_at: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            qq_number: "QQ号码".to_string(),
            game_id: "游戏ID".to_string(),
            score: "总分".to_string(),
            submitted_at: "提交时间".to_string(),
        }
    }
}

impl FieldMapping {
    /// Field names requested from the store, in a stable order.
    pub fn names(&self) -> Vec<String> {
        vec![
            self.qq_number.clone(),
            self.score.clone(),
            self.game_id.clone(),
            self.submitted_at.clone(),
        ]
    }
}

/// One search filter condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterCondition {
    pub field_name: String,
    pub operator: String,
    #[serde(default)]
    pub value: Vec<serde_json::Value>,
}

/// MCSManager panel instance hosting the game server console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McsmConfig {
    pub api_url: String,
    pub api_key: String,
    pub uuid: String,
    pub daemon_id: String,
    /// Size of the output log tail to fetch (MCSManager syntax, e.g. `1kb`).
    pub log_size: String,
    /// Wait between dispatching a command and reading the log.
    pub settle_delay_ms: u64,
    /// Window start relative to the command's acceptance time.
    pub window_before_ms: i64,
    /// Window end relative to the command's acceptance time.
    pub window_after_ms: i64,
    /// UTC offset of the console's log timestamps. Defaults to the local
    /// offset of this host.
    pub utc_offset_secs: Option<i32>,
}

impl Default for McsmConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            uuid: String::new(),
            daemon_id: String::new(),
            log_size: "1kb".to_string(),
            settle_delay_ms: 1500,
            window_before_ms: 1000,
            window_after_ms: 5000,
            utc_offset_secs: None,
        }
    }
}

/// OneBot v11 HTTP endpoint of the chat bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneBotConfig {
    pub api_url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    pub group_id: i64,
}

/// Reconciliation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Only whitelist submitters who are currently in the chat group.
    pub membership_check: bool,
    /// Console command for adding a player; `{game_id}` is substituted.
    pub add_command: String,
    /// Console command for removing a player; `{game_id}` is substituted.
    pub remove_command: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            membership_check: true,
            add_command: "whitelist add {game_id}".to_string(),
            remove_command: "whitelist remove {game_id}".to_string(),
        }
    }
}

impl Config {
    /// Ensure the record store settings needed for any search are present.
    pub fn validate_feishu(&self) -> Result<()> {
        require("feishu.app_id", &self.feishu.app_id)?;
        require("feishu.app_secret", &self.feishu.app_secret)?;
        require("feishu.base_id", &self.feishu.base_id)?;
        require("feishu.table_id", &self.feishu.table_id)?;
        if self.feishu.max_pages == 0 {
            return Err(Error::Config("feishu.max_pages must be at least 1".into()));
        }
        Ok(())
    }

    /// Ensure the console settings needed to dispatch commands are present.
    pub fn validate_mcsm(&self) -> Result<()> {
        require("mcsm.api_url", &self.mcsm.api_url)?;
        require("mcsm.api_key", &self.mcsm.api_key)?;
        require("mcsm.uuid", &self.mcsm.uuid)?;
        require("mcsm.daemon_id", &self.mcsm.daemon_id)?;
        if self.mcsm.window_before_ms < 0 || self.mcsm.window_after_ms < 0 {
            return Err(Error::Config("mcsm window offsets must not be negative".into()));
        }
        Ok(())
    }

    /// Ensure the reconciliation policy is satisfiable.
    pub fn validate_reconcile(&self) -> Result<()> {
        if self.reconcile.membership_check && self.onebot.is_none() {
            return Err(Error::Config(
                "reconcile.membership_check requires an [onebot] section".into(),
            ));
        }
        for (name, template) in [
            ("reconcile.add_command", &self.reconcile.add_command),
            ("reconcile.remove_command", &self.reconcile.remove_command),
        ] {
            if !template.contains("{game_id}") {
                return Err(Error::Config(format!("{name} must contain {{game_id}}")));
            }
        }
        Ok(())
    }

    /// Token cache location, falling back to the per-user data directory.
    pub fn token_cache_path(&self) -> Option<PathBuf> {
        self.feishu
            .token_cache_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("whitesync").join("token.json")))
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} is required")));
    }
    Ok(())
}

/// Default config file location: `<config dir>/whitesync/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("whitesync").join("config.toml"))
}

/// Load configuration with hierarchical resolution.
///
/// An explicitly given path must exist; a missing default file yields the
/// built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => match default_config_path() {
            Some(default) if default.exists() => load_config_file(&default)?,
            _ => Config::default(),
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Parse a TOML config file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Parse a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Overlay secrets and the log level from the environment.
///
/// `lookup` abstracts `std::env::var` so overrides can be tested without
/// touching the process environment.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("WHITESYNC_LOG_LEVEL") {
        config.log_level = LogLevel(val);
    }
    if let Some(val) = lookup("WHITESYNC_FEISHU_APP_ID") {
        config.feishu.app_id = val;
    }
    if let Some(val) = lookup("WHITESYNC_FEISHU_APP_SECRET") {
        config.feishu.app_secret = val;
    }
    if let Some(val) = lookup("WHITESYNC_MCSM_API_KEY") {
        config.mcsm.api_key = val;
    }
    if let Some(val) = lookup("WHITESYNC_ONEBOT_ACCESS_TOKEN") {
        if let Some(onebot) = config.onebot.as_mut() {
            onebot.access_token = Some(val);
        }
    }
}
