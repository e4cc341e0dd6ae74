use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub slack: SlackConfig,
    pub mattermost: MattermostConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Needed only for emoji and profile image downloads that the bot scope cannot read.
    #[serde(default)]
    pub user_token: Option<String>,
    #[serde(default = "default_slack_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MattermostConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub team_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub pins: bool,
    #[serde(default = "default_true")]
    pub bookmarks: bool,
    #[serde(default)]
    pub user_profiles: bool,
    #[serde(default)]
    pub profile_images: bool,
    #[serde(default)]
    pub emoji: bool,
    #[serde(default)]
    pub emoji_limit: Option<usize>,
    #[serde(default)]
    pub thread_backfill_days: u32,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_short_backoff_ms")]
    pub retry_short_backoff_ms: u64,
    #[serde(default = "default_retry_long_backoff_ms")]
    pub retry_long_backoff_ms: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_lock_sweep_interval_secs")]
    pub lock_sweep_interval_secs: u64,
    #[serde(default)]
    pub schedule_interval_secs: u64,
    #[serde(default = "default_checkpoint_chunk_size")]
    pub checkpoint_chunk_size: usize,
    #[serde(default = "default_password")]
    pub default_password: String,
    #[serde(default = "default_bookmark_header_pattern")]
    pub bookmark_header_pattern: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pins: true,
            bookmarks: true,
            user_profiles: false,
            profile_images: false,
            emoji: false,
            emoji_limit: None,
            thread_backfill_days: 0,
            history_page_size: default_history_page_size(),
            max_file_size: default_max_file_size(),
            retry_attempts: default_retry_attempts(),
            retry_short_backoff_ms: default_retry_short_backoff_ms(),
            retry_long_backoff_ms: default_retry_long_backoff_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            lock_sweep_interval_secs: default_lock_sweep_interval_secs(),
            schedule_interval_secs: 0,
            checkpoint_chunk_size: default_checkpoint_chunk_size(),
            default_password: default_password(),
            bookmark_header_pattern: default_bookmark_header_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub conn_string: Option<String>,
    #[serde(default = "default_database_filename")]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            conn_string: None,
            filename: default_database_filename(),
            max_connections: None,
            min_connections: None,
        }
    }
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DbType::Postgres
        } else {
            DbType::Sqlite
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref conn) = self.conn_string {
            conn.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file {} not found", path.display()),
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Yaml,
            ))
            .add_source(config::Environment::with_prefix("SLACK_MM").separator("__"))
            .build()?;
        let mut config: Config = settings.try_deserialize()?;
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slack.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "slack.bot_token cannot be empty".to_string(),
            ));
        }
        if looks_like_placeholder_token(&self.slack.bot_token) {
            return Err(ConfigError::InvalidConfig(
                "slack.bot_token is still using a placeholder value; set a real Slack bot token"
                    .to_string(),
            ));
        }

        if self.mattermost.bot_token.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mattermost.bot_token cannot be empty".to_string(),
            ));
        }
        if looks_like_placeholder_token(&self.mattermost.bot_token) {
            return Err(ConfigError::InvalidConfig(
                "mattermost.bot_token is still using a placeholder value".to_string(),
            ));
        }

        match url::Url::parse(&self.mattermost.url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
            _ => {
                return Err(ConfigError::InvalidConfig(format!(
                    "mattermost.url must be an http(s) URL, got '{}'",
                    self.mattermost.url
                )));
            }
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.sync.retry_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "sync.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.sync.history_page_size == 0 || self.sync.history_page_size > 999 {
            return Err(ConfigError::InvalidConfig(
                "sync.history_page_size must be between 1 and 999".to_string(),
            ));
        }

        if self.sync.checkpoint_chunk_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "sync.checkpoint_chunk_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.slack.bot_token = sanitize_token(&self.slack.bot_token);
        self.slack.user_token = self
            .slack
            .user_token
            .as_deref()
            .map(sanitize_token)
            .filter(|value| !value.is_empty());
        self.mattermost.bot_token = sanitize_token(&self.mattermost.bot_token);
        self.mattermost.url = self.mattermost.url.trim().trim_end_matches('/').to_string();
        self.slack.api_url = self.slack.api_url.trim().trim_end_matches('/').to_string();
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SLACK_BOT_TOKEN") {
            self.slack.bot_token = value;
        }
        if let Ok(value) = std::env::var("SLACK_USER_TOKEN") {
            self.slack.user_token = Some(value);
        }
        if let Ok(value) = std::env::var("SLACK_VERIFICATION_TOKEN") {
            self.slack.verification_token = Some(value);
        }
        if let Ok(value) = std::env::var("MATTERMOST_BOT_TOKEN") {
            self.mattermost.bot_token = value;
        }
        if let Ok(value) = std::env::var("MATTERMOST_URL") {
            self.mattermost.url = value;
        }
        if let Ok(value) = std::env::var("MATTERMOST_TEAM") {
            self.mattermost.team_name = Some(value);
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_slack_api_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_history_page_size() -> u32 {
    200
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_short_backoff_ms() -> u64 {
    2000
}

fn default_retry_long_backoff_ms() -> u64 {
    5000
}

fn default_lock_ttl_secs() -> u64 {
    1800
}

fn default_lock_sweep_interval_secs() -> u64 {
    60
}

fn default_checkpoint_chunk_size() -> usize {
    200
}

fn default_password() -> String {
    "password1+".to_string()
}

fn default_bookmark_header_pattern() -> String {
    "***:title***\n:link\n".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_filename() -> Option<String> {
    Some("slack-mattermost-sync.db".to_string())
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3005
}

fn sanitize_token(token: &str) -> String {
    let trimmed = token.trim();
    let without_prefix = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .unwrap_or(trimmed);
    without_prefix.trim().to_string()
}

fn looks_like_placeholder_token(token: &str) -> bool {
    let lower = token.trim().to_ascii_lowercase();
    lower == "your_slack_bot_token"
        || lower == "your_mattermost_bot_token"
        || lower == "your_bot_token_here"
        || lower == "your_bot_token"
        || lower == "your-token-here"
        || lower == "changeme"
}
