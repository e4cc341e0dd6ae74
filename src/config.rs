pub use self::parser::{
    Config, DatabaseConfig, DbType, LoggingConfig, MattermostConfig, SlackConfig, SyncConfig,
    WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
