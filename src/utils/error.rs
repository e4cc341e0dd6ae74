use thiserror::Error;

use crate::db::DatabaseError;

/// Failures that abort a whole run before any channel is touched.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Slack error: {0}")]
    Slack(String),

    #[error("Mattermost error: {0}")]
    Mattermost(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
