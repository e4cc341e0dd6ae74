use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted watermark for one channel key (a channel name or the `all` fallback).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub channel_key: String,
    pub synced_at: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionKind {
    Channel,
    User,
}

impl ExclusionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionKind::Channel => "channel",
            ExclusionKind::User => "user",
        }
    }
}

impl fmt::Display for ExclusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExclusionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "channel" => Ok(ExclusionKind::Channel),
            "user" => Ok(ExclusionKind::User),
            other => Err(format!("unknown exclusion kind: {other}")),
        }
    }
}
