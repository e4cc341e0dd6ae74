use chrono::{DateTime, Utc};

use crate::sync::checkpoint::parse_checkpoint;
use crate::sync::ResourceFilter;

/// An operator request received as a Slack slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackCommand {
    GetConfig,
    SetExcludedChannels(String),
    SetExcludedUsers(String),
    SetDateSync {
        channel: Option<String>,
        value: DateTime<Utc>,
    },
    StartIntegration(ResourceFilter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackCommandOutcome {
    /// The request failed verification and must not be acted upon.
    Unauthorized,
    Reply(String),
    Execute(SlackCommand),
}

#[derive(Debug, Clone, Default)]
pub struct SlackCommandHandler {
    verification_token: Option<String>,
}

impl SlackCommandHandler {
    pub fn new(verification_token: Option<String>) -> Self {
        Self {
            verification_token: verification_token.filter(|token| !token.trim().is_empty()),
        }
    }

    /// Without a configured token every request is accepted.
    pub fn is_verified(&self, token: Option<&str>) -> bool {
        match self.verification_token.as_deref() {
            Some(expected) => token.map(str::trim) == Some(expected),
            None => true,
        }
    }

    pub fn handle(&self, token: Option<&str>, command: &str, text: &str) -> SlackCommandOutcome {
        if !self.is_verified(token) {
            return SlackCommandOutcome::Unauthorized;
        }

        let text = text.trim();
        match command.trim().trim_start_matches('/') {
            "get_config" => SlackCommandOutcome::Execute(SlackCommand::GetConfig),
            "set_excluded_channels" => {
                if text.is_empty() {
                    return usage("set_excluded_channels");
                }
                SlackCommandOutcome::Execute(SlackCommand::SetExcludedChannels(text.to_string()))
            }
            "set_excluded_users" => {
                if text.is_empty() {
                    return usage("set_excluded_users");
                }
                SlackCommandOutcome::Execute(SlackCommand::SetExcludedUsers(text.to_string()))
            }
            "set_date_sync" => match parse_date_sync(text) {
                Some((channel, value)) => {
                    SlackCommandOutcome::Execute(SlackCommand::SetDateSync { channel, value })
                }
                None => usage("set_date_sync"),
            },
            "start_integration" => {
                if text.is_empty() {
                    return SlackCommandOutcome::Reply(
                        "Transfer messages is canceled: no params".to_string(),
                    );
                }
                SlackCommandOutcome::Execute(SlackCommand::StartIntegration(
                    ResourceFilter::parse(text),
                ))
            }
            "help" | "" => SlackCommandOutcome::Reply(render_help()),
            other => SlackCommandOutcome::Reply(format!(
                "**ERROR:** unknown command `{other}`.\n{}",
                render_help()
            )),
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS` for every channel, or `<channel> YYYY-MM-DD HH:MM:SS`.
fn parse_date_sync(text: &str) -> Option<(Option<String>, DateTime<Utc>)> {
    if text.is_empty() {
        return None;
    }
    if let Some(value) = parse_checkpoint(text) {
        return Some((None, value));
    }
    let (channel, rest) = text.split_once(char::is_whitespace)?;
    let channel = channel.trim_start_matches('#');
    if channel.is_empty() {
        return None;
    }
    parse_checkpoint(rest).map(|value| (Some(channel.to_string()), value))
}

fn usage(command: &str) -> SlackCommandOutcome {
    let syntax = match command {
        "set_excluded_channels" => "`/set_excluded_channels +name -name ...`",
        "set_excluded_users" => "`/set_excluded_users +name -name ...`",
        _ => "`/set_date_sync [channel] YYYY-MM-DD HH:MM:SS`",
    };
    SlackCommandOutcome::Reply(format!("**ERROR:** Invalid syntax. Usage: {syntax}"))
}

fn render_help() -> String {
    "Available Commands:\n - `/get_config`: Show exclusions and checkpoints\n - `/set_excluded_channels +name -name`: Edit excluded channels\n - `/set_excluded_users +name -name`: Edit excluded users\n - `/set_date_sync [channel] YYYY-MM-DD HH:MM:SS`: Move the sync checkpoint\n - `/start_integration all|name,name`: Start a migration run".to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn wrong_token_is_rejected() {
        let handler = SlackCommandHandler::new(Some("secret".to_string()));
        assert_eq!(
            handler.handle(Some("guess"), "/get_config", ""),
            SlackCommandOutcome::Unauthorized
        );
        assert_eq!(
            handler.handle(None, "/get_config", ""),
            SlackCommandOutcome::Unauthorized
        );
        assert_eq!(
            handler.handle(Some("secret"), "/get_config", ""),
            SlackCommandOutcome::Execute(SlackCommand::GetConfig)
        );
    }

    #[test]
    fn empty_verification_token_accepts_everything() {
        let handler = SlackCommandHandler::new(Some("  ".to_string()));
        assert!(handler.is_verified(None));
    }

    #[test]
    fn start_integration_needs_a_filter() {
        let handler = SlackCommandHandler::default();
        assert_eq!(
            handler.handle(None, "/start_integration", "  "),
            SlackCommandOutcome::Reply("Transfer messages is canceled: no params".to_string())
        );
        assert_eq!(
            handler.handle(None, "/start_integration", "all"),
            SlackCommandOutcome::Execute(SlackCommand::StartIntegration(ResourceFilter::All))
        );
    }

    #[test]
    fn date_sync_accepts_an_optional_channel() {
        let handler = SlackCommandHandler::default();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

        assert_eq!(
            handler.handle(None, "/set_date_sync", "2024-03-01 12:30:00"),
            SlackCommandOutcome::Execute(SlackCommand::SetDateSync {
                channel: None,
                value: expected,
            })
        );
        assert_eq!(
            handler.handle(None, "/set_date_sync", "#general 2024-03-01 12:30:00"),
            SlackCommandOutcome::Execute(SlackCommand::SetDateSync {
                channel: Some("general".to_string()),
                value: expected,
            })
        );
        assert!(matches!(
            handler.handle(None, "/set_date_sync", "yesterday"),
            SlackCommandOutcome::Reply(_)
        ));
    }

    #[test]
    fn exclusion_commands_keep_their_tokens() {
        let handler = SlackCommandHandler::default();
        assert_eq!(
            handler.handle(None, "/set_excluded_users", "+bob -carol"),
            SlackCommandOutcome::Execute(SlackCommand::SetExcludedUsers("+bob -carol".to_string()))
        );
        assert!(matches!(
            handler.handle(None, "/set_excluded_channels", ""),
            SlackCommandOutcome::Reply(_)
        ));
    }
}
