use std::sync::Arc;

use salvo::prelude::*;
use serde_json::json;
use tracing::{info, warn};

use crate::db::ExclusionKind;
use crate::slack::{SlackCommand, SlackCommandOutcome};
use crate::sync::{ALL_CHANNELS, ResourceFilter, RunRequest, SyncEngine};
use crate::web::{render_unavailable, web_state};

fn reply(res: &mut Response, text: impl Into<String>) {
    res.render(Json(json!({
        "response_type": "ephemeral",
        "text": text.into(),
    })));
}

/// Slack slash command endpoint (`application/x-www-form-urlencoded`).
#[handler]
pub async fn slash_command(req: &mut Request, res: &mut Response) {
    let Some(state) = web_state() else {
        render_unavailable(res);
        return;
    };

    let token = req.form::<String>("token").await;
    let command = req.form::<String>("command").await.unwrap_or_default();
    let text = req.form::<String>("text").await.unwrap_or_default();
    let response_url = req
        .form::<String>("response_url")
        .await
        .filter(|url| !url.is_empty());
    let user = req.form::<String>("user_name").await.unwrap_or_default();

    match state.commands.handle(token.as_deref(), &command, &text) {
        SlackCommandOutcome::Unauthorized => {
            warn!(command = %command, user = %user, "slash command failed verification");
            res.status_code(StatusCode::UNAUTHORIZED);
            reply(res, "request verification failed");
        }
        SlackCommandOutcome::Reply(text) => reply(res, text),
        SlackCommandOutcome::Execute(SlackCommand::StartIntegration(filter)) => {
            info!(command = %command, user = %user, filter = %filter, "integration requested");
            start_integration(state.engine.clone(), state.http.clone(), filter, response_url);
            reply(res, "Transfer messages started");
        }
        SlackCommandOutcome::Execute(command) => {
            info!(user = %user, "slash command {command:?}");
            reply(res, execute(&state.engine, command).await);
        }
    }
}

/// Runs every command except `start_integration`, which outlives the request.
pub async fn execute(engine: &SyncEngine, command: SlackCommand) -> String {
    match command {
        SlackCommand::GetConfig => match render_config(engine).await {
            Ok(text) => text,
            Err(err) => format!("**ERROR:** {err}"),
        },
        SlackCommand::SetExcludedChannels(tokens) => {
            apply_exclusions(engine, ExclusionKind::Channel, &tokens, "Channels").await
        }
        SlackCommand::SetExcludedUsers(tokens) => {
            apply_exclusions(engine, ExclusionKind::User, &tokens, "Users").await
        }
        SlackCommand::SetDateSync { channel, value } => {
            let key = channel.as_deref().unwrap_or(ALL_CHANNELS);
            match engine.checkpoints().set(key, value).await {
                Ok(()) => "Date setting finished".to_string(),
                Err(err) => format!("**ERROR:** {err}"),
            }
        }
        SlackCommand::StartIntegration(filter) => {
            match engine.run(RunRequest::new(filter)).await {
                Ok(summary) => summary.to_string(),
                Err(err) => format!("Transfer messages failed: {err}"),
            }
        }
    }
}

async fn apply_exclusions(
    engine: &SyncEngine,
    kind: ExclusionKind,
    tokens: &str,
    label: &str,
) -> String {
    match engine.exclusions().apply_tokens(kind, tokens).await {
        Ok(change) => format!(
            "{label} setting finished (added: {}, removed: {})",
            change.added.len(),
            change.removed.len()
        ),
        Err(err) => format!("**ERROR:** {err}"),
    }
}

async fn render_config(engine: &SyncEngine) -> Result<String, crate::db::DatabaseError> {
    let channels = engine.exclusions().list(ExclusionKind::Channel).await?;
    let users = engine.exclusions().list(ExclusionKind::User).await?;
    let checkpoints = engine.checkpoints().snapshot().await?;
    let config = json!({
        "excluded_channels": channels,
        "excluded_users": users,
        "checkpoints": checkpoints,
    });
    Ok(serde_json::to_string_pretty(&config).unwrap_or_else(|_| config.to_string()))
}

fn start_integration(
    engine: Arc<SyncEngine>,
    http: reqwest::Client,
    filter: ResourceFilter,
    response_url: Option<String>,
) {
    tokio::spawn(async move {
        let text = match engine.run(RunRequest::new(filter)).await {
            Ok(summary) => format!("Transfer messages finished\n{summary}"),
            Err(err) => format!("Transfer messages failed: {err}"),
        };
        let Some(url) = response_url else {
            info!("integration finished without a response url\n{text}");
            return;
        };
        let body = json!({"response_type": "in_channel", "text": text});
        match http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(status = %response.status(), "summary delivery rejected"),
            Err(err) => warn!("summary delivery failed: {err}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::SyncConfig;
    use crate::sync::testing::{
        FakeDestination, FakeSource, MemoryCheckpointStore, MemoryExclusionStore,
    };
    use crate::sync::{ChannelLockService, CheckpointService, ExclusionService};

    fn engine() -> SyncEngine {
        SyncEngine::new(
            Arc::new(FakeSource::default()),
            Arc::new(FakeDestination::default()),
            Arc::new(CheckpointService::new(Arc::new(MemoryCheckpointStore::default()))),
            Arc::new(ExclusionService::new(Arc::new(MemoryExclusionStore::default()))),
            Arc::new(ChannelLockService::new(Duration::from_secs(60))),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn exclusion_commands_report_their_changes() {
        let engine = engine();
        let text = execute(
            &engine,
            SlackCommand::SetExcludedChannels("+random +ops -missing".to_string()),
        )
        .await;
        assert_eq!(text, "Channels setting finished (added: 2, removed: 0)");

        let config = execute(&engine, SlackCommand::GetConfig).await;
        assert!(config.contains("\"random\""));
        assert!(config.contains("\"ops\""));
    }

    #[tokio::test]
    async fn date_sync_without_channel_sets_the_fallback() {
        let engine = engine();
        let value = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let text = execute(&engine, SlackCommand::SetDateSync { channel: None, value }).await;

        assert_eq!(text, "Date setting finished");
        let snapshot = engine.checkpoints().snapshot().await.unwrap();
        assert!(snapshot[ALL_CHANNELS].starts_with("2024-01-02T03:04:05"));
    }
}
