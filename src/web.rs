use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::slack::SlackCommandHandler;
use crate::sync::SyncEngine;

mod commands;
mod health;
mod metrics;

use commands::slash_command;
use health::{get_status, health_check};
use metrics::metrics_endpoint;

#[derive(Clone)]
pub struct WebState {
    pub engine: Arc<SyncEngine>,
    pub commands: SlackCommandHandler,
    pub http: reqwest::Client,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

pub struct WebServer {
    config: Arc<Config>,
    engine: Arc<SyncEngine>,
}

impl WebServer {
    pub fn new(config: Arc<Config>, engine: Arc<SyncEngine>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("slack-mattermost-sync")
            .timeout(Duration::from_secs(30))
            .build()?;
        let _ = WEB_STATE.set(WebState {
            engine: engine.clone(),
            commands: SlackCommandHandler::new(config.slack.verification_token.clone()),
            http,
            started_at: Instant::now(),
        });

        Ok(Self { config, engine })
    }

    /// Serves until the listener fails. The lock sweeper and, when configured,
    /// the scheduled runs live as long as the server does.
    pub async fn start(&self) -> Result<()> {
        let sync = &self.config.sync;
        let sweeper = self
            .engine
            .locks()
            .clone()
            .spawn_sweeper(Duration::from_secs(sync.lock_sweep_interval_secs));
        let schedule = (sync.schedule_interval_secs > 0).then(|| {
            info!(every_secs = sync.schedule_interval_secs, "scheduled runs enabled");
            self.engine
                .clone()
                .spawn_schedule(Duration::from_secs(sync.schedule_interval_secs))
        });

        let bind_addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        info!("starting web server on {}", bind_addr);
        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(root_router()).await;

        sweeper.abort();
        if let Some(schedule) = schedule {
            schedule.abort();
        }
        Ok(())
    }
}

pub fn root_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(Router::with_path("metrics").get(metrics_endpoint))
        .push(Router::with_path("slack/commands").post(slash_command))
}

fn render_unavailable(res: &mut Response) {
    res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    res.render(Text::Plain("service is starting"));
}
