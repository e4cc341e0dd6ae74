#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod db;
mod mattermost;
mod media;
mod slack;
mod sync;
mod utils;
mod web;

use cli::{Cli, Commands};
use config::Config;
use db::{DatabaseManager, ExclusionKind};
use mattermost::MattermostClient;
use slack::SlackClient;
use sync::checkpoint::parse_checkpoint;
use sync::{
    ALL_CHANNELS, ChannelLockService, CheckpointService, ExclusionService, ProfileSyncOptions,
    ResourceFilter, RunRequest, SyncEngine,
};
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(
        Config::load_from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?,
    );
    let command = cli.command.unwrap_or(Commands::Serve);
    if let Commands::ValidateConfig = command {
        println!("configuration {} is valid", cli.config.display());
        return Ok(());
    }

    utils::logging::init_tracing(&config.logging)?;
    let engine = build_engine(&config).await?;

    match command {
        Commands::Sync { channels, session } => {
            let filter = ResourceFilter::parse(&channels);
            let request = match session {
                Some(session) => RunRequest::with_session(filter, session),
                None => RunRequest::new(filter),
            };
            let summary = engine.run(request).await?;
            println!("{summary}");
        }
        Commands::Serve => serve(config, engine).await?,
        Commands::SetDate { channel, value } => {
            let value = parse_checkpoint(&value)
                .ok_or_else(|| anyhow!("expected `YYYY-MM-DD HH:MM:SS`, got `{value}`"))?;
            let key = channel.as_deref().unwrap_or(ALL_CHANNELS);
            engine.checkpoints().set(key, value).await?;
            println!("checkpoint {key} set to {value}");
        }
        Commands::ExcludeChannels { tokens } => {
            let change = engine
                .exclusions()
                .apply_tokens(ExclusionKind::Channel, &tokens.join(" "))
                .await?;
            println!("added {:?}, removed {:?}", change.added, change.removed);
        }
        Commands::ExcludeUsers { tokens } => {
            let change = engine
                .exclusions()
                .apply_tokens(ExclusionKind::User, &tokens.join(" "))
                .await?;
            println!("added {:?}, removed {:?}", change.added, change.removed);
        }
        Commands::ShowState => {
            for (channel, value) in engine.checkpoints().snapshot().await? {
                println!("checkpoint {channel}: {value}");
            }
            for kind in [ExclusionKind::Channel, ExclusionKind::User] {
                println!(
                    "excluded {kind}s: {}",
                    engine.exclusions().list(kind).await?.join(", ")
                );
            }
        }
        Commands::SyncUsers { emails, images } => {
            let options = ProfileSyncOptions {
                emails: emails
                    .iter()
                    .map(|email| email.trim().to_lowercase())
                    .collect(),
                images,
            };
            let summary = engine.sync_profiles(options).await?;
            println!("profiles updated - {}\nerrors - {}", summary.updated, summary.errors);
        }
        Commands::SyncEmoji { limit } => {
            let summary = engine.sync_emoji(limit).await?;
            println!("{summary}");
        }
        Commands::ValidateConfig => {}
    }
    Ok(())
}

async fn build_engine(config: &Config) -> Result<Arc<SyncEngine>> {
    let db_manager = DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;

    let source = Arc::new(SlackClient::new(&config.slack)?);
    let dest = Arc::new(MattermostClient::new(&config.mattermost)?);
    let locks = Arc::new(ChannelLockService::new(Duration::from_secs(
        config.sync.lock_ttl_secs,
    )));

    Ok(Arc::new(SyncEngine::new(
        source,
        dest,
        Arc::new(CheckpointService::new(db_manager.checkpoint_store())),
        Arc::new(ExclusionService::new(db_manager.exclusion_store())),
        locks,
        config.sync.clone(),
    )))
}

async fn serve(config: Arc<Config>, engine: Arc<SyncEngine>) -> Result<()> {
    info!("slack-mattermost sync starting up");
    let web_server = WebServer::new(config, engine)?;
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });
    tokio::pin!(web_handle);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
        },
        _ = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
        },
    }

    web_handle.abort();
    info!("slack-mattermost sync shutting down");
    Ok(())
}
