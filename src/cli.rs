use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "slack-mattermost-sync")]
#[command(about = "Incremental Slack to Mattermost migration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run one migration pass and print the summary")]
    Sync {
        #[arg(long, default_value = "all", help = "Channel names separated by commas, or `all`")]
        channels: String,

        #[arg(long, help = "Session id used for channel locks")]
        session: Option<String>,
    },

    #[command(about = "Serve slash commands, health and metrics; optionally run on a schedule")]
    Serve,

    #[command(about = "Move the sync checkpoint of one channel or of every channel")]
    SetDate {
        #[arg(long, help = "Channel name; omit to set the `all` fallback")]
        channel: Option<String>,

        #[arg(help = "UTC timestamp, `YYYY-MM-DD HH:MM:SS`")]
        value: String,
    },

    #[command(about = "Edit excluded channels with `+name` / `-name` tokens")]
    ExcludeChannels {
        #[arg(required = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },

    #[command(about = "Edit excluded users with `+name` / `-name` tokens")]
    ExcludeUsers {
        #[arg(required = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
    },

    #[command(about = "Print checkpoints and exclusions")]
    ShowState,

    #[command(about = "Copy Slack profile fields onto existing Mattermost users")]
    SyncUsers {
        #[arg(long = "email", help = "Limit to these emails; repeatable")]
        emails: Vec<String>,

        #[arg(long, help = "Also copy profile images")]
        images: bool,
    },

    #[command(about = "Copy Slack custom emoji to Mattermost")]
    SyncEmoji {
        #[arg(long)]
        limit: Option<usize>,
    },

    #[command(about = "Validate the configuration file")]
    ValidateConfig,
}
