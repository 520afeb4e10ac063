use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;
use serde_json::Number;
use tracing::info;
use tracing_subscriber::EnvFilter;

use liveactivity_push::{
    ActivityAttributes, Alert, Config, ContentState, LiveActivityClient, MessageStoragePolicy,
    Schema,
};

/// Send Live Activity pushes and manage broadcast channels on APNs.
#[derive(Debug, Parser)]
#[command(name = "liveactivity-push", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a broadcast channel.
    CreateChannel {
        /// 0 / no-message-stored, 1 / most-recent-message-stored
        #[arg(long, default_value = "no-message-stored")]
        policy: MessageStoragePolicy,
    },
    /// Read a channel's push type and storage policy.
    GetChannel { channel_id: String },
    DeleteChannel { channel_id: String },
    ListChannels,
    /// Start an activity with a push-to-start token.
    Start {
        push_to_start_token: String,
        /// Subscribe the activity to this broadcast channel.
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        attributes: PathBuf,
        #[arg(long)]
        alert: PathBuf,
    },
    /// Update an activity (push token) or a channel (with --broadcast).
    Update {
        token: String,
        #[arg(long)]
        broadcast: bool,
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        alert: Option<PathBuf>,
        #[arg(long)]
        relevance: Option<Number>,
    },
    /// End an activity (push token) or a channel's activities (with --broadcast).
    End {
        token: String,
        #[arg(long)]
        broadcast: bool,
        #[arg(long)]
        state: PathBuf,
        /// Unix seconds; in the past dismisses immediately.
        #[arg(long)]
        dismissal_date: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let client = LiveActivityClient::from_config(&cfg)?;
    info!(
        bundle_id = %cfg.bundle_id,
        environment = %cfg.environment(),
        "APNs client ready"
    );

    match cli.command {
        Command::CreateChannel { policy } => print(&client.create_channel(policy).await?),
        Command::GetChannel { channel_id } => print(&client.get_channel(&channel_id).await?),
        Command::DeleteChannel { channel_id } => {
            print(&client.delete_channel(&channel_id).await?)
        }
        Command::ListChannels => print(&client.list_channels().await?),
        Command::Start {
            push_to_start_token,
            channel,
            state,
            attributes,
            alert,
        } => {
            let response = client
                .start_new_activity(
                    &push_to_start_token,
                    channel.as_deref(),
                    load::<ContentState>(&state)?,
                    load::<ActivityAttributes>(&attributes)?,
                    load::<Alert>(&alert)?,
                )
                .await?;
            print(&response)
        }
        Command::Update {
            token,
            broadcast,
            state,
            alert,
            relevance,
        } => {
            let alert = alert.as_deref().map(load::<Alert>).transpose()?;
            let response = client
                .update_activity(&token, broadcast, load(&state)?, alert, relevance)
                .await?;
            print(&response)
        }
        Command::End {
            token,
            broadcast,
            state,
            dismissal_date,
        } => {
            let response = client
                .end_activity(&token, broadcast, load(&state)?, dismissal_date)
                .await?;
            print(&response)
        }
    }
}

fn load<T: Schema>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    T::parse(value).with_context(|| format!("{} failed validation", path.display()))
}

fn print<T: Serialize>(response: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
