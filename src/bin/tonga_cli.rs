//! Command line front-end for a tonga database
//!
//! Installs the engine schema and drives every channel and message operation.
//! Results are printed as JSON so they can be piped into other tools.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tonga::logging::init_structured_logging;
use tonga::{ChannelOpts, SchemaInstaller, SendOpts, TongaClient, TongaConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "tonga-cli")]
#[command(about = "Manage tonga channels and messages")]
#[command(version)]
struct Cli {
    /// Connection string (overrides configuration and DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Configuration file (default: config/tonga.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install or upgrade the engine schema
    Install,
    /// Create a channel, or rebind an existing one
    CreateChannel(CreateChannelArgs),
    /// Delete a channel and its messages
    DeleteChannel {
        /// Channel name
        name: String,
    },
    /// List registered channels
    Channels,
    /// Send a JSON message on a topic
    Send(SendArgs),
    /// Read and hide a batch of messages
    Read(ReadArgs),
    /// Delete (acknowledge) a message
    Delete {
        /// Channel name
        queue: String,
        /// Message id
        id: i64,
    },
    /// Show message counts for a channel
    Metrics {
        /// Channel name
        queue: String,
    },
    /// Reclaim channels past their delete-at
    Gc,
    /// Show connection status
    Status,
}

#[derive(Args)]
struct CreateChannelArgs {
    /// Channel name
    name: String,

    /// Topic the channel subscribes to
    topic: String,

    /// Reclaim the channel after this instant (RFC 3339)
    #[arg(long)]
    delete_at: Option<DateTime<Utc>>,

    /// Store messages in an unlogged table
    #[arg(long)]
    unlogged: bool,
}

#[derive(Args)]
struct SendArgs {
    /// Topic to publish on
    topic: String,

    /// Message body as JSON
    body: String,

    /// Earliest delivery instant (RFC 3339)
    #[arg(long, conflicts_with = "delay")]
    deliver_at: Option<DateTime<Utc>>,

    /// Delay delivery by this many seconds
    #[arg(long)]
    delay: Option<u64>,
}

#[derive(Args)]
struct ReadArgs {
    /// Channel name
    queue: String,

    /// Maximum number of messages (default from configuration)
    #[arg(short = 'n', long)]
    quantity: Option<u32>,

    /// Seconds to hide each message (default from configuration)
    #[arg(long)]
    hide_for: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();
    let cli = Cli::parse();

    let config =
        TongaConfig::load_with_database_url(cli.config.as_deref(), cli.database_url.as_deref())
            .context("failed to load configuration")?;

    let client = TongaClient::new_with_config(config)
        .await
        .context("failed to connect")?;

    run(&client, cli.command).await
}

async fn run(client: &TongaClient, command: Commands) -> Result<()> {
    match command {
        Commands::Install => {
            let applied = SchemaInstaller::install(client.pool()).await?;
            info!(count = applied.len(), "Schema install finished");
            print_json(&applied)
        }
        Commands::CreateChannel(args) => {
            let opts = ChannelOpts {
                delete_at: args.delete_at,
                unlogged: args.unlogged,
            };
            client.create_channel(&args.name, &args.topic, opts).await?;
            print_json(&serde_json::json!({ "created": args.name }))
        }
        Commands::DeleteChannel { name } => {
            let existed = client.delete_channel(&name).await?;
            print_json(&serde_json::json!({ "deleted": existed }))
        }
        Commands::Channels => print_json(&client.list_channels().await?),
        Commands::Send(args) => {
            let body = parse_body(&args.body)?;
            let opts = SendOpts {
                deliver_at: resolve_deliver_at(args.deliver_at, args.delay, Utc::now())?,
            };
            let deliveries = client.send(&args.topic, &body, opts).await?;
            print_json(&serde_json::json!({ "deliveries": deliveries }))
        }
        Commands::Read(args) => {
            let quantity = args
                .quantity
                .unwrap_or(client.config().default_read_quantity);
            let hide_for = args
                .hide_for
                .map_or(client.config().default_hide_for(), Duration::from_secs);
            print_json(&client.read(&args.queue, quantity, hide_for).await?)
        }
        Commands::Delete { queue, id } => {
            let existed = client.delete(&queue, id).await?;
            print_json(&serde_json::json!({ "deleted": existed }))
        }
        Commands::Metrics { queue } => print_json(&client.metrics(&queue).await?),
        Commands::Gc => {
            let reclaimed = client.gc().await?;
            print_json(&serde_json::json!({ "reclaimed": reclaimed }))
        }
        Commands::Status => print_json(&client.get_client_status().await?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_body(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("message body is not valid JSON: {raw}"))
}

fn resolve_deliver_at(
    deliver_at: Option<DateTime<Utc>>,
    delay: Option<u64>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match (deliver_at, delay) {
        (Some(at), _) => Ok(Some(at)),
        (None, Some(seconds)) => {
            let seconds = i64::try_from(seconds).context("delay is too large")?;
            let delay = chrono::Duration::try_seconds(seconds).context("delay is too large")?;
            let deliver_at = now.checked_add_signed(delay).context("delay is too large")?;
            Ok(Some(deliver_at))
        }
        (None, None) => Ok(None),
    }
}
