//! agent-link - command-line front end for the agent client.
//!
//! Connects to the agent socket, runs one call and prints the JSON result.
//! Logs go to stderr and are controlled by `RUST_LOG`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_link::models::{QueryOptions, DEFAULT_PAGE_SIZE};
use agent_link::{AgentClient, ClientConfig, ClientError};

/// Grace period for the first peer count in `status`.
const STATUS_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "agent-link")]
#[command(about = "Call the remote agent over its local socket")]
struct Cli {
    /// Agent socket path
    #[arg(long, env = "AGENT_LINK_SOCKET", value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Per-call timeout in seconds (0 waits forever)
    #[arg(long, env = "AGENT_LINK_CALL_TIMEOUT_SECS", value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Show agent availability
    Status,

    /// Wait until an agent peer is reachable
    Wait,

    /// List JDBC drivers on the agent host
    Drivers,

    /// Show cluster topology
    Topology {
        /// Include node attributes
        #[arg(long)]
        attributes: bool,
        /// Include node metrics
        #[arg(long)]
        metrics: bool,
    },

    /// Run a SQL query and print the first page
    Query {
        node: String,
        cache: String,
        sql: String,
        /// Rows per page
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,
    },

    /// Fetch the next page of a query
    Fetch {
        node: String,
        query_id: String,
        #[arg(default_value_t = DEFAULT_PAGE_SIZE)]
        size: u32,
    },

    /// Close a query cursor
    Close { node: String, query_id: String },

    /// Show cache metadata (default cache when omitted)
    CacheMeta { cache: Option<String> },
}

async fn status(client: &AgentClient) -> Result<Value> {
    if let Err(e) = client.activate().await {
        tracing::info!("Agent not reachable: {}", e);
    } else {
        let _ = tokio::time::timeout(STATUS_GRACE, client.wait_available()).await;
    }

    let mut value = serde_json::to_value(client.tracker().snapshot())?;
    value["prompt"] = Value::Bool(client.tracker().presentation_hint(true));
    Ok(value)
}

async fn run(client: &AgentClient, command: Command) -> Result<Value> {
    if command != Command::Status {
        client.activate().await.with_context(|| {
            format!(
                "Failed to reach agent at {}",
                client.config().socket_path.display()
            )
        })?;
    }

    let result = match command {
        Command::Status => return status(client).await,
        Command::Wait => client.wait_available().await.map(|()| Value::Bool(true)),
        Command::Drivers => client.drivers().await,
        Command::Topology {
            attributes,
            metrics,
        } => client.topology(attributes, metrics).await,
        Command::Query {
            node,
            cache,
            sql,
            page_size,
        } => {
            let options = QueryOptions {
                page_size,
                ..QueryOptions::default()
            };
            client.query(&node, &cache, &sql, &options).await
        }
        Command::Fetch {
            node,
            query_id,
            size,
        } => client.fetch_page(&node, &query_id, size).await,
        Command::Close { node, query_id } => client.close_query(&node, &query_id).await,
        Command::CacheMeta { cache } => {
            client
                .cache_metadata(cache.as_deref().unwrap_or_default())
                .await
        }
    };

    result.map_err(explain)
}

/// Point disconnects at `status`; other errors pass through.
fn explain(err: ClientError) -> anyhow::Error {
    if err.is_disconnect() {
        anyhow::Error::new(err).context("Agent connection lost, check `agent-link status`")
    } else {
        err.into()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "agent_link=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(socket) = cli.socket {
        config = config.with_socket_path(socket);
    }
    if let Some(secs) = cli.timeout {
        config = config.with_call_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    tracing::debug!("Using agent socket {}", config.socket_path.display());

    let client = AgentClient::new(config);
    let value = run(&client, cli.command).await?;
    client.detach();

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
