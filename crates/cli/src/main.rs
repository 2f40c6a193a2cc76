//! Quill CLI - Command-line interface for Quill Queue

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use quill_core::domain::{BookRequest, Lane, ServerEvent};
use quill_sdk::{ConnectOptions, QueueClient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8081";
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Quill Queue CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Admin RPC server URL
    #[arg(long, env = "QUILL_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum LaneArg {
    Shared,
    Priority,
}

impl From<LaneArg> for Lane {
    fn from(lane: LaneArg) -> Self {
        match lane {
            LaneArg::Shared => Lane::Shared,
            LaneArg::Priority => Lane::Priority,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue status
    Status,

    /// List connected members
    Users,

    /// Show a member's position
    Position {
        /// Member ID
        member_id: String,
    },

    /// Remove a member's queue entry
    Evict {
        /// Member ID
        member_id: String,
    },

    /// Queue a book and follow it until it is delivered
    Join {
        /// WebSocket gateway URL
        #[arg(long, env = "QUILL_WS_URL", default_value = DEFAULT_WS_URL)]
        ws_url: String,

        /// Member ID claimed in the handshake
        #[arg(short, long)]
        member: Option<String>,

        /// Plan name (free, pro, ...)
        #[arg(long)]
        plan: Option<String>,

        /// Bearer token for the auth service
        #[arg(long, env = "QUILL_TOKEN")]
        token: Option<String>,

        /// Lane to join (default: the plan's lane)
        #[arg(short, long, value_enum)]
        lane: Option<LaneArg>,

        #[arg(long)]
        title: String,

        #[arg(long)]
        topic: String,

        #[arg(long, default_value = "general readers")]
        audience: String,

        #[arg(long, default_value = "Anonymous")]
        author: String,

        /// Project name
        #[arg(long, default_value = "quill")]
        name: String,

        #[arg(long, default_value = "5")]
        chapters: u32,

        #[arg(long, default_value = "3")]
        sections: u32,

        /// Write the generated book (JSON) here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct EvictResult {
    member_id: String,
    lane: String,
    request_id: String,
}

#[derive(Tabled)]
struct PositionRow {
    member_id: String,
    lane: String,
    position: String,
    size: String,
    state: String,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn field(value: &serde_json::Value, key: &str) -> String {
    match &value[key] {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            println!("{}", "Queue Status".cyan().bold());
            println!();

            match call_rpc(&cli.rpc_url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!();
                    println!("  {} {}", "Priority lane:".bold(), stats["prioritySize"]);
                    println!("  {} {}", "Shared lane:".bold(), stats["sharedSize"]);
                    println!(
                        "  {} {}/{}",
                        "Generating:".bold(),
                        stats["inFlight"],
                        stats["dispatchSlots"]
                    );
                    println!(
                        "  {} {} ({} connections, {} detached)",
                        "Members online:".bold(),
                        stats["connectedMembers"],
                        stats["connections"],
                        stats["detachedMembers"]
                    );
                    println!();
                    println!("  {} {}", "Dispatched:".bold(), stats["dispatchedTotal"]);
                    println!("  {} {}", "Completed:".bold(), stats["completedTotal"]);
                    println!("  {} {}", "Failed:".bold(), stats["failedTotal"]);
                    println!("  {} {}", "Discarded:".bold(), stats["discardedTotal"]);
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptimeSeconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Users => {
            let result = call_rpc(&cli.rpc_url, "admin.users.v1", json!({})).await?;
            let users: Vec<String> = serde_json::from_value(result["userIds"].clone())?;

            if users.is_empty() {
                println!("{}", "No members connected".yellow());
            } else {
                println!("{}", format!("{} member(s) connected", users.len()).cyan().bold());
                for user in users {
                    println!("  {} {}", "•".bold(), user);
                }
            }
        }

        Commands::Position { member_id } => {
            let params = json!({ "memberId": member_id });
            let result = call_rpc(&cli.rpc_url, "queue.position.v1", params).await?;

            if !result["inQueue"].as_bool().unwrap_or(false) {
                println!("{}", format!("{} is not in the queue", member_id).yellow());
                return Ok(());
            }

            let state = if result["dispatched"].as_bool().unwrap_or(false) {
                "generating"
            } else {
                "waiting"
            };
            let row = PositionRow {
                member_id,
                lane: field(&result, "lane"),
                position: field(&result, "position"),
                size: field(&result, "size"),
                state: state.to_string(),
            };
            println!("{}", Table::new(vec![row]));
        }

        Commands::Evict { member_id } => {
            let params = json!({ "memberId": member_id });
            let result = call_rpc(&cli.rpc_url, "queue.evict.v1", params).await?;
            let evicted: EvictResult = serde_json::from_value(result)?;

            println!("{}", format!("✓ {} evicted", member_id).green().bold());
            println!();
            println!("{}", Table::new(vec![evicted]));
        }

        Commands::Join {
            ws_url,
            member,
            plan,
            token,
            lane,
            title,
            topic,
            audience,
            author,
            name,
            chapters,
            sections,
            out,
        } => {
            let request = BookRequest {
                name,
                author,
                title,
                topic,
                target_audience: audience,
                num_chapters: chapters,
                num_sections: sections,
                cover: None,
            };
            request.validate().context("Invalid book request")?;

            let mut options = ConnectOptions::new(ws_url);
            options.member_id = member;
            options.plan = plan;
            options.token = token;

            let artifact = follow(options, lane.map(Lane::from), request).await?;
            let pretty = serde_json::to_string_pretty(&artifact)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, pretty)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("{}", format!("✓ Book written to {}", path.display()).green().bold());
                }
                None => println!("{}", pretty),
            }
        }
    }

    Ok(())
}

/// Join and print progress until the generated book arrives
async fn follow(options: ConnectOptions, lane: Option<Lane>, request: BookRequest) -> Result<serde_json::Value> {
    let mut client = QueueClient::new(options);
    client.connect().await.context("Failed to connect to gateway")?;
    client.join(lane, request).await?;

    loop {
        let event = client.next_event().await.context("Connection lost")?;
        match event {
            ServerEvent::QueueStatus { .. } | ServerEvent::PositionUpdate { .. } => {
                let view = client.view();
                if view.in_queue && !view.dispatched {
                    eprintln!(
                        "  {} position {} of {}",
                        "•".bold(),
                        view.position_in_queue,
                        view.size
                    );
                }
            }
            ServerEvent::DispatchStarted { request_id, .. } => {
                eprintln!("{}", format!("Generating ({})...", request_id).cyan());
            }
            ServerEvent::DispatchCompleted { artifact, .. } => {
                eprintln!("{}", "✓ Book generated".green().bold());
                client.disconnect().await.ok();
                return Ok(artifact.into_value());
            }
            ServerEvent::DispatchFailed { reason, .. } => {
                client.disconnect().await.ok();
                anyhow::bail!("Generation failed: {}", reason);
            }
            ServerEvent::Error { code, message } => {
                client.disconnect().await.ok();
                anyhow::bail!("Rejected ({:?}): {}", code, message);
            }
            ServerEvent::Users { .. } | ServerEvent::QueueSize { .. } => {}
        }
    }
}
