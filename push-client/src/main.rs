use anyhow::Result;
use clap::Parser;
use colored::*;
use push_client::token::{fetch_token, ws_url};
use push_client::{ClientEvent, ClientState};
use serde_json::Value;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "push-client")]
#[command(about = "Reconnecting subscriber for the sports push service")]
struct Cli {
    /// Base URL of the push service (e.g., http://localhost:4000)
    #[arg(long)]
    base_url: String,

    /// Match to follow; repeat to follow several
    #[arg(long = "match-id", required = true)]
    match_ids: Vec<String>,

    /// Handshake token to reuse on every attempt. A fresh one is fetched
    /// from the token refresh endpoint before each attempt when unset.
    #[arg(long)]
    token: Option<String>,

    /// Base reconnect delay in seconds; doubles per failed attempt up to 60
    #[arg(long, default_value_t = 5)]
    reconnect_interval_secs: u64,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    let http = reqwest::Client::new();
    let base_url = cli.base_url.clone();
    let fixed_token = cli.token.clone();
    let connect_url = move || {
        let http = http.clone();
        let base_url = base_url.clone();
        let fixed_token = fixed_token.clone();
        async move {
            let token = match fixed_token {
                Some(token) => token,
                None => fetch_token(&http, &base_url).await?.token,
            };
            ws_url(&base_url, &token)
        }
    };

    println!("{} Connecting to {}", "→".blue(), cli.base_url);
    let (handle, mut events, task) =
        push_client::spawn(connect_url, Duration::from_secs(cli.reconnect_interval_secs));
    for match_id in &cli.match_ids {
        handle.subscribe(match_id)?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::State(state)) => print_state(state),
                Some(ClientEvent::Frame(frame)) => print_frame(&frame),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{} Interrupted, closing", "→".blue());
                drop(handle);
                break;
            }
        }
    }

    match task.await? {
        ClientState::Failed => anyhow::bail!("Gave up reconnecting"),
        _ => Ok(()),
    }
}

fn print_state(state: ClientState) {
    match state {
        ClientState::Connecting => println!("{} Connecting...", "→".blue()),
        ClientState::Open => println!("{} Connected", "✓".green()),
        ClientState::Closed => println!("{} Connection closed", "!".yellow()),
        ClientState::ReconnectScheduled { delay } => {
            println!("{} Reconnecting in {}s", "!".yellow(), delay.as_secs())
        }
        ClientState::Failed => println!("{} Reconnect attempts exhausted", "✗".red()),
    }
}

fn print_frame(frame: &Value) {
    let kind = frame["type"].as_str().unwrap_or("unknown");
    match kind {
        "match_score" | "odds_update" => println!(
            "{} {}",
            format!("[{kind}]").bright_white().bold(),
            frame["data"]
        ),
        "ping" | "pong" => log::debug!("{kind}"),
        "error" => println!("{} {}", "✗".red(), frame),
        _ => println!("{} {}", format!("[{kind}]").cyan(), frame),
    }
}
