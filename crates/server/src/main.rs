//! SessionLink server binary
//!
//! `sessionlink serve` runs the relay. `sessionlink watch <session>` follows
//! a session from the terminal using the same stream client viewers use.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sessionlink_client::{connect, StreamConfig, StreamEvent};
use sessionlink_server::logging::init_logging;
use sessionlink_server::{serve, AppState, ServeArgs, ServerConfig, VERSION};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sessionlink", version, about = "Live agent sessions for remote viewers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server
    Serve(ServeArgs),

    /// Follow a session and print its records as they arrive
    Watch {
        /// Session id to follow
        session_id: String,

        /// Server base URL
        #[arg(long, env = "SESSIONLINK_SERVER_URL", default_value = "http://127.0.0.1:4100")]
        url: String,

        /// Auth token, if the server requires one
        #[arg(long, env = "SESSIONLINK_AUTH_TOKEN")]
        token: Option<String>,

        /// Skip history and start from the live edge
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => run_server(args.into()).await,
        Commands::Watch {
            session_id,
            url,
            token,
            live,
        } => run_watch(session_id, url, token, live).await,
    }
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let _logging = init_logging(&config.log_dir(), config.log_stderr)?;
    info!(
        component = "server",
        event = "server.starting",
        version = VERSION,
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        "Starting SessionLink server"
    );

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let state = Arc::new(AppState::new(config));
    serve(listener, state).await
}

async fn run_watch(
    session_id: String,
    url: String,
    token: Option<String>,
    live: bool,
) -> anyhow::Result<()> {
    let mut config = StreamConfig::new(url, session_id.clone());
    config.token = token;
    config.replay_history = !live;

    let (handle, mut events) = connect(config);
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = event else {
            break;
        };

        match event {
            StreamEvent::Connected {
                status,
                message_count,
                ..
            } => eprintln!("connected: {status:?}, {message_count} records"),
            StreamEvent::Message { index, messages } => {
                for payload in messages {
                    println!("[{index}] {payload}");
                }
            }
            StreamEvent::Frame(frame) => {
                println!("{}", serde_json::to_string(&frame)?);
            }
            StreamEvent::Complete {
                exit_code, reason, ..
            } => {
                eprintln!(
                    "session complete (exit code {}, {})",
                    exit_code.map_or("none".to_string(), |c| c.to_string()),
                    reason.as_deref().unwrap_or("no reason given")
                );
                break;
            }
            StreamEvent::LogReset => eprintln!("server log restarted, replaying from the beginning"),
            StreamEvent::Reconnecting { attempt, delay } => {
                eprintln!("connection dropped, retry {attempt} in {}ms", delay.as_millis())
            }
            StreamEvent::ReconnectFailed => {
                eprintln!("connection lost; run `sessionlink watch {session_id}` again to retry");
                handle.destroy();
                anyhow::bail!("gave up reconnecting");
            }
        }
    }

    handle.destroy();
    Ok(())
}
