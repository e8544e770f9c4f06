//! sessionlink-hook: agent lifecycle hooks for SessionLink.
//!
//! Configured in the agent's hook settings. Each subcommand reads the hook
//! payload from stdin and always exits 0.
//!
//! ## Subcommands
//!
//! - `stop`: deliver queued viewer feedback, blocking the stop if any
//! - `session-end`: tell the server the agent session is over

use std::io::{Read, Write};

use clap::{Parser, Subcommand};
use sessionlink_hooks::{session_end, stop, HookConfig, HookInput, HttpFeedbackApi};

#[derive(Parser)]
#[command(name = "sessionlink-hook")]
#[command(about = "SessionLink agent hooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stop hook (reads JSON from stdin, prints the decision)
    Stop,

    /// SessionEnd hook (reads JSON from stdin)
    SessionEnd,
}

fn init_debug_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_target(false)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let config = HookConfig::from_env();
    if config.as_ref().is_some_and(|c| c.debug) {
        init_debug_logging();
    }

    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        tracing::debug!(event = "hook.stdin.failed", error = %e);
    }
    let input = HookInput::parse(&raw);
    let api = config.as_ref().map(HttpFeedbackApi::new);

    match cli.command {
        Commands::Stop => {
            let output = stop::run(&input, api.as_ref()).await;
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{}", output.to_json());
            let _ = stdout.flush();
        }
        Commands::SessionEnd => session_end::run(&input, api.as_ref()).await,
    }
}
