//! Runtime configuration.
//!
//! Flags for `sessionlink serve`, each with an environment fallback, and the
//! resolved `ServerConfig` handed to `AppState`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket server
    #[arg(long, env = "SESSIONLINK_BIND", default_value = "127.0.0.1:4100")]
    pub bind: SocketAddr,

    /// Require `Authorization: Bearer <token>` (or `?token=`) on every route but /health
    #[arg(long, env = "SESSIONLINK_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Directory for logs (default: ~/.sessionlink)
    #[arg(long, env = "SESSIONLINK_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Seconds between heartbeat frames pushed to viewers
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub heartbeat_secs: u64,

    /// Seconds a feedback item may stay pending before it expires
    #[arg(long, default_value_t = 600)]
    pub feedback_ttl_secs: u64,

    /// Seconds a settled feedback item stays visible before it is purged
    #[arg(long, default_value_t = 60)]
    pub feedback_retention_secs: u64,

    /// Seconds a completed session stays replayable once no viewer is attached
    #[arg(long, default_value_t = 600)]
    pub relay_retention_secs: u64,

    /// Log to stderr instead of <data-dir>/logs/server.log
    #[arg(long)]
    pub log_stderr: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub auth_token: Option<String>,
    pub data_dir: PathBuf,
    pub heartbeat_interval: Duration,
    pub feedback_ttl: Duration,
    pub feedback_retention: Duration,
    pub feedback_sweep_interval: Duration,
    pub relay_retention: Duration,
    pub log_stderr: bool,
}

impl ServerConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4100)),
            auth_token: None,
            data_dir: default_data_dir(),
            heartbeat_interval: Duration::from_secs(30),
            feedback_ttl: Duration::from_secs(600),
            feedback_retention: Duration::from_secs(60),
            feedback_sweep_interval: Duration::from_secs(5),
            relay_retention: Duration::from_secs(600),
            log_stderr: false,
        }
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            bind: args.bind,
            auth_token: args.auth_token.filter(|t| !t.is_empty()),
            data_dir: args.data_dir.unwrap_or_else(default_data_dir),
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
            feedback_ttl: Duration::from_secs(args.feedback_ttl_secs),
            feedback_retention: Duration::from_secs(args.feedback_retention_secs),
            relay_retention: Duration::from_secs(args.relay_retention_secs),
            log_stderr: args.log_stderr,
            ..Self::default()
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".sessionlink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn flags_resolve_into_config() {
        let cli = TestCli::parse_from([
            "sessionlink",
            "--bind",
            "0.0.0.0:9000",
            "--auth-token",
            "secret",
            "--data-dir",
            "/tmp/sl",
            "--heartbeat-secs",
            "5",
            "--relay-retention-secs",
            "90",
        ]);
        let config = ServerConfig::from(cli.serve);
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/sl/logs"));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.feedback_ttl, Duration::from_secs(600));
        assert_eq!(config.relay_retention, Duration::from_secs(90));
    }

    #[test]
    fn empty_token_disables_auth() {
        let cli = TestCli::parse_from(["sessionlink", "--auth-token", ""]);
        assert_eq!(ServerConfig::from(cli.serve).auth_token, None);
    }
}
