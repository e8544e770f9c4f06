//! SessionLink server
//!
//! Relays live agent sessions from daemons to viewers over WebSocket and
//! carries viewer feedback back to the agent through its hooks.

pub mod app;
pub mod auth;
pub mod config;
pub mod daemon_socket;
pub mod feedback;
pub mod hook_handler;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod state;
pub mod websocket;

pub use app::{router, serve};
pub use config::{ServeArgs, ServerConfig};
pub use state::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
