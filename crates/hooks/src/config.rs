//! Hook configuration, read from the environment the agent passes through.

pub const SERVER_URL_VAR: &str = "SESSIONLINK_SERVER_URL";
pub const AUTH_TOKEN_VAR: &str = "SESSIONLINK_AUTH_TOKEN";
pub const DEBUG_VAR: &str = "SESSIONLINK_HOOK_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookConfig {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub debug: bool,
}

impl HookConfig {
    /// `None` when no server is configured; the hooks then do nothing.
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        let server_url = non_empty(SERVER_URL_VAR)?
            .trim()
            .trim_end_matches('/')
            .to_string();
        Some(Self {
            server_url,
            auth_token: non_empty(AUTH_TOKEN_VAR),
            debug: debug_enabled(&var),
        })
    }
}

pub fn debug_enabled(var: &impl Fn(&str) -> Option<String>) -> bool {
    matches!(var(DEBUG_VAR).as_deref(), Some("1") | Some("true"))
}
