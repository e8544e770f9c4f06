use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(u16),
}
