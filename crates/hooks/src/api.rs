//! Calls from the hooks to the server.

use std::future::Future;

use sessionlink_protocol::hook::{ClaimFeedbackRequest, ClaimFeedbackResponse, SessionEndRequest};
use sessionlink_protocol::PendingFeedback;

use crate::config::HookConfig;
use crate::error::HookError;

pub trait FeedbackApi {
    /// Claim every pending item for the agent session. Claimed items are
    /// already marked delivered when this returns.
    fn claim(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<PendingFeedback>, HookError>> + Send;

    fn session_end(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> impl Future<Output = Result<(), HookError>> + Send;
}

pub struct HttpFeedbackApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpFeedbackApi {
    pub fn new(config: &HookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.server_url.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.base_url));
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl FeedbackApi for HttpFeedbackApi {
    fn claim(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<PendingFeedback>, HookError>> + Send {
        let request = self.post("/api/feedback/claim").json(&ClaimFeedbackRequest {
            session_id: session_id.to_string(),
        });
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(HookError::Status(response.status().as_u16()));
            }
            let body: ClaimFeedbackResponse = response.json().await?;
            Ok(body.items)
        }
    }

    fn session_end(
        &self,
        session_id: &str,
        reason: Option<String>,
    ) -> impl Future<Output = Result<(), HookError>> + Send {
        let request = self.post("/api/hooks/session-end").json(&SessionEndRequest {
            session_id: session_id.to_string(),
            reason,
        });
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(HookError::Status(response.status().as_u16()));
            }
            Ok(())
        }
    }
}
