//! Application state

use std::sync::Arc;

use dashmap::DashMap;
use sessionlink_protocol::{now_millis, PendingFeedback, ServerMessage};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::feedback::FeedbackQueue;
use crate::registry::SpawnedSessionRegistry;
use crate::relay::{RelayCommand, RelayHandle};

/// Shared application state, built once per process and handed to every
/// handler as `Arc<AppState>`.
pub struct AppState {
    relays: DashMap<String, RelayHandle>,
    pub registry: SpawnedSessionRegistry,
    pub feedback: FeedbackQueue,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            relays: DashMap::new(),
            registry: SpawnedSessionRegistry::new(),
            feedback: FeedbackQueue::new(config.feedback_ttl, config.feedback_retention),
            config,
        }
    }

    /// Relay for a session, spawning its actor on first use.
    pub fn get_or_create_relay(&self, session_id: &str) -> RelayHandle {
        self.relays
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(
                    component = "state",
                    event = "relay.created",
                    session_id = %session_id,
                    "Spawning relay"
                );
                RelayHandle::spawn(session_id, self.config.heartbeat_interval)
            })
            .clone()
    }

    pub fn relay(&self, session_id: &str) -> Option<RelayHandle> {
        self.relays.get(session_id).map(|r| r.clone())
    }

    /// Drop relays that completed at least `relay_retention` ago and have no
    /// viewer attached. Their actors stop once the last handle is gone.
    pub fn evict_finished_relays(&self, now: u64) -> Vec<String> {
        let retention = self.config.relay_retention.as_millis() as u64;
        let mut evicted = Vec::new();
        self.relays.retain(|session_id, relay| {
            let snap = relay.snapshot();
            let expired = snap
                .completed_at
                .is_some_and(|at| now.saturating_sub(at) >= retention);
            if expired && snap.subscriber_count == 0 {
                evicted.push(session_id.clone());
                return false;
            }
            true
        });

        for session_id in &evicted {
            let finished = self
                .registry
                .get_session(session_id)
                .is_some_and(|s| s.status.is_terminal());
            if finished {
                self.registry.delete_session(session_id);
            }
        }
        if !evicted.is_empty() {
            info!(
                component = "state",
                event = "relay.evicted",
                count = evicted.len(),
                "Evicted finished relays"
            );
        }
        evicted
    }

    /// Map the id a hook reports (the agent's own session id) to the relay
    /// session it belongs to. Falls back to treating it as a relay id.
    pub fn resolve_hook_session(&self, hook_session_id: &str) -> Option<String> {
        if let Some(session) = self.registry.find_by_claude_session_id(hook_session_id) {
            return Some(session.id);
        }
        if self.registry.is_spawned_session(hook_session_id)
            || self.relays.contains_key(hook_session_id)
        {
            return Some(hook_session_id.to_string());
        }
        None
    }

    /// Tell the session's viewers about feedback status changes.
    pub async fn broadcast_feedback_status(&self, items: &[PendingFeedback]) {
        for item in items {
            let Some(relay) = self.relay(&item.session_id) else {
                continue;
            };
            relay
                .send(RelayCommand::Broadcast {
                    msg: ServerMessage::FeedbackStatus {
                        message_id: item.id.clone(),
                        status: item.status,
                    },
                })
                .await;
        }
    }

    /// Reject a session's pending feedback and announce it.
    pub async fn reject_feedback(&self, session_id: &str) {
        let rejected = self.feedback.reject_pending(session_id, now_millis());
        if !rejected.is_empty() {
            info!(
                component = "feedback",
                event = "feedback.rejected",
                session_id = %session_id,
                count = rejected.len(),
                "Rejected pending feedback for finished session"
            );
            self.broadcast_feedback_status(&rejected).await;
        }
    }
}

/// Periodically expire stale feedback and drop finished relays.
pub fn spawn_sweeper(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.feedback_sweep_interval);
        loop {
            interval.tick().await;
            let now = now_millis();
            state.evict_finished_relays(now);
            let expired = state.feedback.sweep(now);
            if expired.is_empty() {
                continue;
            }
            info!(
                component = "feedback",
                event = "feedback.expired",
                count = expired.len(),
                "Expired unclaimed feedback"
            );
            state.broadcast_feedback_status(&expired).await;
        }
    })
}
