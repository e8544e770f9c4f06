//! Feedback queue
//!
//! Per-session FIFO of viewer feedback waiting for the agent's Stop hook.
//! Every state change happens under one mutex, so a hook claim moves items to
//! `approved` before anyone can observe them again and two claims never
//! return the same item.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sessionlink_protocol::{
    new_id, ClientMessage, FeedbackStatus, FeedbackType, PendingFeedback,
};

/// Feedback extracted from a viewer frame, before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeedback {
    pub feedback_type: FeedbackType,
    pub content: String,
    pub context: Option<String>,
}

impl NewFeedback {
    /// `None` for frames that are not feedback.
    pub fn from_client_message(msg: &ClientMessage) -> Option<Self> {
        match msg {
            ClientMessage::UserMessage { content } => Some(Self {
                feedback_type: FeedbackType::UserMessage,
                content: content.clone(),
                context: None,
            }),
            ClientMessage::DiffComment {
                file,
                line,
                content,
            } => Some(Self {
                feedback_type: FeedbackType::DiffComment,
                content: content.clone(),
                context: Some(format!("{file}:{line}")),
            }),
            ClientMessage::SuggestedEdit {
                file,
                old_content,
                new_content,
            } => Some(Self {
                feedback_type: FeedbackType::SuggestedEdit,
                content: format!("Replace:\n{old_content}\nWith:\n{new_content}"),
                context: Some(file.clone()),
            }),
            _ => None,
        }
    }
}

struct Entry {
    item: PendingFeedback,
    /// When the item reached a terminal status, unix millis.
    settled_at: Option<u64>,
}

impl Entry {
    fn settle(&mut self, status: FeedbackStatus, now: u64) -> PendingFeedback {
        self.item.status = status;
        self.settled_at = Some(now);
        self.item.clone()
    }
}

pub struct FeedbackQueue {
    sessions: Mutex<HashMap<String, Vec<Entry>>>,
    ttl_ms: u64,
    retention_ms: u64,
}

impl FeedbackQueue {
    pub fn new(ttl: Duration, retention: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl_ms: ttl.as_millis() as u64,
            retention_ms: retention.as_millis() as u64,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue feedback and return it with its 1-based rank among the
    /// session's pending items.
    pub fn enqueue(
        &self,
        session_id: &str,
        feedback: NewFeedback,
        now: u64,
    ) -> (PendingFeedback, usize) {
        let item = PendingFeedback {
            id: new_id(),
            session_id: session_id.to_string(),
            content: feedback.content,
            feedback_type: feedback.feedback_type,
            context: feedback.context,
            status: FeedbackStatus::Pending,
            queued_at: now,
        };

        let mut sessions = self.lock();
        let entries = sessions.entry(session_id.to_string()).or_default();
        entries.push(Entry {
            item: item.clone(),
            settled_at: None,
        });
        let position = entries
            .iter()
            .filter(|e| e.item.status == FeedbackStatus::Pending)
            .count();
        (item, position)
    }

    /// Move every pending item of the session to `approved` and return them
    /// in queue order. A concurrent second claim gets an empty list.
    pub fn claim(&self, session_id: &str, now: u64) -> Vec<PendingFeedback> {
        self.settle_pending(session_id, FeedbackStatus::Approved, now)
    }

    /// Approve one pending item, e.g. when it is handed straight to an idle
    /// agent instead of waiting for the Stop hook.
    pub fn claim_item(&self, session_id: &str, id: &str, now: u64) -> Option<PendingFeedback> {
        let mut sessions = self.lock();
        sessions
            .get_mut(session_id)?
            .iter_mut()
            .find(|e| e.item.id == id && e.item.status == FeedbackStatus::Pending)
            .map(|e| e.settle(FeedbackStatus::Approved, now))
    }

    /// Put an approved item back to `pending` after its delivery failed.
    pub fn release_item(&self, session_id: &str, id: &str) -> bool {
        let mut sessions = self.lock();
        let Some(entry) = sessions
            .get_mut(session_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.item.id == id))
        else {
            return false;
        };
        if entry.item.status != FeedbackStatus::Approved {
            return false;
        }
        entry.item.status = FeedbackStatus::Pending;
        entry.settled_at = None;
        true
    }

    /// Reject whatever is still pending because the session is over.
    pub fn reject_pending(&self, session_id: &str, now: u64) -> Vec<PendingFeedback> {
        self.settle_pending(session_id, FeedbackStatus::Rejected, now)
    }

    fn settle_pending(
        &self,
        session_id: &str,
        status: FeedbackStatus,
        now: u64,
    ) -> Vec<PendingFeedback> {
        let mut sessions = self.lock();
        let Some(entries) = sessions.get_mut(session_id) else {
            return Vec::new();
        };
        entries
            .iter_mut()
            .filter(|e| e.item.status == FeedbackStatus::Pending)
            .map(|e| e.settle(status, now))
            .collect()
    }

    /// Expire pending items older than the TTL and purge terminal items past
    /// the retention window. Returns the items that just expired.
    pub fn sweep(&self, now: u64) -> Vec<PendingFeedback> {
        let mut expired = Vec::new();
        let mut sessions = self.lock();
        for entries in sessions.values_mut() {
            for entry in entries.iter_mut() {
                if entry.item.status == FeedbackStatus::Pending
                    && now.saturating_sub(entry.item.queued_at) >= self.ttl_ms
                {
                    expired.push(entry.settle(FeedbackStatus::Expired, now));
                }
            }
            entries.retain(|e| match e.settled_at {
                Some(at) => now.saturating_sub(at) < self.retention_ms,
                None => true,
            });
        }
        sessions.retain(|_, entries| !entries.is_empty());
        expired
    }

    /// Items still tracked for a session, terminal ones included.
    pub fn items(&self, session_id: &str) -> Vec<PendingFeedback> {
        self.lock()
            .get(session_id)
            .map(|entries| entries.iter().map(|e| e.item.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.lock().get(session_id).map_or(0, |entries| {
            entries
                .iter()
                .filter(|e| e.item.status == FeedbackStatus::Pending)
                .count()
        })
    }
}
