//! Spawned session registry
//!
//! In-memory directory of sessions whose process was started by a daemon.
//! Indexed by session id and by the owning daemon connection. Nothing here
//! survives a restart; daemons re-register their sessions when they reconnect.

use std::collections::HashSet;

use dashmap::DashMap;
use sessionlink_protocol::{now_millis, SessionStatus, SpawnedSession};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("spawned session {0} not found")]
    NotFound(String),

    #[error("spawned session {0} already exists")]
    AlreadyExists(String),

    #[error("invalid status transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Fields needed to register a session.
#[derive(Debug, Clone)]
pub struct NewSpawnedSession {
    pub id: String,
    pub daemon_client_id: String,
    pub cwd: String,
    pub harness: String,
    pub status: SessionStatus,
    pub claude_session_id: Option<String>,
}

impl NewSpawnedSession {
    pub fn new(
        id: impl Into<String>,
        daemon_client_id: impl Into<String>,
        cwd: impl Into<String>,
        harness: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            daemon_client_id: daemon_client_id.into(),
            cwd: cwd.into(),
            harness: harness.into(),
            status: SessionStatus::Starting,
            claude_session_id: None,
        }
    }
}

/// Partial update merged into an existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub claude_session_id: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Default)]
pub struct SpawnedSessionRegistry {
    sessions: DashMap<String, SpawnedSession>,
    by_daemon: DashMap<String, HashSet<String>>,
}

impl SpawnedSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(
        &self,
        fields: NewSpawnedSession,
    ) -> Result<SpawnedSession, RegistryError> {
        let now = now_millis();
        let session = SpawnedSession {
            id: fields.id.clone(),
            daemon_client_id: fields.daemon_client_id.clone(),
            cwd: fields.cwd,
            harness: fields.harness,
            status: fields.status,
            claude_session_id: fields.claude_session_id,
            created_at: now,
            last_activity_at: now,
        };

        match self.sessions.entry(fields.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RegistryError::AlreadyExists(fields.id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }

        self.by_daemon
            .entry(fields.daemon_client_id)
            .or_default()
            .insert(fields.id);

        Ok(session)
    }

    /// Merge `update` into the session and refresh `last_activity_at`.
    ///
    /// An empty update works as a heartbeat.
    pub fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> Result<SpawnedSession, RegistryError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if let Some(next) = update.status {
            if !entry.status.can_transition_to(next) {
                return Err(RegistryError::InvalidTransition {
                    id: id.to_string(),
                    from: entry.status,
                    to: next,
                });
            }
            entry.status = next;
        }
        if let Some(claude_session_id) = update.claude_session_id {
            entry.claude_session_id = Some(claude_session_id);
        }
        if let Some(cwd) = update.cwd {
            entry.cwd = cwd;
        }
        entry.last_activity_at = now_millis().max(entry.last_activity_at);

        Ok(entry.clone())
    }

    /// Hand a session to another daemon connection, keeping its history.
    pub fn reassign_daemon(
        &self,
        id: &str,
        daemon_client_id: &str,
    ) -> Result<SpawnedSession, RegistryError> {
        let (previous, session) = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let previous =
                std::mem::replace(&mut entry.daemon_client_id, daemon_client_id.to_string());
            entry.last_activity_at = now_millis().max(entry.last_activity_at);
            (previous, entry.clone())
        };
        if previous != daemon_client_id {
            self.unindex(&previous, id);
            self.by_daemon
                .entry(daemon_client_id.to_string())
                .or_default()
                .insert(id.to_string());
        }
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Option<SpawnedSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn delete_session(&self, id: &str) -> Option<SpawnedSession> {
        let (_, session) = self.sessions.remove(id)?;
        self.unindex(&session.daemon_client_id, id);
        Some(session)
    }

    /// Sessions whose process is running or waiting for input.
    pub fn get_active_sessions(&self) -> Vec<SpawnedSession> {
        self.sessions
            .iter()
            .filter(|s| s.status.is_active())
            .map(|s| s.clone())
            .collect()
    }

    pub fn get_sessions_by_daemon(&self, daemon_client_id: &str) -> Vec<SpawnedSession> {
        let ids: Vec<String> = match self.by_daemon.get(daemon_client_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get_session(id)).collect()
    }

    pub fn is_spawned_session(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Resolve the spawned session that reported `claude_session_id` as its
    /// inner id.
    pub fn find_by_claude_session_id(&self, claude_session_id: &str) -> Option<SpawnedSession> {
        self.sessions
            .iter()
            .find(|s| s.claude_session_id.as_deref() == Some(claude_session_id))
            .map(|s| s.clone())
    }

    /// Drop every session owned by a daemon connection that went away.
    pub fn remove_daemon(&self, daemon_client_id: &str) -> Vec<SpawnedSession> {
        let Some((_, ids)) = self.by_daemon.remove(daemon_client_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.sessions.remove(id).map(|(_, s)| s))
            .collect()
    }

    pub fn clear(&self) {
        self.sessions.clear();
        self.by_daemon.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn unindex(&self, daemon_client_id: &str, id: &str) {
        if let Some(mut ids) = self.by_daemon.get_mut(daemon_client_id) {
            ids.remove(id);
        }
        self.by_daemon
            .remove_if(daemon_client_id, |_, ids| ids.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(registry: &SpawnedSessionRegistry, id: &str, daemon: &str, status: SessionStatus) {
        let mut fields = NewSpawnedSession::new(id, daemon, "/tmp/repo", "claude");
        fields.status = status;
        registry.create_session(fields).expect("create");
    }

    #[test]
    fn create_defaults_activity_to_creation_time() {
        let registry = SpawnedSessionRegistry::new();
        let session = registry
            .create_session(NewSpawnedSession::new("s1", "d1", "/tmp/repo", "claude"))
            .unwrap();
        assert_eq!(session.status, SessionStatus::Starting);
        assert_eq!(session.created_at, session.last_activity_at);
        assert!(registry.is_spawned_session("s1"));
    }

    #[test]
    fn reassigned_session_survives_old_daemon_cleanup() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "s1", "d1", SessionStatus::Running);
        seed(&registry, "s2", "d1", SessionStatus::Running);

        let moved = registry.reassign_daemon("s1", "d2").unwrap();
        assert_eq!(moved.daemon_client_id, "d2");
        assert_eq!(moved.status, SessionStatus::Running);

        let removed: Vec<String> = registry
            .remove_daemon("d1")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(removed, vec!["s2".to_string()]);
        assert!(registry.is_spawned_session("s1"));
        let by_d2: Vec<String> = registry
            .get_sessions_by_daemon("d2")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(by_d2, vec!["s1".to_string()]);
        assert_eq!(
            registry.reassign_daemon("nope", "d2").unwrap_err(),
            RegistryError::NotFound("nope".into())
        );
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "s1", "d1", SessionStatus::Starting);
        let err = registry
            .create_session(NewSpawnedSession::new("s1", "d2", "/tmp", "claude"))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists("s1".into()));
    }

    #[test]
    fn active_sessions_are_running_and_waiting_only() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "starting", "d1", SessionStatus::Starting);
        seed(&registry, "running", "d1", SessionStatus::Running);
        seed(&registry, "waiting", "d1", SessionStatus::Waiting);
        seed(&registry, "ended", "d1", SessionStatus::Ended);
        seed(&registry, "failed", "d1", SessionStatus::Failed);

        let mut ids: Vec<String> = registry
            .get_active_sessions()
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["running".to_string(), "waiting".to_string()]);
    }

    #[test]
    fn sessions_by_daemon_only_returns_matching_entries() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "a1", "daemon-a", SessionStatus::Running);
        seed(&registry, "a2", "daemon-a", SessionStatus::Waiting);
        seed(&registry, "b1", "daemon-b", SessionStatus::Running);

        let mut ids: Vec<String> = registry
            .get_sessions_by_daemon("daemon-a")
            .into_iter()
            .map(|s| s.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
        assert!(registry
            .get_sessions_by_daemon("daemon-b")
            .iter()
            .all(|s| s.daemon_client_id == "daemon-b"));
        assert!(registry.get_sessions_by_daemon("daemon-c").is_empty());
    }

    #[test]
    fn update_merges_and_refreshes_activity() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "s1", "d1", SessionStatus::Starting);
        let before = registry.get_session("s1").unwrap();

        let after = registry
            .update_session(
                "s1",
                SessionUpdate {
                    status: Some(SessionStatus::Running),
                    claude_session_id: Some("inner-1".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(after.status, SessionStatus::Running);
        assert_eq!(after.claude_session_id.as_deref(), Some("inner-1"));
        assert_eq!(after.cwd, before.cwd);
        assert!(after.last_activity_at >= before.last_activity_at);
        assert_eq!(
            registry.find_by_claude_session_id("inner-1").map(|s| s.id),
            Some("s1".to_string())
        );
    }

    #[test]
    fn terminal_status_is_immutable() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "s1", "d1", SessionStatus::Running);
        registry
            .update_session(
                "s1",
                SessionUpdate {
                    status: Some(SessionStatus::Ended),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = registry
            .update_session(
                "s1",
                SessionUpdate {
                    status: Some(SessionStatus::Running),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(
            registry.get_session("s1").unwrap().status,
            SessionStatus::Ended
        );
    }

    #[test]
    fn update_unknown_session_fails() {
        let registry = SpawnedSessionRegistry::new();
        let err = registry
            .update_session("missing", SessionUpdate::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".into()));
    }

    #[test]
    fn delete_and_daemon_cleanup_keep_indexes_consistent() {
        let registry = SpawnedSessionRegistry::new();
        seed(&registry, "a1", "daemon-a", SessionStatus::Running);
        seed(&registry, "a2", "daemon-a", SessionStatus::Running);
        seed(&registry, "b1", "daemon-b", SessionStatus::Running);

        assert!(registry.delete_session("a1").is_some());
        assert!(registry.delete_session("a1").is_none());
        assert_eq!(registry.get_sessions_by_daemon("daemon-a").len(), 1);

        let removed = registry.remove_daemon("daemon-a");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "a2");
        assert!(registry.get_sessions_by_daemon("daemon-a").is_empty());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get_sessions_by_daemon("daemon-b").is_empty());
    }
}
