use std::collections::HashMap;
use tokio::time::Instant;

use super::{SessionState, TrackedSession};

/// In-memory table of managed sessions, keyed by session id with a pane index.
///
/// At most one session is tracked per pane target.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, TrackedSession>,
    by_pane: HashMap<String, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session`, replacing whatever was tracked on the same pane or
    /// under the same id. Returns the id of a replaced pane occupant.
    pub fn register(&mut self, session: TrackedSession) -> Option<String> {
        let mut replaced = None;
        if let Some(previous) = self.by_pane.get(&session.pane_target).cloned() {
            if previous != session.session_id {
                self.sessions.remove(&previous);
                replaced = Some(previous);
            }
        }
        if let Some(old) = self.sessions.get(&session.session_id) {
            if old.pane_target != session.pane_target {
                self.by_pane.remove(&old.pane_target);
            }
        }

        tracing::debug!(
            session_id = %session.session_id,
            pane_target = %session.pane_target,
            agent = %session.agent,
            "session registered"
        );
        self.by_pane
            .insert(session.pane_target.clone(), session.session_id.clone());
        self.sessions.insert(session.session_id.clone(), session);
        replaced
    }

    pub fn unregister(&mut self, session_id: &str) -> Option<TrackedSession> {
        let session = self.sessions.remove(session_id)?;
        if self.by_pane.get(&session.pane_target).map(String::as_str) == Some(session_id) {
            self.by_pane.remove(&session.pane_target);
        }
        tracing::debug!(session_id, pane_target = %session.pane_target, "session unregistered");
        Some(session)
    }

    pub fn get_by_session_id(&self, session_id: &str) -> Option<&TrackedSession> {
        self.sessions.get(session_id)
    }

    pub fn get_by_pane_target(&self, pane_target: &str) -> Option<&TrackedSession> {
        self.by_pane
            .get(pane_target)
            .and_then(|id| self.sessions.get(id))
    }

    /// Sessions for `project`, most recently active first
    pub fn get_by_project(&self, project: &str) -> Vec<&TrackedSession> {
        let mut matches: Vec<&TrackedSession> = self
            .sessions
            .values()
            .filter(|s| s.project == project)
            .collect();
        matches.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        matches
    }

    pub fn get_all_active(&self) -> Vec<&TrackedSession> {
        self.sessions.values().collect()
    }

    pub fn update_state(&mut self, session_id: &str, state: SessionState) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.state = state;
                true
            }
            None => false,
        }
    }

    pub fn update_model(&mut self, session_id: &str, model: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.model = Some(model.to_string());
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_pane.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use std::time::Duration;

    fn session(id: &str, pane: &str, cwd: &str) -> TrackedSession {
        TrackedSession::new(id, pane, cwd, AgentKind::ClaudeCode)
    }

    #[test]
    fn test_register_get_unregister() {
        let mut registry = SessionRegistry::new();
        registry.register(session("s1", "dev:0.0", "/w/api"));

        let found = registry.get_by_session_id("s1").unwrap();
        assert_eq!(found.project, "api");
        assert_eq!(found.state, SessionState::Idle);
        assert_eq!(registry.get_by_pane_target("dev:0.0").unwrap().session_id, "s1");

        let removed = registry.unregister("s1").unwrap();
        assert_eq!(removed.pane_target, "dev:0.0");
        assert!(registry.get_by_session_id("s1").is_none());
        assert!(registry.get_by_pane_target("dev:0.0").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_one_session_per_pane() {
        let mut registry = SessionRegistry::new();
        registry.register(session("old", "dev:0.0", "/w/api"));
        let replaced = registry.register(session("new", "dev:0.0", "/w/api"));

        assert_eq!(replaced.as_deref(), Some("old"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_session_id("old").is_none());
        assert_eq!(registry.get_by_pane_target("dev:0.0").unwrap().session_id, "new");
    }

    #[test]
    fn test_moving_session_frees_old_pane() {
        let mut registry = SessionRegistry::new();
        registry.register(session("s1", "dev:0.0", "/w/api"));
        registry.register(session("s1", "dev:1.0", "/w/api"));

        assert!(registry.get_by_pane_target("dev:0.0").is_none());
        assert_eq!(registry.get_by_pane_target("dev:1.0").unwrap().session_id, "s1");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_by_project_most_recent_first() {
        let mut registry = SessionRegistry::new();
        registry.register(session("a", "dev:0.0", "/w/api"));
        tokio::time::advance(Duration::from_secs(1)).await;
        registry.register(session("b", "dev:1.0", "/w/api"));
        registry.register(session("c", "dev:2.0", "/w/web"));
        tokio::time::advance(Duration::from_secs(1)).await;
        registry.touch("a");

        let ids: Vec<&str> = registry
            .get_by_project("api")
            .iter()
            .map(|s| s.session_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_updates_on_unknown_session_are_ignored() {
        let mut registry = SessionRegistry::new();
        assert!(!registry.update_state("ghost", SessionState::Busy));
        assert!(!registry.update_model("ghost", "opus"));
        assert!(!registry.touch("ghost"));

        registry.register(session("s1", "dev:0.0", "/w/api"));
        assert!(registry.update_model("s1", "opus"));
        assert_eq!(
            registry.get_by_session_id("s1").unwrap().model.as_deref(),
            Some("opus")
        );
    }
}
