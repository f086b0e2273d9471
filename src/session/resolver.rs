use std::time::Duration;

use super::SessionRegistry;
use crate::cache::ExpiringMap;

/// Cached identities are dropped by capacity long before this
const IDENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maps the identifiers agents put in hook payloads to tracked session ids
pub struct SessionResolver {
    /// agent-reported session id -> tracked session id
    identities: ExpiringMap<String, String>,
}

impl SessionResolver {
    pub fn new(capacity: usize) -> Self {
        Self {
            identities: ExpiringMap::new(IDENTITY_TTL, capacity),
        }
    }

    /// Find the tracked session an agent event belongs to.
    ///
    /// Tried in order: the pane the event came from, the agent id itself when
    /// it is a tracked session id, a previous resolution of the same agent id,
    /// then the project's sessions (exact cwd first when there are several,
    /// otherwise the most recently active).
    pub fn resolve_session_id(
        &mut self,
        registry: &SessionRegistry,
        agent_session_id: Option<&str>,
        project: &str,
        cwd: Option<&str>,
        pane_target: Option<&str>,
    ) -> Option<String> {
        if let Some(session) = pane_target.and_then(|t| registry.get_by_pane_target(t)) {
            let id = session.session_id.clone();
            tracing::debug!(session_id = %id, "resolved by pane target");
            self.remember(agent_session_id, &id);
            return Some(id);
        }

        if let Some(agent_id) = agent_session_id {
            if registry.get_by_session_id(agent_id).is_some() {
                tracing::debug!(session_id = agent_id, "resolved by tracked id");
                return Some(agent_id.to_string());
            }

            let key = agent_id.to_string();
            if let Some(cached) = self.identities.get(&key).cloned() {
                if registry.get_by_session_id(&cached).is_some() {
                    tracing::debug!(session_id = %cached, "resolved from identity cache");
                    return Some(cached);
                }
                self.identities.remove(&key);
            }
        }

        let candidates = registry.get_by_project(project);
        let chosen = if candidates.len() > 1 {
            cwd.and_then(|cwd| candidates.iter().find(|s| s.cwd == cwd))
                .or(candidates.first())
        } else {
            candidates.first()
        };

        let id = chosen?.session_id.clone();
        tracing::debug!(session_id = %id, project, "resolved by project");
        self.remember(agent_session_id, &id);
        Some(id)
    }

    /// Drop cached identities that point at `session_id`
    pub fn forget_session(&mut self, session_id: &str) {
        while let Some(key) = self.identities.find_key(|_, v| v == session_id) {
            self.identities.remove(&key);
        }
    }

    /// Drop cached identities past their TTL
    pub fn sweep(&mut self) -> usize {
        self.identities.sweep().len()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }

    fn remember(&mut self, agent_session_id: Option<&str>, session_id: &str) {
        if let Some(agent_id) = agent_session_id {
            self.identities
                .insert(agent_id.to_string(), session_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::session::TrackedSession;

    fn registry() -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        registry.register(TrackedSession::new("pane-a", "dev:0.0", "/w/api", AgentKind::Codex));
        registry.register(TrackedSession::new("pane-b", "dev:1.0", "/x/api", AgentKind::Codex));
        registry
    }

    #[tokio::test(start_paused = true)]
    async fn test_pane_target_beats_project_fallback() {
        let registry = registry();
        let mut resolver = SessionResolver::new(100);

        let id = resolver.resolve_session_id(
            &registry,
            Some("thread-1"),
            "api",
            Some("/x/api"),
            Some("dev:0.0"),
        );
        assert_eq!(id.as_deref(), Some("pane-a"));

        // Cached: a later event without a pane target lands on the same session
        let id = resolver.resolve_session_id(&registry, Some("thread-1"), "api", Some("/x/api"), None);
        assert_eq!(id.as_deref(), Some("pane-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_fallback_prefers_exact_cwd() {
        let registry = registry();
        let mut resolver = SessionResolver::new(100);

        let id = resolver.resolve_session_id(&registry, None, "api", Some("/x/api"), None);
        assert_eq!(id.as_deref(), Some("pane-b"));
        assert_eq!(resolver.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_project_fallback_takes_most_recent() {
        let mut registry = registry();
        tokio::time::advance(Duration::from_secs(1)).await;
        registry.touch("pane-a");
        let mut resolver = SessionResolver::new(100);

        let id = resolver.resolve_session_id(&registry, Some("t"), "api", None, None);
        assert_eq!(id.as_deref(), Some("pane-a"));
        assert!(resolver
            .resolve_session_id(&registry, None, "web", None, None)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_entry_is_dropped() {
        let mut registry = registry();
        let mut resolver = SessionResolver::new(100);
        resolver.resolve_session_id(&registry, Some("t"), "api", None, Some("dev:1.0"));
        assert_eq!(resolver.len(), 1);

        registry.unregister("pane-b");
        let id = resolver.resolve_session_id(&registry, Some("t"), "api", None, None);
        // Falls through to the remaining project session and re-caches it
        assert_eq!(id.as_deref(), Some("pane-a"));
        assert_eq!(resolver.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pane_target_beats_tracked_id() {
        let registry = registry();
        let mut resolver = SessionResolver::new(100);

        // The agent id names pane-b, but the event came from pane-a's pane
        let id = resolver.resolve_session_id(&registry, Some("pane-b"), "api", None, Some("dev:0.0"));
        assert_eq!(id.as_deref(), Some("pane-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracked_id_resolves_without_caching() {
        let registry = registry();
        let mut resolver = SessionResolver::new(100);

        let id = resolver.resolve_session_id(&registry, Some("pane-b"), "api", Some("/w/api"), None);
        assert_eq!(id.as_deref(), Some("pane-b"));
        assert_eq!(resolver.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_day_old_identities() {
        let registry = registry();
        let mut resolver = SessionResolver::new(100);
        for _ in 0..1_000 {
            resolver.resolve_session_id(&registry, Some("t"), "api", None, Some("dev:0.0"));
        }
        assert_eq!(resolver.len(), 1);
        assert!(resolver.identities.heap_len() <= 2 * resolver.len() + 17);

        assert_eq!(resolver.sweep(), 0);
        tokio::time::advance(IDENTITY_TTL).await;
        assert_eq!(resolver.sweep(), 1);
        assert_eq!(resolver.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_is_bounded() {
        let registry = registry();
        let mut resolver = SessionResolver::new(2);
        for agent_id in ["t1", "t2", "t3"] {
            resolver.resolve_session_id(&registry, Some(agent_id), "api", None, Some("dev:0.0"));
        }
        assert_eq!(resolver.len(), 2);

        resolver.forget_session("pane-a");
        assert_eq!(resolver.len(), 0);
    }
}
