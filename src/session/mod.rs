//! Tracked agent sessions and the rules that move them between states

mod registry;
mod resolver;
mod state;

pub use registry::SessionRegistry;
pub use resolver::SessionResolver;
pub use state::SessionStateManager;

use tokio::time::Instant;

use crate::agent::AgentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting at the prompt; messages may be injected
    Idle,
    /// Working on a turn
    Busy,
}

/// One agent run bound to a tmux pane
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub session_id: String,
    pub pane_target: String,
    pub project: String,
    pub cwd: String,
    pub agent: AgentKind,
    pub state: SessionState,
    pub model: Option<String>,
    pub last_activity: Instant,
}

impl TrackedSession {
    pub fn new(
        session_id: impl Into<String>,
        pane_target: impl Into<String>,
        cwd: impl Into<String>,
        agent: AgentKind,
    ) -> Self {
        let cwd = cwd.into();
        Self {
            session_id: session_id.into(),
            pane_target: pane_target.into(),
            project: crate::hook::events::project_name_from_cwd(&cwd),
            cwd,
            agent,
            state: SessionState::Idle,
            model: None,
            last_activity: Instant::now(),
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }
}

/// Prefix of a session id short enough for chat callback payloads
pub fn short_id(session_id: &str) -> &str {
    match session_id.char_indices().nth(8) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}
