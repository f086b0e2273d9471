//! Agent CLIs the bridge knows how to recognize and drive

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::hook::events::{str_field, StopEvent};
use crate::tmux::Key;

/// Capabilities the bridge needs from an agent CLI
pub trait AgentProvider {
    /// Stable identifier used in hook URLs and config keys
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Keys pressed after typing a message to submit it
    fn submit_keys(&self) -> &'static [Key];

    /// How long to wait after a stop hook before reading its payload
    fn settle_delay(&self) -> Duration;

    /// Default regex matching the agent's command line in `ps`
    fn process_pattern(&self) -> &'static str;

    /// Default regex for helper shells that do not count as "busy"
    fn idle_exclude_pattern(&self) -> Option<&'static str>;

    /// Pull the fields the bridge cares about out of a stop hook payload
    fn parse_stop_event(&self, raw: &Value) -> Option<StopEvent>;
}

/// The closed set of supported agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    ClaudeCode,
    Cursor,
    Codex,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::ClaudeCode, AgentKind::Cursor, AgentKind::Codex];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl AgentProvider for AgentKind {
    fn name(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::Cursor => "cursor",
            AgentKind::Codex => "codex",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "Claude Code",
            AgentKind::Cursor => "Cursor CLI",
            AgentKind::Codex => "Codex CLI",
        }
    }

    fn submit_keys(&self) -> &'static [Key] {
        match self {
            AgentKind::ClaudeCode | AgentKind::Cursor => &[Key::Enter],
            // Codex treats a bare Enter inside its composer as a newline
            AgentKind::Codex => &[Key::Escape, Key::Enter],
        }
    }

    fn settle_delay(&self) -> Duration {
        match self {
            AgentKind::Codex => Duration::from_millis(500),
            AgentKind::ClaudeCode | AgentKind::Cursor => Duration::ZERO,
        }
    }

    fn process_pattern(&self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => r"(?i)\bclaude\b",
            AgentKind::Cursor => r"(?i)\bcursor\b",
            AgentKind::Codex => r"(?i)\bcodex\b",
        }
    }

    fn idle_exclude_pattern(&self) -> Option<&'static str> {
        match self {
            AgentKind::ClaudeCode => Some(r"shell-snapshots/snapshot-"),
            AgentKind::Cursor | AgentKind::Codex => None,
        }
    }

    fn parse_stop_event(&self, raw: &Value) -> Option<StopEvent> {
        let obj = raw.as_object()?;
        let (id_key, message_key) = match self {
            AgentKind::Codex => ("thread-id", "last-assistant-message"),
            AgentKind::ClaudeCode | AgentKind::Cursor => ("session_id", "last_assistant_message"),
        };

        let cwd = str_field(obj, "cwd");
        if cwd.is_none() && str_field(obj, id_key).is_none() {
            return None;
        }

        Some(StopEvent {
            agent: *self,
            agent_session_id: str_field(obj, id_key),
            cwd,
            pane_target: str_field(obj, "tmux_target"),
            model: str_field(obj, "model"),
            summary: str_field(obj, message_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_name_round_trips() {
        for kind in AgentKind::ALL {
            assert_eq!(AgentKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AgentKind::from_name("vim"), None);
    }

    #[test]
    fn test_codex_submits_with_escape_first() {
        assert_eq!(AgentKind::Codex.submit_keys(), &[Key::Escape, Key::Enter]);
        assert_eq!(AgentKind::ClaudeCode.submit_keys(), &[Key::Enter]);
    }

    #[test]
    fn test_parse_codex_stop_event() {
        let raw = json!({
            "type": "agent-turn-complete",
            "thread-id": "th-1",
            "cwd": "/work/api",
            "last-assistant-message": "done",
            "tmux_target": "dev:1.0"
        });
        let event = AgentKind::Codex.parse_stop_event(&raw).unwrap();
        assert_eq!(event.agent_session_id.as_deref(), Some("th-1"));
        assert_eq!(event.pane_target.as_deref(), Some("dev:1.0"));
        assert_eq!(event.summary.as_deref(), Some("done"));
        assert_eq!(event.project_name(), "api");
    }

    #[test]
    fn test_parse_stop_event_rejects_empty_payload() {
        assert!(AgentKind::ClaudeCode.parse_stop_event(&json!({})).is_none());
        assert!(AgentKind::ClaudeCode.parse_stop_event(&json!("text")).is_none());
    }
}
