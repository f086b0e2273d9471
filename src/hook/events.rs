//! Typed views over hook payloads posted by agent CLIs

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::agent::AgentKind;

/// Which hook fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Stop,
    SessionStart,
    AskUserQuestion,
    PermissionRequest,
    Notification,
}

impl HookKind {
    /// Map the last path segment of `/hook/{event}`
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "stop" => Some(HookKind::Stop),
            "session-start" => Some(HookKind::SessionStart),
            "ask-user-question" => Some(HookKind::AskUserQuestion),
            "permission-request" => Some(HookKind::PermissionRequest),
            "notification" => Some(HookKind::Notification),
            _ => None,
        }
    }
}

/// A hook payload as received, before validation
#[derive(Debug, Clone)]
pub struct RawHook {
    pub kind: HookKind,
    pub agent: AgentKind,
    pub payload: Value,
}

/// Non-empty string field of a JSON object
pub fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Project name shown in chat: the last component of the working directory
pub fn project_name_from_cwd(cwd: &str) -> String {
    Path::new(cwd.trim_end_matches('/'))
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopEvent {
    pub agent: AgentKind,
    pub agent_session_id: Option<String>,
    pub cwd: Option<String>,
    pub pane_target: Option<String>,
    pub model: Option<String>,
    pub summary: Option<String>,
}

impl StopEvent {
    pub fn project_name(&self) -> String {
        self.cwd
            .as_deref()
            .map(project_name_from_cwd)
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStartEvent {
    pub session_id: String,
    pub cwd: Option<String>,
    pub pane_target: Option<String>,
    pub model: Option<String>,
}

impl SessionStartEvent {
    pub fn parse(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            session_id: str_field(obj, "session_id")?,
            cwd: str_field(obj, "cwd"),
            pane_target: str_field(obj, "tmux_target"),
            model: str_field(obj, "model"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuestionOption {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AskUserQuestionEvent {
    pub session_id: String,
    pub cwd: Option<String>,
    pub pane_target: Option<String>,
    pub questions: Vec<Question>,
}

impl AskUserQuestionEvent {
    /// Questions may sit under `tool_input` or at the top level.
    /// Entries without text or options are skipped; none left means malformed.
    pub fn parse(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let session_id = str_field(obj, "session_id")?;

        let input = obj
            .get("tool_input")
            .and_then(Value::as_object)
            .unwrap_or(obj);
        let questions: Vec<Question> = input
            .get("questions")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(|q| serde_json::from_value::<Question>(q.clone()).ok())
            .filter(|q| !q.question.is_empty() && !q.options.is_empty())
            .collect();

        if questions.is_empty() {
            return None;
        }

        Some(Self {
            session_id,
            cwd: str_field(obj, "cwd"),
            pane_target: str_field(obj, "tmux_target"),
            questions,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequestEvent {
    pub session_id: String,
    pub cwd: Option<String>,
    pub pane_target: Option<String>,
    pub tool_name: String,
    pub tool_input: Map<String, Value>,
    pub permission_mode: Option<String>,
}

impl PermissionRequestEvent {
    pub fn parse(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            session_id: str_field(obj, "session_id")?,
            tool_name: str_field(obj, "tool_name")?,
            tool_input: obj
                .get("tool_input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            cwd: str_field(obj, "cwd"),
            pane_target: str_field(obj, "tmux_target"),
            permission_mode: str_field(obj, "permission_mode"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub session_id: String,
    pub cwd: Option<String>,
    pub pane_target: Option<String>,
    pub notification_type: String,
    pub message: String,
    pub title: Option<String>,
}

impl NotificationEvent {
    pub fn parse(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            session_id: str_field(obj, "session_id")?,
            message: str_field(obj, "message")?,
            notification_type: str_field(obj, "notification_type")
                .unwrap_or_else(|| "notification".to_string()),
            title: str_field(obj, "title"),
            cwd: str_field(obj, "cwd"),
            pane_target: str_field(obj, "tmux_target"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_name_from_cwd() {
        assert_eq!(project_name_from_cwd("/home/me/work/api"), "api");
        assert_eq!(project_name_from_cwd("/home/me/work/api/"), "api");
        assert_eq!(project_name_from_cwd("/"), "unknown");
    }

    #[test]
    fn test_parse_ask_question_from_tool_input() {
        let raw = json!({
            "session_id": "abc",
            "tmux_target": "main:0.1",
            "tool_input": {
                "questions": [
                    {
                        "question": "Which database?",
                        "header": "DB",
                        "multiSelect": false,
                        "options": [{"label": "Postgres", "description": ""}, {"label": "SQLite"}]
                    },
                    {"question": "", "options": [{"label": "x"}]},
                    "garbage",
                    {"question": "No options", "options": []}
                ]
            }
        });

        let event = AskUserQuestionEvent::parse(&raw).unwrap();
        assert_eq!(event.session_id, "abc");
        assert_eq!(event.pane_target.as_deref(), Some("main:0.1"));
        assert_eq!(event.questions.len(), 1);
        assert_eq!(event.questions[0].options[1].label, "SQLite");
        assert!(!event.questions[0].multi_select);
    }

    #[test]
    fn test_parse_ask_question_without_usable_questions() {
        let raw = json!({"session_id": "abc", "questions": []});
        assert!(AskUserQuestionEvent::parse(&raw).is_none());
        let raw = json!({"questions": [{"question": "q", "options": [{"label": "a"}]}]});
        assert!(AskUserQuestionEvent::parse(&raw).is_none());
    }

    #[test]
    fn test_parse_permission_requires_tool_name() {
        let raw = json!({"session_id": "abc", "tool_input": {"command": "ls"}});
        assert!(PermissionRequestEvent::parse(&raw).is_none());

        let raw = json!({"session_id": "abc", "tool_name": "Bash", "tool_input": {"command": "ls"}});
        let event = PermissionRequestEvent::parse(&raw).unwrap();
        assert_eq!(event.tool_input["command"], "ls");
    }

    #[test]
    fn test_parse_notification_defaults_type() {
        let raw = json!({"session_id": "abc", "message": "Claude needs your input"});
        let event = NotificationEvent::parse(&raw).unwrap();
        assert_eq!(event.notification_type, "notification");
        assert!(NotificationEvent::parse(&json!({"session_id": "abc"})).is_none());
    }
}
