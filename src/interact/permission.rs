use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::keyboard::permission_keyboard;
use super::SeenCallbacks;
use crate::cache::ExpiringMap;
use crate::channel::{ChatChannel, OutgoingMessage};
use crate::hook::PermissionRequestEvent;
use crate::tmux::TerminalBridge;

#[derive(Debug, Clone)]
struct PendingPermission {
    session_id: String,
    pane_target: String,
    tool_name: String,
    summary: String,
}

/// Relays tool permission prompts to chat and types the verdict back
pub struct PermissionHandler {
    channel: Arc<dyn ChatChannel>,
    bridge: Arc<TerminalBridge>,
    pending: ExpiringMap<u64, PendingPermission>,
    next_id: u64,
    seen: SeenCallbacks,
}

impl PermissionHandler {
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        bridge: Arc<TerminalBridge>,
        ttl: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            channel,
            bridge,
            pending: ExpiringMap::new(ttl, capacity),
            next_id: 1,
            seen: SeenCallbacks::default(),
        }
    }

    /// Post Allow/Deny buttons for a permission request. Returns the pending id.
    pub async fn forward_permission(
        &mut self,
        chat_id: i64,
        event: &PermissionRequestEvent,
        project: &str,
    ) -> Option<u64> {
        let Some(pane_target) = event.pane_target.clone() else {
            tracing::debug!(session_id = %event.session_id, "permission request without pane, dropped");
            return None;
        };

        let id = self.next_id;
        self.next_id += 1;
        let summary = summarize_tool(&event.tool_name, &event.tool_input);
        tracing::info!(
            session_id = %event.session_id,
            pane_target,
            tool = %event.tool_name,
            "permission request"
        );

        if let Some(evicted) = self.pending.insert(
            id,
            PendingPermission {
                session_id: event.session_id.clone(),
                pane_target,
                tool_name: event.tool_name.clone(),
                summary: summary.clone(),
            },
        ) {
            tracing::debug!(pending_id = evicted, "oldest permission request evicted");
        }

        let text = format!(
            "⚠️ Permission request\n{project}\n\n🔧 {}\n{summary}",
            event.tool_name
        );
        let message = OutgoingMessage::text(text).with_buttons(permission_keyboard(id));
        if let Err(e) = self.channel.send(chat_id, message).await {
            tracing::warn!("permission prompt send failed: {e}");
        }
        Some(id)
    }

    /// Apply an Allow/Deny press. The first press for a pending id wins.
    pub async fn handle_callback(
        &mut self,
        chat_id: i64,
        message_id: i64,
        callback_id: &str,
        allow: bool,
        id: u64,
    ) {
        if !self.seen.first_time(callback_id) {
            let _ = self.channel.answer_callback(callback_id, None).await;
            return;
        }

        let Some(pending) = self.pending.get(&id).cloned() else {
            let _ = self
                .channel
                .answer_callback(callback_id, Some("This request has expired."))
                .await;
            return;
        };
        self.pending.remove(&id);

        let _ = self
            .channel
            .answer_callback(callback_id, Some("Sending…"))
            .await;

        let verdict = if allow { "✅ Allowed" } else { "❌ Denied" };
        let _ = self
            .channel
            .edit_text(
                chat_id,
                message_id,
                &format!("{verdict}: {} {}", pending.tool_name, pending.summary),
            )
            .await;

        if let Err(e) = self.inject_response(&pending.pane_target, allow).await {
            tracing::warn!(
                session_id = %pending.session_id,
                pane_target = %pending.pane_target,
                "permission answer not delivered: {e:#}"
            );
            let _ = self
                .channel
                .send(
                    chat_id,
                    OutgoingMessage::text("Could not deliver the answer to the terminal."),
                )
                .await;
        } else {
            tracing::debug!(pane_target = %pending.pane_target, allow, "permission answer injected");
        }
    }

    async fn inject_response(&self, pane_target: &str, allow: bool) -> anyhow::Result<()> {
        if !self.bridge.wait_until_ready(pane_target).await {
            anyhow::bail!("menu never appeared in {pane_target}");
        }
        self.bridge
            .type_text(pane_target, if allow { "y" } else { "n" })
            .await
    }

    pub fn sweep(&mut self) -> usize {
        self.pending.sweep().len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.seen.clear();
    }
}

/// Cut to `max` characters, ending in "..." when shortened
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// One-line description of what a tool is about to do
pub fn summarize_tool(tool_name: &str, input: &Map<String, Value>) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);

    match tool_name {
        "Bash" => field("command")
            .map(|cmd| truncate(cmd, 120))
            .unwrap_or_else(|| tool_name.to_string()),
        "Edit" | "Write" | "Read" | "Glob" | "Grep" => field("file_path")
            .or_else(|| field("path"))
            .or_else(|| field("pattern"))
            .unwrap_or(tool_name)
            .to_string(),
        "Agent" => field("description")
            .map(|d| truncate(d, 80))
            .unwrap_or_else(|| tool_name.to_string()),
        _ => tool_name.to_string(),
    }
}
