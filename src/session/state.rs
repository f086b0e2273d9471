use std::sync::Arc;
use std::time::Duration;

use super::{SessionRegistry, SessionState};
use crate::agent::AgentProvider;
use crate::config::BridgeConfig;
use crate::error::InjectError;
use crate::tmux::TerminalBridge;

/// Owns the Idle/Busy state machine and the message injection protocol
pub struct SessionStateManager {
    registry: SessionRegistry,
    bridge: Arc<TerminalBridge>,
    send_retries: u32,
    retry_delay: Duration,
    max_message_len: usize,
}

impl SessionStateManager {
    pub fn new(bridge: Arc<TerminalBridge>, config: &BridgeConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            bridge,
            send_retries: config.send_retries,
            retry_delay: config.retry_delay(),
            max_message_len: config.max_message_len,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// The agent finished its turn
    pub fn on_stop_hook(&mut self, session_id: &str, model: Option<&str>) -> bool {
        if !self.registry.update_state(session_id, SessionState::Idle) {
            return false;
        }
        if let Some(model) = model {
            self.registry.update_model(session_id, model);
        }
        self.registry.touch(session_id);
        tracing::debug!(session_id, "session idle");
        true
    }

    /// Promote an idle session whose agent was seen running a tool.
    /// Scans never demote; only a stop hook makes a session idle.
    pub fn mark_busy_from_scan(&mut self, session_id: &str) -> bool {
        match self.registry.get_by_session_id(session_id) {
            Some(session) if session.state == SessionState::Idle => {
                tracing::debug!(session_id, "scan saw a tool shell, marking busy");
                self.registry.update_state(session_id, SessionState::Busy)
            }
            _ => false,
        }
    }

    /// Type `text` into the session's pane and submit it.
    ///
    /// Busy sessions reject the message outright; nothing is queued.
    pub async fn inject_message(&mut self, session_id: &str, text: &str) -> Result<(), InjectError> {
        let session = self
            .registry
            .get_by_session_id(session_id)
            .ok_or(InjectError::SessionNotFound)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(InjectError::Empty);
        }
        if session.state == SessionState::Busy {
            return Err(InjectError::Busy);
        }

        let pane_target = session.pane_target.clone();
        let submit_keys = session.agent.submit_keys();

        if !self.probe_liveness(&pane_target).await {
            tracing::warn!(session_id, pane_target, "pane is gone, dropping session");
            self.registry.unregister(session_id);
            return Err(InjectError::PaneDead);
        }

        let message = truncate_chars(text, self.max_message_len);
        let mut attempt = 0;
        loop {
            match self
                .bridge
                .send_message(&pane_target, message, submit_keys)
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < self.send_retries => {
                    attempt += 1;
                    tracing::debug!(session_id, attempt, "send failed, retrying: {e:#}");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::warn!(session_id, pane_target, "send failed: {e:#}");
                    return Err(InjectError::PaneDead);
                }
            }
        }

        self.registry.update_state(session_id, SessionState::Busy);
        self.registry.touch(session_id);
        tracing::info!(session_id, pane_target, chars = message.chars().count(), "message injected");
        Ok(())
    }

    async fn probe_liveness(&self, pane_target: &str) -> bool {
        for attempt in 0..=self.send_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            if self.bridge.is_alive(pane_target).await {
                return true;
            }
            tracing::debug!(pane_target, attempt, "liveness probe failed");
        }
        false
    }
}

/// Longest prefix of `text` with at most `max` characters
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
