use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{Key, Multiplexer, ReadinessProbe};
use crate::config::BridgeConfig;

/// Lines captured when polling a pane for readiness
const READY_CAPTURE_LINES: usize = 30;

/// Drives a pane the way a person at the keyboard would
pub struct TerminalBridge {
    mux: Arc<dyn Multiplexer>,
    probe: Arc<dyn ReadinessProbe>,
    key_delay: Duration,
    submit_gap: Duration,
    ready_timeout: Duration,
    ready_poll: Duration,
}

impl TerminalBridge {
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        probe: Arc<dyn ReadinessProbe>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            mux,
            probe,
            key_delay: config.key_delay(),
            submit_gap: config.submit_gap(),
            ready_timeout: config.ready_timeout(),
            ready_poll: config.ready_poll(),
        }
    }

    pub async fn is_alive(&self, target: &str) -> bool {
        self.mux.has_session(target).await
    }

    /// Type `text` as a single line and press the submit sequence.
    ///
    /// Keys in the submit sequence are spaced apart so the UI sees them as
    /// separate presses.
    pub async fn send_message(&self, target: &str, text: &str, submit_keys: &[Key]) -> Result<()> {
        let line = collapse_lines(text);
        if line.is_empty() {
            return Ok(());
        }

        self.mux.send_literal(target, &line).await?;
        for (i, key) in submit_keys.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.submit_gap).await;
            }
            self.mux.send_key(target, *key).await?;
        }
        Ok(())
    }

    /// Type `text` without submitting it
    pub async fn type_text(&self, target: &str, text: &str) -> Result<()> {
        let line = collapse_lines(text);
        if line.is_empty() {
            return Ok(());
        }
        self.mux.send_literal(target, &line).await
    }

    /// Press one key, then give the UI time to process it
    pub async fn press(&self, target: &str, key: Key) -> Result<()> {
        self.mux.send_key(target, key).await?;
        tokio::time::sleep(self.key_delay).await;
        Ok(())
    }

    pub async fn capture(&self, target: &str, lines: usize) -> Result<String> {
        self.mux.capture_pane(target, lines).await
    }

    /// Poll the pane until the readiness probe fires or the timeout passes
    pub async fn wait_until_ready(&self, target: &str) -> bool {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            // Capture errors just mean the pane is not ready yet
            if let Ok(content) = self.capture(target, READY_CAPTURE_LINES).await {
                if self.probe.is_ready(&content) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                tracing::debug!(pane_target = target, "pane never showed a menu");
                return false;
            }
            tokio::time::sleep(self.ready_poll).await;
        }
    }
}

/// Join lines with spaces; a newline would submit the message early
fn collapse_lines(text: &str) -> String {
    text.split('\n')
        .map(|part| part.trim_end_matches('\r'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
