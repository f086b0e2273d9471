mod bridge;
mod client;
mod heuristics;
pub mod scanner;

pub use bridge::TerminalBridge;
pub use client::TmuxClient;
pub use heuristics::{MenuCueProbe, ReadinessProbe};
pub use scanner::{PaneScanner, ScanOutput};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A special key tmux can send by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Up,
    Down,
    Space,
    Enter,
    Escape,
    Tab,
}

impl Key {
    /// Key name as understood by `tmux send-keys`
    pub fn as_tmux(&self) -> &'static str {
        match self {
            Key::Up => "Up",
            Key::Down => "Down",
            Key::Space => "Space",
            Key::Enter => "Enter",
            Key::Escape => "Escape",
            Key::Tab => "Tab",
        }
    }
}

/// One pane as reported by `tmux list-panes -a`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneInfo {
    /// `session:window.pane`
    pub target: String,
    pub title: String,
    pub cwd: String,
    pub pid: u32,
}

/// The terminal multiplexer primitives the bridge drives
#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// Whether the session owning `target` still exists
    async fn has_session(&self, target: &str) -> bool;

    /// PID of the pane's root process
    async fn pane_pid(&self, target: &str) -> Result<u32>;

    /// The last `lines` lines of the pane
    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String>;

    /// Type `text` verbatim, without pressing Enter
    async fn send_literal(&self, target: &str, text: &str) -> Result<()>;

    async fn send_key(&self, target: &str, key: Key) -> Result<()>;
}

/// Session part of a `session:window.pane` target
pub fn session_name(target: &str) -> &str {
    target.split(':').next().unwrap_or(target)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording multiplexer for driving the bridge in tests

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        HasSession(String),
        Literal(String, String),
        Key(String, Key),
        Capture(String),
    }

    #[derive(Default)]
    pub struct FakeMux {
        pub calls: Mutex<Vec<Call>>,
        /// Answers for successive `has_session` probes; `true` once exhausted
        pub liveness: Mutex<VecDeque<bool>>,
        /// Number of upcoming `send_literal` calls that fail
        pub failing_sends: Mutex<u32>,
        /// Pane contents returned by `capture_pane`
        pub screen: Mutex<String>,
        pub panes: Mutex<Vec<PaneInfo>>,
        /// Root pid per pane target. Unset: every pane reports pid 1.
        /// Set: targets missing from the map fail.
        pub pane_pids: Mutex<Option<HashMap<String, u32>>>,
    }

    impl FakeMux {
        pub fn ready() -> Self {
            let mux = Self::default();
            *mux.screen.lock().unwrap() = "❯ 1. Yes\n  2. No".to_string();
            mux
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Only the key and literal calls, in order
        pub fn typed(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Key(..) | Call::Literal(..)))
                .collect()
        }

        pub fn keys(&self) -> Vec<Key> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Key(_, key) => Some(key),
                    _ => None,
                })
                .collect()
        }

        pub fn set_liveness(&self, answers: &[bool]) {
            *self.liveness.lock().unwrap() = answers.iter().copied().collect();
        }

        pub fn set_pane_pids(&self, pids: &[(&str, u32)]) {
            *self.pane_pids.lock().unwrap() = Some(
                pids.iter()
                    .map(|(target, pid)| (target.to_string(), *pid))
                    .collect(),
            );
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMux {
        async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
            Ok(self.panes.lock().unwrap().clone())
        }

        async fn has_session(&self, target: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push(Call::HasSession(target.to_string()));
            self.liveness.lock().unwrap().pop_front().unwrap_or(true)
        }

        async fn pane_pid(&self, target: &str) -> Result<u32> {
            match &*self.pane_pids.lock().unwrap() {
                None => Ok(1),
                Some(pids) => pids
                    .get(target)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("can't find pane: {target}")),
            }
        }

        async fn capture_pane(&self, target: &str, _lines: usize) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Capture(target.to_string()));
            Ok(self.screen.lock().unwrap().clone())
        }

        async fn send_literal(&self, target: &str, text: &str) -> Result<()> {
            {
                let mut failing = self.failing_sends.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    anyhow::bail!("send-keys failed");
                }
            }
            self.calls
                .lock()
                .unwrap()
                .push(Call::Literal(target.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_key(&self, target: &str, key: Key) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Key(target.to_string(), key));
            Ok(())
        }
    }
}
