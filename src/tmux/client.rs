use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use super::{session_name, Key, Multiplexer, PaneInfo};

/// Timeout for quick tmux queries
const CMD_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for calls that type into or capture a pane
const CMD_TIMEOUT_LONG: Duration = Duration::from_secs(5);

const PANE_FORMAT: &str =
    "#{session_name}:#{window_index}.#{pane_index}|#{pane_title}|#{pane_current_path}|#{pane_pid}";

/// Run a command, failing if it does not finish within `timeout`
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.context("subprocess failed to execute"),
        Err(_) => bail!("subprocess timed out after {}ms", timeout.as_millis()),
    }
}

/// Client for interacting with tmux via CLI
pub struct TmuxClient {
    /// Path to tmux binary
    tmux_path: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
        }
    }

    /// Check if the tmux binary can be run at all
    pub async fn is_available(&self) -> bool {
        run_with_timeout(Command::new(&self.tmux_path).arg("-V"), CMD_TIMEOUT)
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let output = run_with_timeout(Command::new(&self.tmux_path).args(args), timeout)
            .await
            .with_context(|| format!("Failed to execute tmux {}", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one `list-panes` line. Titles may contain `|`, so the fixed fields are
/// taken from both ends.
fn parse_pane_line(line: &str) -> Option<PaneInfo> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 4 {
        return None;
    }

    let target = parts[0].to_string();
    let pid = parts[parts.len() - 1].trim().parse().ok()?;
    let cwd = parts[parts.len() - 2].to_string();
    let title = parts[1..parts.len() - 2].join("|");

    Some(PaneInfo {
        target,
        title,
        cwd,
        pid,
    })
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = run_with_timeout(
            Command::new(&self.tmux_path).args(["list-panes", "-a", "-F", PANE_FORMAT]),
            CMD_TIMEOUT_LONG,
        )
        .await
        .context("Failed to execute tmux list-panes")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("no server running") || stderr.contains("no sessions") {
                return Ok(Vec::new());
            }
            bail!("tmux list-panes failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(parse_pane_line)
            .collect())
    }

    async fn has_session(&self, target: &str) -> bool {
        let session = session_name(target);
        if session.is_empty() {
            return false;
        }
        self.run(&["has-session", "-t", session], CMD_TIMEOUT)
            .await
            .is_ok()
    }

    async fn pane_pid(&self, target: &str) -> Result<u32> {
        let out = self
            .run(&["display-message", "-t", target, "-p", "#{pane_pid}"], CMD_TIMEOUT)
            .await?;
        out.trim()
            .parse()
            .with_context(|| format!("unexpected pane_pid output {:?}", out.trim()))
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> Result<String> {
        let start = format!("-{lines}");
        self.run(
            &["capture-pane", "-p", "-t", target, "-S", &start],
            CMD_TIMEOUT_LONG,
        )
        .await
    }

    async fn send_literal(&self, target: &str, text: &str) -> Result<()> {
        let text = text.replace('\r', "");
        self.run(&["send-keys", "-t", target, "-l", "--", &text], CMD_TIMEOUT_LONG)
            .await
            .map(|_| ())
    }

    async fn send_key(&self, target: &str, key: Key) -> Result<()> {
        self.run(&["send-keys", "-t", target, key.as_tmux()], CMD_TIMEOUT_LONG)
            .await
            .map(|_| ())
    }
}
