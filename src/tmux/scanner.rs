//! Finds agent processes living in tmux panes and tells busy from idle.
//!
//! An agent is busy when it has spawned an interactive shell to run a tool.
//! Some agents keep a helper shell alive while idle (e.g. for environment
//! snapshots); those are filtered out by the agent's idle-exclusion pattern.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::client::run_with_timeout;
use super::{Multiplexer, PaneInfo};
use crate::agent::{AgentKind, AgentProvider};
use crate::config::AgentPatternConfig;

/// How far below the pane's root process an agent may sit
const MAX_DESCENDANT_DEPTH: usize = 4;

const PS_TIMEOUT: Duration = Duration::from_secs(3);

static RE_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(bash|zsh|sh|fish)\b").expect("shell regex is valid"));

static RE_PS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s+(\d+)\s+(.+)$").expect("ps line regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
}

/// Snapshot of the process table, indexed by parent pid
#[derive(Debug, Clone, Default)]
pub struct ProcessTree {
    children: HashMap<u32, Vec<ProcessEntry>>,
}

impl ProcessTree {
    /// Parse `ps -e -o pid=,ppid=,command=` output
    pub fn parse(ps_output: &str) -> Self {
        let mut children: HashMap<u32, Vec<ProcessEntry>> = HashMap::new();
        for line in ps_output.lines() {
            let Some(caps) = RE_PS_LINE.captures(line.trim()) else {
                continue;
            };
            let (Ok(pid), Ok(ppid)) = (caps[1].parse(), caps[2].parse()) else {
                continue;
            };
            children.entry(ppid).or_default().push(ProcessEntry {
                pid,
                ppid,
                command: caps[3].to_string(),
            });
        }
        Self { children }
    }

    /// Snapshot the host process table; an empty tree if `ps` fails
    pub async fn capture() -> Self {
        match Self::try_capture().await {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!("process snapshot failed: {e:#}");
                Self::default()
            }
        }
    }

    async fn try_capture() -> Result<Self> {
        let output = run_with_timeout(
            Command::new("ps").args(["-e", "-o", "pid=,ppid=,command="]),
            PS_TIMEOUT,
        )
        .await
        .context("Failed to execute ps")?;
        anyhow::ensure!(output.status.success(), "ps exited with {}", output.status);
        Ok(Self::parse(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn children(&self, pid: u32) -> &[ProcessEntry] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

struct AgentMatcher {
    kind: AgentKind,
    process: Regex,
    idle_exclude: Option<Regex>,
}

/// Compiled per-agent command-line patterns
pub struct AgentPatterns {
    matchers: Vec<AgentMatcher>,
}

impl AgentPatterns {
    /// Built-in patterns, with any overrides from config applied
    pub fn from_config(overrides: &HashMap<String, AgentPatternConfig>) -> Result<Self> {
        let mut matchers = Vec::new();
        for kind in AgentKind::ALL {
            let custom = overrides.get(kind.name());
            let process = custom
                .and_then(|c| c.process_pattern.as_deref())
                .unwrap_or(kind.process_pattern());
            let exclude = custom
                .and_then(|c| c.idle_exclude_pattern.as_deref())
                .or(kind.idle_exclude_pattern());

            matchers.push(AgentMatcher {
                kind,
                process: Regex::new(process)
                    .with_context(|| format!("bad process pattern for {kind}"))?,
                idle_exclude: exclude
                    .map(Regex::new)
                    .transpose()
                    .with_context(|| format!("bad idle exclude pattern for {kind}"))?,
            });
        }
        Ok(Self { matchers })
    }

    fn matcher_for(&self, command: &str) -> Option<&AgentMatcher> {
        self.matchers.iter().find(|m| m.process.is_match(command))
    }

    /// Depth-first search below `root` for the first agent process
    fn find_agent_process<'a>(
        &'a self,
        tree: &'a ProcessTree,
        root: u32,
        depth: usize,
    ) -> Option<(&'a AgentMatcher, &'a ProcessEntry)> {
        if depth >= MAX_DESCENDANT_DEPTH {
            return None;
        }
        for child in tree.children(root) {
            if let Some(matcher) = self.matcher_for(&child.command) {
                return Some((matcher, child));
            }
            if let Some(found) = self.find_agent_process(tree, child.pid, depth + 1) {
                return Some(found);
            }
        }
        None
    }

    /// Which agent, if any, runs below the pane process `root`
    pub fn find_agent(&self, tree: &ProcessTree, root: u32) -> Option<AgentKind> {
        self.find_agent_process(tree, root, 0)
            .map(|(matcher, _)| matcher.kind)
    }

    /// An agent is idle unless one of its direct children is a non-helper shell.
    /// No agent at all counts as not idle.
    pub fn is_agent_idle(&self, tree: &ProcessTree, root: u32) -> bool {
        let Some((matcher, agent)) = self.find_agent_process(tree, root, 0) else {
            return false;
        };

        !tree.children(agent.pid).iter().any(|child| {
            RE_SHELL.is_match(&child.command)
                && !matcher
                    .idle_exclude
                    .as_ref()
                    .is_some_and(|re| re.is_match(&child.command))
        })
    }
}

impl Default for AgentPatterns {
    fn default() -> Self {
        Self::from_config(&HashMap::new()).expect("built-in agent patterns are valid")
    }
}

/// A pane that hosts a recognized agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPane {
    pub pane: PaneInfo,
    pub agent: AgentKind,
    pub idle: bool,
}

/// Result of one scan: agent panes plus the process snapshot used to find them
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub panes: Vec<AgentPane>,
    pub tree: ProcessTree,
}

/// Scans tmux panes for agent processes. Never fails: errors yield empty results.
pub struct PaneScanner {
    mux: Arc<dyn Multiplexer>,
    patterns: AgentPatterns,
}

impl PaneScanner {
    pub fn new(mux: Arc<dyn Multiplexer>, patterns: AgentPatterns) -> Self {
        Self { mux, patterns }
    }

    pub async fn scan(&self) -> ScanOutput {
        let panes = match self.mux.list_panes().await {
            Ok(panes) => panes,
            Err(e) => {
                tracing::debug!("pane listing failed: {e:#}");
                return ScanOutput::default();
            }
        };
        let tree = ProcessTree::capture().await;
        self.classify(panes, tree)
    }

    /// Keep only panes with an agent below them
    pub fn classify(&self, panes: Vec<PaneInfo>, tree: ProcessTree) -> ScanOutput {
        let panes = panes
            .into_iter()
            .filter_map(|pane| {
                let agent = self.patterns.find_agent(&tree, pane.pid)?;
                let idle = self.patterns.is_agent_idle(&tree, pane.pid);
                Some(AgentPane { pane, agent, idle })
            })
            .collect();
        ScanOutput { panes, tree }
    }

    /// Whether the agent in `target` waits at its prompt, from a fresh snapshot
    pub async fn is_idle(&self, target: &str) -> bool {
        let tree = ProcessTree::capture().await;
        self.is_idle_in(target, &tree).await
    }

    pub async fn is_idle_in(&self, target: &str, tree: &ProcessTree) -> bool {
        match self.mux.pane_pid(target).await {
            Ok(pid) => self.patterns.is_agent_idle(tree, pid),
            Err(e) => {
                tracing::debug!(pane_target = target, "pane pid lookup failed: {e:#}");
                false
            }
        }
    }

    /// The pane's session exists and an agent still runs below it
    pub async fn is_agent_alive_in_pane(&self, target: &str, tree: &ProcessTree) -> bool {
        if !self.mux.has_session(target).await {
            return false;
        }
        match self.mux.pane_pid(target).await {
            Ok(pid) => self.patterns.find_agent(tree, pid).is_some(),
            Err(_) => false,
        }
    }
}
