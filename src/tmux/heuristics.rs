use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Decides from captured pane text whether an agent's interactive menu is on screen.
///
/// Detection is heuristic: a ready menu can be missed (the injection then
/// times out and the user is told), which is accepted rather than treated as
/// a bug to engineer away.
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self, pane_text: &str) -> bool;
}

/// Cursor glyphs, checkboxes and radio buttons drawn by agent selection menus
static RE_MENU_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(❯|\[ \]|\( \)|\(●\)|\[✓\]|>)").expect("menu cue regex is valid")
});

/// Number of trailing lines inspected
const TAIL_LINES: usize = 30;

/// Default probe: looks for a menu cue in the last lines of the pane
pub struct MenuCueProbe {
    pattern: Option<Regex>,
}

impl MenuCueProbe {
    pub fn new() -> Self {
        Self { pattern: None }
    }

    /// Use a custom cue pattern instead of the built-in one
    pub fn with_pattern(pattern: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    /// The probe selected by `[bridge] ready_pattern`, or the built-in cues
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        match &config.ready_pattern {
            Some(pattern) => Self::with_pattern(pattern).map_err(|e| {
                BridgeError::Config(format!("bridge.ready_pattern is not a valid regex: {e}"))
            }),
            None => Ok(Self::new()),
        }
    }

    fn regex(&self) -> &Regex {
        self.pattern.as_ref().unwrap_or(&RE_MENU_CUE)
    }
}

impl Default for MenuCueProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe for MenuCueProbe {
    fn is_ready(&self, pane_text: &str) -> bool {
        let lines: Vec<&str> = pane_text.lines().rev().take(TAIL_LINES).collect();
        let recent = lines.into_iter().rev().collect::<Vec<_>>().join("\n");
        self.regex().is_match(&recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_select_menu() {
        let probe = MenuCueProbe::new();
        assert!(probe.is_ready("Which database?\n❯ 1. Postgres\n  2. SQLite"));
        assert!(probe.is_ready("Pick features\n[ ] auth\n[✓] billing"));
        assert!(probe.is_ready("( ) yes\n(●) no"));
    }

    #[test]
    fn test_plain_output_is_not_ready() {
        let probe = MenuCueProbe::new();
        assert!(!probe.is_ready("Compiling crate v0.1.0\nFinished dev build"));
        assert!(!probe.is_ready(""));
    }

    #[test]
    fn test_only_tail_is_inspected() {
        let probe = MenuCueProbe::new();
        let mut text = String::from("❯ old menu\n");
        for i in 0..40 {
            text.push_str(&format!("log line {i}\n"));
        }
        assert!(!probe.is_ready(&text));
    }

    #[test]
    fn test_from_config() {
        let mut config = BridgeConfig::default();
        assert!(MenuCueProbe::from_config(&config).unwrap().is_ready("❯ 1. Yes"));

        config.ready_pattern = Some(r"Allow this\?".to_string());
        let probe = MenuCueProbe::from_config(&config).unwrap();
        assert!(probe.is_ready("Bash(ls)\nAllow this?"));
        assert!(!probe.is_ready("❯ 1. Yes"));

        config.ready_pattern = Some("[".to_string());
        assert!(MenuCueProbe::from_config(&config).is_err());
    }

    #[test]
    fn test_custom_pattern() {
        let probe = MenuCueProbe::with_pattern(r"Do you want to proceed\?").unwrap();
        assert!(probe.is_ready("Bash(rm -rf target)\nDo you want to proceed?"));
        assert!(!probe.is_ready("❯ 1. Yes"));
    }
}
