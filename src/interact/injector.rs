//! Replays a chosen answer into an agent's selection menu as key presses.
//!
//! Menus start with the cursor on the first option; "Other" is the slot right
//! after the last option.

use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::hook::Question;
use crate::tmux::{Key, TerminalBridge};

/// Pause after activating "Other" so the text box can open
const OTHER_OPEN_DELAY: Duration = Duration::from_millis(200);

/// The human's answer to one question
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
    /// Chosen option indices
    pub indices: Vec<usize>,
    pub other_text: Option<String>,
}

impl Answer {
    pub fn option(index: usize) -> Self {
        Self {
            indices: vec![index],
            other_text: None,
        }
    }

    pub fn other(text: impl Into<String>) -> Self {
        Self {
            indices: Vec::new(),
            other_text: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(Key),
    Pause(Duration),
    Type(String),
}

fn downs(steps: &mut Vec<Step>, count: usize) {
    steps.extend(std::iter::repeat(Step::Key(Key::Down)).take(count));
}

fn other_text_steps(steps: &mut Vec<Step>, text: &str) {
    steps.push(Step::Pause(OTHER_OPEN_DELAY));
    steps.push(Step::Type(text.to_string()));
}

/// Move to the option and press Enter. "Other" types the text and submits it.
pub fn plan_single_select(option_count: usize, answer: &Answer) -> Vec<Step> {
    let mut steps = Vec::new();
    if let Some(text) = &answer.other_text {
        downs(&mut steps, option_count);
        steps.push(Step::Key(Key::Enter));
        other_text_steps(&mut steps, text);
        steps.push(Step::Key(Key::Enter));
    } else if let Some(&index) = answer.indices.first() {
        downs(&mut steps, index);
        steps.push(Step::Key(Key::Enter));
    }
    steps
}

/// Toggle each selected option in ascending order, then submit
pub fn plan_multi_select(option_count: usize, answer: &Answer) -> Vec<Step> {
    let mut indices = answer.indices.clone();
    indices.sort_unstable();
    indices.dedup();

    let mut steps = Vec::new();
    let mut cursor = 0;
    for index in indices {
        downs(&mut steps, index.saturating_sub(cursor));
        steps.push(Step::Key(Key::Space));
        cursor = index;
    }

    if let Some(text) = &answer.other_text {
        downs(&mut steps, option_count.saturating_sub(cursor));
        steps.push(Step::Key(Key::Space));
        steps.push(Step::Key(Key::Enter));
        other_text_steps(&mut steps, text);
    }

    steps.push(Step::Key(Key::Enter));
    steps
}

pub async fn replay(bridge: &TerminalBridge, target: &str, steps: &[Step]) -> anyhow::Result<()> {
    for step in steps {
        match step {
            Step::Key(key) => bridge.press(target, *key).await?,
            Step::Pause(duration) => tokio::time::sleep(*duration).await,
            Step::Type(text) => bridge.type_text(target, text).await?,
        }
    }
    Ok(())
}

/// Wait for the menu, then replay the answer
pub async fn inject_answer(
    bridge: &TerminalBridge,
    target: &str,
    question: &Question,
    answer: &Answer,
) -> Result<()> {
    if !bridge.wait_until_ready(target).await {
        return Err(BridgeError::NotReady(target.to_string()));
    }

    let steps = if question.multi_select {
        plan_multi_select(question.options.len(), answer)
    } else {
        plan_single_select(question.options.len(), answer)
    };
    replay(bridge, target, &steps)
        .await
        .map_err(|e| BridgeError::Tmux(format!("{e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::hook::QuestionOption;
    use crate::tmux::testing::{Call, FakeMux};
    use crate::tmux::MenuCueProbe;
    use std::sync::Arc;
    use Key::{Down, Enter, Space};

    fn keys(steps: &[Step]) -> Vec<Key> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Key(k) => Some(*k),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_multi_select_from_first_option() {
        let answer = Answer {
            indices: vec![4, 0, 2],
            other_text: None,
        };
        let steps = plan_multi_select(5, &answer);
        assert_eq!(
            keys(&steps),
            vec![Space, Down, Down, Space, Down, Down, Space, Enter]
        );
    }

    #[test]
    fn test_multi_select_with_other() {
        let answer = Answer {
            indices: vec![1],
            other_text: Some("custom".to_string()),
        };
        let steps = plan_multi_select(3, &answer);
        assert_eq!(
            steps,
            vec![
                Step::Key(Down),
                Step::Key(Space),
                Step::Key(Down),
                Step::Key(Down),
                Step::Key(Space),
                Step::Key(Enter),
                Step::Pause(OTHER_OPEN_DELAY),
                Step::Type("custom".to_string()),
                Step::Key(Enter),
            ]
        );
    }

    #[test]
    fn test_single_select() {
        assert_eq!(keys(&plan_single_select(4, &Answer::option(2))), vec![Down, Down, Enter]);
        assert_eq!(keys(&plan_single_select(4, &Answer::option(0))), vec![Enter]);
        assert!(plan_single_select(4, &Answer::default()).is_empty());
    }

    #[test]
    fn test_single_select_other_types_and_submits() {
        let steps = plan_single_select(2, &Answer::other("neither"));
        assert_eq!(
            steps,
            vec![
                Step::Key(Down),
                Step::Key(Down),
                Step::Key(Enter),
                Step::Pause(OTHER_OPEN_DELAY),
                Step::Type("neither".to_string()),
                Step::Key(Enter),
            ]
        );
    }

    fn question(multi_select: bool) -> Question {
        Question {
            question: "Pick".to_string(),
            header: String::new(),
            multi_select,
            options: ["a", "b", "c"]
                .iter()
                .map(|l| QuestionOption {
                    label: l.to_string(),
                    description: String::new(),
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inject_answer_drives_pane() {
        let mux = Arc::new(FakeMux::ready());
        let bridge = TerminalBridge::new(
            mux.clone(),
            Arc::new(MenuCueProbe::new()),
            &BridgeConfig::default(),
        );

        inject_answer(&bridge, "dev:0.0", &question(false), &Answer::other("zig"))
            .await
            .unwrap();

        assert_eq!(
            mux.typed(),
            vec![
                Call::Key("dev:0.0".into(), Down),
                Call::Key("dev:0.0".into(), Down),
                Call::Key("dev:0.0".into(), Down),
                Call::Key("dev:0.0".into(), Enter),
                Call::Literal("dev:0.0".into(), "zig".into()),
                Call::Key("dev:0.0".into(), Enter),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_inject_answer_gives_up_when_menu_never_shows() {
        let mux = Arc::new(FakeMux::default());
        let bridge = TerminalBridge::new(
            mux.clone(),
            Arc::new(MenuCueProbe::new()),
            &BridgeConfig::default(),
        );

        let result = inject_answer(&bridge, "dev:0.0", &question(true), &Answer::option(1)).await;
        assert!(matches!(result, Err(BridgeError::NotReady(_))));
        assert!(mux.typed().is_empty());
    }
}
