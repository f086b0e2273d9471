//! Callback payloads carried by inline buttons, and the keyboards that carry them.
//!
//! Payloads must fit Telegram's 64-byte limit, so questions reference their
//! session by the first 8 characters of its id.

use std::collections::BTreeSet;

use crate::channel::Button;
use crate::hook::Question;
use crate::session::short_id;

pub const OTHER_LABEL: &str = "✏️ Other…";

/// What a question button selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Option(usize),
    /// The free-text slot after the last option
    Other,
    /// Multi-select only: submit the toggled set
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionCallback {
    pub multi_select: bool,
    pub short_id: String,
    pub question: usize,
    pub choice: Choice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Question(QuestionCallback),
    Permission { allow: bool, id: u64 },
    /// "Reply" under a stop notification
    Chat { session_id: String },
}

impl Callback {
    pub fn parse(data: &str) -> Option<Self> {
        if let Some(session_id) = data.strip_prefix("chat:") {
            if session_id.is_empty() {
                return None;
            }
            return Some(Callback::Chat {
                session_id: session_id.to_string(),
            });
        }

        let parts: Vec<&str> = data.split(':').collect();
        match parts.as_slice() {
            ["perm", action, id] => {
                let allow = match *action {
                    "a" => true,
                    "d" => false,
                    _ => return None,
                };
                Some(Callback::Permission {
                    allow,
                    id: id.parse().ok()?,
                })
            }
            [prefix @ ("aq" | "am"), sid, question, choice] => {
                let multi_select = *prefix == "am";
                let choice = match *choice {
                    "o" => Choice::Other,
                    "c" if multi_select => Choice::Confirm,
                    n => Choice::Option(n.parse().ok()?),
                };
                Some(Callback::Question(QuestionCallback {
                    multi_select,
                    short_id: sid.to_string(),
                    question: question.parse().ok()?,
                    choice,
                }))
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Callback::Question(cb) => {
                let prefix = if cb.multi_select { "am" } else { "aq" };
                let choice = match cb.choice {
                    Choice::Option(i) => i.to_string(),
                    Choice::Other => "o".to_string(),
                    Choice::Confirm => "c".to_string(),
                };
                format!("{prefix}:{}:{}:{choice}", cb.short_id, cb.question)
            }
            Callback::Permission { allow, id } => {
                format!("perm:{}:{id}", if *allow { "a" } else { "d" })
            }
            Callback::Chat { session_id } => format!("chat:{session_id}"),
        }
    }
}

fn question_data(session_id: &str, question: usize, multi_select: bool, choice: Choice) -> String {
    Callback::Question(QuestionCallback {
        multi_select,
        short_id: short_id(session_id).to_string(),
        question,
        choice,
    })
    .encode()
}

/// One button per option, then "Other"
pub fn single_select_keyboard(session_id: &str, index: usize, question: &Question) -> Vec<Vec<Button>> {
    let mut rows: Vec<Vec<Button>> = question
        .options
        .iter()
        .enumerate()
        .map(|(i, opt)| {
            vec![Button::new(
                &opt.label,
                question_data(session_id, index, false, Choice::Option(i)),
            )]
        })
        .collect();
    rows.push(vec![Button::new(
        OTHER_LABEL,
        question_data(session_id, index, false, Choice::Other),
    )]);
    rows
}

/// Toggle buttons marked with ✓ when selected, "Other", and a confirm button
/// showing how many answers are picked
pub fn multi_select_keyboard(
    session_id: &str,
    index: usize,
    question: &Question,
    selected: &BTreeSet<usize>,
    has_other: bool,
) -> Vec<Vec<Button>> {
    let mark = |on: bool, label: &str| {
        if on {
            format!("✓ {label}")
        } else {
            label.to_string()
        }
    };

    let mut rows: Vec<Vec<Button>> = question
        .options
        .iter()
        .enumerate()
        .map(|(i, opt)| {
            vec![Button::new(
                mark(selected.contains(&i), &opt.label),
                question_data(session_id, index, true, Choice::Option(i)),
            )]
        })
        .collect();
    rows.push(vec![Button::new(
        mark(has_other, OTHER_LABEL),
        question_data(session_id, index, true, Choice::Other),
    )]);

    let count = selected.len() + usize::from(has_other);
    rows.push(vec![Button::new(
        format!("Confirm ({count})"),
        question_data(session_id, index, true, Choice::Confirm),
    )]);
    rows
}

pub fn permission_keyboard(id: u64) -> Vec<Vec<Button>> {
    vec![vec![
        Button::new("✅ Allow", Callback::Permission { allow: true, id }.encode()),
        Button::new("❌ Deny", Callback::Permission { allow: false, id }.encode()),
    ]]
}

pub fn reply_keyboard(session_id: &str) -> Vec<Vec<Button>> {
    vec![vec![Button::new(
        "💬 Reply",
        Callback::Chat {
            session_id: session_id.to_string(),
        }
        .encode(),
    )]]
}
