use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::injector::{inject_answer, Answer};
use super::keyboard::{multi_select_keyboard, single_select_keyboard, Choice, QuestionCallback, OTHER_LABEL};
use super::SeenCallbacks;
use crate::cache::ExpiringMap;
use crate::channel::{ChatChannel, OutgoingMessage};
use crate::hook::{AskUserQuestionEvent, Question};
use crate::session::short_id;
use crate::tmux::TerminalBridge;

const EXPIRED: &str = "This question has expired.";
const SENDING: &str = "Sending…";

/// A question sequence waiting on the human
#[derive(Debug, Clone)]
struct PendingQuestion {
    session_id: String,
    pane_target: String,
    project: String,
    questions: Vec<Question>,
    current: usize,
    answers: HashMap<usize, Answer>,
    /// Chat message showing each question
    message_ids: HashMap<usize, i64>,
    /// Toggled options of multi-select questions
    selections: HashMap<usize, BTreeSet<usize>>,
}

impl PendingQuestion {
    fn header(&self, index: usize) -> String {
        let mut header = format!("❓ Question {}/{}", index + 1, self.questions.len());
        if let Some(q) = self.questions.get(index) {
            if !q.header.is_empty() {
                header.push_str(&format!(" [{}]", q.header));
            }
        }
        header
    }
}

/// A force-reply prompt collecting "Other" text
#[derive(Debug, Clone)]
struct PendingOther {
    session_id: String,
    question: usize,
    multi_select: bool,
}

/// Walks the human through an agent's question form, one question at a time
pub struct AskQuestionHandler {
    channel: Arc<dyn ChatChannel>,
    bridge: Arc<TerminalBridge>,
    /// Keyed by session id
    pending: ExpiringMap<String, PendingQuestion>,
    /// Keyed by (chat id, prompt message id)
    others: ExpiringMap<(i64, i64), PendingOther>,
    seen: SeenCallbacks,
    advance_delay: Duration,
}

impl AskQuestionHandler {
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        bridge: Arc<TerminalBridge>,
        ttl: Duration,
        capacity: usize,
        advance_delay: Duration,
    ) -> Self {
        Self {
            channel,
            bridge,
            pending: ExpiringMap::new(ttl, capacity),
            others: ExpiringMap::new(ttl, capacity),
            seen: SeenCallbacks::default(),
            advance_delay,
        }
    }

    /// Start a question sequence, replacing any unfinished one for the session
    pub async fn forward_question(&mut self, chat_id: i64, event: &AskUserQuestionEvent, project: &str) {
        let Some(pane_target) = event.pane_target.clone() else {
            tracing::debug!(session_id = %event.session_id, "question without pane, dropped");
            return;
        };
        if event.questions.is_empty() {
            return;
        }

        let pending = PendingQuestion {
            session_id: event.session_id.clone(),
            pane_target,
            project: project.to_string(),
            questions: event.questions.clone(),
            current: 0,
            answers: HashMap::new(),
            message_ids: HashMap::new(),
            selections: HashMap::new(),
        };
        if let Some(evicted) = self.pending.insert(event.session_id.clone(), pending) {
            tracing::debug!(session_id = %evicted, "oldest question sequence evicted");
        }
        tracing::info!(
            session_id = %event.session_id,
            questions = event.questions.len(),
            "forwarding questions"
        );
        self.send_question(chat_id, &event.session_id, 0).await;
    }

    pub async fn handle_callback(
        &mut self,
        chat_id: i64,
        message_id: i64,
        callback_id: &str,
        callback: &QuestionCallback,
    ) {
        if !self.seen.first_time(callback_id) {
            let _ = self.channel.answer_callback(callback_id, None).await;
            return;
        }

        let Some(session_id) = self
            .pending
            .find_key(|sid, _| short_id(sid) == callback.short_id)
        else {
            let _ = self.channel.answer_callback(callback_id, Some(EXPIRED)).await;
            return;
        };
        let Some(pending) = self.pending.get_mut(&session_id) else {
            return;
        };

        let index = callback.question;
        if index != pending.current {
            tracing::debug!(%session_id, index, current = pending.current, "stale question callback");
            let _ = self.channel.answer_callback(callback_id, None).await;
            return;
        }
        let Some(question) = pending.questions.get(index).cloned() else {
            return;
        };
        if question.multi_select != callback.multi_select {
            let _ = self.channel.answer_callback(callback_id, None).await;
            return;
        }

        match callback.choice {
            Choice::Other => {
                let _ = self.channel.answer_callback(callback_id, None).await;
                self.prompt_for_other(chat_id, &session_id, index, question.multi_select)
                    .await;
            }
            Choice::Option(option) if option >= question.options.len() => {
                let _ = self.channel.answer_callback(callback_id, None).await;
            }
            Choice::Option(option) if !question.multi_select => {
                let _ = self.channel.answer_callback(callback_id, Some(SENDING)).await;
                pending.answers.insert(index, Answer::option(option));
                let text = format!(
                    "{}\n\n✅ Selected: {}",
                    pending.header(index),
                    question.options[option].label
                );
                self.show_final(chat_id, &session_id, index, &text).await;
                self.inject_and_advance(chat_id, &session_id).await;
            }
            Choice::Option(option) => {
                let selected = pending.selections.entry(index).or_default();
                if !selected.remove(&option) {
                    selected.insert(option);
                }
                let has_other = pending
                    .answers
                    .get(&index)
                    .is_some_and(|a| a.other_text.is_some());
                let keyboard = multi_select_keyboard(
                    &session_id,
                    index,
                    &question,
                    selected,
                    has_other,
                );
                let _ = self.channel.answer_callback(callback_id, None).await;
                let _ = self
                    .channel
                    .edit_buttons(chat_id, message_id, keyboard)
                    .await;
            }
            Choice::Confirm => {
                let _ = self.channel.answer_callback(callback_id, Some(SENDING)).await;
                let indices: Vec<usize> = pending
                    .selections
                    .get(&index)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                let other_text = pending.answers.get(&index).and_then(|a| a.other_text.clone());

                let mut labels: Vec<String> = indices
                    .iter()
                    .filter_map(|&i| question.options.get(i).map(|o| o.label.clone()))
                    .collect();
                labels.extend(other_text.clone());
                pending.answers.insert(index, Answer { indices, other_text });

                let text = format!("{}\n\n✅ Selected: {}", pending.header(index), labels.join(", "));
                self.show_final(chat_id, &session_id, index, &text).await;
                self.inject_and_advance(chat_id, &session_id).await;
            }
        }
    }

    /// Whether `reply_to` is an "Other" prompt this handler is waiting on
    pub fn has_pending_other(&self, chat_id: i64, reply_to: i64) -> bool {
        self.others.contains_key(&(chat_id, reply_to))
    }

    /// Handle text typed in answer to an "Other" prompt. False if not ours.
    pub async fn handle_other_reply(&mut self, chat_id: i64, reply_to: i64, text: &str) -> bool {
        let key = (chat_id, reply_to);
        if !self.others.contains_key(&key) {
            return false;
        }
        let Some(other) = self.others.remove(&key) else {
            return false;
        };
        let Some(pending) = self.pending.get_mut(&other.session_id) else {
            return false;
        };
        let index = other.question;
        if index != pending.current {
            return true;
        }
        let Some(question) = pending.questions.get(index).cloned() else {
            return true;
        };

        if other.multi_select {
            pending.answers.entry(index).or_default().other_text = Some(text.to_string());
            let selected = pending.selections.get(&index).cloned().unwrap_or_default();
            if let Some(&message_id) = pending.message_ids.get(&index) {
                let keyboard =
                    multi_select_keyboard(&other.session_id, index, &question, &selected, true);
                let _ = self
                    .channel
                    .edit_buttons(chat_id, message_id, keyboard)
                    .await;
            }
            return true;
        }

        pending.answers.insert(index, Answer::other(text));
        let final_text = format!("{}\n\n✅ Selected: {text}", pending.header(index));
        self.show_final(chat_id, &other.session_id, index, &final_text)
            .await;
        self.inject_and_advance(chat_id, &other.session_id).await;
        true
    }

    async fn send_question(&mut self, chat_id: i64, session_id: &str, index: usize) {
        let Some(pending) = self.pending.get_mut(&session_id.to_string()) else {
            return;
        };
        let Some(question) = pending.questions.get(index) else {
            return;
        };

        let hint = if question.multi_select {
            "Toggle the answers you want, then confirm."
        } else {
            "Pick one answer."
        };
        let text = format!(
            "{}\n{}\n\n{}\n\n{hint}",
            pending.header(index),
            pending.project,
            question.question
        );
        let keyboard = if question.multi_select {
            multi_select_keyboard(session_id, index, question, &BTreeSet::new(), false)
        } else {
            single_select_keyboard(session_id, index, question)
        };

        match self
            .channel
            .send(chat_id, OutgoingMessage::text(text).with_buttons(keyboard))
            .await
        {
            Ok(message_id) => {
                pending.message_ids.insert(index, message_id);
                if question.multi_select {
                    pending.selections.insert(index, BTreeSet::new());
                }
            }
            Err(e) => tracing::warn!(session_id, "question send failed: {e}"),
        }
    }

    async fn prompt_for_other(&mut self, chat_id: i64, session_id: &str, question: usize, multi_select: bool) {
        let message = OutgoingMessage::text(OTHER_LABEL).with_force_reply("Type your answer...");
        match self.channel.send(chat_id, message).await {
            Ok(prompt_id) => {
                self.others.insert(
                    (chat_id, prompt_id),
                    PendingOther {
                        session_id: session_id.to_string(),
                        question,
                        multi_select,
                    },
                );
            }
            Err(e) => tracing::warn!(session_id, "other prompt send failed: {e}"),
        }
    }

    /// Replace the question's buttons with the final selection
    async fn show_final(&self, chat_id: i64, session_id: &str, index: usize, text: &str) {
        let message_id = self
            .pending
            .get(&session_id.to_string())
            .and_then(|p| p.message_ids.get(&index).copied());
        if let Some(message_id) = message_id {
            let _ = self.channel.edit_text(chat_id, message_id, text).await;
        }
    }

    /// Replay the current answer, then move to the next question or finish.
    /// A failed replay ends the whole sequence.
    async fn inject_and_advance(&mut self, chat_id: i64, session_id: &str) {
        let key = session_id.to_string();
        let Some(pending) = self.pending.get(&key) else {
            return;
        };
        let index = pending.current;
        let (Some(question), Some(answer)) = (
            pending.questions.get(index).cloned(),
            pending.answers.get(&index).cloned(),
        ) else {
            return;
        };
        let pane_target = pending.pane_target.clone();

        if let Err(e) = inject_answer(&self.bridge, &pane_target, &question, &answer).await {
            tracing::warn!(session_id, pane_target, "answer not delivered: {e}");
            self.pending.remove(&key);
            let _ = self
                .channel
                .send(
                    chat_id,
                    OutgoingMessage::text("Could not deliver the answer to the terminal."),
                )
                .await;
            return;
        }

        let Some(pending) = self.pending.get_mut(&key) else {
            return;
        };
        pending.current += 1;
        if pending.current >= pending.questions.len() {
            self.pending.remove(&key);
            tracing::info!(session_id, "all questions answered");
            let _ = self
                .channel
                .send(chat_id, OutgoingMessage::text("✅ All questions answered."))
                .await;
            return;
        }

        let next = pending.current;
        tokio::time::sleep(self.advance_delay).await;
        self.send_question(chat_id, session_id, next).await;
    }

    pub fn sweep(&mut self) -> usize {
        self.pending.sweep().len() + self.others.sweep().len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.others.clear();
        self.seen.clear();
    }
}
