//! The control loop's state: sessions, pending interactions and the chat binding

use std::sync::Arc;

use crate::actions::Action;
use crate::agent::{AgentKind, AgentProvider};
use crate::channel::{ChatChannel, ChatUpdate, OutgoingMessage};
use crate::config::Config;
use crate::error::InjectError;
use crate::hook::events::project_name_from_cwd;
use crate::hook::{
    AskUserQuestionEvent, HookKind, NotificationEvent, PermissionRequestEvent, RawHook,
    SessionStartEvent, StopEvent,
};
use crate::interact::keyboard::{reply_keyboard, Callback};
use crate::interact::{AskQuestionHandler, PendingReplyStore, PermissionHandler};
use crate::session::{SessionResolver, SessionState, SessionStateManager, TrackedSession};
use crate::tmux::{Multiplexer, PaneScanner, ReadinessProbe, ScanOutput, TerminalBridge};

/// Characters of the agent's last message shown in a stop notification
const SUMMARY_CHARS: usize = 150;

pub struct Bridge {
    state: SessionStateManager,
    resolver: SessionResolver,
    questions: AskQuestionHandler,
    permissions: PermissionHandler,
    replies: PendingReplyStore,
    channel: Arc<dyn ChatChannel>,
    scanner: Arc<PaneScanner>,
    chat_id: Option<i64>,
}

impl Bridge {
    pub fn new(
        config: &Config,
        mux: Arc<dyn Multiplexer>,
        probe: Arc<dyn ReadinessProbe>,
        channel: Arc<dyn ChatChannel>,
        scanner: Arc<PaneScanner>,
    ) -> Self {
        let tuning = &config.bridge;
        let terminal = Arc::new(TerminalBridge::new(mux, probe, tuning));

        Self {
            state: SessionStateManager::new(terminal.clone(), tuning),
            resolver: SessionResolver::new(tuning.identity_cache_size),
            questions: AskQuestionHandler::new(
                channel.clone(),
                terminal.clone(),
                tuning.pending_ttl(),
                tuning.max_pending,
                tuning.question_advance(),
            ),
            permissions: PermissionHandler::new(
                channel.clone(),
                terminal,
                tuning.pending_ttl(),
                tuning.max_pending,
            ),
            replies: PendingReplyStore::new(tuning.pending_ttl()),
            channel,
            scanner,
            chat_id: config.telegram.chat_id,
        }
    }

    /// Process one action. Returns true when the loop should stop.
    pub async fn handle_action(&mut self, action: Action) -> bool {
        match action {
            Action::Hook(hook) => self.handle_hook(hook).await,
            Action::Chat(update) => self.handle_chat_update(update).await,
            Action::Scan(scan) => self.reconcile(scan).await,
            Action::Sweep => self.sweep(),
            Action::Quit => return true,
        }
        false
    }

    /// Validate a raw hook payload and dispatch it; malformed payloads are dropped
    pub async fn handle_hook(&mut self, hook: RawHook) {
        let RawHook {
            kind,
            agent,
            payload,
        } = hook;

        match kind {
            HookKind::Stop => {
                let delay = agent.settle_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match agent.parse_stop_event(&payload) {
                    Some(event) => self.handle_stop_event(event).await,
                    None => tracing::debug!(%agent, "malformed stop payload dropped"),
                }
            }
            HookKind::SessionStart => match SessionStartEvent::parse(&payload) {
                Some(event) => self.handle_session_start(event, agent),
                None => tracing::debug!(%agent, "malformed session-start payload dropped"),
            },
            HookKind::AskUserQuestion => match AskUserQuestionEvent::parse(&payload) {
                Some(event) => self.handle_ask_user_question(event).await,
                None => tracing::debug!(%agent, "malformed question payload dropped"),
            },
            HookKind::PermissionRequest => match PermissionRequestEvent::parse(&payload) {
                Some(event) => self.handle_permission_request(event).await,
                None => tracing::debug!(%agent, "malformed permission payload dropped"),
            },
            HookKind::Notification => match NotificationEvent::parse(&payload) {
                Some(event) => self.handle_notification(event).await,
                None => tracing::debug!(%agent, "malformed notification payload dropped"),
            },
        }
    }

    /// The agent finished a turn: mark it idle and offer a reply button
    pub async fn handle_stop_event(&mut self, event: StopEvent) {
        let project = event.project_name();
        tracing::debug!(
            agent = %event.agent,
            agent_session_id = event.agent_session_id.as_deref().unwrap_or("none"),
            pane_target = event.pane_target.as_deref().unwrap_or("none"),
            project,
            "stop event"
        );

        let mut session_id = self.resolver.resolve_session_id(
            self.state.registry(),
            event.agent_session_id.as_deref(),
            &project,
            event.cwd.as_deref(),
            event.pane_target.as_deref(),
        );

        // First sighting of an agent in a known pane
        if session_id.is_none() {
            if let Some(pane_target) = &event.pane_target {
                let id = event
                    .agent_session_id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                self.track(TrackedSession::new(
                    &id,
                    pane_target,
                    event.cwd.clone().unwrap_or_default(),
                    event.agent,
                ));
                session_id = Some(id);
            }
        }

        if let Some(id) = &session_id {
            self.state.on_stop_hook(id, event.model.as_deref());
        }

        let mut text = format!("📦 {project}\n🐾 {}\n\n", event.agent.display_name());
        match event.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(summary) => text.push_str(&snippet(summary)),
            None => text.push_str("✅ Task done"),
        }
        if let Some(model) = &event.model {
            text.push_str(&format!("\n\n🤖 {model}"));
        }

        let mut message = OutgoingMessage::text(text);
        if let Some(id) = &session_id {
            message = message.with_buttons(reply_keyboard(id));
        }
        self.notify(message).await;
    }

    /// Track the session reported by a session-start hook
    pub fn handle_session_start(&mut self, event: SessionStartEvent, agent: AgentKind) {
        let Some(pane_target) = event.pane_target else {
            tracing::debug!(session_id = %event.session_id, "session start without pane, ignored");
            return;
        };

        let mut session = TrackedSession::new(
            &event.session_id,
            &pane_target,
            event.cwd.unwrap_or_default(),
            agent,
        );
        session.model = event.model;
        tracing::info!(session_id = %event.session_id, pane_target, %agent, "session started");
        self.track(session);
    }

    pub async fn handle_ask_user_question(&mut self, mut event: AskUserQuestionEvent) {
        let Some(chat_id) = self.require_chat() else {
            return;
        };
        let project = self.resolve_event(&mut event.session_id, &mut event.pane_target, event.cwd.as_deref());
        self.questions.forward_question(chat_id, &event, &project).await;
    }

    pub async fn handle_permission_request(&mut self, mut event: PermissionRequestEvent) {
        let Some(chat_id) = self.require_chat() else {
            return;
        };
        let project = self.resolve_event(&mut event.session_id, &mut event.pane_target, event.cwd.as_deref());
        self.permissions
            .forward_permission(chat_id, &event, &project)
            .await;
    }

    pub async fn handle_notification(&mut self, mut event: NotificationEvent) {
        let project = self.resolve_event(&mut event.session_id, &mut event.pane_target, event.cwd.as_deref());
        tracing::debug!(session_id = %event.session_id, kind = %event.notification_type, "notification");

        let mut text = format!("🔔 {project}");
        if let Some(title) = &event.title {
            text.push_str(&format!("\n{title}"));
        }
        text.push_str(&format!("\n\n{}", event.message));
        self.notify(OutgoingMessage::text(text)).await;
    }

    pub async fn handle_chat_update(&mut self, update: ChatUpdate) {
        match update {
            ChatUpdate::Start { chat_id } => {
                let text = if self.chat_id == Some(chat_id) {
                    "Already connected."
                } else {
                    self.chat_id = Some(chat_id);
                    tracing::info!(chat_id, "chat bound");
                    "✅ Ready. Agent notifications will arrive here."
                };
                if let Err(e) = self.channel.send(chat_id, OutgoingMessage::text(text)).await {
                    tracing::warn!("chat send failed: {e}");
                }
            }
            ChatUpdate::Callback {
                id,
                data,
                chat_id,
                message_id,
            } => match Callback::parse(&data) {
                Some(Callback::Question(callback)) => {
                    self.questions
                        .handle_callback(chat_id, message_id, &id, &callback)
                        .await;
                }
                Some(Callback::Permission { allow, id: pending_id }) => {
                    self.permissions
                        .handle_callback(chat_id, message_id, &id, allow, pending_id)
                        .await;
                }
                Some(Callback::Chat { session_id }) => {
                    self.open_reply(chat_id, message_id, &id, &session_id).await;
                }
                None => {
                    tracing::debug!(data, "unknown callback data");
                    let _ = self.channel.answer_callback(&id, None).await;
                }
            },
            ChatUpdate::Text {
                chat_id,
                text,
                reply_to,
                ..
            } => {
                let Some(reply_to) = reply_to else {
                    tracing::debug!("chat text outside a reply ignored");
                    return;
                };
                if self.questions.has_pending_other(chat_id, reply_to) {
                    self.questions
                        .handle_other_reply(chat_id, reply_to, &text)
                        .await;
                    return;
                }
                if let Some(pending) = self.replies.take(chat_id, reply_to) {
                    self.deliver_reply(chat_id, &pending.session_id, &pending.project, &text)
                        .await;
                }
            }
        }
    }

    /// Fold a pane scan into the registry.
    ///
    /// New agent panes are tracked, idle sessions seen running a tool become
    /// busy, and sessions whose agent is gone from its pane are dropped.
    pub async fn reconcile(&mut self, scan: ScanOutput) {
        for pane in &scan.panes {
            let tracked = self
                .state
                .registry()
                .get_by_pane_target(&pane.pane.target)
                .map(|s| s.session_id.clone());

            match tracked {
                Some(session_id) => {
                    if !pane.idle {
                        self.state.mark_busy_from_scan(&session_id);
                    }
                }
                None => {
                    let state = if pane.idle {
                        SessionState::Idle
                    } else {
                        SessionState::Busy
                    };
                    let session = TrackedSession::new(
                        uuid::Uuid::new_v4().to_string(),
                        &pane.pane.target,
                        &pane.pane.cwd,
                        pane.agent,
                    )
                    .with_state(state);
                    tracing::info!(
                        session_id = %session.session_id,
                        pane_target = %pane.pane.target,
                        agent = %pane.agent,
                        "agent pane discovered"
                    );
                    self.track(session);
                }
            }
        }

        // Without a process snapshot nothing can be confirmed dead
        if scan.tree.is_empty() {
            return;
        }

        let missing: Vec<(String, String)> = self
            .state
            .registry()
            .get_all_active()
            .into_iter()
            .filter(|s| !scan.panes.iter().any(|p| p.pane.target == s.pane_target))
            .map(|s| (s.session_id.clone(), s.pane_target.clone()))
            .collect();

        for (session_id, pane_target) in missing {
            if self
                .scanner
                .is_agent_alive_in_pane(&pane_target, &scan.tree)
                .await
            {
                continue;
            }
            tracing::info!(session_id, pane_target, "agent gone from pane, dropping session");
            self.state.registry_mut().unregister(&session_id);
            self.resolver.forget_session(&session_id);
        }
    }

    /// Drop expired pending interactions and cached identities
    pub fn sweep(&mut self) {
        let expired = self.questions.sweep()
            + self.permissions.sweep()
            + self.replies.sweep()
            + self.resolver.sweep();
        if expired > 0 {
            tracing::debug!(expired, "expired pending entries swept");
        }
    }

    pub fn shutdown(&mut self) {
        self.questions.clear();
        self.permissions.clear();
        self.replies.clear();
        self.resolver.clear();
        self.state.registry_mut().clear();
        tracing::info!("bridge state cleared");
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat_id
    }

    fn track(&mut self, session: TrackedSession) {
        if let Some(replaced) = self.state.registry_mut().register(session) {
            self.resolver.forget_session(&replaced);
        }
    }

    fn require_chat(&self) -> Option<i64> {
        if self.chat_id.is_none() {
            tracing::info!("no chat bound yet, send /start to the bot");
        }
        self.chat_id
    }

    /// Map an event's agent session id onto the tracked session, filling in
    /// the pane when only the registry knows it. Returns the project name.
    fn resolve_event(
        &mut self,
        session_id: &mut String,
        pane_target: &mut Option<String>,
        cwd: Option<&str>,
    ) -> String {
        let project = cwd
            .map(project_name_from_cwd)
            .unwrap_or_else(|| "unknown".to_string());

        let resolved = self.resolver.resolve_session_id(
            self.state.registry(),
            Some(session_id.as_str()),
            &project,
            cwd,
            pane_target.as_deref(),
        );
        if let Some(resolved) = resolved {
            tracing::debug!(agent_session_id = %session_id, session_id = %resolved, "event resolved");
            *session_id = resolved;
        }

        match self.state.registry().get_by_session_id(session_id) {
            Some(session) => {
                if pane_target.is_none() {
                    *pane_target = Some(session.pane_target.clone());
                }
                session.project.clone()
            }
            None => project,
        }
    }

    async fn notify(&self, message: OutgoingMessage) {
        let Some(chat_id) = self.require_chat() else {
            return;
        };
        if let Err(e) = self.channel.send(chat_id, message).await {
            tracing::warn!("notification send failed: {e}");
        }
    }

    /// "Reply" pressed: open a force-reply prompt bound to the session
    async fn open_reply(&mut self, chat_id: i64, message_id: i64, callback_id: &str, session_id: &str) {
        let Some(session) = self.state.registry().get_by_session_id(session_id) else {
            let _ = self
                .channel
                .answer_callback(callback_id, Some("This session has ended."))
                .await;
            return;
        };
        let project = session.project.clone();
        let placeholder = format!("{project} → {}", session.agent.display_name());

        let prompt = OutgoingMessage::text(format!(
            "💬 {project}\nReply to this message to send it to the agent."
        ))
        .with_force_reply(placeholder)
        .reply_to(message_id);

        match self.channel.send(chat_id, prompt).await {
            Ok(prompt_id) => self.replies.set(chat_id, prompt_id, session_id, &project),
            Err(e) => tracing::warn!(session_id, "reply prompt send failed: {e}"),
        }
        let _ = self.channel.answer_callback(callback_id, None).await;
    }

    async fn deliver_reply(&mut self, chat_id: i64, session_id: &str, project: &str, text: &str) {
        let outcome = match self.state.inject_message(session_id, text).await {
            Ok(()) => format!("✅ Sent to {project}."),
            Err(InjectError::Empty) => return,
            Err(InjectError::Busy) => "⏳ The agent is busy. Try again once it stops.".to_string(),
            Err(InjectError::SessionNotFound) => {
                "This session has ended or expired.".to_string()
            }
            Err(InjectError::PaneDead) => {
                self.resolver.forget_session(session_id);
                "The tmux pane is gone.".to_string()
            }
        };
        if let Err(e) = self
            .channel
            .send(chat_id, OutgoingMessage::text(outcome))
            .await
        {
            tracing::warn!("chat send failed: {e}");
        }
    }
}

/// Start of the agent's last message, marked as cut
fn snippet(text: &str) -> String {
    let cut: String = text.chars().take(SUMMARY_CHARS).collect();
    if cut.len() < text.len() {
        format!("{cut}...")
    } else {
        cut
    }
}
