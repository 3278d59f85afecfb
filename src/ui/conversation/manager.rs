use crate::client::{ChatRequest, ChatTransport};
use crate::config::UiConfig;
use crate::error::ExchangeError;
use crate::events::{BubbleHandle, ConversationRole, ExchangeOutcome, SendStatus};
use crate::session::Session;
use crate::ui::conversation::composer::ConversationResult;
use crate::ui::conversation::history::sanitize_for_terminal;
use crate::ui::conversation::{get_help_text, ConversationComposer, ConversationHistory, ParsedCommand, SlashCommand};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Widget,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Text of the provisional bubble shown while a reply is pending
pub const PLACEHOLDER_TEXT: &str = "Thinking...";
/// Shown instead of a reply when the exchange fails, whatever the cause
pub const ERROR_TEXT: &str = "Error: Could not reach the agent.";
/// The single bubble left after a reset
pub const RESET_TEXT: &str = "Session reset. New Thread ID generated.";

/// Actions that can be requested by the conversation manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationAction {
    None,
    Exit,
}

/// A send that has echoed the user's text and shown its placeholder, and
/// now waits for the network.
#[derive(Debug, Clone)]
#[must_use = "a pending exchange must be finished or its placeholder is orphaned"]
pub struct PendingExchange {
    placeholder: BubbleHandle,
    request: ChatRequest,
}

impl PendingExchange {
    pub fn placeholder(&self) -> BubbleHandle {
        self.placeholder
    }

    pub fn request(&self) -> &ChatRequest {
        &self.request
    }
}

/// Owned by the task running an exchange. Reports the outcome exactly once:
/// through [`ExchangeGuard::complete`], or as [`ExchangeError::Abandoned`]
/// when dropped without completing (panic, runtime shutdown).
#[derive(Debug)]
pub struct ExchangeGuard {
    placeholder: BubbleHandle,
    tx: Option<mpsc::UnboundedSender<ExchangeOutcome>>,
}

impl ExchangeGuard {
    pub fn complete(mut self, result: Result<String, ExchangeError>) {
        self.report(result);
    }

    fn report(&mut self, result: Result<String, ExchangeError>) {
        if let Some(tx) = self.tx.take() {
            // receiver gone means the widget is shutting down
            let _ = tx.send(ExchangeOutcome {
                placeholder: self.placeholder,
                result,
            });
        }
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(placeholder = %self.placeholder, "exchange dropped before reporting");
            self.report(Err(ExchangeError::Abandoned));
        }
    }
}

/// Owns the rendered conversation and drives the send flow
pub struct ConversationManager {
    history: ConversationHistory,
    composer: ConversationComposer,
    session: Session,
    transport: Arc<dyn ChatTransport>,
    outcome_tx: mpsc::UnboundedSender<ExchangeOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ExchangeOutcome>,
    /// Placeholders of exchanges that have not finished yet
    in_flight: HashSet<BubbleHandle>,
    endpoint_label: String,
}

impl ConversationManager {
    /// Build the controller. This is the startup boundary: the session gets
    /// its thread id here if it has none.
    pub fn new(mut session: Session, transport: Arc<dyn ChatTransport>, ui: &UiConfig) -> Self {
        session.ensure_thread_id();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        Self {
            history: ConversationHistory::new().with_timestamps(ui.show_timestamps),
            composer: ConversationComposer::new("Ask the vendor agent something..."),
            session,
            transport,
            outcome_tx,
            outcome_rx,
            in_flight: HashSet::new(),
            endpoint_label: String::new(),
        }
    }

    /// Endpoint shown in the header
    pub fn with_endpoint_label(mut self, label: impl Into<String>) -> Self {
        self.endpoint_label = label.into();
        self
    }

    /// Render a bubble at the end of the history
    pub fn append(&mut self, text: impl Into<String>, role: ConversationRole, provisional: bool) -> BubbleHandle {
        self.history.append(text, role, provisional)
    }

    /// Remove a bubble; a no-op when it is already gone
    pub fn remove(&mut self, handle: BubbleHandle) -> bool {
        self.history.remove(handle)
    }

    /// First half of a send: guard, echo, placeholder.
    ///
    /// Returns `None` without touching anything when `message` is blank.
    pub fn begin_send(&mut self, message: &str) -> Option<PendingExchange> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        self.append(message, ConversationRole::User, false);
        self.composer.clear();

        let placeholder = self.append(PLACEHOLDER_TEXT, ConversationRole::Assistant, true);
        self.in_flight.insert(placeholder);

        let request = ChatRequest {
            sender: self.session.sender().to_string(),
            thread_id: self.session.thread_id().to_string(),
            message: message.to_string(),
        };
        info!(thread_id = %request.thread_id, %placeholder, "sending message");

        Some(PendingExchange { placeholder, request })
    }

    /// Second half of a send: drop the placeholder, then show the reply or
    /// the fixed error bubble.
    pub fn finish_send(&mut self, placeholder: BubbleHandle, result: Result<String, ExchangeError>) -> SendStatus {
        self.remove(placeholder);

        if !self.in_flight.remove(&placeholder) {
            // the conversation was reset while this one was in flight
            debug!(%placeholder, "discarding reply for a cleared conversation");
            return SendStatus::Discarded;
        }

        match result {
            Ok(reply) => {
                debug!(%placeholder, len = reply.len(), "reply received");
                self.append(reply.clone(), ConversationRole::Assistant, false);
                SendStatus::Resolved(reply)
            }
            Err(err) => {
                error!(%placeholder, error = %err, "chat exchange failed");
                self.append(ERROR_TEXT, ConversationRole::Assistant, false);
                SendStatus::Failed
            }
        }
    }

    /// Full send, awaiting the reply inline
    pub async fn send(&mut self, message: &str) -> SendStatus {
        let Some(pending) = self.begin_send(message) else {
            return SendStatus::Ignored;
        };

        let result = self.transport.exchange(&pending.request).await;
        self.finish_send(pending.placeholder, result)
    }

    /// Full send with the exchange on a background task. The outcome comes
    /// back through [`ConversationManager::next_outcome`].
    pub fn submit(&mut self, message: &str) -> bool {
        let Some(pending) = self.begin_send(message) else {
            return false;
        };

        let guard = ExchangeGuard {
            placeholder: pending.placeholder,
            tx: Some(self.outcome_tx.clone()),
        };
        let transport = Arc::clone(&self.transport);
        let request = pending.request;

        tokio::spawn(async move {
            let result = transport.exchange(&request).await;
            guard.complete(result);
        });

        true
    }

    /// Wait for the next background exchange to finish
    pub async fn next_outcome(&mut self) -> Option<ExchangeOutcome> {
        self.outcome_rx.recv().await
    }

    /// Apply a finished background exchange
    pub fn apply_outcome(&mut self, outcome: ExchangeOutcome) -> SendStatus {
        self.finish_send(outcome.placeholder, outcome.result)
    }

    /// Apply every outcome that is already waiting, without blocking
    pub fn process_outcomes(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.apply_outcome(outcome);
            applied += 1;
        }
        applied
    }

    /// New thread id and a conversation holding only the reset notice
    pub fn reset_session(&mut self) {
        let thread_id = self.session.regenerate_thread_id().to_string();
        self.history.clear();
        self.in_flight.clear();
        self.append(RESET_TEXT, ConversationRole::Assistant, false);
        info!(%thread_id, "session reset");
    }

    /// Handle key input
    pub fn handle_key(&mut self, key: KeyEvent) -> ConversationAction {
        if key.kind == KeyEventKind::Press {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return ConversationAction::Exit;
                }
                KeyCode::PageUp => {
                    self.history.scroll_up(5);
                    return ConversationAction::None;
                }
                KeyCode::PageDown => {
                    self.history.scroll_down(5);
                    return ConversationAction::None;
                }
                _ => {}
            }
        }

        match self.composer.handle_key(key) {
            ConversationResult::Submitted(input) => {
                self.submit(&input);
                ConversationAction::None
            }
            ConversationResult::Command(command) => self.handle_slash_command(command),
            ConversationResult::None => ConversationAction::None,
        }
    }

    pub fn handle_paste(&mut self, text: &str) {
        self.composer.insert_str(text);
    }

    /// Terminal focus changed
    pub fn set_focus(&mut self, has_focus: bool) {
        self.composer.set_focus(has_focus);
    }

    /// Handle slash commands
    pub fn handle_slash_command(&mut self, command: ParsedCommand) -> ConversationAction {
        match command.command {
            SlashCommand::Reset => {
                self.reset_session();
            }
            SlashCommand::Thread => {
                if let Some(value) = command.argument() {
                    let thread_id = self.session.set_thread_id(value).to_string();
                    info!(%thread_id, "thread id changed");
                    self.append(format!("Thread ID set to {thread_id}"), ConversationRole::System, false);
                } else {
                    let text = format!("Thread ID: {}", self.session.thread_id());
                    self.append(text, ConversationRole::System, false);
                }
            }
            SlashCommand::Sender => {
                if let Some(value) = command.argument() {
                    self.session.set_sender(value);
                    info!(sender = %self.session.sender(), "sender changed");
                }
                let text = match self.session.sender() {
                    "" => "Sender: (not set)".to_string(),
                    sender => format!("Sender: {sender}"),
                };
                self.append(text, ConversationRole::System, false);
            }
            SlashCommand::Info => {
                let text = format!(
                    "Endpoint: {}\nSender: {}\nThread ID: {}\nPending replies: {}",
                    self.endpoint_label,
                    self.session.sender(),
                    self.session.thread_id(),
                    self.in_flight.len()
                );
                self.append(text, ConversationRole::System, false);
            }
            SlashCommand::Help => {
                self.append(get_help_text(), ConversationRole::System, false);
            }
            SlashCommand::Quit => return ConversationAction::Exit,
        }
        ConversationAction::None
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn composer(&self) -> &ConversationComposer {
        &self.composer
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Number of exchanges still waiting for the network
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    fn render_header(&self, area: Rect, buf: &mut Buffer) {
        let label = Style::default().fg(Color::DarkGray);
        let value = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);

        let sender = match self.session.sender() {
            "" => "(not set)",
            sender => sender,
        };

        let mut spans = vec![
            Span::styled(" sender ", label),
            Span::styled(sanitize_for_terminal(sender), value),
            Span::styled("  thread ", label),
            Span::styled(sanitize_for_terminal(self.session.thread_id()), value),
        ];
        if !self.endpoint_label.is_empty() {
            spans.push(Span::styled("  ", label));
            spans.push(Span::styled(sanitize_for_terminal(&self.endpoint_label), label));
        }
        if !self.in_flight.is_empty() {
            spans.push(Span::styled(
                format!("  ⏳ {} pending", self.in_flight.len()),
                Style::default().fg(Color::Yellow),
            ));
        }

        buf.set_line(area.x, area.y, &Line::from(spans), area.width);
    }
}

impl Widget for &ConversationManager {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let lines = self.composer.content().lines().count();
        let composer_height = (lines.max(1) + 2).min(8) as u16;

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),               // Header
                Constraint::Min(3),                  // History
                Constraint::Length(composer_height), // Composer
            ])
            .split(area);

        self.render_header(chunks[0], buf);
        self.history.render(chunks[1], buf);
        self.composer.render(chunks[2], buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeResult;
    use crate::session::{is_generated_thread_id, SequenceThreadIds};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies with a canned answer per message, recording every request
    #[derive(Default)]
    struct MockTransport {
        requests: Mutex<Vec<ChatRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatTransport for MockTransport {
        async fn exchange(&self, request: &ChatRequest) -> ExchangeResult<String> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ExchangeError::Malformed(
                    serde_json::from_str::<serde_json::Value>("not json").unwrap_err(),
                ));
            }
            Ok(match request.message.as_str() {
                "hello" => "hi there".to_string(),
                other => format!("echo: {other}"),
            })
        }
    }

    /// Sleeps for as many milliseconds as the message says
    struct SlowTransport;

    #[async_trait]
    impl ChatTransport for SlowTransport {
        async fn exchange(&self, request: &ChatRequest) -> ExchangeResult<String> {
            let millis: u64 = request.message.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(format!("after {millis}ms"))
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl ChatTransport for PanickingTransport {
        async fn exchange(&self, _request: &ChatRequest) -> ExchangeResult<String> {
            panic!("transport blew up");
        }
    }

    fn manager_with(transport: Arc<dyn ChatTransport>) -> ConversationManager {
        let session = Session::new("ops@vendor.test", "", Box::new(SequenceThreadIds::new([17, 4242])));
        ConversationManager::new(session, transport, &UiConfig::default())
    }

    fn contents(manager: &ConversationManager) -> Vec<(ConversationRole, String)> {
        manager
            .history()
            .messages()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    #[test]
    fn startup_assigns_thread_id() {
        let manager = manager_with(Arc::new(MockTransport::default()));
        assert_eq!(manager.session().thread_id(), "thread_17");
    }

    #[tokio::test]
    async fn hello_round_trip() {
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager_with(transport.clone());

        let status = manager.send("  hello ").await;

        assert_eq!(status, SendStatus::Resolved("hi there".into()));
        assert_eq!(
            contents(&manager),
            vec![
                (ConversationRole::User, "hello".to_string()),
                (ConversationRole::Assistant, "hi there".to_string()),
            ]
        );
        assert_eq!(manager.history().provisional_count(), 0);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(
            *requests,
            vec![ChatRequest {
                sender: "ops@vendor.test".into(),
                thread_id: "thread_17".into(),
                message: "hello".into(),
            }]
        );
    }

    #[tokio::test]
    async fn blank_input_has_no_effect() {
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager_with(transport.clone());

        for input in ["", "   ", "\n\t "] {
            assert_eq!(manager.send(input).await, SendStatus::Ignored);
        }

        assert!(manager.history().is_empty());
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_shows_fixed_error() {
        let mut manager = manager_with(Arc::new(MockTransport {
            fail: true,
            ..Default::default()
        }));
        manager.append("earlier", ConversationRole::Assistant, false);

        assert_eq!(manager.send("hello").await, SendStatus::Failed);

        assert_eq!(manager.history().len(), 3);
        assert_eq!(manager.history().provisional_count(), 0);
        assert_eq!(manager.history().last().unwrap().content, ERROR_TEXT);
    }

    #[test]
    fn pending_state_shows_one_placeholder() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));

        let pending = manager.begin_send("status of PO-17?").unwrap();

        assert_eq!(manager.history().len(), 2);
        let placeholder = manager.history().get(pending.placeholder()).unwrap();
        assert!(placeholder.provisional);
        assert_eq!(placeholder.content, PLACEHOLDER_TEXT);
        assert_eq!(pending.request().message, "status of PO-17?");
        assert_eq!(manager.pending_count(), 1);

        manager.finish_send(pending.placeholder(), Ok("shipped".into()));
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.history().get(pending.placeholder()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sends_resolve_independently() {
        let mut manager = manager_with(Arc::new(SlowTransport));

        assert!(manager.submit("300"));
        assert!(manager.submit("100"));
        assert_eq!(manager.history().provisional_count(), 2);

        let first = manager.next_outcome().await.unwrap();
        assert_eq!(manager.apply_outcome(first), SendStatus::Resolved("after 100ms".into()));
        assert_eq!(manager.history().provisional_count(), 1);

        let second = manager.next_outcome().await.unwrap();
        assert_eq!(manager.apply_outcome(second), SendStatus::Resolved("after 300ms".into()));

        assert_eq!(manager.history().provisional_count(), 0);
        assert_eq!(manager.history().len(), 4);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn panicking_exchange_still_cleans_up() {
        let mut manager = manager_with(Arc::new(PanickingTransport));

        assert!(manager.submit("hello"));
        let outcome = manager.next_outcome().await.unwrap();
        assert!(matches!(outcome.result, Err(ExchangeError::Abandoned)));

        assert_eq!(manager.apply_outcome(outcome), SendStatus::Failed);
        assert_eq!(manager.history().provisional_count(), 0);
        assert_eq!(manager.history().last().unwrap().content, ERROR_TEXT);
    }

    #[test]
    fn reset_leaves_single_notice_and_new_thread() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        manager.append("hi", ConversationRole::User, false);
        manager.append("hello", ConversationRole::Assistant, false);

        manager.reset_session();

        assert_eq!(manager.session().thread_id(), "thread_4242");
        assert!(is_generated_thread_id(manager.session().thread_id()));
        assert_eq!(
            contents(&manager),
            vec![(ConversationRole::Assistant, RESET_TEXT.to_string())]
        );
    }

    #[test]
    fn reply_after_reset_is_discarded() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        let pending = manager.begin_send("hello").unwrap();

        manager.reset_session();
        let status = manager.finish_send(pending.placeholder(), Ok("late".into()));

        assert_eq!(status, SendStatus::Discarded);
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn slash_commands_update_session() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));

        let parsed = crate::ui::conversation::commands::parse_slash_command("/sender buyer@corp.test").unwrap();
        manager.handle_slash_command(parsed);
        assert_eq!(manager.session().sender(), "buyer@corp.test");

        let parsed = crate::ui::conversation::commands::parse_slash_command("/thread thread_99").unwrap();
        manager.handle_slash_command(parsed);
        assert_eq!(manager.session().thread_id(), "thread_99");

        let parsed = crate::ui::conversation::commands::parse_slash_command("/quit").unwrap();
        assert_eq!(manager.handle_slash_command(parsed), ConversationAction::Exit);
    }

    #[tokio::test]
    async fn enter_submits_and_clears_composer() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        for c in "hello".chars() {
            manager.handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
        manager.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));

        assert!(manager.composer().content().is_empty());
        let outcome = manager.next_outcome().await.unwrap();
        manager.apply_outcome(outcome);
        assert_eq!(manager.history().last().unwrap().content, "hi there");
    }

    #[tokio::test]
    async fn every_send_adds_two_bubbles() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));

        for i in 0..600 {
            manager.send(&format!("m{i}")).await;
        }

        assert_eq!(manager.history().len(), 1_200);
        assert_eq!(manager.history().messages().next().unwrap().content, "m0");
        assert_eq!(manager.history().last().unwrap().content, "echo: m599");
    }

    #[tokio::test]
    async fn process_outcomes_drains_finished_exchanges() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        assert_eq!(manager.process_outcomes(), 0);

        assert!(manager.submit("one"));
        assert!(manager.submit("two"));

        let mut applied = 0;
        tokio::time::timeout(Duration::from_secs(5), async {
            while applied < 2 {
                applied += manager.process_outcomes();
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.history().provisional_count(), 0);
        assert_eq!(manager.history().len(), 4);
    }

    fn render(manager: &ConversationManager, width: u16, height: u16) -> Buffer {
        let area = Rect::new(0, 0, width, height);
        let mut buf = Buffer::empty(area);
        manager.render(area, &mut buf);
        buf
    }

    fn row_text(buf: &Buffer, y: u16) -> String {
        (0..buf.area.width).map(|x| buf.get(x, y).symbol()).collect()
    }

    #[test]
    fn huge_paste_keeps_composer_bounded() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        manager.handle_paste(&"x\n".repeat(65_536));

        let buf = render(&manager, 80, 24);

        // the composer is at most 8 rows tall, so the history keeps the rest
        let conversation_rows = (0..24)
            .filter(|y| row_text(&buf, *y).contains("Conversation"))
            .count();
        assert_eq!(conversation_rows, 1);
        assert!(row_text(&buf, 16).contains("Message"));
    }

    #[test]
    fn header_neutralizes_endpoint_label() {
        let manager = manager_with(Arc::new(MockTransport::default()))
            .with_endpoint_label("http://agent.test/\u{1b}[2Jchat");

        let buf = render(&manager, 80, 10);
        let header = row_text(&buf, 0);

        assert!(header.contains("thread_17"));
        assert!(header.contains("http://agent.test/"));
        assert!(!header.contains('\u{1b}'));
    }

    #[test]
    fn focus_loss_reaches_the_composer() {
        let mut manager = manager_with(Arc::new(MockTransport::default()));
        manager.set_focus(false);
        assert!(!manager.composer().has_focus());
        manager.set_focus(true);
        assert!(manager.composer().has_focus());
    }
}
