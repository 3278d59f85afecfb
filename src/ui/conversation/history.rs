//! Conversation history display component

use crate::events::{BubbleHandle, ConversationRole};
use chrono::{DateTime, Utc};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Scrollbar, ScrollbarOrientation, ScrollbarState, StatefulWidget, Widget},
};
use std::cell::Cell;
use std::collections::VecDeque;

/// A single bubble in the conversation history
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub handle: BubbleHandle,
    pub role: ConversationRole,
    pub content: String,
    /// Placeholder awaiting a reply
    pub provisional: bool,
    pub timestamp: DateTime<Utc>,
}

/// Ordered list of bubbles plus the scroll position used to draw them
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ConversationMessage>,
    next_handle: u64,
    /// Lines scrolled up from the bottom; 0 keeps the newest bubble visible
    scroll_offset: usize,
    /// Largest useful offset as of the last render
    max_scroll: Cell<usize>,
    show_timestamps: bool,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_handle: 0,
            scroll_offset: 0,
            max_scroll: Cell::new(0),
            show_timestamps: true,
        }
    }

    pub fn with_timestamps(mut self, show: bool) -> Self {
        self.show_timestamps = show;
        self
    }

    /// Add a bubble at the end and scroll to it. The returned handle is the
    /// only way to remove this particular bubble later.
    pub fn append(&mut self, content: impl Into<String>, role: ConversationRole, provisional: bool) -> BubbleHandle {
        let handle = BubbleHandle(self.next_handle);
        self.next_handle += 1;

        self.messages.push_back(ConversationMessage {
            handle,
            role,
            content: content.into(),
            provisional,
            timestamp: Utc::now(),
        });

        self.scroll_to_bottom();
        handle
    }

    /// Remove the bubble behind `handle`. Returns false (and does nothing)
    /// when it is already gone.
    pub fn remove(&mut self, handle: BubbleHandle) -> bool {
        match self.messages.iter().position(|m| m.handle == handle) {
            Some(index) => {
                self.messages.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: BubbleHandle) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| m.handle == handle)
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.back()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn provisional_count(&self) -> usize {
        self.messages.iter().filter(|m| m.provisional).count()
    }

    /// Clear all messages. Handles keep counting up so old ones stay dead.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.scroll_offset = 0;
    }

    /// Scroll towards older bubbles, stopping at the top of what was last
    /// drawn
    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_offset = self
            .scroll_offset
            .saturating_add(lines)
            .min(self.max_scroll.get());
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// All rendered lines for the given inner width
    fn layout_lines(&self, width: u16) -> Vec<Line<'static>> {
        let mut all_lines = Vec::new();
        for message in &self.messages {
            all_lines.extend(self.render_message(message, width));
            // spacing between messages
            all_lines.push(Line::from(""));
        }
        all_lines.pop();
        all_lines
    }

    /// Render a single message into lines
    fn render_message(&self, message: &ConversationMessage, width: u16) -> Vec<Line<'static>> {
        let mut lines = Vec::new();

        let role_icon = match message.role {
            ConversationRole::User => "👤",
            ConversationRole::Assistant => "🤖",
            ConversationRole::System => "⚙️",
        };

        let mut header = format!("{} {}", role_icon, message.role.display_name());
        if self.show_timestamps {
            header.push(' ');
            header.push_str(&message.timestamp.format("%H:%M:%S").to_string());
        }

        lines.push(Line::from(vec![Span::styled(
            header,
            Style::default().fg(Color::DarkGray),
        )]));

        let mut style = content_style(message.role);
        if message.provisional {
            style = style.add_modifier(Modifier::ITALIC);
        }

        let clean = sanitize_for_terminal(&message.content);
        for content_line in wrap_text(&clean, width.saturating_sub(2) as usize) {
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(content_line, style),
            ]));
        }

        lines
    }
}

/// Get content style based on role
fn content_style(role: ConversationRole) -> Style {
    match role {
        ConversationRole::User => Style::default().fg(Color::Blue),
        ConversationRole::Assistant => Style::default().fg(Color::Green),
        ConversationRole::System => Style::default().fg(Color::Yellow),
    }
}

/// Make message text inert for the terminal.
///
/// Text is drawn as-is, never interpreted. Control characters (ESC and the
/// rest of C0/C1) are replaced so an escape sequence in a reply can't move
/// the cursor or restyle the screen. Newlines survive, tabs become spaces.
pub fn sanitize_for_terminal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push('\n'),
            '\t' => out.push_str("    "),
            '\r' => {}
            c if c.is_control() => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
    out
}

/// Wrap text to fit within the given width, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return text.lines().map(str::to_string).collect();
    }

    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();

            if current_len > 0 && current_len + 1 + word_len <= width {
                current_line.push(' ');
                current_line.push_str(word);
                current_len += 1 + word_len;
                continue;
            }

            if current_len > 0 {
                lines.push(std::mem::take(&mut current_line));
                current_len = 0;
            }

            // Break words longer than a whole line
            let mut chars = word.chars().peekable();
            while chars.peek().is_some() {
                let chunk: String = chars.by_ref().take(width).collect();
                current_len = chunk.chars().count();
                current_line = chunk;
                if chars.peek().is_some() {
                    lines.push(std::mem::take(&mut current_line));
                    current_len = 0;
                }
            }
        }

        lines.push(current_line);
    }

    lines
}

impl Widget for &ConversationHistory {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title("💬 Conversation");

        let inner_area = block.inner(area);
        block.render(area, buf);

        if inner_area.height == 0 || inner_area.width == 0 {
            return;
        }

        if self.messages.is_empty() {
            let welcome_lines = [
                Line::from(Span::styled("Welcome! 🚀", Style::default().fg(Color::Green))),
                Line::from(""),
                Line::from(Span::styled(
                    "Type a message below and press Enter to send.",
                    Style::default().fg(Color::Gray),
                )),
                Line::from(Span::styled(
                    "/help lists the commands, /reset starts a new thread.",
                    Style::default().fg(Color::DarkGray),
                )),
            ];

            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        // Leave a column for the scrollbar
        let text_width = inner_area.width.saturating_sub(1);
        let all_lines = self.layout_lines(text_width);

        let height = inner_area.height as usize;
        let total = all_lines.len();
        let max_offset = total.saturating_sub(height);
        self.max_scroll.set(max_offset);
        let offset = self.scroll_offset.min(max_offset);
        let end = total - offset;
        let start = end.saturating_sub(height);

        for (i, line) in all_lines[start..end].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, text_width);
        }

        if total > height {
            let mut state = ScrollbarState::new(max_offset).position(max_offset - offset);
            Scrollbar::default()
                .orientation(ScrollbarOrientation::VerticalRight)
                .begin_symbol(Some("↑"))
                .end_symbol(Some("↓"))
                .render(inner_area, buf, &mut state);
        }
    }
}
