//! Conversation UI components for the chat widget

pub mod commands;
pub mod composer;
pub mod history;
pub mod manager;

pub use commands::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};
pub use composer::ConversationComposer;
pub use history::ConversationHistory;
pub use manager::{ConversationAction, ConversationManager, ERROR_TEXT, PLACEHOLDER_TEXT, RESET_TEXT};
