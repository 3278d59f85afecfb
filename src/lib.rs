//! Terminal chat widget for the vendor portal agent.
//!
//! Messages typed into the composer are POSTed to the agent's `/chat`
//! endpoint together with a sender and a thread id; replies are rendered in
//! a scrolling history. See [`ui::conversation::ConversationManager`] for
//! the send flow.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod ui;

pub use client::{ChatReply, ChatRequest, ChatTransport, HttpChatClient};
pub use config::Config;
pub use error::ExchangeError;
pub use events::{BubbleHandle, ConversationRole, SendStatus};
pub use session::Session;
