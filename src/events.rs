use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who a bubble belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationRole {
    User,
    Assistant,
    /// Local notices (help, session info). Never sent to the endpoint.
    System,
}

impl ConversationRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConversationRole::User => "You",
            ConversationRole::Assistant => "Agent",
            ConversationRole::System => "Info",
        }
    }
}

/// Opaque handle to one rendered bubble.
///
/// Handles are issued once and never reused, so a stale handle can only
/// ever miss; it can't remove somebody else's bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BubbleHandle(pub(crate) u64);

impl fmt::Display for BubbleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bubble-{}", self.0)
    }
}

/// Result of one network exchange, addressed to the placeholder it replaces.
#[derive(Debug)]
pub struct ExchangeOutcome {
    pub placeholder: BubbleHandle,
    pub result: Result<String, ExchangeError>,
}

/// How a finished send ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// Nothing to send; no bubble was added and no request issued.
    Ignored,
    /// The agent replied with this text.
    Resolved(String),
    /// The exchange failed; the fixed error bubble was shown.
    Failed,
    /// The reply arrived after a reset cleared its conversation and was
    /// dropped.
    Discarded,
}
