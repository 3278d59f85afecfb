//! Error types for a single chat exchange

use thiserror::Error;

/// Why an exchange with the agent endpoint ended in the Failed state.
///
/// None of these details are shown to the user; they only reach the log.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Connection refused, DNS failure, timeout, broken body stream...
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// The body was not the JSON object we expect.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The task running the exchange went away without reporting.
    #[error("exchange abandoned before completion")]
    Abandoned,
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
