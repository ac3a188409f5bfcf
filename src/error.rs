//! Error types shared across the crate.
//!
//! Per-frame and per-message failures are isolated and non-propagating:
//! only transport-level failures end a session.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ChatscopeResult<T> = Result<T, ChatscopeError>;

/// Comprehensive error types for the chat analysis core.
#[derive(Error, Debug)]
pub enum ChatscopeError {
    /// Rejected before any connection attempt (e.g. empty channel name)
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// An inbound envelope could not be parsed or matched no known kind.
    /// Never fatal: the decoder logs it and the stream continues.
    #[error("Protocol decode error: {reason}")]
    ProtocolDecode { reason: String },

    /// The backend pushed an `error` envelope. Surfaced to the user but
    /// non-fatal to the connection itself.
    #[error("Backend reported: {message}")]
    BackendReported { message: String },

    /// Connection-level failure. Terminal for the session.
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection closed without a clean shutdown. Terminal.
    #[error("Connection closed unexpectedly: {detail}")]
    UnexpectedClose { detail: String },

    /// A malformed native emote range or regex-unsafe emote name.
    /// Skipped for that single occurrence only.
    #[error("Span parse error: {reason}")]
    SpanParse { reason: String },

    /// Configuration file load/save failure
    #[error("Config error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatscopeError {
    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a protocol decode error
    pub fn protocol_decode(reason: impl Into<String>) -> Self {
        Self::ProtocolDecode {
            reason: reason.into(),
        }
    }

    /// Create a span parse error
    pub fn span_parse(reason: impl Into<String>) -> Self {
        Self::SpanParse {
            reason: reason.into(),
        }
    }

    /// Create a config error without a source
    pub fn config(context: impl Into<String>) -> Self {
        Self::Config {
            context: context.into(),
            source: None,
        }
    }

    /// True when the error ends the session (transport-level failures only)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::UnexpectedClose { .. }
        )
    }
}
