pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod render;
pub mod session;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{ChatscopeError, ChatscopeResult};

// Re-export the wire model and decoder
pub use api::decoder::{decode_frame, DecoderMetrics};
pub use api::events::{ChatEvent, DisplayMessage, EmoteOccurrence, Envelope};

// Re-export the rendering core
pub use render::span_merge::{merge_spans, render_message, MessageSegment, TextRun, Tone};

// Re-export aggregate statistics
pub use analytics::aggregate::{
    AggregateSnapshot, AggregateState, FrequencyTable, SentimentPoint, MESSAGE_WINDOW_CAPACITY,
    SENTIMENT_SERIES_CAPACITY,
};

// Re-export the session controller
pub use session::{ChatSession, SessionEvent, SessionState, StatusLine};
