//! チャット分析の集計モジュール

pub mod aggregate;

pub use aggregate::{
    AggregateSnapshot, AggregateState, FrequencyTable, SentimentPoint, MESSAGE_WINDOW_CAPACITY,
    SENTIMENT_SERIES_CAPACITY,
};
