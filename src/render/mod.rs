//! 描画用レンダリングコア
//!
//! メッセージ本文をスパンマージして描画可能なセグメント列を作る。
//! 見た目（レイアウト・スタイル）はここでは扱わない。

pub mod span_merge;

pub use span_merge::{merge_spans, render_message, MessageSegment, TextRun, Tone};
