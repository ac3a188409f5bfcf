//! イベントデコーダ
//!
//! 受信した生テキストフレームを4種類の型付きエンベロープに解析し、
//! セッション状態と集計ストアへディスパッチする。壊れたフレーム1枚が
//! セッションを落とすことは決してない: 解析失敗はログと計数にとどめ、
//! ストリームは継続する。

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::analytics::aggregate::AggregateState;
use crate::api::events::Envelope;
use crate::error::{ChatscopeError, ChatscopeResult};
use crate::session::{SessionEvent, StatusLine};

/// 生フレームをエンベロープへ解析する
///
/// JSONとして壊れている場合と、JSONだが既知の4種類に合致しない場合の
/// どちらも`ProtocolDecode`になる。
pub fn decode_frame(raw: &str) -> ChatscopeResult<Envelope> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ChatscopeError::protocol_decode(format!("not valid JSON: {}", e)))?;
    serde_json::from_value(value)
        .map_err(|e| ChatscopeError::protocol_decode(format!("unknown envelope: {}", e)))
}

/// デコーダの通過統計
#[derive(Debug, Clone, Default)]
pub struct DecoderMetrics {
    /// 受信した全フレーム数
    pub frames_total: u64,
    /// 正常にディスパッチされたフレーム数
    pub frames_decoded: u64,
    /// JSONとして壊れていたフレーム数
    pub frames_malformed: u64,
    /// JSONだが既知の種類に合致しなかったフレーム数（例: warning）
    pub frames_unknown: u64,
}

/// エンベロープ1件ごとの効果を適用するディスパッチャ
///
/// 単一コンシューマ前提: 1フレームの効果をすべて適用し終えてから
/// 次のフレームに進む。ロックは表示側からの読み取り可視性のためだけに
/// 存在する。
pub struct Dispatcher {
    aggregates: Arc<RwLock<AggregateState>>,
    /// 現在のステータス/エラー表示行（イベントごとに置き換え）
    status: Arc<RwLock<Option<StatusLine>>>,
    /// connection_ackで確定するストリーマー識別子
    streamer: Arc<RwLock<Option<String>>>,
    metrics: Arc<RwLock<DecoderMetrics>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Dispatcher {
    pub fn new(
        aggregates: Arc<RwLock<AggregateState>>,
        status: Arc<RwLock<Option<StatusLine>>>,
        streamer: Arc<RwLock<Option<String>>>,
        metrics: Arc<RwLock<DecoderMetrics>>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            aggregates,
            status,
            streamer,
            metrics,
            events,
        }
    }

    /// 生フレーム1枚を処理する
    ///
    /// 解析エラーはここで吸収される（境界の外へは伝播しない）。
    pub fn dispatch_frame(&self, raw: &str) {
        self.metrics.write().frames_total += 1;

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                self.metrics.write().frames_malformed += 1;
                tracing::warn!("Dropping malformed frame (not JSON): {}", e);
                return;
            }
        };

        let envelope: Envelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.write().frames_unknown += 1;
                tracing::debug!("Dropping unrecognized envelope: {}", e);
                return;
            }
        };

        self.metrics.write().frames_decoded += 1;
        self.apply(envelope);
    }

    /// 型付きエンベロープの効果を適用する
    fn apply(&self, envelope: Envelope) {
        match envelope {
            Envelope::ConnectionAck { streamer } => {
                tracing::info!("✅ Connection acknowledged for streamer: {}", streamer);
                *self.streamer.write() = Some(streamer.clone());
                let _ = self.events.send(SessionEvent::Ack { streamer });
            }
            Envelope::Status { payload } => {
                tracing::info!("📋 Backend status: {}", payload);
                let line = StatusLine {
                    text: payload,
                    is_error: false,
                };
                *self.status.write() = Some(line.clone());
                let _ = self.events.send(SessionEvent::StatusChanged(line));
            }
            Envelope::Error { payload } => {
                // バックエンド報告のエラーは表示するが、接続自体は
                // トランスポート層が独立に判断するため閉じない
                tracing::error!("Backend reported error: {}", payload);
                let line = StatusLine {
                    text: payload,
                    is_error: true,
                };
                *self.status.write() = Some(line.clone());
                let _ = self.events.send(SessionEvent::StatusChanged(line));
            }
            Envelope::ChatMessage { payload } => {
                let message = self.aggregates.write().record_message(payload);
                tracing::debug!(
                    author = %message.event.author,
                    content_length = message.event.content.len(),
                    "📨 Chat message recorded"
                );
                let _ = self.events.send(SessionEvent::MessageReceived(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dispatcher() -> (Dispatcher, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(
            Arc::new(RwLock::new(AggregateState::new())),
            Arc::new(RwLock::new(None)),
            Arc::new(RwLock::new(None)),
            Arc::new(RwLock::new(DecoderMetrics::default())),
            events,
        );
        (dispatcher, rx)
    }

    #[test]
    fn test_decode_frame_known_kinds() {
        assert!(decode_frame(r#"{"type":"status","payload":"ok"}"#).is_ok());
        assert!(decode_frame(r#"{"type":"error","payload":"bad"}"#).is_ok());
        assert!(decode_frame(r#"{"type":"connection_ack","streamer":"s"}"#).is_ok());
    }

    #[test]
    fn test_decode_frame_failures() {
        // 壊れたJSONと未知の種類はどちらもProtocolDecode
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, ChatscopeError::ProtocolDecode { .. }));

        let err = decode_frame(r#"{"type":"warning","payload":"x"}"#).unwrap_err();
        assert!(matches!(err, ChatscopeError::ProtocolDecode { .. }));
    }

    #[test]
    fn test_malformed_frame_does_not_stop_the_stream() {
        let (dispatcher, _rx) = test_dispatcher();

        dispatcher.dispatch_frame("{not json");
        dispatcher.dispatch_frame(r#"{"type":"warning","payload":"ignored"}"#);
        dispatcher.dispatch_frame(
            r#"{"type":"chat_message","payload":{"timestamp":"t","author":"a","content":"hi","sentiment_score":null}}"#,
        );

        // 後続の正常フレームは処理されている
        assert_eq!(dispatcher.aggregates.read().message_count(), 1);

        let metrics = dispatcher.metrics.read().clone();
        assert_eq!(metrics.frames_total, 3);
        assert_eq!(metrics.frames_malformed, 1);
        assert_eq!(metrics.frames_unknown, 1);
        assert_eq!(metrics.frames_decoded, 1);
    }

    #[test]
    fn test_status_and_error_replace_single_line() {
        let (dispatcher, _rx) = test_dispatcher();

        dispatcher.dispatch_frame(r#"{"type":"status","payload":"joined chat"}"#);
        {
            let status = dispatcher.status.read();
            let line = status.as_ref().unwrap();
            assert_eq!(line.text, "joined chat");
            assert!(!line.is_error);
        }

        // エラーはステータス行を置き換えるが、接続状態には触れない
        dispatcher.dispatch_frame(r#"{"type":"error","payload":"IRC error"}"#);
        {
            let status = dispatcher.status.read();
            let line = status.as_ref().unwrap();
            assert_eq!(line.text, "IRC error");
            assert!(line.is_error);
        }

        dispatcher.dispatch_frame(r#"{"type":"status","payload":"recovered"}"#);
        assert!(!dispatcher.status.read().as_ref().unwrap().is_error);
    }

    #[test]
    fn test_connection_ack_sets_streamer() {
        let (dispatcher, mut rx) = test_dispatcher();

        dispatcher.dispatch_frame(r#"{"type":"connection_ack","streamer":"somestreamer"}"#);
        assert_eq!(
            dispatcher.streamer.read().as_deref(),
            Some("somestreamer")
        );

        let event = rx.try_recv().unwrap();
        assert!(matches!(event, SessionEvent::Ack { .. }));
    }

    #[test]
    fn test_chat_message_mutation_sequence() {
        let (dispatcher, mut rx) = test_dispatcher();

        dispatcher.dispatch_frame(
            r#"{
                "type": "chat_message",
                "payload": {
                    "timestamp": "2024-05-01T12:00:00+00:00",
                    "author": "viewer1",
                    "content": "this game is great Kappa",
                    "sentiment_score": 0.6,
                    "sentiment_words": {"great": 0.6},
                    "keywords": ["game"],
                    "detected_emotes": [
                        {"name": "Kappa", "url": "https://cdn.example/kappa.webp", "type": "twitch"}
                    ]
                }
            }"#,
        );

        let aggregates = dispatcher.aggregates.read();
        assert_eq!(aggregates.message_count(), 1);
        assert_eq!(aggregates.series_len(), 1);
        assert_eq!(aggregates.keyword_counts().count("game"), 1);
        assert_eq!(aggregates.emote_counts().count("Kappa"), 1);
        assert_eq!(aggregates.average_sentiment(), Some(0.6));
        drop(aggregates);

        let event = rx.try_recv().unwrap();
        let SessionEvent::MessageReceived(message) = event else {
            panic!("Expected MessageReceived event");
        };
        assert_eq!(message.event.author, "viewer1");
    }
}
