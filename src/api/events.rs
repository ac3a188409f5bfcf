//! チャット分析イベントのワイヤーモデル
//!
//! バックエンドからWebSocket経由で届くエンベロープと、
//! スコア付与済みチャットイベントのserde構造体を定義する。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// バックエンドから届くエンベロープ（1フレーム = 1エンベロープ）
///
/// 既知の4種類以外（例: `warning`）はデコードエラーとして扱われ、
/// ストリーム自体は継続する。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Envelope {
    /// 接続確立の確認（対象ストリーマー名を含む）
    #[serde(rename = "connection_ack")]
    ConnectionAck { streamer: String },
    /// 状態通知（人間可読の1行メッセージ）
    #[serde(rename = "status")]
    Status { payload: String },
    /// バックエンド側で発生したエラーの通知
    #[serde(rename = "error")]
    Error { payload: String },
    /// スコア付与済みチャットメッセージ本体
    #[serde(rename = "chat_message")]
    ChatMessage { payload: ChatEvent },
}

/// スコア付与済みチャットイベント（受信後は不変）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChatEvent {
    /// バックエンドが付与したISO-8601タイムスタンプ
    pub timestamp: String,
    pub author: String,
    pub content: String,
    /// プロバイダー由来のタグ（emotes位置タグ、メッセージIDなど）
    #[serde(default)]
    pub tags: HashMap<String, serde_json::Value>,
    /// メッセージ全体の複合センチメントスコア（おおよそ -1.0〜1.0）
    pub sentiment_score: Option<f64>,
    /// 単語ごとのセンチメントスコア
    #[serde(default)]
    pub sentiment_words: HashMap<String, f64>,
    /// 抽出済みキーワード（出現順）
    #[serde(default)]
    pub keywords: Vec<String>,
    /// カタログ照合で検出されたエモート（位置情報なし）
    #[serde(default)]
    pub detected_emotes: Vec<EmoteOccurrence>,
}

impl ChatEvent {
    /// プロバイダーネイティブのエモート位置タグ文字列（`id:start-end,.../...`）
    ///
    /// タグが無い、または文字列でない場合はNone。
    pub fn native_emote_tag(&self) -> Option<&str> {
        self.tags.get("emotes").and_then(|v| v.as_str())
    }

    /// フィード側が付与したメッセージID（あれば）
    pub fn feed_message_id(&self) -> Option<&str> {
        self.tags.get("id").and_then(|v| v.as_str())
    }
}

/// カタログ照合で検出されたエモート1件
///
/// 同一性は `name`（大文字小文字を区別、本文と完全一致）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmoteOccurrence {
    pub name: String,
    pub url: String,
    /// エモートの出所（twitch / ffz / 7tv など）
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
}

/// 表示用メッセージ: ChatEvent + 導出ID + 受信時刻ラベル
///
/// IDは描画キーとしてのみ使う（重複排除には使わない）。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayMessage {
    /// フィード付与のメッセージID、無ければ `timestamp + author` の連結
    pub id: String,
    /// ローカル受信時刻（HH:MM:SS、表示用）
    pub received_at: String,
    pub event: ChatEvent,
}

impl From<ChatEvent> for DisplayMessage {
    fn from(event: ChatEvent) -> Self {
        let id = match event.feed_message_id() {
            Some(feed_id) => feed_id.to_string(),
            None => format!("{}{}", event.timestamp, event.author),
        };

        Self {
            id,
            received_at: chrono::Utc::now().format("%H:%M:%S").to_string(),
            event,
        }
    }
}
