//! 集計ストア
//!
//! 直近メッセージウィンドウ・センチメント時系列・頻度テーブル・
//! ローリング平均をセッション単位で保持する。すべて容量制限つきの
//! インメモリ状態で、接続のたびに作り直される。

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::api::events::{ChatEvent, DisplayMessage};

/// 直近メッセージウィンドウの容量（FIFO、最古から追い出し）
pub const MESSAGE_WINDOW_CAPACITY: usize = 100;
/// センチメント時系列の容量（FIFO）
pub const SENTIMENT_SERIES_CAPACITY: usize = 50;

/// センチメント時系列の1点
///
/// sequenceはセッション内で単調増加し、再利用されない。
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SentimentPoint {
    pub sequence: u64,
    pub score: f64,
}

/// 挿入順を保持する頻度テーブル
///
/// エントリ列 + キー→位置インデックスの二重構造。top_kの同数タイは
/// 最初に挿入された順で安定的に解決される（ホストのマップ反復順に
/// 依存しない）。
#[derive(Debug, Clone, Default)]
pub struct FrequencyTable {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// キーのカウントを1増やす（未登録なら末尾に追加）
    pub fn increment(&mut self, key: &str) {
        match self.index.get(key) {
            Some(&slot) => self.entries[slot].1 += 1,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), 1));
            }
        }
    }

    pub fn count(&self, key: &str) -> u64 {
        self.index
            .get(key)
            .map(|&slot| self.entries[slot].1)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 挿入順のエントリ反復
    pub fn iter(&self) -> impl Iterator<Item = &(String, u64)> {
        self.entries.iter()
    }

    /// カウント降順の上位k件（同数タイは先着順）
    pub fn top_k(&self, k: usize) -> Vec<(String, u64)> {
        let mut sorted: Vec<(String, u64)> = self.entries.clone();
        // 安定ソートなので同数タイは挿入順のまま残る
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(k);
        sorted
    }
}

/// セッション単位の集計状態
#[derive(Debug)]
pub struct AggregateState {
    /// 直近メッセージウィンドウ（到着順、最古が先頭）
    messages: VecDeque<DisplayMessage>,
    /// センチメント時系列（sequence昇順 = 到着順）
    sentiment_series: VecDeque<SentimentPoint>,
    keyword_counts: FrequencyTable,
    emote_counts: FrequencyTable,
    /// 現在のウィンドウから再計算した平均（対象点なしならNone）
    average_sentiment: Option<f64>,
    next_sequence: u64,
    /// 総受信メッセージ数（追い出し分も含む）
    total_messages: u64,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self {
            messages: VecDeque::with_capacity(MESSAGE_WINDOW_CAPACITY),
            sentiment_series: VecDeque::with_capacity(SENTIMENT_SERIES_CAPACITY),
            keyword_counts: FrequencyTable::new(),
            emote_counts: FrequencyTable::new(),
            average_sentiment: None,
            next_sequence: 0,
            total_messages: 0,
            started_at: chrono::Utc::now(),
        }
    }

    /// chat_messageイベント1件分の状態変化を適用する
    ///
    /// 効果の順序は固定: (1)ウィンドウ追加+追い出し (2)センチメント点
    /// 追加+追い出し (3)キーワード加算 (4)エモート加算。
    /// 整形済みイベントに対しては常に成功する。
    pub fn record_message(&mut self, event: ChatEvent) -> DisplayMessage {
        let message = DisplayMessage::from(event);

        self.messages.push_back(message.clone());
        while self.messages.len() > MESSAGE_WINDOW_CAPACITY {
            self.messages.pop_front();
        }

        if let Some(score) = message.event.sentiment_score {
            let point = SentimentPoint {
                sequence: self.next_sequence,
                score,
            };
            self.next_sequence += 1;
            self.sentiment_series.push_back(point);
            while self.sentiment_series.len() > SENTIMENT_SERIES_CAPACITY {
                self.sentiment_series.pop_front();
            }
            self.average_sentiment = self.compute_average();
        }

        for keyword in &message.event.keywords {
            self.keyword_counts.increment(keyword);
        }

        for emote in &message.event.detected_emotes {
            self.emote_counts.increment(&emote.name);
        }

        self.total_messages += 1;
        message
    }

    /// 現在ウィンドウの平均センチメント
    ///
    /// スコアが0ちょうどの点は除外する。対象点が1つも無ければNone
    /// （0は「除外される有効値」であってデフォルト値ではない）。
    pub fn average_sentiment(&self) -> Option<f64> {
        self.average_sentiment
    }

    fn compute_average(&self) -> Option<f64> {
        let scored: Vec<f64> = self
            .sentiment_series
            .iter()
            .filter(|point| point.score != 0.0)
            .map(|point| point.score)
            .collect();

        if scored.is_empty() {
            return None;
        }
        Some(scored.iter().sum::<f64>() / scored.len() as f64)
    }

    pub fn messages(&self) -> impl Iterator<Item = &DisplayMessage> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn sentiment_series(&self) -> impl Iterator<Item = &SentimentPoint> {
        self.sentiment_series.iter()
    }

    pub fn series_len(&self) -> usize {
        self.sentiment_series.len()
    }

    pub fn keyword_counts(&self) -> &FrequencyTable {
        &self.keyword_counts
    }

    pub fn emote_counts(&self) -> &FrequencyTable {
        &self.emote_counts
    }

    pub fn top_keywords(&self, k: usize) -> Vec<(String, u64)> {
        self.keyword_counts.top_k(k)
    }

    pub fn top_emotes(&self, k: usize) -> Vec<(String, u64)> {
        self.emote_counts.top_k(k)
    }

    /// 表示用のスナップショットを取得（上位top_k件の頻度つき）
    pub fn snapshot(&self, top_k: usize) -> AggregateSnapshot {
        AggregateSnapshot {
            message_count: self.messages.len(),
            total_messages: self.total_messages,
            series_len: self.sentiment_series.len(),
            average_sentiment: self.average_sentiment,
            top_keywords: self.top_keywords(top_k),
            top_emotes: self.top_emotes(top_k),
            started_at: self.started_at,
        }
    }
}

impl Default for AggregateState {
    fn default() -> Self {
        Self::new()
    }
}

/// 集計状態の表示用スナップショット
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSnapshot {
    pub message_count: usize,
    pub total_messages: u64,
    pub series_len: usize,
    pub average_sentiment: Option<f64>,
    pub top_keywords: Vec<(String, u64)>,
    pub top_emotes: Vec<(String, u64)>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
