//! スパンマージエンジン
//!
//! 1メッセージ分の本文・単語別センチメントスコア・検出済みエモートを、
//! 描画可能なセグメント列（テキストラン + エモート配置）へ変換する。
//!
//! ネイティブ位置タグ由来のスパンが常に優先され、カタログ照合による
//! スパンは既存スパンと重ならない場合のみ採用される。全セグメントの
//! テキストを連結すると元の本文が完全に復元される。

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::api::events::{ChatEvent, EmoteOccurrence};
use crate::error::{ChatscopeError, ChatscopeResult};

/// これより大きいスコアはポジティブ扱い
pub const POSITIVE_THRESHOLD: f64 = 0.1;
/// これより小さいスコアはネガティブ扱い
pub const NEGATIVE_THRESHOLD: f64 = -0.1;

/// 単語単位のセンチメント分類
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Tone {
    /// スコアなし・スコア0・閾値内（ハイライトなし）
    Neutral,
    Positive,
    Negative,
}

/// 分類済みテキストの連続区間
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub tone: Tone,
}

/// 描画セグメント（テキストランの列、またはエモート配置）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum MessageSegment {
    Text { runs: Vec<TextRun> },
    Emote { name: String, url: String },
}

/// 採用済みのエモートスパン（文字オフセット、両端含む）
#[derive(Debug, Clone, PartialEq)]
struct EmoteSpan {
    start: usize,
    end: usize,
    name: String,
    url: String,
}

impl EmoteSpan {
    /// 両端含む範囲同士の交差判定
    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start <= end && start <= self.end
    }
}

/// ネイティブエモートIDからプロバイダーCDNのURLを組み立てる
fn native_emote_url(emote_id: &str) -> String {
    format!(
        "https://static-cdn.jtvnw.net/emoticons/v2/{}/default/dark/1.0",
        emote_id
    )
}

/// ChatEventを描画セグメント列へ変換する入口
pub fn render_message(event: &ChatEvent) -> Vec<MessageSegment> {
    merge_spans(
        &event.content,
        &event.sentiment_words,
        &event.detected_emotes,
        event.native_emote_tag(),
    )
}

/// スパンマージ本体
///
/// 1. ネイティブタグ（`id:start-end,start-end/id:...`）を字句どおりの
///    文字オフセットとして解釈し、先に採用する。
/// 2. 未採用の名前のカタログエモートを単語境界で照合し、既存スパンと
///    重ならない出現のみ採用する。
/// 3. 開始位置でソートし、左から右へ走査してセグメントを出力する。
pub fn merge_spans(
    content: &str,
    sentiment_words: &HashMap<String, f64>,
    detected_emotes: &[EmoteOccurrence],
    native_tag: Option<&str>,
) -> Vec<MessageSegment> {
    if content.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = content.chars().collect();
    let mut accepted: Vec<EmoteSpan> = Vec::new();

    if let Some(tag) = native_tag {
        collect_native_spans(tag, &chars, &mut accepted);
    }

    collect_catalog_spans(content, &chars, detected_emotes, &mut accepted);

    accepted.sort_by_key(|span| span.start);

    // 左から右への走査。cursorは次に出力すべき文字オフセット。
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for span in &accepted {
        if span.start > cursor {
            let gap: String = chars[cursor..span.start].iter().collect();
            segments.push(MessageSegment::Text {
                runs: classify_text(&gap, sentiment_words),
            });
        }
        segments.push(MessageSegment::Emote {
            name: span.name.clone(),
            url: span.url.clone(),
        });
        cursor = span.end + 1;
    }

    if cursor < chars.len() {
        let tail: String = chars[cursor..].iter().collect();
        segments.push(MessageSegment::Text {
            runs: classify_text(&tail, sentiment_words),
        });
    }

    segments
}

/// ネイティブタグを解析して採用済みスパンに追加する
///
/// 不正な範囲（数値でない・start>end・本文の範囲外）はその1件だけを
/// スキップし、残りの解析を続行する。
fn collect_native_spans(tag: &str, chars: &[char], accepted: &mut Vec<EmoteSpan>) {
    for part in tag.split('/') {
        let Some((emote_id, ranges)) = part.split_once(':') else {
            if !part.is_empty() {
                tracing::debug!("Skipping malformed emote tag part: '{}'", part);
            }
            continue;
        };

        for range in ranges.split(',') {
            let (start, end) = match parse_range(range, chars.len()) {
                Ok(span) => span,
                Err(e) => {
                    tracing::debug!("Skipping emote range for id {}: {}", emote_id, e);
                    continue;
                }
            };

            if accepted.iter().any(|span| span.overlaps(start, end)) {
                continue;
            }

            let name: String = chars[start..=end].iter().collect();
            accepted.push(EmoteSpan {
                start,
                end,
                name,
                url: native_emote_url(emote_id),
            });
        }
    }
}

/// `start-end` 形式の範囲をパースする
fn parse_range(range: &str, content_len: usize) -> ChatscopeResult<(usize, usize)> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| ChatscopeError::span_parse(format!("no '-' in range '{}'", range)))?;
    let start: usize = start
        .trim()
        .parse()
        .map_err(|_| ChatscopeError::span_parse(format!("non-numeric start '{}'", start)))?;
    let end: usize = end
        .trim()
        .parse()
        .map_err(|_| ChatscopeError::span_parse(format!("non-numeric end '{}'", end)))?;
    if start > end {
        return Err(ChatscopeError::span_parse(format!(
            "inverted range {}-{}",
            start, end
        )));
    }
    if end >= content_len {
        return Err(ChatscopeError::span_parse(format!(
            "range {}-{} outside content of length {}",
            start, end, content_len
        )));
    }
    Ok((start, end))
}

/// カタログエモートを単語境界で照合してスパン候補を追加する
///
/// ネイティブスパンと同名のエモートは照合自体を行わない。候補は
/// 採用済みスパン（ネイティブ + 先行カタログ）と重ならない場合のみ
/// 採用される。
fn collect_catalog_spans(
    content: &str,
    chars: &[char],
    detected_emotes: &[EmoteOccurrence],
    accepted: &mut Vec<EmoteSpan>,
) {
    // バイトオフセット→文字オフセット変換表（regexはバイト位置を返す）
    let mut byte_to_char: HashMap<usize, usize> = HashMap::new();
    for (char_idx, (byte_idx, _)) in content.char_indices().enumerate() {
        byte_to_char.insert(byte_idx, char_idx);
    }
    byte_to_char.insert(content.len(), chars.len());

    for emote in detected_emotes {
        if emote.name.is_empty() {
            continue;
        }
        if accepted.iter().any(|span| span.name == emote.name) {
            continue;
        }

        // エモート名は正規表現メタ文字を含みうるためエスケープ必須
        let pattern = match Regex::new(&regex::escape(&emote.name)) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::debug!("Skipping unmatchable emote name '{}': {}", emote.name, e);
                continue;
            }
        };

        for found in pattern.find_iter(content) {
            let Some(&start) = byte_to_char.get(&found.start()) else {
                continue;
            };
            let Some(&after) = byte_to_char.get(&found.end()) else {
                continue;
            };
            let end = after - 1;

            // 単語境界チェック: 前後が文字列端か空白であること
            let bounded_left = start == 0 || chars[start - 1].is_whitespace();
            let bounded_right = after == chars.len() || chars[after].is_whitespace();
            if !bounded_left || !bounded_right {
                continue;
            }

            if accepted.iter().any(|span| span.overlaps(start, end)) {
                continue;
            }

            accepted.push(EmoteSpan {
                start,
                end,
                name: emote.name.clone(),
                url: emote.url.clone(),
            });
        }
    }
}

/// テキストを空白保存で分割し、単語ごとにトーンを分類する
///
/// 空白トークンは原文のまま未分類で出力する。隣接する同一トーンの
/// ランは結合する。
fn classify_text(text: &str, sentiment_words: &HashMap<String, f64>) -> Vec<TextRun> {
    let mut runs: Vec<TextRun> = Vec::new();

    for (token, is_whitespace) in split_preserving_whitespace(text) {
        let tone = if is_whitespace {
            Tone::Neutral
        } else {
            classify_word(&token, sentiment_words)
        };

        match runs.last_mut() {
            Some(last) if last.tone == tone => last.text.push_str(&token),
            _ => runs.push(TextRun { text: token, tone }),
        }
    }

    runs
}

/// 連続空白と非空白のトークン列に分割する（原文を完全に保存）
fn split_preserving_whitespace(text: &str) -> Vec<(String, bool)> {
    let mut tokens: Vec<(String, bool)> = Vec::new();

    for ch in text.chars() {
        let is_whitespace = ch.is_whitespace();
        match tokens.last_mut() {
            Some((token, ws)) if *ws == is_whitespace => token.push(ch),
            _ => tokens.push((ch.to_string(), is_whitespace)),
        }
    }

    tokens
}

/// 単語1つのトーンを決める
///
/// 完全一致→正規化形（小文字化 + 末尾の約物1文字除去）の順で
/// スコアを引く。スコアが0ちょうど、または見つからない場合は未分類。
fn classify_word(word: &str, sentiment_words: &HashMap<String, f64>) -> Tone {
    let score = sentiment_words.get(word).copied().or_else(|| {
        let mut normalized = word.to_lowercase();
        if normalized
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_punctuation())
        {
            normalized.pop();
        }
        sentiment_words.get(&normalized).copied()
    });

    match score {
        Some(score) if score > POSITIVE_THRESHOLD => Tone::Positive,
        Some(score) if score < NEGATIVE_THRESHOLD => Tone::Negative,
        _ => Tone::Neutral,
    }
}
