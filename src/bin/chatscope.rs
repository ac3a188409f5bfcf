//! chatscope CLI - Twitch Chat Sentiment Monitor
//!
//! バックエンドの分析フィードへ接続し、注釈付きメッセージと集計統計を
//! ターミナルに流し続ける。Ctrl+Cでセッションを正常停止する。

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tokio_stream::{wrappers::IntervalStream, StreamExt};

use chatscope::config::{AppConfig, ConfigManager};
use chatscope::render::span_merge::{MessageSegment, Tone};
use chatscope::session::{ChatSession, SessionEvent, SessionState};
use chatscope::utils;
use chatscope::DisplayMessage;

const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Parser, Debug)]
#[command(name = "chatscope", about = "Twitch Chat Sentiment Monitor", version)]
struct Cli {
    /// 分析対象のチャンネル名（省略時は設定ファイルのdefault_channel）
    channel: Option<String>,

    /// バックエンドホストの上書き
    #[arg(long)]
    host: Option<String>,

    /// バックエンドポートの上書き
    #[arg(long)]
    port: Option<u16>,

    /// 統計行の出力間隔（秒）の上書き
    #[arg(long)]
    stats_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logging()?;

    tracing::info!("🎬 Starting chatscope - Twitch Chat Sentiment Monitor");

    let cli = Cli::parse();

    // 既存の設定管理システムを使用
    let config_manager = ConfigManager::new()?;
    let mut config = config_manager.load_config().unwrap_or_else(|e| {
        tracing::warn!("設定読み込みエラー、デフォルト設定を使用: {}", e);
        AppConfig::default()
    });

    // CLI引数は設定ファイルより優先
    if let Some(host) = cli.host {
        config.backend.host = host;
    }
    if let Some(port) = cli.port {
        config.backend.port = port;
    }
    if let Some(secs) = cli.stats_interval {
        config.display.stats_interval_secs = secs;
    }

    let channel = cli
        .channel
        .or_else(|| config.default_channel.clone())
        .context("No channel given: pass one as an argument or set default_channel in config")?;

    let session = ChatSession::new(config.backend.endpoint_base());
    let mut events = session.subscribe();

    session.start(&channel).await?;

    let mut stats_ticker = IntervalStream::new(tokio::time::interval(Duration::from_secs(
        config.display.stats_interval_secs.max(1),
    )));
    // intervalの初回tickは即時発火するため読み捨てる
    stats_ticker.next().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 終了シグナルを受信しました");
                session.stop();
                break;
            }
            Some(_) = stats_ticker.next() => {
                print_stats(&session, config.display.top_k);
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::MessageReceived(message)) => {
                        utils::dump_display_message(&message, "cli");
                        print_message(&message);
                    }
                    Ok(SessionEvent::StatusChanged(line)) => {
                        if line.is_error {
                            eprintln!("!! {}", line.text);
                        } else {
                            println!("-- {}", line.text);
                        }
                    }
                    Ok(SessionEvent::Ack { streamer }) => {
                        println!("-- Analysis feed connected for {}", streamer);
                    }
                    Ok(SessionEvent::StateChanged(state)) => {
                        if matches!(state, SessionState::Closed | SessionState::Errored) {
                            tracing::info!("Session reached terminal state {:?}, exiting", state);
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Display fell behind, {} events dropped", n);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    print_stats(&session, config.display.top_k);
    tracing::info!("👋 chatscope shutting down");
    Ok(())
}

/// 注釈付きメッセージを1行で出力する
///
/// ポジティブ語は緑、ネガティブ語は赤、エモートは`[name]`で表す。
fn print_message(message: &DisplayMessage) {
    let mut rendered = String::new();
    for segment in chatscope::render_message(&message.event) {
        match segment {
            MessageSegment::Text { runs } => {
                for run in runs {
                    match run.tone {
                        Tone::Positive => {
                            rendered.push_str(ANSI_GREEN);
                            rendered.push_str(&run.text);
                            rendered.push_str(ANSI_RESET);
                        }
                        Tone::Negative => {
                            rendered.push_str(ANSI_RED);
                            rendered.push_str(&run.text);
                            rendered.push_str(ANSI_RESET);
                        }
                        Tone::Neutral => rendered.push_str(&run.text),
                    }
                }
            }
            MessageSegment::Emote { name, .. } => {
                rendered.push('[');
                rendered.push_str(&name);
                rendered.push(']');
            }
        }
    }

    let score = message
        .event
        .sentiment_score
        .map(|s| format!("{:+.2}", s))
        .unwrap_or_else(|| " -- ".to_string());

    println!(
        "[{}] ({}) {}: {}",
        message.received_at, score, message.event.author, rendered
    );
}

/// 集計統計を1ブロック出力する
fn print_stats(session: &ChatSession, top_k: usize) {
    let snapshot = session.snapshot(top_k);
    let metrics = session.decoder_metrics();

    let average = snapshot
        .average_sentiment
        .map(|a| format!("{:+.3}", a))
        .unwrap_or_else(|| "n/a".to_string());

    println!(
        "== stats: {} shown / {} total messages | avg sentiment {} ({} points) | frames {} ok / {} dropped",
        snapshot.message_count,
        snapshot.total_messages,
        average,
        snapshot.series_len,
        metrics.frames_decoded,
        metrics.frames_malformed + metrics.frames_unknown,
    );
    if !snapshot.top_keywords.is_empty() {
        println!("   keywords: {}", join_counts(&snapshot.top_keywords));
    }
    if !snapshot.top_emotes.is_empty() {
        println!("   emotes:   {}", join_counts(&snapshot.top_emotes));
    }
}

fn join_counts(entries: &[(String, u64)]) -> String {
    entries
        .iter()
        .map(|(key, count)| format!("{} ({})", key, count))
        .collect::<Vec<_>>()
        .join(", ")
}
