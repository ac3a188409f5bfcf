//! ログ初期化とデバッグユーティリティ

use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// tracingサブスクライバを初期化する
///
/// `RUST_LOG`が設定されていればそれに従い、無ければinfoレベル。
pub fn init_logging() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    subscriber.try_init()?;

    Ok(())
}

/// デバッグ用のメッセージダンプ
pub fn dump_display_message(message: &crate::api::events::DisplayMessage, context: &str) {
    debug!(
        context = context,
        id = %message.id,
        received_at = %message.received_at,
        author = %message.event.author,
        content_length = message.event.content.len(),
        content_preview = %message.event.content.chars().take(50).collect::<String>(),
        sentiment_score = ?message.event.sentiment_score,
        keyword_count = message.event.keywords.len(),
        emote_count = message.event.detected_emotes.len(),
        "📨 Display message processed"
    );
}
