//! 接続ライフサイクルコントローラー
//!
//! バックエンドのイベントフィード接続を状態機械として所有する。
//! 状態遷移: `Idle → Connecting → Connected → Closed`（正常終端）
//! または `Errored`（異常終端）。`stop()` はConnecting/Connectedから
//! Idleへ戻す。自動再接続はしない: 失敗はユーザーが再度startを
//! 発行するまで終端のまま。
//!
//! 集計状態（AggregateState）はstartのたびに作り直され、stopや切断で
//! 破棄される。フレームの読み取りとディスパッチは単一タスクが行い、
//! 到着順がそのまま処理順になる。

pub mod transport;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::analytics::aggregate::{AggregateSnapshot, AggregateState};
use crate::api::decoder::{DecoderMetrics, Dispatcher};
use crate::api::events::DisplayMessage;
use crate::error::{ChatscopeError, ChatscopeResult};
use self::transport::{FeedConnection, FeedEvent, FeedTransport, WsFeedTransport};

/// セッションイベントのブロードキャスト容量
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    /// 正常終端（クリーンクローズ）
    Closed,
    /// 異常終端（ユーザーの再startまで回復しない）
    Errored,
}

/// 現在のステータス/エラー表示行
///
/// 表示面はこの1行だけで、新しいstatus/errorイベントのたびに
/// 置き換えられる。
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub text: String,
    pub is_error: bool,
}

/// UI/CLIへ通知されるセッションイベント
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Ack { streamer: String },
    StatusChanged(StatusLine),
    MessageReceived(DisplayMessage),
}

/// チャット分析セッション
pub struct ChatSession {
    /// `ws://host:port` 形式のエンドポイントベース
    endpoint_base: String,
    transport: Arc<dyn FeedTransport>,
    state: Arc<RwLock<SessionState>>,
    aggregates: Arc<RwLock<AggregateState>>,
    status: Arc<RwLock<Option<StatusLine>>>,
    streamer: Arc<RwLock<Option<String>>>,
    /// 正規化済みのアクティブチャンネル名
    channel: Arc<RwLock<Option<String>>>,
    metrics: Arc<RwLock<DecoderMetrics>>,
    events: broadcast::Sender<SessionEvent>,
    /// stopのたびに進む世代番号。古い世代のフレームは破棄される。
    generation: Arc<AtomicU64>,
    /// 世代確認とディスパッチ/リセットを排他する（stop後の遅延フレーム対策）
    dispatch_guard: Arc<Mutex<()>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// 実WebSocketトランスポートで作成
    pub fn new(endpoint_base: impl Into<String>) -> Self {
        Self::with_transport(endpoint_base, Arc::new(WsFeedTransport))
    }

    /// トランスポート差し替え可能なコンストラクタ（テスト用の継ぎ目）
    pub fn with_transport(
        endpoint_base: impl Into<String>,
        transport: Arc<dyn FeedTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            endpoint_base: endpoint_base.into().trim_end_matches('/').to_string(),
            transport,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            aggregates: Arc::new(RwLock::new(AggregateState::new())),
            status: Arc::new(RwLock::new(None)),
            streamer: Arc::new(RwLock::new(None)),
            channel: Arc::new(RwLock::new(None)),
            metrics: Arc::new(RwLock::new(DecoderMetrics::default())),
            events,
            generation: Arc::new(AtomicU64::new(0)),
            dispatch_guard: Arc::new(Mutex::new(())),
            shutdown: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// 指定チャンネルの分析セッションを開始する
    ///
    /// チャンネル名は正規化（trim + 小文字化）され、空ならInvalidInput。
    /// 集計状態はここで完全にリセットされる。
    pub async fn start(&self, channel: &str) -> ChatscopeResult<()> {
        let normalized = channel.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ChatscopeError::invalid_input("channel name is empty"));
        }

        {
            let state = *self.state.read();
            if matches!(state, SessionState::Connecting | SessionState::Connected) {
                tracing::warn!("Session already active in state {:?}", state);
                return Err(ChatscopeError::invalid_input(
                    "session is already connecting or connected",
                ));
            }
        }

        // 新しいセッションの開始 = 状態の完全リセット
        *self.aggregates.write() = AggregateState::new();
        *self.status.write() = None;
        *self.streamer.write() = None;
        *self.metrics.write() = DecoderMetrics::default();
        *self.channel.write() = Some(normalized.clone());

        self.set_state(SessionState::Connecting);

        let endpoint = format!("{}/ws/{}", self.endpoint_base, normalized);
        tracing::info!("🎬 Starting chat analysis session for '{}'", normalized);

        let connection = match self.transport.connect(&endpoint).await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!("Failed to open feed for '{}': {}", normalized, e);
                self.set_state(SessionState::Errored);
                let line = StatusLine {
                    text: format!("Connection failed: {}", e),
                    is_error: true,
                };
                *self.status.write() = Some(line.clone());
                let _ = self.events.send(SessionEvent::StatusChanged(line));
                *self.channel.write() = None;
                return Err(e);
            }
        };

        self.set_state(SessionState::Connected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);

        let context = ReaderContext {
            my_generation: self.generation.load(Ordering::SeqCst),
            generation: Arc::clone(&self.generation),
            dispatch_guard: Arc::clone(&self.dispatch_guard),
            dispatcher: Dispatcher::new(
                Arc::clone(&self.aggregates),
                Arc::clone(&self.status),
                Arc::clone(&self.streamer),
                Arc::clone(&self.metrics),
                self.events.clone(),
            ),
            state: Arc::clone(&self.state),
            status: Arc::clone(&self.status),
            streamer: Arc::clone(&self.streamer),
            channel: Arc::clone(&self.channel),
            events: self.events.clone(),
        };

        let handle = tokio::spawn(run_reader(connection, shutdown_rx, context));
        *self.reader.lock() = Some(handle);

        Ok(())
    }

    /// セッションを停止してIdleへ戻す
    ///
    /// 呼び出し側から見て同期的: 戻った時点で状態はリセット済みで、
    /// 以降に届くフレームはすべて破棄される。トランスポートは正常
    /// クローズコードでバックグラウンドで閉じられる。既にIdleなら何も
    /// しない。
    pub fn stop(&self) {
        if *self.state.read() == SessionState::Idle {
            return;
        }

        tracing::info!("🛑 Stopping chat analysis session");

        if let Some(shutdown_tx) = self.shutdown.lock().take() {
            let _ = shutdown_tx.send(true);
        }

        // 世代を進めてからリセットする。進行中のディスパッチとは
        // dispatch_guardで排他されるため、stop後の遅延フレームが
        // 新しい状態に混入することはない。
        {
            let _guard = self.dispatch_guard.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            *self.aggregates.write() = AggregateState::new();
            *self.status.write() = None;
            *self.streamer.write() = None;
            *self.channel.write() = None;
            *self.metrics.write() = DecoderMetrics::default();
        }

        self.reader.lock().take();
        self.set_state(SessionState::Idle);
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn status(&self) -> Option<StatusLine> {
        self.status.read().clone()
    }

    pub fn streamer(&self) -> Option<String> {
        self.streamer.read().clone()
    }

    pub fn channel(&self) -> Option<String> {
        self.channel.read().clone()
    }

    /// 集計状態の表示用スナップショット
    pub fn snapshot(&self, top_k: usize) -> AggregateSnapshot {
        self.aggregates.read().snapshot(top_k)
    }

    /// 直近のN件のメッセージ（到着順）
    pub fn recent_messages(&self, n: usize) -> Vec<DisplayMessage> {
        let aggregates = self.aggregates.read();
        let count = aggregates.message_count();
        aggregates
            .messages()
            .skip(count.saturating_sub(n))
            .cloned()
            .collect()
    }

    pub fn decoder_metrics(&self) -> DecoderMetrics {
        self.metrics.read().clone()
    }

    /// セッションイベントの購読を開始する
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        *self.state.write() = next;
        tracing::info!("🔄 Session state changed: {:?}", next);
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }
}

/// リーダータスクが持ち回る共有ハンドル一式
struct ReaderContext {
    my_generation: u64,
    generation: Arc<AtomicU64>,
    dispatch_guard: Arc<Mutex<()>>,
    dispatcher: Dispatcher,
    state: Arc<RwLock<SessionState>>,
    status: Arc<RwLock<Option<StatusLine>>>,
    streamer: Arc<RwLock<Option<String>>>,
    channel: Arc<RwLock<Option<String>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ReaderContext {
    /// stop()が先に走った世代のイベントかどうか
    fn is_stale(&self) -> bool {
        self.generation.load(Ordering::SeqCst) != self.my_generation
    }

    fn set_state(&self, next: SessionState) {
        *self.state.write() = next;
        tracing::info!("🔄 Session state changed: {:?}", next);
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn surface_error(&self, text: String) {
        let line = StatusLine {
            text,
            is_error: true,
        };
        *self.status.write() = Some(line.clone());
        let _ = self.events.send(SessionEvent::StatusChanged(line));
    }

    fn on_closed(&self, clean: bool, detail: String) {
        let _guard = self.dispatch_guard.lock();
        if self.is_stale() {
            return;
        }

        self.set_state(SessionState::Closed);
        if clean {
            tracing::info!("Feed connection closed ({})", detail);
        } else {
            tracing::warn!("Feed connection closed unexpectedly ({})", detail);
            self.surface_error(format!("Connection closed unexpectedly: {}", detail));
        }
    }

    fn on_failed(&self, detail: String) {
        let _guard = self.dispatch_guard.lock();
        if self.is_stale() {
            return;
        }

        tracing::error!("Feed transport error: {}", detail);
        self.set_state(SessionState::Errored);
        self.surface_error(format!("Transport error: {}", detail));
        // 異常終端ではアクティブなチャンネル識別子を外す
        *self.channel.write() = None;
        *self.streamer.write() = None;
    }
}

/// フレーム読み取りループ
///
/// 1フレームずつ受信→ディスパッチを繰り返す単一コンシューマ。
/// stopシグナルで正常クローズして抜ける。
async fn run_reader(
    mut connection: Box<dyn FeedConnection>,
    mut shutdown_rx: watch::Receiver<bool>,
    context: ReaderContext,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                let _ = changed;
                connection.close().await;
                break;
            }
            event = connection.next_event() => {
                match event {
                    Some(FeedEvent::Frame(text)) => {
                        let _guard = context.dispatch_guard.lock();
                        if !context.is_stale() {
                            context.dispatcher.dispatch_frame(&text);
                        }
                        // 古い世代のフレームは破棄され、次のループで
                        // stopシグナルが正常クローズを行う
                    }
                    Some(FeedEvent::Closed { clean, detail }) => {
                        context.on_closed(clean, detail);
                        break;
                    }
                    Some(FeedEvent::Failed { detail }) => {
                        context.on_failed(detail);
                        break;
                    }
                    None => {
                        context.on_closed(false, "connection lost".to_string());
                        break;
                    }
                }
            }
        }
    }
}
