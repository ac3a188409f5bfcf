//! フィードトランスポート層
//!
//! WebSocketクライアントの接続・受信・クローズをトレイトで抽象化する。
//! セッション側はライフサイクル契約（open / frame / close / error）
//! だけを消費し、実装詳細には依存しない。

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ChatscopeResult;

/// トランスポートから届くライフサイクルイベント
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// テキストフレーム1枚（エンベロープ1件）
    Frame(String),
    /// 接続の終了。cleanは正常クローズハンドシェイクかどうか
    Closed { clean: bool, detail: String },
    /// 接続レベルの失敗（セッションにとって終端的）
    Failed { detail: String },
}

/// 接続の生成を担うトランスポート
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// エンドポイントへ接続し、確立済みのコネクションを返す
    async fn connect(&self, endpoint: &str) -> ChatscopeResult<Box<dyn FeedConnection>>;
}

/// 確立済みのフィード接続
#[async_trait]
pub trait FeedConnection: Send {
    /// 次のイベントを待つ。Noneはクローズハンドシェイクなしの途絶。
    async fn next_event(&mut self) -> Option<FeedEvent>;

    /// 正常クローズコードで切断する
    async fn close(&mut self);
}

/// tokio-tungsteniteによる実トランスポート
#[derive(Debug, Default)]
pub struct WsFeedTransport;

#[async_trait]
impl FeedTransport for WsFeedTransport {
    async fn connect(&self, endpoint: &str) -> ChatscopeResult<Box<dyn FeedConnection>> {
        tracing::debug!("Connecting to {}", endpoint);
        let (stream, _response) = connect_async(endpoint).await?;
        Ok(Box::new(WsFeedConnection { stream }))
    }
}

struct WsFeedConnection {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsFeedConnection {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(FeedEvent::Frame(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (clean, detail) = match frame {
                        Some(frame) => (
                            frame.code == CloseCode::Normal,
                            format!("close code {}", u16::from(frame.code)),
                        ),
                        None => (false, "close without frame".to_string()),
                    };
                    return Some(FeedEvent::Closed { clean, detail });
                }
                // Ping/Pongはtungsteniteが応答する。Binaryは本プロトコルに無い。
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(FeedEvent::Failed {
                        detail: e.to_string(),
                    });
                }
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client stop".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!("Error while closing websocket: {}", e);
        }
    }
}
