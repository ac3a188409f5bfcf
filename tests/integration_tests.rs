//! セッション統合テスト
//!
//! ローカルにWebSocketバックエンドを立て、実トランスポート経由で
//! セッション全体（接続 → デコード → 集計 → 描画 → 停止）を検証する。

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use chatscope::render::span_merge::MessageSegment;
use chatscope::render_message;
use chatscope::session::{ChatSession, SessionEvent, SessionState};

/// 接続後のバックエンドの振る舞い
#[derive(Debug, Clone, Copy, PartialEq)]
enum AfterFrames {
    /// クライアントが閉じるまで接続を維持
    StayOpen,
    /// 正常クローズコードで切断
    CloseClean,
    /// クローズハンドシェイクなしで切断
    DropAbruptly,
}

/// テスト用バックエンドを起動し、バインドしたポートを返す
///
/// 接続のたびに同じフレーム列を送信する（再接続テスト用）。
async fn spawn_backend(frames: Vec<String>, after: AfterFrames) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should bind test backend");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _addr)) = listener.accept().await else {
                return;
            };
            let frames = frames.clone();
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                for frame in frames {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }

                match after {
                    AfterFrames::StayOpen => {
                        // クライアント側のクローズを待つ
                        while let Some(msg) = ws.next().await {
                            match msg {
                                Ok(Message::Close(_)) | Err(_) => break,
                                _ => {}
                            }
                        }
                    }
                    AfterFrames::CloseClean => {
                        let _ = ws
                            .close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "stream ended".into(),
                            }))
                            .await;
                    }
                    AfterFrames::DropAbruptly => {
                        drop(ws);
                    }
                }
            });
        }
    });

    port
}

fn ack_frame(streamer: &str) -> String {
    json!({"type": "connection_ack", "streamer": streamer}).to_string()
}

fn status_frame(payload: &str) -> String {
    json!({"type": "status", "payload": payload}).to_string()
}

fn chat_frame(author: &str, content: &str, score: Option<f64>) -> String {
    json!({
        "type": "chat_message",
        "payload": {
            "timestamp": "2024-05-01T12:00:00+00:00",
            "author": author,
            "content": content,
            "sentiment_score": score,
        }
    })
    .to_string()
}

/// 条件を満たすセッションイベントが届くまで待つ
async fn wait_for(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if predicate(&event) {
                return;
            }
        }
    })
    .await
    .expect("Timed out waiting for session event");
}

#[tokio::test]
async fn test_end_to_end_session_flow() {
    let frames = vec![
        ack_frame("somestreamer"),
        status_frame("Successfully joined chat for somestreamer"),
        json!({
            "type": "chat_message",
            "payload": {
                "timestamp": "2024-05-01T12:00:01+00:00",
                "author": "viewer1",
                "content": "this game is great Kappa",
                "tags": {"emotes": "25:19-23", "id": "m-1"},
                "sentiment_score": 0.6,
                "sentiment_words": {"great": 0.6},
                "keywords": ["game"],
                "detected_emotes": [
                    {"name": "Kappa", "url": "https://cdn.example/kappa.webp", "type": "twitch"}
                ]
            }
        })
        .to_string(),
        chat_frame("viewer2", "terrible play", Some(-0.4)),
        chat_frame("viewer3", "just chatting", None),
    ];
    let port = spawn_backend(frames, AfterFrames::StayOpen).await;

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let mut rx = session.subscribe();

    session.start("SomeStreamer").await.expect("start");
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::MessageReceived(m) if m.event.author == "viewer3")
    })
    .await;

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.streamer().as_deref(), Some("somestreamer"));
    assert_eq!(session.channel().as_deref(), Some("somestreamer"));
    assert!(session
        .status()
        .unwrap()
        .text
        .contains("Successfully joined"));

    let snapshot = session.snapshot(5);
    assert_eq!(snapshot.message_count, 3);
    assert_eq!(snapshot.series_len, 2);
    let average = snapshot.average_sentiment.unwrap();
    assert!((average - 0.1).abs() < 1e-9); // (0.6 + -0.4) / 2
    assert_eq!(snapshot.top_keywords[0], ("game".to_string(), 1));
    assert_eq!(snapshot.top_emotes[0], ("Kappa".to_string(), 1));

    // 受信メッセージがそのまま描画できること（ネイティブタグ優先）
    let messages = session.recent_messages(10);
    assert_eq!(messages[0].id, "m-1");
    let segments = render_message(&messages[0].event);
    let emote_names: Vec<_> = segments
        .iter()
        .filter_map(|s| match s {
            MessageSegment::Emote { name, url } => {
                assert!(url.contains("static-cdn.jtvnw.net"));
                Some(name.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(emote_names, vec!["Kappa"]);

    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.snapshot(5).message_count, 0);
}

#[tokio::test]
async fn test_malformed_frame_over_the_wire() {
    let frames = vec![
        "{not json".to_string(),
        json!({"type": "warning", "payload": "anonymous login"}).to_string(),
        chat_frame("viewer1", "still here", None),
    ];
    let port = spawn_backend(frames, AfterFrames::StayOpen).await;

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let mut rx = session.subscribe();

    session.start("chan").await.expect("start");
    wait_for(&mut rx, |e| matches!(e, SessionEvent::MessageReceived(_))).await;

    // 壊れたフレームでもセッションは生きている
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.snapshot(5).message_count, 1);

    let metrics = session.decoder_metrics();
    assert_eq!(metrics.frames_total, 3);
    assert_eq!(metrics.frames_malformed, 1);
    assert_eq!(metrics.frames_unknown, 1);
    assert_eq!(metrics.frames_decoded, 1);

    session.stop();
}

#[tokio::test]
async fn test_clean_close_from_backend() {
    let frames = vec![status_frame("stream ending")];
    let port = spawn_backend(frames, AfterFrames::CloseClean).await;

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let mut rx = session.subscribe();

    session.start("chan").await.expect("start");
    wait_for(&mut rx, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Closed))
    })
    .await;

    assert_eq!(session.state(), SessionState::Closed);
    // 正常クローズはエラーとして上書きされない（最後のstatusが残る）
    let status = session.status().unwrap();
    assert!(!status.is_error);
}

#[tokio::test]
async fn test_abrupt_disconnect_is_terminal() {
    let frames = vec![chat_frame("viewer1", "hi", None)];
    let port = spawn_backend(frames, AfterFrames::DropAbruptly).await;

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let mut rx = session.subscribe();

    session.start("chan").await.expect("start");
    wait_for(&mut rx, |e| {
        matches!(
            e,
            SessionEvent::StateChanged(SessionState::Closed)
                | SessionEvent::StateChanged(SessionState::Errored)
        )
    })
    .await;

    // ハンドシェイクなしの切断は終端状態になり、エラーが表示される
    let state = session.state();
    assert!(matches!(
        state,
        SessionState::Closed | SessionState::Errored
    ));
    let status = session.status().expect("error status should be surfaced");
    assert!(status.is_error);

    // 自動再接続はしない
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.state(), state);
}

#[tokio::test]
async fn test_stop_then_restart_with_fresh_state() {
    let frames = vec![
        ack_frame("chan"),
        chat_frame("viewer1", "first session", Some(0.9)),
    ];
    let port = spawn_backend(frames, AfterFrames::StayOpen).await;

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let mut rx = session.subscribe();

    session.start("chan").await.expect("first start");
    wait_for(&mut rx, |e| matches!(e, SessionEvent::MessageReceived(_))).await;
    assert_eq!(session.snapshot(5).series_len, 1);

    session.stop();

    // stop直後、次のstartの前に完全に空であること
    let snapshot = session.snapshot(5);
    assert_eq!(snapshot.message_count, 0);
    assert_eq!(snapshot.series_len, 0);
    assert_eq!(snapshot.average_sentiment, None);
    assert!(session.streamer().is_none());
    assert_eq!(session.decoder_metrics().frames_total, 0);

    // 同じバックエンドに再接続できる
    session.start("chan").await.expect("second start");
    wait_for(&mut rx, |e| matches!(e, SessionEvent::MessageReceived(_))).await;

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.snapshot(5).message_count, 1);

    session.stop();
}

#[tokio::test]
async fn test_connection_refused_is_errored() {
    // 誰もlistenしていないポートへ接続する
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = ChatSession::new(format!("ws://127.0.0.1:{}", port));
    let result = session.start("chan").await;

    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Errored);
    assert!(session.status().unwrap().is_error);
    assert!(session.channel().is_none());
}
