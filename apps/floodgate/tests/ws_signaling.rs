//! End-to-end signaling tests over a real WebSocket connection.

use std::sync::Arc;
use std::time::Duration;

use floodgate::build_router;
use floodgate::config::Config;
use floodgate::datastore::{DataStore, MemoryDataStore, StreamStatus};
use floodgate::forwarder::{PipelineCommand, PipelineForwarderFactory};
use floodgate::protocol::{NotificationKind, ServerMessage};
use floodgate::websocket::AppState;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

async fn spawn_server() -> (
    String,
    Arc<MemoryDataStore>,
    mpsc::UnboundedReceiver<PipelineCommand>,
) {
    let datastore = Arc::new(MemoryDataStore::default());
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
    let state = AppState {
        config: Arc::new(Config::default()),
        datastore: datastore.clone(),
        forwarders: Arc::new(PipelineForwarderFactory::new(pipeline_tx)),
    };
    let app = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    (format!("ws://{addr}/ws"), datastore, pipeline_rx)
}

async fn recv_message(read: &mut WsRead) -> ServerMessage {
    loop {
        let frame = timeout(Duration::from_secs(5), read.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("valid server message");
        }
    }
}

async fn recv_command(
    pipeline: &mut mpsc::UnboundedReceiver<PipelineCommand>,
) -> PipelineCommand {
    timeout(Duration::from_secs(5), pipeline.recv())
        .await
        .expect("timed out waiting for pipeline command")
        .expect("pipeline channel closed")
}

#[tokio::test]
async fn publish_negotiate_stop_round_trip() {
    let (url, datastore, mut pipeline) = spawn_server().await;
    let (ws, _) = connect_async(&url).await.expect("connect");
    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            r#"{"command":"publish","streamId":"cam1"}"#.into(),
        ))
        .await
        .expect("send publish");
    assert_eq!(
        recv_message(&mut read).await,
        ServerMessage::Start {
            stream_id: "cam1".into()
        }
    );
    match recv_command(&mut pipeline).await {
        PipelineCommand::Start { settings, .. } => {
            assert_eq!(settings.output_url, "rtmp://127.0.0.1/live/cam1");
        }
        other => panic!("unexpected pipeline command: {other:?}"),
    }

    write
        .send(Message::Text(
            r#"{"command":"takeConfiguration","streamId":"cam1","type":"offer","sdp":"v=0"}"#
                .into(),
        ))
        .await
        .expect("send configuration");
    assert!(matches!(
        recv_command(&mut pipeline).await,
        PipelineCommand::RemoteDescription { .. }
    ));

    write
        .send(Message::Text(
            r#"{"command":"takeCandidate","streamId":"cam1","candidateId":"0","candidateSdp":"candidate:1","candidateLabel":0}"#
                .into(),
        ))
        .await
        .expect("send candidate");
    assert!(matches!(
        recv_command(&mut pipeline).await,
        PipelineCommand::Candidate { line_index: 0, .. }
    ));

    write
        .send(Message::Text(
            r#"{"command":"stop","streamId":"cam1"}"#.into(),
        ))
        .await
        .expect("send stop");
    assert_eq!(
        recv_message(&mut read).await,
        ServerMessage::Notification {
            definition: NotificationKind::PublishFinished,
            stream_id: "cam1".into(),
            room_name: None,
        }
    );
    assert!(matches!(
        recv_command(&mut pipeline).await,
        PipelineCommand::Stop { .. }
    ));

    let record = datastore
        .get_stream("cam1")
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.status, StreamStatus::Finished);

    // A second stop is a no-op; the next reply must be the pong, not an
    // error for the stale stop.
    write
        .send(Message::Text(
            r#"{"command":"stop","streamId":"cam1"}"#.into(),
        ))
        .await
        .expect("send second stop");
    write
        .send(Message::Text(r#"{"command":"ping"}"#.into()))
        .await
        .expect("send ping");
    assert_eq!(recv_message(&mut read).await, ServerMessage::Pong);
}

#[tokio::test]
async fn out_of_order_commands_are_ignored() {
    let (url, _datastore, _pipeline) = spawn_server().await;
    let (ws, _) = connect_async(&url).await.expect("connect");
    let (mut write, mut read) = ws.split();

    // Candidate before any publish: logged and dropped, nothing sent back.
    write
        .send(Message::Text(
            r#"{"command":"takeCandidate","streamId":"cam1","candidateId":"0","candidateSdp":"candidate:1","candidateLabel":0}"#
                .into(),
        ))
        .await
        .expect("send candidate");
    // Garbage is dropped too.
    write
        .send(Message::Text("not json".into()))
        .await
        .expect("send garbage");
    write
        .send(Message::Text(r#"{"command":"ping"}"#.into()))
        .await
        .expect("send ping");

    assert_eq!(recv_message(&mut read).await, ServerMessage::Pong);
}

#[tokio::test]
async fn concurrent_replies_arrive_as_complete_frames() {
    let (url, _datastore, _pipeline) = spawn_server().await;
    let (ws, _) = connect_async(&url).await.expect("connect");
    let (mut write, mut read) = ws.split();

    // Two back-to-back triggers; both replies must parse as complete,
    // non-interleaved payloads.
    write
        .send(Message::Text(r#"{"command":"ping"}"#.into()))
        .await
        .expect("send ping");
    write
        .send(Message::Text(r#"{"command":"ping"}"#.into()))
        .await
        .expect("send ping");

    assert_eq!(recv_message(&mut read).await, ServerMessage::Pong);
    assert_eq!(recv_message(&mut read).await, ServerMessage::Pong);
}

#[tokio::test]
async fn closing_the_connection_stops_the_session() {
    let (url, datastore, mut pipeline) = spawn_server().await;
    let (ws, _) = connect_async(&url).await.expect("connect");
    let (mut write, mut read) = ws.split();

    write
        .send(Message::Text(
            r#"{"command":"publish","streamId":"cam2"}"#.into(),
        ))
        .await
        .expect("send publish");
    assert_eq!(
        recv_message(&mut read).await,
        ServerMessage::Start {
            stream_id: "cam2".into()
        }
    );
    assert!(matches!(
        recv_command(&mut pipeline).await,
        PipelineCommand::Start { .. }
    ));

    write.send(Message::Close(None)).await.expect("send close");
    drop(write);
    drop(read);

    assert!(matches!(
        recv_command(&mut pipeline).await,
        PipelineCommand::Stop { .. }
    ));
    let record = datastore
        .get_stream("cam2")
        .await
        .expect("get")
        .expect("record");
    assert_eq!(record.status, StreamStatus::Finished);
}
