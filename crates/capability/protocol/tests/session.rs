use domain::{ConnectionState, SessionRole};
use pvd_protocol::{
    PvdCommand, Session, SessionConfig, SessionEvent, SessionEventKind, SessionHandle,
};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn daemon() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

fn config(port: u16, role: SessionRole) -> SessionConfig {
    let mut config = SessionConfig::new("127.0.0.1", port, role);
    config.reconnect_interval = Duration::from_millis(50);
    config.connect_timeout = Duration::from_millis(500);
    config.keepalive = false;
    config
}

fn collect(session: &mut Session, kinds: &[SessionEventKind]) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for kind in kinds {
        let tx = tx.clone();
        session.on(*kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("accept timeout")
        .expect("accept");
    stream
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("read timeout")
        .expect("read");
    line.trim_end_matches('\n').to_string()
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event timeout")
        .expect("event channel closed")
}

#[tokio::test]
async fn regular_session_sends_bootstrap_on_connect() {
    let (listener, port) = daemon().await;
    let session = Session::new(config(port, SessionRole::Regular));
    let handle = session.connect();

    let (read, _write) = accept(&listener).await.into_split();
    let mut reader = BufReader::new(read);
    assert_eq!(read_line(&mut reader).await, "PVD_GET_LIST");
    assert_eq!(read_line(&mut reader).await, "PVD_SUBSCRIBE_NOTIFICATIONS");
    assert_eq!(read_line(&mut reader).await, "PVD_SUBSCRIBE *");

    timeout(WAIT, handle.wait_for_state(ConnectionState::Connected))
        .await
        .expect("state timeout")
        .expect("state");
    handle
        .send(PvdCommand::GetAttributes("a.example".to_string()))
        .expect("send");
    assert_eq!(read_line(&mut reader).await, "PVD_GET_ATTRIBUTES a.example");
    handle.close();
}

#[tokio::test]
async fn command_sent_from_connect_listener_is_written() {
    let (listener, port) = daemon().await;
    let mut session = Session::new(config(port, SessionRole::Regular));
    let slot: Arc<OnceLock<SessionHandle>> = Arc::new(OnceLock::new());
    let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
    let listener_slot = slot.clone();
    session.on(SessionEventKind::Connect, move |_| {
        if let Some(handle) = listener_slot.get() {
            let sent = handle.send(PvdCommand::GetAttributes("a.example".to_string()));
            let _ = sent_tx.send(sent.is_ok());
        }
    });
    let handle = session.connect();
    slot.set(handle.clone()).expect("slot empty");

    let (read, _write) = accept(&listener).await.into_split();
    let mut reader = BufReader::new(read);
    assert!(timeout(WAIT, sent_rx.recv()).await.expect("listener ran").expect("sent"));
    assert_eq!(read_line(&mut reader).await, "PVD_GET_LIST");
    assert_eq!(read_line(&mut reader).await, "PVD_SUBSCRIBE_NOTIFICATIONS");
    assert_eq!(read_line(&mut reader).await, "PVD_SUBSCRIBE *");
    assert_eq!(read_line(&mut reader).await, "PVD_GET_ATTRIBUTES a.example");
    handle.close();
}

#[tokio::test]
async fn control_session_promotes_and_creates_default_pvds() {
    let (listener, port) = daemon().await;
    let mut config = config(port, SessionRole::Control);
    config.default_pvds = vec!["a.example".to_string()];
    let handle = Session::new(config).connect();

    let (read, _write) = accept(&listener).await.into_split();
    let mut reader = BufReader::new(read);
    assert_eq!(read_line(&mut reader).await, "PVD_CONNECTION_PROMOTE_CONTROL");
    assert_eq!(read_line(&mut reader).await, "PVD_CREATE_PVD 0 a.example");
    handle.close();
}

#[tokio::test]
async fn inbound_messages_become_events_across_chunks() {
    let (listener, port) = daemon().await;
    let mut session = Session::new(config(port, SessionRole::Regular));
    let mut events = collect(
        &mut session,
        &[
            SessionEventKind::List,
            SessionEventKind::PvdAttributes,
            SessionEventKind::DelPvd,
        ],
    );
    let (hflag_tx, mut hflag_rx) = mpsc::unbounded_channel();
    session.on_attribute("hFlag", move |event| {
        let _ = hflag_tx.send(event.clone());
    });
    let handle = session.connect();

    let (_read, mut write) = accept(&listener).await.into_split();
    let chunks: [&[u8]; 5] = [
        b"PVD_LIST a.exa",
        b"mple\nPVD_BEGIN_MULTILINE\nPVD_ATTRIBUTES a.example\n{\"hFl",
        b"ag\": true, \"sequenceNumber\": 1}\nPVD_END_MULTI",
        b"LINE\nPVD_ATTRIBUTE a.example hFlag false\nPVD_ATTRIBUTE a.example name \"x\"\n",
        b"garbage line\nPVD_DEL_PVD a.example\n",
    ];
    for chunk in chunks {
        write.write_all(chunk).await.expect("write");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::List(vec!["a.example".to_string()])
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::PvdAttributes {
            pvd_id: "a.example".to_string(),
            attributes: json!({ "hFlag": true, "sequenceNumber": 1 }),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::DelPvd("a.example".to_string())
    );

    // 只收到 hFlag 的单属性事件
    assert_eq!(
        next_event(&mut hflag_rx).await,
        SessionEvent::PvdAttribute {
            pvd_id: "a.example".to_string(),
            name: "hFlag".to_string(),
            value: json!(false),
        }
    );
    assert!(hflag_rx.try_recv().is_err());
    handle.close();
}

#[tokio::test]
async fn raw_lines_are_reported_as_data() {
    let (listener, port) = daemon().await;
    let mut session = Session::new(config(port, SessionRole::Regular));
    let mut data = collect(&mut session, &[SessionEventKind::Data]);
    let handle = session.connect();

    let (_read, mut write) = accept(&listener).await.into_split();
    write.write_all(b"hello\n\nPVD_LIST\n").await.expect("write");

    assert_eq!(next_event(&mut data).await, SessionEvent::Data("hello".to_string()));
    assert_eq!(next_event(&mut data).await, SessionEvent::Data("PVD_LIST".to_string()));
    handle.close();
}

#[tokio::test]
async fn reconnects_after_peer_closes() {
    let (listener, port) = daemon().await;
    let mut session = Session::new(config(port, SessionRole::Regular));
    let mut events = collect(
        &mut session,
        &[
            SessionEventKind::Connect,
            SessionEventKind::Disconnect,
            SessionEventKind::Error,
        ],
    );
    let handle = session.connect();

    let first = accept(&listener).await;
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    drop(first);

    assert_eq!(next_event(&mut events).await, SessionEvent::Disconnected);
    assert!(matches!(next_event(&mut events).await, SessionEvent::Error(_)));

    let (read, _write) = accept(&listener).await.into_split();
    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    let mut reader = BufReader::new(read);
    assert_eq!(read_line(&mut reader).await, "PVD_GET_LIST");
    handle.close();
}

#[tokio::test]
async fn repeated_connect_failures_report_one_error() {
    let (listener, port) = daemon().await;
    drop(listener);

    let mut session = Session::new(config(port, SessionRole::Control));
    let mut errors = collect(&mut session, &[SessionEventKind::Error]);
    let handle = session.connect();

    assert!(matches!(next_event(&mut errors).await, SessionEvent::Error(_)));
    // 多个重连周期之后仍然只有一次
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(errors.try_recv().is_err());
    assert_ne!(handle.state(), ConnectionState::Connected);

    // 未连接时发送的命令被丢弃而不是报错
    assert!(handle.send(PvdCommand::GetList).is_ok());
    handle.close();
}

#[tokio::test]
async fn keepalive_probe_is_a_bare_newline() {
    let (listener, port) = daemon().await;
    let mut config = config(port, SessionRole::Regular);
    config.keepalive = true;
    let handle = Session::new(config).connect();

    let (read, _write) = accept(&listener).await.into_split();
    let mut reader = BufReader::new(read);
    for _ in 0..3 {
        read_line(&mut reader).await;
    }
    assert_eq!(read_line(&mut reader).await, "");
    handle.close();
}

#[tokio::test]
async fn close_stops_the_loop() {
    let (listener, port) = daemon().await;
    let handle = Session::new(config(port, SessionRole::Regular)).connect();
    let _stream = accept(&listener).await;
    timeout(WAIT, handle.wait_for_state(ConnectionState::Connected))
        .await
        .expect("state timeout")
        .expect("state");

    handle.close();
    assert!(handle.is_closed());
    assert!(handle.send(PvdCommand::GetList).is_err());
    timeout(WAIT, handle.wait_for_state(ConnectionState::Disconnected))
        .await
        .expect("state timeout")
        .ok();
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}
