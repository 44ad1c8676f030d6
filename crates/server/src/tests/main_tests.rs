use std::{net::SocketAddr, time::Duration};

use super::*;
use axum::{body, body::Body, http::Request};
use device::{
    ActuatorCall, DeviceHandle, DeviceOptions, DisabledVideoPublisher, SimulatedActuator,
};
use futures::SinkExt;
use shared::domain::IndicatorMode;
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn test_app() -> (Router, Arc<SimulatedActuator>) {
    let actuator = Arc::new(SimulatedActuator::new());
    let device = DeviceHandle::acquire(actuator.clone(), DeviceOptions::default())
        .await
        .expect("acquire");
    let lifecycle = Lifecycle::new(Arc::new(DisabledVideoPublisher), &Settings::default());
    let state = Arc::new(AppState {
        control: ControlContext::new(device, lifecycle.shutdown_sender()),
        sessions: lifecycle.sessions(),
        shutdown: lifecycle.subscribe(),
    });
    (build_router(state), actuator)
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (app, _actuator) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn status_route_returns_the_device_snapshot() {
    let (app, _actuator) = test_app().await;
    let request = Request::get("/status")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let snapshot: DeviceSnapshot = serde_json::from_slice(&body).expect("json");
    assert!(!snapshot.busy);
    assert!(!snapshot.released);
    assert_eq!(snapshot.head, shared::domain::HeadPose::default());
}

async fn start_server(
    actuator: Arc<SimulatedActuator>,
) -> (Arc<Lifecycle>, SocketAddr, JoinHandle<anyhow::Result<()>>) {
    let settings = Settings {
        server_bind: "127.0.0.1:0".into(),
        drain_timeout: Duration::from_secs(2),
        ..Settings::default()
    };
    let lifecycle = Lifecycle::new(Arc::new(DisabledVideoPublisher), &settings);
    let started = lifecycle
        .start(actuator, &settings)
        .await
        .expect("startup");
    let addr = started.listener.local_addr().expect("addr");
    let server = tokio::spawn(serve(lifecycle.clone(), settings, started));
    (lifecycle, addr, server)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("connect");
    client
}

async fn request(client: &mut Client, text: &str) -> String {
    client
        .send(WsMessage::Text(text.into()))
        .await
        .expect("send");
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("reply in time")
            .expect("stream open")
            .expect("frame");
        if frame.is_text() {
            return frame.to_text().expect("text").to_string();
        }
    }
}

/// Reads until the server closes the connection.
async fn closed_by_server(client: &mut Client) -> bool {
    loop {
        match timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}

#[tokio::test]
async fn websocket_sessions_run_commands_and_close_on_shutdown() {
    let actuator = Arc::new(SimulatedActuator::new());
    let (lifecycle, addr, server) = start_server(actuator.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    assert_eq!(
        request(&mut first, r#"{"command":"sit"}"#).await,
        r#"{"status":"success","command":"sit"}"#
    );
    let malformed = request(&mut first, "{not json").await;
    assert!(malformed.contains(r#""status":"error""#));
    assert_eq!(
        request(&mut first, r#"{"command":"stand"}"#).await,
        r#"{"status":"success","command":"stand"}"#
    );

    assert_eq!(
        request(&mut second, r#"{"command":"shutdown"}"#).await,
        r#"{"status":"success","command":"shutdown"}"#
    );

    assert!(closed_by_server(&mut first).await);
    assert!(closed_by_server(&mut second).await);

    timeout(Duration::from_secs(10), server)
        .await
        .expect("server stops")
        .expect("server task")
        .expect("clean shutdown");

    assert_eq!(actuator.close_count(), 1);
    assert!(actuator
        .calls()
        .contains(&ActuatorCall::Indicator(IndicatorMode::off())));
    assert_eq!(actuator.max_in_flight(), 1);
    assert_eq!(lifecycle.sessions().active(), 0);

    // a second trigger after completion is a no-op
    lifecycle.shutdown().await;
    assert_eq!(actuator.close_count(), 1);
}

#[tokio::test]
async fn concurrent_clients_never_overlap_in_the_driver() {
    let actuator = Arc::new(SimulatedActuator::new().with_latency(Duration::from_millis(1)));
    let (lifecycle, addr, server) = start_server(actuator.clone()).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(addr).await);
    }
    let mut tasks = Vec::new();
    for (i, mut client) in clients.into_iter().enumerate() {
        tasks.push(tokio::spawn(async move {
            let head = format!(r#"{{"command":"head_move","data":{{"yaw":{}}}}}"#, i * 10);
            client
                .send(WsMessage::Text(head.as_str().into()))
                .await
                .expect("send");
            for command in ["sit", "stand", "sit"] {
                let reply = request(&mut client, &format!(r#"{{"command":"{command}"}}"#)).await;
                assert!(reply.contains(r#""status":"success""#), "{reply}");
            }
            client
        }));
    }
    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.expect("client task"));
    }

    assert_eq!(actuator.max_in_flight(), 1);
    assert_eq!(actuator.motions().len(), 9);

    lifecycle.shutdown().await;
    for client in &mut clients {
        assert!(closed_by_server(client).await);
    }
    timeout(Duration::from_secs(10), server)
        .await
        .expect("server stops")
        .expect("server task")
        .expect("clean shutdown");
    assert_eq!(actuator.close_count(), 1);
}
