//! Many devices against one TCP listener.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use futures::{SinkExt, StreamExt};
use supla_server_core::core::codec::FrameCodec;
use supla_server_core::host::{DeviceListener, DeviceStatus, OfflineReason};
use supla_server_core::protocol::message::ResultCode;
use supla_server_core::protocol::{Dispatcher, Message};
use supla_server_core::session::EngineContext;
use supla_server_core::transport::{DeviceServer, ListenerFactory};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

type Listeners = Arc<Mutex<Vec<Arc<RecordingListener>>>>;

async fn start_server(
    ctx: Arc<EngineContext>,
) -> (SocketAddr, Listeners, mpsc::Sender<()>, tokio::task::JoinHandle<supla_server_core::Result<()>>) {
    let listeners: Listeners = Arc::default();
    let created = listeners.clone();
    let factory: ListenerFactory = Arc::new(move |_peer| {
        let listener = Arc::new(RecordingListener::default());
        created.lock().unwrap().push(listener.clone());
        listener as Arc<dyn DeviceListener>
    });

    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let server = DeviceServer::new(ctx, factory).unwrap();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(server.serve(tcp, shutdown_rx));
    (addr, listeners, shutdown_tx, task)
}

async fn register_over_tcp(addr: SocketAddr, index: u8) -> Framed<TcpStream, FrameCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut device = Framed::new(stream, FrameCodec::default());
    let mut request = relay_device(1, "none");
    request.guid[15] = index;
    request.name = format!("Relay {index}");
    device
        .send(frame(&Message::RegisterDevice(request), u32::from(index)))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), device.next())
        .await
        .expect("registration reply in time")
        .expect("connection open")
        .unwrap();
    assert_eq!(reply.rr_id, u32::from(index));
    match Dispatcher::new().decode_frame(&reply).unwrap() {
        Message::RegisterDeviceResult(r) => assert_eq!(r.result_code, ResultCode::True),
        other => panic!("unexpected reply: {other:?}"),
    }
    device
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registrations_and_shutdown() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let (addr, listeners, shutdown_tx, server) = start_server(ctx.clone()).await;

    let devices = 32u8;
    let mut tasks = JoinSet::new();
    for index in 0..devices {
        tasks.spawn(async move {
            let mut device = register_over_tcp(addr, index).await;
            device
                .send(frame(&Message::GetVersion, 1000 + u32::from(index)))
                .await
                .unwrap();
            let reply = device.next().await.unwrap().unwrap();
            assert_eq!(reply.rr_id, 1000 + u32::from(index));
            device
        });
    }
    let mut connected = Vec::new();
    while let Some(res) = tasks.join_next().await {
        connected.push(res.unwrap());
    }

    for _ in 0..500 {
        if ctx.session_count() == usize::from(devices) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ctx.session_count(), usize::from(devices));
    let snapshot = ctx.metrics.snapshot();
    assert_eq!(snapshot.devices_connected, u64::from(devices));
    assert_eq!(snapshot.registrations_accepted, u64::from(devices));

    shutdown_tx.send(()).await.unwrap();
    server.await.unwrap().unwrap();

    for device in &mut connected {
        let next = tokio::time::timeout(Duration::from_secs(5), device.next())
            .await
            .expect("connection closes after shutdown");
        assert!(next.is_none() || next.unwrap().is_err());
    }
    for listener in listeners.lock().unwrap().iter() {
        assert!(listener.statuses().contains(&DeviceStatus::offline(
            OfflineReason::Disposed,
            "Server shutting down"
        )));
    }
    assert_eq!(ctx.metrics.snapshot().devices_connected, 0);
    assert_eq!(ctx.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_over_the_limit_are_refused() {
    let mut config = location_config();
    config.server.max_connections = 1;
    let ctx = Arc::new(EngineContext::new(config));
    let (addr, _listeners, shutdown_tx, server) = start_server(ctx.clone()).await;

    let _first = register_over_tcp(addr, 1).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut second = Framed::new(stream, FrameCodec::default());
    let closed = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("refused connection closes");
    assert!(closed.is_none() || closed.unwrap().is_err());
    assert_eq!(ctx.metrics.snapshot().connections_refused, 1);

    shutdown_tx.send(()).await.unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_commands_reach_the_device_in_full() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    let mut tasks = JoinSet::new();
    for i in 0..64u32 {
        let session = h.session.clone();
        tasks.spawn(async move {
            let value = supla_server_core::protocol::ChannelValue::OnOff(i % 2 == 0);
            session.set_value(0, &value).await
        });
    }

    let mut received = 0;
    while received < 64 {
        let frame = next_frame(&mut h.device).await.expect("command frame");
        assert!(matches!(
            Dispatcher::new().decode_frame(&frame).unwrap(),
            Message::ChannelNewValue(_)
        ));
        received += 1;
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap().unwrap();
    }
}
