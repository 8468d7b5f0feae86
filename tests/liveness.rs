//! Session liveness under paused time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use supla_server_core::config::ActivityTimeout;
use supla_server_core::host::{DeviceStatus, OfflineReason};
use supla_server_core::protocol::message::{PingServer, Timeval};
use supla_server_core::protocol::Message;
use supla_server_core::session::{EngineContext, SessionState};

fn offline_reason(listener: &RecordingListener) -> Option<(OfflineReason, String)> {
    listener.statuses().into_iter().find_map(|s| match s {
        DeviceStatus::Offline { reason, message } => Some((reason, message)),
        DeviceStatus::Online => None,
    })
}

#[tokio::test(start_paused = true)]
async fn silent_device_is_disposed() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx.clone());
    register(&mut h).await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(offline_reason(&h.listener).is_none());
    assert!(!h.session.is_disposed());

    tokio::time::sleep(Duration::from_secs(15)).await;
    let (reason, message) = offline_reason(&h.listener).expect("device should be offline");
    assert_eq!(reason, OfflineReason::LivenessTimeout);
    assert!(message.contains("limit 12s"), "{message}");
    assert_eq!(h.session.state(), SessionState::Disposed);
    assert_eq!(ctx.metrics.snapshot().liveness_breaches, 1);
    assert!(next_frame(&mut h.device).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn pinging_device_stays_online() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx.clone());
    register(&mut h).await;

    for rr_id in 10..22 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        send(&mut h.device, &Message::PingServer(PingServer { now: Timeval::now() }), rr_id).await;
        let (reply_rr, reply) = next_message(&mut h.device).await;
        assert_eq!(reply_rr, rr_id);
        assert!(matches!(reply, Message::PingServerResult(_)));
    }

    assert!(offline_reason(&h.listener).is_none());
    assert_eq!(h.session.state(), SessionState::Registered);
    assert_eq!(ctx.metrics.snapshot().liveness_breaches, 0);
}

#[tokio::test(start_paused = true)]
async fn unregistered_connection_is_closed_at_the_deadline() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(h.session.state(), SessionState::Unauthenticated);
    assert!(h.listener.statuses().is_empty());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let (reason, message) = offline_reason(&h.listener).expect("idle connection dropped");
    assert_eq!(reason, OfflineReason::LivenessTimeout);
    assert_eq!(message, "No registration within 30s");
    assert_eq!(h.session.state(), SessionState::Disposed);
    assert!(next_frame(&mut h.device).await.is_none());
    assert!(h.task.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn registration_before_the_deadline_disarms_it() {
    let mut config = location_config();
    config.activity_timeout = ActivityTimeout::new(60, 30, 90);
    let ctx = Arc::new(EngineContext::new(config));
    let mut h = connect(ctx);

    tokio::time::sleep(Duration::from_secs(20)).await;
    register(&mut h).await;

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert!(offline_reason(&h.listener).is_none());
    assert_eq!(h.session.state(), SessionState::Registered);
}
