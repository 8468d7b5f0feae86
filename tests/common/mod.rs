//! Shared helpers for session-level integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use supla_server_core::config::{AuthConfig, EngineConfig};
use supla_server_core::core::codec::FrameCodec;
use supla_server_core::core::frame::Frame;
use supla_server_core::host::{DeviceListener, DeviceRegistration, DeviceStatus};
use supla_server_core::protocol::channel_value::ChannelValue;
use supla_server_core::protocol::device_config::DecodedDeviceConfig;
use supla_server_core::protocol::message::{ChannelNewValueResult, ChannelState, GUID_SIZE};
use supla_server_core::protocol::registration::{
    ChannelDescriptor, Credential, RegisterDevice, RegistrationVariant,
};
use supla_server_core::protocol::{Dispatcher, Message};
use supla_server_core::session::{EngineContext, Session};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub const GUID: [u8; GUID_SIZE] = [
    0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
];

pub const RELAY: i32 = 2900;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Registered(DeviceRegistration),
    Value(u8, ChannelValue),
    Extended(u8, ChannelValue),
    Caption(u8, String),
    NewValueResult(ChannelNewValueResult),
    State(ChannelState),
    Config(DecodedDeviceConfig),
    Trigger(u8, u32),
    Status(DeviceStatus),
}

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    /// Poll until `pred` holds, failing after five (virtual or real) seconds.
    pub async fn wait_for(&self, what: &str, pred: impl Fn(&[Event]) -> bool) {
        for _ in 0..500 {
            if pred(&self.events()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}; events: {:?}", self.events());
    }
}

impl DeviceListener for RecordingListener {
    fn on_registered(&self, registration: &DeviceRegistration) {
        self.push(Event::Registered(registration.clone()));
    }

    fn on_channel_value(&self, channel: u8, value: &ChannelValue) {
        self.push(Event::Value(channel, value.clone()));
    }

    fn on_status(&self, status: &DeviceStatus) {
        self.push(Event::Status(status.clone()));
    }

    fn on_extended_value(&self, channel: u8, value: &ChannelValue) {
        self.push(Event::Extended(channel, value.clone()));
    }

    fn on_caption(&self, channel: u8, caption: &str) {
        self.push(Event::Caption(channel, caption.to_string()));
    }

    fn on_new_value_result(&self, result: &ChannelNewValueResult) {
        self.push(Event::NewValueResult(*result));
    }

    fn on_channel_state(&self, state: &ChannelState) {
        self.push(Event::State(*state));
    }

    fn on_device_config(&self, config: &DecodedDeviceConfig) {
        self.push(Event::Config(config.clone()));
    }

    fn on_action_trigger(&self, channel: u8, action: u32) {
        self.push(Event::Trigger(channel, action));
    }
}

pub fn location_config() -> EngineConfig {
    EngineConfig::default_with_overrides(|c| {
        c.auth = AuthConfig::location(1, "none");
    })
}

pub fn relay_device(access_id: i32, password: &str) -> RegisterDevice {
    RegisterDevice {
        variant: RegistrationVariant::A,
        guid: GUID,
        name: "Relay box".into(),
        soft_ver: "2.8.0".into(),
        server_name: None,
        credential: Credential::Location {
            access_id,
            password: password.into(),
        },
        flags: None,
        manufacturer_id: None,
        product_id: None,
        channels: vec![ChannelDescriptor::new(0, RELAY)],
    }
}

pub type Device = Framed<DuplexStream, FrameCodec>;

pub struct Harness {
    pub ctx: Arc<EngineContext>,
    pub listener: Arc<RecordingListener>,
    pub session: Arc<Session>,
    pub task: JoinHandle<supla_server_core::Result<()>>,
    pub device: Device,
}

pub fn connect(ctx: Arc<EngineContext>) -> Harness {
    let listener = Arc::new(RecordingListener::default());
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (session, task) = Session::spawn(server, "duplex", ctx.clone(), listener.clone());
    Harness {
        ctx,
        listener,
        session,
        task,
        device: Framed::new(client, FrameCodec::default()),
    }
}

pub fn frame(message: &Message, rr_id: u32) -> Frame {
    Dispatcher::new().encode_frame(message, rr_id).unwrap()
}

pub async fn send(device: &mut Device, message: &Message, rr_id: u32) {
    device.send(frame(message, rr_id)).await.unwrap();
}

pub async fn next_frame(device: &mut Device) -> Option<Frame> {
    tokio::time::timeout(Duration::from_secs(5), device.next())
        .await
        .expect("no frame within five seconds")
        .map(|r| r.unwrap())
}

pub async fn next_message(device: &mut Device) -> (u32, Message) {
    let frame = next_frame(device).await.expect("connection closed");
    let message = Dispatcher::new().decode_frame(&frame).unwrap();
    (frame.rr_id, message)
}

/// Register the default relay device and consume the result frame.
pub async fn register(h: &mut Harness) {
    send(&mut h.device, &Message::RegisterDevice(relay_device(1, "none")), 1).await;
    let (_, reply) = next_message(&mut h.device).await;
    assert!(matches!(reply, Message::RegisterDeviceResult(_)), "{reply:?}");
    h.listener
        .wait_for("online status", |events| {
            events.iter().any(|e| matches!(e, Event::Status(DeviceStatus::Online)))
        })
        .await;
}
