//! # Host Collaborator Surface
//!
//! Traits the embedding application implements to receive device events, and
//! the event types passed through them.
//!
//! Callbacks run on the connection's I/O task and must not block. A host that
//! needs to do slow work should hand the event to its own task.

use std::fmt;

use crate::protocol::channel_value::ChannelValue;
use crate::protocol::device_config::DecodedDeviceConfig;
use crate::protocol::message::{ChannelNewValueResult, ChannelState, DeviceCalCfgResult, GUID_SIZE};
use crate::protocol::registration::{guid_hex, ChannelDescriptor, RegisterDevice, RegistrationVariant};

/// Identity and channel list of a device (or gateway sub-device) that has registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub guid: [u8; GUID_SIZE],
    /// Set when this registration describes a sub-device behind a gateway
    pub sub_device_id: Option<u8>,
    pub name: String,
    pub soft_ver: String,
    pub variant: RegistrationVariant,
    pub manufacturer_id: Option<i16>,
    pub product_id: Option<i16>,
    pub sleep_mode: bool,
    pub channels: Vec<ChannelDescriptor>,
}

impl DeviceRegistration {
    pub fn from_request(reg: &RegisterDevice) -> Self {
        Self {
            guid: reg.guid,
            sub_device_id: None,
            name: reg.name.clone(),
            soft_ver: reg.soft_ver.clone(),
            variant: reg.variant,
            manufacturer_id: reg.manufacturer_id,
            product_id: reg.product_id,
            sleep_mode: reg.sleep_mode_enabled(),
            channels: reg.channels.clone(),
        }
    }

    pub fn guid_hex(&self) -> String {
        guid_hex(&self.guid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    AuthorizationFailed,
    CommunicationError,
    LivenessTimeout,
    UnsupportedVersion,
    /// Host-requested or server shutdown
    Disposed,
    /// Parent gateway went away
    GatewayDisconnected,
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OfflineReason::AuthorizationFailed => "authorization failed",
            OfflineReason::CommunicationError => "communication error",
            OfflineReason::LivenessTimeout => "liveness timeout",
            OfflineReason::UnsupportedVersion => "unsupported protocol version",
            OfflineReason::Disposed => "disposed",
            OfflineReason::GatewayDisconnected => "gateway disconnected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline { reason: OfflineReason, message: String },
}

impl DeviceStatus {
    pub fn offline(reason: OfflineReason, message: impl Into<String>) -> Self {
        DeviceStatus::Offline {
            reason,
            message: message.into(),
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, DeviceStatus::Online)
    }
}

/// Receives everything a device session produces.
///
/// Also serves as the handle for a gateway sub-device: the gateway router
/// delivers sub-device events to the listener attached for that id.
pub trait DeviceListener: Send + Sync {
    fn on_registered(&self, registration: &DeviceRegistration);

    fn on_channel_value(&self, channel: u8, value: &ChannelValue);

    fn on_status(&self, status: &DeviceStatus);

    fn on_extended_value(&self, _channel: u8, _value: &ChannelValue) {}

    fn on_caption(&self, _channel: u8, _caption: &str) {}

    fn on_new_value_result(&self, _result: &ChannelNewValueResult) {}

    fn on_channel_state(&self, _state: &ChannelState) {}

    fn on_device_config(&self, _config: &DecodedDeviceConfig) {}

    fn on_action_trigger(&self, _channel: u8, _action: u32) {}

    fn on_calcfg_result(&self, _result: &DeviceCalCfgResult) {}
}

/// A sub-device seen in a gateway's channel list with nobody attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSubDevice {
    pub gateway_guid: [u8; GUID_SIZE],
    pub sub_device_id: u8,
    pub suggested_name: String,
    pub channels: Vec<ChannelDescriptor>,
}

pub trait DiscoveryListener: Send + Sync {
    fn report(&self, device: DiscoveredSubDevice);

    fn retract(&self, gateway_guid: &[u8; GUID_SIZE], sub_device_id: u8);
}

/// Discovery sink for hosts without a discovery service.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

impl DiscoveryListener for NoDiscovery {
    fn report(&self, device: DiscoveredSubDevice) {
        tracing::debug!(
            gateway = %guid_hex(&device.gateway_guid),
            sub_device = device.sub_device_id,
            "Discovered sub-device ignored"
        );
    }

    fn retract(&self, _gateway_guid: &[u8; GUID_SIZE], _sub_device_id: u8) {}
}
