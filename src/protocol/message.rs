//! # Protocol Messages
//!
//! Fixed-layout structures for every call type and the [`Message`] union that
//! ties them to call-type ids.
//!
//! Each structure implements [`WireFormat`], which reads and writes the packed
//! little-endian layout. Variable-length tails (captions, config blobs,
//! channel lists) are length-prefixed and bounded by the constants below.

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::call_type::CallType;
use crate::protocol::registration::RegisterDevice;

pub const GUID_SIZE: usize = 16;
pub const AUTHKEY_SIZE: usize = 16;
pub const LOCATION_PWD_MAXSIZE: usize = 33;
pub const DEVICE_NAME_MAXSIZE: usize = 201;
pub const SOFTVER_MAXSIZE: usize = 21;
pub const SERVER_NAME_MAXSIZE: usize = 65;
pub const EMAIL_MAXSIZE: usize = 256;
pub const CAPTION_MAXSIZE: usize = 401;
pub const URL_HOST_MAXSIZE: usize = 101;
pub const URL_PATH_MAXSIZE: usize = 101;
pub const SUBDEVICE_NAME_MAXSIZE: usize = 121;
pub const PRODUCT_CODE_MAXSIZE: usize = 51;
pub const SERIAL_NUMBER_MAXSIZE: usize = 51;
pub const TIMEZONE_MAXSIZE: usize = 51;
pub const CHANNEL_VALUE_SIZE: usize = 8;
pub const CHANNEL_EXTENDED_VALUE_SIZE: usize = 512;
pub const CHANNEL_MAXCOUNT: usize = 128;
pub const CALCFG_DATA_MAXSIZE: usize = 128;
pub const CHANNEL_CONFIG_MAXSIZE: usize = 512;
pub const DEVICE_CONFIG_MAXSIZE: usize = 512;

pub type ChannelValueBytes = [u8; CHANNEL_VALUE_SIZE];

/// Packed little-endian layout of one protocol structure.
pub trait WireFormat: Sized {
    const NAME: &'static str;

    fn decode(r: &mut WireReader<'_>) -> Result<Self>;

    fn encode(&self, w: &mut WireWriter) -> Result<()>;

    /// Decode a whole payload, rejecting trailing bytes.
    fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload, Self::NAME);
        let value = Self::decode(&mut r)?;
        r.finish()?;
        Ok(value)
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::new();
        self.encode(&mut w)?;
        Ok(w.into_vec())
    }
}

/// Result codes shared by registration and configuration replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    None,
    Unsupported,
    False,
    True,
    TemporarilyUnavailable,
    BadCredentials,
    LocationConflict,
    ChannelConflict,
    DeviceDisabled,
    AccessIdDisabled,
    LocationDisabled,
    GuidError,
    RegistrationDisabled,
    AccessIdNotAssigned,
    AuthKeyError,
    Other(i32),
}

impl ResultCode {
    pub fn to_i32(self) -> i32 {
        match self {
            ResultCode::None => 0,
            ResultCode::Unsupported => 1,
            ResultCode::False => 2,
            ResultCode::True => 3,
            ResultCode::TemporarilyUnavailable => 4,
            ResultCode::BadCredentials => 5,
            ResultCode::LocationConflict => 6,
            ResultCode::ChannelConflict => 7,
            ResultCode::DeviceDisabled => 8,
            ResultCode::AccessIdDisabled => 9,
            ResultCode::LocationDisabled => 10,
            ResultCode::GuidError => 14,
            ResultCode::RegistrationDisabled => 17,
            ResultCode::AccessIdNotAssigned => 18,
            ResultCode::AuthKeyError => 19,
            ResultCode::Other(v) => v,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => ResultCode::None,
            1 => ResultCode::Unsupported,
            2 => ResultCode::False,
            3 => ResultCode::True,
            4 => ResultCode::TemporarilyUnavailable,
            5 => ResultCode::BadCredentials,
            6 => ResultCode::LocationConflict,
            7 => ResultCode::ChannelConflict,
            8 => ResultCode::DeviceDisabled,
            9 => ResultCode::AccessIdDisabled,
            10 => ResultCode::LocationDisabled,
            14 => ResultCode::GuidError,
            17 => ResultCode::RegistrationDisabled,
            18 => ResultCode::AccessIdNotAssigned,
            19 => ResultCode::AuthKeyError,
            other => ResultCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeval {
    pub sec: i64,
    pub usec: i64,
}

impl Timeval {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            sec: now.timestamp(),
            usec: i64::from(now.timestamp_subsec_micros()),
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sec: r.i64()?,
            usec: r.i64()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.i64(self.sec).i64(self.usec);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVersionResult {
    pub proto_version_min: u8,
    pub proto_version: u8,
    pub soft_ver: String,
}

impl WireFormat for GetVersionResult {
    const NAME: &'static str = "GetVersionResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            proto_version_min: r.u8()?,
            proto_version: r.u8()?,
            soft_ver: r.fixed_str(SOFTVER_MAXSIZE)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.proto_version_min).u8(self.proto_version);
        w.fixed_str(&self.soft_ver, SOFTVER_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionError {
    pub server_version_min: u8,
    pub server_version: u8,
}

impl WireFormat for VersionError {
    const NAME: &'static str = "VersionError";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            server_version_min: r.u8()?,
            server_version: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.server_version_min).u8(self.server_version);
        Ok(())
    }
}

/// Ping request and result share the same layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingServer {
    pub now: Timeval,
}

impl WireFormat for PingServer {
    const NAME: &'static str = "PingServer";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            now: Timeval::decode(r)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        self.now.encode(w);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDeviceResult {
    pub result_code: ResultCode,
    pub activity_timeout: u8,
    pub version: u8,
    pub version_min: u8,
}

impl WireFormat for RegisterDeviceResult {
    const NAME: &'static str = "RegisterDeviceResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            result_code: ResultCode::from_i32(r.i32()?),
            activity_timeout: r.u8()?,
            version: r.u8()?,
            version_min: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.result_code.to_i32())
            .u8(self.activity_timeout)
            .u8(self.version)
            .u8(self.version_min);
        Ok(())
    }
}

/// Registration reply for the newer families; adds the server clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDeviceResultB {
    pub result_code: ResultCode,
    pub activity_timeout: u8,
    pub version: u8,
    pub version_min: u8,
    pub server_unix_timestamp: i32,
}

impl WireFormat for RegisterDeviceResultB {
    const NAME: &'static str = "RegisterDeviceResultB";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            result_code: ResultCode::from_i32(r.i32()?),
            activity_timeout: r.u8()?,
            version: r.u8()?,
            version_min: r.u8()?,
            server_unix_timestamp: r.i32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.result_code.to_i32())
            .u8(self.activity_timeout)
            .u8(self.version)
            .u8(self.version_min)
            .i32(self.server_unix_timestamp);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValueChanged {
    pub channel_number: u8,
    pub value: ChannelValueBytes,
}

impl WireFormat for ChannelValueChanged {
    const NAME: &'static str = "ChannelValueChanged";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            value: r.array()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number).bytes(&self.value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValueChangedB {
    pub channel_number: u8,
    pub offline: bool,
    pub value: ChannelValueBytes,
}

impl WireFormat for ChannelValueChangedB {
    const NAME: &'static str = "ChannelValueChangedB";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            offline: r.bool()?,
            value: r.array()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number).bool(self.offline).bytes(&self.value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValueChangedC {
    pub channel_number: u8,
    pub offline: bool,
    pub validity_time_sec: u32,
    pub value: ChannelValueBytes,
}

impl WireFormat for ChannelValueChangedC {
    const NAME: &'static str = "ChannelValueChangedC";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            offline: r.bool()?,
            validity_time_sec: r.u32()?,
            value: r.array()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number)
            .bool(self.offline)
            .u32(self.validity_time_sec)
            .bytes(&self.value);
        Ok(())
    }
}

/// Typed, variable-length channel payload (electricity meter readings etc).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedValue {
    pub ev_type: i8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExtendedValueChanged {
    pub channel_number: u8,
    pub value: ExtendedValue,
}

impl WireFormat for ChannelExtendedValueChanged {
    const NAME: &'static str = "ChannelExtendedValueChanged";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let channel_number = r.u8()?;
        let ev_type = r.i8()?;
        let value = r.sized_bytes(CHANNEL_EXTENDED_VALUE_SIZE)?.to_vec();
        Ok(Self {
            channel_number,
            value: ExtendedValue { ev_type, value },
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number).i8(self.value.ev_type);
        w.sized_bytes(&self.value.value, CHANNEL_EXTENDED_VALUE_SIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNewValue {
    pub sender_id: i32,
    pub channel_number: u8,
    pub duration_ms: u32,
    pub value: ChannelValueBytes,
}

impl WireFormat for ChannelNewValue {
    const NAME: &'static str = "ChannelNewValue";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sender_id: r.i32()?,
            channel_number: r.u8()?,
            duration_ms: r.u32()?,
            value: r.array()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.sender_id)
            .u8(self.channel_number)
            .u32(self.duration_ms)
            .bytes(&self.value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelGroupNewValue {
    pub sender_id: i32,
    pub group_id: i32,
    /// Set on the last channel of the group
    pub eol: bool,
    pub channel_number: u8,
    pub duration_ms: u32,
    pub value: ChannelValueBytes,
}

impl WireFormat for ChannelGroupNewValue {
    const NAME: &'static str = "ChannelGroupNewValue";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sender_id: r.i32()?,
            group_id: r.i32()?,
            eol: r.bool()?,
            channel_number: r.u8()?,
            duration_ms: r.u32()?,
            value: r.array()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.sender_id)
            .i32(self.group_id)
            .bool(self.eol)
            .u8(self.channel_number)
            .u32(self.duration_ms)
            .bytes(&self.value);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNewValueResult {
    pub channel_number: u8,
    pub sender_id: i32,
    pub success: bool,
}

impl WireFormat for ChannelNewValueResult {
    const NAME: &'static str = "ChannelNewValueResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            sender_id: r.i32()?,
            success: r.bool()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number)
            .i32(self.sender_id)
            .bool(self.success);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetActivityTimeout {
    pub activity_timeout: u8,
}

impl WireFormat for SetActivityTimeout {
    const NAME: &'static str = "SetActivityTimeout";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            activity_timeout: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.activity_timeout);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetActivityTimeoutResult {
    pub activity_timeout: u8,
    pub min: u8,
    pub max: u8,
}

impl WireFormat for SetActivityTimeoutResult {
    const NAME: &'static str = "SetActivityTimeoutResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            activity_timeout: r.u8()?,
            min: r.u8()?,
            max: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.activity_timeout).u8(self.min).u8(self.max);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareUpdateParams {
    pub platform: u8,
    pub param1: i32,
    pub param2: i32,
    pub param3: i32,
    pub param4: i32,
}

impl WireFormat for FirmwareUpdateParams {
    const NAME: &'static str = "FirmwareUpdateParams";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            platform: r.u8()?,
            param1: r.i32()?,
            param2: r.i32()?,
            param3: r.i32()?,
            param4: r.i32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.platform)
            .i32(self.param1)
            .i32(self.param2)
            .i32(self.param3)
            .i32(self.param4);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareUpdateUrl {
    pub available_protocols: u8,
    pub host: String,
    pub port: i32,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareUpdateUrlResult {
    pub exists: bool,
    pub url: FirmwareUpdateUrl,
}

impl FirmwareUpdateUrlResult {
    pub fn none() -> Self {
        Self {
            exists: false,
            url: FirmwareUpdateUrl::default(),
        }
    }
}

impl WireFormat for FirmwareUpdateUrlResult {
    const NAME: &'static str = "FirmwareUpdateUrlResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            exists: r.bool()?,
            url: FirmwareUpdateUrl {
                available_protocols: r.u8()?,
                host: r.fixed_str(URL_HOST_MAXSIZE)?,
                port: r.i32()?,
                path: r.fixed_str(URL_PATH_MAXSIZE)?,
            },
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.bool(self.exists).u8(self.url.available_protocols);
        w.fixed_str(&self.url.host, URL_HOST_MAXSIZE)?;
        w.i32(self.url.port);
        w.fixed_str(&self.url.path, URL_PATH_MAXSIZE)?;
        Ok(())
    }
}

/// Unix timestamps until which new clients/devices may register; zero means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationEnabled {
    pub client_timestamp: u32,
    pub iodevice_timestamp: u32,
}

impl WireFormat for RegistrationEnabled {
    const NAME: &'static str = "RegistrationEnabled";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_timestamp: r.u32()?,
            iodevice_timestamp: r.u32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u32(self.client_timestamp).u32(self.iodevice_timestamp);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCalCfgRequest {
    pub sender_id: i32,
    pub channel_number: i32,
    pub command: i32,
    pub super_user_authorized: bool,
    pub data_type: i32,
    pub data: Vec<u8>,
}

impl WireFormat for DeviceCalCfgRequest {
    const NAME: &'static str = "DeviceCalCfgRequest";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sender_id: r.i32()?,
            channel_number: r.i32()?,
            command: r.i32()?,
            super_user_authorized: r.bool()?,
            data_type: r.i32()?,
            data: r.sized_bytes(CALCFG_DATA_MAXSIZE)?.to_vec(),
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.sender_id)
            .i32(self.channel_number)
            .i32(self.command)
            .bool(self.super_user_authorized)
            .i32(self.data_type);
        w.sized_bytes(&self.data, CALCFG_DATA_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCalCfgResult {
    pub receiver_id: i32,
    pub channel_number: i32,
    pub command: i32,
    pub result: i32,
    pub data: Vec<u8>,
}

impl WireFormat for DeviceCalCfgResult {
    const NAME: &'static str = "DeviceCalCfgResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            receiver_id: r.i32()?,
            channel_number: r.i32()?,
            command: r.i32()?,
            result: r.i32()?,
            data: r.sized_bytes(CALCFG_DATA_MAXSIZE)?.to_vec(),
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.receiver_id)
            .i32(self.channel_number)
            .i32(self.command)
            .i32(self.result);
        w.sized_bytes(&self.data, CALCFG_DATA_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLocaltimeResult {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 1 = Sunday
    pub day_of_week: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
    pub timezone: String,
}

impl UserLocaltimeResult {
    pub fn now() -> Self {
        use chrono::{Datelike, Local, Timelike};
        let now = Local::now();
        Self {
            year: now.year().clamp(0, i32::from(u16::MAX)) as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            day_of_week: now.weekday().number_from_sunday() as u8,
            hour: now.hour() as u8,
            min: now.minute() as u8,
            sec: now.second() as u8,
            timezone: now.format("%:z").to_string(),
        }
    }
}

impl WireFormat for UserLocaltimeResult {
    const NAME: &'static str = "UserLocaltimeResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            year: r.u16()?,
            month: r.u8()?,
            day: r.u8()?,
            day_of_week: r.u8()?,
            hour: r.u8()?,
            min: r.u8()?,
            sec: r.u8()?,
            timezone: r.sized_str(TIMEZONE_MAXSIZE)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u16(self.year)
            .u8(self.month)
            .u8(self.day)
            .u8(self.day_of_week)
            .u8(self.hour)
            .u8(self.min)
            .u8(self.sec);
        w.sized_str(&self.timezone, TIMEZONE_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStateRequest {
    pub sender_id: i32,
    pub channel_number: i32,
}

impl WireFormat for ChannelStateRequest {
    const NAME: &'static str = "ChannelStateRequest";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sender_id: r.i32()?,
            channel_number: r.i32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.sender_id).i32(self.channel_number);
        Ok(())
    }
}

/// Diagnostic snapshot of one channel; `fields` says which members are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub receiver_id: i32,
    pub channel_number: i32,
    pub fields: u32,
    pub default_icon_field: u32,
    pub ipv4: u32,
    pub mac: [u8; 6],
    pub battery_level: u8,
    pub battery_powered: bool,
    pub wifi_rssi: i8,
    pub wifi_signal_strength: u8,
    pub bridge_node_online: bool,
    pub bridge_node_signal_strength: u8,
    pub uptime: u32,
    pub connection_uptime: u32,
    pub battery_health: u8,
    pub last_connection_reset_cause: u8,
    pub light_source_lifespan: u16,
    pub light_source_operating_time: i32,
}

impl WireFormat for ChannelState {
    const NAME: &'static str = "ChannelState";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            receiver_id: r.i32()?,
            channel_number: r.i32()?,
            fields: r.u32()?,
            default_icon_field: r.u32()?,
            ipv4: r.u32()?,
            mac: r.array()?,
            battery_level: r.u8()?,
            battery_powered: r.bool()?,
            wifi_rssi: r.i8()?,
            wifi_signal_strength: r.u8()?,
            bridge_node_online: r.bool()?,
            bridge_node_signal_strength: r.u8()?,
            uptime: r.u32()?,
            connection_uptime: r.u32()?,
            battery_health: r.u8()?,
            last_connection_reset_cause: r.u8()?,
            light_source_lifespan: r.u16()?,
            light_source_operating_time: r.i32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.receiver_id)
            .i32(self.channel_number)
            .u32(self.fields)
            .u32(self.default_icon_field)
            .u32(self.ipv4)
            .bytes(&self.mac)
            .u8(self.battery_level)
            .bool(self.battery_powered)
            .i8(self.wifi_rssi)
            .u8(self.wifi_signal_strength)
            .bool(self.bridge_node_online)
            .u8(self.bridge_node_signal_strength)
            .u32(self.uptime)
            .u32(self.connection_uptime)
            .u8(self.battery_health)
            .u8(self.last_connection_reset_cause)
            .u16(self.light_source_lifespan)
            .i32(self.light_source_operating_time);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFunctionsResult {
    pub functions: Vec<i32>,
}

impl WireFormat for ChannelFunctionsResult {
    const NAME: &'static str = "ChannelFunctionsResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let count = r.u8()? as usize;
        if count > CHANNEL_MAXCOUNT {
            return Err(ProtocolError::decode(
                Self::NAME,
                format!("{count} functions exceeds {CHANNEL_MAXCOUNT}"),
            ));
        }
        let functions = (0..count).map(|_| r.i32()).collect::<Result<Vec<_>>>()?;
        Ok(Self { functions })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        if self.functions.len() > CHANNEL_MAXCOUNT {
            return Err(ProtocolError::EncodeError(format!(
                "{} functions exceeds {CHANNEL_MAXCOUNT}",
                self.functions.len()
            )));
        }
        w.u8(self.functions.len() as u8);
        for f in &self.functions {
            w.i32(*f);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCaption {
    pub channel_number: i32,
    pub caption: String,
}

impl WireFormat for ChannelCaption {
    const NAME: &'static str = "ChannelCaption";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.i32()?,
            caption: r.sized_str(CAPTION_MAXSIZE)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.channel_number);
        w.sized_str(&self.caption, CAPTION_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCaptionResult {
    pub channel_number: i32,
    pub result_code: u8,
    pub caption: String,
}

impl WireFormat for ChannelCaptionResult {
    const NAME: &'static str = "ChannelCaptionResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.i32()?,
            result_code: r.u8()?,
            caption: r.sized_str(CAPTION_MAXSIZE)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.i32(self.channel_number).u8(self.result_code);
        w.sized_str(&self.caption, CAPTION_MAXSIZE)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetChannelConfig {
    pub channel_number: u8,
    pub config_type: u8,
    pub flags: u32,
}

impl WireFormat for GetChannelConfig {
    const NAME: &'static str = "GetChannelConfig";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            config_type: r.u8()?,
            flags: r.u32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number).u8(self.config_type).u32(self.flags);
        Ok(())
    }
}

/// Channel config blob; used in both directions and as the GetChannelConfig reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_number: u8,
    pub func: i32,
    pub config_type: u8,
    pub config: Vec<u8>,
}

impl WireFormat for ChannelConfig {
    const NAME: &'static str = "ChannelConfig";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let channel_number = r.u8()?;
        let func = r.i32()?;
        let config_type = r.u8()?;
        let size = r.u16()? as usize;
        if size > CHANNEL_CONFIG_MAXSIZE {
            return Err(ProtocolError::decode(
                Self::NAME,
                format!("config size {size} exceeds {CHANNEL_CONFIG_MAXSIZE}"),
            ));
        }
        Ok(Self {
            channel_number,
            func,
            config_type,
            config: r.bytes(size)?.to_vec(),
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        if self.config.len() > CHANNEL_CONFIG_MAXSIZE {
            return Err(ProtocolError::StringTooLong {
                len: self.config.len(),
                max: CHANNEL_CONFIG_MAXSIZE,
            });
        }
        w.u8(self.channel_number)
            .i32(self.func)
            .u8(self.config_type)
            .u16(self.config.len() as u16)
            .bytes(&self.config);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetChannelConfigResult {
    pub result: u8,
    pub config_type: u8,
    pub channel_number: u8,
}

impl WireFormat for SetChannelConfigResult {
    const NAME: &'static str = "SetChannelConfigResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            result: r.u8()?,
            config_type: r.u8()?,
            channel_number: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.result).u8(self.config_type).u8(self.channel_number);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionTrigger {
    pub channel_number: u8,
    pub action_trigger: u32,
}

impl WireFormat for ActionTrigger {
    const NAME: &'static str = "ActionTrigger";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
            action_trigger: r.u32()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number).u32(self.action_trigger);
        Ok(())
    }
}

/// Device-config transfer: presence mask plus the packed field blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfigPayload {
    pub end_of_data: bool,
    pub available_fields: u64,
    pub fields: u64,
    pub config: Vec<u8>,
}

impl WireFormat for DeviceConfigPayload {
    const NAME: &'static str = "DeviceConfigPayload";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let end_of_data = r.bool()?;
        let available_fields = r.u64()?;
        let fields = r.u64()?;
        let size = r.u16()? as usize;
        if size > DEVICE_CONFIG_MAXSIZE {
            return Err(ProtocolError::decode(
                Self::NAME,
                format!("config size {size} exceeds {DEVICE_CONFIG_MAXSIZE}"),
            ));
        }
        Ok(Self {
            end_of_data,
            available_fields,
            fields,
            config: r.bytes(size)?.to_vec(),
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        if self.config.len() > DEVICE_CONFIG_MAXSIZE {
            return Err(ProtocolError::StringTooLong {
                len: self.config.len(),
                max: DEVICE_CONFIG_MAXSIZE,
            });
        }
        w.bool(self.end_of_data)
            .u64(self.available_fields)
            .u64(self.fields)
            .u16(self.config.len() as u16)
            .bytes(&self.config);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetDeviceConfigResult {
    pub result: u8,
}

impl WireFormat for SetDeviceConfigResult {
    const NAME: &'static str = "SetDeviceConfigResult";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self { result: r.u8()? })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.result);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfigFinished {
    pub channel_number: u8,
}

impl WireFormat for ChannelConfigFinished {
    const NAME: &'static str = "ChannelConfigFinished";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            channel_number: r.u8()?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.channel_number);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdeviceDetails {
    pub sub_device_id: u8,
    pub name: String,
    pub soft_ver: String,
    pub product_code: String,
    pub serial_number: String,
}

impl WireFormat for SubdeviceDetails {
    const NAME: &'static str = "SubdeviceDetails";

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            sub_device_id: r.u8()?,
            name: r.fixed_str(SUBDEVICE_NAME_MAXSIZE)?,
            soft_ver: r.fixed_str(SOFTVER_MAXSIZE)?,
            product_code: r.fixed_str(PRODUCT_CODE_MAXSIZE)?,
            serial_number: r.fixed_str(SERIAL_NUMBER_MAXSIZE)?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u8(self.sub_device_id);
        w.fixed_str(&self.name, SUBDEVICE_NAME_MAXSIZE)?;
        w.fixed_str(&self.soft_ver, SOFTVER_MAXSIZE)?;
        w.fixed_str(&self.product_code, PRODUCT_CODE_MAXSIZE)?;
        w.fixed_str(&self.serial_number, SERIAL_NUMBER_MAXSIZE)?;
        Ok(())
    }
}

/// Every message the engine sends or receives, keyed by call type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    GetVersion,
    GetVersionResult(GetVersionResult),
    VersionError(VersionError),
    PingServer(PingServer),
    PingServerResult(PingServer),
    RegisterDevice(RegisterDevice),
    RegisterDeviceResult(RegisterDeviceResult),
    RegisterDeviceResultB(RegisterDeviceResultB),
    ChannelValueChanged(ChannelValueChanged),
    ChannelValueChangedB(ChannelValueChangedB),
    ChannelValueChangedC(ChannelValueChangedC),
    ChannelExtendedValueChanged(ChannelExtendedValueChanged),
    ChannelNewValue(ChannelNewValue),
    ChannelGroupNewValue(ChannelGroupNewValue),
    ChannelNewValueResult(ChannelNewValueResult),
    SetActivityTimeout(SetActivityTimeout),
    SetActivityTimeoutResult(SetActivityTimeoutResult),
    GetFirmwareUpdateUrl(FirmwareUpdateParams),
    GetFirmwareUpdateUrlResult(FirmwareUpdateUrlResult),
    GetRegistrationEnabled,
    GetRegistrationEnabledResult(RegistrationEnabled),
    DeviceCalCfgRequest(DeviceCalCfgRequest),
    DeviceCalCfgResult(DeviceCalCfgResult),
    GetUserLocaltime,
    GetUserLocaltimeResult(UserLocaltimeResult),
    ChannelStateRequest(ChannelStateRequest),
    ChannelStateResult(ChannelState),
    GetChannelFunctions,
    GetChannelFunctionsResult(ChannelFunctionsResult),
    SetChannelCaption(ChannelCaption),
    SetChannelCaptionResult(ChannelCaptionResult),
    GetChannelConfig(GetChannelConfig),
    GetChannelConfigResult(ChannelConfig),
    ActionTrigger(ActionTrigger),
    SetDeviceConfig(DeviceConfigPayload),
    SetDeviceConfigResult(SetDeviceConfigResult),
    SetDeviceConfigRequest(DeviceConfigPayload),
    SetDeviceConfigRequestResult(SetDeviceConfigResult),
    SetChannelConfig(ChannelConfig),
    SetChannelConfigResult(SetChannelConfigResult),
    SetChannelConfigRequest(ChannelConfig),
    SetChannelConfigRequestResult(SetChannelConfigResult),
    ChannelConfigFinished(ChannelConfigFinished),
    SetSubdeviceDetails(SubdeviceDetails),
}

impl Message {
    pub fn call_type(&self) -> CallType {
        match self {
            Message::GetVersion => CallType::DcsGetVersion,
            Message::GetVersionResult(_) => CallType::SdcGetVersionResult,
            Message::VersionError(_) => CallType::SdcVersionError,
            Message::PingServer(_) => CallType::DcsPingServer,
            Message::PingServerResult(_) => CallType::SdcPingServerResult,
            Message::RegisterDevice(reg) => reg.variant.call_type(),
            Message::RegisterDeviceResult(_) => CallType::SdRegisterDeviceResult,
            Message::RegisterDeviceResultB(_) => CallType::SdRegisterDeviceResultB,
            Message::ChannelValueChanged(_) => CallType::DsDeviceChannelValueChanged,
            Message::ChannelValueChangedB(_) => CallType::DsDeviceChannelValueChangedB,
            Message::ChannelValueChangedC(_) => CallType::DsDeviceChannelValueChangedC,
            Message::ChannelExtendedValueChanged(_) => {
                CallType::DsDeviceChannelExtendedValueChanged
            }
            Message::ChannelNewValue(_) => CallType::SdChannelSetValue,
            Message::ChannelGroupNewValue(_) => CallType::SdChannelGroupSetValue,
            Message::ChannelNewValueResult(_) => CallType::DsChannelSetValueResult,
            Message::SetActivityTimeout(_) => CallType::DcsSetActivityTimeout,
            Message::SetActivityTimeoutResult(_) => CallType::SdcSetActivityTimeoutResult,
            Message::GetFirmwareUpdateUrl(_) => CallType::DsGetFirmwareUpdateUrl,
            Message::GetFirmwareUpdateUrlResult(_) => CallType::SdGetFirmwareUpdateUrlResult,
            Message::GetRegistrationEnabled => CallType::DcsGetRegistrationEnabled,
            Message::GetRegistrationEnabledResult(_) => CallType::SdcGetRegistrationEnabledResult,
            Message::DeviceCalCfgRequest(_) => CallType::SdDeviceCalCfgRequest,
            Message::DeviceCalCfgResult(_) => CallType::DsDeviceCalCfgResult,
            Message::GetUserLocaltime => CallType::DcsGetUserLocaltime,
            Message::GetUserLocaltimeResult(_) => CallType::SdcGetUserLocaltimeResult,
            Message::ChannelStateRequest(_) => CallType::CsdGetChannelState,
            Message::ChannelStateResult(_) => CallType::DscChannelStateResult,
            Message::GetChannelFunctions => CallType::DsGetChannelFunctions,
            Message::GetChannelFunctionsResult(_) => CallType::SdGetChannelFunctionsResult,
            Message::SetChannelCaption(_) => CallType::DcsSetChannelCaption,
            Message::SetChannelCaptionResult(_) => CallType::SdcSetChannelCaptionResult,
            Message::GetChannelConfig(_) => CallType::DsGetChannelConfig,
            Message::GetChannelConfigResult(_) => CallType::SdGetChannelConfigResult,
            Message::ActionTrigger(_) => CallType::DsActionTrigger,
            Message::SetDeviceConfig(_) => CallType::DsSetDeviceConfig,
            Message::SetDeviceConfigResult(_) => CallType::SdSetDeviceConfigResult,
            Message::SetDeviceConfigRequest(_) => CallType::SdSetDeviceConfig,
            Message::SetDeviceConfigRequestResult(_) => CallType::DsSetDeviceConfigResult,
            Message::SetChannelConfig(_) => CallType::DsSetChannelConfig,
            Message::SetChannelConfigResult(_) => CallType::SdSetChannelConfigResult,
            Message::SetChannelConfigRequest(_) => CallType::SdSetChannelConfig,
            Message::SetChannelConfigRequestResult(_) => CallType::DsSetChannelConfigResult,
            Message::ChannelConfigFinished(_) => CallType::SdChannelConfigFinished,
            Message::SetSubdeviceDetails(_) => CallType::DsSetSubdeviceDetails,
        }
    }

    /// Serialize the message body (without frame header).
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        match self {
            Message::GetVersion
            | Message::GetRegistrationEnabled
            | Message::GetUserLocaltime
            | Message::GetChannelFunctions => Ok(Vec::new()),
            Message::GetVersionResult(m) => m.to_payload(),
            Message::VersionError(m) => m.to_payload(),
            Message::PingServer(m) | Message::PingServerResult(m) => m.to_payload(),
            Message::RegisterDevice(m) => m.to_payload(),
            Message::RegisterDeviceResult(m) => m.to_payload(),
            Message::RegisterDeviceResultB(m) => m.to_payload(),
            Message::ChannelValueChanged(m) => m.to_payload(),
            Message::ChannelValueChangedB(m) => m.to_payload(),
            Message::ChannelValueChangedC(m) => m.to_payload(),
            Message::ChannelExtendedValueChanged(m) => m.to_payload(),
            Message::ChannelNewValue(m) => m.to_payload(),
            Message::ChannelGroupNewValue(m) => m.to_payload(),
            Message::ChannelNewValueResult(m) => m.to_payload(),
            Message::SetActivityTimeout(m) => m.to_payload(),
            Message::SetActivityTimeoutResult(m) => m.to_payload(),
            Message::GetFirmwareUpdateUrl(m) => m.to_payload(),
            Message::GetFirmwareUpdateUrlResult(m) => m.to_payload(),
            Message::GetRegistrationEnabledResult(m) => m.to_payload(),
            Message::DeviceCalCfgRequest(m) => m.to_payload(),
            Message::DeviceCalCfgResult(m) => m.to_payload(),
            Message::GetUserLocaltimeResult(m) => m.to_payload(),
            Message::ChannelStateRequest(m) => m.to_payload(),
            Message::ChannelStateResult(m) => m.to_payload(),
            Message::GetChannelFunctionsResult(m) => m.to_payload(),
            Message::SetChannelCaption(m) => m.to_payload(),
            Message::SetChannelCaptionResult(m) => m.to_payload(),
            Message::GetChannelConfig(m) => m.to_payload(),
            Message::GetChannelConfigResult(m)
            | Message::SetChannelConfig(m)
            | Message::SetChannelConfigRequest(m) => m.to_payload(),
            Message::ActionTrigger(m) => m.to_payload(),
            Message::SetDeviceConfig(m) | Message::SetDeviceConfigRequest(m) => m.to_payload(),
            Message::SetDeviceConfigResult(m) | Message::SetDeviceConfigRequestResult(m) => {
                m.to_payload()
            }
            Message::SetChannelConfigResult(m) | Message::SetChannelConfigRequestResult(m) => {
                m.to_payload()
            }
            Message::ChannelConfigFinished(m) => m.to_payload(),
            Message::SetSubdeviceDetails(m) => m.to_payload(),
        }
    }
}
