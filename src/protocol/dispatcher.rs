//! Call-type routing table.
//!
//! Maps every known call-type id to its decoder. The table is built once and
//! shared; lookups are lock-free after initialization. Encoding goes through
//! [`Message::encode_payload`], whose exhaustive match keeps both directions
//! in step.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::trace;

use crate::config::PROTO_VERSION;
use crate::core::frame::Frame;
use crate::error::{ProtocolError, Result};
use crate::protocol::call_type::CallType;
use crate::protocol::message::*;
use crate::protocol::registration::{RegisterDevice, RegistrationVariant};

type DecodeFn = fn(&[u8]) -> Result<Message>;

#[derive(Clone, Copy)]
struct CodecEntry {
    call_type: CallType,
    decode: DecodeFn,
}

fn registration(variant: RegistrationVariant, payload: &[u8]) -> Result<Message> {
    RegisterDevice::decode(variant, payload).map(Message::RegisterDevice)
}

fn decoder_for(call_type: CallType) -> DecodeFn {
    match call_type {
        CallType::DcsGetVersion => |_| Ok(Message::GetVersion),
        CallType::SdcGetVersionResult => {
            |p| GetVersionResult::from_payload(p).map(Message::GetVersionResult)
        }
        CallType::SdcVersionError => |p| VersionError::from_payload(p).map(Message::VersionError),
        CallType::DcsPingServer => |p| PingServer::from_payload(p).map(Message::PingServer),
        CallType::SdcPingServerResult => {
            |p| PingServer::from_payload(p).map(Message::PingServerResult)
        }
        CallType::DsRegisterDevice => |p| registration(RegistrationVariant::A, p),
        CallType::DsRegisterDeviceB => |p| registration(RegistrationVariant::B, p),
        CallType::DsRegisterDeviceC => |p| registration(RegistrationVariant::C, p),
        CallType::DsRegisterDeviceD => |p| registration(RegistrationVariant::D, p),
        CallType::DsRegisterDeviceE => |p| registration(RegistrationVariant::E, p),
        CallType::DsRegisterDeviceF => |p| registration(RegistrationVariant::F, p),
        CallType::DsRegisterDeviceG => |p| registration(RegistrationVariant::G, p),
        CallType::SdRegisterDeviceResult => {
            |p| RegisterDeviceResult::from_payload(p).map(Message::RegisterDeviceResult)
        }
        CallType::SdRegisterDeviceResultB => {
            |p| RegisterDeviceResultB::from_payload(p).map(Message::RegisterDeviceResultB)
        }
        CallType::DsDeviceChannelValueChanged => {
            |p| ChannelValueChanged::from_payload(p).map(Message::ChannelValueChanged)
        }
        CallType::DsDeviceChannelValueChangedB => {
            |p| ChannelValueChangedB::from_payload(p).map(Message::ChannelValueChangedB)
        }
        CallType::DsDeviceChannelValueChangedC => {
            |p| ChannelValueChangedC::from_payload(p).map(Message::ChannelValueChangedC)
        }
        CallType::DsDeviceChannelExtendedValueChanged => |p| {
            ChannelExtendedValueChanged::from_payload(p).map(Message::ChannelExtendedValueChanged)
        },
        CallType::SdChannelSetValue => {
            |p| ChannelNewValue::from_payload(p).map(Message::ChannelNewValue)
        }
        CallType::SdChannelGroupSetValue => {
            |p| ChannelGroupNewValue::from_payload(p).map(Message::ChannelGroupNewValue)
        }
        CallType::DsChannelSetValueResult => {
            |p| ChannelNewValueResult::from_payload(p).map(Message::ChannelNewValueResult)
        }
        CallType::DcsSetActivityTimeout => {
            |p| SetActivityTimeout::from_payload(p).map(Message::SetActivityTimeout)
        }
        CallType::SdcSetActivityTimeoutResult => {
            |p| SetActivityTimeoutResult::from_payload(p).map(Message::SetActivityTimeoutResult)
        }
        CallType::DsGetFirmwareUpdateUrl => {
            |p| FirmwareUpdateParams::from_payload(p).map(Message::GetFirmwareUpdateUrl)
        }
        CallType::SdGetFirmwareUpdateUrlResult => {
            |p| FirmwareUpdateUrlResult::from_payload(p).map(Message::GetFirmwareUpdateUrlResult)
        }
        CallType::DcsGetRegistrationEnabled => |_| Ok(Message::GetRegistrationEnabled),
        CallType::SdcGetRegistrationEnabledResult => {
            |p| RegistrationEnabled::from_payload(p).map(Message::GetRegistrationEnabledResult)
        }
        CallType::SdDeviceCalCfgRequest => {
            |p| DeviceCalCfgRequest::from_payload(p).map(Message::DeviceCalCfgRequest)
        }
        CallType::DsDeviceCalCfgResult => {
            |p| DeviceCalCfgResult::from_payload(p).map(Message::DeviceCalCfgResult)
        }
        CallType::DcsGetUserLocaltime => |_| Ok(Message::GetUserLocaltime),
        CallType::SdcGetUserLocaltimeResult => {
            |p| UserLocaltimeResult::from_payload(p).map(Message::GetUserLocaltimeResult)
        }
        CallType::CsdGetChannelState => {
            |p| ChannelStateRequest::from_payload(p).map(Message::ChannelStateRequest)
        }
        CallType::DscChannelStateResult => {
            |p| ChannelState::from_payload(p).map(Message::ChannelStateResult)
        }
        CallType::DsGetChannelFunctions => |_| Ok(Message::GetChannelFunctions),
        CallType::SdGetChannelFunctionsResult => {
            |p| ChannelFunctionsResult::from_payload(p).map(Message::GetChannelFunctionsResult)
        }
        CallType::DcsSetChannelCaption => {
            |p| ChannelCaption::from_payload(p).map(Message::SetChannelCaption)
        }
        CallType::SdcSetChannelCaptionResult => {
            |p| ChannelCaptionResult::from_payload(p).map(Message::SetChannelCaptionResult)
        }
        CallType::DsGetChannelConfig => {
            |p| GetChannelConfig::from_payload(p).map(Message::GetChannelConfig)
        }
        CallType::SdGetChannelConfigResult => {
            |p| ChannelConfig::from_payload(p).map(Message::GetChannelConfigResult)
        }
        CallType::DsActionTrigger => |p| ActionTrigger::from_payload(p).map(Message::ActionTrigger),
        CallType::DsSetDeviceConfig => {
            |p| DeviceConfigPayload::from_payload(p).map(Message::SetDeviceConfig)
        }
        CallType::SdSetDeviceConfigResult => {
            |p| SetDeviceConfigResult::from_payload(p).map(Message::SetDeviceConfigResult)
        }
        CallType::SdSetDeviceConfig => {
            |p| DeviceConfigPayload::from_payload(p).map(Message::SetDeviceConfigRequest)
        }
        CallType::DsSetDeviceConfigResult => {
            |p| SetDeviceConfigResult::from_payload(p).map(Message::SetDeviceConfigRequestResult)
        }
        CallType::DsSetChannelConfig => {
            |p| ChannelConfig::from_payload(p).map(Message::SetChannelConfig)
        }
        CallType::SdSetChannelConfigResult => {
            |p| SetChannelConfigResult::from_payload(p).map(Message::SetChannelConfigResult)
        }
        CallType::SdSetChannelConfig => {
            |p| ChannelConfig::from_payload(p).map(Message::SetChannelConfigRequest)
        }
        CallType::DsSetChannelConfigResult => |p| {
            SetChannelConfigResult::from_payload(p).map(Message::SetChannelConfigRequestResult)
        },
        CallType::SdChannelConfigFinished => {
            |p| ChannelConfigFinished::from_payload(p).map(Message::ChannelConfigFinished)
        }
        CallType::DsSetSubdeviceDetails => {
            |p| SubdeviceDetails::from_payload(p).map(Message::SetSubdeviceDetails)
        }
    }
}

fn table() -> &'static HashMap<u32, CodecEntry> {
    static TABLE: OnceLock<HashMap<u32, CodecEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        CallType::ALL
            .iter()
            .map(|ct| {
                (
                    ct.id(),
                    CodecEntry {
                        call_type: *ct,
                        decode: decoder_for(*ct),
                    },
                )
            })
            .collect()
    })
}

/// Decode and encode messages by call-type id.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a raw id to its call type, if the table knows it.
    pub fn lookup(&self, call_type: u32) -> Option<CallType> {
        table().get(&call_type).map(|e| e.call_type)
    }

    pub fn decode(&self, call_type: u32, payload: &[u8]) -> Result<Message> {
        let entry = table()
            .get(&call_type)
            .ok_or(ProtocolError::UnknownCallType(call_type))?;
        trace!(call_type = %entry.call_type, size = payload.len(), "Decoding message");
        (entry.decode)(payload)
    }

    pub fn decode_frame(&self, frame: &Frame) -> Result<Message> {
        self.decode(frame.call_type, &frame.payload)
    }

    pub fn encode(&self, msg: &Message) -> Result<(CallType, Vec<u8>)> {
        Ok((msg.call_type(), msg.encode_payload()?))
    }

    /// Encode a message into a frame at the server's protocol version.
    pub fn encode_frame(&self, msg: &Message, rr_id: u32) -> Result<Frame> {
        self.encode_frame_with_version(msg, rr_id, PROTO_VERSION)
    }

    pub fn encode_frame_with_version(&self, msg: &Message, rr_id: u32, version: u8) -> Result<Frame> {
        let (call_type, payload) = self.encode(msg)?;
        Ok(Frame::new(version, rr_id, call_type.id(), payload))
    }
}
