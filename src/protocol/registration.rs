//! # Device Registration
//!
//! The registration call exists in seven wire families (A through G). Each
//! family extends the previous one, so all of them decode into the single
//! [`RegisterDevice`] shape. Fields a family does not carry are `None`.
//!
//! | Family | Credential | Extra header fields            | Channel layout |
//! |--------|------------|--------------------------------|----------------|
//! | A      | location   |                                | A              |
//! | B      | location   |                                | B              |
//! | C      | location   | server name                    | B              |
//! | D      | e-mail     | server name                    | B              |
//! | E      | e-mail     | + flags, manufacturer, product | C              |
//! | F      | e-mail     | as E                           | D              |
//! | G      | e-mail     | as E                           | E              |

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::call_type::CallType;
use crate::protocol::message::{
    ChannelValueBytes, AUTHKEY_SIZE, CHANNEL_MAXCOUNT, DEVICE_NAME_MAXSIZE, EMAIL_MAXSIZE,
    GUID_SIZE, LOCATION_PWD_MAXSIZE, SERVER_NAME_MAXSIZE, SOFTVER_MAXSIZE,
};

/// Registration flag set by battery devices that sleep between reports.
pub const DEVICE_FLAG_SLEEP_MODE_ENABLED: i32 = 0x0020;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationVariant {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelLayout {
    A,
    B,
    C,
    D,
    E,
}

impl RegistrationVariant {
    pub const ALL: [RegistrationVariant; 7] = [
        RegistrationVariant::A,
        RegistrationVariant::B,
        RegistrationVariant::C,
        RegistrationVariant::D,
        RegistrationVariant::E,
        RegistrationVariant::F,
        RegistrationVariant::G,
    ];

    pub fn call_type(self) -> CallType {
        match self {
            RegistrationVariant::A => CallType::DsRegisterDevice,
            RegistrationVariant::B => CallType::DsRegisterDeviceB,
            RegistrationVariant::C => CallType::DsRegisterDeviceC,
            RegistrationVariant::D => CallType::DsRegisterDeviceD,
            RegistrationVariant::E => CallType::DsRegisterDeviceE,
            RegistrationVariant::F => CallType::DsRegisterDeviceF,
            RegistrationVariant::G => CallType::DsRegisterDeviceG,
        }
    }

    pub fn from_call_type(call_type: CallType) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.call_type() == call_type)
    }

    pub fn uses_email(self) -> bool {
        self >= RegistrationVariant::D
    }

    pub fn has_server_name(self) -> bool {
        self >= RegistrationVariant::C
    }

    pub fn has_device_flags(self) -> bool {
        self >= RegistrationVariant::E
    }

    /// Families F and G are answered with the extended result carrying the server clock.
    pub fn wants_result_b(self) -> bool {
        self >= RegistrationVariant::F
    }

    fn channel_layout(self) -> ChannelLayout {
        match self {
            RegistrationVariant::A => ChannelLayout::A,
            RegistrationVariant::B | RegistrationVariant::C | RegistrationVariant::D => {
                ChannelLayout::B
            }
            RegistrationVariant::E => ChannelLayout::C,
            RegistrationVariant::F => ChannelLayout::D,
            RegistrationVariant::G => ChannelLayout::E,
        }
    }

    fn context(self) -> &'static str {
        match self {
            RegistrationVariant::A => "RegisterDeviceA",
            RegistrationVariant::B => "RegisterDeviceB",
            RegistrationVariant::C => "RegisterDeviceC",
            RegistrationVariant::D => "RegisterDeviceD",
            RegistrationVariant::E => "RegisterDeviceE",
            RegistrationVariant::F => "RegisterDeviceF",
            RegistrationVariant::G => "RegisterDeviceG",
        }
    }
}

/// Exactly one credential accompanies every registration.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Location { access_id: i32, password: String },
    Email { email: String, auth_key: [u8; AUTHKEY_SIZE] },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Location { .. } => "location",
            Credential::Email { .. } => "email",
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Location { access_id, .. } => f
                .debug_struct("Location")
                .field("access_id", access_id)
                .field("password", &"***")
                .finish(),
            Credential::Email { email, .. } => f
                .debug_struct("Email")
                .field("email", email)
                .field("auth_key", &"***")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelDescriptor {
    pub number: u8,
    pub channel_type: i32,
    pub func_list: Option<i32>,
    pub default_function: Option<i32>,
    pub flags: Option<u64>,
    pub offline: Option<bool>,
    pub value_validity_time_sec: Option<u32>,
    pub value: ChannelValueBytes,
    pub default_icon: Option<u8>,
    /// `None` for channels that belong to the connected device itself.
    pub sub_device_id: Option<u8>,
}

impl ChannelDescriptor {
    pub fn new(number: u8, channel_type: i32) -> Self {
        Self {
            number,
            channel_type,
            ..Self::default()
        }
    }

    fn decode(r: &mut WireReader<'_>, layout: ChannelLayout) -> Result<Self> {
        let number = r.u8()?;
        let channel_type = r.i32()?;
        let mut ch = ChannelDescriptor::new(number, channel_type);

        if layout != ChannelLayout::A {
            ch.func_list = Some(r.i32()?);
            ch.default_function = Some(r.i32()?);
        }
        match layout {
            ChannelLayout::A | ChannelLayout::B => {}
            ChannelLayout::C => ch.flags = Some(u64::from(r.i32()? as u32)),
            ChannelLayout::D | ChannelLayout::E => {
                ch.flags = Some(r.u64()?);
                ch.offline = Some(r.bool()?);
                ch.value_validity_time_sec = Some(r.u32()?);
            }
        }
        ch.value = r.array()?;
        if matches!(layout, ChannelLayout::D | ChannelLayout::E) {
            ch.default_icon = Some(r.u8()?);
        }
        if layout == ChannelLayout::E {
            ch.sub_device_id = match r.u8()? {
                0 => None,
                id => Some(id),
            };
        }
        Ok(ch)
    }

    fn encode(&self, w: &mut WireWriter, layout: ChannelLayout) {
        w.u8(self.number).i32(self.channel_type);
        if layout != ChannelLayout::A {
            w.i32(self.func_list.unwrap_or(0))
                .i32(self.default_function.unwrap_or(0));
        }
        match layout {
            ChannelLayout::A | ChannelLayout::B => {}
            ChannelLayout::C => {
                w.i32(self.flags.unwrap_or(0) as u32 as i32);
            }
            ChannelLayout::D | ChannelLayout::E => {
                w.u64(self.flags.unwrap_or(0))
                    .bool(self.offline.unwrap_or(false))
                    .u32(self.value_validity_time_sec.unwrap_or(0));
            }
        }
        w.bytes(&self.value);
        if matches!(layout, ChannelLayout::D | ChannelLayout::E) {
            w.u8(self.default_icon.unwrap_or(0));
        }
        if layout == ChannelLayout::E {
            w.u8(self.sub_device_id.unwrap_or(0));
        }
    }
}

/// Unified registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDevice {
    pub variant: RegistrationVariant,
    pub guid: [u8; GUID_SIZE],
    pub name: String,
    pub soft_ver: String,
    pub server_name: Option<String>,
    pub credential: Credential,
    pub flags: Option<i32>,
    pub manufacturer_id: Option<i16>,
    pub product_id: Option<i16>,
    pub channels: Vec<ChannelDescriptor>,
}

impl RegisterDevice {
    pub fn decode(variant: RegistrationVariant, payload: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(payload, variant.context());

        let credential = if variant.uses_email() {
            let email = r.fixed_str(EMAIL_MAXSIZE)?;
            let auth_key = r.array()?;
            Credential::Email { email, auth_key }
        } else {
            let access_id = r.i32()?;
            let password = r.fixed_str(LOCATION_PWD_MAXSIZE)?;
            Credential::Location {
                access_id,
                password,
            }
        };

        let guid = r.array()?;
        let name = r.fixed_str(DEVICE_NAME_MAXSIZE)?;
        let soft_ver = r.fixed_str(SOFTVER_MAXSIZE)?;
        let server_name = if variant.has_server_name() {
            Some(r.fixed_str(SERVER_NAME_MAXSIZE)?)
        } else {
            None
        };

        let (flags, manufacturer_id, product_id) = if variant.has_device_flags() {
            (Some(r.i32()?), Some(r.i16()?), Some(r.i16()?))
        } else {
            (None, None, None)
        };

        let count = r.u8()? as usize;
        if count > CHANNEL_MAXCOUNT {
            return Err(ProtocolError::decode(
                variant.context(),
                format!("channel count {count} exceeds {CHANNEL_MAXCOUNT}"),
            ));
        }
        let layout = variant.channel_layout();
        let channels = (0..count)
            .map(|_| ChannelDescriptor::decode(&mut r, layout))
            .collect::<Result<Vec<_>>>()?;
        r.finish()?;

        let mut seen = [false; 256];
        for channel in &channels {
            let slot = &mut seen[usize::from(channel.number)];
            if *slot {
                return Err(ProtocolError::decode(
                    variant.context(),
                    format!("channel number {} listed twice", channel.number),
                ));
            }
            *slot = true;
        }

        Ok(Self {
            variant,
            guid,
            name,
            soft_ver,
            server_name,
            credential,
            flags,
            manufacturer_id,
            product_id,
            channels,
        })
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let variant = self.variant;
        let mut w = WireWriter::new();

        match (&self.credential, variant.uses_email()) {
            (Credential::Email { email, auth_key }, true) => {
                w.fixed_str(email, EMAIL_MAXSIZE)?;
                w.bytes(auth_key);
            }
            (Credential::Location { access_id, password }, false) => {
                w.i32(*access_id);
                w.fixed_str(password, LOCATION_PWD_MAXSIZE)?;
            }
            (credential, _) => {
                return Err(ProtocolError::EncodeError(format!(
                    "{} credential cannot be carried by {}",
                    credential.kind(),
                    variant.context()
                )));
            }
        }

        w.bytes(&self.guid);
        w.fixed_str(&self.name, DEVICE_NAME_MAXSIZE)?;
        w.fixed_str(&self.soft_ver, SOFTVER_MAXSIZE)?;
        if variant.has_server_name() {
            w.fixed_str(self.server_name.as_deref().unwrap_or(""), SERVER_NAME_MAXSIZE)?;
        }
        if variant.has_device_flags() {
            w.i32(self.flags.unwrap_or(0))
                .i16(self.manufacturer_id.unwrap_or(0))
                .i16(self.product_id.unwrap_or(0));
        }

        if self.channels.len() > CHANNEL_MAXCOUNT {
            return Err(ProtocolError::EncodeError(format!(
                "{} channels exceeds {CHANNEL_MAXCOUNT}",
                self.channels.len()
            )));
        }
        w.u8(self.channels.len() as u8);
        let layout = variant.channel_layout();
        for ch in &self.channels {
            ch.encode(&mut w, layout);
        }
        Ok(w.into_vec())
    }

    pub fn sleep_mode_enabled(&self) -> bool {
        self.flags
            .is_some_and(|f| f & DEVICE_FLAG_SLEEP_MODE_ENABLED != 0)
    }

    pub fn guid_hex(&self) -> String {
        guid_hex(&self.guid)
    }
}

pub fn guid_hex(guid: &[u8; GUID_SIZE]) -> String {
    hex::encode_upper(guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location_device(variant: RegistrationVariant) -> RegisterDevice {
        RegisterDevice {
            variant,
            guid: [7; GUID_SIZE],
            name: "ZAMEL ROW-01".into(),
            soft_ver: "2.8.4".into(),
            server_name: variant.has_server_name().then(|| "svr1.supla.org".to_string()),
            credential: Credential::Location {
                access_id: 1,
                password: "none".into(),
            },
            flags: None,
            manufacturer_id: None,
            product_id: None,
            channels: vec![ChannelDescriptor::new(0, 2900)],
        }
    }

    #[test]
    fn family_a_has_no_optional_fields() {
        let reg = location_device(RegistrationVariant::A);
        let payload = reg.to_payload().unwrap();
        // id + pwd + guid + name + softver + count + (1 + 4 + 8)
        assert_eq!(payload.len(), 4 + 33 + 16 + 201 + 21 + 1 + 13);

        let decoded = RegisterDevice::decode(RegistrationVariant::A, &payload).unwrap();
        assert_eq!(decoded, reg);
        assert_eq!(decoded.channels[0].func_list, None);
        assert_eq!(decoded.server_name, None);
    }

    #[test]
    fn family_g_carries_sub_device_ids() {
        let mut reg = location_device(RegistrationVariant::G);
        reg.credential = Credential::Email {
            email: "user@example.com".into(),
            auth_key: [0xAB; AUTHKEY_SIZE],
        };
        reg.flags = Some(DEVICE_FLAG_SLEEP_MODE_ENABLED);
        reg.manufacturer_id = Some(4);
        reg.product_id = Some(2);
        reg.channels = vec![ChannelDescriptor {
            number: 5,
            channel_type: 3000,
            func_list: Some(0),
            default_function: Some(40),
            flags: Some(1 << 40),
            offline: Some(false),
            value_validity_time_sec: Some(600),
            value: [1, 2, 3, 4, 5, 6, 7, 8],
            default_icon: Some(0),
            sub_device_id: Some(2),
        }];

        let payload = reg.to_payload().unwrap();
        let decoded = RegisterDevice::decode(RegistrationVariant::G, &payload).unwrap();
        assert_eq!(decoded, reg);
        assert!(decoded.sleep_mode_enabled());
    }

    #[test]
    fn repeated_channel_number_is_rejected() {
        let mut reg = location_device(RegistrationVariant::A);
        reg.channels.push(ChannelDescriptor::new(0, 1000));
        let payload = reg.to_payload().unwrap();

        match RegisterDevice::decode(RegistrationVariant::A, &payload) {
            Err(ProtocolError::DecodeError { reason, .. }) => {
                assert!(reason.contains("channel number 0 listed twice"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn credential_must_match_family() {
        let mut reg = location_device(RegistrationVariant::D);
        reg.server_name = Some(String::new());
        assert!(matches!(
            reg.to_payload(),
            Err(ProtocolError::EncodeError(_))
        ));
    }

    #[test]
    fn truncated_registration_names_its_family() {
        let payload = location_device(RegistrationVariant::C).to_payload().unwrap();
        match RegisterDevice::decode(RegistrationVariant::C, &payload[..100]) {
            Err(ProtocolError::DecodeError { context, .. }) => {
                assert_eq!(context, "RegisterDeviceC")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn variants_map_to_call_types() {
        for v in RegistrationVariant::ALL {
            assert!(v.call_type().is_registration());
            assert_eq!(RegistrationVariant::from_call_type(v.call_type()), Some(v));
        }
        assert!(!RegistrationVariant::E.wants_result_b());
        assert!(RegistrationVariant::F.wants_result_b());
    }

    #[test]
    fn credential_debug_hides_secrets() {
        let c = Credential::Location {
            access_id: 1,
            password: "secret".into(),
        };
        assert!(!format!("{c:?}").contains("secret"));
    }
}
