//! # Device Config Codec
//!
//! A device config is a 64-bit presence mask plus a packed blob. Fields are
//! laid out in ascending bit order, each taking a fixed number of bytes, so
//! decoding walks an ordered field table with an explicit offset.
//!
//! | Bit | Field                      | Bytes |
//! |-----|----------------------------|-------|
//! | 0   | status_led                 | 1     |
//! | 1   | screen_brightness          | 3     |
//! | 2   | button_volume              | 1     |
//! | 3   | disable_user_interface     | 5     |
//! | 4   | automatic_time_sync        | 1     |
//! | 5   | home_screen_off_delay      | 2     |
//! | 6   | home_screen_content        | 16    |
//! | 7   | home_screen_off_delay_type | 1     |
//! | 8   | power_status_led           | 1     |
//! | 9   | modbus                     | 11    |
//! | 10  | firmware_update            | 1     |

use std::collections::BTreeMap;

use tracing::trace;

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{DeviceConfigPayload, DEVICE_CONFIG_MAXSIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserInterfaceLock {
    Unlocked,
    Locked,
    /// Only temperature changes inside `[min, max]` are allowed
    Partial,
    Other(u8),
}

impl UserInterfaceLock {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => UserInterfaceLock::Unlocked,
            1 => UserInterfaceLock::Locked,
            2 => UserInterfaceLock::Partial,
            other => UserInterfaceLock::Other(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            UserInterfaceLock::Unlocked => 0,
            UserInterfaceLock::Locked => 1,
            UserInterfaceLock::Partial => 2,
            UserInterfaceLock::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModbusConfig {
    pub role: u8,
    pub address: u8,
    pub serial_mode: u8,
    pub baudrate: u32,
    pub stop_bits: u8,
    pub network_mode: u8,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceConfigField {
    StatusLed(u8),
    ScreenBrightness {
        automatic: bool,
        level: u8,
        adjustment_for_automatic: i8,
    },
    ButtonVolume(u8),
    DisableUserInterface {
        lock: UserInterfaceLock,
        /// Degrees Celsius; only meaningful with a partial lock
        min_temperature: Option<f64>,
        max_temperature: Option<f64>,
    },
    AutomaticTimeSync(bool),
    /// Seconds
    HomeScreenOffDelay(u16),
    HomeScreenContent {
        available: u64,
        content: u64,
    },
    HomeScreenOffDelayType(u8),
    PowerStatusLed(u8),
    Modbus(ModbusConfig),
    FirmwareUpdatePolicy(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Decimal(f64),
}

struct FieldSpec {
    bit: u8,
    name: &'static str,
    size: usize,
    decode: fn(&mut WireReader<'_>) -> Result<DeviceConfigField>,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        bit: 0,
        name: "status_led",
        size: 1,
        decode: |r| Ok(DeviceConfigField::StatusLed(r.u8()?)),
    },
    FieldSpec {
        bit: 1,
        name: "screen_brightness",
        size: 3,
        decode: |r| {
            Ok(DeviceConfigField::ScreenBrightness {
                automatic: r.bool()?,
                level: r.u8()?,
                adjustment_for_automatic: r.i8()?,
            })
        },
    },
    FieldSpec {
        bit: 2,
        name: "button_volume",
        size: 1,
        decode: |r| Ok(DeviceConfigField::ButtonVolume(r.u8()?)),
    },
    FieldSpec {
        bit: 3,
        name: "disable_user_interface",
        size: 5,
        decode: |r| {
            let lock = UserInterfaceLock::from_u8(r.u8()?);
            let min = r.i16()?;
            let max = r.i16()?;
            let partial = lock == UserInterfaceLock::Partial;
            Ok(DeviceConfigField::DisableUserInterface {
                lock,
                min_temperature: partial.then(|| f64::from(min) / 100.0),
                max_temperature: partial.then(|| f64::from(max) / 100.0),
            })
        },
    },
    FieldSpec {
        bit: 4,
        name: "automatic_time_sync",
        size: 1,
        decode: |r| Ok(DeviceConfigField::AutomaticTimeSync(r.bool()?)),
    },
    FieldSpec {
        bit: 5,
        name: "home_screen_off_delay",
        size: 2,
        decode: |r| Ok(DeviceConfigField::HomeScreenOffDelay(r.u16()?)),
    },
    FieldSpec {
        bit: 6,
        name: "home_screen_content",
        size: 16,
        decode: |r| {
            Ok(DeviceConfigField::HomeScreenContent {
                available: r.u64()?,
                content: r.u64()?,
            })
        },
    },
    FieldSpec {
        bit: 7,
        name: "home_screen_off_delay_type",
        size: 1,
        decode: |r| Ok(DeviceConfigField::HomeScreenOffDelayType(r.u8()?)),
    },
    FieldSpec {
        bit: 8,
        name: "power_status_led",
        size: 1,
        decode: |r| Ok(DeviceConfigField::PowerStatusLed(r.u8()?)),
    },
    FieldSpec {
        bit: 9,
        name: "modbus",
        size: 11,
        decode: |r| {
            Ok(DeviceConfigField::Modbus(ModbusConfig {
                role: r.u8()?,
                address: r.u8()?,
                serial_mode: r.u8()?,
                baudrate: r.u32()?,
                stop_bits: r.u8()?,
                network_mode: r.u8()?,
                port: r.u16()?,
            }))
        },
    },
    FieldSpec {
        bit: 10,
        name: "firmware_update",
        size: 1,
        decode: |r| Ok(DeviceConfigField::FirmwareUpdatePolicy(r.u8()?)),
    },
];

fn spec_for(bit: u8) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|s| s.bit == bit)
}

impl DeviceConfigField {
    pub fn bit(&self) -> u8 {
        match self {
            DeviceConfigField::StatusLed(_) => 0,
            DeviceConfigField::ScreenBrightness { .. } => 1,
            DeviceConfigField::ButtonVolume(_) => 2,
            DeviceConfigField::DisableUserInterface { .. } => 3,
            DeviceConfigField::AutomaticTimeSync(_) => 4,
            DeviceConfigField::HomeScreenOffDelay(_) => 5,
            DeviceConfigField::HomeScreenContent { .. } => 6,
            DeviceConfigField::HomeScreenOffDelayType(_) => 7,
            DeviceConfigField::PowerStatusLed(_) => 8,
            DeviceConfigField::Modbus(_) => 9,
            DeviceConfigField::FirmwareUpdatePolicy(_) => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        spec_for(self.bit()).map_or("unknown", |s| s.name)
    }

    fn encode(&self, w: &mut WireWriter) {
        match *self {
            DeviceConfigField::StatusLed(v)
            | DeviceConfigField::ButtonVolume(v)
            | DeviceConfigField::HomeScreenOffDelayType(v)
            | DeviceConfigField::PowerStatusLed(v)
            | DeviceConfigField::FirmwareUpdatePolicy(v) => {
                w.u8(v);
            }
            DeviceConfigField::ScreenBrightness {
                automatic,
                level,
                adjustment_for_automatic,
            } => {
                w.bool(automatic).u8(level).i8(adjustment_for_automatic);
            }
            DeviceConfigField::DisableUserInterface {
                lock,
                min_temperature,
                max_temperature,
            } => {
                let scale = |t: Option<f64>| (t.unwrap_or(0.0) * 100.0).round() as i16;
                w.u8(lock.to_u8())
                    .i16(scale(min_temperature))
                    .i16(scale(max_temperature));
            }
            DeviceConfigField::AutomaticTimeSync(on) => {
                w.bool(on);
            }
            DeviceConfigField::HomeScreenOffDelay(secs) => {
                w.u16(secs);
            }
            DeviceConfigField::HomeScreenContent { available, content } => {
                w.u64(available).u64(content);
            }
            DeviceConfigField::Modbus(m) => {
                w.u8(m.role)
                    .u8(m.address)
                    .u8(m.serial_mode)
                    .u32(m.baudrate)
                    .u8(m.stop_bits)
                    .u8(m.network_mode)
                    .u16(m.port);
            }
        }
    }

    fn flatten(&self, out: &mut BTreeMap<String, ConfigValue>) {
        let name = self.name();
        let mut put = |key: &str, v: ConfigValue| {
            let key = if key.is_empty() {
                name.to_string()
            } else {
                format!("{name}.{key}")
            };
            out.insert(key, v);
        };
        match *self {
            DeviceConfigField::StatusLed(v)
            | DeviceConfigField::ButtonVolume(v)
            | DeviceConfigField::HomeScreenOffDelayType(v)
            | DeviceConfigField::PowerStatusLed(v)
            | DeviceConfigField::FirmwareUpdatePolicy(v) => put("", ConfigValue::Int(i64::from(v))),
            DeviceConfigField::ScreenBrightness {
                automatic,
                level,
                adjustment_for_automatic,
            } => {
                put("automatic", ConfigValue::Bool(automatic));
                put("level", ConfigValue::Int(i64::from(level)));
                put(
                    "adjustment_for_automatic",
                    ConfigValue::Int(i64::from(adjustment_for_automatic)),
                );
            }
            DeviceConfigField::DisableUserInterface {
                lock,
                min_temperature,
                max_temperature,
            } => {
                put("mode", ConfigValue::Int(i64::from(lock.to_u8())));
                if let Some(t) = min_temperature {
                    put("min_temperature", ConfigValue::Decimal(t));
                }
                if let Some(t) = max_temperature {
                    put("max_temperature", ConfigValue::Decimal(t));
                }
            }
            DeviceConfigField::AutomaticTimeSync(on) => put("", ConfigValue::Bool(on)),
            DeviceConfigField::HomeScreenOffDelay(secs) => put("", ConfigValue::Int(i64::from(secs))),
            DeviceConfigField::HomeScreenContent { available, content } => {
                put("available", ConfigValue::Int(available as i64));
                put("content", ConfigValue::Int(content as i64));
            }
            DeviceConfigField::Modbus(m) => {
                put("role", ConfigValue::Int(i64::from(m.role)));
                put("address", ConfigValue::Int(i64::from(m.address)));
                put("serial_mode", ConfigValue::Int(i64::from(m.serial_mode)));
                put("baudrate", ConfigValue::Int(i64::from(m.baudrate)));
                put("stop_bits", ConfigValue::Int(i64::from(m.stop_bits)));
                put("network_mode", ConfigValue::Int(i64::from(m.network_mode)));
                put("port", ConfigValue::Int(i64::from(m.port)));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedDeviceConfig {
    pub fields: Vec<DeviceConfigField>,
    /// Flat `field[.member]` view of `fields`
    pub values: BTreeMap<String, ConfigValue>,
    /// Bytes of the blob taken by the decoded fields
    pub consumed: usize,
}

impl DecodedDeviceConfig {
    fn push(&mut self, field: DeviceConfigField, size: usize) {
        field.flatten(&mut self.values);
        self.fields.push(field);
        self.consumed += size;
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.get(key).copied()
    }
}

/// Decode `blob` according to the presence `mask`.
///
/// A set bit without a known layout stops decoding with
/// [`ProtocolError::UnsupportedConfigField`], which carries everything decoded
/// before it.
pub fn decode(mask: u64, blob: &[u8]) -> Result<DecodedDeviceConfig> {
    let mut out = DecodedDeviceConfig::default();
    let mut offset = 0usize;

    for bit in 0u8..64 {
        if mask & (1u64 << bit) == 0 {
            continue;
        }
        let Some(spec) = spec_for(bit) else {
            return Err(ProtocolError::UnsupportedConfigField {
                bit,
                partial: Box::new(out),
            });
        };
        let end = offset + spec.size;
        if end > blob.len() {
            return Err(ProtocolError::decode(
                "DeviceConfig",
                format!(
                    "field {} needs {} bytes at offset {offset}, blob has {}",
                    spec.name,
                    spec.size,
                    blob.len()
                ),
            ));
        }
        let mut r = WireReader::new(&blob[offset..end], "DeviceConfig");
        let field = (spec.decode)(&mut r)?;
        trace!(bit, field = spec.name, offset, "Decoded device config field");
        out.push(field, spec.size);
        offset = end;
    }

    Ok(out)
}

pub fn decode_payload(payload: &DeviceConfigPayload) -> Result<DecodedDeviceConfig> {
    decode(payload.fields, &payload.config)
}

/// Build the presence mask and blob for a set of fields.
pub fn encode(fields: &[DeviceConfigField]) -> Result<(u64, Vec<u8>)> {
    let mut sorted: Vec<&DeviceConfigField> = fields.iter().collect();
    sorted.sort_by_key(|f| f.bit());

    let mut mask = 0u64;
    let mut w = WireWriter::new();
    for field in sorted {
        let bit = 1u64 << field.bit();
        if mask & bit != 0 {
            return Err(ProtocolError::EncodeError(format!(
                "device config field {} given twice",
                field.name()
            )));
        }
        mask |= bit;
        field.encode(&mut w);
    }
    if w.len() > DEVICE_CONFIG_MAXSIZE {
        return Err(ProtocolError::EncodeError(format!(
            "device config of {} bytes exceeds {DEVICE_CONFIG_MAXSIZE}",
            w.len()
        )));
    }
    Ok((mask, w.into_vec()))
}

/// Server-to-device config write.
pub fn to_payload(fields: &[DeviceConfigField]) -> Result<DeviceConfigPayload> {
    let (mask, config) = encode(fields)?;
    Ok(DeviceConfigPayload {
        end_of_data: true,
        available_fields: 0,
        fields: mask,
        config,
    })
}
