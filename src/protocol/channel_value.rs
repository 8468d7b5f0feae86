//! # Channel Value Codec
//!
//! Interprets the 8-byte channel value (and the variable-length extended value)
//! according to the channel's type tag.
//!
//! An unknown *type tag* is an error. An unexpected *value* under a known type
//! never is: it decodes to [`ChannelValue::Unknown`] carrying the raw bytes so
//! newer firmware keeps working.
//!
//! ## Numeric conventions
//! - DHT temperature/humidity: `i32 * 1000`
//! - HVAC setpoints: `i16 * 100`
//! - Electricity meter: voltage `*100`, current `*1000`, power `*100000`,
//!   energy `*100000` kWh, power factor `*1000`, phase angle `*10`,
//!   frequency `*100`

use tracing::{debug, trace};

use crate::core::wire::{WireReader, WireWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{ChannelValueBytes, ExtendedValue, CHANNEL_VALUE_SIZE};

macro_rules! channel_types {
    ($($variant:ident = $id:expr),+ $(,)?) => {
        /// Protocol channel type tags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        pub enum ChannelType {
            $($variant = $id),+
        }

        impl ChannelType {
            pub fn from_tag(tag: i32) -> Result<Self> {
                match tag {
                    $($id => Ok(ChannelType::$variant),)+
                    other => Err(ProtocolError::UnknownChannelType(other)),
                }
            }
        }
    };
}

channel_types! {
    SensorNo = 1000,
    SensorNc = 1010,
    Distance = 1020,
    CallButton = 1500,
    Relay = 2900,
    RelayHfd4 = 2000,
    RelayG5la1a = 2010,
    Relay2xG5la1a = 2020,
    Thermometer = 3000,
    Dht11 = 3010,
    Dht22 = 3020,
    Dht21 = 3022,
    Am2302 = 3030,
    Am2301 = 3032,
    ThermometerDs18b20 = 3034,
    HumiditySensor = 3036,
    HumidityAndTemperature = 3038,
    WindSensor = 3042,
    PressureSensor = 3044,
    RainSensor = 3048,
    WeightSensor = 3050,
    WeatherStation = 3100,
    Dimmer = 4000,
    RgbLedController = 4010,
    DimmerAndRgbLed = 4020,
    ElectricityMeter = 5000,
    ImpulseCounter = 5010,
    Thermostat = 6000,
    ThermostatHeatpolHomeplus = 6010,
    Hvac = 6100,
    ValveOpenClose = 7000,
    ValvePercentage = 7010,
    Bridge = 8000,
    GeneralPurposeMeasurement = 9000,
    GeneralPurposeMeter = 9010,
    Engine = 10000,
    ActionTrigger = 11000,
    Digiglass = 12000,
}

impl ChannelType {
    pub fn tag(self) -> i32 {
        self as i32
    }

    pub fn is_relay(self) -> bool {
        matches!(
            self,
            ChannelType::Relay
                | ChannelType::RelayHfd4
                | ChannelType::RelayG5la1a
                | ChannelType::Relay2xG5la1a
        )
    }
}

/// Channel functions that change how a relay value is read and written.
pub const FNC_CONTROLLING_THE_ROLLER_SHUTTER: i32 = 110;
pub const FNC_CONTROLLING_THE_ROOF_WINDOW: i32 = 115;

/// Extended value type tag for electricity meter measurements.
pub const EV_TYPE_ELECTRICITY_METER_MEASUREMENT: i8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenClose {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppableOpenClose {
    Open,
    Close,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgbw {
    pub brightness: u8,
    pub color_brightness: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    NotSet,
    Off,
    Heat,
    Cool,
    HeatCool,
    FanOnly,
    Dry,
    CmdTurnOn,
    CmdWeeklySchedule,
    CmdSwitchToManual,
    Other(u8),
}

impl HvacMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => HvacMode::NotSet,
            1 => HvacMode::Off,
            2 => HvacMode::Heat,
            3 => HvacMode::Cool,
            4 => HvacMode::HeatCool,
            6 => HvacMode::FanOnly,
            7 => HvacMode::Dry,
            8 => HvacMode::CmdTurnOn,
            9 => HvacMode::CmdWeeklySchedule,
            10 => HvacMode::CmdSwitchToManual,
            other => HvacMode::Other(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            HvacMode::NotSet => 0,
            HvacMode::Off => 1,
            HvacMode::Heat => 2,
            HvacMode::Cool => 3,
            HvacMode::HeatCool => 4,
            HvacMode::FanOnly => 6,
            HvacMode::Dry => 7,
            HvacMode::CmdTurnOn => 8,
            HvacMode::CmdWeeklySchedule => 9,
            HvacMode::CmdSwitchToManual => 10,
            HvacMode::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacFlag {
    SetpointTempHeatSet,
    SetpointTempCoolSet,
    Heating,
    Cooling,
    WeeklySchedule,
    CountdownTimer,
    FanEnabled,
    ThermometerError,
    ClockError,
    ForcedOffBySensor,
    Cool,
    WeeklyScheduleTemporalOverride,
    BatteryCoverOpen,
}

impl HvacFlag {
    pub const ALL: [HvacFlag; 13] = [
        HvacFlag::SetpointTempHeatSet,
        HvacFlag::SetpointTempCoolSet,
        HvacFlag::Heating,
        HvacFlag::Cooling,
        HvacFlag::WeeklySchedule,
        HvacFlag::CountdownTimer,
        HvacFlag::FanEnabled,
        HvacFlag::ThermometerError,
        HvacFlag::ClockError,
        HvacFlag::ForcedOffBySensor,
        HvacFlag::Cool,
        HvacFlag::WeeklyScheduleTemporalOverride,
        HvacFlag::BatteryCoverOpen,
    ];

    pub fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            HvacFlag::SetpointTempHeatSet => "setpoint_temp_heat_set",
            HvacFlag::SetpointTempCoolSet => "setpoint_temp_cool_set",
            HvacFlag::Heating => "heating",
            HvacFlag::Cooling => "cooling",
            HvacFlag::WeeklySchedule => "weekly_schedule",
            HvacFlag::CountdownTimer => "countdown_timer",
            HvacFlag::FanEnabled => "fan_enabled",
            HvacFlag::ThermometerError => "thermometer_error",
            HvacFlag::ClockError => "clock_error",
            HvacFlag::ForcedOffBySensor => "forced_off_by_sensor",
            HvacFlag::Cool => "cool",
            HvacFlag::WeeklyScheduleTemporalOverride => "weekly_schedule_temporal_override",
            HvacFlag::BatteryCoverOpen => "battery_cover_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HvacFlags(pub u16);

impl HvacFlags {
    pub fn contains(self, flag: HvacFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: HvacFlag) {
        self.0 |= flag.bit();
    }

    pub fn iter(self) -> impl Iterator<Item = HvacFlag> {
        HvacFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HvacValue {
    pub on: bool,
    pub mode: HvacMode,
    /// Degrees Celsius, present only when the matching flag is set.
    pub setpoint_heat: Option<f64>,
    pub setpoint_cool: Option<f64>,
    pub flags: HvacFlags,
}

impl HvacValue {
    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(raw, "HvacValue");
        let on = r.u8()? != 0;
        let mode = HvacMode::from_u8(r.u8()?);
        let heat = r.i16()?;
        let cool = r.i16()?;
        let flags = HvacFlags(r.u16()?);
        Ok(Self {
            on,
            mode,
            setpoint_heat: flags
                .contains(HvacFlag::SetpointTempHeatSet)
                .then(|| f64::from(heat) / 100.0),
            setpoint_cool: flags
                .contains(HvacFlag::SetpointTempCoolSet)
                .then(|| f64::from(cool) / 100.0),
            flags,
        })
    }

    fn encode(&self) -> ChannelValueBytes {
        let mut flags = self.flags;
        if self.setpoint_heat.is_some() {
            flags.insert(HvacFlag::SetpointTempHeatSet);
        }
        if self.setpoint_cool.is_some() {
            flags.insert(HvacFlag::SetpointTempCoolSet);
        }
        let mut w = WireWriter::with_capacity(CHANNEL_VALUE_SIZE);
        w.u8(u8::from(self.on))
            .u8(self.mode.to_u8())
            .i16(scaled_i16(self.setpoint_heat.unwrap_or(0.0), 100.0))
            .i16(scaled_i16(self.setpoint_cool.unwrap_or(0.0), 100.0))
            .u16(flags.0);
        to_value_bytes(&w.into_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseMeasurement {
    /// Volts
    pub voltage: f64,
    /// Amperes
    pub current: f64,
    /// Watts
    pub power_active: f64,
    /// var
    pub power_reactive: f64,
    /// VA
    pub power_apparent: f64,
    /// kWh
    pub total_forward_active_energy: f64,
    pub total_reverse_active_energy: f64,
    /// kvarh
    pub total_forward_reactive_energy: f64,
    pub total_reverse_reactive_energy: f64,
    pub power_factor: f64,
    /// Degrees
    pub phase_angle: f64,
    /// Hz
    pub frequency: f64,
}

impl PhaseMeasurement {
    pub const WIRE_SIZE: usize = 2 + 2 + 3 * 4 + 4 * 8 + 2 + 2 + 2;

    /// A phase slot counts towards totals once it reports anything.
    pub fn is_populated(&self) -> bool {
        *self != PhaseMeasurement::default()
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            voltage: f64::from(r.u16()?) / 100.0,
            current: f64::from(r.u16()?) / 1000.0,
            power_active: f64::from(r.i32()?) / 100_000.0,
            power_reactive: f64::from(r.i32()?) / 100_000.0,
            power_apparent: f64::from(r.i32()?) / 100_000.0,
            total_forward_active_energy: r.u64()? as f64 / 100_000.0,
            total_reverse_active_energy: r.u64()? as f64 / 100_000.0,
            total_forward_reactive_energy: r.u64()? as f64 / 100_000.0,
            total_reverse_reactive_energy: r.u64()? as f64 / 100_000.0,
            power_factor: f64::from(r.i16()?) / 1000.0,
            phase_angle: f64::from(r.i16()?) / 10.0,
            frequency: f64::from(r.u16()?) / 100.0,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.u16(scaled_u16(self.voltage, 100.0))
            .u16(scaled_u16(self.current, 1000.0))
            .i32(scaled_i32(self.power_active, 100_000.0))
            .i32(scaled_i32(self.power_reactive, 100_000.0))
            .i32(scaled_i32(self.power_apparent, 100_000.0))
            .u64(scaled_u64(self.total_forward_active_energy, 100_000.0))
            .u64(scaled_u64(self.total_reverse_active_energy, 100_000.0))
            .u64(scaled_u64(self.total_forward_reactive_energy, 100_000.0))
            .u64(scaled_u64(self.total_reverse_reactive_energy, 100_000.0))
            .i16(scaled_i16(self.power_factor, 1000.0))
            .i16(scaled_i16(self.phase_angle, 10.0))
            .u16(scaled_u16(self.frequency, 100.0));
    }
}

/// Sums over the populated phases.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseTotals {
    pub current: f64,
    pub power_active: f64,
    pub power_reactive: f64,
    pub power_apparent: f64,
    pub forward_active_energy: f64,
    pub reverse_active_energy: f64,
    pub forward_reactive_energy: f64,
    pub reverse_reactive_energy: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElectricityMeter {
    pub currency: String,
    pub total_cost: f64,
    pub price_per_unit: f64,
    pub measured_values: i32,
    /// Measurement period in seconds
    pub period: i32,
    pub phases: [PhaseMeasurement; 3],
}

impl ElectricityMeter {
    pub const CURRENCY_SIZE: usize = 3;
    pub const WIRE_SIZE: usize = Self::CURRENCY_SIZE + 4 * 4 + 3 * PhaseMeasurement::WIRE_SIZE;

    /// Decodes the measurement layout. Bytes past `WIRE_SIZE` belong to newer
    /// firmware and are ignored.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(raw, "ElectricityMeter");
        let currency = r.fixed_str(Self::CURRENCY_SIZE)?;
        let total_cost = f64::from(r.i32()?) / 100.0;
        let price_per_unit = f64::from(r.i32()?) / 10_000.0;
        let measured_values = r.i32()?;
        let period = r.i32()?;
        let phases = [
            PhaseMeasurement::decode(&mut r)?,
            PhaseMeasurement::decode(&mut r)?,
            PhaseMeasurement::decode(&mut r)?,
        ];
        if r.remaining() > 0 {
            trace!(extra = r.remaining(), "Ignoring trailing electricity meter bytes");
        }
        Ok(Self {
            currency,
            total_cost,
            price_per_unit,
            measured_values,
            period,
            phases,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = WireWriter::with_capacity(Self::WIRE_SIZE);
        w.fixed_str(&self.currency, Self::CURRENCY_SIZE)?;
        w.i32(scaled_i32(self.total_cost, 100.0))
            .i32(scaled_i32(self.price_per_unit, 10_000.0))
            .i32(self.measured_values)
            .i32(self.period);
        for phase in &self.phases {
            phase.encode(&mut w);
        }
        Ok(w.into_vec())
    }

    pub fn to_extended_value(&self) -> Result<ExtendedValue> {
        Ok(ExtendedValue {
            ev_type: EV_TYPE_ELECTRICITY_METER_MEASUREMENT,
            value: self.encode()?,
        })
    }

    pub fn totals(&self) -> PhaseTotals {
        self.phases
            .iter()
            .filter(|p| p.is_populated())
            .fold(PhaseTotals::default(), |mut t, p| {
                t.current += p.current;
                t.power_active += p.power_active;
                t.power_reactive += p.power_reactive;
                t.power_apparent += p.power_apparent;
                t.forward_active_energy += p.total_forward_active_energy;
                t.reverse_active_energy += p.total_reverse_active_energy;
                t.forward_reactive_energy += p.total_forward_reactive_energy;
                t.reverse_reactive_energy += p.total_reverse_reactive_energy;
                t
            })
    }
}

/// Decoded channel state, keyed by the channel type that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValue {
    OnOff(bool),
    OpenClose(OpenClose),
    StoppableOpenClose(StoppableOpenClose),
    /// 0..=100
    Percent(u8),
    Decimal(f64),
    /// Degrees Celsius
    Temperature(f64),
    TemperatureAndHumidity {
        temperature: f64,
        humidity: f64,
    },
    Rgb(Rgbw),
    ElectricityMeter(Box<ElectricityMeter>),
    Hvac(HvacValue),
    ActionTrigger(u32),
    Unknown(Vec<u8>),
}

impl ChannelValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelValue::OnOff(_) => "OnOff",
            ChannelValue::OpenClose(_) => "OpenClose",
            ChannelValue::StoppableOpenClose(_) => "StoppableOpenClose",
            ChannelValue::Percent(_) => "Percent",
            ChannelValue::Decimal(_) => "Decimal",
            ChannelValue::Temperature(_) => "Temperature",
            ChannelValue::TemperatureAndHumidity { .. } => "TemperatureAndHumidity",
            ChannelValue::Rgb(_) => "Rgb",
            ChannelValue::ElectricityMeter(_) => "ElectricityMeter",
            ChannelValue::Hvac(_) => "Hvac",
            ChannelValue::ActionTrigger(_) => "ActionTrigger",
            ChannelValue::Unknown(_) => "Unknown",
        }
    }
}

fn f64_at(raw: &ChannelValueBytes) -> f64 {
    f64::from_le_bytes(*raw)
}

fn i32_at(raw: &ChannelValueBytes, offset: usize) -> i32 {
    i32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn u32_at(raw: &ChannelValueBytes, offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn to_value_bytes(src: &[u8]) -> ChannelValueBytes {
    let mut out = [0u8; CHANNEL_VALUE_SIZE];
    let n = src.len().min(CHANNEL_VALUE_SIZE);
    out[..n].copy_from_slice(&src[..n]);
    out
}

fn scaled_i16(v: f64, scale: f64) -> i16 {
    (v * scale).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn scaled_u16(v: f64, scale: f64) -> u16 {
    (v * scale).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn scaled_i32(v: f64, scale: f64) -> i32 {
    (v * scale).round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

fn scaled_u64(v: f64, scale: f64) -> u64 {
    (v * scale).round().max(0.0) as u64
}

fn is_roller_shutter(function: Option<i32>) -> bool {
    matches!(
        function,
        Some(FNC_CONTROLLING_THE_ROLLER_SHUTTER | FNC_CONTROLLING_THE_ROOF_WINDOW)
    )
}

/// Decode an 8-byte channel value.
///
/// `function` refines relays: roller-shutter relays report a shut percentage.
pub fn decode(channel_type: i32, function: Option<i32>, raw: &ChannelValueBytes) -> Result<ChannelValue> {
    let ty = ChannelType::from_tag(channel_type)?;
    let value = match ty {
        t if t.is_relay() && is_roller_shutter(function) => match raw[0] as i8 {
            p @ 0..=100 => ChannelValue::Percent(p as u8),
            _ => ChannelValue::Unknown(raw.to_vec()),
        },
        t if t.is_relay() => ChannelValue::OnOff(raw[0] != 0),
        ChannelType::SensorNo | ChannelType::SensorNc | ChannelType::ValveOpenClose => {
            ChannelValue::OpenClose(if raw[0] != 0 {
                OpenClose::Closed
            } else {
                OpenClose::Open
            })
        }
        ChannelType::Dimmer | ChannelType::ValvePercentage => match raw[0] {
            p @ 0..=100 => ChannelValue::Percent(p),
            _ => ChannelValue::Unknown(raw.to_vec()),
        },
        ChannelType::RgbLedController | ChannelType::DimmerAndRgbLed => {
            ChannelValue::Rgb(Rgbw {
                brightness: raw[0],
                color_brightness: raw[1],
                blue: raw[2],
                green: raw[3],
                red: raw[4],
                on: raw[5] != 0,
            })
        }
        ChannelType::Thermometer | ChannelType::ThermometerDs18b20 => {
            ChannelValue::Temperature(f64_at(raw))
        }
        ChannelType::Dht11
        | ChannelType::Dht22
        | ChannelType::Dht21
        | ChannelType::Am2302
        | ChannelType::Am2301
        | ChannelType::HumiditySensor
        | ChannelType::HumidityAndTemperature => ChannelValue::TemperatureAndHumidity {
            temperature: f64::from(i32_at(raw, 0)) / 1000.0,
            humidity: f64::from(i32_at(raw, 4)) / 1000.0,
        },
        ChannelType::Distance
        | ChannelType::WindSensor
        | ChannelType::PressureSensor
        | ChannelType::RainSensor
        | ChannelType::WeightSensor
        | ChannelType::GeneralPurposeMeasurement
        | ChannelType::GeneralPurposeMeter => ChannelValue::Decimal(f64_at(raw)),
        ChannelType::ImpulseCounter => ChannelValue::Decimal(u64::from_le_bytes(*raw) as f64),
        ChannelType::ElectricityMeter => ChannelValue::Decimal(f64::from(u32_at(raw, 1)) / 100.0),
        ChannelType::Hvac => ChannelValue::Hvac(HvacValue::decode(raw)?),
        ChannelType::ActionTrigger => ChannelValue::ActionTrigger(u32_at(raw, 0)),
        _ => ChannelValue::Unknown(raw.to_vec()),
    };
    Ok(value)
}

/// Decode an extended value. Types without an extended layout yield `Unknown`.
pub fn decode_extended(channel_type: i32, ev: &ExtendedValue) -> Result<ChannelValue> {
    let ty = ChannelType::from_tag(channel_type)?;
    if ty == ChannelType::ElectricityMeter && ev.ev_type == EV_TYPE_ELECTRICITY_METER_MEASUREMENT {
        match ElectricityMeter::decode(&ev.value) {
            Ok(em) => return Ok(ChannelValue::ElectricityMeter(Box::new(em))),
            Err(e) => debug!(error = %e, "Unreadable electricity meter value kept raw"),
        }
    }
    Ok(ChannelValue::Unknown(ev.value.clone()))
}

/// Encode a host command value for a channel.
pub fn encode(channel_type: i32, function: Option<i32>, value: &ChannelValue) -> Result<ChannelValueBytes> {
    let ty = ChannelType::from_tag(channel_type)?;
    let read_only = || {
        ProtocolError::EncodeError(format!(
            "{} cannot be written to channel type {channel_type}",
            value.kind()
        ))
    };

    let bytes = match (value, ty) {
        (ChannelValue::OnOff(on), t) if t.is_relay() || t == ChannelType::Digiglass => {
            to_value_bytes(&[u8::from(*on)])
        }
        (ChannelValue::StoppableOpenClose(action), t) if t.is_relay() => {
            let code = match action {
                StoppableOpenClose::Stop => 0,
                StoppableOpenClose::Close => 1,
                StoppableOpenClose::Open => 2,
            };
            to_value_bytes(&[code])
        }
        (ChannelValue::Percent(p), t) if t.is_relay() && is_roller_shutter(function) => {
            to_value_bytes(&[10 + (*p).min(100)])
        }
        (ChannelValue::Percent(p), ChannelType::Dimmer | ChannelType::ValvePercentage) => {
            to_value_bytes(&[(*p).min(100)])
        }
        (ChannelValue::Percent(p), ChannelType::DimmerAndRgbLed | ChannelType::RgbLedController) => {
            to_value_bytes(&[(*p).min(100), 0, 0, 0, 0, u8::from(*p > 0)])
        }
        (ChannelValue::OpenClose(state), ChannelType::ValveOpenClose) => {
            to_value_bytes(&[u8::from(*state == OpenClose::Closed)])
        }
        (ChannelValue::Rgb(rgb), ChannelType::RgbLedController | ChannelType::DimmerAndRgbLed) => {
            to_value_bytes(&[
                rgb.brightness.min(100),
                rgb.color_brightness.min(100),
                rgb.blue,
                rgb.green,
                rgb.red,
                u8::from(rgb.on),
            ])
        }
        (ChannelValue::Hvac(hvac), ChannelType::Hvac) => hvac.encode(),
        (ChannelValue::Unknown(raw), _) => to_value_bytes(raw),
        _ => return Err(read_only()),
    };
    Ok(bytes)
}
