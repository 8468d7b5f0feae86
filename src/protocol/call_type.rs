//! Call-type identifiers carried in every frame header.
//!
//! Prefixes follow the direction of travel: `Dcs`/`Ds` device to server,
//! `Sdc`/`Sd` server to device.

macro_rules! call_types {
    ($($variant:ident = $id:expr),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u32)]
        pub enum CallType {
            $($variant = $id),+
        }

        impl CallType {
            pub const ALL: &'static [CallType] = &[$(CallType::$variant),+];

            pub fn from_id(id: u32) -> Option<Self> {
                match id {
                    $($id => Some(CallType::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(CallType::$variant => stringify!($variant),)+
                }
            }
        }
    };
}

call_types! {
    DcsGetVersion = 10,
    SdcGetVersionResult = 20,
    SdcVersionError = 30,
    DcsPingServer = 40,
    SdcPingServerResult = 50,
    DsRegisterDevice = 60,
    DsRegisterDeviceB = 65,
    DsRegisterDeviceC = 67,
    DsRegisterDeviceD = 68,
    DsRegisterDeviceE = 69,
    SdRegisterDeviceResult = 70,
    DsRegisterDeviceF = 75,
    SdRegisterDeviceResultB = 76,
    DsRegisterDeviceG = 77,
    DsDeviceChannelValueChanged = 100,
    DsDeviceChannelValueChangedB = 102,
    DsDeviceChannelValueChangedC = 103,
    DsDeviceChannelExtendedValueChanged = 105,
    SdChannelSetValue = 110,
    SdChannelGroupSetValue = 115,
    DsChannelSetValueResult = 120,
    DcsSetActivityTimeout = 130,
    SdcSetActivityTimeoutResult = 140,
    DsGetFirmwareUpdateUrl = 300,
    SdGetFirmwareUpdateUrlResult = 310,
    DcsGetRegistrationEnabled = 320,
    SdcGetRegistrationEnabledResult = 330,
    SdDeviceCalCfgRequest = 440,
    DsDeviceCalCfgResult = 450,
    DcsGetUserLocaltime = 560,
    SdcGetUserLocaltimeResult = 570,
    CsdGetChannelState = 580,
    DscChannelStateResult = 590,
    DsGetChannelFunctions = 600,
    SdGetChannelFunctionsResult = 610,
    DcsSetChannelCaption = 620,
    SdcSetChannelCaptionResult = 630,
    DsGetChannelConfig = 680,
    SdGetChannelConfigResult = 690,
    DsActionTrigger = 700,
    DsSetDeviceConfig = 720,
    SdSetDeviceConfigResult = 730,
    SdSetDeviceConfig = 740,
    DsSetDeviceConfigResult = 750,
    DsSetChannelConfig = 760,
    SdSetChannelConfigResult = 770,
    SdSetChannelConfig = 780,
    DsSetChannelConfigResult = 790,
    SdChannelConfigFinished = 800,
    DsSetSubdeviceDetails = 850,
}

impl CallType {
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Any of the registration family call types.
    pub fn is_registration(self) -> bool {
        matches!(
            self,
            CallType::DsRegisterDevice
                | CallType::DsRegisterDeviceB
                | CallType::DsRegisterDeviceC
                | CallType::DsRegisterDeviceD
                | CallType::DsRegisterDeviceE
                | CallType::DsRegisterDeviceF
                | CallType::DsRegisterDeviceG
        )
    }

    /// Calls a device may issue before it has registered.
    pub fn allowed_before_registration(self) -> bool {
        self.is_registration()
            || matches!(
                self,
                CallType::DcsGetVersion
                    | CallType::DcsPingServer
                    | CallType::DcsGetRegistrationEnabled
            )
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.id())
    }
}
