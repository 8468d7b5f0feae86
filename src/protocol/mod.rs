//! # Protocol Layer
//!
//! Message catalog and the codecs that give meaning to frame payloads.
//!
//! ## Components
//! - **CallType**: frame header ids
//! - **Message**: one variant per call type
//! - **Registration**: families A through G behind one shape
//! - **Dispatcher**: id → decoder table
//! - **ChannelValue**: per-channel-type value codec
//! - **DeviceConfig**: bitmask-selected config fields

pub mod call_type;
pub mod channel_value;
pub mod device_config;
pub mod dispatcher;
pub mod message;
pub mod registration;


pub use call_type::CallType;
pub use channel_value::{ChannelType, ChannelValue};
pub use dispatcher::Dispatcher;
pub use message::{Message, WireFormat};
pub use registration::{ChannelDescriptor, Credential, RegisterDevice, RegistrationVariant};
