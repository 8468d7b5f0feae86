//! # SUPLA Server Core
//!
//! Server-side engine for the SUPLA device protocol. It accepts connections
//! from home-automation devices, frames and decodes their messages,
//! authenticates registrations, keeps sessions alive and routes gateway
//! sub-device traffic. The embedding host receives device events through
//! [`host::DeviceListener`] and sends commands through [`session::Session`].
//!
//! ## Layout
//! - [`core`]: sentinel framing and little-endian field codecs
//! - [`protocol`]: call types, messages, registration families, value codecs
//! - [`session`]: state machine, authenticator, liveness, gateway router
//! - [`transport`]: TCP/TLS listener
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use supla_server_core::config::{AuthConfig, EngineConfig};
//! use supla_server_core::host::{DeviceListener, DeviceRegistration, DeviceStatus};
//! use supla_server_core::protocol::ChannelValue;
//! use supla_server_core::session::EngineContext;
//! use supla_server_core::transport::DeviceServer;
//!
//! struct Printer;
//!
//! impl DeviceListener for Printer {
//!     fn on_registered(&self, reg: &DeviceRegistration) {
//!         println!("{} registered with {} channels", reg.name, reg.channels.len());
//!     }
//!     fn on_channel_value(&self, channel: u8, value: &ChannelValue) {
//!         println!("channel {channel}: {value:?}");
//!     }
//!     fn on_status(&self, status: &DeviceStatus) {
//!         println!("status: {status:?}");
//!     }
//! }
//!
//! # async fn run() -> supla_server_core::error::Result<()> {
//! let config = EngineConfig::default_with_overrides(|c| {
//!     c.auth = AuthConfig::location(1, "none");
//! });
//! let ctx = Arc::new(EngineContext::new(config));
//! let server = DeviceServer::new(ctx, Arc::new(|_peer: std::net::SocketAddr| {
//!     Arc::new(Printer) as Arc<dyn DeviceListener>
//! }))?;
//! server.run().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod host;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::EngineConfig;
pub use error::{ProtocolError, Result};
pub use host::{DeviceListener, DeviceRegistration, DeviceStatus, DiscoveryListener, OfflineReason};
pub use session::{EngineContext, Session};
pub use transport::DeviceServer;
