//! # Transport Layer
//!
//! Network listeners carrying device frames.
//!
//! ## Components
//! - **Server**: TCP accept loop, one session task per connection
//! - **TLS**: rustls configuration for encrypted device links

pub mod server;
pub mod tls;

pub use server::{DeviceServer, ListenerFactory};
pub use tls::TlsServerConfig;
