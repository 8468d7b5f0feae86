//! # Device Sessions
//!
//! Per-connection protocol state and the pieces it is built from.
//!
//! ## Components
//! - **Connection**: [`Session`], the read loop and host command surface
//! - **State**: the registration state machine
//! - **Authenticator**: location and e-mail credential checks
//! - **Liveness**: activity-timeout supervision
//! - **Gateway**: sub-device routing and discovery
//! - **Writer**: serialized outbound frames
//! - **Context**: engine-wide shared state

pub mod authenticator;
pub mod connection;
pub mod context;
pub mod gateway;
pub mod liveness;
pub mod state;
pub mod writer;

pub use authenticator::Authenticator;
pub use connection::Session;
pub use context::EngineContext;
pub use gateway::{GatewayRouter, SubDeviceRegistry};
pub use liveness::LivenessSupervisor;
pub use state::SessionState;
