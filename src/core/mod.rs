//! # Core Protocol Components
//!
//! Low-level framing and the wire primitives every message layout is built from.
//!
//! ## Components
//! - **Frame**: sentinel-delimited wire unit
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Wire**: little-endian readers/writers and fixed-width strings
//!
//! ## Wire Format
//! ```text
//! [Tag "SUPLA"(5)] [Version(1)] [RrId(4)] [CallType(4)] [DataSize(4)] [Data(N)] [Tag(5)]
//! ```
//!
//! ## Security
//! - Declared payload size is bounded before any allocation (default 1024 bytes)
//! - A missing trailing sentinel is fatal to the connection

pub mod codec;
pub mod frame;
pub mod wire;
