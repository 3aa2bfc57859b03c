//! Transports carrying envelopes across an execution boundary.
//!
//! Provides:
//! - Wire framing (line-delimited JSON)
//! - Process-boundary transport (feature: process)
//! - Hosted-bridge transport (feature: hosted)

pub mod protocol;

#[cfg(feature = "process")]
pub mod process;

#[cfg(feature = "hosted")]
pub mod hosted;

pub use protocol::{decode_line, encode_line};

#[cfg(feature = "process")]
pub use process::ProcessTransport;

#[cfg(feature = "hosted")]
pub use hosted::{HostBridge, HostListener, HostedTransport};
