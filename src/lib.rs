//! # landmark-rs
//!
//! Client-side event tracking. Identify a visiting user, record page views
//! and custom actions, and relay them asynchronously to a collector.
//!
//! The core is the [`engine`]: a dispatcher task that buffers calls made
//! before initialization, coalesces an identification with the event that
//! follows it, and drains its queue one request per tick through a
//! [`transport`]. Identifiers persist through a pluggable [`cookie`] jar.

pub mod config;
pub mod cookie;
pub mod diagnostic;
pub mod echo;
pub mod engine;
pub mod error;
pub mod identity;
pub mod model;
pub mod telemetry;
pub mod transport;

pub use engine::{Identify, Landmark, Track};

/// Library version reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
