//! Relaybot — channel-to-channel message forwarding pipeline.

pub mod config;
pub mod content;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod translate;
pub mod transport;
pub mod watermark;
