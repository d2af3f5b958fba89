//! Xray core adapter
//!
//! Supervises an Xray child process, talks to its local stats bridge over
//! newline-delimited JSON and translates generic inbound descriptions into
//! Xray's native configuration schema.

pub mod builder;
pub mod core;
pub mod stats;

pub use builder::XrayConfigBuilder;
pub use core::XrayCore;
pub use stats::StatsClient;
