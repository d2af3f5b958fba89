//! sing-box core adapter
//!
//! Supervises a sing-box child process, pulls traffic from its
//! Clash-compatible management API and translates generic inbound
//! descriptions into sing-box's native configuration schema.

pub mod builder;
pub mod clash;
pub mod core;

pub use builder::SingBoxConfigBuilder;
pub use clash::ClashApiClient;
pub use core::SingBoxCore;
