//! Coremux Core
//!
//! Engine-neutral foundation for supervising interchangeable proxy cores.
//! The rest of the application talks to a [`CoreManager`] holding one
//! adapter per [`CoreKind`]; adapters implement the [`ProxyCore`] contract
//! and hide the process model, configuration schema and statistics API of
//! the underlying engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Application Layer                   │
//! │                 (coremux-cli, ...)                  │
//! │                        │                            │
//! │                        ▼                            │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │                 CoreManager                   │  │
//! │  │  - adapter / builder registries               │  │
//! │  │  - active-core selection                      │  │
//! │  │  - protocol routing                           │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                  Adapter Layer                      │
//! │  ┌────────────────┐      ┌────────────────┐         │
//! │  │  coremux-xray  │      │ coremux-singbox│         │
//! │  │  - supervision │      │  - supervision │         │
//! │  │  - stats RPC   │      │  - Clash API   │         │
//! │  │  - builder     │      │  - builder     │         │
//! │  └────────────────┘      └────────────────┘         │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod contract;
pub mod error;
pub mod inbound;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod types;

pub use contract::{ConfigBuilder, ProxyCore};
pub use error::{Error, Result};
pub use inbound::{InboundConfig, SniffingConfig};
pub use manager::{CoreInfo, CoreManager};
pub use process::{ExitOutcome, ProcessHandle};
pub use protocol::Protocol;
pub use types::{ClientTraffic, CoreKind, CoreState, InboundTraffic, Status, Traffic};
