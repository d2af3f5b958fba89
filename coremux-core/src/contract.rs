//! The engine contract every core adapter implements

use tokio::sync::broadcast;

use crate::error::Result;
use crate::inbound::InboundConfig;
use crate::types::{ClientTraffic, CoreKind, InboundTraffic, Status};

/// Capability set of one supervised proxy engine
///
/// Callers never branch on the engine kind themselves; they obtain an
/// adapter from the [`CoreManager`](crate::manager::CoreManager) and go
/// through this contract.
#[async_trait::async_trait]
pub trait ProxyCore: Send + Sync {
    /// Engine kind this adapter supervises
    fn kind(&self) -> CoreKind;

    /// Human-readable engine name
    fn name(&self) -> &'static str;

    /// Engine version, probed from the binary; "unknown" on any failure
    async fn version(&self) -> String;

    /// Start the engine process with the given configuration bytes
    ///
    /// Fails with `AlreadyRunning` if the engine is running. A send on
    /// `shutdown` terminates the child as if [`stop`](Self::stop) had been
    /// called; the resulting state transition happens asynchronously in
    /// the exit waiter.
    async fn start(&self, shutdown: broadcast::Sender<()>, config: &[u8]) -> Result<()>;

    /// Stop the engine; calling on a non-running engine is a no-op success
    async fn stop(&self) -> Result<()>;

    /// Stop, wait a short settling delay, then start with the new config
    ///
    /// If stop fails, start is not attempted.
    async fn restart(&self, config: &[u8]) -> Result<()>;

    async fn is_running(&self) -> bool;

    /// Snapshot of the adapter state
    async fn status(&self) -> Status;

    /// Per-inbound-tag traffic counters from the live engine
    async fn get_traffic(&self) -> Result<Vec<InboundTraffic>>;

    /// Traffic counters for one client identity
    async fn get_client_traffic(&self, email: &str) -> Result<ClientTraffic>;

    /// Reset the counters scoped to one inbound tag
    async fn reset_traffic(&self, tag: &str) -> Result<()>;

    /// Last successfully applied configuration (empty before first start)
    async fn get_config(&self) -> Vec<u8>;

    /// Validate configuration bytes without touching the running state
    async fn validate_config(&self, config: &[u8]) -> Result<()>;
}

/// Builds an engine-native configuration document from generic inbounds
pub trait ConfigBuilder: Send + Sync {
    /// Render the template plus the given inbounds into config bytes
    fn build(&self, inbounds: &[InboundConfig]) -> Result<Vec<u8>>;

    /// The unmodified template supplied at construction
    fn template(&self) -> &[u8];
}
