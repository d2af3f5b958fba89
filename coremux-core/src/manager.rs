//! Registry and lifecycle routing for the registered proxy cores
//!
//! The manager is an explicitly constructed object owned by the
//! application's composition root; consumers receive a reference. There is
//! no process-wide singleton.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::contract::{ConfigBuilder, ProxyCore};
use crate::error::{Error, Result};
use crate::inbound::InboundConfig;
use crate::protocol::Protocol;
use crate::types::{CoreKind, InboundTraffic, Status};

/// Listing entry for one registered core
#[derive(Debug, Clone, Serialize)]
pub struct CoreInfo {
    pub kind: CoreKind,
    pub name: &'static str,
    pub version: String,
    pub is_active: bool,
    pub status: Status,
}

struct Registry {
    cores: HashMap<CoreKind, Arc<dyn ProxyCore>>,
    builders: HashMap<CoreKind, Arc<dyn ConfigBuilder>>,
    active: CoreKind,
}

/// Multi-core manager
///
/// Registration happens once at startup under the write lock; routing and
/// lookups afterwards only take the read lock. The lock is never held
/// across an await — lookups clone the `Arc` and release it.
pub struct CoreManager {
    registry: RwLock<Registry>,
}

impl Default for CoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                cores: HashMap::new(),
                builders: HashMap::new(),
                // Xray is the conventional default engine
                active: CoreKind::Xray,
            }),
        }
    }

    /// Register a core adapter; silently replaces a prior entry
    pub fn register_core(&self, core: Arc<dyn ProxyCore>) {
        let kind = core.kind();
        let name = core.name();
        self.registry
            .write()
            .expect("core registry lock poisoned")
            .cores
            .insert(kind, core);
        log::info!("registered core: {} ({})", name, kind);
    }

    /// Register a config builder for the given core kind
    pub fn register_builder(&self, kind: CoreKind, builder: Arc<dyn ConfigBuilder>) {
        self.registry
            .write()
            .expect("core registry lock poisoned")
            .builders
            .insert(kind, builder);
    }

    /// Look up the adapter for a core kind
    pub fn core(&self, kind: CoreKind) -> Option<Arc<dyn ProxyCore>> {
        self.registry
            .read()
            .expect("core registry lock poisoned")
            .cores
            .get(&kind)
            .cloned()
    }

    fn require_core(&self, kind: CoreKind) -> Result<Arc<dyn ProxyCore>> {
        self.core(kind).ok_or(Error::CoreNotRegistered(kind))
    }

    /// Look up the config builder for a core kind
    pub fn builder(&self, kind: CoreKind) -> Option<Arc<dyn ConfigBuilder>> {
        self.registry
            .read()
            .expect("core registry lock poisoned")
            .builders
            .get(&kind)
            .cloned()
    }

    fn require_builder(&self, kind: CoreKind) -> Result<Arc<dyn ConfigBuilder>> {
        self.builder(kind).ok_or(Error::BuilderNotRegistered(kind))
    }

    /// Currently active core kind
    pub fn active_kind(&self) -> CoreKind {
        self.registry.read().expect("core registry lock poisoned").active
    }

    /// Active core adapter, if the active kind has been registered
    pub fn active_core(&self) -> Option<Arc<dyn ProxyCore>> {
        self.core(self.active_kind())
    }

    /// Switch the active core; fails if the kind is not registered
    pub fn set_active(&self, kind: CoreKind) -> Result<()> {
        let mut registry = self.registry.write().expect("core registry lock poisoned");
        if !registry.cores.contains_key(&kind) {
            return Err(Error::CoreNotRegistered(kind));
        }
        registry.active = kind;
        log::info!("active core set to: {}", kind);
        Ok(())
    }

    pub async fn start(
        &self,
        kind: CoreKind,
        shutdown: broadcast::Sender<()>,
        config: &[u8],
    ) -> Result<()> {
        self.require_core(kind)?.start(shutdown, config).await
    }

    pub async fn start_active(
        &self,
        shutdown: broadcast::Sender<()>,
        config: &[u8],
    ) -> Result<()> {
        self.start(self.active_kind(), shutdown, config).await
    }

    pub async fn stop(&self, kind: CoreKind) -> Result<()> {
        self.require_core(kind)?.stop().await
    }

    pub async fn stop_active(&self) -> Result<()> {
        self.stop(self.active_kind()).await
    }

    /// Stop every running core; failures are logged, not propagated
    pub async fn stop_all(&self) {
        for core in self.all_cores() {
            if core.is_running().await {
                if let Err(e) = core.stop().await {
                    log::warn!("failed to stop {}: {}", core.name(), e);
                }
            }
        }
    }

    pub async fn restart(&self, kind: CoreKind, config: &[u8]) -> Result<()> {
        self.require_core(kind)?.restart(config).await
    }

    pub async fn restart_active(&self, config: &[u8]) -> Result<()> {
        self.restart(self.active_kind(), config).await
    }

    pub async fn is_running(&self, kind: CoreKind) -> bool {
        match self.core(kind) {
            Some(core) => core.is_running().await,
            None => false,
        }
    }

    pub async fn is_active_running(&self) -> bool {
        self.is_running(self.active_kind()).await
    }

    /// Status for one core; unregistered kinds read as stopped
    pub async fn status(&self, kind: CoreKind) -> Status {
        match self.core(kind) {
            Some(core) => core.status().await,
            None => Status::stopped(),
        }
    }

    pub async fn active_status(&self) -> Status {
        self.status(self.active_kind()).await
    }

    pub async fn all_status(&self) -> HashMap<CoreKind, Status> {
        let mut result = HashMap::new();
        for core in self.all_cores() {
            result.insert(core.kind(), core.status().await);
        }
        result
    }

    /// Build an engine-native config with the registered builder
    pub fn build_config(&self, kind: CoreKind, inbounds: &[InboundConfig]) -> Result<Vec<u8>> {
        self.require_builder(kind)?.build(inbounds)
    }

    pub fn build_active_config(&self, inbounds: &[InboundConfig]) -> Result<Vec<u8>> {
        self.build_config(self.active_kind(), inbounds)
    }

    pub async fn traffic(&self, kind: CoreKind) -> Result<Vec<InboundTraffic>> {
        self.require_core(kind)?.get_traffic().await
    }

    pub async fn active_traffic(&self) -> Result<Vec<InboundTraffic>> {
        self.traffic(self.active_kind()).await
    }

    /// List every registered core with its current status
    pub async fn list_cores(&self) -> Vec<CoreInfo> {
        let active = self.active_kind();
        let mut result = Vec::new();
        for core in self.all_cores() {
            result.push(CoreInfo {
                kind: core.kind(),
                name: core.name(),
                version: core.version().await,
                is_active: core.kind() == active,
                status: core.status().await,
            });
        }
        result
    }

    /// Pick the core that must serve the given protocol
    ///
    /// sing-box-only protocols route to sing-box; everything else stays on
    /// the active core.
    pub fn select_core_for(&self, protocol: Protocol) -> CoreKind {
        if protocol.is_sing_box_only() {
            CoreKind::SingBox
        } else {
            self.active_kind()
        }
    }

    /// Whether the active core can serve the given protocol
    pub fn can_handle(&self, protocol: Protocol) -> bool {
        protocol.supported_by(self.active_kind())
    }

    fn all_cores(&self) -> Vec<Arc<dyn ProxyCore>> {
        self.registry
            .read()
            .expect("core registry lock poisoned")
            .cores
            .values()
            .cloned()
            .collect()
    }
}
