//! Manager registry and routing behaviour against a mock core

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use coremux_core::{
    ClientTraffic, ConfigBuilder, CoreKind, CoreManager, CoreState, Error, InboundConfig,
    InboundTraffic, Protocol, ProxyCore, Result, Status, Traffic,
};

struct MockCore {
    kind: CoreKind,
    state: RwLock<CoreState>,
    config: RwLock<Vec<u8>>,
}

impl MockCore {
    fn new(kind: CoreKind) -> Self {
        Self {
            kind,
            state: RwLock::new(CoreState::Stopped),
            config: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl ProxyCore for MockCore {
    fn kind(&self) -> CoreKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn version(&self) -> String {
        "0.0.0".to_string()
    }

    async fn start(&self, _shutdown: broadcast::Sender<()>, config: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == CoreState::Running {
            return Err(Error::AlreadyRunning(self.kind));
        }
        *state = CoreState::Running;
        *self.config.write().await = config.to_vec();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.state.write().await = CoreState::Stopped;
        Ok(())
    }

    async fn restart(&self, config: &[u8]) -> Result<()> {
        self.stop().await?;
        let (tx, _) = broadcast::channel(1);
        self.start(tx, config).await
    }

    async fn is_running(&self) -> bool {
        *self.state.read().await == CoreState::Running
    }

    async fn status(&self) -> Status {
        Status {
            state: *self.state.read().await,
            version: "0.0.0".to_string(),
            uptime_secs: 0,
            error_msg: String::new(),
            start_at: None,
        }
    }

    async fn get_traffic(&self) -> Result<Vec<InboundTraffic>> {
        Ok(vec![InboundTraffic {
            tag: "mock".to_string(),
            traffic: Traffic { up: 1, down: 2 },
        }])
    }

    async fn get_client_traffic(&self, email: &str) -> Result<ClientTraffic> {
        Ok(ClientTraffic {
            email: email.to_string(),
            traffic: Traffic::default(),
        })
    }

    async fn reset_traffic(&self, _tag: &str) -> Result<()> {
        Ok(())
    }

    async fn get_config(&self) -> Vec<u8> {
        self.config.read().await.clone()
    }

    async fn validate_config(&self, _config: &[u8]) -> Result<()> {
        Ok(())
    }
}

struct MockBuilder {
    template: Vec<u8>,
}

impl ConfigBuilder for MockBuilder {
    fn build(&self, inbounds: &[InboundConfig]) -> Result<Vec<u8>> {
        Ok(format!("{} inbounds", inbounds.len()).into_bytes())
    }

    fn template(&self) -> &[u8] {
        &self.template
    }
}

fn manager_with_both_cores() -> CoreManager {
    let manager = CoreManager::new();
    manager.register_core(Arc::new(MockCore::new(CoreKind::Xray)));
    manager.register_core(Arc::new(MockCore::new(CoreKind::SingBox)));
    manager
}

#[test]
fn get_core_returns_the_same_instance() {
    let manager = CoreManager::new();
    let core: Arc<dyn ProxyCore> = Arc::new(MockCore::new(CoreKind::Xray));
    manager.register_core(core.clone());

    let first = manager.core(CoreKind::Xray).unwrap();
    let second = manager.core(CoreKind::Xray).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &core));
}

#[test]
fn reregistration_replaces_the_prior_entry() {
    let manager = CoreManager::new();
    let old: Arc<dyn ProxyCore> = Arc::new(MockCore::new(CoreKind::Xray));
    let new: Arc<dyn ProxyCore> = Arc::new(MockCore::new(CoreKind::Xray));
    manager.register_core(old.clone());
    manager.register_core(new.clone());

    let resolved = manager.core(CoreKind::Xray).unwrap();
    assert!(Arc::ptr_eq(&resolved, &new));
    assert!(!Arc::ptr_eq(&resolved, &old));
}

#[test]
fn default_active_core_is_xray() {
    let manager = manager_with_both_cores();
    assert_eq!(manager.active_kind(), CoreKind::Xray);
}

#[test]
fn set_active_rejects_unregistered_kind() {
    let manager = CoreManager::new();
    manager.register_core(Arc::new(MockCore::new(CoreKind::Xray)));

    match manager.set_active(CoreKind::SingBox) {
        Err(Error::CoreNotRegistered(CoreKind::SingBox)) => {}
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert_eq!(manager.active_kind(), CoreKind::Xray);

    manager.register_core(Arc::new(MockCore::new(CoreKind::SingBox)));
    manager.set_active(CoreKind::SingBox).unwrap();
    assert_eq!(manager.active_kind(), CoreKind::SingBox);
}

#[tokio::test]
async fn start_routes_to_the_right_core() {
    let manager = manager_with_both_cores();
    let (shutdown, _) = broadcast::channel(1);

    manager
        .start(CoreKind::SingBox, shutdown, b"{}")
        .await
        .unwrap();
    assert!(manager.is_running(CoreKind::SingBox).await);
    assert!(!manager.is_running(CoreKind::Xray).await);

    manager.stop_all().await;
    assert!(!manager.is_running(CoreKind::SingBox).await);
}

#[tokio::test]
async fn starting_twice_fails_with_already_running() {
    let manager = manager_with_both_cores();
    let (shutdown, _) = broadcast::channel(1);

    manager
        .start(CoreKind::Xray, shutdown.clone(), b"first")
        .await
        .unwrap();
    let err = manager
        .start(CoreKind::Xray, shutdown, b"second")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning(CoreKind::Xray)));

    // config must be untouched by the failed start
    let core = manager.core(CoreKind::Xray).unwrap();
    assert_eq!(core.get_config().await, b"first");
}

#[tokio::test]
async fn status_of_unregistered_core_reads_stopped() {
    let manager = CoreManager::new();
    let status = manager.status(CoreKind::SingBox).await;
    assert_eq!(status.state, CoreState::Stopped);
}

#[tokio::test]
async fn traffic_of_unregistered_core_errors() {
    let manager = CoreManager::new();
    let err = manager.traffic(CoreKind::Xray).await.unwrap_err();
    assert!(matches!(err, Error::CoreNotRegistered(CoreKind::Xray)));
}

#[test]
fn build_config_requires_a_registered_builder() {
    let manager = manager_with_both_cores();
    let err = manager.build_config(CoreKind::Xray, &[]).unwrap_err();
    assert!(matches!(err, Error::BuilderNotRegistered(CoreKind::Xray)));

    manager.register_builder(
        CoreKind::Xray,
        Arc::new(MockBuilder { template: b"{}".to_vec() }),
    );
    let bytes = manager.build_config(CoreKind::Xray, &[]).unwrap();
    assert_eq!(bytes, b"0 inbounds");
}

#[test]
fn sing_box_only_protocols_route_to_sing_box() {
    let manager = manager_with_both_cores();
    assert_eq!(manager.select_core_for(Protocol::Hysteria2), CoreKind::SingBox);
    assert_eq!(manager.select_core_for(Protocol::Vmess), CoreKind::Xray);

    assert!(!manager.can_handle(Protocol::Tuic));
    manager.set_active(CoreKind::SingBox).unwrap();
    assert!(manager.can_handle(Protocol::Tuic));
    assert_eq!(manager.select_core_for(Protocol::Vmess), CoreKind::SingBox);
}

#[tokio::test]
async fn list_cores_flags_the_active_entry() {
    let manager = manager_with_both_cores();
    let infos = manager.list_cores().await;
    assert_eq!(infos.len(), 2);
    let active: Vec<_> = infos.iter().filter(|i| i.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].kind, CoreKind::Xray);
}
