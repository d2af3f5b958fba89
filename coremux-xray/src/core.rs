//! Xray process adapter

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::process::Command;
use tokio::sync::{broadcast, RwLock};

use coremux_core::process::{self, ExitOutcome, ProcessHandle};
use coremux_core::{
    ClientTraffic, CoreKind, CoreState, Error, InboundTraffic, ProxyCore, Result, Status, Traffic,
};

use crate::stats::{self, StatsClient};

const VERSION_PREFIX: &str = "Xray ";
const DEFAULT_API_PORT: u16 = 10085;
const RESTART_SETTLE: Duration = Duration::from_millis(500);
const STATS_CONNECT_DELAY: Duration = Duration::from_secs(1);

struct Inner {
    state: CoreState,
    config: Vec<u8>,
    error_msg: String,
    /// Monotonic clock for uptime plus wall clock for reporting
    started: Option<(Instant, SystemTime)>,
    version: Option<String>,
    process: Option<ProcessHandle>,
    stats: Option<StatsClient>,
    shutdown: Option<broadcast::Sender<()>>,
}

/// Supervises one Xray child process
///
/// Launches `<binary> run -c <config>` with `XRAY_LOCATION_ASSET` pointing
/// at the asset directory. One second after a successful start the adapter
/// attempts a single background connection to the local stats bridge; if
/// that fails, stats calls return errors until the next restart.
pub struct XrayCore {
    binary_path: PathBuf,
    config_path: PathBuf,
    asset_dir: PathBuf,
    api_port: u16,
    inner: Arc<RwLock<Inner>>,
}

impl Default for XrayCore {
    fn default() -> Self {
        Self::new()
    }
}

impl XrayCore {
    pub fn new() -> Self {
        let binary = format!("xray-{}-{}", env::consts::OS, env::consts::ARCH);
        Self {
            binary_path: PathBuf::from("bin").join(binary),
            config_path: PathBuf::from("bin").join("config.json"),
            asset_dir: PathBuf::from("bin"),
            api_port: DEFAULT_API_PORT,
            inner: Arc::new(RwLock::new(Inner {
                state: CoreState::Stopped,
                config: Vec::new(),
                error_msg: String::new(),
                started: None,
                version: None,
                process: None,
                stats: None,
                shutdown: None,
            })),
        }
    }

    pub fn with_binary_path(mut self, path: impl AsRef<Path>) -> Self {
        self.binary_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_asset_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.asset_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    /// Connect the stats client after the engine has had time to bind
    fn connect_stats_later(&self) {
        let inner = self.inner.clone();
        let client = StatsClient::new(([127, 0, 0, 1], self.api_port).into());
        tokio::spawn(async move {
            tokio::time::sleep(STATS_CONNECT_DELAY).await;
            match client.probe().await {
                Ok(()) => {
                    let mut guard = inner.write().await;
                    // only attach if the start we belong to is still live
                    if guard.state == CoreState::Running {
                        log::info!("xray stats bridge connected at {}", client.addr());
                        guard.stats = Some(client);
                    }
                }
                Err(e) => {
                    log::warn!("xray stats bridge unavailable: {}", e);
                }
            }
        });
    }

    async fn stats_client(&self) -> Result<StatsClient> {
        self.inner
            .read()
            .await
            .stats
            .clone()
            .ok_or(Error::StatsNotConnected)
    }
}

#[async_trait::async_trait]
impl ProxyCore for XrayCore {
    fn kind(&self) -> CoreKind {
        CoreKind::Xray
    }

    fn name(&self) -> &'static str {
        "xray"
    }

    async fn version(&self) -> String {
        if let Some(version) = self.inner.read().await.version.clone() {
            return version;
        }
        let probed =
            process::probe_version(&self.binary_path, &["version"], VERSION_PREFIX).await;
        self.inner.write().await.version = Some(probed.clone());
        probed
    }

    async fn start(&self, shutdown: broadcast::Sender<()>, config: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == CoreState::Running {
            return Err(Error::AlreadyRunning(CoreKind::Xray));
        }

        tokio::fs::write(&self.config_path, config).await?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .env("XRAY_LOCATION_ASSET", &self.asset_dir);

        let state = self.inner.clone();
        let spawned = process::spawn_supervised(command, "xray", &shutdown, move |outcome| {
            async move {
                let mut guard = state.write().await;
                // stop() already moved us out of Running; leave its result alone
                if guard.state == CoreState::Running {
                    match outcome {
                        ExitOutcome::Clean => {
                            log::info!("xray exited");
                            guard.state = CoreState::Stopped;
                        }
                        ExitOutcome::Failed(msg) => {
                            log::error!("xray failed: {}", msg);
                            guard.state = CoreState::Error;
                            guard.error_msg = msg;
                        }
                    }
                    guard.started = None;
                    guard.process = None;
                    guard.stats = None;
                }
            }
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // launch failures are retained for Status like runtime failures
                inner.state = CoreState::Error;
                inner.error_msg = e.to_string();
                return Err(Error::Launch {
                    kind: CoreKind::Xray,
                    msg: e.to_string(),
                });
            }
        };

        log::info!("xray started (pid {:?})", handle.pid());
        inner.state = CoreState::Running;
        inner.config = config.to_vec();
        inner.error_msg.clear();
        inner.started = Some((Instant::now(), SystemTime::now()));
        inner.process = Some(handle);
        inner.shutdown = Some(shutdown);
        drop(inner);

        self.connect_stats_later();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let process = inner.process.take();
        inner.state = CoreState::Stopped;
        inner.started = None;
        inner.stats = None;
        drop(inner);

        if let Some(mut handle) = process {
            handle.terminate().await;
            log::info!("xray stopped");
        }
        Ok(())
    }

    async fn restart(&self, config: &[u8]) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(RESTART_SETTLE).await;
        let shutdown = self
            .inner
            .read()
            .await
            .shutdown
            .clone()
            .unwrap_or_else(|| broadcast::channel(1).0);
        self.start(shutdown, config).await
    }

    async fn is_running(&self) -> bool {
        self.inner.read().await.state == CoreState::Running
    }

    async fn status(&self) -> Status {
        let inner = self.inner.read().await;
        Status {
            state: inner.state,
            version: inner.version.clone().unwrap_or_default(),
            uptime_secs: inner
                .started
                .map(|(instant, _)| instant.elapsed().as_secs())
                .unwrap_or(0),
            error_msg: inner.error_msg.clone(),
            start_at: inner.started.map(|(_, wall)| wall),
        }
    }

    async fn get_traffic(&self) -> Result<Vec<InboundTraffic>> {
        let client = self.stats_client().await?;
        let counters = client.query("inbound>>>", false).await?;
        Ok(stats::aggregate_inbound(&counters))
    }

    async fn get_client_traffic(&self, email: &str) -> Result<ClientTraffic> {
        let client = self.stats_client().await?;
        // missing counters mean the client has not passed traffic yet
        let up = client
            .get(&format!("user>>>{}>>>traffic>>>uplink", email))
            .await?
            .unwrap_or(0);
        let down = client
            .get(&format!("user>>>{}>>>traffic>>>downlink", email))
            .await?
            .unwrap_or(0);
        Ok(ClientTraffic {
            email: email.to_string(),
            traffic: Traffic { up, down },
        })
    }

    async fn reset_traffic(&self, tag: &str) -> Result<()> {
        let client = self.stats_client().await?;
        client
            .query(&format!("inbound>>>{}>>>traffic>>>", tag), true)
            .await?;
        Ok(())
    }

    async fn get_config(&self) -> Vec<u8> {
        self.inner.read().await.config.clone()
    }

    async fn validate_config(&self, config: &[u8]) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new()?;
        tokio::fs::write(tmp.path(), config).await?;

        let output = Command::new(&self.binary_path)
            .arg("run")
            .arg("-test")
            .arg("-c")
            .arg(tmp.path())
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }

        let mut message = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(stderr.trim());
        }
        Err(Error::Validate(message))
    }
}
