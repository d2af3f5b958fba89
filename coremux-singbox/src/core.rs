//! sing-box process adapter

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::process::Command;
use tokio::sync::{broadcast, RwLock};

use coremux_core::process::{self, ExitOutcome, ProcessHandle};
use coremux_core::{
    ClientTraffic, CoreKind, CoreState, Error, InboundTraffic, ProxyCore, Result, Status,
};

use crate::clash::{self, ClashApiClient};

const VERSION_PREFIX: &str = "sing-box version ";
const DEFAULT_API_PORT: u16 = 9090;
const RESTART_SETTLE: Duration = Duration::from_millis(500);

struct Inner {
    state: CoreState,
    config: Vec<u8>,
    error_msg: String,
    started: Option<(Instant, SystemTime)>,
    version: Option<String>,
    process: Option<ProcessHandle>,
    api: Option<ClashApiClient>,
    shutdown: Option<broadcast::Sender<()>>,
}

/// Supervises one sing-box child process
///
/// Launches `<binary> run -c <config>`. The Clash API client is created
/// on start and dropped on stop, so statistics calls fail while the
/// engine is not running.
pub struct SingBoxCore {
    binary_path: PathBuf,
    config_path: PathBuf,
    api_port: u16,
    api_secret: String,
    inner: Arc<RwLock<Inner>>,
}

impl Default for SingBoxCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SingBoxCore {
    pub fn new() -> Self {
        let binary = format!("sing-box-{}-{}", env::consts::OS, env::consts::ARCH);
        Self {
            binary_path: PathBuf::from("bin").join(binary),
            config_path: PathBuf::from("bin").join("singbox-config.json"),
            api_port: DEFAULT_API_PORT,
            api_secret: String::new(),
            inner: Arc::new(RwLock::new(Inner {
                state: CoreState::Stopped,
                config: Vec::new(),
                error_msg: String::new(),
                started: None,
                version: None,
                process: None,
                api: None,
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

    pub fn with_api_port(mut self, port: u16) -> Self {
        self.api_port = port;
        self
    }

    pub fn with_api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = secret.into();
        self
    }

    async fn api_client(&self) -> Result<ClashApiClient> {
        self.inner
            .read()
            .await
            .api
            .clone()
            .ok_or(Error::StatsNotConnected)
    }
}

#[async_trait::async_trait]
impl ProxyCore for SingBoxCore {
    fn kind(&self) -> CoreKind {
        CoreKind::SingBox
    }

    fn name(&self) -> &'static str {
        "sing-box"
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
            return Err(Error::AlreadyRunning(CoreKind::SingBox));
        }

        tokio::fs::write(&self.config_path, config).await?;

        let mut command = Command::new(&self.binary_path);
        command.arg("run").arg("-c").arg(&self.config_path);

        let state = self.inner.clone();
        let spawned = process::spawn_supervised(command, "sing-box", &shutdown, move |outcome| {
            async move {
                let mut guard = state.write().await;
                if guard.state == CoreState::Running {
                    match outcome {
                        ExitOutcome::Clean => {
                            log::info!("sing-box exited");
                            guard.state = CoreState::Stopped;
                        }
                        ExitOutcome::Failed(msg) => {
                            log::error!("sing-box failed: {}", msg);
                            guard.state = CoreState::Error;
                            guard.error_msg = msg;
                        }
                    }
                    guard.started = None;
                    guard.process = None;
                    guard.api = None;
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
                    kind: CoreKind::SingBox,
                    msg: e.to_string(),
                });
            }
        };

        log::info!("sing-box started (pid {:?})", handle.pid());
        inner.state = CoreState::Running;
        inner.config = config.to_vec();
        inner.error_msg.clear();
        inner.started = Some((Instant::now(), SystemTime::now()));
        inner.process = Some(handle);
        inner.api = Some(ClashApiClient::new(self.api_port, self.api_secret.clone()));
        inner.shutdown = Some(shutdown);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let process = inner.process.take();
        inner.state = CoreState::Stopped;
        inner.started = None;
        inner.api = None;
        drop(inner);

        if let Some(mut handle) = process {
            handle.terminate().await;
            log::info!("sing-box stopped");
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
        let client = self.api_client().await?;
        let snapshot = client.connections().await?;
        Ok(clash::aggregate_by_tag(&snapshot.connections))
    }

    async fn get_client_traffic(&self, email: &str) -> Result<ClientTraffic> {
        // connection metadata carries no client identity
        Err(Error::Stats(format!(
            "sing-box does not expose per-client traffic counters (requested {})",
            email
        )))
    }

    async fn reset_traffic(&self, tag: &str) -> Result<()> {
        let client = self.api_client().await?;
        if tag.is_empty() {
            return client.close_all_connections().await;
        }

        // closing the tag's connections zeroes the snapshot the collector reports
        let snapshot = client.connections().await?;
        for connection in snapshot
            .connections
            .iter()
            .filter(|c| c.metadata.inbound_tag == tag)
        {
            if let Err(e) = client.close_connection(&connection.id).await {
                log::warn!("failed to close connection {}: {}", connection.id, e);
            }
        }
        Ok(())
    }

    async fn get_config(&self) -> Vec<u8> {
        self.inner.read().await.config.clone()
    }

    async fn validate_config(&self, config: &[u8]) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new()?;
        tokio::fs::write(tmp.path(), config).await?;

        let output = Command::new(&self.binary_path)
            .arg("check")
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

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn core_with_script(dir: &Path, body: &str) -> SingBoxCore {
        let binary = write_script(dir, "fake-sing-box", body);
        SingBoxCore::new()
            .with_binary_path(binary)
            .with_config_path(dir.join("singbox-config.json"))
    }

    #[tokio::test]
    async fn probes_the_version() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_script(dir.path(), r#"echo "sing-box version 1.9.0""#);
        assert_eq!(core.version().await, "1.9.0");
    }

    #[tokio::test]
    async fn version_probe_failure_reads_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let core = SingBoxCore::new().with_binary_path(dir.path().join("missing"));
        assert_eq!(core.version().await, "unknown");
    }

    #[tokio::test]
    async fn start_stop_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_script(dir.path(), "sleep 30");
        let (shutdown, _) = broadcast::channel(1);

        core.start(shutdown.clone(), b"{}").await.unwrap();
        assert!(core.is_running().await);
        assert_eq!(core.status().await.state, CoreState::Running);

        let err = core.start(shutdown, b"other").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning(CoreKind::SingBox)));

        core.stop().await.unwrap();
        assert!(!core.is_running().await);
        core.stop().await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_enters_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let core = SingBoxCore::new()
            .with_binary_path(dir.path().join("no-such-binary"))
            .with_config_path(dir.path().join("singbox-config.json"));
        let (shutdown, _) = broadcast::channel(1);

        let err = core.start(shutdown, b"{}").await.unwrap_err();
        assert!(matches!(err, Error::Launch { kind: CoreKind::SingBox, .. }));

        let status = core.status().await;
        assert_eq!(status.state, CoreState::Error);
        assert!(!status.error_msg.is_empty());
    }

    #[tokio::test]
    async fn crash_surfaces_as_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_script(dir.path(), "exit 3");
        let (shutdown, _) = broadcast::channel(1);

        core.start(shutdown, b"{}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = core.status().await;
        assert_eq!(status.state, CoreState::Error);
        assert!(!status.error_msg.is_empty());
    }

    #[tokio::test]
    async fn stats_calls_fail_while_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_script(dir.path(), "sleep 30");

        let err = core.get_traffic().await.unwrap_err();
        assert!(matches!(err, Error::StatsNotConnected));
        let err = core.reset_traffic("in1").await.unwrap_err();
        assert!(err.is_stats_error());
    }

    #[tokio::test]
    async fn client_traffic_is_not_representable() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_script(dir.path(), "sleep 30");
        let err = core.get_client_traffic("a@b.c").await.unwrap_err();
        assert!(matches!(err, Error::Stats(_)));
    }

    #[tokio::test]
    async fn validate_uses_the_check_subcommand() {
        let dir = tempfile::tempdir().unwrap();
        // the fake engine rejects anything that is not `check`
        let core = core_with_script(
            dir.path(),
            r#"[ "$1" = "check" ] || exit 2
exit 0"#,
        );
        core.validate_config(b"{}").await.unwrap();

        let bad = SingBoxCore::new().with_binary_path(write_script(
            dir.path(),
            "fake-bad",
            "echo 'decode config: unexpected field' >&2; exit 1",
        ));
        match bad.validate_config(b"{}").await.unwrap_err() {
            Error::Validate(msg) => assert!(msg.contains("unexpected field")),
            other => panic!("expected validation error, got {}", other),
        }
    }
}
