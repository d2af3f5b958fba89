//! Child-process supervision shared by the engine adapters
//!
//! Each start spawns exactly one exit waiter and two output drainers.
//! The waiter owns the child handle; stopping is signalled through a
//! kill channel and observed through a watch channel, so lifecycle
//! callers never need mutable access to the child.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};

/// How a supervised child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited cleanly, or was terminated on request
    Clean,
    /// Exited on its own with a failure
    Failed(String),
}

/// Handle to a supervised child process
///
/// Dropping the handle does not stop the process; call
/// [`terminate`](Self::terminate) for that.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: broadcast::Sender<()>,
    done_rx: watch::Receiver<bool>,
}

impl ProcessHandle {
    /// OS process id, if the child was still alive at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the exit waiter has observed process exit
    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Kill the child and wait for the exit waiter to finish
    ///
    /// Safe to call regardless of whether the process already exited.
    pub async fn terminate(&mut self) {
        let _ = self.kill_tx.send(());
        let wait = async {
            while !*self.done_rx.borrow_and_update() {
                if self.done_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            log::warn!("timed out waiting for supervised process to exit");
        }
    }
}

/// Spawn `command` under supervision
///
/// Pipes stdout/stderr into two drainer tasks logging at debug level and
/// spawns one waiter task that resolves the child's exit. The waiter calls
/// `on_exit` exactly once with the outcome; a kill request (either through
/// the returned handle or the caller's `shutdown` channel) yields
/// [`ExitOutcome::Clean`] since termination was asked for.
pub fn spawn_supervised<F, Fut>(
    mut command: Command,
    label: &'static str,
    shutdown: &broadcast::Sender<()>,
    on_exit: F,
) -> std::io::Result<ProcessHandle>
where
    F: FnOnce(ExitOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pid = child.id();

    if let Some(stdout) = child.stdout.take() {
        drain_pipe(stdout, label, "stdout");
    }
    if let Some(stderr) = child.stderr.take() {
        drain_pipe(stderr, label, "stderr");
    }

    let (kill_tx, mut kill_rx) = broadcast::channel(1);
    let (done_tx, done_rx) = watch::channel(false);
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        let outcome = tokio::select! {
            result = child.wait() => exit_outcome(result),
            _ = kill_rx.recv() => {
                kill_and_reap(&mut child, label).await;
                ExitOutcome::Clean
            }
            _ = shutdown_rx.recv() => {
                log::info!("shutdown requested, terminating {}", label);
                kill_and_reap(&mut child, label).await;
                ExitOutcome::Clean
            }
        };
        on_exit(outcome).await;
        let _ = done_tx.send(true);
    });

    Ok(ProcessHandle { pid, kill_tx, done_rx })
}

async fn kill_and_reap(child: &mut tokio::process::Child, label: &'static str) {
    if let Err(e) = child.start_kill() {
        log::debug!("{} already exited before kill: {}", label, e);
    }
    if let Err(e) = child.wait().await {
        log::warn!("failed to reap {} process: {}", label, e);
    }
}

fn exit_outcome(result: std::io::Result<std::process::ExitStatus>) -> ExitOutcome {
    match result {
        Ok(status) if status.success() => ExitOutcome::Clean,
        Ok(status) => ExitOutcome::Failed(format!("process {}", status)),
        Err(e) => ExitOutcome::Failed(format!("wait failed: {}", e)),
    }
}

fn drain_pipe<R>(pipe: R, label: &'static str, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        // Runs until the pipe closes; read failures just stop logging.
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[{} {}] {}", label, stream, line);
        }
    });
}

/// Probe an engine binary for its version string
///
/// Runs `<binary> <args>`, strips `prefix` from the first output line and
/// takes the next whitespace-delimited token. Version is advisory only, so
/// every failure collapses to "unknown".
pub async fn probe_version(binary: &Path, args: &[&str], prefix: &str) -> String {
    let output = match Command::new(binary).args(args).output().await {
        Ok(output) if output.status.success() => output,
        _ => return "unknown".to_string(),
    };
    parse_version_line(&String::from_utf8_lossy(&output.stdout), prefix)
}

fn parse_version_line(output: &str, prefix: &str) -> String {
    output
        .lines()
        .next()
        .and_then(|line| line.strip_prefix(prefix))
        .and_then(|rest| rest.split_whitespace().next())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
