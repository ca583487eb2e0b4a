//! Lifecycle of one spawned browser process.
//!
//! A [`SupervisedProcess`] owns the child's pid, its exit state, the
//! temporary profile it may own and the signal subscriptions registered on
//! its behalf. Two termination tiers exist:
//!
//! - [`SupervisedProcess::kill`]: synchronous, idempotent. Releases the
//!   subscriptions, kills the process tree at most once and removes the
//!   temporary profile on a best-effort basis.
//! - [`SupervisedProcess::close`]: releases the subscriptions, asks the
//!   browser to shut down through its connection (or escalates to `kill`
//!   when the profile is temporary) and returns once the exit has been
//!   observed and cleanup has finished.

use crate::connection::{BROWSER_CLOSE, Connection};
use crate::handshake;
use crate::signals::{ProcessSignal, SignalBroadcaster, Subscription};
use crate::stdio::{self, StreamEvent};
use devtools_launcher_core::{LaunchError, LaunchOptions, ProcessId, ProcessManager, TempProfile};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// How the browser process ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when the exit could not be observed normally
    pub error: Option<String>,
}

impl ExitReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            error: None,
        }
    }
}

/// Lifecycle state; only ever moves forward
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessState {
    Running,
    /// Exit observed, temporary profile cleanup pending
    Exited(ExitReport),
    /// Exit observed and cleanup finished
    Cleaned(ExitReport),
}

impl ProcessState {
    pub fn exit_report(&self) -> Option<&ExitReport> {
        match self {
            ProcessState::Running => None,
            ProcessState::Exited(report) | ProcessState::Cleaned(report) => Some(report),
        }
    }

    pub fn has_exited(&self) -> bool {
        !matches!(self, ProcessState::Running)
    }
}

/// Everything needed to start the browser process
#[derive(Debug)]
pub struct SpawnRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Replaces the inherited environment when present
    pub env: Option<HashMap<String, String>>,
    pub dumpio: bool,
    pub temp_profile: Option<TempProfile>,
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Forced,
    Graceful,
}

pub struct SupervisedProcess {
    pid: Option<ProcessId>,
    executable: PathBuf,
    state: watch::Receiver<ProcessState>,
    stderr: Mutex<Option<mpsc::UnboundedReceiver<StreamEvent>>>,
    endpoint: OnceLock<String>,
    kill_sent: AtomicBool,
    temp_profile: Option<Arc<TempProfile>>,
    /// `None` once released; nothing can be attached afterwards
    subscriptions: Mutex<Option<Vec<Subscription>>>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    process_manager: Arc<dyn ProcessManager>,
    runtime: tokio::runtime::Handle,
}

impl SupervisedProcess {
    /// Start the browser. Must be called from within a tokio runtime.
    ///
    /// A temporary profile in the request is removed when spawning fails.
    pub fn spawn(
        request: SpawnRequest,
        process_manager: Arc<dyn ProcessManager>,
    ) -> Result<Arc<Self>, LaunchError> {
        let SpawnRequest {
            executable,
            args,
            env,
            dumpio,
            temp_profile,
        } = request;
        let temp_profile = temp_profile.map(Arc::new);

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(if dumpio { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped());
        if let Some(env) = &env {
            cmd.env_clear().envs(env);
        }
        process_manager.prepare_command(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", executable.display(), e);
                if let Some(profile) = &temp_profile {
                    if let Err(e) = profile.remove() {
                        warn!("{}", e);
                    }
                }
                return Err(LaunchError::Launch {
                    message: Some(e.to_string()),
                    diagnostics: String::new(),
                });
            }
        };

        let pid = child.id().map(ProcessId::from);
        info!(
            pid = ?pid.map(|p| p.0),
            "Spawned browser process: {} with args: {:?}",
            executable.display(),
            args
        );

        let stderr = child
            .stderr
            .take()
            .map(|stderr| stdio::pump_stderr(stderr, dumpio));
        if let Some(stdout) = child.stdout.take() {
            stdio::forward_stdout(stdout);
        }

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        tokio::spawn(reap(child, state_tx, temp_profile.clone()));

        Ok(Arc::new(Self {
            pid,
            executable,
            state: state_rx,
            stderr: Mutex::new(stderr),
            endpoint: OnceLock::new(),
            kill_sent: AtomicBool::new(false),
            temp_profile,
            subscriptions: Mutex::new(Some(Vec::new())),
            connection: Mutex::new(None),
            process_manager,
            runtime: tokio::runtime::Handle::current(),
        }))
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.state.borrow().has_exited()
    }

    /// Path of the profile this process owns, if the launcher allocated one
    pub fn temp_profile_path(&self) -> Option<&Path> {
        self.temp_profile.as_deref().map(TempProfile::path)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.get().map(String::as_str)
    }

    pub fn set_connection(&self, connection: Arc<dyn Connection>) {
        *lock(&self.connection) = Some(connection);
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        lock(&self.connection).clone()
    }

    /// Run the handshake. Can only be called once per process.
    pub async fn wait_for_endpoint(
        &self,
        timeout: Option<Duration>,
        revision: &str,
    ) -> Result<String, LaunchError> {
        let lines = lock(&self.stderr).take().ok_or_else(|| {
            LaunchError::Other(anyhow::anyhow!(
                "handshake already performed for this process"
            ))
        })?;
        let endpoint =
            handshake::wait_for_endpoint(lines, self.state.clone(), timeout, revision).await?;
        Ok(self.endpoint.get_or_init(|| endpoint).clone())
    }

    /// Subscribe this process's termination tiers to the broadcaster.
    ///
    /// The exit notification and SIGINT force-kill; SIGTERM and SIGHUP close
    /// gracefully. Each signal can be opted out of through `options`.
    pub fn attach_signals(self: &Arc<Self>, broadcaster: &Arc<SignalBroadcaster>, options: &LaunchOptions) {
        let mut wiring = vec![(ProcessSignal::Exiting, Tier::Forced)];
        if options.handle_sigint {
            wiring.push((ProcessSignal::Interrupt, Tier::Forced));
        }
        if options.handle_sigterm {
            wiring.push((ProcessSignal::Terminate, Tier::Graceful));
        }
        if options.handle_sighup {
            wiring.push((ProcessSignal::Hangup, Tier::Graceful));
        }

        let subscriptions: Vec<Subscription> = wiring
            .into_iter()
            .map(|(signal, tier)| {
                let process = Arc::downgrade(self);
                broadcaster.subscribe(signal, move |signal| {
                    let Some(process) = process.upgrade() else {
                        return;
                    };
                    info!(signal = signal.name(), tier = ?tier, "Terminating browser on signal");
                    match tier {
                        Tier::Forced => process.kill(),
                        Tier::Graceful => process.request_close(),
                    }
                })
            })
            .collect();

        // Already torn down: dropping the new subscriptions releases them
        if let Some(held) = lock(&self.subscriptions).as_mut() {
            held.extend(subscriptions);
        }
    }

    fn release_subscriptions(&self) {
        let released = lock(&self.subscriptions).take();
        if let Some(subscriptions) = released {
            for subscription in &subscriptions {
                subscription.release();
            }
            debug!("Released {} signal subscriptions", subscriptions.len());
        }
    }

    /// Forced kill. Safe to call any number of times, from any trigger.
    pub fn kill(&self) {
        self.release_subscriptions();

        if let Some(pid) = self.pid {
            if self.has_exited() {
                debug!(pid = %pid, "Browser already exited; no kill needed");
            } else if self.kill_sent.swap(true, Ordering::AcqRel) {
                debug!(pid = %pid, "Kill already sent");
            } else {
                let result = self.process_manager.force_kill_tree(pid);
                if result.is_terminated() {
                    info!(pid = %pid, "Force killed browser process tree");
                } else {
                    warn!(pid = %pid, result = ?result, "Failed to force kill browser process tree");
                }
            }
        }

        if let Some(profile) = &self.temp_profile {
            // Best effort: the exit path retries once the process is gone
            if let Err(e) = profile.remove() {
                warn!("{}", e);
            }
        }
    }

    /// Graceful close; returns after the exit was observed and cleanup finished
    pub async fn close(&self) -> Result<(), LaunchError> {
        self.release_subscriptions();

        if self.temp_profile.is_some() {
            self.kill();
        } else if let Some(connection) = self.connection() {
            if !self.has_exited() {
                connection
                    .send(BROWSER_CLOSE)
                    .await
                    .map_err(|e| LaunchError::Connection(format!("{e:#}")))?;
            }
        }

        self.wait_for_close().await;
        Ok(())
    }

    /// Signal-triggered graceful close; nothing here can be awaited
    fn request_close(&self) {
        self.release_subscriptions();

        if self.temp_profile.is_some() {
            self.kill();
            return;
        }
        let Some(connection) = self.connection() else {
            debug!("No connection to request a graceful close through");
            return;
        };
        self.runtime.spawn(async move {
            if let Err(e) = connection.send(BROWSER_CLOSE).await {
                warn!("Failed to request browser close: {:#}", e);
            }
        });
    }

    /// Wait until the exit was observed and the temporary profile removed
    pub async fn wait_for_close(&self) {
        let mut state = self.state.clone();
        if state
            .wait_for(|s| matches!(s, ProcessState::Cleaned(_)))
            .await
            .is_err()
        {
            warn!("Process monitor stopped before cleanup finished");
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        if !matches!(*self.state.borrow(), ProcessState::Cleaned(_)) {
            debug!("Supervised process dropped before close; forcing kill");
        }
        self.kill();
    }
}

async fn reap(
    mut child: Child,
    state: watch::Sender<ProcessState>,
    temp_profile: Option<Arc<TempProfile>>,
) {
    let pid = child.id();
    let report = match child.wait().await {
        Ok(status) => ExitReport::from_status(status),
        Err(e) => ExitReport::failed(e.to_string()),
    };
    info!(pid = ?pid, code = ?report.code, signal = ?report.signal, "Browser process exited");
    state.send_replace(ProcessState::Exited(report.clone()));

    if let Some(profile) = temp_profile {
        match tokio::task::spawn_blocking(move || profile.remove()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{}", e),
            Err(e) => error!("Temporary profile cleanup task failed: {}", e),
        }
    }
    state.send_replace(ProcessState::Cleaned(report));
}
