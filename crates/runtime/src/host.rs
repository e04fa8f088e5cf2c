//! Tool host process lifecycle.
//!
//! The tool host is an external process (typically `docker run` of a
//! browser-automation MCP server) that serves its tools on an HTTP endpoint.
//! It gives no readiness signal of its own, so readiness is either a fixed
//! delay or an HTTP probe of the endpoint.
//!
//! A [`ToolHostProcess`] never outlives its owner: [`ToolHostProcess::stop`]
//! terminates it explicitly, dropping it starts the same SIGTERM-then-kill
//! teardown in the background, and on Linux the kernel sends it SIGTERM if
//! the agent process itself dies.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

use crate::Error;

/// How long `stop` waits after SIGTERM before killing the host.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How to start the tool host and where to reach it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Endpoint the tool session connects to once the host is up.
    pub url: String,
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            url: url.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Check the command and url before anything is spawned.
    pub fn validate(&self) -> Result<(), Error> {
        if self.command.trim().is_empty() {
            return Err(Error::Config("tool host command is empty".into()));
        }

        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid tool host url `{}`: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "tool host url must be http(s), got `{}`",
                self.url
            )));
        }

        Ok(())
    }

    /// The command line, for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// When to consider a freshly started host ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep, then assume the host is up. The first request may still be
    /// refused if the delay was too short.
    Delay(Duration),
    /// Poll the endpoint until it returns any HTTP response.
    Probe { interval: Duration, timeout: Duration },
}

impl Default for Readiness {
    fn default() -> Self {
        Self::Probe {
            interval: Duration::from_millis(250),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Readiness {
    /// Pause before the single connection retry.
    pub fn retry_pause(&self) -> Duration {
        match *self {
            Self::Delay(delay) => delay,
            Self::Probe { interval, .. } => interval,
        }
    }
}

/// Lifecycle state of a tool host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Starting,
    Ready,
    Terminated,
    Failed,
}

/// Errors launching or starting the tool host.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("tool host executable not found: {command}")]
    NotFound { command: String },

    #[error("failed to launch tool host `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool host exited during startup ({status})")]
    Exited { status: String },

    #[error("tool host at {url} not reachable after {waited:?}")]
    NotReady { url: String, waited: Duration },
}

/// A running (or finished) tool host process.
pub struct ToolHostProcess {
    child: Option<Child>,
    state: HostState,
    url: String,
    grace: Duration,
}

impl ToolHostProcess {
    /// Spawn the host described by `spec`.
    pub fn start(spec: &LaunchSpec) -> Result<Self, ProcessError> {
        info!(command = %spec.display_command(), "starting tool host");

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Linux: have the kernel SIGTERM the host if we die without running
        // Drop (SIGKILL, OOM kill).
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| match source.kind() {
            ErrorKind::NotFound => ProcessError::NotFound {
                command: spec.command.clone(),
            },
            _ => ProcessError::Spawn {
                command: spec.command.clone(),
                source,
            },
        })?;
        debug!(pid = ?child.id(), "tool host spawned");

        Ok(Self {
            child: Some(child),
            state: HostState::Starting,
            url: spec.url.clone(),
            grace: DEFAULT_STOP_GRACE,
        })
    }

    /// Override how long `stop` waits for a graceful exit.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// OS process id while the process is owned and not yet reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Wait until the host is ready according to `readiness`.
    pub async fn await_ready(&mut self, readiness: &Readiness) -> Result<(), ProcessError> {
        let outcome = match *readiness {
            Readiness::Delay(delay) => {
                debug!(?delay, "waiting for tool host");
                sleep(delay).await;
                self.check_alive()
            }
            Readiness::Probe { interval, timeout } => self.probe(interval, timeout).await,
        };

        match outcome {
            Ok(()) => {
                self.state = HostState::Ready;
                info!(url = %self.url, "tool host ready");
                Ok(())
            }
            Err(e) => {
                self.state = HostState::Failed;
                Err(e)
            }
        }
    }

    /// Fail if the process has already exited.
    pub fn check_alive(&mut self) -> Result<(), ProcessError> {
        let Some(child) = self.child.as_mut() else {
            return Err(ProcessError::Exited {
                status: "already stopped".into(),
            });
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Err(ProcessError::Exited {
                    status: status.to_string(),
                })
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("could not poll tool host status: {e}");
                Ok(())
            }
        }
    }

    async fn probe(&mut self, interval: Duration, timeout: Duration) -> Result<(), ProcessError> {
        let http = reqwest::Client::new();
        let started = Instant::now();

        loop {
            self.check_alive()?;

            match http
                .get(&self.url)
                .timeout(PROBE_REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => {
                    debug!(status = %response.status(), "tool host answered probe");
                    return Ok(());
                }
                Err(e) => trace!("readiness probe failed: {e}"),
            }

            if started.elapsed() >= timeout {
                return Err(ProcessError::NotReady {
                    url: self.url.clone(),
                    waited: started.elapsed(),
                });
            }
            sleep(interval).await;
        }
    }

    /// Terminate the host. Safe to call repeatedly and after the process
    /// already exited; never fails.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            self.state = HostState::Terminated;
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => debug!(%status, "tool host already exited"),
            _ => {
                info!("stopping tool host");
                terminate(&mut child, self.grace).await;
            }
        }
        self.state = HostState::Terminated;
    }
}

impl Drop for ToolHostProcess {
    /// Same teardown as [`stop`](Self::stop), without awaiting it: SIGTERM
    /// right away, SIGKILL from a reaper task once the grace period is over.
    /// Outside a runtime the host is killed right after the SIGTERM.
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        debug!("tool host dropped while running, terminating");
        let signalled = send_sigterm(&child);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if signalled => {
                let grace = self.grace;
                runtime.spawn(async move {
                    if !exited_within(&mut child, grace).await {
                        kill(&mut child).await;
                    }
                });
            }
            _ => {
                let _ = child.start_kill();
            }
        }
    }
}

/// SIGTERM first so wrappers such as `docker run` stop their container.
#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    match child.id() {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

async fn terminate(child: &mut Child, grace: Duration) {
    if send_sigterm(child) && exited_within(child, grace).await {
        return;
    }
    kill(child).await;
}

/// Wait up to `grace` for the host to exit after SIGTERM.
async fn exited_within(child: &mut Child, grace: Duration) -> bool {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(%status, "tool host exited");
            true
        }
        Ok(Err(e)) => {
            warn!("failed to wait for tool host: {e}");
            false
        }
        Err(_) => {
            warn!(?grace, "tool host ignored SIGTERM, killing");
            false
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("failed to kill tool host: {e}");
    }
}
