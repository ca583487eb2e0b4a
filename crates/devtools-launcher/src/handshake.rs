//! Endpoint discovery on the browser's stderr.
//!
//! Four sources race to settle the handshake: a matching stderr line, the
//! stream closing, the process exiting (or failing to be waited on), and the
//! deadline. [`Handshake`] is the result cell: the first event that settles
//! it wins and every later event only adds to the diagnostics buffer.

use crate::stdio::StreamEvent;
use crate::supervisor::{ExitReport, ProcessState};
use devtools_launcher_core::LaunchError;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const ENDPOINT_PREFIX: &str = "DevTools listening on ";

/// After an exit, wait this long for stderr to close so the diagnostics are complete
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEvent {
    Line(String),
    StreamClosed,
    Exited,
    Errored(String),
    DeadlineElapsed,
}

#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Endpoint(String),
    Closed,
    Errored(String),
    TimedOut,
}

/// Extract the endpoint from a `DevTools listening on ws://...` line
pub fn parse_endpoint(line: &str) -> Option<&str> {
    line.strip_prefix(ENDPOINT_PREFIX)
        .filter(|endpoint| endpoint.starts_with("ws://"))
}

#[derive(Debug)]
pub struct Handshake {
    timeout_ms: u64,
    revision: String,
    diagnostics: String,
    resolution: Option<Resolution>,
}

impl Handshake {
    pub fn new(timeout_ms: u64, revision: impl Into<String>) -> Self {
        Self {
            timeout_ms,
            revision: revision.into(),
            diagnostics: String::new(),
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// Feed one event. Returns true only for the event that settled the handshake.
    pub fn feed(&mut self, event: HandshakeEvent) -> bool {
        if let HandshakeEvent::Line(line) = &event {
            self.diagnostics.push_str(line);
            self.diagnostics.push('\n');
        }
        if self.resolution.is_some() {
            return false;
        }

        let resolution = match event {
            HandshakeEvent::Line(line) => match parse_endpoint(&line) {
                Some(endpoint) => Resolution::Endpoint(endpoint.to_string()),
                None => return false,
            },
            HandshakeEvent::StreamClosed | HandshakeEvent::Exited => Resolution::Closed,
            HandshakeEvent::Errored(message) => Resolution::Errored(message),
            HandshakeEvent::DeadlineElapsed => Resolution::TimedOut,
        };
        self.resolution = Some(resolution);
        true
    }

    /// The settled outcome, or `None` while the race is still open
    pub fn outcome(&self) -> Option<Result<String, LaunchError>> {
        let outcome = match self.resolution.as_ref()? {
            Resolution::Endpoint(endpoint) => Ok(endpoint.clone()),
            Resolution::Closed => Err(LaunchError::Launch {
                message: None,
                diagnostics: self.diagnostics.clone(),
            }),
            Resolution::Errored(message) => Err(LaunchError::Launch {
                message: Some(message.clone()),
                diagnostics: self.diagnostics.clone(),
            }),
            Resolution::TimedOut => Err(LaunchError::Timeout {
                timeout_ms: self.timeout_ms,
                revision: self.revision.clone(),
            }),
        };
        Some(outcome)
    }
}

async fn wait_exited(state: &mut watch::Receiver<ProcessState>) -> ExitReport {
    match state
        .wait_for(|s| !matches!(s, ProcessState::Running))
        .await
    {
        Ok(s) => s.exit_report().cloned().unwrap_or_default(),
        Err(_) => ExitReport::failed("process monitor stopped"),
    }
}

fn next_line(event: Option<StreamEvent>) -> HandshakeEvent {
    match event {
        Some(StreamEvent::Line(line)) => HandshakeEvent::Line(line),
        Some(StreamEvent::Closed) | None => HandshakeEvent::StreamClosed,
    }
}

/// Race stderr lines, process exit and the deadline to a single outcome.
///
/// `timeout` of `None` waits without a deadline.
pub async fn wait_for_endpoint(
    mut lines: mpsc::UnboundedReceiver<StreamEvent>,
    mut state: watch::Receiver<ProcessState>,
    timeout: Option<Duration>,
    revision: &str,
) -> Result<String, LaunchError> {
    let timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
    let mut handshake = Handshake::new(timeout_ms, revision);

    let deadline = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut exited = false;
    loop {
        let event = tokio::select! {
            biased;
            line = lines.recv() => next_line(line),
            report = wait_exited(&mut state) => {
                exited = true;
                match report.error {
                    Some(error) => HandshakeEvent::Errored(error),
                    None => HandshakeEvent::Exited,
                }
            }
            _ = &mut deadline => HandshakeEvent::DeadlineElapsed,
        };
        if handshake.feed(event) {
            break;
        }
    }

    if exited {
        // Collect what the browser printed before dying; never changes the outcome
        let drain = async {
            while let HandshakeEvent::Line(line) = next_line(lines.recv().await) {
                handshake.feed(HandshakeEvent::Line(line));
            }
        };
        if tokio::time::timeout(EXIT_DRAIN_GRACE, drain).await.is_err() {
            debug!("Browser stderr still open after exit");
        }
    }

    // Resolved inside the loop above
    let outcome = handshake
        .outcome()
        .unwrap_or_else(|| Err(LaunchError::Other(anyhow::anyhow!("handshake unresolved"))));
    match &outcome {
        Ok(endpoint) => info!("Browser endpoint discovered: {}", endpoint),
        Err(e) => warn!("Browser handshake failed: {}", e),
    }
    outcome
}
