use thiserror::Error;

/// Error types for launching and supervising a browser process
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error(
        "Failed to launch the browser process!{}\n{diagnostics}\n\nTROUBLESHOOTING: https://github.com/GoogleChrome/puppeteer/blob/master/docs/troubleshooting.md\n",
        .message.as_deref().map(|m| format!(" {m}")).unwrap_or_default()
    )]
    Launch {
        message: Option<String>,
        diagnostics: String,
    },

    #[error(
        "Timed out after {timeout_ms} ms while trying to connect to the browser! The only revision guaranteed to work is r{revision}"
    )]
    Timeout { timeout_ms: u64, revision: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LaunchError {
    /// Check if launching again could succeed without changing the options
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LaunchError::Launch { .. } | LaunchError::Timeout { .. } | LaunchError::Connection(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(self, LaunchError::Configuration(_))
    }

    /// Accumulated stderr output, when the browser exited during the handshake
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            LaunchError::Launch { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }
}
