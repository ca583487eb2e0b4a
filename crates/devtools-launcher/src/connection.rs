use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Protocol method asking the browser to shut itself down
pub const BROWSER_CLOSE: &str = "Browser.close";

/// Control connection to a running browser.
///
/// Only the pieces the launcher needs; the protocol itself lives elsewhere.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Issue a request without waiting for its response
    async fn send(&self, method: &str) -> Result<()>;
}

/// Opens connections to a discovered endpoint
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// `delay` slows every message down by that much
    async fn create(&self, endpoint: &str, delay: Duration) -> Result<Arc<dyn Connection>>;
}
