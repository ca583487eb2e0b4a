//! Launch a Chromium-family browser and supervise it until it goes away.
//!
//! The browser is started with a composed argument list, then the launcher
//! waits for the `DevTools listening on ws://...` line on its stderr. The
//! resulting [`Browser`] can be closed gracefully through its connection or
//! killed outright; either way the temporary profile the launcher allocated
//! is removed exactly once. Termination signals delivered to this process
//! are fanned out to every supervised browser through a
//! [`SignalBroadcaster`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use devtools_launcher::*;
//! # async fn run(locator: Arc<dyn Locator>, connector: Arc<dyn ConnectionFactory>) -> Result<(), LaunchError> {
//! let launcher = Launcher::new(locator, connector, "526987");
//! let browser = launcher
//!     .launch(LaunchOptions::builder().timeout_ms(10_000u64).build().map_err(anyhow::Error::from)?)
//!     .await?;
//! println!("DevTools at {}", browser.ws_endpoint());
//! browser.close().await?;
//! SignalBroadcaster::global().notify_exit();
//! # Ok(())
//! # }
//! ```

mod connection;
mod factory;
pub mod handshake;
mod launcher;
pub mod signals;
mod stdio;
pub mod supervisor;

pub use connection::{BROWSER_CLOSE, Connection, ConnectionFactory};
pub use factory::{PlatformProcessManagerFactory, create_process_manager};
pub use launcher::{Browser, Launcher, Locator, Platform, RevisionInfo};
pub use signals::{ProcessSignal, SignalBroadcaster, SignalHandler, Subscription};
pub use stdio::StreamEvent;
pub use supervisor::{ExitReport, ProcessState, SpawnRequest, SupervisedProcess};

// Re-export core functionality
pub use devtools_launcher_core::*;
