use crate::connection::{BROWSER_CLOSE, Connection, ConnectionFactory};
use crate::factory::create_process_manager;
use crate::signals::SignalBroadcaster;
use crate::supervisor::{SpawnRequest, SupervisedProcess};
use devtools_launcher_core::{
    ComposedArgs, ConnectOptions, LaunchError, LaunchOptions, ProcessManager, compose_args,
    prepare_args,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Platforms browser builds are published for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    Mac,
    Win32,
    Win64,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(all(windows, target_pointer_width = "64")) {
            Platform::Win64
        } else if cfg!(windows) {
            Platform::Win32
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Win32 => "win32",
            Platform::Win64 => "win64",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a revision lives on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionInfo {
    pub revision: String,
    pub executable_path: PathBuf,
    pub downloaded: bool,
}

/// Resolves browser executables for a platform and revision
pub trait Locator: Send + Sync {
    fn current_platform(&self) -> Platform {
        Platform::current()
    }

    fn revision_info(&self, platform: Platform, revision: &str) -> RevisionInfo;
}

/// Starts browsers or attaches to running ones
pub struct Launcher {
    locator: Arc<dyn Locator>,
    connector: Arc<dyn ConnectionFactory>,
    revision: String,
    broadcaster: Arc<SignalBroadcaster>,
    process_manager: Arc<dyn ProcessManager>,
}

impl Launcher {
    /// A launcher pinned to `revision`, wired to the process-wide signal broadcaster
    pub fn new(
        locator: Arc<dyn Locator>,
        connector: Arc<dyn ConnectionFactory>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            locator,
            connector,
            revision: revision.into(),
            broadcaster: SignalBroadcaster::global(),
            process_manager: create_process_manager(),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<SignalBroadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_process_manager(mut self, process_manager: Arc<dyn ProcessManager>) -> Self {
        self.process_manager = process_manager;
        self
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    fn revision_info(&self) -> RevisionInfo {
        let platform = self.locator.current_platform();
        self.locator.revision_info(platform, &self.revision)
    }

    /// Executable of the pinned revision, whether or not it is downloaded
    pub fn executable_path(&self) -> PathBuf {
        self.revision_info().executable_path
    }

    /// Arguments a launch with `options` would use, minus any temporary profile
    pub fn default_args(&self, options: &LaunchOptions) -> Vec<String> {
        compose_args(options, None)
    }

    fn resolve_executable(&self, options: &LaunchOptions) -> Result<PathBuf, LaunchError> {
        if let Some(path) = &options.executable_path {
            return Ok(path.clone());
        }
        let info = self.revision_info();
        if !info.downloaded {
            return Err(LaunchError::Configuration(format!(
                "Browser revision r{} is not downloaded (expected at {})",
                info.revision,
                info.executable_path.display()
            )));
        }
        Ok(info.executable_path)
    }

    /// Spawn a browser and wait until it announces its DevTools endpoint.
    ///
    /// Any failure after the process started force-kills it before the
    /// error is returned.
    pub async fn launch(&self, options: LaunchOptions) -> Result<Browser, LaunchError> {
        options.validate()?;
        let executable = self.resolve_executable(&options)?;
        let ComposedArgs { args, temp_profile } = prepare_args(&options)?;
        if let Some(profile) = &temp_profile {
            debug!("Allocated temporary profile at {}", profile.path().display());
        }

        let process = SupervisedProcess::spawn(
            SpawnRequest {
                executable,
                args,
                env: options.env.clone(),
                dumpio: options.dumpio,
                temp_profile,
            },
            self.process_manager.clone(),
        )?;
        process.attach_signals(&self.broadcaster, &options);

        let connected = async {
            let endpoint = process
                .wait_for_endpoint(options.timeout(), &self.revision)
                .await?;
            let connection = self
                .connector
                .create(&endpoint, options.slow_mo())
                .await
                .map_err(|e| LaunchError::Connection(format!("{e:#}")))?;
            Ok::<_, LaunchError>((endpoint, connection))
        }
        .await;

        match connected {
            Ok((ws_endpoint, connection)) => {
                process.set_connection(connection.clone());
                info!(
                    pid = ?process.pid().map(|p| p.0),
                    "Browser ready at {}", ws_endpoint
                );
                Ok(Browser {
                    ws_endpoint,
                    connection,
                    process: Some(process),
                })
            }
            Err(e) => {
                warn!("Browser launch failed: {}", e);
                process.kill();
                Err(e)
            }
        }
    }

    /// Attach to a browser somebody else started
    pub async fn connect(&self, options: ConnectOptions) -> Result<Browser, LaunchError> {
        options.validate()?;
        let connection = self
            .connector
            .create(&options.browser_ws_endpoint, options.slow_mo())
            .await
            .map_err(|e| LaunchError::Connection(format!("{e:#}")))?;
        info!("Connected to browser at {}", options.browser_ws_endpoint);

        Ok(Browser {
            ws_endpoint: options.browser_ws_endpoint,
            connection,
            process: None,
        })
    }
}

/// A running browser and the connection to it.
///
/// Dropping a launched browser without closing it kills the process.
pub struct Browser {
    ws_endpoint: String,
    connection: Arc<dyn Connection>,
    process: Option<Arc<SupervisedProcess>>,
}

impl Browser {
    pub fn ws_endpoint(&self) -> &str {
        &self.ws_endpoint
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// The supervised process, for browsers this crate launched
    pub fn process(&self) -> Option<&Arc<SupervisedProcess>> {
        self.process.as_ref()
    }

    pub async fn close(&self) -> Result<(), LaunchError> {
        match &self.process {
            Some(process) => process.close().await,
            None => self
                .connection
                .send(BROWSER_CLOSE)
                .await
                .map_err(|e| LaunchError::Connection(format!("{e:#}"))),
        }
    }
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("ws_endpoint", &self.ws_endpoint)
            .field("pid", &self.process.as_ref().and_then(|p| p.pid()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MissingRevision;

    impl Locator for MissingRevision {
        fn current_platform(&self) -> Platform {
            Platform::Linux
        }

        fn revision_info(&self, platform: Platform, revision: &str) -> RevisionInfo {
            RevisionInfo {
                revision: revision.to_string(),
                executable_path: PathBuf::from(format!("/opt/browsers/{platform}-{revision}/chrome")),
                downloaded: false,
            }
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        created: Mutex<Vec<(String, Duration)>>,
    }

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn send(&self, _method: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ConnectionFactory for RecordingConnector {
        async fn create(&self, endpoint: &str, delay: Duration) -> anyhow::Result<Arc<dyn Connection>> {
            self.created
                .lock()
                .unwrap()
                .push((endpoint.to_string(), delay));
            Ok(Arc::new(NullConnection))
        }
    }

    fn launcher(connector: Arc<RecordingConnector>) -> Launcher {
        Launcher::new(Arc::new(MissingRevision), connector, "526987")
            .with_broadcaster(SignalBroadcaster::detached(|_| {}))
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(Platform::Linux.to_string(), "linux");
        assert_eq!(Platform::Win64.as_str(), "win64");
    }

    #[test]
    fn test_executable_path_comes_from_locator() {
        let launcher = launcher(Arc::default());
        assert_eq!(
            launcher.executable_path(),
            PathBuf::from("/opt/browsers/linux-526987/chrome")
        );
    }

    #[test]
    fn test_default_args_allocate_nothing() {
        let launcher = launcher(Arc::default());
        let args = launcher.default_args(&LaunchOptions::default());
        assert!(!args.iter().any(|a| a.starts_with("--user-data-dir")));

        let options = LaunchOptions {
            user_data_dir: Some(PathBuf::from("/srv/profile")),
            ..Default::default()
        };
        let args = launcher.default_args(&options);
        assert!(args.contains(&"--user-data-dir=/srv/profile".to_string()));
    }

    #[tokio::test]
    async fn test_launch_without_download_is_configuration_error() {
        let launcher = launcher(Arc::default());
        let error = launcher.launch(LaunchOptions::default()).await.unwrap_err();

        assert!(matches!(error, LaunchError::Configuration(_)));
        assert!(error.is_permanent());
        assert!(error.to_string().contains("r526987"));
    }

    #[tokio::test]
    async fn test_connect_uses_slow_mo() {
        let connector = Arc::new(RecordingConnector::default());
        let launcher = launcher(connector.clone());
        let options = ConnectOptions {
            browser_ws_endpoint: "ws://127.0.0.1:9222/devtools/browser/abc".to_string(),
            slow_mo_ms: 250,
        };

        let browser = launcher.connect(options).await.unwrap();

        assert_eq!(browser.ws_endpoint(), "ws://127.0.0.1:9222/devtools/browser/abc");
        assert!(browser.process().is_none());
        assert_eq!(
            *connector.created.lock().unwrap(),
            vec![(
                "ws://127.0.0.1:9222/devtools/browser/abc".to_string(),
                Duration::from_millis(250)
            )]
        );
        browser.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_endpoint() {
        let launcher = launcher(Arc::default());
        let error = launcher.connect(ConnectOptions::new(" ")).await.unwrap_err();
        assert!(matches!(error, LaunchError::Configuration(_)));
    }
}
