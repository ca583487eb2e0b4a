use crate::error::LaunchError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Options controlling how the browser process is started and supervised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase", default)]
#[builder(setter(into, strip_option), default)]
pub struct LaunchOptions {
    /// Executable to run instead of the one resolved for the pinned revision
    pub executable_path: Option<PathBuf>,
    /// Extra arguments appended after every generated flag
    #[builder(setter(custom))]
    pub args: Vec<String>,
    /// Skip the default and automation flag sets
    pub ignore_default_args: bool,
    pub headless: bool,
    /// Open developer tools for each tab; implies a headful browser
    pub devtools: bool,
    /// Run as an application window; implies a headful browser
    pub app_mode: bool,
    /// Profile directory owned by the caller. Never removed by the launcher.
    pub user_data_dir: Option<PathBuf>,
    /// Replaces the inherited environment when present
    #[builder(setter(custom))]
    pub env: Option<HashMap<String, String>>,
    /// Forward the browser's stdout and stderr to this process
    pub dumpio: bool,
    #[serde(rename = "handleSIGINT")]
    pub handle_sigint: bool,
    #[serde(rename = "handleSIGTERM")]
    pub handle_sigterm: bool,
    #[serde(rename = "handleSIGHUP")]
    pub handle_sighup: bool,
    /// Delay applied by the connection to every protocol message (in milliseconds)
    #[serde(rename = "slowMo")]
    pub slow_mo_ms: u64,
    /// Handshake deadline (in milliseconds). 0 waits forever.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable_path: None,
            args: Vec::new(),
            ignore_default_args: false,
            headless: true,
            devtools: false,
            app_mode: false,
            user_data_dir: None,
            env: None,
            dumpio: false,
            handle_sigint: true,
            handle_sigterm: true,
            handle_sighup: true,
            slow_mo_ms: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl LaunchOptions {
    pub fn builder() -> LaunchOptionsBuilder {
        LaunchOptionsBuilder::default()
    }

    /// Parse options from their JSON representation
    pub fn from_json(json: &str) -> Result<Self, LaunchError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| LaunchError::Configuration(format!("invalid launch options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), LaunchError> {
        if let Some(path) = &self.executable_path {
            if path.as_os_str().is_empty() {
                return Err(LaunchError::Configuration(
                    "executablePath must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Headless unless devtools or app mode asked for a visible window
    pub fn effective_headless(&self) -> bool {
        self.headless && !self.devtools && !self.app_mode
    }

    pub fn slow_mo(&self) -> Duration {
        Duration::from_millis(self.slow_mo_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl LaunchOptionsBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(|| Some(HashMap::new()));
        map.get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self
            .env
            .get_or_insert_with(|| Some(HashMap::new()))
            .get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Options for attaching to a browser that is already running
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    #[serde(rename = "browserWSEndpoint")]
    pub browser_ws_endpoint: String,
    #[serde(rename = "slowMo", default)]
    pub slow_mo_ms: u64,
}

impl ConnectOptions {
    pub fn new(browser_ws_endpoint: impl Into<String>) -> Self {
        Self {
            browser_ws_endpoint: browser_ws_endpoint.into(),
            slow_mo_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<(), LaunchError> {
        if self.browser_ws_endpoint.trim().is_empty() {
            return Err(LaunchError::Configuration(
                "browserWSEndpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slow_mo(&self) -> Duration {
        Duration::from_millis(self.slow_mo_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LaunchOptions::default();
        assert!(options.headless);
        assert!(options.handle_sigint && options.handle_sigterm && options.handle_sighup);
        assert_eq!(options.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.slow_mo(), Duration::ZERO);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_keeps_defaults() {
        let options = LaunchOptions::builder()
            .devtools(true)
            .args(["--window-size=800,600"])
            .env("LANG", "C")
            .build()
            .unwrap();
        assert!(options.headless);
        assert!(!options.effective_headless());
        assert_eq!(options.args, vec!["--window-size=800,600"]);
        assert_eq!(options.env.unwrap().get("LANG").map(String::as_str), Some("C"));
        assert_eq!(options.timeout_ms, 30_000);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let options = LaunchOptions::builder().timeout_ms(0u64).build().unwrap();
        assert_eq!(options.timeout(), None);
    }

    #[test]
    fn test_from_json_recognized_names() {
        let options = LaunchOptions::from_json(
            r#"{
                "executablePath": "/opt/chrome/chrome",
                "args": ["--lang=en"],
                "headless": false,
                "userDataDir": "/tmp/profile",
                "handleSIGINT": false,
                "handleSIGHUP": false,
                "slowMo": 250,
                "timeout": 100,
                "dumpio": true
            }"#,
        )
        .unwrap();
        assert_eq!(options.executable_path, Some(PathBuf::from("/opt/chrome/chrome")));
        assert!(!options.headless);
        assert!(!options.handle_sigint);
        assert!(options.handle_sigterm);
        assert!(!options.handle_sighup);
        assert_eq!(options.slow_mo(), Duration::from_millis(250));
        assert_eq!(options.timeout_ms, 100);
        assert!(options.dumpio);
    }

    #[test]
    fn test_invalid_options() {
        assert!(matches!(
            LaunchOptions::from_json(r#"{"executablePath": ""}"#),
            Err(LaunchError::Configuration(_))
        ));
        assert!(matches!(
            LaunchOptions::from_json(r#"{"timeout": "soon"}"#),
            Err(LaunchError::Configuration(_))
        ));
        assert!(ConnectOptions::new(" ").validate().is_err());
    }

    #[test]
    fn test_connect_options_serialization() {
        let options: ConnectOptions = serde_json::from_str(
            r#"{"browserWSEndpoint": "ws://127.0.0.1:9222/devtools/browser/abc"}"#,
        )
        .unwrap();
        assert_eq!(options.slow_mo_ms, 0);
        assert!(options.validate().is_ok());
    }
}
