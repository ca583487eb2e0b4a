//! Command-line composition for the browser process.

use crate::config::LaunchOptions;
use crate::error::LaunchError;
use crate::profile::TempProfile;
use std::path::Path;

pub const DEFAULT_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-extensions",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
];

pub const AUTOMATION_ARGS: &[&str] = &[
    "--no-first-run",
    "--safebrowsing-disable-auto-update",
    "--enable-automation",
    "--password-store=basic",
    "--use-mock-keychain",
];

pub const HEADLESS_ARGS: &[&str] = &[
    "--headless",
    "--disable-gpu",
    "--hide-scrollbars",
    "--mute-audio",
];

pub const DEVTOOLS_ARG: &str = "--auto-open-devtools-for-tabs";

const USER_DATA_DIR_FLAG: &str = "--user-data-dir";

/// Final argument list plus the profile directory allocated for it, if any
#[derive(Debug)]
pub struct ComposedArgs {
    pub args: Vec<String>,
    pub temp_profile: Option<TempProfile>,
}

/// True when neither `userDataDir` nor a `--user-data-dir` argument was supplied
pub fn needs_temp_profile(options: &LaunchOptions) -> bool {
    options.user_data_dir.is_none() && !has_user_data_dir_arg(options)
}

fn has_user_data_dir_arg(options: &LaunchOptions) -> bool {
    options
        .args
        .iter()
        .any(|arg| arg.starts_with(USER_DATA_DIR_FLAG))
}

/// Build the argument list for `options`.
///
/// `profile_dir` is used for `--user-data-dir` when the caller supplied none.
/// Same input, same output.
pub fn compose_args(options: &LaunchOptions, profile_dir: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if !options.ignore_default_args {
        args.extend(DEFAULT_ARGS.iter().map(|s| s.to_string()));
        if !options.app_mode && !options.devtools {
            args.extend(AUTOMATION_ARGS.iter().map(|s| s.to_string()));
        }
    }

    if !has_user_data_dir_arg(options) {
        let dir = options.user_data_dir.as_deref().or(profile_dir);
        if let Some(dir) = dir {
            args.push(format!("{USER_DATA_DIR_FLAG}={}", dir.display()));
        }
    }

    if options.devtools {
        args.push(DEVTOOLS_ARG.to_string());
    }

    if options.effective_headless() {
        args.extend(HEADLESS_ARGS.iter().map(|s| s.to_string()));
    }

    args.extend(options.args.iter().cloned());
    args
}

/// Compose the argument list, allocating a temporary profile when required
pub fn prepare_args(options: &LaunchOptions) -> Result<ComposedArgs, LaunchError> {
    let temp_profile = if needs_temp_profile(options) {
        Some(TempProfile::allocate()?)
    } else {
        None
    };
    let args = compose_args(options, temp_profile.as_ref().map(TempProfile::path));
    Ok(ComposedArgs { args, temp_profile })
}
