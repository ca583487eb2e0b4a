//! DevTools launcher core - Platform-independent pieces of the launcher
//!
//! This crate provides the launch configuration, the error taxonomy, argument
//! composition, temporary profile cleanup and the process traits that
//! platform-specific crates implement.

pub mod args;
mod config;
mod error;
mod process;
mod profile;

pub use args::{ComposedArgs, compose_args, needs_temp_profile, prepare_args};
pub use config::*;
pub use error::*;
pub use process::*;
pub use profile::TempProfile;
