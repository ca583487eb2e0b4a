use crate::error::LaunchError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const PROFILE_PREFIX: &str = "devtools_profile-";

/// A scratch profile directory allocated by the launcher.
///
/// Removal is guarded so that the forced-kill path and the exit path can
/// both call [`TempProfile::remove`] without duplicating work or reporting an
/// error for a directory the other path already removed.
#[derive(Debug)]
pub struct TempProfile {
    path: PathBuf,
    removed: Mutex<bool>,
}

impl TempProfile {
    /// Create a uniquely named directory under the system temp dir
    pub fn allocate() -> Result<Self, LaunchError> {
        Self::allocate_in(std::env::temp_dir())
    }

    pub fn allocate_in(parent: impl AsRef<Path>) -> Result<Self, LaunchError> {
        let dir = tempfile::Builder::new()
            .prefix(PROFILE_PREFIX)
            .tempdir_in(parent.as_ref())
            .map_err(|e| {
                LaunchError::Resource(format!(
                    "failed to create temporary profile in {}: {e}",
                    parent.as_ref().display()
                ))
            })?;
        let path = dir.keep();
        info!("Allocated temporary profile {}", path.display());
        Ok(Self {
            path,
            removed: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_removed(&self) -> bool {
        *self.removed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove the directory tree. A directory that is already gone counts as removed.
    pub fn remove(&self) -> Result<(), LaunchError> {
        let mut removed = self.removed.lock().unwrap_or_else(|e| e.into_inner());
        if *removed {
            return Ok(());
        }

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {
                info!("Removed temporary profile {}", self.path.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Temporary profile {} already gone", self.path.display());
            }
            Err(e) => {
                return Err(LaunchError::Resource(format!(
                    "failed to remove temporary profile {}: {e}",
                    self.path.display()
                )));
            }
        }
        *removed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_creates_prefixed_directory() {
        let parent = tempfile::tempdir().unwrap();
        let profile = TempProfile::allocate_in(parent.path()).unwrap();
        assert!(profile.path().is_dir());
        assert!(profile.path().starts_with(parent.path()));
        let name = profile.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(PROFILE_PREFIX));
        assert!(!profile.is_removed());
    }

    #[test]
    fn test_allocations_are_unique() {
        let parent = tempfile::tempdir().unwrap();
        let a = TempProfile::allocate_in(parent.path()).unwrap();
        let b = TempProfile::allocate_in(parent.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_allocate_in_missing_parent_fails() {
        let parent = tempfile::tempdir().unwrap();
        let missing = parent.path().join("does-not-exist");
        let result = TempProfile::allocate_in(&missing);
        assert!(matches!(result, Err(LaunchError::Resource(_))));
    }

    #[test]
    fn test_remove_twice_is_ok() {
        let parent = tempfile::tempdir().unwrap();
        let profile = TempProfile::allocate_in(parent.path()).unwrap();
        std::fs::write(profile.path().join("Local State"), "{}").unwrap();

        profile.remove().unwrap();
        assert!(!profile.path().exists());
        assert!(profile.is_removed());
        profile.remove().unwrap();
    }

    #[test]
    fn test_remove_after_external_removal_is_ok() {
        let parent = tempfile::tempdir().unwrap();
        let profile = TempProfile::allocate_in(parent.path()).unwrap();
        std::fs::remove_dir_all(profile.path()).unwrap();

        profile.remove().unwrap();
        assert!(profile.is_removed());
    }

    #[test]
    fn test_concurrent_removal_reports_no_error() {
        let parent = tempfile::tempdir().unwrap();
        let profile = std::sync::Arc::new(TempProfile::allocate_in(parent.path()).unwrap());
        std::fs::create_dir_all(profile.path().join("Default/Cache")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let profile = profile.clone();
                std::thread::spawn(move || profile.remove())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert!(!profile.path().exists());
    }
}
