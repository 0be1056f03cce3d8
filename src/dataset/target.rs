use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::camera::error::{CaptureError, Result};
use crate::settings::types::DEFAULT_TARGET;

/// Destination folder name for a recorded dataset. Never blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureTarget(String);

impl CaptureTarget {
    /// Blank or whitespace-only input becomes `DEFAULT_TARGET`.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self(DEFAULT_TARGET.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dataset folder for this target under `root`.
    ///
    /// Only plain relative names are accepted. Targets that name the root
    /// itself, climb out of it or are absolute fail with
    /// `StorageUnavailable`, since opening a dataset clears its folder.
    pub fn resolve(&self, root: &Path) -> Result<PathBuf> {
        let mut relative = PathBuf::new();
        for component in Path::new(&self.0).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(self.invalid());
                }
            }
        }
        if relative.as_os_str().is_empty() {
            return Err(self.invalid());
        }
        Ok(root.join(relative))
    }

    fn invalid(&self) -> CaptureError {
        CaptureError::StorageUnavailable(format!(
            "capture target {:?} must be a folder name inside the dataset root",
            self.0
        ))
    }
}

impl Default for CaptureTarget {
    fn default() -> Self {
        Self(DEFAULT_TARGET.to_string())
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CaptureTarget {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
