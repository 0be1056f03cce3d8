use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::camera::error::{CaptureError, Result};
use crate::settings::types::CaptureSettings;

/// Capture settings backed by a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    data: Mutex<CaptureSettings>,
}

impl SettingsStore {
    /// Create a store, loading from disk if the file exists.
    ///
    /// A file that cannot be parsed is reported and replaced by defaults.
    pub fn new(path: PathBuf) -> Self {
        let data = Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Using default capture settings: {e}");
            CaptureSettings::default()
        });
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Load settings from a JSON file, returning defaults on missing file.
    pub fn load(path: &Path) -> Result<CaptureSettings> {
        if !path.exists() {
            return Ok(CaptureSettings::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| CaptureError::Settings(format!("{}: {e}", path.display())))
    }

    /// Save current settings to disk atomically (write .tmp then rename).
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().clone();
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| CaptureError::Settings(e.to_string()))?;
        let io_err = |e: std::io::Error| CaptureError::Settings(e.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(io_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> CaptureSettings {
        self.data.lock().clone()
    }

    /// Apply an in-memory change. Call `save` to persist it.
    pub fn update(&self, f: impl FnOnce(&mut CaptureSettings)) {
        f(&mut self.data.lock());
    }
}
