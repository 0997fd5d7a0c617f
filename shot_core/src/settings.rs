//! `SettingsStore` implementations: in-memory and a TOML file.

use std::error::Error;
use std::path::{Path, PathBuf};

use shot_config::PersistedSettings;
use shot_traits::SettingsStore;

use crate::atomic::write_atomic;
use crate::error::ShotError;

type BoxError = Box<dyn Error + Send + Sync>;

/// Volatile store; starts empty unless seeded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemorySettings {
    pub offset_g: Option<f32>,
    pub goal_g: Option<u32>,
}

impl SettingsStore for MemorySettings {
    fn load_offset_g(&self) -> Result<Option<f32>, BoxError> {
        Ok(self.offset_g)
    }
    fn save_offset_g(&mut self, offset_g: f32) -> Result<(), BoxError> {
        self.offset_g = Some(offset_g);
        Ok(())
    }
    fn load_goal_g(&self) -> Result<Option<u32>, BoxError> {
        Ok(self.goal_g)
    }
    fn save_goal_g(&mut self, goal_g: u32) -> Result<(), BoxError> {
        self.goal_g = Some(goal_g);
        Ok(())
    }
}

/// Settings document on disk, rewritten atomically on every save.
///
/// Fields this store does not manage (display brightness) are carried
/// through unchanged.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    doc: PersistedSettings,
}

impl FileSettingsStore {
    /// Read `path`; a missing file starts from the defaults.
    pub fn open(path: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let path = path.into();
        let doc = PersistedSettings::load(&path)
            .map_err(|e| eyre::Report::new(ShotError::Settings(format!("{e:#}"))))?;
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &PersistedSettings {
        &self.doc
    }

    /// Drop the persisted offset.
    pub fn clear_offset(&mut self) -> Result<(), BoxError> {
        self.doc.offset_g = None;
        self.flush()
    }

    fn flush(&self) -> Result<(), BoxError> {
        let text = self
            .doc
            .to_toml()
            .map_err(|e| ShotError::Settings(format!("{e:#}")))?;
        write_atomic(&self.path, text.as_bytes()).map_err(|e| {
            ShotError::Settings(format!("write {}: {e}", self.path.display()))
        })?;
        tracing::debug!(target: "shot::system", path = %self.path.display(), "settings saved");
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn load_offset_g(&self) -> Result<Option<f32>, BoxError> {
        Ok(self.doc.offset_g)
    }

    fn save_offset_g(&mut self, offset_g: f32) -> Result<(), BoxError> {
        if !offset_g.is_finite() {
            return Err(Box::new(ShotError::Settings(
                "refusing to persist a non-finite offset".into(),
            )));
        }
        self.doc.offset_g = Some(offset_g);
        self.flush()
    }

    fn load_goal_g(&self) -> Result<Option<u32>, BoxError> {
        Ok(self.doc.goal_g)
    }

    fn save_goal_g(&mut self, goal_g: u32) -> Result<(), BoxError> {
        self.doc.goal_g = Some(goal_g);
        self.flush()
    }
}
