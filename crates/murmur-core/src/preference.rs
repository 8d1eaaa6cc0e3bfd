use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Namespaced key under which the preference is stored.
pub const PREFERENCE_KEY: &str = "murmur.monitoring";
/// File name of the preference inside the state directory.
pub const PREFERENCE_FILE: &str = "monitoring.json";

/// Whether the user asked for continuous background capture, together with
/// the microphone grant observed when they said so.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MonitoringPreference {
    key: String,
    enabled: bool,
    permission_granted: bool,
    updated_at: DateTime<Utc>,
}

impl MonitoringPreference {
    pub fn new(enabled: bool, permission_granted: bool) -> Self {
        Self {
            key: PREFERENCE_KEY.to_string(),
            enabled,
            permission_granted,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The permission grant at the time of the last toggle. Never used to
    /// decide a resume; the live permission is.
    pub fn permission_granted(&self) -> bool {
        self.permission_granted
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("failed to read monitoring preference at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write monitoring preference at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("monitoring preference at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected preference key `{0}`")]
    UnexpectedKey(String),
    #[error("failed to start the capture pipeline: {0}")]
    Launch(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Durable storage for the single process-wide [`MonitoringPreference`].
///
/// Both operations complete synchronously. `load` yields `None` when the
/// preference was never written.
#[cfg_attr(test, automock)]
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Option<MonitoringPreference>, LifecycleError>;
    fn save(&self, preference: &MonitoringPreference) -> Result<(), LifecycleError>;
}

/// Stores the preference as JSON at `<state_dir>/monitoring.json`.
///
/// Writes go to a temporary file in the same directory which then replaces
/// the old file, so readers see either the previous record or the new one.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(PREFERENCE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_err(&self, source: io::Error) -> LifecycleError {
        LifecycleError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Result<Option<MonitoringPreference>, LifecycleError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LifecycleError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let preference: MonitoringPreference =
            serde_json::from_str(&text).map_err(|source| LifecycleError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        if preference.key() != PREFERENCE_KEY {
            return Err(LifecycleError::UnexpectedKey(preference.key().to_string()));
        }
        Ok(Some(preference))
    }

    fn save(&self, preference: &MonitoringPreference) -> Result<(), LifecycleError> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| self.write_err(e))?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|e| self.write_err(e))?;
        let json = serde_json::to_vec_pretty(preference).map_err(|e| self.write_err(e.into()))?;
        file.write_all(&json).map_err(|e| self.write_err(e))?;
        file.as_file().sync_all().map_err(|e| self.write_err(e))?;
        file.persist(&self.path).map_err(|e| self.write_err(e.error))?;

        tracing::debug!("saved monitoring preference to {}", self.path.display());
        Ok(())
    }
}

/// In-process store, for tests and for platforms without a state directory.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    preference: Mutex<Option<MonitoringPreference>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preference(preference: MonitoringPreference) -> Self {
        Self {
            preference: Mutex::new(Some(preference)),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Option<MonitoringPreference>, LifecycleError> {
        let guard = self
            .preference
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, preference: &MonitoringPreference) -> Result<(), LifecycleError> {
        let mut guard = self
            .preference
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(preference.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_means_never_enabled() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FilePreferenceStore::new(dir.path());

        assert_eq!(store.load()?, None);
        Ok(())
    }

    #[test]
    fn saved_preference_is_read_back_with_its_key() -> anyhow::Result<()> {
        // --- Arrange ---
        let dir = tempdir()?;
        let store = FilePreferenceStore::new(&dir.path().join("nested").join("state"));
        let preference = MonitoringPreference::new(true, true);

        // --- Act ---
        store.save(&preference)?;
        let loaded = store.load()?;

        // --- Assert ---
        assert_eq!(loaded.as_ref(), Some(&preference));
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path())?)?;
        assert_eq!(raw["key"], "murmur.monitoring");
        assert_eq!(raw["enabled"], true);
        assert_eq!(raw["permission_granted"], true);
        Ok(())
    }

    #[test]
    fn overwriting_leaves_a_single_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FilePreferenceStore::new(dir.path());

        store.save(&MonitoringPreference::new(true, true))?;
        store.save(&MonitoringPreference::new(false, true))?;

        let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<Result<_, _>>()?;
        assert_eq!(entries.len(), 1, "temporary files must not be left behind");
        assert_eq!(store.load()?.map(|p| p.enabled()), Some(false));
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_default() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FilePreferenceStore::new(dir.path());
        fs::write(store.path(), "{\"enabled\": tr")?;

        assert!(matches!(store.load(), Err(LifecycleError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn foreign_key_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = FilePreferenceStore::new(dir.path());
        fs::write(
            store.path(),
            r#"{"key":"other.app","enabled":true,"permission_granted":true,"updated_at":"2026-01-01T00:00:00Z"}"#,
        )?;

        assert!(matches!(
            store.load(),
            Err(LifecycleError::UnexpectedKey(ref key)) if key == "other.app"
        ));
        Ok(())
    }

    #[test]
    fn memory_store_holds_the_last_save() -> anyhow::Result<()> {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.load()?, None);

        store.save(&MonitoringPreference::new(true, false))?;

        let loaded = store.load()?.unwrap();
        assert!(loaded.enabled());
        assert!(!loaded.permission_granted());
        Ok(())
    }
}
