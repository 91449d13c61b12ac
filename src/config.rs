//! Console settings
//!
//! A small YAML-backed settings file for the values that cannot be derived
//! from the cluster: the TrueNAS API key used for deep-link enrichment and
//! an optional server-address override. Reads are reactive via a watch
//! channel; writes persist before publishing.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info};

/// User-tunable settings. Everything is optional; defaults mean "not
/// configured".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// TrueNAS API key, stored verbatim and never logged.
    pub truenas_api_key: Option<String>,
    /// Overrides the TrueNAS server address discovered from the driver
    /// configuration.
    pub truenas_server_override: Option<String>,
}

impl Settings {
    /// Load from a YAML file; a missing file is the default settings, not an
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_yaml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Owns the settings file and publishes the current value.
pub struct SettingsStore {
    path: PathBuf,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Open the store, reading the file if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Settings::load(&path)?;
        let (tx, _) = watch::channel(settings);
        Ok(Self { path, tx })
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Replace the settings, persisting to disk before publishing. On a
    /// write failure the in-memory value is left unchanged.
    pub fn update(&self, settings: Settings) -> Result<Settings> {
        settings.save(&self.path)?;
        info!(path = %self.path.display(), "settings updated");
        self.tx.send_replace(settings.clone());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.yaml")).unwrap();
        assert_eq!(store.current(), Settings::default());
    }

    #[test]
    fn test_update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.yaml");

        let store = SettingsStore::open(&path).unwrap();
        store
            .update(Settings {
                truenas_api_key: Some("1-abcdef".into()),
                truenas_server_override: Some("truenas.local".into()),
            })
            .unwrap();

        // A fresh store sees the persisted values.
        let reopened = SettingsStore::open(&path).unwrap();
        let settings = reopened.current();
        assert_eq!(settings.truenas_api_key.as_deref(), Some("1-abcdef"));
        assert_eq!(
            settings.truenas_server_override.as_deref(),
            Some("truenas.local")
        );
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("s.yaml")).unwrap();
        let rx = store.subscribe();

        store
            .update(Settings {
                truenas_api_key: Some("key".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rx.borrow().truenas_api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.yaml");
        std::fs::write(&path, "truenasApiKey: abc\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.truenas_api_key.as_deref(), Some("abc"));
        assert_eq!(settings.truenas_server_override, None);
    }
}
