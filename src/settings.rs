use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::models::DisplayId;
use crate::stages::{prompts::DEFAULT_MAX_MILESTONES, DEFAULT_SUMMARY_WORD_LIMIT};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentSettings {
    pub capture_interval_secs: f64,
    pub capture_timeout_secs: u64,
    pub display: DisplayId,
    pub max_milestones: usize,
    pub summary_word_limit: usize,
    pub stage_timeout_secs: u64,
    /// Rejected checks in a row on one milestone before the remaining path is replanned.
    /// Zero disables replanning.
    pub replan_after_stalled_checks: u32,
    /// Request a step automatically on every changed frame instead of waiting for the user.
    pub auto_advance_on_change: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            capture_interval_secs: 2.0,
            capture_timeout_secs: 10,
            display: DisplayId::main(),
            max_milestones: DEFAULT_MAX_MILESTONES,
            summary_word_limit: DEFAULT_SUMMARY_WORD_LIMIT,
            stage_timeout_secs: 60,
            replan_after_stalled_checks: 0,
            auto_advance_on_change: false,
        }
    }
}

impl AgentSettings {
    pub fn capture_interval(&self) -> Duration {
        let secs = if self.capture_interval_secs.is_finite() && self.capture_interval_secs > 0.0 {
            self.capture_interval_secs
        } else {
            AgentSettings::default().capture_interval_secs
        };
        Duration::from_secs_f64(secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }
}

/// JSON-file backed settings. A missing or unreadable file falls back to defaults.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AgentSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            AgentSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn settings(&self) -> AgentSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: AgentSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AgentSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &AgentSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, AgentSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AgentSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), AgentSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.settings();
        settings.capture_interval_secs = 0.5;
        settings.display = DisplayId::new("external-1");
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.settings(), settings);
        assert_eq!(reopened.settings().capture_interval(), Duration::from_millis(500));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"maxMilestones": 4, "autoAdvanceOnChange": true}"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().settings();
        assert_eq!(settings.max_milestones, 4);
        assert!(settings.auto_advance_on_change);
        assert_eq!(settings.stage_timeout_secs, 60);
    }

    #[test]
    fn garbage_file_falls_back_but_reload_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.settings(), AgentSettings::default());
        assert!(store.reload().is_err());
    }

    #[test]
    fn non_positive_interval_uses_default() {
        let settings = AgentSettings {
            capture_interval_secs: 0.0,
            ..AgentSettings::default()
        };
        assert_eq!(settings.capture_interval(), Duration::from_secs(2));
    }
}
