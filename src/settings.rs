use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use url::Url;

use crate::{health::HealthConfig, timeline::SegmentProfile};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// REST base for room status and commands
    pub api_base_url: String,
    /// Base the HLS manifest URL is built from; never taken from events
    pub media_base_url: String,
    /// Server-sent lifecycle event stream
    pub realtime_url: String,
    pub auth_token: Option<String>,
    /// Local user id, compared with a room's creator before issuing start/invite
    pub user_id: Option<String>,
    pub tick_interval_ms: u64,
    pub manifest_poll_ms: u64,
    /// Fixed length of every intermission between prayer groups
    pub intermission_secs: f64,
    pub health: HealthConfig,
    pub default_profile: SegmentProfile,
    /// Segment budgets keyed by reciter name
    pub reciter_profiles: HashMap<String, SegmentProfile>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            media_base_url: "http://localhost:8001".into(),
            realtime_url: "http://localhost:8000/events".into(),
            auth_token: None,
            user_id: None,
            tick_interval_ms: 500,
            manifest_poll_ms: 2_000,
            intermission_secs: 30.0,
            health: HealthConfig::default(),
            default_profile: SegmentProfile::default(),
            reciter_profiles: HashMap::new(),
        }
    }
}

/// Parsed endpoints, checked once when settings are loaded.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: Url,
    pub media_base: Url,
    pub realtime: Url,
}

impl ClientSettings {
    /// Applies `TARTEEL_*` environment variables on top of the stored values.
    pub fn with_env_overrides(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(value) = var("TARTEEL_API_URL") {
            self.api_base_url = value;
        }
        if let Some(value) = var("TARTEEL_MEDIA_URL") {
            self.media_base_url = value;
        }
        if let Some(value) = var("TARTEEL_REALTIME_URL") {
            self.realtime_url = value;
        }
        if let Some(value) = var("TARTEEL_TOKEN") {
            self.auth_token = Some(value);
        }
        if let Some(value) = var("TARTEEL_USER_ID") {
            self.user_id = Some(value);
        }
        self
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        let parse = |name: &str, value: &str| {
            Url::parse(value).with_context(|| format!("invalid {name}: {value:?}"))
        };
        Ok(Endpoints {
            api_base: parse("apiBaseUrl", &self.api_base_url)?,
            media_base: parse("mediaBaseUrl", &self.media_base_url)?,
            realtime: parse("realtimeUrl", &self.realtime_url)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoints()?;
        if self.tick_interval_ms == 0 || self.manifest_poll_ms == 0 {
            bail!("tickIntervalMs and manifestPollMs must be positive");
        }
        if !self.intermission_secs.is_finite() || self.intermission_secs < 0.0 {
            bail!("intermissionSecs must be a non-negative number");
        }
        self.default_profile
            .validate()
            .map_err(|err| anyhow::anyhow!("defaultProfile: {err}"))?;
        for (reciter, profile) in &self.reciter_profiles {
            profile
                .validate()
                .map_err(|err| anyhow::anyhow!("profile for {reciter}: {err}"))?;
        }
        Ok(())
    }
}

/// `settings.json` under the platform config directory.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tarteel-sync")
        .join("settings.json")
}

/// Whether verbose per-tick presentation logging is on.
pub fn debug_mode() -> bool {
    std::env::var("TARTEEL_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ClientSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            ClientSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings with environment overrides applied.
    pub fn effective(&self) -> ClientSettings {
        self.read().clone().with_env_overrides()
    }

    pub fn update(&self, apply: impl FnOnce(&mut ClientSettings)) -> Result<()> {
        let mut guard = self.write();
        let mut next = guard.clone();
        apply(&mut next);
        next.validate()?;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &ClientSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{PhaseLabel, PhaseSegment};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        let settings = store.read().clone();
        assert_eq!(settings, ClientSettings::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update(|s| {
                s.media_base_url = "https://media.example.org".into();
                s.reciter_profiles.insert(
                    "Husary".into(),
                    SegmentProfile {
                        first_of_group: vec![PhaseSegment::variable(PhaseLabel::Recitation)],
                        second_of_group: vec![PhaseSegment::fixed(PhaseLabel::Tashahhud, 40.0)],
                    },
                );
            })
            .unwrap();

        let reloaded = SettingsStore::new(path).unwrap();
        let settings = reloaded.read().clone();
        assert_eq!(settings.media_base_url, "https://media.example.org");
        assert_eq!(settings.reciter_profiles["Husary"].fixed_total(false), 40.0);
    }

    #[test]
    fn invalid_update_is_rejected_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let result = store.update(|s| s.api_base_url = "not a url".into());
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(store.read().api_base_url, "http://localhost:8000");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "intermissionSecs": 45.0, "health": { "stallGraceMs": 5000 } }"#)
            .unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.read().clone();
        assert_eq!(settings.intermission_secs, 45.0);
        assert_eq!(settings.health.stall_grace_ms, 5000);
        assert_eq!(settings.health.recovery_cooldown_ms, 2000);
        assert_eq!(settings.tick_interval_ms, 500);
    }
}
