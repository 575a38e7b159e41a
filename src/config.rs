use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_REFRESH_MS: u64 = 500;
pub const MIN_SLEEP_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default)]
    pub present_mon: PresentMonConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
    #[serde(default)]
    pub layout: LayoutDensity,
    #[serde(default)]
    pub adaptive_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentMonConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub process_name: String,
    #[serde(default = "default_presentmon_executable")]
    pub executable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    #[serde(default = "default_true")]
    pub check: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_update_interval_hours")]
    pub interval_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_theme_name")]
    pub name: String,
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutDensity {
    #[default]
    Standard,
    Compact,
}

fn default_refresh_ms() -> u64 {
    DEFAULT_REFRESH_MS
}

fn default_presentmon_executable() -> String {
    "presentmon".to_string()
}

fn default_true() -> bool {
    true
}

fn default_update_interval_hours() -> u64 {
    6
}

fn default_theme_name() -> String {
    "dark".to_string()
}

impl Default for PresentMonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            process_name: String::new(),
            executable: default_presentmon_executable(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check: true,
            url: String::new(),
            interval_hours: default_update_interval_hours(),
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            name: default_theme_name(),
            colors: BTreeMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_ms: DEFAULT_REFRESH_MS,
            present_mon: PresentMonConfig::default(),
            update: UpdateConfig::default(),
            theme: ThemeConfig::default(),
            layout: LayoutDensity::default(),
            adaptive_refresh: false,
        }
    }
}

impl Config {
    /// Loads the config file, falling back to defaults when it is missing or
    /// malformed. Never fails.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json_str(&contents),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not read {}: {}, using defaults", path.display(), e);
                }
                Self::default()
            }
        }
    }

    /// Shallow merge: every top-level key in `contents` replaces the default
    /// value for that key.
    pub fn from_json_str(contents: &str) -> Self {
        let user: serde_json::Value = match serde_json::from_str(contents) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Config is not valid JSON ({}), using defaults", e);
                return Self::default();
            }
        };

        let serde_json::Value::Object(user) = user else {
            tracing::warn!("Config root is not an object, using defaults");
            return Self::default();
        };

        let mut merged = match serde_json::to_value(Self::default()) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return Self::default(),
        };
        for (key, value) in user {
            merged.insert(key, value);
        }

        serde_json::from_value(serde_json::Value::Object(merged)).unwrap_or_else(|e| {
            tracing::warn!("Config has invalid values ({}), using defaults", e);
            Self::default()
        })
    }

    /// Writes the full record, replacing whatever the file held.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("osd-overlay")
            .join("config.json")
    }

    pub fn crash_log_path() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("osd-overlay")
            .join("logs")
            .join("error.log")
    }

    /// Interval between poll ticks, never shorter than the minimum sleep.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.refresh_ms.max(MIN_SLEEP_MS))
    }

    /// Target process for frame-rate capture, if capture is enabled and named.
    pub fn frame_rate_target(&self) -> Option<&str> {
        let name = self.present_mon.process_name.trim();
        (self.present_mon.enabled && !name.is_empty()).then_some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_key_takes_default_and_present_keys_win() {
        let config = Config::from_json_str(r#"{"refreshMs": 250}"#);
        assert_eq!(config.refresh_ms, 250);
        assert_eq!(config.present_mon, PresentMonConfig::default());
        assert_eq!(config.update, UpdateConfig::default());
        assert_eq!(config.theme, ThemeConfig::default());
    }

    #[test]
    fn nested_object_replaces_whole_default() {
        let config = Config::from_json_str(
            r#"{"presentMon": {"enabled": true, "processName": "witcher3.exe"}}"#,
        );
        assert!(config.present_mon.enabled);
        assert_eq!(config.present_mon.process_name, "witcher3.exe");
        assert_eq!(config.present_mon.executable, "presentmon");
        assert_eq!(config.refresh_ms, DEFAULT_REFRESH_MS);
    }

    #[test]
    fn unparseable_file_yields_full_defaults() {
        assert_eq!(Config::from_json_str("{ not json"), Config::default());
        assert_eq!(Config::from_json_str("[1, 2, 3]"), Config::default());
        assert_eq!(
            Config::from_json_str(r#"{"refreshMs": "fast"}"#),
            Config::default()
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::from_json_str(r#"{"someFutureKey": 1, "layout": "compact"}"#);
        assert_eq!(config.layout, LayoutDensity::Compact);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.refresh_ms = 750;
        config.present_mon.enabled = true;
        config.present_mon.process_name = "game.exe".to_string();
        config.update.check = false;
        config
            .theme
            .colors
            .insert("cpu".to_string(), "#112233".to_string());

        config.save(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn frame_rate_target_requires_enabled_and_name() {
        let mut config = Config::default();
        config.present_mon.process_name = "game.exe".to_string();
        assert_eq!(config.frame_rate_target(), None);
        config.present_mon.enabled = true;
        assert_eq!(config.frame_rate_target(), Some("game.exe"));
        config.present_mon.process_name = "   ".to_string();
        assert_eq!(config.frame_rate_target(), None);
    }

    #[test]
    fn refresh_interval_has_floor() {
        let mut config = Config::default();
        config.refresh_ms = 0;
        assert_eq!(config.refresh_interval().as_millis(), MIN_SLEEP_MS as u128);
    }
}
