//! Settings dialog state. The GUI draws it; this module owns validation and
//! the full overwrite of the config file. Saved values take effect on the
//! next launch.

use crate::config::{Config, LayoutDensity, PresentMonConfig, ThemeConfig, UpdateConfig};
use crate::error::{OverlayError, Result};
use crate::theme::{Rgb, METRIC_COLOR_KEYS};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const MIN_REFRESH_MS: u64 = 100;
pub const MAX_REFRESH_MS: u64 = 5000;
pub const THEME_NAMES: [&str; 3] = ["dark", "light", "custom"];

/// Editable field values, kept as entered until saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    pub refresh_ms: String,
    pub present_mon_enabled: bool,
    pub process_name: String,
    pub present_mon_executable: String,
    pub update_check: bool,
    pub update_url: String,
    pub update_interval_hours: String,
    pub theme_name: String,
    /// One entry per metric color key; empty means no override.
    pub colors: BTreeMap<String, String>,
    pub layout: LayoutDensity,
    pub adaptive_refresh: bool,
}

impl SettingsForm {
    pub fn from_config(config: &Config) -> Self {
        let mut colors: BTreeMap<String, String> = METRIC_COLOR_KEYS
            .iter()
            .map(|key| (key.to_string(), String::new()))
            .collect();
        for (key, value) in &config.theme.colors {
            colors.insert(key.clone(), value.clone());
        }

        Self {
            refresh_ms: config.refresh_ms.to_string(),
            present_mon_enabled: config.present_mon.enabled,
            process_name: config.present_mon.process_name.clone(),
            present_mon_executable: config.present_mon.executable.clone(),
            update_check: config.update.check,
            update_url: config.update.url.clone(),
            update_interval_hours: config.update.interval_hours.to_string(),
            theme_name: config.theme.name.clone(),
            colors,
            layout: config.layout,
            adaptive_refresh: config.adaptive_refresh,
        }
    }

    /// Validates every field and builds the record that will be written.
    pub fn to_config(&self) -> Result<Config> {
        let refresh_ms = self
            .refresh_ms
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|ms| (MIN_REFRESH_MS..=MAX_REFRESH_MS).contains(ms))
            .ok_or_else(|| {
                OverlayError::InvalidSetting(format!(
                    "Refresh must be a whole number between {} and {} ms",
                    MIN_REFRESH_MS, MAX_REFRESH_MS
                ))
            })?;

        let interval_hours = self
            .update_interval_hours
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|hours| *hours >= 1)
            .ok_or_else(|| {
                OverlayError::InvalidSetting(
                    "Update interval must be a whole number of hours (at least 1)".to_string(),
                )
            })?;

        if !THEME_NAMES.contains(&self.theme_name.as_str()) {
            return Err(OverlayError::InvalidSetting(format!(
                "Unknown theme '{}'",
                self.theme_name
            )));
        }

        let mut colors = BTreeMap::new();
        for (key, value) in &self.colors {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            Rgb::parse(value)?;
            colors.insert(key.clone(), value.to_string());
        }

        let executable = match self.present_mon_executable.trim() {
            "" => PresentMonConfig::default().executable,
            exe => exe.to_string(),
        };

        Ok(Config {
            refresh_ms,
            present_mon: PresentMonConfig {
                enabled: self.present_mon_enabled,
                process_name: self.process_name.clone(),
                executable,
            },
            update: UpdateConfig {
                check: self.update_check,
                url: self.update_url.trim().to_string(),
                interval_hours,
            },
            theme: ThemeConfig {
                name: self.theme_name.clone(),
                colors,
            },
            layout: self.layout,
            adaptive_refresh: self.adaptive_refresh,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Refocused,
}

/// At most one dialog exists at a time.
#[derive(Debug)]
pub struct SettingsDialog {
    path: PathBuf,
    form: Option<SettingsForm>,
    error: Option<String>,
    focus_requested: bool,
}

impl SettingsDialog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            form: None,
            error: None,
            focus_requested: false,
        }
    }

    /// Opens the dialog prefilled from the file on disk, or re-focuses the
    /// one already open.
    pub fn open(&mut self) -> OpenOutcome {
        self.focus_requested = true;
        if self.form.is_some() {
            return OpenOutcome::Refocused;
        }
        let config = Config::load_from(&self.path);
        self.form = Some(SettingsForm::from_config(&config));
        self.error = None;
        OpenOutcome::Opened
    }

    pub fn is_open(&self) -> bool {
        self.form.is_some()
    }

    #[cfg(test)]
    pub fn form(&self) -> Option<&SettingsForm> {
        self.form.as_ref()
    }

    pub fn form_mut(&mut self) -> Option<&mut SettingsForm> {
        self.form.as_mut()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True once after each `open`.
    pub fn take_focus_request(&mut self) -> bool {
        std::mem::take(&mut self.focus_requested)
    }

    /// Overwrites the config file with the form values and closes. On a
    /// validation or write error the dialog stays open and nothing changes
    /// on disk.
    pub fn save(&mut self) -> Result<Config> {
        let Some(form) = self.form.as_ref() else {
            return Err(OverlayError::InvalidSetting(
                "Settings dialog is not open".to_string(),
            ));
        };

        let result = form.to_config().and_then(|config| {
            config.save(&self.path)?;
            Ok(config)
        });

        match result {
            Ok(config) => {
                tracing::info!(
                    "Settings saved to {}; restart to apply",
                    self.path.display()
                );
                self.form = None;
                self.error = None;
                Ok(config)
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn cancel(&mut self) {
        self.form = None;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn saved_settings_reload_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut dialog = SettingsDialog::new(&path);
        assert_eq!(dialog.open(), OpenOutcome::Opened);

        let form = dialog.form_mut().unwrap();
        form.refresh_ms = "750".to_string();
        form.present_mon_enabled = true;
        form.process_name = "Game Client.exe".to_string();
        form.update_check = false;
        form.colors.insert("cpu".to_string(), "#112233".to_string());
        form.layout = LayoutDensity::Compact;

        let saved = dialog.save().unwrap();
        assert!(!dialog.is_open());

        let reloaded = Config::load_from(&path);
        assert_eq!(reloaded, saved);
        assert_eq!(reloaded.refresh_ms, 750);
        assert!(reloaded.present_mon.enabled);
        assert_eq!(reloaded.present_mon.process_name, "Game Client.exe");
        assert!(!reloaded.update.check);
        assert_eq!(reloaded.layout, LayoutDensity::Compact);
        assert_eq!(reloaded.theme.colors.get("cpu").map(String::as_str), Some("#112233"));
        assert_eq!(reloaded.theme.colors.len(), 1);
    }

    #[test]
    fn invalid_refresh_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut dialog = SettingsDialog::new(&path);
        dialog.open();

        for bad in ["fast", "99", "5001", "12.5", ""] {
            dialog.form_mut().unwrap().refresh_ms = bad.to_string();
            assert!(dialog.save().is_err(), "accepted {:?}", bad);
            assert!(dialog.is_open());
            assert!(dialog.error().unwrap().contains("Refresh"));
        }
        assert!(!path.exists());
    }

    #[test]
    fn invalid_color_is_rejected() {
        let mut form = SettingsForm::from_config(&Config::default());
        form.colors.insert("gpu".to_string(), "teal".to_string());
        assert!(matches!(form.to_config(), Err(OverlayError::InvalidColor(_))));
    }

    #[test]
    fn second_open_refocuses_existing_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let mut dialog = SettingsDialog::new(dir.path().join("config.json"));
        assert_eq!(dialog.open(), OpenOutcome::Opened);
        assert!(dialog.take_focus_request());
        assert!(!dialog.take_focus_request());

        dialog.form_mut().unwrap().process_name = "edited".to_string();
        assert_eq!(dialog.open(), OpenOutcome::Refocused);
        assert!(dialog.take_focus_request());
        assert_eq!(dialog.form().unwrap().process_name, "edited");

        dialog.cancel();
        assert!(!dialog.is_open());
    }

    #[test]
    fn prefills_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"refreshMs": 1200, "adaptiveRefresh": true}"#).unwrap();

        let mut dialog = SettingsDialog::new(&path);
        dialog.open();
        let form = dialog.form().unwrap();
        assert_eq!(form.refresh_ms, "1200");
        assert!(form.adaptive_refresh);
        assert_eq!(form.colors.len(), METRIC_COLOR_KEYS.len());
    }

    #[test]
    fn default_form_round_trips_to_defaults() {
        let form = SettingsForm::from_config(&Config::default());
        assert_eq!(form.to_config().unwrap(), Config::default());
    }
}
