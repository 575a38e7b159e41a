use crate::config::ThemeConfig;
use crate::error::{OverlayError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parses `#rrggbb` (the leading `#` is optional).
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OverlayError::InvalidColor(value.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| OverlayError::InvalidColor(value.to_string()))
        };
        Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub name: String,
    pub bg: Rgb,
    pub panel: Rgb,
    pub accent: Rgb,
    pub text: Rgb,
    pub text_secondary: Rgb,
    pub border: Rgb,
    pub close: Rgb,
    pub cpu: Rgb,
    pub gpu: Rgb,
    pub ram: Rgb,
    pub fps: Rgb,
    /// Window opacity, 0.0 - 1.0
    pub opacity: f32,
}

/// Keys accepted in `theme.colors` and shown in the settings dialog.
pub const METRIC_COLOR_KEYS: [&str; 4] = ["cpu", "gpu", "ram", "fps"];

impl Theme {
    pub fn dark() -> Self {
        Self {
            name: "dark".to_string(),
            bg: Rgb(0x0a, 0x0a, 0x0f),
            panel: Rgb(0x1a, 0x1a, 0x2e),
            accent: Rgb(0x16, 0x21, 0x3e),
            text: Rgb(0xe6, 0xe6, 0xe6),
            text_secondary: Rgb(0xa0, 0xa0, 0xa0),
            border: Rgb(0x2d, 0x37, 0x48),
            close: Rgb(0xe5, 0x3e, 0x3e),
            cpu: Rgb(0xff, 0x6b, 0x6b),
            gpu: Rgb(0x4e, 0xcd, 0xc4),
            ram: Rgb(0x45, 0xb7, 0xd1),
            fps: Rgb(0x96, 0xce, 0xb4),
            opacity: 0.95,
        }
    }

    pub fn light() -> Self {
        Self {
            name: "light".to_string(),
            bg: Rgb(0xf4, 0xf5, 0xf7),
            panel: Rgb(0xff, 0xff, 0xff),
            accent: Rgb(0xdd, 0xe3, 0xee),
            text: Rgb(0x1f, 0x29, 0x37),
            text_secondary: Rgb(0x5a, 0x67, 0x7d),
            border: Rgb(0xc8, 0xd0, 0xdc),
            close: Rgb(0xe5, 0x3e, 0x3e),
            cpu: Rgb(0xe0, 0x4f, 0x5f),
            gpu: Rgb(0x1f, 0x9e, 0x94),
            ram: Rgb(0x2b, 0x7d, 0xbf),
            fps: Rgb(0x3c, 0x9d, 0x6b),
            opacity: 0.95,
        }
    }

    /// Builds the palette named in the config and applies color overrides.
    /// Unknown names fall back to dark; invalid colors are skipped.
    pub fn from_config(config: &ThemeConfig) -> Self {
        let mut theme = match config.name.as_str() {
            "light" => Self::light(),
            "dark" | "custom" => Self::dark(),
            other => {
                tracing::warn!("Unknown theme '{}', using dark", other);
                Self::dark()
            }
        };
        theme.name = config.name.clone();

        for (key, value) in &config.colors {
            match Rgb::parse(value) {
                Ok(color) => {
                    if !theme.set_color(key, color) {
                        tracing::warn!("Unknown theme color key '{}'", key);
                    }
                }
                Err(e) => tracing::warn!("Ignoring theme color for '{}': {}", key, e),
            }
        }

        theme
    }

    pub fn color(&self, key: &str) -> Option<Rgb> {
        Some(match key {
            "bg" => self.bg,
            "panel" => self.panel,
            "accent" => self.accent,
            "text" => self.text,
            "text_secondary" => self.text_secondary,
            "border" => self.border,
            "cpu" => self.cpu,
            "gpu" => self.gpu,
            "ram" => self.ram,
            "fps" => self.fps,
            _ => return None,
        })
    }

    fn set_color(&mut self, key: &str, color: Rgb) -> bool {
        let slot = match key {
            "bg" => &mut self.bg,
            "panel" => &mut self.panel,
            "accent" => &mut self.accent,
            "text" => &mut self.text,
            "text_secondary" => &mut self.text_secondary,
            "border" => &mut self.border,
            "cpu" => &mut self.cpu,
            "gpu" => &mut self.gpu,
            "ram" => &mut self.ram,
            "fps" => &mut self.fps,
            _ => return false,
        };
        *slot = color;
        true
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}
