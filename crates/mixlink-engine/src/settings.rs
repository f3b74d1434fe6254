//! Persisted application settings (XML under the user settings directory).
//!
//! ```xml
//! <mixlink>
//!   <Windows>
//!     <Window name="output" x="0" y="0" w="1280" h="720" f="false"/>
//!   </Windows>
//!   <Application scale="1" accent_color="0"/>
//!   <Views current="1">
//!     <View name="Mixing" id="1">
//!       <default_scale x="1" y="1" z="1"/>
//!       <default_translation x="0" y="0" z="0"/>
//!     </View>
//!   </Views>
//!   <Record path="/home/me/Videos" audio_device=""/>
//! </mixlink>
//! ```
//!
//! A missing or unreadable file yields defaults; saving always rewrites the
//! whole file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use mixlink_core::APP_NAME;

pub const SETTINGS_BASENAME: &str = "mixlink.xml";
pub const TRANSLATOR_BASENAME: &str = "osc.xml";

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@x", default)]
    pub x: i32,
    #[serde(rename = "@y", default)]
    pub y: i32,
    #[serde(rename = "@w", default = "default_width")]
    pub w: i32,
    #[serde(rename = "@h", default = "default_height")]
    pub h: i32,
    #[serde(rename = "@f", default)]
    pub fullscreen: bool,
}

fn default_width() -> i32 {
    1280
}

fn default_height() -> i32 {
    720
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            name: "output".to_owned(),
            x: 0,
            y: 0,
            w: default_width(),
            h: default_height(),
            fullscreen: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Windows {
    #[serde(rename = "Window", default)]
    pub list: Vec<WindowConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    #[serde(rename = "@scale", default = "default_scale")]
    pub scale: f32,
    #[serde(rename = "@accent_color", default)]
    pub accent_color: i32,
}

fn default_scale() -> f32 {
    1.0
}

impl Default for Application {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            accent_color: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(rename = "@x", default)]
    pub x: f32,
    #[serde(rename = "@y", default)]
    pub y: f32,
    #[serde(rename = "@z", default)]
    pub z: f32,
}

impl Vec3 {
    pub const ONE: Vec3 = Vec3 {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    };
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@id")]
    pub id: i32,
    #[serde(default = "one")]
    pub default_scale: Vec3,
    #[serde(default = "zero")]
    pub default_translation: Vec3,
}

fn one() -> Vec3 {
    Vec3::ONE
}

fn zero() -> Vec3 {
    Vec3::ZERO
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Views {
    #[serde(rename = "@current", default = "default_view")]
    pub current: i32,
    #[serde(rename = "View", default)]
    pub list: Vec<ViewConfig>,
}

fn default_view() -> i32 {
    1
}

impl Default for Views {
    fn default() -> Self {
        Self {
            current: default_view(),
            list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "@path", default)]
    pub path: String,
    #[serde(rename = "@audio_device", default)]
    pub audio_device: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "mixlink")]
pub struct Settings {
    #[serde(rename = "Windows", default)]
    pub windows: Windows,
    #[serde(rename = "Application", default)]
    pub application: Application,
    #[serde(rename = "Views", default)]
    pub views: Views,
    #[serde(rename = "Record", default)]
    pub record: Record,
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Per-user settings directory (`$XDG_CONFIG_HOME/mixlink` or
/// `~/.config/mixlink`), created on first use.
pub fn settings_dir() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(std::env::temp_dir);
    let dir = base.join(APP_NAME);
    if std::fs::create_dir_all(&dir).is_err() {
        return std::env::temp_dir();
    }
    dir
}

impl Settings {
    /// Read settings; a missing file is not an error.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match quick_xml::de::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings file {} unreadable ({e}); using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let xml = quick_xml::se::to_string(self).context("serializing settings")?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        std::fs::write(path, xml).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixlink.xml");

        let mut settings = Settings::default();
        settings.windows.list.push(WindowConfig {
            name: "output".to_owned(),
            x: 100,
            y: 50,
            w: 1920,
            h: 1080,
            fullscreen: true,
        });
        settings.application.scale = 1.25;
        settings.application.accent_color = 3;
        settings.views.list.push(ViewConfig {
            name: "Mixing".to_owned(),
            id: 1,
            default_scale: Vec3::ONE,
            default_translation: Vec3::ZERO,
        });
        settings.record.audio_device = "Monitor of Speakers".to_owned();

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = Settings::load(Path::new("/nonexistent/mixlink.xml"));
        assert_eq!(loaded, Settings::default());
        assert_eq!(loaded.views.current, 1);
        assert_eq!(loaded.application.scale, 1.0);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixlink.xml");
        std::fs::write(
            &path,
            "<mixlink><Application scale=\"2.0\"/></mixlink>",
        )
        .unwrap();
        let loaded = Settings::load(&path);
        assert_eq!(loaded.application.scale, 2.0);
        assert_eq!(loaded.application.accent_color, 0);
        assert!(loaded.windows.list.is_empty());
    }
}
