use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::storage::{KeyValueStore, StorageError};

pub const STORAGE_KEY_API_KEY: &str = "geminiApiKey";
pub const STORAGE_KEY_FACE_IMAGE: &str = "userFaceImage";
pub const STORAGE_KEY_SETTINGS: &str = "aiOverlaySettings";

pub const DEFAULT_INTENSITY: u8 = 5;
pub const MAX_INTENSITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Artistic,
    Realistic,
    Cartoon,
    Vintage,
    Modern,
    /// A name outside the known set. Prompts read it as artistic; the
    /// background placeholder applies no style filter for it.
    Other,
}

impl Style {
    pub const ALL: [Style; 5] = [
        Style::Artistic,
        Style::Realistic,
        Style::Cartoon,
        Style::Vintage,
        Style::Modern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Artistic => "artistic",
            Style::Realistic => "realistic",
            Style::Cartoon => "cartoon",
            Style::Vintage => "vintage",
            Style::Modern => "modern",
            Style::Other => "other",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or(Style::Other)
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Style::ALL
            .into_iter()
            .find(|style| style.as_str() == normalized)
            .ok_or_else(|| format!("unknown style '{}'", raw.trim()))
    }
}

impl<'de> Deserialize<'de> for Style {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(raw.as_str().map(Style::parse_lenient).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySettings {
    #[serde(default)]
    pub style: Style,
    #[serde(default = "default_intensity", deserialize_with = "lenient_intensity")]
    pub intensity: u8,
}

impl OverlaySettings {
    pub fn new(style: Style, intensity: i64) -> Self {
        Self {
            style,
            intensity: clamp_intensity(intensity),
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            style: Style::default(),
            intensity: DEFAULT_INTENSITY,
        }
    }
}

fn default_intensity() -> u8 {
    DEFAULT_INTENSITY
}

fn clamp_intensity(value: i64) -> u8 {
    value.clamp(0, i64::from(MAX_INTENSITY)) as u8
}

fn lenient_intensity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().and_then(ceil_whole)),
        Value::String(text) => text.trim().parse::<f64>().ok().and_then(ceil_whole),
        _ => None,
    };
    Ok(parsed.map(clamp_intensity).unwrap_or(DEFAULT_INTENSITY))
}

// Rounding up keeps every `intensity > n` threshold answering as it would for
// the fractional value.
fn ceil_whole(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.ceil() as i64)
}

/// Typed view over the three persisted keys.
///
/// Read failures are logged and reported as "absent"; callers never see a
/// storage error on the read path.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn api_key(&self) -> Option<String> {
        self.read(STORAGE_KEY_API_KEY)
            .as_ref()
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn set_api_key(&self, api_key: &str) -> Result<(), StorageError> {
        self.store
            .set(STORAGE_KEY_API_KEY, Value::String(api_key.to_string()))
    }

    pub fn face_image(&self) -> Option<String> {
        self.read(STORAGE_KEY_FACE_IMAGE)
            .as_ref()
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn set_face_image(&self, data_url: Option<&str>) -> Result<(), StorageError> {
        match data_url.filter(|value| !value.is_empty()) {
            Some(data_url) => self
                .store
                .set(STORAGE_KEY_FACE_IMAGE, Value::String(data_url.to_string())),
            None => self.store.remove(STORAGE_KEY_FACE_IMAGE),
        }
    }

    pub fn stored_overlay_settings(&self) -> Option<OverlaySettings> {
        let raw = self.read(STORAGE_KEY_SETTINGS)?;
        match serde_json::from_value(raw) {
            Ok(settings) => Some(settings),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed overlay settings");
                None
            }
        }
    }

    pub fn overlay_settings(&self) -> OverlaySettings {
        self.stored_overlay_settings().unwrap_or_default()
    }

    pub fn save_overlay_settings(&self, settings: &OverlaySettings) -> Result<(), StorageError> {
        let value = serde_json::to_value(settings).unwrap_or(Value::Null);
        self.store.set(STORAGE_KEY_SETTINGS, value)
    }

    /// Writes default overlay settings when none are stored yet. Returns
    /// whether anything was written.
    pub fn install_defaults(&self) -> Result<bool, StorageError> {
        if self.store.get(STORAGE_KEY_SETTINGS)?.is_some() {
            return Ok(false);
        }
        self.save_overlay_settings(&OverlaySettings::default())?;
        Ok(true)
    }

    fn read(&self, key: &str) -> Option<Value> {
        match self.store.get(key) {
            Ok(value) => value.filter(|value| !value.is_null()),
            Err(err) => {
                tracing::warn!(key, error = %err, "storage read failed; treating as absent");
                None
            }
        }
    }
}
