//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use scorch_core::roast::DEFAULT_PERSONA;
use scorch_core::tts::Voice;
use scorch_core::RoastIntensity;

/// Both backends live behind the same endpoint; the model field routes
/// between text generation and TTS.
const DEFAULT_API_URL: &str = "https://text.pollinations.ai/";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Endpoint for roast text generation.
    pub text_api_url: String,
    /// Endpoint for the streaming TTS response.
    pub tts_api_url: String,
    /// Optional backend access code, sent as the `code` request field.
    pub access_code: Option<String>,
    pub voice: String,
    pub persona: String,
    pub intensity: String,
    /// Output device to prefer; `None` uses the system default.
    pub preferred_output_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            text_api_url: DEFAULT_API_URL.into(),
            tts_api_url: DEFAULT_API_URL.into(),
            access_code: None,
            voice: Voice::default().id().into(),
            persona: DEFAULT_PERSONA.into(),
            intensity: "medium".into(),
            preferred_output_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.text_api_url = normalize_url(&self.text_api_url);
        self.tts_api_url = normalize_url(&self.tts_api_url);
        self.voice = self
            .voice
            .parse::<Voice>()
            .unwrap_or_default()
            .id()
            .to_string();
        self.intensity = self
            .intensity
            .parse::<RoastIntensity>()
            .unwrap_or_default()
            .id()
            .to_string();
        self.persona = {
            let trimmed = self.persona.trim();
            if trimmed.is_empty() {
                DEFAULT_PERSONA.into()
            } else {
                trimmed.to_string()
            }
        };
        self.access_code = self
            .access_code
            .as_ref()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn voice(&self) -> Voice {
        self.voice.parse().unwrap_or_default()
    }

    pub fn intensity(&self) -> RoastIntensity {
        self.intensity.parse().unwrap_or_default()
    }
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_API_URL.into()
    } else {
        trimmed.to_string()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Charbroil Labs")
            .join("Scorch")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("scorch")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/nonexistent/scorch/settings.json"));
        assert_eq!(settings.voice, "nova");
        assert_eq!(settings.persona, DEFAULT_PERSONA);
        assert_eq!(settings.text_api_url, DEFAULT_API_URL);
    }

    #[test]
    fn normalize_repairs_bad_values() {
        let mut settings = AppSettings {
            voice: "robotvoice".into(),
            intensity: "thermonuclear".into(),
            persona: "   ".into(),
            text_api_url: "".into(),
            access_code: Some("  ".into()),
            ..Default::default()
        };
        settings.normalize();
        assert_eq!(settings.voice, "nova");
        assert_eq!(settings.intensity, "medium");
        assert_eq!(settings.persona, DEFAULT_PERSONA);
        assert_eq!(settings.text_api_url, DEFAULT_API_URL);
        assert!(settings.access_code.is_none());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("scorch-settings-test-{}", std::process::id()));
        let path = dir.join("settings.json");
        let mut settings = AppSettings::default();
        settings.voice = "onyx".into();
        settings.access_code = Some("beesknees".into());

        save_settings(&path, &settings).expect("save settings");
        let loaded = load_settings(&path);
        assert_eq!(loaded.voice, "onyx");
        assert_eq!(loaded.access_code.as_deref(), Some("beesknees"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
