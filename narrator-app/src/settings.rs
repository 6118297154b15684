//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use narrator_core::audio::{AudioEngineConfig, AudioFormat, OutputTarget};
use narrator_core::narration::DEFAULT_STYLES;
use narrator_core::CommentatorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub output_device: Option<String>,
    /// Play through the null output clock instead of a sound card.
    pub headless: bool,
    /// Enables the live-model primary narrator.
    pub gemini_api_key: Option<String>,
    pub live_model: String,
    pub live_voice: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub fallback_model: String,
    pub window_capacity: usize,
    pub snapshot_len: usize,
    pub history_capacity: usize,
    pub history_topics: usize,
    pub dequeue_timeout_ms: u64,
    pub max_timeouts: u32,
    pub queue_capacity: usize,
    pub ring_capacity: usize,
    pub sample_rate: u32,
    pub frames_per_buffer: u32,
    pub styles: Vec<String>,
    /// Simulated workers spawned by the demo host.
    pub workers: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_device: None,
            headless: false,
            gemini_api_key: None,
            live_model: "models/gemini-2.0-flash-live-001".into(),
            live_voice: "Puck".into(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            fallback_model: "gpt-4o".into(),
            window_capacity: 50,
            snapshot_len: 50,
            history_capacity: 50,
            history_topics: 20,
            dequeue_timeout_ms: 3_000,
            max_timeouts: 5,
            queue_capacity: 1024,
            ring_capacity: 100,
            sample_rate: 24_000,
            frames_per_buffer: 1024,
            styles: DEFAULT_STYLES.iter().map(|s| s.to_string()).collect(),
            workers: 3,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.output_device = trimmed_non_empty(self.output_device.as_deref());
        self.openai_api_key = trimmed_non_empty(self.openai_api_key.as_deref());
        self.gemini_api_key = trimmed_non_empty(self.gemini_api_key.as_deref());
        self.live_model = match self.live_model.trim() {
            "" => "models/gemini-2.0-flash-live-001".into(),
            model if model.starts_with("models/") => model.into(),
            model => format!("models/{model}"),
        };
        self.live_voice = match self.live_voice.trim() {
            "" => "Puck".into(),
            voice => voice.into(),
        };
        self.openai_base_url = match self.openai_base_url.trim() {
            "" => "https://api.openai.com/v1".into(),
            url => url.trim_end_matches('/').into(),
        };
        self.fallback_model = match self.fallback_model.trim() {
            "" => "gpt-4o".into(),
            model => model.into(),
        };
        self.window_capacity = self.window_capacity.clamp(1, 1_000);
        self.snapshot_len = self.snapshot_len.clamp(1, self.window_capacity);
        self.history_capacity = self.history_capacity.clamp(1, 1_000);
        self.history_topics = self.history_topics.min(self.history_capacity);
        self.dequeue_timeout_ms = self.dequeue_timeout_ms.clamp(100, 60_000);
        self.max_timeouts = self.max_timeouts.clamp(1, 1_000);
        self.queue_capacity = self.queue_capacity.clamp(1, 1 << 16);
        self.ring_capacity = self.ring_capacity.clamp(1, 10_000);
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        self.frames_per_buffer = self.frames_per_buffer.clamp(64, 8_192);
        self.styles = normalize_styles(&self.styles);
        self.workers = self.workers.clamp(1, 32);
    }

    /// Apply `NARRATOR_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("NARRATOR_OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("NARRATOR_GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(device) = lookup("NARRATOR_OUTPUT_DEVICE") {
            self.output_device = Some(device);
        }
        if let Some(raw) = lookup("NARRATOR_HEADLESS") {
            self.headless = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self.normalize();
    }

    pub fn commentator_config(&self) -> CommentatorConfig {
        CommentatorConfig {
            window_capacity: self.window_capacity,
            snapshot_len: self.snapshot_len,
            history_capacity: self.history_capacity,
            history_topics: self.history_topics,
            dequeue_timeout: Duration::from_millis(self.dequeue_timeout_ms),
            max_timeouts: self.max_timeouts,
            queue_capacity: self.queue_capacity,
            styles: self.styles.clone(),
        }
    }

    pub fn audio_engine_config(&self) -> AudioEngineConfig {
        let output = if self.headless {
            OutputTarget::Null
        } else {
            match &self.output_device {
                Some(name) => OutputTarget::Named(name.clone()),
                None => OutputTarget::Default,
            }
        };
        AudioEngineConfig {
            format: AudioFormat {
                sample_rate: self.sample_rate,
                channels: 1,
                frames_per_buffer: self.frames_per_buffer,
            },
            ring_capacity: self.ring_capacity,
            output,
        }
    }
}

fn trimmed_non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn normalize_styles(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for style in raw {
        let normalized = style.trim();
        if normalized.is_empty() || out.iter().any(|s| s.eq_ignore_ascii_case(normalized)) {
            continue;
        }
        out.push(normalized.to_string());
        if out.len() >= 32 {
            break;
        }
    }
    if out.is_empty() {
        out = DEFAULT_STYLES.iter().map(|s| s.to_string()).collect();
    }
    out
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Narrator")
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
            .join("narrator")
            .join("settings.json")
    }
}

/// Missing or unreadable files yield defaults.
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
    fn defaults_produce_valid_core_configs() {
        let settings = AppSettings::default();
        assert!(settings.commentator_config().validate().is_ok());
        assert!(settings.audio_engine_config().validate().is_ok());
        assert_eq!(settings.audio_engine_config().output, OutputTarget::Default);
    }

    #[test]
    fn partial_json_falls_back_to_defaults_per_field() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "maxTimeouts": 9, "outputDevice": "  USB DAC " }"#).unwrap();
        assert_eq!(settings.max_timeouts, 9);
        assert_eq!(settings.window_capacity, 50);

        let mut settings = settings;
        settings.normalize();
        assert_eq!(settings.output_device.as_deref(), Some("USB DAC"));
        assert_eq!(
            settings.audio_engine_config().output,
            OutputTarget::Named("USB DAC".into())
        );
    }

    #[test]
    fn normalize_clamps_and_dedups() {
        let mut settings = AppSettings {
            window_capacity: 0,
            snapshot_len: 500,
            max_timeouts: 0,
            openai_api_key: Some("   ".into()),
            openai_base_url: "http://localhost:1234/v1/".into(),
            styles: vec![" Analyst ".into(), "analyst".into(), "".into()],
            live_model: " gemini-live-test ".into(),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.live_model, "models/gemini-live-test");
        assert_eq!(settings.window_capacity, 1);
        assert_eq!(settings.snapshot_len, 1);
        assert_eq!(settings.max_timeouts, 1);
        assert_eq!(settings.openai_api_key, None);
        assert_eq!(settings.openai_base_url, "http://localhost:1234/v1");
        assert_eq!(settings.styles, vec!["Analyst".to_string()]);
    }

    #[test]
    fn empty_style_list_restores_defaults() {
        let mut settings = AppSettings {
            styles: vec![],
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.styles.len(), DEFAULT_STYLES.len());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut settings = AppSettings::default();
        settings.apply_overrides_from(|key| match key {
            "NARRATOR_OPENAI_API_KEY" => Some(" sk-test ".into()),
            "NARRATOR_HEADLESS" => Some("TRUE".into()),
            "NARRATOR_GEMINI_API_KEY" => Some("g-key".into()),
            _ => None,
        });
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.gemini_api_key.as_deref(), Some("g-key"));
        assert!(settings.headless);
        assert_eq!(settings.audio_engine_config().output, OutputTarget::Null);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = std::env::temp_dir().join(format!("narrator-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = AppSettings {
            workers: 7,
            headless: true,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("narrator-does-not-exist/settings.json");
        assert_eq!(load_settings(&path), AppSettings::default());
    }
}
