//! Configuration management for voxfill
//!
//! Settings live in `~/.voxfill/config.json` with a schema version and
//! sequential migrations. Every section is `#[serde(default)]` so partial
//! files load and unknown keys are ignored. A couple of service settings can
//! be overridden from the environment.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current config schema version
pub const CURRENT_VERSION: u32 = 1;

/// Environment variable overriding [`BackendConfig::base_url`]
pub const ENV_BACKEND_URL: &str = "VOXFILL_BACKEND_URL";

/// Environment variable overriding [`SpeechConfig::voice`]
pub const ENV_TTS_VOICE: &str = "VOXFILL_TTS_VOICE";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Speech and validation backend
    pub backend: BackendConfig,
    /// Spoken question settings
    pub speech: SpeechConfig,
    /// Turn, retry and correction policy
    pub conversation: ConversationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            backend: BackendConfig::default(),
            speech: SpeechConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend serving `/transcribe`, `/tts` and `/validate`
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Content type sent with recorded audio
    pub audio_mime: String,
    /// File name sent with recorded audio
    pub audio_filename: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            audio_mime: "audio/webm".to_string(),
            audio_filename: "audio.webm".to_string(),
        }
    }
}

/// Text-to-speech settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Voice name passed to the TTS service
    pub voice: String,
    /// Playback speed (0.25 to 4.0)
    pub speed: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            speed: 1.0,
        }
    }
}

impl SpeechConfig {
    /// Speed clamped to the range the TTS service accepts
    pub fn effective_speed(&self) -> f32 {
        if self.speed.is_finite() {
            self.speed.clamp(0.25, 4.0)
        } else {
            1.0
        }
    }
}

/// What to do when the validation service cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFallback {
    /// Fill the form with the raw transcripts, unvalidated
    #[default]
    UseRawValues,
    /// Stop the session with an error
    Abort,
}

/// Conversation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// How long to wait for a recording after asking, in milliseconds
    pub recording_window_ms: u64,
    /// Hard cap on any single recording window, in milliseconds
    pub max_recording_ms: u64,
    /// Failed recording/transcription attempts allowed per field
    pub retry_budget: u32,
    /// Pause before re-asking after a failed attempt, in milliseconds
    pub retry_delay_ms: u64,
    /// Correction passes allowed after the first validation
    pub max_correction_passes: u32,
    /// Behaviour when validation is unreachable
    pub validation_fallback: ValidationFallback,
    /// Fixed seed for question phrasing (random per session when unset)
    pub question_seed: Option<u64>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            recording_window_ms: 8_000,
            max_recording_ms: 10_000,
            retry_budget: 3,
            retry_delay_ms: 750,
            max_correction_passes: 2,
            validation_fallback: ValidationFallback::default(),
            question_seed: None,
        }
    }
}

impl ConversationConfig {
    /// Recording window after applying the hard cap
    pub fn recording_window(&self) -> Duration {
        Duration::from_millis(self.recording_window_ms.min(self.max_recording_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Retry budget, never below one attempt
    pub fn effective_retry_budget(&self) -> u32 {
        self.retry_budget.max(1)
    }
}

impl Config {
    /// Load configuration from `path`, migrating and re-saving older schemas.
    ///
    /// A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let original_version = config.version;
        let migrated = migrate_config(config)?;
        if migrated.version != original_version {
            migrated.save_to(path)?;
        }

        Ok(migrated)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialise config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;

        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_URL).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Backend URL overridden from {}", ENV_BACKEND_URL);
            self.backend.base_url = url.trim().to_string();
        }
        if let Some(voice) = lookup(ENV_TTS_VOICE).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("TTS voice overridden from {}", ENV_TTS_VOICE);
            self.speech.voice = voice.trim().to_string();
        }
    }
}

/// Get the path to the config file (~/.voxfill/config.json)
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Get the path to the config directory (~/.voxfill)
pub fn get_config_dir() -> PathBuf {
    home_dir_or_fallback().join(".voxfill")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Load the user's configuration with environment overrides applied.
///
/// Falls back to defaults if the file cannot be read or parsed.
pub fn load_config() -> Config {
    let mut config = Config::load_from(&get_config_path()).unwrap_or_else(|e| {
        tracing::error!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });
    config.apply_env_overrides();
    config
}

/// Migrate configuration from older schema versions
pub fn migrate_config(mut config: Config) -> Result<Config> {
    let original_version = config.version;

    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version > CURRENT_VERSION {
        return Err(anyhow!("Unknown config version: {}", config.version));
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config> {
    match config.version {
        // Version 0 -> 1: fields added since are filled by serde defaults
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(anyhow!("Unknown config version: {}", v)),
    }
}
