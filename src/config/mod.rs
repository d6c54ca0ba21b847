//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

/// Top-level interview_config.json shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterviewConfig {
    pub transcription: TranscriptionSettings,
    pub completion: CompletionSettings,
    pub speech: SpeechSettings,
    pub media_room: MediaRoomSettings,
    pub session: SessionSettings,
}

/// Streaming speech-to-text settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranscriptionSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub language: String,
    pub sample_rate: u32,
    /// Quiet time after the last fragment before an utterance is final.
    pub silence_threshold_ms: u64,
    pub silence_check_interval_ms: u64,
    pub keep_alive_secs: u64,
    pub chunk_ms: u64,
    /// Server-side end-of-utterance gap.
    pub utterance_end_ms: u64,
    pub input_device: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "wss://api.deepgram.com/v1/listen".into(),
            model: "nova-2".into(),
            language: "en-US".into(),
            sample_rate: 16_000,
            silence_threshold_ms: 2_500,
            silence_check_interval_ms: 500,
            keep_alive_secs: 10,
            chunk_ms: 100,
            utterance_end_ms: 1_000,
            input_device: None,
        }
    }
}

impl TranscriptionSettings {
    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn silence_check_interval(&self) -> Duration {
        Duration::from_millis(self.silence_check_interval_ms.max(10))
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_ms.max(10))
    }
}

/// Chat completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompletionSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub timeout_secs: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-4".into(),
            max_tokens: 100,
            temperature: 0.6,
            presence_penalty: 0.1,
            frequency_penalty: 0.2,
            timeout_secs: 30,
        }
    }
}

/// Speech synthesis and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpeechSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub volume: f32,
    pub output_device: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io".into(),
            voice_id: "EXAVITQu4vr4xnSDxMaL".into(),
            model_id: "eleven_monolingual_v1".into(),
            stability: 0.5,
            similarity_boost: 0.75,
            volume: 1.0,
            output_device: None,
        }
    }
}

/// Optional real-time media room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaRoomSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub token_ttl_secs: u64,
}

impl Default for MediaRoomSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_secret: None,
            token_ttl_secs: 6 * 60 * 60,
        }
    }
}

impl MediaRoomSettings {
    /// Room support needs all three credentials.
    pub fn is_configured(&self) -> bool {
        [&self.url, &self.api_key, &self.api_secret]
            .iter()
            .all(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

/// Turn-taking behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    pub auto_listen: bool,
    pub resume_delay_ms: u64,
    /// Resume delay when the reply was not spoken aloud.
    pub unspoken_resume_delay_ms: u64,
    pub duplicate_window_ms: u64,
    pub simulated_transcript_delay_ms: u64,
    pub max_follow_ups: usize,
    pub follow_up_chance: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_listen: true,
            resume_delay_ms: 500,
            unspoken_resume_delay_ms: 1_000,
            duplicate_window_ms: 1_000,
            simulated_transcript_delay_ms: 3_000,
            max_follow_ups: 2,
            follow_up_chance: 0.2,
        }
    }
}

impl SessionSettings {
    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn unspoken_resume_delay(&self) -> Duration {
        Duration::from_millis(self.unspoken_resume_delay_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }

    pub fn simulated_transcript_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_transcript_delay_ms)
    }
}

impl InterviewConfig {
    /// Overlay credentials from the environment (`DEEPGRAM_API_KEY` etc).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("DEEPGRAM_API_KEY") {
            self.transcription.api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Some(key) = get("ELEVENLABS_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Some(url) = get("LIVEKIT_URL") {
            self.media_room.url = Some(url);
        }
        if let Some(key) = get("LIVEKIT_API_KEY") {
            self.media_room.api_key = Some(key);
        }
        if let Some(secret) = get("LIVEKIT_API_SECRET") {
            self.media_room.api_secret = Some(secret);
        }
    }
}

/// Read interview_config.json from the data directory and apply env overrides.
pub fn read_interview_config() -> InterviewConfig {
    let mut config: InterviewConfig = read_json_file(&get_config_path()).unwrap_or_default();
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config
}

/// Path to interview_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("interview_config.json")
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InterviewConfig::default();
        assert_eq!(config.transcription.silence_threshold(), Duration::from_millis(2500));
        assert_eq!(config.transcription.keep_alive_interval(), Duration::from_secs(10));
        assert_eq!(config.session.resume_delay(), Duration::from_millis(500));
        assert_eq!(config.session.duplicate_window(), Duration::from_secs(1));
        assert!(config.session.auto_listen);
        assert!(!config.media_room.is_configured());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"transcription": {"silenceThresholdMs": 1800}, "session": {"autoListen": false}}"#;
        let config: InterviewConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.transcription.silence_threshold_ms, 1800);
        assert_eq!(config.transcription.model, "nova-2");
        assert!(!config.session.auto_listen);
        assert_eq!(config.session.max_follow_ups, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = InterviewConfig::default();
        config.apply_env_overrides(|name| match name {
            "DEEPGRAM_API_KEY" => Some("dg".into()),
            "OPENAI_API_KEY" => Some("   ".into()),
            "LIVEKIT_URL" => Some("wss://rooms.example".into()),
            "LIVEKIT_API_KEY" => Some("key".into()),
            "LIVEKIT_API_SECRET" => Some("secret".into()),
            _ => None,
        });
        assert_eq!(config.transcription.api_key.as_deref(), Some("dg"));
        assert_eq!(config.completion.api_key, None);
        assert!(config.media_room.is_configured());
    }

    #[test]
    fn test_missing_file_is_none() {
        let path = std::env::temp_dir().join("interviewer-core-does-not-exist.json");
        assert!(read_json_file::<InterviewConfig>(&path).is_none());
    }
}
