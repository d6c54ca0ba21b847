//! ElevenLabs TTS: paid cloud synthesis via REST API.
//!
//! POST `{base}/v1/text-to-speech/{voice_id}` returns MP3 bytes, which are
//! decoded to f32 PCM. GET `{base}/v1/voices` lists the account's voices.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::mp3_decode::decode_mp3;
use super::{SpeechSynthesizer, SynthesizedAudio, VoiceInfo};
use crate::config::SpeechSettings;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<RawVoice>,
}

#[derive(Debug, Deserialize)]
struct RawVoice {
    voice_id: String,
    name: String,
}

pub struct ElevenLabsTts {
    api_key: String,
    settings: SpeechSettings,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(api_key: &str, settings: SpeechSettings) -> Self {
        Self {
            api_key: api_key.to_string(),
            settings,
            client: reqwest::Client::new(),
        }
    }

    /// Build from settings; `None` without an API key.
    pub fn from_settings(settings: &SpeechSettings) -> Option<Self> {
        let key = settings.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(key, settings.clone()))
    }

    fn speech_url(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.settings.base_url.trim_end_matches('/'),
            voice_id
        )
    }

    fn voices_url(&self) -> String {
        format!("{}/v1/voices", self.settings.base_url.trim_end_matches('/'))
    }

    async fn speak(&self, text: &str, voice_id: Option<&str>) -> SessionResult<SynthesizedAudio> {
        let voice = voice_id
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.settings.voice_id);
        info!(voice = %voice, text_len = text.len(), "ElevenLabs TTS request");

        let body = TtsRequest {
            text,
            model_id: &self.settings.model_id,
            voice_settings: VoiceSettings {
                stability: self.settings.stability,
                similarity_boost: self.settings.similarity_boost,
            },
        };

        let resp = self
            .client
            .post(self.speech_url(voice))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::BackendUnavailable(format!(
                "ElevenLabs TTS API error {}: {}",
                status, body
            )));
        }

        let bytes = resp.bytes().await?;
        let audio = decode_mp3(&bytes)?;
        info!(
            samples = audio.samples.len(),
            sample_rate = audio.sample_rate,
            duration_secs = format!("{:.2}", audio.duration_secs()),
            "ElevenLabs synthesis complete"
        );
        Ok(audio)
    }

    async fn voices(&self) -> SessionResult<Vec<VoiceInfo>> {
        let resp = self
            .client
            .get(self.voices_url())
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(SessionError::BackendUnavailable(format!(
                "ElevenLabs voices API error {}",
                status
            )));
        }

        let body = resp.text().await?;
        parse_voices(&body)
    }
}

fn parse_voices(body: &str) -> SessionResult<Vec<VoiceInfo>> {
    let parsed: VoicesResponse = serde_json::from_str(body)?;
    Ok(parsed
        .voices
        .into_iter()
        .map(|v| VoiceInfo {
            id: v.voice_id,
            name: v.name,
        })
        .collect())
}

impl SpeechSynthesizer for ElevenLabsTts {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice_id: Option<&'a str>,
    ) -> BoxFuture<'a, SessionResult<SynthesizedAudio>> {
        self.speak(text, voice_id).boxed()
    }

    fn list_voices(&self) -> BoxFuture<'_, SessionResult<Vec<VoiceInfo>>> {
        self.voices().boxed()
    }

    fn name(&self) -> String {
        format!("ElevenLabs ({})", self.settings.voice_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let mut settings = SpeechSettings::default();
        settings.base_url = "https://api.elevenlabs.io/".into();
        let tts = ElevenLabsTts::new("xi", settings);
        assert_eq!(
            tts.speech_url("EXAVITQu4vr4xnSDxMaL"),
            "https://api.elevenlabs.io/v1/text-to-speech/EXAVITQu4vr4xnSDxMaL"
        );
        assert_eq!(tts.voices_url(), "https://api.elevenlabs.io/v1/voices");
    }

    #[test]
    fn test_request_body() {
        let body = TtsRequest {
            text: "Hello",
            model_id: "eleven_monolingual_v1",
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model_id"], "eleven_monolingual_v1");
        assert_eq!(value["voice_settings"]["similarity_boost"], 0.75);
    }

    #[test]
    fn test_parse_voices() {
        let body = r#"{"voices":[{"voice_id":"EXAVITQu4vr4xnSDxMaL","name":"Bella","category":"premade"}]}"#;
        assert_eq!(
            parse_voices(body).unwrap(),
            vec![VoiceInfo {
                id: "EXAVITQu4vr4xnSDxMaL".into(),
                name: "Bella".into()
            }]
        );
        assert!(matches!(
            parse_voices(r#"{"detail":"unauthorized"}"#),
            Err(SessionError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_from_settings_requires_key() {
        assert!(ElevenLabsTts::from_settings(&SpeechSettings::default()).is_none());
    }
}
