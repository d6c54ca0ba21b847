//! Wire types for the streaming transcription backend.
//!
//! Client -> server: a JSON configuration handshake, then raw linear16 audio
//! frames, periodic `KeepAlive` and a final `CloseStream`.
//! Server -> client: `Results` messages carrying
//! `channel.alternatives[0].transcript` with `is_final` / `speech_final`,
//! plus `UtteranceEnd` when the server detects the end of an utterance.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TranscriptionSettings;
use crate::error::{SessionError, SessionResult};

/// Recognition options, sent in the handshake and on the connect URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamOptions {
    pub model: String,
    pub language: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub punctuate: bool,
    pub interim_results: bool,
    /// Server-side end-of-utterance detection.
    pub utterance_end_ms: u64,
    pub vad_events: bool,
}

impl StreamOptions {
    pub fn from_settings(settings: &TranscriptionSettings) -> Self {
        Self {
            model: settings.model.clone(),
            language: settings.language.clone(),
            encoding: "linear16".into(),
            sample_rate: settings.sample_rate,
            channels: 1,
            punctuate: true,
            interim_results: true,
            utterance_end_ms: settings.utterance_end_ms,
            vad_events: true,
        }
    }

    /// Query-string form of the options.
    pub fn query_string(&self) -> String {
        format!(
            "model={}&language={}&encoding={}&sample_rate={}&channels={}\
             &punctuate={}&interim_results={}&utterance_end_ms={}&vad_events={}",
            self.model,
            self.language,
            self.encoding,
            self.sample_rate,
            self.channels,
            self.punctuate,
            self.interim_results,
            self.utterance_end_ms,
            self.vad_events,
        )
    }
}

/// Frames the session sends to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Configure(StreamOptions),
    Audio(Vec<u8>),
    KeepAlive,
    CloseStream,
}

impl ClientFrame {
    /// JSON text for control frames; `None` for audio.
    pub fn control_json(&self) -> Option<String> {
        match self {
            Self::Configure(options) => serde_json::to_string(options).ok(),
            Self::KeepAlive => Some(r#"{"type":"KeepAlive"}"#.to_string()),
            Self::CloseStream => Some(r#"{"type":"CloseStream"}"#.to_string()),
            Self::Audio(_) => None,
        }
    }
}

/// One recognized fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
    /// The backend's own end-of-utterance flag.
    pub speech_final: bool,
}

impl TranscriptFragment {
    pub fn interim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: false,
            speech_final: false,
        }
    }

    pub fn final_fragment(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
            speech_final: false,
        }
    }
}

/// Messages the session acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Transcript(TranscriptFragment),
    UtteranceEnd,
}

/// What a backend link reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(BackendMessage),
    Failed(SessionError),
    Closed,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    #[serde(default)]
    alternatives: Vec<RawAlternative>,
}

#[derive(Debug, Deserialize)]
struct RawAlternative {
    transcript: String,
}

/// Parse one server text frame.
///
/// Returns `Ok(None)` for messages the session does not act on (metadata,
/// speech-started events). A `Results` message without a transcript is
/// malformed and reported as `BackendUnavailable`.
pub fn parse_server_message(text: &str) -> SessionResult<Option<BackendMessage>> {
    let raw: RawMessage = serde_json::from_str(text)?;

    match raw.kind.as_deref() {
        Some("UtteranceEnd") => return Ok(Some(BackendMessage::UtteranceEnd)),
        Some("Metadata") | Some("SpeechStarted") => return Ok(None),
        Some("Results") | None => {}
        Some(other) => {
            debug!(kind = %other, "Ignoring transcription message");
            return Ok(None);
        }
    }

    let channel = raw.channel.ok_or_else(|| {
        SessionError::BackendUnavailable("Results message without channel".into())
    })?;
    let alternative = channel.alternatives.into_iter().next().ok_or_else(|| {
        SessionError::BackendUnavailable("Results message without alternatives".into())
    })?;

    Ok(Some(BackendMessage::Transcript(TranscriptFragment {
        text: alternative.transcript,
        is_final: raw.is_final,
        speech_final: raw.speech_final,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_result() {
        let json = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "I led the migration.", "confidence": 0.98}]},
            "is_final": true,
            "speech_final": false
        }"#;
        let msg = parse_server_message(json).unwrap();
        assert_eq!(
            msg,
            Some(BackendMessage::Transcript(TranscriptFragment {
                text: "I led the migration.".into(),
                is_final: true,
                speech_final: false,
            }))
        );
    }

    #[test]
    fn test_parse_untyped_result_defaults_flags() {
        let json = r#"{"channel": {"alternatives": [{"transcript": "hello"}]}}"#;
        let msg = parse_server_message(json).unwrap();
        assert_eq!(
            msg,
            Some(BackendMessage::Transcript(TranscriptFragment::interim("hello")))
        );
    }

    #[test]
    fn test_parse_utterance_end_and_metadata() {
        assert_eq!(
            parse_server_message(r#"{"type":"UtteranceEnd","last_word_end":2.1}"#).unwrap(),
            Some(BackendMessage::UtteranceEnd)
        );
        assert_eq!(
            parse_server_message(r#"{"type":"Metadata","request_id":"x"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_malformed_results_are_backend_unavailable() {
        let err = parse_server_message(r#"{"type":"Results","channel":{"alternatives":[]}}"#)
            .unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));

        let err = parse_server_message("not json").unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            ClientFrame::KeepAlive.control_json().as_deref(),
            Some(r#"{"type":"KeepAlive"}"#)
        );
        assert_eq!(ClientFrame::Audio(vec![1, 2]).control_json(), None);

        let options = StreamOptions::from_settings(&TranscriptionSettings::default());
        let handshake = ClientFrame::Configure(options.clone()).control_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&handshake).unwrap();
        assert_eq!(value["encoding"], "linear16");
        assert_eq!(value["punctuate"], true);
        assert_eq!(value["language"], "en-US");
        assert!(options.query_string().contains("utterance_end_ms=1000"));
    }
}
