//! IPC protocol types for the host process.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::dialogue::CandidateProfile;
use crate::session::{SessionEvent, SessionPhase, Speaker};
use crate::tts::VoiceInfo;

// ---------------------------------------------------------------------------
// Events: core -> host (stdout)
// ---------------------------------------------------------------------------

/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum InterviewEvent {
    Starting {},
    Ready {
        transcription: bool,
        completion: bool,
        synthesis: bool,
        #[serde(rename = "mediaRoom")]
        media_room: bool,
    },
    PhaseChange { phase: SessionPhase },
    LiveTranscript {
        text: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
    },
    Utterance { speaker: Speaker, text: String },
    Notice { message: String },
    Error { message: String },
    SessionEnded { summary: String },
    Voices { voices: Vec<VoiceInfo> },
    AudioDevices {
        input: Vec<AudioDeviceInfo>,
        output: Vec<AudioDeviceInfo>,
    },
    Pong {},
    Stopping {},
}

impl From<SessionEvent> for InterviewEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::PhaseChanged(phase) => Self::PhaseChange { phase },
            SessionEvent::LiveTranscript { text, is_final } => Self::LiveTranscript { text, is_final },
            SessionEvent::Utterance { speaker, text } => Self::Utterance { speaker, text },
            SessionEvent::Notice(message) => Self::Notice { message },
            SessionEvent::Ended { summary } => Self::SessionEnded { summary },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

impl AudioDeviceInfo {
    pub fn enumerate(names: Vec<String>) -> Vec<Self> {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Self { id: i as i32, name })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands: host -> core (stdin)
// ---------------------------------------------------------------------------

/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum InterviewCommand {
    StartSession {
        #[serde(default)]
        profile: CandidateProfile,
    },
    ToggleListening {},
    SetAutoListen {
        enabled: bool,
    },
    EndSession {},
    ListVoices {},
    ListAudioDevices {},
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event = InterviewEvent::from(SessionEvent::PhaseChanged(SessionPhase::Listening));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "phase_change", "data": {"phase": "listening"}})
        );

        let event = InterviewEvent::from(SessionEvent::LiveTranscript {
            text: "We sharded".into(),
            is_final: false,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "live_transcript", "data": {"text": "We sharded", "isFinal": false}})
        );

        let event = InterviewEvent::from(SessionEvent::Utterance {
            speaker: Speaker::Assistant,
            text: "Why Postgres?".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "utterance", "data": {"speaker": "assistant", "text": "Why Postgres?"}})
        );

        assert_eq!(
            serde_json::to_value(&InterviewEvent::Pong {}).unwrap(),
            json!({"event": "pong", "data": {}})
        );
    }

    #[test]
    fn test_session_ended_event() {
        let event = InterviewEvent::from(SessionEvent::Ended {
            summary: "Solid.".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "session_ended", "data": {"summary": "Solid."}})
        );
    }

    #[test]
    fn test_start_session_command() {
        let cmd: InterviewCommand = serde_json::from_value(json!({
            "command": "start_session",
            "profile": {
                "name": "Ada",
                "position": "Backend Engineer",
                "experience": "5 years",
                "voiceId": "voice-42"
            }
        }))
        .unwrap();
        match cmd {
            InterviewCommand::StartSession { profile } => {
                assert_eq!(profile.name, "Ada");
                assert_eq!(profile.additional_info, "");
                assert_eq!(profile.voice_id.as_deref(), Some("voice-42"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_simple_commands() {
        let cmd: InterviewCommand =
            serde_json::from_str(r#"{"command":"set_auto_listen","enabled":false}"#).unwrap();
        assert!(matches!(cmd, InterviewCommand::SetAutoListen { enabled: false }));

        let cmd: InterviewCommand = serde_json::from_str(r#"{"command":"toggle_listening"}"#).unwrap();
        assert!(matches!(cmd, InterviewCommand::ToggleListening {}));

        assert!(serde_json::from_str::<InterviewCommand>(r#"{"command":"dance"}"#).is_err());
    }

    #[test]
    fn test_device_ids_follow_order() {
        let devices = AudioDeviceInfo::enumerate(vec!["Built-in".into(), "USB".into()]);
        assert_eq!(devices[1], AudioDeviceInfo { id: 1, name: "USB".into() });
    }
}
