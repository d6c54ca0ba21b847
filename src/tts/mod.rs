//! Speech synthesis and playback.
//!
//! Provides a common `SpeechSynthesizer` trait with an ElevenLabs
//! implementation, MP3 decoding, and single-utterance playback.

pub mod elevenlabs;
pub mod mp3_decode;
pub mod playback;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;

pub use elevenlabs::ElevenLabsTts;
pub use playback::{AudioOutput, PlaybackOutcome, RodioOutput, SpeechPlayback};

/// Decoded mono PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// One entry of the voice catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
}

/// Common trait for synthesis backends (dyn-compatible).
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, with `voice_id` overriding the default voice.
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice_id: Option<&'a str>,
    ) -> BoxFuture<'a, SessionResult<SynthesizedAudio>>;

    /// Voices available to this account.
    fn list_voices(&self) -> BoxFuture<'_, SessionResult<Vec<VoiceInfo>>>;

    /// Display name for this engine (e.g. "ElevenLabs (Bella)").
    fn name(&self) -> String;
}
