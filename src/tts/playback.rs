//! One-utterance-at-a-time speech playback.
//!
//! `SpeechPlayback::speak` synthesizes text and plays it on a spawned task.
//! Each utterance has its own cancellation token; a new `speak` or `stop`
//! cancels the previous one. The completion callback fires exactly once per
//! utterance through `CompletionGuard`, including when the task is aborted.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rodio::{OutputStream, Sink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SpeechSynthesizer, SynthesizedAudio};
use crate::error::{SessionError, SessionResult};

/// How an utterance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Cancelled,
    Failed(String),
    /// Nothing to say, or no synthesizer configured.
    Skipped,
}

/// Somewhere to play decoded audio.
pub trait AudioOutput: Send + Sync {
    /// Play until done (`Ok(true)`) or until `cancel` fires (`Ok(false)`).
    fn play(&self, audio: SynthesizedAudio, cancel: CancellationToken)
        -> BoxFuture<'_, SessionResult<bool>>;
}

type CompletionFn = Box<dyn FnOnce(PlaybackOutcome) + Send>;

/// Fires the completion callback exactly once.
///
/// If the guard is dropped without `complete`, the callback sees `Cancelled`.
pub struct CompletionGuard {
    callback: Option<CompletionFn>,
}

impl CompletionGuard {
    pub fn new(callback: impl FnOnce(PlaybackOutcome) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn complete(mut self, outcome: PlaybackOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(PlaybackOutcome::Cancelled);
        }
    }
}

struct CurrentUtterance {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SpeechPlayback {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    output: Arc<dyn AudioOutput>,
    voice_id: Option<String>,
    current: Option<CurrentUtterance>,
}

impl SpeechPlayback {
    pub fn new(
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            synthesizer,
            output,
            voice_id: None,
            current: None,
        }
    }

    /// Voice used for later utterances; `None` means the synthesizer default.
    pub fn set_voice(&mut self, voice_id: Option<String>) {
        self.voice_id = voice_id.filter(|v| !v.is_empty());
    }

    pub fn has_synthesizer(&self) -> bool {
        self.synthesizer.is_some()
    }

    /// Cancel whatever is playing, then synthesize and play `text`.
    pub fn speak(
        &mut self,
        text: &str,
        on_complete: impl FnOnce(PlaybackOutcome) + Send + 'static,
    ) {
        self.stop();
        let guard = CompletionGuard::new(on_complete);

        let text = text.trim().to_string();
        let synthesizer = match &self.synthesizer {
            Some(s) if !text.is_empty() => s.clone(),
            _ => {
                debug!("Nothing to synthesize, skipping speech");
                guard.complete(PlaybackOutcome::Skipped);
                return;
            }
        };

        let output = self.output.clone();
        let voice_id = self.voice_id.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => PlaybackOutcome::Cancelled,
                result = synthesize_and_play(synthesizer, output, &text, voice_id.as_deref(), token.clone()) => {
                    match result {
                        Ok(true) => PlaybackOutcome::Finished,
                        Ok(false) => PlaybackOutcome::Cancelled,
                        Err(e) => {
                            warn!("Speech playback failed: {}", e);
                            PlaybackOutcome::Failed(e.to_string())
                        }
                    }
                }
            };
            debug!(?outcome, "Utterance playback ended");
            guard.complete(outcome);
        });

        self.current = Some(CurrentUtterance { cancel, task });
    }

    /// Halt playback immediately. Safe when nothing is playing.
    pub fn stop(&mut self) {
        if let Some(current) = self.current.take() {
            if !current.task.is_finished() {
                info!("Stopping speech playback");
            }
            current.cancel.cancel();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| !c.task.is_finished())
    }

    /// Voice catalogue of the configured synthesizer.
    pub async fn list_voices(&self) -> SessionResult<Vec<super::VoiceInfo>> {
        match &self.synthesizer {
            Some(s) => s.list_voices().await,
            None => Err(SessionError::BackendUnavailable(
                "No speech synthesizer configured".into(),
            )),
        }
    }
}

impl Drop for SpeechPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn synthesize_and_play(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    text: &str,
    voice_id: Option<&str>,
    cancel: CancellationToken,
) -> SessionResult<bool> {
    let audio = synthesizer.synthesize(text, voice_id).await?;
    if audio.samples.is_empty() {
        debug!("Synthesizer produced no audio samples");
        return Ok(true);
    }
    output.play(audio, cancel).await
}

/// The system speaker via rodio.
#[derive(Debug, Clone)]
pub struct RodioOutput {
    device_name: Option<String>,
    volume: f32,
}

impl RodioOutput {
    pub fn new(device_name: Option<String>, volume: f32) -> Self {
        Self {
            device_name,
            volume,
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play(
        &self,
        audio: SynthesizedAudio,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, SessionResult<bool>> {
        let device_name = self.device_name.clone();
        let volume = self.volume;
        async move {
            tokio::task::spawn_blocking(move || {
                play_samples_rodio(audio, volume, device_name.as_deref(), &cancel)
            })
            .await
            .map_err(|e| SessionError::Playback(format!("Playback task failed: {}", e)))?
        }
        .boxed()
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> SessionResult<(OutputStream, rodio::OutputStreamHandle)> {
    let default = || {
        OutputStream::try_default()
            .map_err(|e| SessionError::Playback(format!("No audio output device available: {}", e)))
    };

    let Some(name) = output_device_name else {
        return default();
    };

    let host = cpal::default_host();
    let device = host
        .output_devices()
        .map_err(|e| SessionError::Playback(format!("Failed to enumerate output devices: {}", e)))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false));

    match device {
        Some(dev) => {
            info!(device = %name, "Using configured output device");
            OutputStream::try_from_device(&dev).map_err(|e| {
                SessionError::Playback(format!("Failed to open output device '{}': {}", name, e))
            })
        }
        None => {
            warn!(device = %name, "Configured output device not found, falling back to default");
            default()
        }
    }
}

/// Blocking: play samples and poll for completion or cancellation.
fn play_samples_rodio(
    audio: SynthesizedAudio,
    volume: f32,
    output_device_name: Option<&str>,
    cancel: &CancellationToken,
) -> SessionResult<bool> {
    let (_stream, stream_handle) = open_output_stream(output_device_name)?;

    let sink = Sink::try_new(&stream_handle)
        .map_err(|e| SessionError::Playback(format!("Failed to create audio sink: {}", e)))?;
    sink.set_volume(volume.clamp(0.0, 2.0));
    sink.append(rodio::buffer::SamplesBuffer::new(
        1,
        audio.sample_rate,
        audio.samples,
    ));

    while !sink.empty() {
        if cancel.is_cancelled() {
            info!("Speech playback cancelled");
            sink.stop();
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    sink.sleep_until_end();

    Ok(true)
}
