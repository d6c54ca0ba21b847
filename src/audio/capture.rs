//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device, captures audio at its native
//! sample rate, down-mixes and resamples to the transcription rate, and hands
//! linear16 chunks to the transcription session at a fixed cadence.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ring_buffer::{sample_queue, SampleReader};
use super::{AudioSource, MicrophoneStream};
use crate::error::{SessionError, SessionResult};

/// Chunks buffered between the pump and the socket writer.
const CHUNK_QUEUE: usize = 32;

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Wrapper to make `cpal::Stream` Send.
///
/// The stream is only held to keep capture alive and dropped to release the
/// device; it is never touched from another thread.
struct SendStream(#[allow(dead_code)] Stream);

// SAFETY: the wrapped stream is never accessed after creation, only dropped.
unsafe impl Send for SendStream {}

/// Keeps the device open and the pump running until dropped.
struct CaptureGuard {
    _stream: SendStream,
    _pump: tokio_util::sync::DropGuard,
}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> SessionResult<CaptureConfig> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SessionError::PermissionDenied(format!("Input device not found: {name}")))?
    } else {
        host.default_input_device().ok_or_else(|| {
            SessionError::PermissionDenied("No default input device available".into())
        })?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device.default_input_config()?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate` (mono).
pub(crate) fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
pub(crate) fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Encode f32 samples as little-endian 16-bit PCM (`linear16`).
pub fn to_linear16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let pcm = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&pcm.to_le_bytes());
    }
    out
}

/// The system microphone.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    device_name: Option<String>,
    target_rate: u32,
    chunk_interval: Duration,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>, target_rate: u32, chunk_interval: Duration) -> Self {
        Self {
            device_name,
            target_rate,
            chunk_interval,
        }
    }
}

impl AudioSource for CpalMicrophone {
    fn is_available(&self) -> bool {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map(|mut devs| devs.any(|d| d.name().map(|n| &n == name).unwrap_or(false)))
                .unwrap_or(false),
            None => host.default_input_device().is_some(),
        }
    }

    fn open(&self) -> SessionResult<MicrophoneStream> {
        let cfg = resolve_device(self.device_name.as_deref())?;
        let native_rate = cfg.native_rate;
        let channels = cfg.stream_config.channels;
        let target_rate = self.target_rate;

        info!(
            native_rate,
            channels,
            target_rate,
            "Input device config (resampling to mono if needed)"
        );

        let (mut writer, reader) = sample_queue(target_rate, None);

        let stream = cfg.device.build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let resampled = resample_linear(&mono, native_rate, target_rate);
                writer.write(&resampled);
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("Audio capture started");

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        let cancel = CancellationToken::new();
        tokio::spawn(pump_chunks(reader, tx, self.chunk_interval, cancel.clone()));

        Ok(MicrophoneStream::new(
            rx,
            CaptureGuard {
                _stream: SendStream(stream),
                _pump: cancel.drop_guard(),
            },
        ))
    }
}

/// Drain captured samples every `interval` and forward them as linear16.
async fn pump_chunks(
    mut reader: SampleReader,
    tx: mpsc::Sender<Vec<u8>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let dropped = reader.take_dropped();
                if dropped > 0 {
                    warn!(dropped, "Capture queue overflowed, audio lost");
                }
                let samples = reader.drain();
                if samples.is_empty() {
                    continue;
                }
                if tx.send(to_linear16(&samples)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Microphone pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let input = vec![1.0, 2.0, 3.0];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn test_resample_downsample() {
        let input: Vec<f32> = (0..48).map(|i| i as f32).collect();
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 16);
    }

    #[test]
    fn test_to_mono_averages_frames() {
        let stereo = [0.2, 0.4, -1.0, 1.0];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }

    #[test]
    fn test_linear16_encoding() {
        let bytes = to_linear16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -32767);
        // Clamped
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), 32767);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_forwards_chunks_and_stops_on_cancel() {
        let (mut writer, reader) = sample_queue(64, Some(1));
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        writer.write(&[0.5; 10]);

        let handle = tokio::spawn(pump_chunks(
            reader,
            tx,
            Duration::from_millis(100),
            cancel.clone(),
        ));

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.len(), 20);

        cancel.cancel();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
