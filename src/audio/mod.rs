//! Microphone capture and the audio source seam used by transcription.

pub mod capture;
pub mod ring_buffer;

use tokio::sync::mpsc;

use crate::error::SessionResult;

pub use capture::{list_devices, list_output_devices, to_linear16, CpalMicrophone};

/// Something that can hand out a live microphone stream.
pub trait AudioSource: Send + Sync {
    /// Whether an input device is present at all.
    fn is_available(&self) -> bool;

    /// Acquire the device. Fails with `PermissionDenied` when it cannot.
    fn open(&self) -> SessionResult<MicrophoneStream>;
}

/// A live capture: linear16 chunks plus whatever keeps the device open.
///
/// Dropping the stream releases the device.
pub struct MicrophoneStream {
    chunks: mpsc::Receiver<Vec<u8>>,
    _release: Box<dyn Send>,
}

impl MicrophoneStream {
    pub fn new(chunks: mpsc::Receiver<Vec<u8>>, release: impl Send + 'static) -> Self {
        Self {
            chunks,
            _release: Box::new(release),
        }
    }

    /// Next captured chunk, or `None` once the device has gone away.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.recv().await
    }
}
