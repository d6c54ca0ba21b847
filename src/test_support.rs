//! In-memory stand-ins for the microphone and the remote services.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioSource, MicrophoneStream};
use crate::dialogue::{ChatMessage, CompletionBackend};
use crate::error::{SessionError, SessionResult};
use crate::media_room::{MediaRoom, RoomConnection};
use crate::transcription::{
    ActivationId, BackendLink, ClientFrame, EndReason, LinkEvent, StreamOptions, TranscriptListener,
    TranscriptionBackend,
};
use crate::tts::{AudioOutput, SpeechSynthesizer, SynthesizedAudio, VoiceInfo};

struct ReleaseCounter(Arc<AtomicUsize>);

impl Drop for ReleaseCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockMicrophone {
    available: bool,
    denied: bool,
    opened: AtomicUsize,
    released: Arc<AtomicUsize>,
    // Senders stay alive so a stream only ends when the activation drops it.
    senders: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

impl MockMicrophone {
    pub fn new() -> Self {
        Self {
            available: true,
            denied: false,
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::new()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Feed a chunk to the most recently opened stream.
    pub async fn push_chunk(&self, chunk: Vec<u8>) {
        let sender = self.senders.lock().unwrap().last().cloned();
        if let Some(sender) = sender {
            let _ = sender.send(chunk).await;
        }
    }
}

impl AudioSource for MockMicrophone {
    fn is_available(&self) -> bool {
        self.available
    }

    fn open(&self) -> SessionResult<MicrophoneStream> {
        if self.denied {
            return Err(SessionError::PermissionDenied("access refused".into()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push(tx);
        Ok(MicrophoneStream::new(rx, ReleaseCounter(self.released.clone())))
    }
}

/// The far side of a mock transcription link.
pub struct MockPeer {
    pub frames: mpsc::Receiver<ClientFrame>,
    pub events: mpsc::Sender<LinkEvent>,
}

pub struct MockTranscriptionBackend {
    failing: bool,
    connects: AtomicUsize,
    peers: Mutex<VecDeque<MockPeer>>,
}

impl MockTranscriptionBackend {
    pub fn new() -> Self {
        Self {
            failing: false,
            connects: AtomicUsize::new(0),
            peers: Mutex::new(VecDeque::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Oldest link not yet claimed by the test.
    pub fn take_peer(&self) -> Option<MockPeer> {
        self.peers.lock().unwrap().pop_front()
    }
}

impl TranscriptionBackend for MockTranscriptionBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(&self, _options: &StreamOptions) -> BoxFuture<'_, SessionResult<BackendLink>> {
        async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(SessionError::BackendUnavailable("connection refused".into()));
            }
            let (frames_tx, frames_rx) = mpsc::channel(64);
            let (events_tx, events_rx) = mpsc::channel(64);
            self.peers.lock().unwrap().push_back(MockPeer {
                frames: frames_rx,
                events: events_tx,
            });
            Ok(BackendLink {
                frames: frames_tx,
                events: events_rx,
            })
        }
        .boxed()
    }
}

#[derive(Clone, Default)]
pub struct RecordingListener {
    utterances: Arc<Mutex<Vec<(ActivationId, String)>>>,
    live: Arc<Mutex<Vec<(String, bool)>>>,
    ended: Arc<Mutex<Vec<(ActivationId, EndReason)>>>,
}

impl RecordingListener {
    pub fn utterances(&self) -> Vec<(ActivationId, String)> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn utterance_texts(&self) -> Vec<String> {
        self.utterances().into_iter().map(|(_, t)| t).collect()
    }

    pub fn live_updates(&self) -> Vec<(String, bool)> {
        self.live.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<(ActivationId, EndReason)> {
        self.ended.lock().unwrap().clone()
    }
}

impl TranscriptListener for RecordingListener {
    fn on_utterance(&mut self, activation: ActivationId, text: String) {
        self.utterances.lock().unwrap().push((activation, text));
    }

    fn on_live_update(&mut self, _activation: ActivationId, text: &str, is_final: bool) {
        self.live.lock().unwrap().push((text.to_string(), is_final));
    }

    fn on_ended(&mut self, activation: ActivationId, reason: EndReason) {
        self.ended.lock().unwrap().push((activation, reason));
    }
}

/// Replies in order, then fails.
pub struct MockCompletion {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockCompletion {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::replying(&[])
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionBackend for MockCompletion {
    fn complete<'a>(&'a self, messages: &'a [ChatMessage]) -> BoxFuture<'a, SessionResult<String>> {
        async move {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SessionError::BackendUnavailable("HTTP 503".into()))
        }
        .boxed()
    }
}

pub struct MockSynth {
    failing: bool,
    voices: Mutex<Vec<Option<String>>>,
}

impl MockSynth {
    pub fn new() -> Self {
        Self {
            failing: false,
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    pub fn voices_used(&self) -> Vec<Option<String>> {
        self.voices.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for MockSynth {
    fn synthesize<'a>(
        &'a self,
        _text: &'a str,
        voice_id: Option<&'a str>,
    ) -> BoxFuture<'a, SessionResult<SynthesizedAudio>> {
        async move {
            self.voices.lock().unwrap().push(voice_id.map(str::to_string));
            if self.failing {
                return Err(SessionError::BackendUnavailable("quota exceeded".into()));
            }
            Ok(SynthesizedAudio {
                samples: vec![0.0; 1600],
                sample_rate: 16_000,
            })
        }
        .boxed()
    }

    fn list_voices(&self) -> BoxFuture<'_, SessionResult<Vec<VoiceInfo>>> {
        async move {
            Ok(vec![VoiceInfo {
                id: "voice-1".into(),
                name: "Rachel".into(),
            }])
        }
        .boxed()
    }

    fn name(&self) -> String {
        "Mock".into()
    }
}

/// Plays for a fixed duration.
pub struct MockOutput {
    duration: Duration,
    completed: AtomicUsize,
}

impl MockOutput {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl AudioOutput for MockOutput {
    fn play(
        &self,
        _audio: SynthesizedAudio,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, SessionResult<bool>> {
        async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(false),
                _ = tokio::time::sleep(self.duration) => {
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            }
        }
        .boxed()
    }
}

pub struct MockMediaRoom {
    failing: bool,
    joined: Mutex<Vec<String>>,
    connections: Mutex<Vec<CancellationToken>>,
}

impl MockMediaRoom {
    pub fn new() -> Self {
        Self {
            failing: false,
            joined: Mutex::new(Vec::new()),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// Identities that joined.
    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    /// Every joined connection has been closed.
    pub fn disconnected(&self) -> bool {
        let connections = self.connections.lock().unwrap();
        !connections.is_empty() && connections.iter().all(|c| c.is_cancelled())
    }
}

impl MediaRoom for MockMediaRoom {
    fn join<'a>(
        &'a self,
        room: &'a str,
        identity: &'a str,
    ) -> BoxFuture<'a, SessionResult<RoomConnection>> {
        async move {
            if self.failing {
                return Err(SessionError::BackendUnavailable("signalling refused".into()));
            }
            self.joined.lock().unwrap().push(identity.to_string());
            let cancel = CancellationToken::new();
            self.connections.lock().unwrap().push(cancel.clone());
            Ok(RoomConnection::new(room.to_string(), cancel, None))
        }
        .boxed()
    }
}
