//! Streaming transcription session.
//!
//! Each successful `start` creates an activation: one microphone stream, one
//! backend link and one task that owns the finalizer, the silence timer and
//! the keep-alive. Everything an activation reports carries its id, so a
//! late event from an old activation can be told apart from the current one.

pub mod deepgram;
pub mod finalizer;
pub mod protocol;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioSource, MicrophoneStream};
use crate::config::TranscriptionSettings;
use crate::error::{SessionError, SessionResult};

pub use deepgram::DeepgramBackend;
pub use finalizer::{SilenceCheck, UtteranceFinalizer};
pub use protocol::{BackendMessage, ClientFrame, LinkEvent, StreamOptions, TranscriptFragment};

/// Identifies one listening activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(pub u64);

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why an activation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    Stopped,
    BackendClosed,
    BackendFailed(SessionError),
    MicrophoneLost,
}

/// Channels to a connected backend.
pub struct BackendLink {
    pub frames: mpsc::Sender<ClientFrame>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// A streaming speech-to-text service.
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a stream configured with `options`.
    fn connect(&self, options: &StreamOptions) -> BoxFuture<'_, SessionResult<BackendLink>>;
}

/// Receives what an activation produces.
///
/// Callbacks run on the activation task and must not block.
pub trait TranscriptListener: Send + 'static {
    /// The finished utterance. Called at most once per activation.
    fn on_utterance(&mut self, activation: ActivationId, text: String);

    /// Every nonempty fragment, for live preview.
    fn on_live_update(&mut self, _activation: ActivationId, _text: &str, _is_final: bool) {}

    /// The activation is over. Not called after a `stop()` the caller made.
    fn on_ended(&mut self, _activation: ActivationId, _reason: EndReason) {}
}

struct ActiveListening {
    id: ActivationId,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct TranscriptionSession {
    settings: TranscriptionSettings,
    microphone: Arc<dyn AudioSource>,
    backend: Option<Arc<dyn TranscriptionBackend>>,
    next_activation: u64,
    speaking: Arc<AtomicBool>,
    active: Option<ActiveListening>,
}

impl TranscriptionSession {
    pub fn new(
        settings: TranscriptionSettings,
        microphone: Arc<dyn AudioSource>,
        backend: Option<Arc<dyn TranscriptionBackend>>,
    ) -> Self {
        Self {
            settings,
            microphone,
            backend,
            next_activation: 1,
            speaking: Arc::new(AtomicBool::new(false)),
            active: None,
        }
    }

    /// A backend is configured and an input device is present.
    pub fn is_supported(&self) -> bool {
        self.backend.is_some() && self.microphone.is_available()
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.running.load(Ordering::SeqCst))
    }

    /// Speech has been heard in the current turn.
    pub fn is_speaking(&self) -> bool {
        self.is_active() && self.speaking.load(Ordering::SeqCst)
    }

    pub fn current_activation(&self) -> Option<ActivationId> {
        self.active
            .as_ref()
            .filter(|a| a.running.load(Ordering::SeqCst))
            .map(|a| a.id)
    }

    /// Open the microphone and the backend stream and begin an activation.
    pub async fn start(
        &mut self,
        listener: Box<dyn TranscriptListener>,
    ) -> SessionResult<ActivationId> {
        let backend = self.backend.clone().ok_or_else(|| {
            SessionError::Unsupported("No transcription backend configured".into())
        })?;
        if self.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        // A previous activation ended on its own; its task is done or finishing.
        if let Some(old) = self.active.take() {
            let _ = old.task.await;
        }

        let microphone = self.microphone.open()?;
        let options = StreamOptions::from_settings(&self.settings);
        let link = backend.connect(&options).await?;
        link.frames
            .send(ClientFrame::Configure(options))
            .await
            .map_err(|_| SessionError::StreamError("Stream closed during handshake".into()))?;

        let id = ActivationId(self.next_activation);
        self.next_activation += 1;

        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(true));
        self.speaking.store(false, Ordering::SeqCst);

        let activation = Activation {
            id,
            microphone,
            link,
            listener,
            finalizer: UtteranceFinalizer::new(self.settings.silence_threshold()),
            cancel: cancel.clone(),
            running: running.clone(),
            speaking: self.speaking.clone(),
            silence_check: self.settings.silence_check_interval(),
            keep_alive: self.settings.keep_alive_interval(),
        };
        let task = tokio::spawn(activation.run());

        info!(activation = %id, backend = backend.name(), "Listening started");
        self.active = Some(ActiveListening {
            id,
            cancel,
            running,
            task,
        });
        Ok(id)
    }

    /// Flush pending text, release the microphone and close the stream.
    ///
    /// Returns false when nothing was listening. When this returns, the
    /// activation has delivered its last callback.
    pub async fn stop(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        let was_running = active.running.load(Ordering::SeqCst);
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            warn!(activation = %active.id, "Activation task failed: {}", e);
        }
        if was_running {
            info!(activation = %active.id, "Listening stopped");
        }
        was_running
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

/// State owned by one activation task.
struct Activation {
    id: ActivationId,
    microphone: MicrophoneStream,
    link: BackendLink,
    listener: Box<dyn TranscriptListener>,
    finalizer: UtteranceFinalizer,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    silence_check: Duration,
    keep_alive: Duration,
}

impl Activation {
    async fn run(mut self) {
        let mut keep_alive = tokio::time::interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let silence = tokio::time::sleep(self.silence_check);
        tokio::pin!(silence);
        let mut silence_armed = false;

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break EndReason::Stopped,

                event = self.link.events.recv() => match event {
                    Some(LinkEvent::Message(msg)) => {
                        if self.handle_message(msg) {
                            silence.as_mut().reset(Instant::now() + self.silence_check);
                            silence_armed = true;
                        }
                    }
                    Some(LinkEvent::Failed(err)) => {
                        warn!(activation = %self.id, "Transcription stream failed: {}", err);
                        break EndReason::BackendFailed(err);
                    }
                    Some(LinkEvent::Closed) | None => break EndReason::BackendClosed,
                },

                _ = &mut silence, if silence_armed => {
                    match self.finalizer.on_silence_tick(Instant::now()) {
                        SilenceCheck::Finalized(text) => {
                            silence_armed = false;
                            self.emit(text);
                        }
                        SilenceCheck::Waiting => {
                            silence.as_mut().reset(Instant::now() + self.silence_check);
                        }
                        SilenceCheck::Idle => silence_armed = false,
                    }
                }

                chunk = self.microphone.next_chunk() => match chunk {
                    Some(bytes) => {
                        if !self.send(ClientFrame::Audio(bytes)) {
                            break EndReason::BackendClosed;
                        }
                    }
                    None => break EndReason::MicrophoneLost,
                },

                _ = keep_alive.tick() => {
                    debug!(activation = %self.id, "Sending keep-alive");
                    if !self.send(ClientFrame::KeepAlive) {
                        break EndReason::BackendClosed;
                    }
                }
            }
        };

        self.finish(reason);
    }

    /// Returns true when the silence timer should be (re)armed.
    fn handle_message(&mut self, msg: BackendMessage) -> bool {
        match msg {
            BackendMessage::Transcript(fragment) => {
                let text = fragment.text.trim();
                if !text.is_empty() && !self.finalizer.has_emitted() {
                    self.listener.on_live_update(self.id, text, fragment.is_final);
                }
                if let Some(utterance) = self.finalizer.on_fragment(&fragment, Instant::now()) {
                    self.emit(utterance);
                    return false;
                }
                self.speaking
                    .store(self.finalizer.is_speaking(), Ordering::SeqCst);
                fragment.is_final && self.finalizer.has_pending()
            }
            BackendMessage::UtteranceEnd => {
                if let Some(utterance) = self.finalizer.on_utterance_end() {
                    self.emit(utterance);
                }
                false
            }
        }
    }

    fn emit(&mut self, text: String) {
        self.speaking.store(false, Ordering::SeqCst);
        info!(activation = %self.id, chars = text.len(), "Utterance finalized");
        self.listener.on_utterance(self.id, text);
    }

    /// Queue a frame without waiting. Returns false once the link is gone.
    fn send(&self, frame: ClientFrame) -> bool {
        match self.link.frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(activation = %self.id, "Transcription stream backed up, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn finish(mut self, reason: EndReason) {
        if let Some(text) = self.finalizer.flush() {
            self.emit(text);
        }
        self.running.store(false, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);

        let Activation {
            id,
            microphone,
            link,
            mut listener,
            ..
        } = self;

        drop(microphone);
        let _ = link.frames.try_send(ClientFrame::CloseStream);
        drop(link);

        debug!(activation = %id, ?reason, "Activation ended");
        if reason != EndReason::Stopped {
            listener.on_ended(id, reason);
        }
    }
}
