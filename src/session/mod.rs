//! Interview session orchestration.
//!
//! One actor task owns the transcription session, the dialogue controller,
//! speech playback and the optional media room. Handle commands and
//! internal events (finalized utterances, replies, playback completion,
//! timers) arrive over channels, so turn-taking logic never runs
//! concurrently with itself.
//!
//! Turn cycle: Listening -> Processing -> Speaking -> (delay) -> Listening.

pub mod phase;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::{AudioSource, CpalMicrophone};
use crate::config::{InterviewConfig, SessionSettings};
use crate::dialogue::{
    CandidateProfile, CompletionBackend, DialogueController, OpenAiCompletion, SUMMARY_FALLBACK,
};
use crate::error::SessionResult;
use crate::media_room::{room_name, LiveKitRoom, MediaRoom, RoomConnection};
use crate::transcription::{
    ActivationId, DeepgramBackend, EndReason, TranscriptListener, TranscriptionBackend,
    TranscriptionSession,
};
use crate::tts::{AudioOutput, ElevenLabsTts, PlaybackOutcome, RodioOutput, SpeechPlayback, SpeechSynthesizer};

pub use phase::{GateDecision, PhaseMachine, SessionPhase, TurnGate, TurnSource};

/// Stands in for the candidate when transcription is unavailable.
pub const SIMULATED_TRANSCRIPT: &str = "I have 5 years of experience working with React and Next.js. \
I've built several enterprise applications and led teams of frontend developers.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// What the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// Unconfirmed or confirmed fragment of the current answer.
    LiveTranscript { text: String, is_final: bool },
    /// A line of the visible transcript.
    Utterance { speaker: Speaker, text: String },
    /// Something degraded; the interview continues.
    Notice(String),
    Ended { summary: String },
}

/// Backend clients the session runs on.
pub struct SessionServices {
    pub microphone: Arc<dyn AudioSource>,
    pub transcription: Option<Arc<dyn TranscriptionBackend>>,
    pub completion: Option<Arc<dyn CompletionBackend>>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub output: Arc<dyn AudioOutput>,
    pub media_room: Option<Arc<dyn MediaRoom>>,
}

impl SessionServices {
    /// Real clients for whatever the config has credentials for.
    pub fn from_config(config: &InterviewConfig) -> SessionResult<Self> {
        let t = &config.transcription;
        let microphone = Arc::new(CpalMicrophone::new(
            t.input_device.clone(),
            t.sample_rate,
            t.chunk_duration(),
        ));

        let transcription = DeepgramBackend::from_settings(t)
            .map(|b| Arc::new(b) as Arc<dyn TranscriptionBackend>);
        let completion = OpenAiCompletion::from_settings(&config.completion)?
            .map(|c| Arc::new(c) as Arc<dyn CompletionBackend>);
        let synthesizer = ElevenLabsTts::from_settings(&config.speech)
            .map(|s| Arc::new(s) as Arc<dyn SpeechSynthesizer>);
        let media_room = LiveKitRoom::from_settings(&config.media_room)
            .map(|r| Arc::new(r) as Arc<dyn MediaRoom>);

        info!(
            transcription = transcription.is_some(),
            completion = completion.is_some(),
            synthesis = synthesizer.is_some(),
            media_room = media_room.is_some(),
            "Session services configured"
        );

        Ok(Self {
            microphone,
            transcription,
            completion,
            synthesizer,
            output: Arc::new(RodioOutput::new(
                config.speech.output_device.clone(),
                config.speech.volume,
            )),
            media_room,
        })
    }
}

enum Command {
    ToggleListening,
    SetAutoListen(bool),
    End(oneshot::Sender<String>),
}

enum Internal {
    Utterance { source: TurnSource, text: String },
    LiveUpdate { activation: ActivationId, text: String, is_final: bool },
    ActivationEnded { activation: ActivationId, reason: EndReason },
    ReplyReady { reply: String },
    PlaybackDone { generation: u64, outcome: PlaybackOutcome },
    ResumeDue { generation: u64 },
}

/// Control surface for a running interview.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    phase: Arc<PhaseMachine>,
}

impl SessionHandle {
    /// Start or stop listening. Ignored while processing or speaking.
    pub fn toggle_listening(&self) {
        let _ = self.commands.send(Command::ToggleListening);
    }

    pub fn set_auto_listen(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetAutoListen(enabled));
    }

    /// End the interview and return its summary.
    pub async fn end(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::End(tx)).is_err() {
            warn!("Session already ended");
            return SUMMARY_FALLBACK.to_string();
        }
        rx.await.unwrap_or_else(|_| SUMMARY_FALLBACK.to_string())
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.current()
    }

    pub fn is_ended(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Start an interview for `profile`. The opening question is generated and
/// spoken right away.
pub fn start_session(
    profile: CandidateProfile,
    config: &InterviewConfig,
    services: SessionServices,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (handle, events, _internal) = spawn_session(profile, config, services);
    (handle, events)
}

fn spawn_session(
    profile: CandidateProfile,
    config: &InterviewConfig,
    services: SessionServices,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<SessionEvent>,
    mpsc::UnboundedSender<Internal>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let phase = Arc::new(PhaseMachine::new());

    let mut dialogue = DialogueController::new(services.completion.clone(), &config.session);
    dialogue.seed(&profile);

    let mut playback = SpeechPlayback::new(services.synthesizer.clone(), services.output.clone());
    playback.set_voice(profile.voice_id.clone());

    let actor = SessionActor {
        settings: config.session.clone(),
        auto_listen: config.session.auto_listen,
        gate: TurnGate::new(config.session.duplicate_window()),
        profile,
        phase: phase.clone(),
        transcription: TranscriptionSession::new(
            config.transcription.clone(),
            services.microphone.clone(),
            services.transcription.clone(),
        ),
        dialogue: Arc::new(Mutex::new(dialogue)),
        playback,
        media_room: services.media_room.clone(),
        room: None,
        expected: None,
        next_simulation: 0,
        timer_generation: 0,
        playback_generation: 0,
        timers: Vec::new(),
        reply_task: None,
        events: event_tx,
        internal: internal_tx.clone(),
    };
    tokio::spawn(actor.run(command_rx, internal_rx));

    (
        SessionHandle {
            commands: command_tx,
            phase,
        },
        event_rx,
        internal_tx,
    )
}

/// Forwards activation callbacks into the actor.
struct ActorListener {
    internal: mpsc::UnboundedSender<Internal>,
}

impl TranscriptListener for ActorListener {
    fn on_utterance(&mut self, activation: ActivationId, text: String) {
        let _ = self.internal.send(Internal::Utterance {
            source: TurnSource::Live(activation),
            text,
        });
    }

    fn on_live_update(&mut self, activation: ActivationId, text: &str, is_final: bool) {
        let _ = self.internal.send(Internal::LiveUpdate {
            activation,
            text: text.to_string(),
            is_final,
        });
    }

    fn on_ended(&mut self, activation: ActivationId, reason: EndReason) {
        let _ = self.internal.send(Internal::ActivationEnded { activation, reason });
    }
}

struct SessionActor {
    settings: SessionSettings,
    auto_listen: bool,
    gate: TurnGate,
    profile: CandidateProfile,
    phase: Arc<PhaseMachine>,
    transcription: TranscriptionSession,
    dialogue: Arc<Mutex<DialogueController>>,
    playback: SpeechPlayback,
    media_room: Option<Arc<dyn MediaRoom>>,
    room: Option<RoomConnection>,
    /// Source whose utterance would start the next turn.
    expected: Option<TurnSource>,
    next_simulation: u64,
    /// Bumped to invalidate pending resume timers.
    timer_generation: u64,
    /// Bumped to ignore completions of superseded utterances.
    playback_generation: u64,
    timers: Vec<JoinHandle<()>>,
    reply_task: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal: mpsc::UnboundedSender<Internal>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(candidate = %self.profile.name, position = %self.profile.position, "Interview started");
        self.join_room().await;
        self.begin_opening();

        loop {
            tokio::select! {
                biased;

                // Callbacks queued by the last command land before the next one.
                Some(event) = internal.recv() => self.handle_internal(event).await,

                cmd = commands.recv() => match cmd {
                    Some(Command::ToggleListening) => self.toggle_listening().await,
                    Some(Command::SetAutoListen(enabled)) => self.set_auto_listen(enabled),
                    Some(Command::End(reply)) => {
                        let summary = self.teardown().await;
                        let _ = reply.send(summary);
                        break;
                    }
                    None => {
                        debug!("Session handle dropped, ending interview");
                        self.teardown().await;
                        break;
                    }
                },
            }
        }
        info!("Interview ended");
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn notice(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.emit(SessionEvent::Notice(message));
    }

    fn phase_changed(&self) {
        self.emit(SessionEvent::PhaseChanged(self.phase.current()));
    }

    async fn join_room(&mut self) {
        let Some(media_room) = self.media_room.clone() else {
            return;
        };
        let room = room_name(chrono::Utc::now());
        let identity = if self.profile.name.trim().is_empty() {
            "candidate".to_string()
        } else {
            self.profile.name.clone()
        };
        match media_room.join(&room, &identity).await {
            Ok(connection) => self.room = Some(connection),
            Err(e) => self.notice(format!("Media room unavailable, continuing without it: {}", e)),
        }
    }

    fn begin_opening(&mut self) {
        if !self.phase.begin_processing() {
            return;
        }
        self.phase_changed();

        let dialogue = self.dialogue.clone();
        let internal = self.internal.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let reply = dialogue.lock().await.next_opening_utterance().await;
            let _ = internal.send(Internal::ReplyReady { reply });
        }));
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Utterance { source, text } => self.handle_utterance(source, text).await,
            Internal::LiveUpdate {
                activation,
                text,
                is_final,
            } => {
                if self.expected == Some(TurnSource::Live(activation)) {
                    self.emit(SessionEvent::LiveTranscript { text, is_final });
                }
            }
            Internal::ActivationEnded { activation, reason } => {
                self.handle_activation_ended(activation, reason)
            }
            Internal::ReplyReady { reply } => self.handle_reply(reply),
            Internal::PlaybackDone { generation, outcome } => {
                self.handle_playback_done(generation, outcome)
            }
            Internal::ResumeDue { generation } => {
                if generation == self.timer_generation
                    && self.auto_listen
                    && self.phase.current() == SessionPhase::Idle
                {
                    self.start_listening().await;
                }
            }
        }
    }

    async fn handle_utterance(&mut self, source: TurnSource, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        let decision = self
            .gate
            .admit(self.phase.current(), self.expected, source, Instant::now());
        if decision != GateDecision::Accept {
            debug!(?source, ?decision, "Utterance discarded");
            if self.expected == Some(source) {
                self.abandon_turn().await;
            }
            return;
        }
        self.expected = None;

        // Stop listening before anything else happens this turn.
        if matches!(source, TurnSource::Live(_)) {
            self.transcription.stop().await;
        }
        self.abort_timers();

        if !self.phase.begin_processing() {
            return;
        }
        self.phase_changed();
        info!(chars = text.len(), "Candidate answer received");
        self.emit(SessionEvent::Utterance {
            speaker: Speaker::User,
            text: text.clone(),
        });

        let dialogue = self.dialogue.clone();
        let internal = self.internal.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let reply = dialogue.lock().await.respond(&text).await;
            let _ = internal.send(Internal::ReplyReady { reply });
        }));
    }

    /// The listened-to source has spent its one utterance on a refused turn.
    /// Drop it and listen again from scratch.
    async fn abandon_turn(&mut self) {
        self.expected = None;
        self.abort_timers();
        self.transcription.stop().await;
        if !self.phase.stop_listening() {
            return;
        }
        self.phase_changed();
        if self.auto_listen && self.transcription.is_supported() {
            self.start_listening().await;
        }
    }

    fn handle_reply(&mut self, reply: String) {
        self.reply_task = None;
        if self.phase.current() != SessionPhase::Processing {
            debug!("Reply arrived outside Processing, dropping");
            return;
        }

        self.emit(SessionEvent::Utterance {
            speaker: Speaker::Assistant,
            text: reply.clone(),
        });
        self.phase.begin_speaking();
        self.phase_changed();

        self.playback_generation += 1;
        let generation = self.playback_generation;
        let internal = self.internal.clone();
        self.playback.speak(&reply, move |outcome| {
            let _ = internal.send(Internal::PlaybackDone { generation, outcome });
        });
    }

    fn handle_playback_done(&mut self, generation: u64, outcome: PlaybackOutcome) {
        if generation != self.playback_generation {
            return;
        }
        if let PlaybackOutcome::Failed(reason) = &outcome {
            self.notice(format!("Speech playback failed: {}", reason));
        }
        if !self.phase.finish_speaking() {
            return;
        }
        self.phase_changed();

        if self.auto_listen && self.transcription.is_supported() {
            let delay = match outcome {
                PlaybackOutcome::Skipped => self.settings.unspoken_resume_delay(),
                _ => self.settings.resume_delay(),
            };
            self.schedule_resume(delay);
        }
    }

    fn handle_activation_ended(&mut self, activation: ActivationId, reason: EndReason) {
        if self.expected != Some(TurnSource::Live(activation)) {
            debug!(%activation, ?reason, "Stale activation ended");
            return;
        }
        self.expected = None;
        if self.phase.stop_listening() {
            self.phase_changed();
        }
        match reason {
            EndReason::BackendFailed(err) => self.notice(format!("Transcription stopped: {}", err)),
            EndReason::BackendClosed => self.notice("Transcription stream closed"),
            EndReason::MicrophoneLost => self.notice("Microphone disconnected"),
            EndReason::Stopped => {}
        }
    }

    async fn toggle_listening(&mut self) {
        match self.phase.current() {
            SessionPhase::Processing | SessionPhase::Speaking => {
                debug!("Toggle ignored while busy");
            }
            SessionPhase::Listening => self.stop_listening().await,
            SessionPhase::Idle => {
                self.cancel_resume();
                self.start_listening().await;
            }
        }
    }

    fn set_auto_listen(&mut self, enabled: bool) {
        info!(enabled, "Auto-listen changed");
        self.auto_listen = enabled;
        if !enabled {
            self.cancel_resume();
        } else if self.phase.current() == SessionPhase::Idle && self.transcription.is_supported() {
            self.schedule_resume(self.settings.resume_delay());
        }
    }

    async fn start_listening(&mut self) {
        if self.phase.current() != SessionPhase::Idle {
            return;
        }

        if !self.transcription.is_supported() {
            self.next_simulation += 1;
            let source = TurnSource::Simulated(self.next_simulation);
            self.expected = Some(source);
            self.phase.start_listening();
            self.phase_changed();
            info!("Transcription unavailable, simulating an answer");

            let internal = self.internal.clone();
            let delay = self.settings.simulated_transcript_delay();
            self.track_timer(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = internal.send(Internal::Utterance {
                    source,
                    text: SIMULATED_TRANSCRIPT.to_string(),
                });
            }));
            return;
        }

        let listener = ActorListener {
            internal: self.internal.clone(),
        };
        match self.transcription.start(Box::new(listener)).await {
            Ok(activation) => {
                self.expected = Some(TurnSource::Live(activation));
                self.phase.start_listening();
                self.phase_changed();
            }
            Err(e) => self.notice(format!("Could not start listening: {}", e)),
        }
    }

    async fn stop_listening(&mut self) {
        if matches!(self.expected, Some(TurnSource::Simulated(_))) {
            self.expected = None;
        }
        self.abort_timers();
        // A flushed utterance from the live activation is still accepted.
        self.transcription.stop().await;
        if self.phase.stop_listening() {
            self.phase_changed();
        }
    }

    fn schedule_resume(&mut self, delay: Duration) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let internal = self.internal.clone();
        debug!(delay_ms = delay.as_millis() as u64, "Listening resumes after delay");
        self.track_timer(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ResumeDue { generation });
        }));
    }

    fn cancel_resume(&mut self) {
        self.timer_generation += 1;
    }

    fn track_timer(&mut self, timer: JoinHandle<()>) {
        self.timers.retain(|t| !t.is_finished());
        self.timers.push(timer);
    }

    fn abort_timers(&mut self) {
        self.timer_generation += 1;
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    async fn teardown(&mut self) -> String {
        info!("Ending interview");

        self.expected = None;
        self.transcription.stop().await;

        self.playback_generation += 1;
        self.playback.stop();

        self.abort_timers();
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if self.phase.reset() != SessionPhase::Idle {
            self.phase_changed();
        }

        if let Some(room) = self.room.take() {
            room.disconnect().await;
        }

        let summary = self.dialogue.lock().await.summarize().await;
        self.emit(SessionEvent::Ended {
            summary: summary.clone(),
        });
        summary
    }
}
