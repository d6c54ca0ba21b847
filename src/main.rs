//! AI interviewer core process.
//!
//! Communicates with the host UI via JSON-line IPC on stdin/stdout and runs
//! at most one interview session at a time.

mod logger;

use tokio::sync::mpsc;
use tracing::{info, warn};

use interviewer_core::audio::{list_devices, list_output_devices};
use interviewer_core::config::{read_interview_config, InterviewConfig};
use interviewer_core::dialogue::CandidateProfile;
use interviewer_core::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use interviewer_core::ipc::{AudioDeviceInfo, InterviewCommand, InterviewEvent};
use interviewer_core::tts::{ElevenLabsTts, SpeechSynthesizer};
use interviewer_core::{start_session, SessionEvent, SessionHandle, SessionServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init()?;

    // Let the host know we're alive before anything slow happens.
    emit_event(&InterviewEvent::Starting {});

    let config = read_interview_config();
    let mut commands = spawn_stdin_reader();

    emit_event(&InterviewEvent::Ready {
        transcription: config.transcription.api_key.is_some(),
        completion: config.completion.api_key.is_some(),
        synthesis: config.speech.api_key.is_some(),
        media_room: config.media_room.is_configured(),
    });
    info!("Interviewer core ready");

    let mut core = Core {
        config,
        session: None,
        events: None,
    };

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(command) => {
                    if !core.handle_command(command).await {
                        break;
                    }
                }
                None => {
                    info!("stdin closed, shutting down");
                    break;
                }
            },
            event = next_session_event(&mut core.events) => match event {
                Some(event) => emit_event(&event.into()),
                None => core.session_closed(),
            },
        }
    }

    core.end_session().await;
    info!("Interviewer core shutting down");
    Ok(())
}

async fn next_session_event(
    events: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct Core {
    config: InterviewConfig,
    session: Option<SessionHandle>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Core {
    /// Returns `false` if the main loop should exit.
    async fn handle_command(&mut self, cmd: InterviewCommand) -> bool {
        match cmd {
            InterviewCommand::Ping {} => emit_event(&InterviewEvent::Pong {}),

            InterviewCommand::Stop {} => {
                emit_event(&InterviewEvent::Stopping {});
                return false;
            }

            InterviewCommand::StartSession { profile } => self.start(profile),

            InterviewCommand::ToggleListening {} => match &self.session {
                Some(session) => session.toggle_listening(),
                None => emit_error("No interview in progress"),
            },

            InterviewCommand::SetAutoListen { enabled } => {
                self.config.session.auto_listen = enabled;
                if let Some(session) = &self.session {
                    session.set_auto_listen(enabled);
                }
            }

            InterviewCommand::EndSession {} => {
                if self.session.is_none() {
                    emit_error("No interview in progress");
                }
                self.end_session().await;
            }

            InterviewCommand::ListVoices {} => self.list_voices().await,

            InterviewCommand::ListAudioDevices {} => {
                emit_event(&InterviewEvent::AudioDevices {
                    input: AudioDeviceInfo::enumerate(list_devices()),
                    output: AudioDeviceInfo::enumerate(list_output_devices()),
                });
            }
        }

        true
    }

    fn start(&mut self, profile: CandidateProfile) {
        if self.session.as_ref().is_some_and(|s| !s.is_ended()) {
            emit_error("An interview is already in progress");
            return;
        }
        let services = match SessionServices::from_config(&self.config) {
            Ok(services) => services,
            Err(e) => {
                emit_error(&format!("Could not start interview: {}", e));
                return;
            }
        };
        let (handle, events) = start_session(profile, &self.config, services);
        self.session = Some(handle);
        self.events = Some(events);
    }

    /// End the running interview, forwarding its remaining events.
    async fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            let summary = session.end().await;
            info!(chars = summary.len(), "Interview summary ready");
        }
        if let Some(mut events) = self.events.take() {
            while let Some(event) = events.recv().await {
                emit_event(&event.into());
            }
        }
    }

    fn session_closed(&mut self) {
        if self.session.take().is_some() {
            warn!("Session ended without an end_session command");
        }
        self.events = None;
    }

    async fn list_voices(&self) {
        let Some(tts) = ElevenLabsTts::from_settings(&self.config.speech) else {
            emit_error("No speech synthesis credentials configured");
            return;
        };
        match tts.list_voices().await {
            Ok(voices) => emit_event(&InterviewEvent::Voices { voices }),
            Err(e) => emit_error(&format!("Could not list voices: {}", e)),
        }
    }
}
