//! AI interviewer core.
//!
//! Runs a spoken mock interview: streams the candidate's microphone to a
//! transcription service, turns finalized answers into the next question
//! through a chat-completion service, and speaks each question back.

pub mod audio;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod ipc;
pub mod media_room;
pub mod session;
pub mod transcription;
pub mod tts;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{SessionError, SessionResult};
pub use session::{start_session, SessionEvent, SessionHandle, SessionPhase, SessionServices};
