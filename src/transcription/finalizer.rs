//! Per-activation utterance finalization.
//!
//! Accumulates final fragments, tracks the last time speech was heard and
//! decides when the accumulated text becomes one finished utterance. Two
//! paths race to finalize: the backend's own end-of-utterance signal and the
//! silence timer. The emitted latch makes sure only one of them wins.

use std::time::Duration;

use tokio::time::Instant;

use super::protocol::TranscriptFragment;

/// Result of a silence-timer tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilenceCheck {
    /// Quiet long enough: this is the utterance.
    Finalized(String),
    /// Text is pending but the speaker may continue.
    Waiting,
    /// Nothing to flush; the timer can stop.
    Idle,
}

#[derive(Debug)]
pub struct UtteranceFinalizer {
    silence_threshold: Duration,
    interim_text: String,
    final_text: String,
    last_speech_at: Option<Instant>,
    speaking: bool,
    emitted: bool,
}

impl UtteranceFinalizer {
    pub fn new(silence_threshold: Duration) -> Self {
        Self {
            silence_threshold,
            interim_text: String::new(),
            final_text: String::new(),
            last_speech_at: None,
            speaking: false,
            emitted: false,
        }
    }

    /// Feed one backend fragment.
    ///
    /// Returns the utterance when the fragment carries the backend's
    /// end-of-utterance flag. Once this activation has emitted, further
    /// fragments are dropped.
    pub fn on_fragment(&mut self, fragment: &TranscriptFragment, now: Instant) -> Option<String> {
        if self.emitted {
            return None;
        }

        let text = fragment.text.trim();
        if !text.is_empty() {
            self.last_speech_at = Some(now);
            self.speaking = true;
            if fragment.is_final {
                append_fragment(&mut self.final_text, text);
                self.interim_text.clear();
            } else {
                self.interim_text = text.to_string();
            }
        }

        if fragment.speech_final {
            return self.finalize();
        }
        None
    }

    /// Backend `UtteranceEnd` message.
    pub fn on_utterance_end(&mut self) -> Option<String> {
        self.finalize()
    }

    pub fn on_silence_tick(&mut self, now: Instant) -> SilenceCheck {
        if self.emitted || self.final_text.trim().is_empty() {
            return SilenceCheck::Idle;
        }

        let quiet_for = self
            .last_speech_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if quiet_for > self.silence_threshold {
            match self.finalize() {
                Some(text) => SilenceCheck::Finalized(text),
                None => SilenceCheck::Idle,
            }
        } else {
            SilenceCheck::Waiting
        }
    }

    /// Flush pending final text on stop. Same path as the other triggers.
    pub fn flush(&mut self) -> Option<String> {
        self.finalize()
    }

    /// True while final text is waiting for the silence timer.
    pub fn has_pending(&self) -> bool {
        !self.emitted && !self.final_text.trim().is_empty()
    }

    pub fn interim_text(&self) -> &str {
        &self.interim_text
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn has_emitted(&self) -> bool {
        self.emitted
    }

    fn finalize(&mut self) -> Option<String> {
        if self.emitted {
            return None;
        }
        let text = self.final_text.trim().to_string();
        if text.is_empty() {
            return None;
        }

        self.emitted = true;
        self.final_text.clear();
        self.interim_text.clear();
        self.speaking = false;
        Some(text)
    }
}

/// Append a final fragment, adding a space unless the join point already has
/// one or the fragment opens with punctuation.
fn append_fragment(acc: &mut String, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    let needs_space = !acc.is_empty()
        && !acc.ends_with(char::is_whitespace)
        && !fragment.starts_with(|c: char| matches!(c, ',' | '.' | ';' | ':' | '!' | '?'));
    if needs_space {
        acc.push(' ');
    }
    acc.push_str(fragment);
}
