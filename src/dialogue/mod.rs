//! Interview dialogue over a stateless chat-completion backend.
//!
//! The controller owns the whole message history and resends it on every
//! request. Each round trip appends the directive it sent (as a system
//! message) and the reply it got, so later requests see everything.

pub mod openai;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::error::{SessionError, SessionResult};

pub use openai::OpenAiCompletion;

pub const OPENING_FALLBACK: &str =
    "Could you start by telling me about your background and how it relates to this position?";

pub const SUMMARY_FALLBACK: &str =
    "Thank you for participating in this interview. Your responses have been recorded for review.";

/// Generic prompts used when the backend is unreachable, indexed by user turn.
const ROTATING_FALLBACKS: [&str; 6] = [
    "Could you tell me about your experience and how it relates to this position?",
    "That's interesting. Can you share a specific challenge you faced in your previous role and how you overcame it?",
    "How do you approach problem-solving when faced with ambiguous requirements?",
    "Could you describe a situation where you had to adapt quickly to changing priorities?",
    "What aspects of this role are you most excited about, and why?",
    "How do you stay current with industry trends and developments?",
];

const OPENING_DIRECTIVE: &str = "Generate an initial interview question to start the interview.";

const FOLLOW_UP_DIRECTIVE: &str = "Based on the candidate's last answer, ask one tightly scoped \
    follow-up question that digs into a specific detail they mentioned.";

const TOPIC_CHANGE_DIRECTIVE: &str = "Move on to a new topic relevant to the role. Ask one \
    question about an area of their skills or experience not yet covered.";

const SUMMARY_DIRECTIVE: &str = "Provide a brief summary of this interview, highlighting the \
    candidate's strengths and potential areas for improvement.";

/// Answers shorter than this invite a follow-up.
const SHORT_ANSWER_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Who is being interviewed, as entered on the intake form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateProfile {
    pub name: String,
    pub position: String,
    pub experience: String,
    pub additional_info: String,
    /// Synthesis voice for the interviewer.
    pub voice_id: Option<String>,
}

/// A chat-completion service. Stateless: every call carries the full history.
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(&'a self, messages: &'a [ChatMessage]) -> BoxFuture<'a, SessionResult<String>>;
}

/// What the next question should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionPlan {
    FollowUp,
    TopicChange,
}

impl QuestionPlan {
    fn directive(self) -> &'static str {
        match self {
            Self::FollowUp => FOLLOW_UP_DIRECTIVE,
            Self::TopicChange => TOPIC_CHANGE_DIRECTIVE,
        }
    }
}

pub struct DialogueController {
    backend: Option<Arc<dyn CompletionBackend>>,
    history: Vec<ChatMessage>,
    max_follow_ups: usize,
    follow_up_chance: f64,
    consecutive_follow_ups: usize,
    /// Uniform draw in [0, 1).
    chance: Box<dyn FnMut() -> f64 + Send>,
}

impl DialogueController {
    pub fn new(backend: Option<Arc<dyn CompletionBackend>>, settings: &SessionSettings) -> Self {
        let mut controller = Self {
            backend,
            history: Vec::new(),
            max_follow_ups: settings.max_follow_ups,
            follow_up_chance: settings.follow_up_chance,
            consecutive_follow_ups: 0,
            chance: Box::new(random_unit),
        };
        controller.reset();
        controller
    }

    /// Replace the source of randomness for the follow-up heuristic.
    pub fn with_chance_source(mut self, chance: impl FnMut() -> f64 + Send + 'static) -> Self {
        self.chance = Box::new(chance);
        self
    }

    /// Clear the transcript and re-seed the interviewer instruction.
    pub fn reset(&mut self) {
        self.history.clear();
        self.consecutive_follow_ups = 0;
        self.history.push(ChatMessage::system(base_instruction(self.max_follow_ups)));
    }

    pub fn seed(&mut self, profile: &CandidateProfile) {
        let mut text = format!(
            "You are interviewing {} for a {} position. They have {} of experience.",
            profile.name, profile.position, profile.experience
        );
        if !profile.additional_info.trim().is_empty() {
            text.push_str(&format!(
                "\nAdditional information about the candidate: {}",
                profile.additional_info.trim()
            ));
        }
        text.push_str(&format!(
            "\nOpen with a question specific to the {} role. Do not start with a generic \
             \"tell me about yourself\".",
            profile.position
        ));
        self.history.push(ChatMessage::system(text));
    }

    pub async fn next_opening_utterance(&mut self) -> String {
        match self.round_trip(OPENING_DIRECTIVE).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Opening question failed, using fallback: {}", e);
                self.history.push(ChatMessage::assistant(OPENING_FALLBACK));
                OPENING_FALLBACK.to_string()
            }
        }
    }

    /// Record the candidate's answer and produce the next question. Never fails.
    pub async fn respond(&mut self, user_text: &str) -> String {
        self.history.push(ChatMessage::user(user_text));
        let plan = self.plan_next(user_text);
        debug!(?plan, streak = self.consecutive_follow_ups, "Planned next question");

        match self.round_trip(plan.directive()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Next question failed, using fallback: {}", e);
                let index = self.user_turn_count().min(ROTATING_FALLBACKS.len() - 1);
                let fallback = ROTATING_FALLBACKS[index];
                self.history.push(ChatMessage::assistant(fallback));
                fallback.to_string()
            }
        }
    }

    pub async fn summarize(&mut self) -> String {
        match self.round_trip(SUMMARY_DIRECTIVE).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Summary failed, using fallback: {}", e);
                SUMMARY_FALLBACK.to_string()
            }
        }
    }

    /// Every message, instructions included.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Only the spoken exchange.
    pub fn turns(&self) -> Vec<&ChatMessage> {
        self.history
            .iter()
            .filter(|m| m.role != Role::System)
            .collect()
    }

    pub fn user_turn_count(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }

    pub fn consecutive_follow_ups(&self) -> usize {
        self.consecutive_follow_ups
    }

    fn plan_next(&mut self, answer: &str) -> QuestionPlan {
        let qualifies = answer.split_whitespace().count() < SHORT_ANSWER_WORDS
            || answer.contains('?')
            || (self.chance)() < self.follow_up_chance;

        if qualifies && self.consecutive_follow_ups < self.max_follow_ups {
            self.consecutive_follow_ups += 1;
            QuestionPlan::FollowUp
        } else {
            self.consecutive_follow_ups = 0;
            QuestionPlan::TopicChange
        }
    }

    async fn round_trip(&mut self, directive: &str) -> SessionResult<String> {
        self.history.push(ChatMessage::system(directive));
        let backend = self.backend.clone().ok_or_else(|| {
            SessionError::BackendUnavailable("No completion backend configured".into())
        })?;

        let reply = backend.complete(&self.history).await?;
        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(SessionError::BackendUnavailable(
                "Empty completion".into(),
            ));
        }

        info!(chars = reply.len(), "Interviewer reply generated");
        self.history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }
}

fn base_instruction(max_follow_ups: usize) -> String {
    format!(
        "You are an AI interviewer conducting a job interview. \
         Ask relevant, insightful questions that adapt to the candidate's answers. \
         Keep every reply to one or two sentences and end with a single question. \
         Refer to earlier answers when it helps the conversation flow. \
         Do not comment on the quality of answers and do not repeat questions. \
         Ask at most {} follow-up questions in a row on the same topic before moving on.",
        max_follow_ups
    )
}

/// Uniform value in [0, 1) from a v4 uuid's random bits.
fn random_unit() -> f64 {
    // The low 62 bits are random; the two above them hold the variant.
    let random = (uuid::Uuid::new_v4().as_u128() as u64) & ((1u64 << 62) - 1);
    (random >> 9) as f64 / (1u64 << 53) as f64
}
