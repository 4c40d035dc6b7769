//! Event types passed between the hardware threads, the controller and
//! the session process

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A debounced button press
#[derive(Debug, Clone, Copy)]
pub struct ButtonEvent {
    /// GPIO offset of the button
    pub pin: u32,
    /// When the qualifying edge was seen
    pub at: Instant,
}

/// Messages a session process writes to stdout, one JSON object per line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionMessage {
    /// The user's speech was transcribed; the agent is now working on it
    UserTranscript { text: String },

    /// The agent started replying
    AgentResponse { text: String },

    /// The agent revised a reply it already started
    AgentResponseCorrection { original: String, corrected: String },

    /// The conversation finished
    SessionEnded {
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

impl std::fmt::Display for SessionMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMessage::UserTranscript { text } => write!(f, "You: {}", text),
            SessionMessage::AgentResponse { text } => write!(f, "Agent: {}", text),
            SessionMessage::AgentResponseCorrection {
                original,
                corrected,
            } => write!(f, "Agent: {} -> {}", original, corrected),
            SessionMessage::SessionEnded { conversation_id } => match conversation_id {
                Some(id) => write!(f, "SESSION_ENDED ({})", id),
                None => write!(f, "SESSION_ENDED"),
            },
        }
    }
}
