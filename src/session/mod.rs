//! Conversation session boundary
//!
//! The conversation itself runs elsewhere. The controller starts it,
//! waits for it to finish, and can end it early; the session reports
//! dialogue phases back through [`PhaseHooks`].

mod command;

pub use command::{CommandDriver, CommandSession};

use crate::indicator::{IndicatorState, StatusIndicator};

/// Errors from the session component
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start session: {0}")]
    Start(String),

    #[error("session failed: {0}")]
    Failed(String),

    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// The failure looks like bad credentials or an unauthorized agent
    pub fn is_authorization(&self) -> bool {
        self.to_string().to_ascii_lowercase().contains("authoriz")
    }
}

/// Starts conversations
pub trait SessionDriver {
    type Session: Session;

    async fn start(&mut self, hooks: PhaseHooks) -> Result<Self::Session, SessionError>;
}

/// One running conversation
pub trait Session {
    /// Block until the conversation is over; yields its id when known
    async fn wait_for_end(&mut self) -> Result<Option<String>, SessionError>;

    /// End the conversation early
    async fn end(&mut self) -> Result<(), SessionError>;
}

/// Hook points a session calls as the dialogue moves between phases.
/// Calls never block and are safe from any thread.
#[derive(Clone)]
pub struct PhaseHooks {
    indicator: StatusIndicator,
}

impl PhaseHooks {
    pub fn new(indicator: StatusIndicator) -> Self {
        Self { indicator }
    }

    pub fn on_idle(&self) {
        self.indicator.request(IndicatorState::Idle);
    }

    pub fn on_listening(&self) {
        self.indicator.request(IndicatorState::Listening);
    }

    /// A user transcript arrived
    pub fn on_thinking(&self) {
        self.indicator.request(IndicatorState::Thinking);
    }

    /// An agent reply arrived
    pub fn on_speaking(&self) {
        self.indicator.request(IndicatorState::Speaking);
    }
}
