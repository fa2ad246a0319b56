use serde::{Deserialize, Serialize};

use crate::context::Contexts;

/// Notifications fanned out to every subscriber of a session.
///
/// None of these fire while any active request was submitted as invisible.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The engine reached a prompt and is about to wait for input.
    BeforeRequest {
        contexts: Contexts,
        prompt: String,
        max_length: usize,
        add_to_history: bool,
    },

    /// Regular output written by the engine.
    Response { contexts: Contexts, message: String },

    /// Error output written by the engine.
    Error { contexts: Contexts, message: String },
}

impl SessionEvent {
    pub fn contexts(&self) -> &Contexts {
        match self {
            Self::BeforeRequest { contexts, .. }
            | Self::Response { contexts, .. }
            | Self::Error { contexts, .. } => contexts,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BeforeRequest { .. } => "before_request",
            Self::Response { .. } => "response",
            Self::Error { .. } => "error",
        }
    }
}
