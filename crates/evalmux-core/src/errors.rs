/// Outcome of a request that did not complete normally.
///
/// Engine errors are routed only to requests at or deeper than the depth
/// the error was raised at; every other variant concerns a single request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The engine reported error output while this request was active.
    /// `output` is everything the request had accumulated, error text included.
    #[error("engine error: {output}")]
    Engine { output: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Withdrawn before the engine matched it to a prompt.
    #[error("request cancelled before it was matched")]
    Cancelled,

    /// The engine is already evaluating this request and cannot be preempted.
    #[error("request is already active and cannot be cancelled")]
    NotCancellable,

    /// No client will answer the prompt this reply was waiting on.
    #[error("prompt abandoned without input")]
    Abandoned,

    #[error("session closed")]
    Closed,
}

impl SessionError {
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Self::Engine { .. })
    }

    /// Output accumulated before an engine error, if this is one.
    pub fn engine_output(&self) -> Option<&str> {
        match self {
            Self::Engine { output } => Some(output),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Engine { .. } => "engine_error",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Cancelled => "cancelled",
            Self::NotCancellable => "not_cancellable",
            Self::Abandoned => "abandoned",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_carries_output() {
        let err = SessionError::Engine {
            output: "[1] 1\nError: boom\n".into(),
        };
        assert!(err.is_engine_error());
        assert_eq!(err.engine_output(), Some("[1] 1\nError: boom\n"));
        assert!(err.to_string().contains("Error: boom"));
    }

    #[test]
    fn non_engine_errors_have_no_output() {
        assert!(!SessionError::Closed.is_engine_error());
        assert_eq!(SessionError::Cancelled.engine_output(), None);
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SessionError::Closed.error_kind(), "closed");
        assert_eq!(SessionError::NotCancellable.error_kind(), "not_cancellable");
        assert_eq!(
            SessionError::ProtocolViolation("twice".into()).error_kind(),
            "protocol_violation"
        );
    }
}
