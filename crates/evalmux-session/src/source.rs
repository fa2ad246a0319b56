//! Per-submission synchronization record.
//!
//! A `RequestSource` bridges the four moments of a command's life: the
//! client submitting it, the engine matching it to a prompt, the client
//! delivering input, and the engine finishing (or failing) the evaluation
//! that input triggered. Each moment resolves one oneshot channel.

use std::sync::Arc;

use evalmux_core::{Contexts, RequestId, SessionError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::handoff::HandoffToken;
use crate::request::{PromptReply, Request};

pub(crate) type Completion = Result<String, SessionError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

pub(crate) struct RequestSource {
    id: RequestId,
    visible: bool,
    /// Contexts observed at submission. `None` matches any prompt.
    captured: Option<Contexts>,
    state: Mutex<SourceState>,
}

struct SourceState {
    phase: Phase,
    created: Option<oneshot::Sender<Request>>,
    delivery: Option<oneshot::Sender<String>>,
    completion: Option<oneshot::Sender<Completion>>,
    completion_rx: Option<oneshot::Receiver<Completion>>,
    output: String,
}

impl RequestSource {
    pub(crate) fn new(
        id: RequestId,
        visible: bool,
        captured: Option<Contexts>,
    ) -> (Arc<Self>, oneshot::Receiver<Request>) {
        let (created_tx, created_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let source = Arc::new(Self {
            id,
            visible,
            captured,
            state: Mutex::new(SourceState {
                phase: Phase::Queued,
                created: Some(created_tx),
                delivery: None,
                completion: Some(completion_tx),
                completion_rx: Some(completion_rx),
                output: String::new(),
            }),
        });
        (source, created_rx)
    }

    pub(crate) fn id(&self) -> &RequestId {
        &self.id
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Whether a prompt reported at `contexts` may be handed to this source.
    pub(crate) fn matches(&self, contexts: &Contexts) -> bool {
        self.captured.as_ref().is_none_or(|c| c == contexts)
    }

    /// Queued -> Active for a prompt the engine is reporting right now.
    ///
    /// Resolves the submitter's future with a [`Request`] and returns the
    /// reply the engine awaits for its input.
    pub(crate) fn claim_for_prompt(
        self: &Arc<Self>,
        contexts: Contexts,
        prompt: &str,
        max_length: usize,
    ) -> Result<PromptReply, SessionError> {
        let (delivery, reply) = oneshot::channel();
        self.activate(delivery, contexts, prompt.to_string(), max_length)?;
        Ok(PromptReply::waiting(reply))
    }

    /// Queued -> Active for a prompt that was already waiting in the hand-off slot.
    pub(crate) fn adopt(self: &Arc<Self>, token: HandoffToken) -> Result<(), SessionError> {
        let HandoffToken {
            contexts,
            prompt,
            max_length,
            reply,
        } = token;
        self.activate(reply, contexts, prompt, max_length)
    }

    fn activate(
        self: &Arc<Self>,
        delivery: oneshot::Sender<String>,
        contexts: Contexts,
        prompt: String,
        max_length: usize,
    ) -> Result<(), SessionError> {
        let (created, request) = {
            let mut state = self.state.lock();
            if state.phase != Phase::Queued {
                return Err(self.violation(state.phase, "matched a request that is not queued"));
            }
            let Some(completion) = state.completion_rx.take() else {
                return Err(self.violation(state.phase, "completion channel already handed out"));
            };
            state.phase = Phase::Active;
            state.delivery = Some(delivery);
            let request = Request::new(Arc::clone(self), contexts, prompt, max_length, completion);
            (state.created.take(), request)
        };

        // The request is dropped outside the lock: dropping it abandons the prompt.
        match created {
            Some(tx) => {
                if tx.send(request).is_err() {
                    debug!(request_id = %self.id, "submitter went away before the match was delivered");
                }
            }
            None => drop(request),
        }
        Ok(())
    }

    /// Hand the client's text to the engine waiting on this request's prompt.
    pub(crate) fn deliver(&self, text: String) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            Phase::Active => {
                let Some(tx) = state.delivery.take() else {
                    return Err(self.violation(phase, "input delivered twice"));
                };
                drop(state);
                tx.send(text).map_err(|_| SessionError::Abandoned)
            }
            Phase::Queued => Err(self.violation(phase, "input delivered before match")),
            // The response already carries the error.
            Phase::Failed => {
                debug!(request_id = %self.id, ?phase, "discarding input for failed request");
                Ok(())
            }
            // The engine moved past the prompt; the text is never evaluated.
            Phase::Completed | Phase::Cancelled => {
                debug!(request_id = %self.id, ?phase, "input arrived after the prompt was abandoned");
                Err(SessionError::Abandoned)
            }
        }
    }

    /// Drop the pending delivery so the engine stops waiting for input.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        if state.delivery.take().is_some() {
            debug!(request_id = %self.id, "request dropped without input");
        }
    }

    pub(crate) fn write(&self, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return Err(self.violation(state.phase, "output written to inactive request"));
        }
        state.output.push_str(text);
        Ok(())
    }

    pub(crate) fn complete(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return Err(self.violation(state.phase, "completed an inactive request"));
        }
        let output = std::mem::take(&mut state.output);
        finish(&mut state, Phase::Completed, Ok(output));
        Ok(())
    }

    pub(crate) fn fail(&self, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return Err(self.violation(state.phase, "failed an inactive request"));
        }
        state.output.push_str(text);
        let output = std::mem::take(&mut state.output);
        finish(&mut state, Phase::Failed, Err(SessionError::Engine { output }));
        Ok(())
    }

    /// Terminate a queued or active request with `error`. No-op once terminal.
    pub(crate) fn abort(&self, error: SessionError) -> bool {
        let mut state = self.state.lock();
        let phase = state.phase;
        match phase {
            Phase::Queued => {
                state.phase = Phase::Failed;
                state.created = None;
                true
            }
            Phase::Active => {
                finish(&mut state, Phase::Failed, Err(error));
                true
            }
            _ => false,
        }
    }

    /// Queued -> Cancelled. Caller must already have removed it from the queue.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Queued {
            return false;
        }
        state.phase = Phase::Cancelled;
        state.created = None;
        true
    }

    fn violation(&self, phase: Phase, what: &str) -> SessionError {
        warn!(request_id = %self.id, ?phase, "{what}");
        SessionError::ProtocolViolation(format!("{what} ({} is {phase:?})", self.id))
    }
}

fn finish(state: &mut SourceState, phase: Phase, outcome: Completion) {
    state.phase = phase;
    state.delivery = None;
    if let Some(tx) = state.completion.take() {
        let _ = tx.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;

    fn queued(visible: bool) -> (Arc<RequestSource>, oneshot::Receiver<Request>) {
        RequestSource::new(RequestId::new(), visible, Some(Contexts::toplevel()))
    }

    #[test]
    fn unbound_source_matches_any_prompt() {
        let (source, _rx) = RequestSource::new(RequestId::new(), true, None);
        assert!(source.matches(&Contexts::toplevel()));
        assert!(source.matches(&Contexts::toplevel().nested(evalmux_core::CallFlag::Browser)));
    }

    #[test]
    fn bound_source_matches_exact_contexts_only() {
        let (source, _rx) = queued(true);
        assert!(source.matches(&Contexts::toplevel()));
        assert!(!source.matches(&Contexts::toplevel().nested(evalmux_core::CallFlag::Browser)));
    }

    #[test]
    fn claim_resolves_request_and_send_reaches_engine() {
        let (source, mut created) = queued(true);
        let reply = source
            .claim_for_prompt(Contexts::toplevel(), "> ", 4096)
            .unwrap();
        assert_eq!(source.phase(), Phase::Active);

        let request = created.try_recv().unwrap();
        assert_eq!(request.prompt(), "> ");
        assert_eq!(request.max_length(), 4096);

        let response = request.send("1 + 1");
        assert_eq!(reply.now_or_never().unwrap().unwrap(), "1 + 1");

        source.write("[1] 2\n").unwrap();
        source.complete().unwrap();
        assert_eq!(response.now_or_never().unwrap().unwrap(), "[1] 2\n");
        assert_eq!(source.phase(), Phase::Completed);
    }

    #[test]
    fn claim_twice_is_a_violation() {
        let (source, _created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        let err = source
            .claim_for_prompt(Contexts::toplevel(), "> ", 10)
            .unwrap_err();
        assert_matches!(err, SessionError::ProtocolViolation(_));
    }

    #[test]
    fn second_delivery_is_a_violation() {
        let (source, _created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        source.deliver("x".into()).unwrap();
        assert_matches!(
            source.deliver("y".into()),
            Err(SessionError::ProtocolViolation(_))
        );
    }

    #[test]
    fn fail_carries_accumulated_output() {
        let (source, mut created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        let response = created.try_recv().unwrap().send("f()");
        source.write("partial\n").unwrap();
        source.fail("Error: boom\n").unwrap();

        let err = response.now_or_never().unwrap().unwrap_err();
        assert_eq!(
            err,
            SessionError::Engine {
                output: "partial\nError: boom\n".into()
            }
        );
    }

    #[test]
    fn terminal_source_rejects_further_transitions() {
        let (source, _created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        source.complete().unwrap();

        assert_matches!(source.write("late"), Err(SessionError::ProtocolViolation(_)));
        assert_matches!(source.complete(), Err(SessionError::ProtocolViolation(_)));
        assert_matches!(source.fail("late"), Err(SessionError::ProtocolViolation(_)));
        assert!(!source.abort(SessionError::Closed));
    }

    #[test]
    fn input_after_completion_is_abandoned() {
        let (source, mut created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        let request = created.try_recv().unwrap();
        source.complete().unwrap();

        assert_eq!(
            request.send("important()").now_or_never().unwrap(),
            Err(SessionError::Abandoned)
        );
    }

    #[test]
    fn input_after_failure_reports_the_failure() {
        let (source, mut created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        let request = created.try_recv().unwrap();
        source.fail("Error: stopped\n").unwrap();

        assert_matches!(
            request.send("x").now_or_never().unwrap(),
            Err(SessionError::Engine { .. })
        );
    }

    #[test]
    fn write_before_match_is_a_violation() {
        let (source, _created) = queued(true);
        assert_matches!(source.write("early"), Err(SessionError::ProtocolViolation(_)));
    }

    #[test]
    fn dropping_request_abandons_prompt() {
        let (source, mut created) = queued(true);
        let reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        drop(created.try_recv().unwrap());
        assert_eq!(reply.now_or_never().unwrap(), Err(SessionError::Abandoned));
        // Still active until the engine unwinds it.
        assert_eq!(source.phase(), Phase::Active);
    }

    #[test]
    fn dropped_submitter_abandons_prompt() {
        let (source, created) = queued(false);
        drop(created);
        let reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        assert_eq!(reply.now_or_never().unwrap(), Err(SessionError::Abandoned));
    }

    #[test]
    fn cancel_only_applies_while_queued() {
        let (source, mut created) = queued(true);
        assert!(source.cancel());
        assert_eq!(source.phase(), Phase::Cancelled);
        assert!(created.try_recv().is_err());
        assert!(!source.cancel());
    }

    #[test]
    fn abort_active_resolves_response_with_error() {
        let (source, mut created) = queued(true);
        let _reply = source.claim_for_prompt(Contexts::toplevel(), "> ", 10).unwrap();
        let response = created.try_recv().unwrap().send("Sys.sleep(100)");
        assert!(source.abort(SessionError::Closed));
        assert_eq!(response.now_or_never().unwrap(), Err(SessionError::Closed));
    }
}
