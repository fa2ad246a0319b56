//! Client-facing handles and the futures that connect both sides.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use evalmux_core::{Contexts, RequestId, SessionError};
use tokio::sync::oneshot;
use tracing::debug;

use crate::coordinator::Shared;
use crate::source::{Completion, Phase, RequestSource};

/// How a command is submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Invisible requests suppress every session event while they are active.
    pub visible: bool,
    /// Bound requests only match a prompt at the contexts observed when they
    /// were submitted. Unbound requests match the next prompt at any depth.
    pub context_bound: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            visible: true,
            context_bound: true,
        }
    }
}

impl SubmitOptions {
    pub fn hidden() -> Self {
        Self {
            visible: false,
            ..Self::default()
        }
    }

    pub fn unbound(mut self) -> Self {
        self.context_bound = false;
        self
    }
}

/// A submission waiting to be matched to an engine prompt.
///
/// Resolves to the [`Request`] once the engine reaches a matching prompt.
/// Dropping it before then withdraws the submission.
#[must_use = "futures do nothing unless polled"]
pub struct PendingRequest {
    id: RequestId,
    state: PendingState,
}

enum PendingState {
    Waiting {
        source: Arc<RequestSource>,
        rx: oneshot::Receiver<Request>,
        shared: Arc<Shared>,
    },
    Rejected(SessionError),
    Done,
}

impl PendingRequest {
    pub(crate) fn new(
        source: Arc<RequestSource>,
        rx: oneshot::Receiver<Request>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id: source.id().clone(),
            state: PendingState::Waiting { source, rx, shared },
        }
    }

    pub(crate) fn rejected(id: RequestId, error: SessionError) -> Self {
        Self {
            id,
            state: PendingState::Rejected(error),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Withdraw the submission if the engine has not matched it yet.
    ///
    /// Returns [`SessionError::NotCancellable`] once it has been matched:
    /// the engine cannot be preempted, so the request must run to completion.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match &self.state {
            PendingState::Waiting { source, shared, .. } => {
                if shared.withdraw(source.id()) {
                    source.cancel();
                    debug!(request_id = %self.id, "submission withdrawn");
                    return Ok(());
                }
                match source.phase() {
                    Phase::Cancelled => Ok(()),
                    Phase::Failed if shared.is_closed() => Err(SessionError::Closed),
                    _ => Err(SessionError::NotCancellable),
                }
            }
            PendingState::Rejected(error) => Err(error.clone()),
            PendingState::Done => Err(SessionError::NotCancellable),
        }
    }
}

impl Future for PendingRequest {
    type Output = Result<Request, SessionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            PendingState::Waiting { source, rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(request)) => Ok(request),
                Poll::Ready(Err(_)) if source.phase() == Phase::Cancelled => {
                    Err(SessionError::Cancelled)
                }
                Poll::Ready(Err(_)) => Err(SessionError::Closed),
            },
            PendingState::Rejected(error) => Err(error.clone()),
            PendingState::Done => Err(SessionError::ProtocolViolation(
                "pending request polled after completion".into(),
            )),
        };
        this.state = PendingState::Done;
        Poll::Ready(outcome)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let PendingState::Waiting { source, shared, .. } = &self.state {
            if shared.withdraw(source.id()) {
                source.cancel();
                debug!(request_id = %self.id, "dropped submission withdrawn");
            }
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").field("id", &self.id).finish()
    }
}

/// A submission the engine has matched to a prompt.
///
/// Sending consumes the request; dropping it unsent abandons the prompt.
pub struct Request {
    source: Arc<RequestSource>,
    contexts: Contexts,
    prompt: String,
    max_length: usize,
    completion: Option<oneshot::Receiver<Completion>>,
}

impl Request {
    pub(crate) fn new(
        source: Arc<RequestSource>,
        contexts: Contexts,
        prompt: String,
        max_length: usize,
        completion: oneshot::Receiver<Completion>,
    ) -> Self {
        Self {
            source,
            contexts,
            prompt,
            max_length,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> &RequestId {
        self.source.id()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    pub fn depth(&self) -> usize {
        self.contexts.depth()
    }

    pub fn is_visible(&self) -> bool {
        self.source.is_visible()
    }

    /// Deliver `text` to the engine and return the eventual response.
    ///
    /// The response resolves once the evaluation triggered by `text` returns
    /// to this request's depth or shallower, or fails with an engine error.
    pub fn send(mut self, text: impl Into<String>) -> PendingResponse {
        let Some(completion) = self.completion.take() else {
            return PendingResponse::ready(SessionError::ProtocolViolation(
                "request already sent".into(),
            ));
        };
        match self.source.deliver(text.into()) {
            Ok(()) => PendingResponse::waiting(completion),
            Err(error) => PendingResponse::ready(error),
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.completion.is_some() {
            self.source.abandon();
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", self.source.id())
            .field("prompt", &self.prompt)
            .field("max_length", &self.max_length)
            .field("contexts", &self.contexts)
            .finish_non_exhaustive()
    }
}

/// The outcome of a sent [`Request`].
#[must_use = "futures do nothing unless polled"]
pub struct PendingResponse {
    state: OneshotState<Completion>,
}

impl PendingResponse {
    fn waiting(rx: oneshot::Receiver<Completion>) -> Self {
        Self {
            state: OneshotState::Waiting(rx),
        }
    }

    fn ready(error: SessionError) -> Self {
        Self {
            state: OneshotState::Ready(Some(error)),
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<String, SessionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            OneshotState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(SessionError::Closed))),
            OneshotState::Ready(error) => {
                Poll::Ready(Err(error.take().unwrap_or(SessionError::Closed)))
            }
        }
    }
}

/// The engine's side of a prompt: resolves to the text a client sent.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct PromptReply {
    state: OneshotState<String>,
}

impl PromptReply {
    pub(crate) fn waiting(rx: oneshot::Receiver<String>) -> Self {
        Self {
            state: OneshotState::Waiting(rx),
        }
    }

    pub(crate) fn abandoned() -> Self {
        Self {
            state: OneshotState::Ready(Some(SessionError::Abandoned)),
        }
    }
}

impl Future for PromptReply {
    type Output = Result<String, SessionError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            OneshotState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.map_err(|_| SessionError::Abandoned)),
            OneshotState::Ready(error) => {
                Poll::Ready(Err(error.take().unwrap_or(SessionError::Abandoned)))
            }
        }
    }
}

#[derive(Debug)]
enum OneshotState<T> {
    Waiting(oneshot::Receiver<T>),
    Ready(Option<SessionError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn default_options_are_visible_and_bound() {
        let opts = SubmitOptions::default();
        assert!(opts.visible);
        assert!(opts.context_bound);
    }

    #[test]
    fn hidden_unbound_builder() {
        let opts = SubmitOptions::hidden().unbound();
        assert!(!opts.visible);
        assert!(!opts.context_bound);
    }

    #[test]
    fn rejected_pending_request_resolves_immediately() {
        let mut pending = PendingRequest::rejected(RequestId::new(), SessionError::Closed);
        assert_eq!(pending.cancel(), Err(SessionError::Closed));
        assert_eq!(pending.now_or_never().unwrap().unwrap_err(), SessionError::Closed);
    }

    #[test]
    fn prompt_reply_maps_dropped_sender_to_abandoned() {
        let (tx, rx) = oneshot::channel::<String>();
        drop(tx);
        let reply = PromptReply::waiting(rx);
        assert_eq!(reply.now_or_never().unwrap(), Err(SessionError::Abandoned));
    }

    #[test]
    fn response_maps_dropped_sender_to_closed() {
        let (tx, rx) = oneshot::channel::<Completion>();
        drop(tx);
        let response = PendingResponse::waiting(rx);
        assert_eq!(response.now_or_never().unwrap(), Err(SessionError::Closed));
    }
}
