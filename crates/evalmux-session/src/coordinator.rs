//! Session coordinator: routes engine prompts and output to the right caller.
//!
//! The coordinator has two faces. [`SessionHandle`] is cloned freely and used
//! by any number of clients to submit commands. [`EngineCallbacks`] is owned
//! by the single thread that receives the engine's callbacks; taking `&mut
//! self` on every callback is what makes the active stack safe to keep
//! unsynchronized.
//!
//! Matching rules:
//! - a prompt first completes every active request at its depth or deeper
//!   (their evaluation has returned);
//! - the head of the pending queue is matched if its captured contexts equal
//!   the prompt's, otherwise a hand-off token is parked for the next submit;
//! - error output fails every active request at or deeper than the error's
//!   effective depth.

use std::sync::Arc;

use evalmux_core::{CallFlag, Contexts, RequestId, SessionError, SessionEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::handoff::{HandoffSlot, HandoffToken};
use crate::queue::PendingQueue;
use crate::request::{PendingRequest, PromptReply, SubmitOptions};
use crate::source::RequestSource;
use crate::stack::{ActiveEntry, ActiveStack};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Buffer size of the event broadcast channel. Slow subscribers lag past it.
    pub event_capacity: usize,
    /// Frame kinds discarded from the innermost end of an error's contexts
    /// before computing which requests it unwinds.
    pub internal_frames: Vec<CallFlag>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            internal_frames: CallFlag::default_internal(),
        }
    }
}

/// State shared by clients and the engine side, all behind one lock so that
/// a prompt's "match or park" and a submit's "adopt or queue" never interleave.
#[derive(Default)]
struct Rendezvous {
    pending: PendingQueue,
    handoff: HandoffSlot,
    /// Request that took the hand-off token; the engine pushes it onto its
    /// active stack at the next callback.
    adopted: Option<ActiveEntry>,
    current: Option<Contexts>,
    closed: bool,
}

pub(crate) struct Shared {
    rendezvous: Mutex<Rendezvous>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    /// Remove a still-queued submission. False once the engine has taken it.
    pub(crate) fn withdraw(&self, id: &RequestId) -> bool {
        self.rendezvous.lock().pending.remove(id)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.rendezvous.lock().closed
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("no event subscribers");
        }
    }
}

/// Owner of a freshly created session, before it is split between the
/// client side and the engine side.
pub struct SessionCoordinator {
    handle: SessionHandle,
    engine: EngineCallbacks,
}

impl SessionCoordinator {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            rendezvous: Mutex::new(Rendezvous::default()),
            events,
        });
        Self {
            handle: SessionHandle {
                shared: Arc::clone(&shared),
            },
            engine: EngineCallbacks {
                shared,
                active: ActiveStack::default(),
                internal_frames: config.internal_frames,
                closed: false,
            },
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn split(self) -> (SessionHandle, EngineCallbacks) {
        (self.handle, self.engine)
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Client-facing side of a session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Submit a command slot. Resolves once the engine reaches a prompt
    /// matching this submission.
    pub fn submit(&self, options: SubmitOptions) -> PendingRequest {
        let id = RequestId::new();
        let mut rv = self.shared.rendezvous.lock();
        if rv.closed {
            debug!(request_id = %id, "submit on closed session");
            return PendingRequest::rejected(id, SessionError::Closed);
        }

        // The engine is already parked at a prompt nothing queued matched.
        if let Some(token) = rv.handoff.take() {
            let contexts = token.contexts.clone();
            let (source, rx) = RequestSource::new(id, options.visible, Some(contexts.clone()));
            if let Err(err) = source.adopt(token) {
                return PendingRequest::rejected(source.id().clone(), err);
            }
            if let Some(previous) = rv.adopted.replace(ActiveEntry::new(Arc::clone(&source), contexts)) {
                warn!(request_id = %previous.source.id(), "hand-off adopted twice before engine callback");
            }
            debug!(request_id = %source.id(), "adopted waiting prompt");
            drop(rv);
            return PendingRequest::new(source, rx, Arc::clone(&self.shared));
        }

        let captured = if options.context_bound {
            rv.current.clone()
        } else {
            None
        };
        let (source, rx) = RequestSource::new(id, options.visible, captured);
        rv.pending.push(Arc::clone(&source));
        debug!(
            request_id = %source.id(),
            visible = options.visible,
            pending = rv.pending.len(),
            "request queued"
        );
        drop(rv);
        PendingRequest::new(source, rx, Arc::clone(&self.shared))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.rendezvous.lock().pending.len()
    }

    /// Contexts of the most recent prompt, if the engine has prompted yet.
    pub fn current_contexts(&self) -> Option<Contexts> {
        self.shared.rendezvous.lock().current.clone()
    }

    /// Whether the engine is parked at a prompt no client has claimed.
    pub fn is_engine_waiting(&self) -> bool {
        self.shared.rendezvous.lock().handoff.is_occupied()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Engine-facing side of a session. Drive it from the engine callback thread.
pub struct EngineCallbacks {
    shared: Arc<Shared>,
    active: ActiveStack,
    internal_frames: Vec<CallFlag>,
    closed: bool,
}

impl EngineCallbacks {
    /// The engine wants input at `contexts`.
    ///
    /// Returns immediately; the reply resolves with the text of whichever
    /// request this prompt is matched to.
    pub fn on_prompt(
        &mut self,
        contexts: Contexts,
        prompt: &str,
        max_length: usize,
        add_to_history: bool,
    ) -> PromptReply {
        if self.closed {
            warn!("prompt after session close");
            return PromptReply::abandoned();
        }
        // Contexts are recorded before unwinding so a client woken by a
        // completion below captures the depth the engine is returning to.
        let adopted = {
            let mut rv = self.shared.rendezvous.lock();
            rv.current = Some(contexts.clone());
            if rv.handoff.take().is_some() {
                debug!("discarding unclaimed hand-off");
            }
            rv.adopted.take()
        };
        if let Some(entry) = adopted {
            trace!(request_id = %entry.source.id(), "hand-off request now active");
            self.active.push(entry);
        }

        let depth = contexts.depth();
        for entry in self.active.unwind_to(depth) {
            debug!(request_id = %entry.source.id(), depth = entry.depth(), "evaluation returned");
            if let Err(err) = entry.source.complete() {
                warn!(request_id = %entry.source.id(), depth, error = %err, "unwound request was not active");
            }
        }

        if !self.active.any_hidden() {
            self.shared.emit(SessionEvent::BeforeRequest {
                contexts: contexts.clone(),
                prompt: prompt.to_string(),
                max_length,
                add_to_history,
            });
        }

        let matched = {
            let mut rv = self.shared.rendezvous.lock();
            match rv.pending.pop_match(&contexts) {
                Some(source) => source,
                None => {
                    let (token, reply) = HandoffToken::new(contexts, prompt, max_length);
                    rv.handoff.install(token);
                    trace!(depth, pending = rv.pending.len(), "prompt parked for next submit");
                    return reply;
                }
            }
        };

        match matched.claim_for_prompt(contexts.clone(), prompt, max_length) {
            Ok(reply) => {
                debug!(request_id = %matched.id(), depth, "request matched to prompt");
                self.active.push(ActiveEntry::new(matched, contexts));
                reply
            }
            Err(err) => {
                warn!(request_id = %matched.id(), error = %err, "queued request could not be matched");
                self.park(contexts, prompt, max_length)
            }
        }
    }

    /// The engine wrote `message` while at `contexts`.
    pub fn on_output(&mut self, contexts: &Contexts, message: &str, is_error: bool) {
        if self.closed {
            return;
        }
        self.absorb_adopted();
        let suppressed = self.active.any_hidden();

        if !is_error {
            for entry in self.active.iter() {
                if let Err(err) = entry.source.write(message) {
                    warn!(request_id = %entry.source.id(), depth = entry.depth(), error = %err, "output not recorded");
                }
            }
            if !suppressed {
                self.shared.emit(SessionEvent::Response {
                    contexts: contexts.clone(),
                    message: message.to_string(),
                });
            }
            return;
        }

        let depth = contexts.effective_depth(&self.internal_frames);
        if !suppressed {
            self.shared.emit(SessionEvent::Error {
                contexts: contexts.clone(),
                message: message.to_string(),
            });
        }
        let failed = self.active.unwind_to(depth);
        debug!(depth, failed = failed.len(), "engine error unwound requests");
        for entry in failed {
            if let Err(err) = entry.source.fail(message) {
                warn!(request_id = %entry.source.id(), depth, error = %err, "failed request was not active");
            }
        }
    }

    /// End the session: queued submissions and active requests resolve to
    /// [`SessionError::Closed`] and later submits are rejected.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // One critical section: a submit either adopts before this and is
        // collected here, or sees `closed` and is rejected.
        let (adopted, queued, stale) = {
            let mut rv = self.shared.rendezvous.lock();
            rv.closed = true;
            (rv.adopted.take(), rv.pending.drain(), rv.handoff.take())
        };
        drop(stale);

        let mut active = self.active.drain();
        active.extend(adopted);
        debug!(queued = queued.len(), active = active.len(), "session closed");
        for source in queued {
            source.abort(SessionError::Closed);
        }
        for entry in active {
            entry.source.abort(SessionError::Closed);
        }
    }

    /// Number of matched requests whose evaluation has not returned.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Depth of the innermost active request.
    pub fn active_depth(&self) -> Option<usize> {
        self.active.top_depth()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn absorb_adopted(&mut self) {
        let adopted = self.shared.rendezvous.lock().adopted.take();
        if let Some(entry) = adopted {
            trace!(request_id = %entry.source.id(), "hand-off request now active");
            self.active.push(entry);
        }
    }

    fn park(&mut self, contexts: Contexts, prompt: &str, max_length: usize) -> PromptReply {
        let (token, reply) = HandoffToken::new(contexts, prompt, max_length);
        self.shared.rendezvous.lock().handoff.install(token);
        reply
    }
}

impl Drop for EngineCallbacks {
    fn drop(&mut self) {
        self.close();
    }
}
