//! Request/response correlation for a single re-entrant interactive engine.
//!
//! Clients submit through a [`SessionHandle`]; the thread receiving engine
//! callbacks drives [`EngineCallbacks`]. Each submission is matched to the
//! engine prompt it belongs to and receives exactly the output produced
//! while it was active.

mod coordinator;
mod handoff;
pub mod mock;
mod queue;
mod request;
mod source;
mod stack;

pub use coordinator::{EngineCallbacks, SessionConfig, SessionCoordinator, SessionHandle};
pub use mock::{MockEngine, MockEngineConfig};
pub use request::{PendingRequest, PendingResponse, PromptReply, Request, SubmitOptions};

pub use evalmux_core::{CallFlag, Context, Contexts, RequestId, SessionError, SessionEvent};
