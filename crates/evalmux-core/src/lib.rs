pub mod context;
pub mod errors;
pub mod events;
pub mod ids;

pub use context::{CallFlag, Context, Contexts};
pub use errors::SessionError;
pub use events::SessionEvent;
pub use ids::{InvalidRequestId, RequestId};
