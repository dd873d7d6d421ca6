//! Upstream side of the relay.
//!
//! Turns authenticated deployment triggers into signed requests on the
//! transport, administers team keys on behalf of callers identified by their
//! authorization groups, and follows the statuses agents report back.

mod dispatcher;
mod keys;
mod status_watch;
mod trigger;

pub use dispatcher::{DispatchError, Dispatcher};
pub use keys::{ApiKeyService, Groups, KeyAccessError};
pub use status_watch::StatusWatcher;
pub use trigger::{
    build_request, BuildError, TriggerDeployment, TriggerEvent, TriggerRepository, TriggerSubmission,
    ValidationError,
};
