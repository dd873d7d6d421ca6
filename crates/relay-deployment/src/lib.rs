//! Deployment request protocol shared by the dispatcher and the agents.
//!
//! - [`DeploymentRequest`] and its [`PayloadSpec`]
//! - [`Envelope`]: the signed wire form of a request
//! - [`admission`]: whether an agent should act on a request
//! - [`DeploymentStatus`]: what agents report back

pub mod admission;
mod envelope;
mod payload;
mod request;
mod status;

pub use admission::AdmissionError;
pub use envelope::{Envelope, EnvelopeError};
pub use payload::{PayloadError, PayloadSpec, RawManifest};
pub use request::{DeploymentRequest, Repository, RepositoryError, RequestError};
pub use status::{DeploymentState, DeploymentStatus};
