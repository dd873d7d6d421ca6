//! Per-cluster agent.
//!
//! Receives every broadcast deployment request, keeps the ones addressed to
//! its cluster that are still fresh, applies their resources in order and
//! reports progress through a [`relay_status::StatusReporter`].

mod agent;
mod cluster;
mod executor;
mod kube_client;

pub use agent::{Agent, PrepareError, DEFAULT_MAX_IN_FLIGHT, MAX_IN_FLIGHT};
pub use cluster::{AppliedObject, ClusterClient, ClusterClientProvider, ClusterError, DecodedManifest};
pub use executor::{ExecuteError, Executor};
pub use kube_client::{KubeClientProvider, KubeClusterClient};
