use metrics::counter;
use relay_deployment::RawManifest;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cluster::{AppliedObject, ClusterClient, ClusterError};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("no resources to deploy")]
    EmptyResourceList,
    /// `index` is 1-based.
    #[error("resource {index}: {cause}")]
    ResourceApply { index: usize, cause: ClusterError },
}

/// Applies a request's resources to the cluster, one at a time, in order.
pub struct Executor {
    client: Arc<dyn ClusterClient>,
}

impl Executor {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Stops at the first failure. Resources applied before it stay applied.
    pub async fn apply(&self, resources: &[RawManifest]) -> Result<Vec<AppliedObject>, ExecuteError> {
        if resources.is_empty() {
            return Err(ExecuteError::EmptyResourceList);
        }

        let mut applied = Vec::with_capacity(resources.len());
        for (i, manifest) in resources.iter().enumerate() {
            let index = i + 1;
            let object = self
                .client
                .apply_unstructured(manifest)
                .await
                .map_err(|cause| ExecuteError::ResourceApply { index, cause })?;

            counter!("relay_kubernetes_resources_total").increment(1);
            info!("resource {index}: successfully deployed {object}");
            applied.push(object);
        }
        Ok(applied)
    }
}
