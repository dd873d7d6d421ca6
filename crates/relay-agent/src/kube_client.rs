//! Kubernetes implementation of the cluster contract.
//!
//! Objects are applied with server-side apply, so re-applying a manifest is
//! idempotent. Each team gets its own client that impersonates the team's
//! service account, which keeps a team inside its own RBAC grants.

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use relay_deployment::RawManifest;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::cluster::{AppliedObject, ClusterClient, ClusterClientProvider, ClusterError, DecodedManifest};

pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

fn group_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply_unstructured(&self, manifest: &RawManifest) -> Result<AppliedObject, ClusterError> {
        let decoded = DecodedManifest::decode(manifest)?;
        let reference = decoded.reference;

        let (group, version) = group_version(&reference.api_version);
        let gvk = GroupVersionKind {
            group,
            version,
            kind: reference.kind.clone(),
        };
        let api_resource = ApiResource::from_gvk(&gvk);

        let api: Api<DynamicObject> = match reference.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };

        trace!(object = %reference, "applying");
        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(&reference.name, &params, &Patch::Apply(&decoded.object))
            .await
            .map_err(|e| ClusterError::Apply(e.to_string()))?;

        debug!(object = %reference, "applied");
        Ok(reference)
    }
}

/// Builds one impersonating client per team and reuses it.
pub struct KubeClientProvider {
    config: Config,
    field_manager: String,
    impersonate_template: String,
    clients: DashMap<String, Arc<dyn ClusterClient>>,
}

impl KubeClientProvider {
    pub fn new(
        config: Config,
        field_manager: impl Into<String>,
        impersonate_template: impl Into<String>,
    ) -> Self {
        Self {
            config,
            field_manager: field_manager.into(),
            impersonate_template: impersonate_template.into(),
            clients: DashMap::new(),
        }
    }

    /// Kubeconfig first, in-cluster service account otherwise.
    pub async fn load_config(context: Option<&str>) -> Result<Config, ClusterError> {
        let options = kube::config::KubeConfigOptions {
            context: context.map(String::from),
            ..Default::default()
        };
        match Config::from_kubeconfig(&options).await {
            Ok(config) => Ok(config),
            Err(kubeconfig_err) => Config::incluster().map_err(|e| {
                ClusterError::Config(format!("kubeconfig: {kubeconfig_err}; in-cluster: {e}"))
            }),
        }
    }

    pub fn impersonation_user(&self, team: &str) -> String {
        self.impersonate_template.replace("{team}", team)
    }
}

#[async_trait]
impl ClusterClientProvider for KubeClientProvider {
    async fn client_for_team(&self, team: &str) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        if let Some(client) = self.clients.get(team) {
            return Ok(client.value().clone());
        }

        let mut config = self.config.clone();
        config.auth_info.impersonate = Some(self.impersonation_user(team));

        let client = Client::try_from(config).map_err(|e| ClusterError::Client {
            team: team.to_string(),
            reason: e.to_string(),
        })?;
        let client: Arc<dyn ClusterClient> =
            Arc::new(KubeClusterClient::new(client, self.field_manager.clone()));

        Ok(self
            .clients
            .entry(team.to_string())
            .or_insert(client)
            .value()
            .clone())
    }
}
