use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::counter;
use relay_deployment::{admission, AdmissionError, DeploymentRequest, DeploymentStatus, Envelope, EnvelopeError};
use relay_events::{EventBus, EventBusError, Message, MessageStream, Topic};
use relay_status::StatusReporter;
use relay_storage::{KeyStore, StoreError, Team};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::cluster::ClusterClientProvider;
use crate::executor::{ExecuteError, Executor};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;
pub const MAX_IN_FLIGHT: usize = 1024;

/// Why a message did not turn into an executable request.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("message from {key_id} failed authentication")]
    Unauthenticated { key_id: String },
    #[error(transparent)]
    Malformed(EnvelopeError),
    #[error("key store: {0}")]
    Store(#[from] StoreError),
    #[error("key {key_id} signed a request for team {team}")]
    TeamMismatch { key_id: String, team: String },
    #[error("{cause}")]
    Admission {
        request: Box<DeploymentRequest>,
        cause: AdmissionError,
    },
}

impl PrepareError {
    /// Label for the discard counter.
    pub fn reason(&self) -> &'static str {
        match self {
            PrepareError::Unauthenticated { .. } => "signature",
            PrepareError::Malformed(_) => "malformed",
            PrepareError::Store(_) => "key_store",
            PrepareError::TeamMismatch { .. } => "team_mismatch",
            PrepareError::Admission { cause, .. } => cause.reason(),
        }
    }
}

/// Deploys requests addressed to one cluster.
pub struct Agent {
    cluster: String,
    store: Arc<dyn KeyStore>,
    clients: Arc<dyn ClusterClientProvider>,
    reporter: StatusReporter,
    max_in_flight: usize,
}

impl Agent {
    pub fn new(
        cluster: impl Into<String>,
        store: Arc<dyn KeyStore>,
        clients: Arc<dyn ClusterClientProvider>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            store,
            clients,
            reporter,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.clamp(1, MAX_IN_FLIGHT);
        self
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Authenticate and decode `message`, then run admission at `now`.
    pub async fn prepare(
        &self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<DeploymentRequest, PrepareError> {
        let unauthenticated = || PrepareError::Unauthenticated {
            key_id: message.key_id.clone(),
        };

        let keys = match self.store.read_by_team(&Team::new(message.key_id.clone())).await {
            Ok(keys) => keys,
            Err(StoreError::NotFound) => return Err(unauthenticated()),
            Err(e) => return Err(e.into()),
        };

        let envelope = Envelope::from_bytes(&message.body).map_err(PrepareError::Malformed)?;
        let req = envelope.unwrap(keys.iter().map(|k| &k.key)).map_err(|e| {
            if e.is_auth() {
                unauthenticated()
            } else {
                PrepareError::Malformed(e)
            }
        })?;

        if req.team() != message.key_id {
            return Err(PrepareError::TeamMismatch {
                key_id: message.key_id.clone(),
                team: req.team().to_string(),
            });
        }

        if let Err(cause) = admission::admit(&req, &self.cluster, now) {
            return Err(PrepareError::Admission {
                request: Box::new(req),
                cause,
            });
        }
        Ok(req)
    }

    /// Process one message end to end. Never fails; outcomes go to the reporter.
    pub async fn handle(&self, message: Message) {
        let req = match self.prepare(&message, Utc::now()).await {
            Ok(req) => req,
            Err(e) => {
                counter!("relay_messages_discarded_total", "reason" => e.reason()).increment(1);
                self.reject(&message, e);
                return;
            }
        };

        let span = req.span();
        self.execute(req).instrument(span).await;
    }

    fn reject(&self, message: &Message, err: PrepareError) {
        match err {
            PrepareError::Admission { request, cause } if cause.reports_status() => {
                let _guard = request.span().entered();
                warn!(deadline = request.deadline, "discarding request: {cause}");
                self.reporter.report(DeploymentStatus::failure(&request, cause));
            }
            PrepareError::Admission { request, cause } => {
                trace!(
                    delivery_id = %request.delivery_id,
                    cluster = %request.cluster,
                    "discarding request: {cause}"
                );
            }
            PrepareError::Store(e) => {
                error!(key_id = %message.key_id, error = %e, "cannot read keys, dropping message");
            }
            other => {
                warn!(key_id = %message.key_id, error = %other, "discarding message");
            }
        }
    }

    async fn execute(&self, req: DeploymentRequest) {
        let client = match self.clients.client_for_team(req.team()).await {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "cannot build cluster client for team");
                self.reporter.report(DeploymentStatus::failure(&req, e));
                return;
            }
        };

        let resources = match req.payload_spec.resources() {
            Ok(resources) => resources,
            Err(e) => {
                error!(error = %e, "unusable kubernetes section");
                self.reporter.report(DeploymentStatus::error(
                    &req,
                    format!("unserializing kubernetes resources: {e}"),
                ));
                return;
            }
        };

        if resources.is_empty() {
            error!("{}", ExecuteError::EmptyResourceList);
            self.reporter
                .report(DeploymentStatus::error(&req, ExecuteError::EmptyResourceList));
            return;
        }

        info!(resources = resources.len(), "deploying");
        self.reporter.report(DeploymentStatus::in_progress(&req));

        match Executor::new(client).apply(&resources).await {
            Ok(applied) => {
                info!("deployment successful");
                self.reporter
                    .report(DeploymentStatus::success(&req, applied.len()));
            }
            Err(e) => {
                warn!(error = %e, "deployment failed");
                self.reporter.report(DeploymentStatus::failure(&req, e));
            }
        }
    }

    /// Subscribe to `topic` and [`serve`](Self::serve) it.
    pub async fn run<F>(
        self: Arc<Self>,
        bus: Arc<dyn EventBus>,
        topic: &Topic,
        shutdown: F,
    ) -> Result<(), EventBusError>
    where
        F: Future<Output = ()>,
    {
        let stream = bus.subscribe(topic).await?;
        info!(cluster = %self.cluster, %topic, "agent subscribed");
        self.serve(stream, shutdown).await;
        Ok(())
    }

    /// Handle messages from `stream` until it ends or `shutdown` resolves,
    /// then wait for in-flight requests to report their outcome.
    pub async fn serve<F>(self: Arc<Self>, mut stream: MessageStream, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        info!(cluster = %self.cluster, max_in_flight = self.max_in_flight, "agent listening");

        loop {
            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting requests");
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting requests");
                    break;
                }
                message = stream.next() => match message {
                    Some(message) => message,
                    None => {
                        debug!("subscription closed");
                        break;
                    }
                },
            };

            let agent = self.clone();
            tokio::spawn(async move {
                agent.handle(message).await;
                drop(agent);
                drop(permit);
            });
        }

        debug!("draining in-flight requests");
        // max_in_flight is clamped to MAX_IN_FLIGHT, which fits in u32.
        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        if let Err(e) = permits.acquire_many(all).await {
            warn!(error = %e, "in-flight requests were not drained");
        };
    }
}
