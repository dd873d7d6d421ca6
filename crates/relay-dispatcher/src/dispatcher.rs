use chrono::{Duration, Utc};
use metrics::counter;
use relay_crypto::AuthError;
use relay_deployment::{DeploymentRequest, Envelope, EnvelopeError, RequestError};
use relay_events::{EventBus, EventBusError, Message, Topic};
use relay_storage::{KeyStore, StoreError, Team};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::trigger::{build_request, BuildError, TriggerEvent, TriggerSubmission, ValidationError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("building request: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("key store: {0}")]
    Store(#[from] StoreError),
    #[error("sealing request: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("transport: {0}")]
    Transport(#[from] EventBusError),
}

impl From<BuildError> for DispatchError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Invalid(e) => DispatchError::Validation(e),
            BuildError::Request(e) => DispatchError::Request(e),
        }
    }
}

impl DispatchError {
    /// True when the trigger source is at fault and a retry will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(self, DispatchError::Validation(_) | DispatchError::Auth(_))
    }
}

/// Signs deployment requests with the team's newest key and broadcasts them.
pub struct Dispatcher {
    store: Arc<dyn KeyStore>,
    bus: Arc<dyn EventBus>,
    topic: Topic,
    ttl: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn KeyStore>, bus: Arc<dyn EventBus>, topic: Topic, ttl: Duration) -> Self {
        Self {
            store,
            bus,
            topic,
            ttl,
        }
    }

    /// Verify `signature` over the raw trigger `body` against every key of `team`.
    ///
    /// An unknown team fails exactly like a bad signature.
    pub async fn authenticate(
        &self,
        team: &Team,
        body: &[u8],
        signature: &[u8],
    ) -> Result<(), DispatchError> {
        let keys = match self.store.read_by_team(team).await {
            Ok(keys) => keys,
            Err(StoreError::NotFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        relay_crypto::verify_any(body, signature, keys.iter().map(|k| &k.key)).map_err(|e| {
            counter!("relay_messages_discarded_total", "reason" => "trigger_signature").increment(1);
            debug!(%team, "trigger signature rejected");
            e
        })?;
        Ok(())
    }

    /// Build, sign and publish a request for an already authenticated `team`.
    pub async fn dispatch(
        &self,
        team: &Team,
        event: &TriggerEvent,
        delivery_id: &str,
    ) -> Result<DeploymentRequest, DispatchError> {
        let req = build_request(event, delivery_id, Utc::now(), self.ttl)?;
        if req.team() != team.as_str() {
            return Err(ValidationError::TeamMismatch {
                authenticated: team.to_string(),
                payload: req.team().to_string(),
            }
            .into());
        }

        let keys = match self.store.read_by_team(team).await {
            Ok(keys) => keys,
            Err(StoreError::NotFound) => return Err(AuthError::SignatureMismatch.into()),
            Err(e) => return Err(e.into()),
        };
        let signing_key = keys.first().ok_or(AuthError::SignatureMismatch)?;

        let body = Envelope::wrap(&req, &signing_key.key)?.to_bytes()?;
        self.bus
            .publish(&self.topic, Message::new(team.as_str(), body))
            .await?;

        counter!("relay_deployments_dispatched_total").increment(1);
        info!(
            delivery_id = %req.delivery_id,
            cluster = %req.cluster,
            repository = %req.repository,
            %team,
            deadline = req.deadline,
            "deployment request dispatched"
        );
        Ok(req)
    }

    /// Full inbound path: authenticate the raw body, parse it, dispatch.
    pub async fn submit(
        &self,
        submission: &TriggerSubmission,
    ) -> Result<DeploymentRequest, DispatchError> {
        let team = Team::new(submission.team.clone());
        let signature = hex::decode(submission.signature.trim()).unwrap_or_default();

        self.authenticate(&team, submission.body.as_bytes(), &signature)
            .await?;

        let event: TriggerEvent = serde_json::from_str(&submission.body)
            .map_err(|e| ValidationError::InvalidEvent(e.to_string()))?;

        self.dispatch(&team, &event, &submission.delivery_id)
            .await
            .inspect_err(|e| {
                if e.is_client_error() {
                    warn!(delivery_id = %submission.delivery_id, %team, error = %e, "trigger rejected");
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use relay_crypto::{generate_key, sign, KEY_LEN};
    use relay_events_memory::MemoryEventBus;
    use relay_storage::{GroupId, MockKeyStore};
    use relay_store_memory::MemoryKeyStore;
    use serde_json::json;

    fn body(team: &str, cluster: &str) -> String {
        json!({
            "repo": {"full_name": "org/app"},
            "deployment": {
                "id": 5,
                "environment": cluster,
                "payload": {"team": team, "kubernetes": {"resources": [{"kind": "ConfigMap"}]}}
            }
        })
        .to_string()
    }

    async fn setup() -> (Dispatcher, Arc<MemoryKeyStore>, Arc<MemoryEventBus>) {
        let store = Arc::new(MemoryKeyStore::new());
        let bus = Arc::new(MemoryEventBus::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            bus.clone(),
            Topic::new("requests"),
            Duration::seconds(60),
        );
        (dispatcher, store, bus)
    }

    #[tokio::test]
    async fn submit_publishes_signed_request() {
        let (dispatcher, store, bus) = setup().await;
        let team = Team::new("aura");
        let secret = generate_key(KEY_LEN);
        store
            .write_initial(&team, &GroupId::new("g"), &secret)
            .await
            .unwrap();

        let mut stream = bus.subscribe(&Topic::new("requests")).await.unwrap();

        let body = body("aura", "dev");
        let submission = TriggerSubmission {
            team: "aura".into(),
            delivery_id: "d-1".into(),
            signature: hex::encode(sign(body.as_bytes(), secret.as_bytes())),
            body,
        };
        let req = dispatcher.submit(&submission).await.unwrap();
        assert_eq!(req.deadline - req.timestamp, 60);

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.key_id, "aura");
        let received = Envelope::from_bytes(&msg.body)
            .unwrap()
            .unwrap([&secret])
            .unwrap();
        assert_eq!(received, req);
    }

    #[tokio::test]
    async fn bad_signature_is_client_error_and_nothing_published() {
        let (dispatcher, store, bus) = setup().await;
        let team = Team::new("aura");
        store
            .write_initial(&team, &GroupId::new("g"), &generate_key(KEY_LEN))
            .await
            .unwrap();
        let mut stream = bus.subscribe(&Topic::new("requests")).await.unwrap();

        let body = body("aura", "dev");
        let submission = TriggerSubmission {
            team: "aura".into(),
            delivery_id: "d-1".into(),
            signature: hex::encode(sign(body.as_bytes(), b"wrong key")),
            body,
        };
        let err = dispatcher.submit(&submission).await.unwrap_err();
        assert!(matches!(err, DispatchError::Auth(_)));
        assert!(err.is_client_error());

        // Nothing arrives: publish a sentinel and make sure it is the first thing seen.
        bus.publish(&Topic::new("requests"), Message::new("sentinel", vec![]))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().key_id, "sentinel");
    }

    #[tokio::test]
    async fn unknown_team_looks_like_bad_signature() {
        let (dispatcher, _, _) = setup().await;
        let err = dispatcher
            .authenticate(&Team::new("ghost"), b"body", b"sig")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Auth(AuthError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn payload_team_must_match_authenticated_team() {
        let (dispatcher, store, _) = setup().await;
        let secret = generate_key(KEY_LEN);
        store
            .write_initial(&Team::new("aura"), &GroupId::new("g"), &secret)
            .await
            .unwrap();

        // Signed by aura, but deploys as another team.
        let body = body("victim", "dev");
        let submission = TriggerSubmission {
            team: "aura".into(),
            delivery_id: "d-1".into(),
            signature: hex::encode(sign(body.as_bytes(), secret.as_bytes())),
            body,
        };
        let err = dispatcher.submit(&submission).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::TeamMismatch { .. })
        ));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn unparseable_body_is_validation_error() {
        let (dispatcher, store, _) = setup().await;
        let secret = generate_key(KEY_LEN);
        store
            .write_initial(&Team::new("aura"), &GroupId::new("g"), &secret)
            .await
            .unwrap();

        let body = "not json".to_string();
        let submission = TriggerSubmission {
            team: "aura".into(),
            delivery_id: "d-1".into(),
            signature: hex::encode(sign(body.as_bytes(), secret.as_bytes())),
            body,
        };
        let err = dispatcher.submit(&submission).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::InvalidEvent(_))
        ));
    }

    #[tokio::test]
    async fn signs_with_newest_key_after_rotation() {
        let (dispatcher, store, bus) = setup().await;
        let team = Team::new("aura");
        let old = generate_key(KEY_LEN);
        let new = generate_key(KEY_LEN);
        store.write_initial(&team, &GroupId::new("g"), &old).await.unwrap();
        store.rotate(&team, &GroupId::new("g"), &new).await.unwrap();

        let mut stream = bus.subscribe(&Topic::new("requests")).await.unwrap();
        let event: TriggerEvent = serde_json::from_str(&body("aura", "dev")).unwrap();
        dispatcher.dispatch(&team, &event, "d-1").await.unwrap();

        let env = Envelope::from_bytes(&stream.next().await.unwrap().body).unwrap();
        assert!(env.unwrap([&new]).is_ok());
        assert!(env.unwrap([&old]).unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn store_outage_is_infrastructure_error() {
        let mut store = MockKeyStore::new();
        store
            .expect_read_by_team()
            .returning(|_| Err(StoreError::Backend("connection refused".into())));

        let dispatcher = Dispatcher::new(
            Arc::new(store),
            Arc::new(MemoryEventBus::new()),
            Topic::new("requests"),
            Duration::seconds(60),
        );
        let err = dispatcher
            .authenticate(&Team::new("aura"), b"body", b"sig")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn validation_happens_before_key_lookup() {
        let mut store = MockKeyStore::new();
        store.expect_read_by_team().never();
        let dispatcher = Dispatcher::new(
            Arc::new(store),
            Arc::new(MemoryEventBus::new()),
            Topic::new("requests"),
            Duration::seconds(60),
        );

        let event = TriggerEvent::default();
        let err = dispatcher
            .dispatch(&Team::new("aura"), &event, "d-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Validation(ValidationError::NoRepository)
        ));
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_an_infrastructure_error() {
        let mut store = MockKeyStore::new();
        store.expect_read_by_team().never();
        let dispatcher = Dispatcher::new(
            Arc::new(store),
            Arc::new(MemoryEventBus::new()),
            Topic::new("requests"),
            Duration::MAX,
        );

        let event: TriggerEvent = serde_json::from_str(&body("aura", "dev")).unwrap();
        let err = dispatcher
            .dispatch(&Team::new("aura"), &event, "d-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Request(RequestError::DeadlineOutOfRange { .. })
        ));
        assert!(!err.is_client_error());
    }
}
