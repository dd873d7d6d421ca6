use chrono::{Duration, Utc};
use relay_crypto::{generate_key, KEY_LEN};
use relay_deployment::{admission, AdmissionError, DeploymentRequest, Envelope, PayloadSpec, Repository};
use serde_json::json;

fn request(cluster: &str, ttl: Duration) -> DeploymentRequest {
    DeploymentRequest::new(
        Repository::new("org", "app"),
        11,
        PayloadSpec::new(
            "aura",
            vec![json!({"apiVersion": "v1", "kind": "Namespace"})],
        ),
        cluster,
        "delivery-77",
        Utc::now(),
        ttl,
    )
}

#[test]
fn signed_request_for_us_is_admitted_after_unwrap() {
    let key = generate_key(KEY_LEN);
    let wire = Envelope::wrap(&request("dev", Duration::seconds(60)), &key)
        .unwrap()
        .to_bytes()
        .unwrap();

    let req = Envelope::from_bytes(&wire).unwrap().unwrap([&key]).unwrap();
    assert!(admission::admit(&req, "dev", Utc::now()).is_ok());
    assert_eq!(req.payload_spec.resources().unwrap().len(), 1);
}

#[test]
fn request_for_other_cluster_is_not_mine_regardless_of_deadline() {
    let key = generate_key(KEY_LEN);
    for ttl in [Duration::seconds(60), Duration::zero()] {
        let env = Envelope::wrap(&request("prod", ttl), &key).unwrap();
        let req = env.unwrap([&key]).unwrap();
        let later = Utc::now() + Duration::seconds(120);
        assert_eq!(
            admission::admit(&req, "dev", later),
            Err(AdmissionError::NotMyCluster)
        );
    }
}
