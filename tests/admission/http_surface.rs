use std::sync::Arc;

use super::cluster::Cluster;
use agentplane::config::WebhookConfig;
use agentplane::resources::{
    ANNOTATION_DISABLE_TOKEN, AgentRun, LABEL_ROLE, LABEL_SANDBOX, ObjectMetaExt, PolicySpec,
    SandboxPolicy, ToolAction, ToolRule, object_meta,
};
use agentplane::store::ResourceStore;
use agentplane::webhook::run_webhook_with_listener;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

struct WebhookServer {
    port: u16,
    shutdown: CancellationToken,
}

impl WebhookServer {
    async fn start(store: Arc<dyn ResourceStore>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = WebhookConfig {
            max_body_bytes: 16 * 1024,
            ..WebhookConfig::default()
        };
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(
            async move { run_webhook_with_listener(listener, store, &config, token).await },
        );
        Self { port, shutdown }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn strict_policy() -> PolicySpec {
    PolicySpec {
        tool_gating: vec![ToolRule {
            tool: "shell".into(),
            action: ToolAction::Deny,
        }],
        sandbox_policy: Some(SandboxPolicy {
            required: true,
            default_image: Some("sandbox:1".into()),
            ..SandboxPolicy::default()
        }),
        ..PolicySpec::default()
    }
}

fn review(object: &Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "req-1",
            "kind": {"group": "agentplane.dev", "version": "v1alpha1", "kind": "AgentRun"},
            "resource": {
                "group": "agentplane.dev",
                "version": "v1alpha1",
                "resource": "agentruns"
            },
            "name": "web-1",
            "namespace": "team",
            "operation": "CREATE",
            "userInfo": {"username": "system:serviceaccount:team:runner"},
            "object": object
        }
    })
}

fn submitted_run() -> Value {
    let mut run = AgentRun::default();
    run.metadata = object_meta("team", "web-1");
    run.spec.instance_ref = "alice".into();
    run.spec.task = "fetch the report".into();
    let mut object = serde_json::to_value(&run).unwrap();
    object["apiVersion"] = "agentplane.dev/v1alpha1".into();
    object["kind"] = "AgentRun".into();
    object
}

/// Applies the base64-encoded JSON Patch carried by an admission response.
fn apply(mut doc: Value, response: &Value) -> Value {
    let encoded = response["patch"].as_str().expect("response carries a patch");
    let patch: json_patch::Patch =
        serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
    json_patch::patch(&mut doc, &patch.0).unwrap();
    doc
}

/// The `response` half of the review the server answers with.
async fn post(client: &reqwest::Client, url: String, body: &Value) -> Value {
    let response = client.post(url).json(body).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "AdmissionReview");
    body["response"].clone()
}

#[tokio::test]
async fn mutate_then_validate_round_trip() {
    let cluster = Cluster::new();
    cluster.seed_tenant(Some(strict_policy()), false).await;
    let server = WebhookServer::start(cluster.store.clone()).await;
    let client = reqwest::Client::new();

    // As submitted, the run lacks the required sandbox.
    let raw = submitted_run();
    let denied = post(&client, server.url("/validate"), &review(&raw)).await;
    assert_eq!(denied["allowed"], false);
    assert_eq!(denied["uid"], "req-1");
    let reason = denied["status"]["message"].as_str().unwrap();
    assert!(reason.contains("sandbox"));

    let mutated = post(&client, server.url("/mutate"), &review(&raw)).await;
    assert_eq!(mutated["allowed"], true);
    assert_eq!(mutated["patchType"], "JSONPatch");
    let patched = apply(raw, &mutated);

    let run: AgentRun = serde_json::from_value(patched.clone()).unwrap();
    assert!(run.spec.sandbox_enabled());
    assert_eq!(run.spec.tool_policy.unwrap().deny, vec!["shell".to_string()]);
    assert_eq!(run.metadata.label(LABEL_ROLE), Some("agent-run"));
    assert_eq!(run.metadata.label(LABEL_SANDBOX), Some("true"));
    let annotations = run.metadata.annotations.unwrap();
    assert_eq!(annotations[ANNOTATION_DISABLE_TOKEN], "true");

    let allowed = post(&client, server.url("/validate"), &review(&patched)).await;
    assert_eq!(allowed["allowed"], true);

    // A second mutation pass has nothing left to do.
    let again = post(&client, server.url("/mutate"), &review(&patched)).await;
    assert_eq!(again["allowed"], true);
    assert!(again["patch"].is_null());
}

#[tokio::test]
async fn malformed_and_oversized_bodies_are_rejected() {
    let cluster = Cluster::new();
    let server = WebhookServer::start(cluster.store.clone()).await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(server.url("/validate"))
        .header("content-type", "application/json")
        .body("{ this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    let body: Value = malformed.json().await.unwrap();
    assert!(body.get("error").is_some());

    let mut huge = submitted_run();
    huge["spec"]["task"] = Value::String("x".repeat(64 * 1024));
    let oversized = client
        .post(server.url("/mutate"))
        .json(&review(&huge))
        .send()
        .await
        .unwrap();
    assert_eq!(oversized.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let health = client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}
