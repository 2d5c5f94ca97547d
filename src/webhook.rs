//! Git push webhook
//!
//! `POST /webhook/git` accepts GitHub-style push notifications. The body is
//! only trusted after its `X-Hub-Signature-256` HMAC checks out; a valid push
//! is handed to [`SyncService::handle_push_event`] and acknowledged with 204
//! before the dispatched work completes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::sync::{PushEvent, SyncService};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Deserialize)]
struct PushPayload {
    before: String,
    after: String,
    #[serde(rename = "ref")]
    reference: String,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    full_name: String,
}

/// Check a `sha256=<hex>` signature against the raw body
pub fn verify_signature(secret: &[u8], body: &[u8], signature: Option<&str>) -> Result<()> {
    let expected = signature
        .and_then(|s| s.strip_prefix(SIGNATURE_PREFIX))
        .and_then(|s| hex::decode(s).ok())
        .ok_or(Error::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| Error::InvalidSignature)
}

/// Signature header value for `body`, as the git host would send it
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| Error::Config {
        message: format!("unusable webhook secret: {}", e),
    })?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Parse a push payload into the engine's event type
pub fn parse_push(body: &[u8]) -> Result<PushEvent> {
    let payload: PushPayload = serde_json::from_slice(body).map_err(|e| Error::InvalidPayload {
        message: e.to_string(),
    })?;

    Ok(PushEvent {
        before: payload.before,
        after: payload.after,
        reference: payload.reference,
        repository: payload.repository.full_name,
    })
}

#[derive(Clone)]
struct WebhookState {
    service: Arc<SyncService>,
    secret: Arc<[u8]>,
    repository: String,
}

/// Build the webhook router
pub fn router(service: Arc<SyncService>, secret: impl Into<Vec<u8>>) -> Router {
    let secret: Vec<u8> = secret.into();
    let state = WebhookState {
        repository: service.source().repo_full_name(),
        service,
        secret: Arc::from(secret),
    };

    Router::new()
        .route("/webhook/git", post(handle_git_webhook))
        .route("/healthz", get(health_check))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy", "timestamp": chrono::Utc::now()}))
}

async fn handle_git_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<StatusCode, (StatusCode, String)> {
    match process(&state, &headers, &body).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "webhook processing failed");
            } else {
                tracing::warn!(error = %e, "webhook rejected");
            }
            Err((status, e.to_string()))
        }
    }
}

async fn process(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    verify_signature(&state.secret, body, signature)?;

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if event_type != "push" {
        tracing::debug!(event = event_type, "ignoring webhook event");
        return Ok(());
    }

    let event = parse_push(body)?;
    if event.repository != state.repository {
        return Err(Error::RepositoryMismatch {
            expected: state.repository.clone(),
            actual: event.repository,
        });
    }

    state.service.handle_push_event(&event).await?;
    Ok(())
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidSignature => StatusCode::UNAUTHORIZED,
        Error::InvalidPayload { .. } | Error::RepositoryMismatch { .. } => StatusCode::BAD_REQUEST,
        Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CmarkRenderer;
    use crate::source::{FileChange, ZERO_SHA};
    use crate::sync::testing::{FakeSource, FakeStore};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"hush";

    fn service(store: Arc<FakeStore>) -> Arc<SyncService> {
        let mut source = FakeSource::new();
        source
            .commit("main", "c1", vec![FileChange::added("posts/001-hello.md")])
            .content("posts/001-hello.md", "c1", "# Hello\n\nWorld")
            .fail_commit("bad");
        Arc::new(SyncService::new(
            Arc::new(source),
            store,
            Arc::new(CmarkRenderer::default()),
            "main",
            2,
        ))
    }

    fn push_body(repository: &str, after: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "before": ZERO_SHA,
            "after": after,
            "repository": { "full_name": repository },
        }))
        .unwrap()
    }

    fn request(event: &str, body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/git")
            .header(EVENT_HEADER, event);
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn signed(event: &str, body: Vec<u8>) -> Request<Body> {
        let signature = sign(SECRET, &body).unwrap();
        request(event, body, Some(signature))
    }

    #[test]
    fn test_verify_signature() {
        let body = b"{}";
        let good = sign(SECRET, body).unwrap();

        verify_signature(SECRET, body, Some(&good)).unwrap();
        assert!(verify_signature(b"other", body, Some(&good)).is_err());
        assert!(verify_signature(SECRET, b"{ }", Some(&good)).is_err());
        assert!(verify_signature(SECRET, body, Some("sha256=zz")).is_err());
        assert!(verify_signature(SECRET, body, Some(good.trim_start_matches("sha256="))).is_err());
        assert!(verify_signature(SECRET, body, None).is_err());
    }

    #[tokio::test]
    async fn test_valid_push_is_dispatched() {
        let store = Arc::new(FakeStore::new());
        let service = service(store.clone());
        let app = router(service.clone(), SECRET);

        let response = app
            .oneshot(signed("push", push_body("owner/blog", "c1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        service.wait_idle().await;
        assert!(store.post("001").unwrap().is_published());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let store = Arc::new(FakeStore::new());
        let app = router(service(store.clone()), SECRET);

        let body = push_body("owner/blog", "c1");
        let forged = sign(b"wrong", &body).unwrap();
        let response = app
            .clone()
            .oneshot(request("push", body.clone(), Some(forged)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request("push", body, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_ping_acknowledged() {
        let app = router(service(Arc::new(FakeStore::new())), SECRET);
        let response = app
            .oneshot(signed("ping", b"{\"zen\":\"hi\"}".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_bad_payloads() {
        let app = router(service(Arc::new(FakeStore::new())), SECRET);

        let response = app
            .clone()
            .oneshot(signed("push", b"not json".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(signed("push", push_body("someone/else", "c1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analysis_failure_is_server_error() {
        let app = router(service(Arc::new(FakeStore::new())), SECRET);
        let response = app
            .oneshot(signed("push", push_body("owner/blog", "bad")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = router(service(Arc::new(FakeStore::new())), SECRET);
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
