use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{HookKind, RawHook};
use crate::actions::Action;
use crate::agent::AgentKind;

/// Header carrying the shared hook secret
pub const SECRET_HEADER: &str = "x-panebridge-secret";

#[derive(Clone)]
struct HookState {
    tx: mpsc::UnboundedSender<Action>,
    secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct HookQuery {
    agent: Option<String>,
}

/// Build the hook ingestion router
pub fn router(tx: mpsc::UnboundedSender<Action>, secret: &str) -> Router {
    let state = HookState {
        tx,
        secret: Arc::from(secret),
    };

    Router::new()
        .route("/health", get(health))
        .route("/hook/:event", post(receive_hook))
        .with_state(state)
}

/// Serve hooks until the listener fails
pub async fn serve(bind: SocketAddr, tx: mpsc::UnboundedSender<Action>, secret: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind hook server on {bind}"))?;
    tracing::info!(%bind, "hook server listening");
    axum::serve(listener, router(tx, secret))
        .await
        .context("hook server stopped")
}

async fn health() -> &'static str {
    "ok"
}

/// Accept a hook payload and hand it to the control loop.
///
/// The payload is only validated later, so agents never wait on the bridge.
async fn receive_hook(
    State(state): State<HookState>,
    Path(event): Path<String>,
    Query(query): Query<HookQuery>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> StatusCode {
    if !state.secret.is_empty() {
        let presented = headers
            .get(SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(&*state.secret) {
            tracing::warn!(event, "hook rejected: bad secret");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let Some(kind) = HookKind::from_path(&event) else {
        return StatusCode::NOT_FOUND;
    };

    let agent = match query.agent.as_deref() {
        None => AgentKind::ClaudeCode,
        Some(name) => match AgentKind::from_name(name) {
            Some(agent) => agent,
            None => {
                tracing::debug!(agent = name, "hook from unknown agent dropped");
                return StatusCode::BAD_REQUEST;
            }
        },
    };

    if state
        .tx
        .send(Action::Hook(RawHook {
            kind,
            agent,
            payload,
        }))
        .is_err()
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn post_hook(uri: &str, secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_hook_is_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = router(tx, "s3cret");

        let response = app
            .oneshot(post_hook(
                "/hook/stop?agent=codex",
                Some("s3cret"),
                r#"{"cwd":"/w/api"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.try_recv().unwrap() {
            Action::Hook(hook) => {
                assert_eq!(hook.kind, HookKind::Stop);
                assert_eq!(hook.agent, AgentKind::Codex);
                assert_eq!(hook.payload["cwd"], "/w/api");
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let app = router(tx, "s3cret");

        let response = app
            .oneshot(post_hook("/hook/stop", Some("nope"), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_event_and_agent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let app = router(tx, "");

        let response = app
            .clone()
            .oneshot(post_hook("/hook/teleport", None, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_hook("/hook/stop?agent=vim", None, "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
