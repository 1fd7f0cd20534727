//! Router assembly, health, and metrics endpoints.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{rules, sessions};
use crate::state::SharedState;
use crate::{sse, ws};

/// Build the full application router.
pub fn router(state: SharedState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/sessions", post(sessions::create).get(sessions::list))
        .route(
            "/api/sessions/{id}",
            get(sessions::get).delete(sessions::kill),
        )
        .route("/api/sessions/{id}/message", post(sessions::message))
        .route("/api/sessions/{id}/interrupt", post(sessions::interrupt))
        .route("/api/sessions/{id}/messages", get(sessions::messages))
        .route("/api/sessions/{id}/ws", get(ws::session_ws))
        .route("/api/permissions/rules", get(rules::list).post(rules::create))
        .route(
            "/api/permissions/rules/{id}",
            patch(rules::update).delete(rules::delete),
        )
        .route("/api/permissions/log", get(rules::log))
        .route("/api/events", get(sse::events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `GET /health`.
async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.manager.active_count(),
        "subscriberCount": state.manager.bus().subscriber_count(),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

/// `GET /metrics` — Prometheus text format.
async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    crate::metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use conduit_permissions::PermissionEngine;
    use conduit_runtime::{EventBus, SessionManager, SessionManagerConfig};
    use conduit_store::{NewProject, Store};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> (SharedState, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let project = store
            .create_project(&NewProject {
                name: "P",
                folder_path: "/tmp",
                default_model: None,
                default_permission_mode: None,
                system_prompt: None,
                append_system_prompt: None,
            })
            .unwrap();
        let permissions = Arc::new(PermissionEngine::new(Arc::clone(&store)));
        let manager = SessionManager::new(
            SessionManagerConfig {
                cli_path: "true".into(),
                access_token: None,
                port_range_start: 19400,
                port_range_end: 19409,
                max_sessions: 4,
            },
            store,
            EventBus::new(),
            permissions,
        );
        let handle = PrometheusBuilder::new().build_recorder().handle();
        (AppState::new(manager, handle), project.id)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _project_id) = test_state();
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["activeSessions"], 0);
    }

    #[tokio::test]
    async fn list_sessions_empty() {
        let (state, _project_id) = test_state();
        let response = router(state)
            .oneshot(Request::builder().uri("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["sessions"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn get_missing_session_is_404() {
        let (state, _project_id) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn create_session_with_bad_permission_mode_is_400() {
        let (state, project_id) = test_state();
        let body = serde_json::json!({
            "projectId": project_id,
            "name": "s",
            "permissionMode": "yolo",
        });
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["kind"], "validation_error");
    }

    #[tokio::test]
    async fn rule_crud_round_trip() {
        let (state, project_id) = test_state();
        let app = router(state);

        let create_body = serde_json::json!({
            "projectId": project_id,
            "toolName": "Bash",
            "ruleContent": "git:*",
            "behavior": "allow",
            "priority": 5,
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/permissions/rules")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let rule_id = created["rule"]["id"].as_str().unwrap().to_string();

        // Update with a mix of allowlisted and forbidden keys.
        let patch_body = serde_json::json!({"priority": 9, "id": "rule_hijack"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/permissions/rules/{rule_id}"))
                    .header("content-type", "application/json")
                    .body(Body::from(patch_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = body_json(response).await;
        assert_eq!(updated["rule"]["priority"], 9);
        assert_eq!(updated["rule"]["id"], rule_id.as_str());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/permissions/rules/{rule_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/permissions/rules/{rule_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn permission_log_requires_session_id() {
        let (state, _project_id) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/permissions/log")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn message_to_stopped_session_is_conflict() {
        let (state, project_id) = test_state();
        let _ = state
            .manager
            .store()
            .create_session(&conduit_store::NewSession {
                id: "s1",
                project_id: &project_id,
                name: "s",
                model: None,
                ws_port: 19400,
            })
            .unwrap();

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sessions/s1/message")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"content":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
