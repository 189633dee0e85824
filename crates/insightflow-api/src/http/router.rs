//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`. Middleware: CORS and request tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Catalog
        .route("/templates", get(handlers::templates::list_templates))
        .route("/templates/{id}", get(handlers::templates::get_template))
        // Executions
        .route("/executions", post(handlers::executions::create_execution))
        .route("/executions/{id}", get(handlers::executions::get_execution))
        .route(
            "/executions/{id}/status",
            get(handlers::executions::get_status),
        )
        .route(
            "/executions/{id}/run",
            post(handlers::executions::run_execution),
        )
        .route(
            "/executions/{id}/cancel",
            post(handlers::executions::cancel_execution),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use insightflow_types::config::EngineConfig;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        build_router(AppState::new(EngineConfig::default()))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create(app: &Router, body: Value) -> String {
        let (status, json) = send(app, "POST", "/api/v1/executions", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, json) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn templates_listed_in_envelope() {
        let (status, json) = send(&app(), "GET", "/api/v1/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 3);
        assert_eq!(json["_links"]["self"], "/api/v1/templates");
        assert!(json["meta"]["request_id"].is_string());
        assert!(json.get("errors").is_none());
    }

    #[tokio::test]
    async fn unknown_template_is_404() {
        let app = app();
        let (status, json) = send(&app, "GET", "/api/v1/templates/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["errors"][0]["code"], "TEMPLATE_NOT_FOUND");

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/executions",
            Some(json!({"template_id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_run_and_inspect() {
        let app = app();
        let id = create(
            &app,
            json!({
                "template_id": "revenue_analysis",
                "customizations": {"steps": {"revenue_query": {"parameters": {"limit": 100}}}}
            }),
        )
        .await;

        let (status, json) = send(&app, "GET", &format!("/api/v1/executions/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "pending");

        let (status, json) = send(&app, "POST", &format!("/api/v1/executions/{id}/run"), None).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        assert_eq!(json["data"]["status"], "completed");
        assert_eq!(json["data"]["completed_steps"].as_array().unwrap().len(), 4);
        assert_eq!(
            json["data"]["template"]["steps"][0]["parameters"]["limit"],
            json!(100)
        );
        assert!(!json["data"]["insights"].as_array().unwrap().is_empty());

        let (status, json) = send(&app, "GET", &format!("/api/v1/executions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "completed");

        // finished executions are no longer runnable
        let (status, json) = send(&app, "POST", &format!("/api/v1/executions/{id}/run"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["errors"][0]["code"], "EXECUTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn cancel_then_cancel_again() {
        let app = app();
        let id = create(&app, json!({"template_id": "conversion_analysis"})).await;

        let (status, json) = send(&app, "POST", &format!("/api/v1/executions/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "cancelled");
        assert_eq!(json["data"]["completed_count"], 0);

        let (status, _) = send(&app, "POST", &format!("/api/v1/executions/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = send(&app, "GET", &format!("/api/v1/executions/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "cancelled");
    }

    #[tokio::test]
    async fn cyclic_customization_is_422() {
        let (status, json) = send(
            &app(),
            "POST",
            "/api/v1/executions",
            Some(json!({
                "template_id": "conversion_analysis",
                "customizations": {"steps": {"funnel_query": {"depends_on": ["conversion_insights"]}}}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["errors"][0]["code"], "CIRCULAR_DEPENDENCY");
        assert!(json["errors"][0]["details"]["steps"].is_array());
    }

    #[tokio::test]
    async fn empty_template_id_is_422() {
        let (status, json) = send(
            &app(),
            "POST",
            "/api/v1/executions",
            Some(json!({"template_id": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["errors"][0]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_execution_is_404() {
        let id = uuid::Uuid::now_v7();
        let (status, json) = send(&app(), "GET", &format!("/api/v1/executions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["errors"][0]["code"], "EXECUTION_NOT_FOUND");
    }
}
