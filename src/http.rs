use crate::metrics::Metrics;
use crate::store::SnapshotStore;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::error;

const DASHBOARD: &str = include_str!("../static/dashboard.html");

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub store: Arc<SnapshotStore>,
}

pub fn build_router(
    metrics: Arc<Metrics>,
    store: Arc<SnapshotStore>,
    metrics_endpoint: bool,
) -> Router {
    let mut router = Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/metrics", get(snapshot_handler));
    if metrics_endpoint {
        router = router.route("/metrics", get(metrics_handler));
    }
    router
        .fallback(not_found)
        .with_state(HttpAppState { metrics, store })
}

async fn dashboard_handler(State(state): State<HttpAppState>) -> Html<&'static str> {
    state.metrics.inc_api_request("/");
    Html(DASHBOARD)
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_api_request("/api/metrics");
    let snapshot = state.store.get().await;
    let body = match serde_json::to_vec(&*snapshot) {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "не удалось сериализовать снимок");
            let fallback = serde_json::json!({ "error": format!("ошибка сериализации: {err}") });
            fallback.to_string().into_bytes()
        }
    };

    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Snapshot, SystemIdentity};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app(metrics_endpoint: bool) -> (Router, Arc<SnapshotStore>) {
        let metrics = Metrics::new().expect("инициализация метрик");
        let store = Arc::new(SnapshotStore::new(Snapshot::placeholder(
            SystemIdentity {
                hostname: "node-1".to_string(),
                ..SystemIdentity::default()
            },
            0,
        )));
        (build_router(metrics, store.clone(), metrics_endpoint), store)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Response<Body>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        (response.status(), response)
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn api_metrics_serves_placeholder_before_first_cycle() {
        let (app, _) = test_app(false);
        let (status, response) = get(app, "/api/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["cycle"], 0);
        assert_eq!(json["system"]["hostname"], "node-1");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn api_metrics_reports_collector_errors_with_200() {
        let (app, store) = test_app(false);
        let mut snapshot = Snapshot::new(SystemIdentity::default(), 1, 1_000);
        snapshot
            .collector_errors
            .insert("vpn".to_string(), "превышено время ожидания".to_string());
        store.publish(snapshot).await;

        let (status, response) = get(app, "/api/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["cycle"], 1);
        assert_eq!(json["collectorErrors"]["vpn"], "превышено время ожидания");
        assert!(json["cpu"].is_null());
    }

    #[tokio::test]
    async fn unknown_path_is_empty_404() {
        let (app, _) = test_app(false);
        let (status, response) = get(app, "/api/state").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body_text(response).await.is_empty());
    }

    #[tokio::test]
    async fn prometheus_endpoint_only_when_enabled() {
        let (app, _) = test_app(false);
        let (status, _) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (app, _) = test_app(true);
        let (status, response) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_text(response).await.contains("hostpulse_scrape_count_total"));
    }

    #[tokio::test]
    async fn dashboard_page_polls_api() {
        let (app, _) = test_app(false);
        let (status, response) = get(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert!(body_text(response).await.contains("/api/metrics"));
    }
}
