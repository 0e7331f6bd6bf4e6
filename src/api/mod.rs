//! Control and observability API
//!
//! JSON over HTTP. Mode switches report logical failure in the body
//! with HTTP 200, so clients must read `success` rather than the status
//! code.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::router::{Mode, Router};

/// Billed rate for home traffic, USD per GB
const HOME_COST_PER_GB_USD: f64 = 3.50;

#[derive(Clone)]
struct ApiState {
    router: Arc<Router>,
    metrics: Arc<Metrics>,
}

/// `GET /status` response
#[derive(Debug, Serialize)]
struct StatusResponse {
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode_healthy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode_error: Option<&'static str>,
    uptime: String,
    connections: i64,
    traffic: TrafficStats,
    home: HomeStats,
    available_modes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TrafficStats {
    direct_mb: f64,
    warp_mb: f64,
    home_mb: f64,
    total_mb: f64,
}

#[derive(Debug, Serialize)]
struct HomeStats {
    limit_mb: u64,
    used_mb: f64,
    remaining_mb: f64,
    cost_usd: f64,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    check: Option<bool>,
}

/// `POST /mode/{mode}` response
#[derive(Debug, Serialize)]
struct SetModeResponse {
    success: bool,
    requested: String,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    // Kept for older clients
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct SetLimitRequest {
    limit_mb: u64,
}

#[derive(Debug, Serialize)]
struct SetLimitResponse {
    status: &'static str,
    limit_mb: u64,
}

/// Build the API route table.
pub fn build_router(router: Arc<Router>, metrics: Arc<Metrics>) -> axum::Router {
    let state = ApiState { router, metrics };

    axum::Router::new()
        .route("/status", get(handle_status))
        .route("/mode/:mode", post(handle_set_mode))
        .route("/metrics", get(handle_metrics))
        .route("/limit/home", post(handle_set_limit))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve the API until shutdown.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    info!("API server listening on {}", listener.local_addr()?);

    let app = build_router(router, metrics);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("API server shutting down");
        })
        .await?;

    Ok(())
}

async fn handle_status(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Json<StatusResponse> {
    let stats = state.metrics.snapshot();

    let direct_mb = stats.bytes_direct as f64 / 1024.0 / 1024.0;
    let warp_mb = stats.bytes_warp as f64 / 1024.0 / 1024.0;
    let home_mb = stats.bytes_home as f64 / 1024.0 / 1024.0;
    let limit_mb = state.router.get_home_limit();

    let mut resp = StatusResponse {
        mode: state.router.get_mode().to_string(),
        mode_healthy: None,
        mode_error: None,
        uptime: format_uptime(stats.uptime),
        connections: stats.active_connections,
        traffic: TrafficStats {
            direct_mb: round2(direct_mb),
            warp_mb: round2(warp_mb),
            home_mb: round2(home_mb),
            total_mb: round2(direct_mb + warp_mb + home_mb),
        },
        home: HomeStats {
            limit_mb,
            used_mb: round2(home_mb),
            remaining_mb: round2(limit_mb as f64 - home_mb),
            cost_usd: round2(home_mb / 1024.0 * HOME_COST_PER_GB_USD),
        },
        available_modes: state
            .router
            .available_modes()
            .iter()
            .map(|m| m.to_string())
            .collect(),
    };

    if query.check.unwrap_or(false) {
        match state.router.test_current_mode().await {
            Ok(()) => resp.mode_healthy = Some(true),
            Err(e) => {
                warn!("Mode health check failed: {}", e);
                resp.mode_healthy = Some(false);
                resp.mode_error = Some(classify_mode_error(&e, state.router.get_mode()));
            }
        }
    }

    Json(resp)
}

async fn handle_set_mode(
    State(state): State<ApiState>,
    Path(requested): Path<String>,
) -> Json<SetModeResponse> {
    let result = requested
        .parse::<Mode>()
        .and_then(|mode| state.router.set_mode(mode));

    match result {
        Ok(()) => {
            let mode = state.router.get_mode().to_string();
            info!("Mode switched to {}", mode);
            Json(SetModeResponse {
                success: true,
                requested,
                mode,
                error: None,
                status: Some("ok"),
            })
        }
        Err(e) => {
            warn!("Mode switch to {} failed: {}", requested, e);
            Json(SetModeResponse {
                success: false,
                requested,
                mode: state.router.get_mode().to_string(),
                error: Some(classify_set_mode_error(&e)),
                status: None,
            })
        }
    }
}

async fn handle_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn handle_set_limit(
    State(state): State<ApiState>,
    Json(request): Json<SetLimitRequest>,
) -> Json<SetLimitResponse> {
    state.router.set_home_limit(request.limit_mb);
    info!("Home proxy limit set to {} MB", request.limit_mb);

    Json(SetLimitResponse {
        status: "ok",
        limit_mb: request.limit_mb,
    })
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

fn classify_set_mode_error(err: &Error) -> &'static str {
    match err {
        Error::ModeInvalid(_) => "mode_invalid",
        Error::ModeNotAvailable(_) => "mode_not_configured",
        Error::HomeLimitExhausted { .. } => "home_limit_reached",
        _ => "internal_error",
    }
}

fn classify_mode_error(err: &Error, mode: Mode) -> &'static str {
    match (mode, err) {
        (Mode::Warp, Error::InterfaceDown(_)) => "warp_interface_down",
        (Mode::Warp, Error::Timeout) => "warp_timeout",
        (Mode::Warp, _) => "warp_unreachable",
        (Mode::Home, Error::Timeout) => "home_timeout",
        (Mode::Home, _) => "home_unreachable",
        _ => "check_failed",
    }
}

fn format_uptime(d: std::time::Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;

    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn round2(f: f64) -> f64 {
    (f * 100.0).trunc() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventsConfig;
    use crate::router::{Dialer, DirectDialer};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_uptime(Duration::from_secs(3700)), "1h1m40s");
    }

    #[test]
    fn test_round2_truncates() {
        assert_eq!(round2(1.2345), 1.23);
        assert_eq!(round2(1.239), 1.23);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_classify_set_mode_errors() {
        assert_eq!(
            classify_set_mode_error(&Error::ModeInvalid("x".into())),
            "mode_invalid"
        );
        assert_eq!(
            classify_set_mode_error(&Error::ModeNotAvailable(Mode::Warp)),
            "mode_not_configured"
        );
        assert_eq!(
            classify_set_mode_error(&Error::HomeLimitExhausted { used_mb: 1 }),
            "home_limit_reached"
        );
        assert_eq!(classify_set_mode_error(&Error::Timeout), "internal_error");
    }

    #[test]
    fn test_classify_mode_errors() {
        assert_eq!(
            classify_mode_error(&Error::InterfaceDown("warp0 interface down".into()), Mode::Warp),
            "warp_interface_down"
        );
        assert_eq!(classify_mode_error(&Error::Timeout, Mode::Warp), "warp_timeout");
        assert_eq!(
            classify_mode_error(&Error::Unreachable(Mode::Warp), Mode::Warp),
            "warp_unreachable"
        );
        assert_eq!(classify_mode_error(&Error::Timeout, Mode::Home), "home_timeout");
        assert_eq!(
            classify_mode_error(&Error::Unreachable(Mode::Home), Mode::Home),
            "home_unreachable"
        );
        assert_eq!(classify_mode_error(&Error::Timeout, Mode::Direct), "check_failed");
    }

    #[tokio::test]
    async fn test_api_endpoints() {
        let metrics = Arc::new(Metrics::new());
        let mut dialers: HashMap<Mode, Arc<dyn Dialer>> = HashMap::new();
        dialers.insert(Mode::Direct, Arc::new(DirectDialer::new(None)));
        let router = Arc::new(
            Router::with_dialers(
                dialers,
                metrics.clone(),
                0,
                Mode::Direct,
                None,
                EventsConfig::default(),
            )
            .unwrap(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(serve(listener, router, metrics.clone(), shutdown_rx));

        let client = reqwest::Client::new();
        let base = format!("http://{}", addr);

        let health: Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");

        metrics.add_bytes("direct", 3 * 1024 * 1024);
        let status: Value = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["mode"], "direct");
        assert_eq!(status["traffic"]["direct_mb"], 3.0);
        assert_eq!(status["traffic"]["total_mb"], 3.0);
        assert_eq!(status["available_modes"], json!(["direct"]));
        assert!(status.get("mode_healthy").is_none());

        let checked: Value = client
            .get(format!("{}/status?check=true", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(checked["mode_healthy"], true);
        assert!(checked.get("mode_error").is_none());

        let resp: Value = client
            .post(format!("{}/mode/warp", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["success"], false);
        assert_eq!(resp["error"], "mode_not_configured");
        assert_eq!(resp["mode"], "direct");

        let resp: Value = client
            .post(format!("{}/mode/bogus", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["error"], "mode_invalid");

        let resp: Value = client
            .post(format!("{}/mode/direct", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["success"], true);
        assert_eq!(resp["status"], "ok");

        let resp: Value = client
            .post(format!("{}/limit/home", base))
            .json(&json!({"limit_mb": 42}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["limit_mb"], 42);

        let text = client
            .get(format!("{}/metrics", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(text.contains("switch_gate_bytes_total{mode=\"direct\"}"));
        assert!(text.contains("switch_gate_uptime_seconds"));

        drop(shutdown_tx);
    }
}
