// API module - HTTP adapter exposing the supervisor facade as JSON endpoints

use crate::error::{Result, VigilError};
use crate::process::{DetailedReport, HealthReport, ProcessInfo, ProcessStatus, Supervisor};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default port of the HTTP adapter
pub const DEFAULT_PORT: u16 = 8090;

/// Supervisor error carried to the transport layer
#[derive(Debug)]
pub struct ApiError(VigilError);

impl From<VigilError> for ApiError {
    fn from(error: VigilError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Build the router over a shared supervisor
pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/status/detailed", get(handle_detailed_status))
        .route("/process/:name", get(handle_process_info))
        .route("/restart/:name", post(handle_restart))
        .route("/enable/:name", post(handle_enable))
        .route("/disable/:name", post(handle_disable))
        .route("/health", get(handle_health))
        .with_state(supervisor)
}

/// Bind the adapter address
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve the API until `shutdown` is cancelled
pub async fn serve(
    supervisor: Arc<Supervisor>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    debug!("HTTP API stopped");
    Ok(())
}

async fn handle_status(State(supervisor): State<Arc<Supervisor>>) -> Json<BTreeMap<String, ProcessStatus>> {
    Json(supervisor.get_status().await)
}

async fn handle_detailed_status(State(supervisor): State<Arc<Supervisor>>) -> Json<DetailedReport> {
    Json(supervisor.get_detailed_status().await)
}

async fn handle_process_info(
    State(supervisor): State<Arc<Supervisor>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<ProcessInfo>, ApiError> {
    Ok(Json(supervisor.get_process_info(&name).await?))
}

async fn handle_restart(
    State(supervisor): State<Arc<Supervisor>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    supervisor.restart_process(&name).await?;
    Ok(Json(json!({ "message": format!("Process {} restart requested", name) })))
}

async fn handle_enable(
    State(supervisor): State<Arc<Supervisor>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    supervisor.enable_process(&name).await?;
    Ok(Json(json!({ "message": format!("Process {} enabled", name) })))
}

async fn handle_disable(
    State(supervisor): State<Arc<Supervisor>>,
    Path(name): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    supervisor.disable_process(&name).await?;
    Ok(Json(json!({ "message": format!("Process {} disabled", name) })))
}

async fn handle_health(State(supervisor): State<Arc<Supervisor>>) -> (StatusCode, Json<HealthReport>) {
    let report = supervisor.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessConfig, SupervisorConfig};

    async fn spawn_api(processes: Vec<ProcessConfig>) -> (String, CancellationToken) {
        let config = SupervisorConfig {
            processes,
            ..Default::default()
        };
        let supervisor = Arc::new(Supervisor::new(config).unwrap());
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(supervisor, listener, shutdown.clone()));
        (base, shutdown)
    }

    fn idle(name: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            command: vec!["/bin/sleep".to_string(), "30".to_string()],
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_status_endpoints() {
        let (base, shutdown) = spawn_api(vec![idle("web")]).await;
        let client = reqwest::Client::new();

        let status: BTreeMap<String, ProcessStatus> = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["web"], ProcessStatus::Stopped);

        let detailed: DetailedReport = client
            .get(format!("{}/status/detailed", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(detailed.processes.contains_key("web"));

        let info: ProcessInfo = client
            .get(format!("{}/process/web", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info.name, "web");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_process_is_404() {
        let (base, shutdown) = spawn_api(vec![idle("web")]).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/process/missing", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("missing"));

        for action in ["restart", "enable", "disable"] {
            let response = client
                .post(format!("{}/{}/missing", base, action))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_health_status_codes() {
        let (base, shutdown) = spawn_api(Vec::new()).await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        shutdown.cancel();

        let (base, shutdown) = spawn_api(vec![idle("web")]).await;
        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let report: HealthReport = response.json().await.unwrap();
        assert!(!report.healthy);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let (base, shutdown) = spawn_api(vec![idle("web")]).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/disable/web", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let info: ProcessInfo = client
            .get(format!("{}/process/web", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!info.enabled);

        let response = client
            .post(format!("{}/enable/web", base))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Process web enabled");

        shutdown.cancel();
    }
}
