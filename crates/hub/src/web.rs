use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use rumqttc::AsyncClient;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use time::{OffsetDateTime, UtcOffset};
use tokio::net::TcpListener;
use tracing::error;

use crate::analytics::{self, UsageSummary};
use crate::db::{Db, StoredAlert};
use crate::model::{Alert, AlertType, LogEntry, Settings, StatusSnapshot};
use crate::orchestrator::{ManualAction, ManualControlError, Outcome};
use crate::processor::{self, ManualError, ProcessError};
use crate::state::{Overview, SharedState};

const INDEX_HTML: &str = include_str!("ui/index.html");

// ---------------------------------------------------------------------------
// App state & error mapping
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub shared: SharedState,
    pub mqtt: AsyncClient,
    pub utc_offset: UtcOffset,
}

#[derive(Serialize)]
struct ApiMessage {
    success: bool,
    message: String,
}

struct ApiError(StatusCode, String);

impl ApiError {
    fn internal(err: anyhow::Error) -> Self {
        error!("internal error: {err:#}");
        Self(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.0,
            Json(ApiMessage {
                success: false,
                message: self.1,
            }),
        )
            .into_response()
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Invalid(e) => Self(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ProcessError::Internal(e) => Self::internal(e),
        }
    }
}

impl From<ManualError> for ApiError {
    fn from(err: ManualError) -> Self {
        match err {
            ManualError::NoStatus => Self(StatusCode::CONFLICT, err.to_string()),
            ManualError::Rejected(ManualControlError::AlreadyInState(_)) => {
                Self(StatusCode::CONFLICT, err.to_string())
            }
            ManualError::Rejected(ManualControlError::Invalid(e)) => {
                Self(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
            }
            ManualError::Internal(e) => Self::internal(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status).post(post_status))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        .route("/api/control/manual", post(manual_control))
        .route("/api/analytics/usage", get(usage_analytics))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
}

async fn api_status(State(state): State<AppState>) -> Json<Overview> {
    let st = state.shared.read().await;
    Json(st.to_overview())
}

async fn post_status(
    State(state): State<AppState>,
    Json(snapshot): Json<StatusSnapshot>,
) -> Result<Json<Outcome>, ApiError> {
    let outcome = processor::handle_status(
        &state.db,
        &state.shared,
        &state.mqtt,
        state.utc_offset,
        snapshot,
    )
    .await?;
    Ok(Json(outcome))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, ApiError> {
    let settings = state.db.current_settings().await.map_err(ApiError::internal)?;
    Ok(Json(settings))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    settings
        .validate()
        .map_err(|e| ApiError(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    state
        .db
        .replace_settings(&settings)
        .await
        .map_err(ApiError::internal)?;

    let alert = Alert::auto(
        "Configuración del sistema actualizada",
        AlertType::Info,
        "sistema",
        3,
        OffsetDateTime::now_utc(),
    );
    state
        .db
        .append_alert(&alert)
        .await
        .map_err(ApiError::internal)?;

    let mut st = state.shared.write().await;
    st.record_system("settings replaced".to_string());

    Ok(Json(settings))
}

#[derive(Deserialize)]
struct AlertsQuery {
    #[serde(default)]
    unresolved: bool,
    #[serde(default = "default_alert_limit")]
    limit: i64,
}

fn default_alert_limit() -> i64 {
    50
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<StoredAlert>>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let alerts = state
        .db
        .list_alerts(query.unresolved, limit)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(alerts))
}

#[derive(Deserialize, Default)]
struct ResolveRequest {
    resolved_by: Option<String>,
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let by = body.resolved_by.as_deref().unwrap_or("system");
    let resolved = state
        .db
        .resolve_alert(id, by)
        .await
        .map_err(ApiError::internal)?;
    if resolved {
        Ok(Json(ApiMessage {
            success: true,
            message: format!("alert {id} resolved"),
        }))
    } else {
        Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("alert {id} not found or already resolved"),
        ))
    }
}

#[derive(Deserialize)]
struct ManualRequest {
    action: ManualAction,
    user: Option<String>,
}

async fn manual_control(
    State(state): State<AppState>,
    Json(body): Json<ManualRequest>,
) -> Result<Json<Outcome>, ApiError> {
    let user = body.user.as_deref().unwrap_or("manual");
    let outcome =
        processor::handle_manual(&state.db, &state.shared, &state.mqtt, body.action, user).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct UsageQuery {
    #[serde(default = "default_usage_days")]
    days: i64,
}

fn default_usage_days() -> i64 {
    7
}

#[derive(Serialize)]
struct UsageReport {
    #[serde(flatten)]
    summary: UsageSummary,
    recent_logs: Vec<LogEntry>,
}

async fn usage_analytics(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageReport>, ApiError> {
    let days = query.days.clamp(1, 365);
    let since = OffsetDateTime::now_utc().unix_timestamp() - days * 86_400;
    let logs = state
        .db
        .logs_since(since)
        .await
        .map_err(ApiError::internal)?;

    let summary = analytics::summarize(&logs, days);
    let recent_logs = logs.into_iter().take(20).collect();
    Ok(Json(UsageReport {
        summary,
        recent_logs,
    }))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind web port");

    tracing::info!("web ui listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PumpState, SystemMode, TankLevel};
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use time::macros::datetime;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        // Keep control decisions independent of the wall clock in tests.
        let mut settings = Settings::default();
        settings.avoid_peak_hours = false;
        db.replace_settings(&settings).await.unwrap();

        let opts = rumqttc::MqttOptions::new("test-web", "127.0.0.1", 1883);
        let (mqtt, el) = AsyncClient::new(opts, 10);
        // Leak the event loop so the client channel stays open for the test.
        std::mem::forget(el);

        AppState {
            db,
            shared: Arc::new(RwLock::new(SystemState::new())),
            mqtt,
            utc_offset: UtcOffset::UTC,
        }
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            tinaco_level: TankLevel::Low,
            tinaco_percentage: 22.0,
            cisterna_level: TankLevel::High,
            cisterna_percentage: 75.0,
            pump_state: PumpState::Off,
            pump_runtime_minutes: 0,
            pump_runtime_today_minutes: 30,
            water_flow_lpm: 0.0,
            power_watts: 0.0,
            daily_power_kwh: 1.0,
            water_temperature_c: None,
            ambient_temperature_c: None,
            mode: SystemMode::Automatic,
            recorded_at: datetime!(2025-06-01 12:00 UTC),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json<T: Serialize>(uri: &str, method: &str, body: &T) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn index_serves_html() {
        let app = router(test_state().await);
        let response = app.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn get_settings_returns_current() {
        let app = router(test_state().await);
        let response = app.oneshot(get("/api/settings")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["fill_trigger_percentage"], 25.0);
        assert_eq!(body["avoid_peak_hours"], false);
    }

    #[tokio::test]
    async fn put_settings_rejects_invalid() {
        let app = router(test_state().await);
        let mut settings = Settings::default();
        settings.fill_stop_percentage = 10.0;
        let response = app
            .oneshot(post_json("/api/settings", "PUT", &settings))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("fill_stop_percentage"));
    }

    #[tokio::test]
    async fn put_settings_persists_and_raises_info_alert() {
        let state = test_state().await;
        let app = router(state.clone());

        let mut settings = Settings::default();
        settings.fill_trigger_percentage = 35.0;
        let response = app
            .oneshot(post_json("/api/settings", "PUT", &settings))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let stored = state.db.current_settings().await.unwrap();
        assert_eq!(stored.fill_trigger_percentage, 35.0);

        let alerts = state.db.list_alerts(false, 10).await.unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.alert.component == "sistema" && a.alert.message.contains("actualizada")));
    }

    #[tokio::test]
    async fn post_status_processes_and_returns_outcome() {
        let state = test_state().await;
        let app = router(state.clone());

        let response = app
            .oneshot(post_json("/api/status", "POST", &snapshot()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["decision"]["reason"], "auto start");
        assert_eq!(body["status"]["pump_state"], "on");

        // The runtime overview now carries the processed snapshot.
        let response = router(state).oneshot(get("/api/status")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["status"]["pump_state"], "on");
    }

    #[tokio::test]
    async fn post_status_invalid_snapshot_is_422_naming_field() {
        let app = router(test_state().await);
        let mut bad = snapshot();
        bad.cisterna_percentage = -3.0;
        let response = app
            .oneshot(post_json("/api/status", "POST", &bad))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("cisterna_percentage"));
    }

    #[tokio::test]
    async fn alerts_listed_after_processing() {
        let state = test_state().await;

        // An empty cisterna raises the critical alert.
        let mut s = snapshot();
        s.cisterna_level = TankLevel::Empty;
        s.cisterna_percentage = 2.0;
        let response = router(state.clone())
            .oneshot(post_json("/api/status", "POST", &s))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(get("/api/alerts?unresolved=true"))
            .await
            .unwrap();
        let body = json_body(response).await;
        let alerts = body.as_array().unwrap();
        assert!(alerts
            .iter()
            .any(|a| a["alert_type"] == "critical" && a["component"] == "cisterna"));
    }

    #[tokio::test]
    async fn resolve_unknown_alert_is_404() {
        let app = router(test_state().await);
        let response = app
            .oneshot(post_json(
                "/api/alerts/999/resolve",
                "POST",
                &serde_json::json!({"resolved_by": "ana"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_control_without_history_is_409() {
        let app = router(test_state().await);
        let response = app
            .oneshot(post_json(
                "/api/control/manual",
                "POST",
                &serde_json::json!({"action": "start", "user": "ana"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn manual_control_duplicate_action_is_409() {
        let state = test_state().await;

        // Disable auto mode so the pump stays off until the manual start.
        let mut settings = state.db.current_settings().await.unwrap();
        settings.auto_mode_enabled = false;
        state.db.replace_settings(&settings).await.unwrap();

        router(state.clone())
            .oneshot(post_json("/api/status", "POST", &snapshot()))
            .await
            .unwrap();

        let body = serde_json::json!({"action": "start", "user": "ana"});
        let response = router(state.clone())
            .oneshot(post_json("/api/control/manual", "POST", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(post_json("/api/control/manual", "POST", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn usage_analytics_summarizes_window() {
        let state = test_state().await;

        // A stop entry inside the window.
        let entry = LogEntry {
            recorded_at: OffsetDateTime::now_utc(),
            action: crate::model::LogAction::AutoStop,
            tinaco_level_before: TankLevel::Full,
            tinaco_level_after: TankLevel::Full,
            tinaco_percentage_before: 92.0,
            tinaco_percentage_after: 92.0,
            duration_minutes: Some(30),
            water_amount_liters: Some(840.0),
            power_consumed_kwh: Some(0.375),
            triggered_by: "system".to_string(),
            operation_mode: SystemMode::Automatic,
            note: Some("fill complete".to_string()),
        };
        state.db.append_log(&entry).await.unwrap();

        let response = router(state)
            .oneshot(get("/api/analytics/usage?days=7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_fills"], 1);
        assert_eq!(body["total_water_liters"], 840.0);
        assert_eq!(body["recent_logs"].as_array().unwrap().len(), 1);
    }
}
