//! HTTP ingress for host events plus read-only status and history.
//!
//! Handlers never evaluate anything themselves: they turn each request into
//! an `EngineEvent` and queue it for the driver loop.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::history::{AnnouncementRecord, History};
use crate::service::{local_now, EngineStatus};
use crate::triggers::EngineEvent;

#[derive(Clone)]
pub struct ApiState {
    pub events: mpsc::Sender<EngineEvent>,
    pub status: watch::Receiver<EngineStatus>,
    pub history: Option<History>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SensorRequest {
    entity_id: String,
    state: String,
    #[serde(default)]
    old_state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Deserialize)]
struct UtteranceRequest {
    text: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    date: Option<String>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
        }
    }
}

type Reply = (StatusCode, Json<SimpleResponse>);

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/history", get(handle_history))
        .route("/history/dates", get(handle_history_dates))
        .route("/events/sensor", post(handle_sensor))
        .route(
            "/events/webhook/{webhook_id}",
            get(handle_webhook).post(handle_webhook).put(handle_webhook),
        )
        .route("/events/utterance", post(handle_utterance))
        .with_state(state)
}

/// Start the API server as a background tokio task.
pub async fn start_api(state: ApiState, bind: &str, port: u16, cancel: CancellationToken) {
    let app = router(state);
    let addr = format!("{bind}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind event API on {addr}: {e}");
            return;
        }
    };
    info!("Event API listening on {addr}");

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("Event API server error: {e}");
        }
    });
}

async fn enqueue(state: &ApiState, event: EngineEvent) -> Reply {
    match state.events.send(event).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(SimpleResponse::ok("queued"))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SimpleResponse::err("engine is not running")),
        ),
    }
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<EngineStatus> {
    Json(state.status.borrow().clone())
}

async fn handle_history(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AnnouncementRecord>>, Reply> {
    let Some(history) = &state.history else {
        return Err((StatusCode::NOT_FOUND, Json(SimpleResponse::err("history is disabled"))));
    };
    let date = query
        .date
        .unwrap_or_else(|| local_now().format("%Y-%m-%d").to_string());
    if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(SimpleResponse::err(format!("bad date: {date}"))),
        ));
    }
    Ok(Json(history.load(&date)))
}

async fn handle_history_dates(
    State(state): State<ApiState>,
) -> Result<Json<Vec<String>>, Reply> {
    match &state.history {
        Some(history) => Ok(Json(history.dates())),
        None => Err((StatusCode::NOT_FOUND, Json(SimpleResponse::err("history is disabled")))),
    }
}

async fn handle_sensor(State(state): State<ApiState>, Json(req): Json<SensorRequest>) -> Reply {
    info!("HTTP sensor {} → {}", req.entity_id, req.state);
    let event = EngineEvent::SensorChanged {
        entity_id: req.entity_id,
        old_state: req.old_state,
        state: req.state,
        now: local_now(),
    };
    enqueue(&state, event).await
}

/// Body is optional; an empty or non-JSON body means no overrides.
async fn handle_webhook(
    State(state): State<ApiState>,
    Path(webhook_id): Path<String>,
    body: Bytes,
) -> Reply {
    let overrides = if body.iter().all(u8::is_ascii_whitespace) {
        WebhookRequest::default()
    } else {
        match serde_json::from_slice::<WebhookRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                warn!("Ignoring unreadable webhook body for {webhook_id}: {e}");
                WebhookRequest::default()
            }
        }
    };
    info!("HTTP webhook {webhook_id} ({overrides:?})");

    let event = EngineEvent::WebhookCalled {
        webhook_id,
        name: overrides.name.filter(|n| !n.trim().is_empty()),
        volume: overrides.volume,
        now: local_now(),
    };
    enqueue(&state, event).await
}

async fn handle_utterance(
    State(state): State<ApiState>,
    Json(req): Json<UtteranceRequest>,
) -> Reply {
    if req.text.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err("empty text")));
    }
    info!("HTTP utterance: \"{}\"", req.text);
    let event = EngineEvent::Utterance {
        text: req.text,
        now: local_now(),
    };
    enqueue(&state, event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(
        history: Option<History>,
    ) -> (ApiState, mpsc::Receiver<EngineEvent>, watch::Sender<EngineStatus>) {
        let (events, rx) = mpsc::channel(8);
        let (status_tx, status) = watch::channel(EngineStatus::default());
        (
            ApiState {
                events,
                status,
                history,
            },
            rx,
            status_tx,
        )
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn sensor_post_enqueues_event() {
        let (state, mut rx, _status) = state(None);
        let resp = router(state)
            .oneshot(json_request(
                "POST",
                "/events/sensor",
                r#"{"entity_id":"binary_sensor.door","state":"on"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        match rx.recv().await.unwrap() {
            EngineEvent::SensorChanged {
                entity_id,
                state,
                old_state,
                ..
            } => {
                assert_eq!(entity_id, "binary_sensor.door");
                assert_eq!(state, "on");
                assert!(old_state.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn webhook_accepts_any_method_and_optional_body() {
        let (state, mut rx, _status) = state(None);
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/events/webhook/alarm")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = app
            .oneshot(json_request(
                "PUT",
                "/events/webhook/alarm",
                r#"{"name":"Jo","volume":0.8}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            EngineEvent::WebhookCalled { ref webhook_id, name: None, volume: None, .. } if webhook_id == "alarm"
        ));
        match rx.recv().await.unwrap() {
            EngineEvent::WebhookCalled { name, volume, .. } => {
                assert_eq!(name.as_deref(), Some("Jo"));
                assert_eq!(volume, Some(0.8));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_engine_is_unavailable() {
        let (state, rx, _status) = state(None);
        drop(rx);
        let resp = router(state)
            .oneshot(json_request("POST", "/events/utterance", r#"{"text":"weather"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_reflects_latest_publish() {
        let (state, _rx, status_tx) = state(None);
        status_tx.send_replace(EngineStatus {
            announcements: 3,
            targets: 2,
            ..EngineStatus::default()
        });

        let resp = router(state)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["announcements"], 3);
        assert_eq!(json["targets"], 2);
    }

    #[tokio::test]
    async fn history_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let history = History::new(dir.path());
        history.save(&AnnouncementRecord {
            timestamp: chrono::NaiveDate::from_ymd_opt(2026, 2, 1)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            trigger: "voice".into(),
            instance_id: "voice".into(),
            message: "Good morning.".into(),
            rewritten: false,
            dry_run: false,
            outcomes: Vec::new(),
        });
        let (state, _rx, _status) = state(Some(history));
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/history?date=2026-02-01").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let records: Vec<AnnouncementRecord> = serde_json::from_slice(&body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "Good morning.");

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/history?date=yesterday").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(Request::builder().uri("/history/dates").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let dates: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert_eq!(dates, ["2026-02-01"]);
    }

    #[tokio::test]
    async fn history_dates_need_history_enabled() {
        let (state, _rx, _status) = state(None);
        let resp = router(state)
            .oneshot(Request::builder().uri("/history/dates").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
