use crate::{
  binder::StreamHandle, config::SessionConfig, coordinator::SessionCoordinator, error::ApiError,
};
use axum::{
  Json, Router,
  extract::State,
  http::header,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use common::{
  detections::{DetectionPayload, DetectionRecord},
  sessions::{DetectionActionRequest, SessionSnapshot, TargetView, VideoSource, target_to_wire},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

struct AppStateInner {
  config: SessionConfig,
  coordinator: SessionCoordinator,
}

impl AppState {
  pub fn new(config: SessionConfig, coordinator: SessionCoordinator) -> Self {
    Self {
      inner: Arc::new(AppStateInner {
        config,
        coordinator,
      }),
    }
  }

  pub fn node_id(&self) -> &str {
    &self.inner.config.node_id
  }

  pub fn coordinator(&self) -> &SessionCoordinator {
    &self.inner.coordinator
  }

  pub fn config(&self) -> &SessionConfig {
    &self.inner.config
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/healthz", get(healthz))
    .route("/metrics", get(metrics))
    .route(
      "/api/ai-detection",
      get(current_target).post(detection_action),
    )
    .route("/v1/session", get(session))
    .route("/v1/session/reset", post(reset_session))
    .route("/v1/detections", post(report_detections))
    .route("/v1/detections/current", get(current_detections))
    .route("/v1/detections/history", get(detection_history))
    .route("/v1/detections/live", get(live_detections))
    .route("/v1/stream/handle", get(stream_handle))
    .with_state(state)
}

async fn healthz() -> &'static str {
  "ok"
}

async fn metrics() -> Result<Response, ApiError> {
  let body = telemetry::metrics::encode_metrics().map_err(|e| ApiError::internal(e.to_string()))?;
  Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

#[derive(Debug, Serialize)]
struct ActionResponse {
  message: String,
  #[serde(flatten)]
  session: SessionSnapshot,
}

impl ActionResponse {
  fn respond(message: impl Into<String>, session: SessionSnapshot) -> Response {
    Json(Self {
      message: message.into(),
      session,
    })
    .into_response()
  }
}

async fn detection_action(
  State(state): State<AppState>,
  Json(req): Json<DetectionActionRequest>,
) -> Result<Response, ApiError> {
  let coordinator = state.coordinator();
  let target = req.target.as_deref();
  info!(action = %req.action, node_id = %state.node_id(), "detection action");

  let response = match req.action.as_str() {
    "set_target" => {
      let session = coordinator.arm_target(target).await?;
      let message = format!("Target set to {}", target_to_wire(session.target.as_deref()));
      ActionResponse::respond(message, session)
    }
    "get_target" => {
      let session = coordinator.refresh_target().await?;
      Json(TargetView {
        target: session.target,
      })
      .into_response()
    }
    "start_stream" => ActionResponse::respond("Stream started", coordinator.start_stream().await?),
    "stop_stream" => ActionResponse::respond("Stream stopped", coordinator.stop_stream().await?),
    "restart_stream" => {
      ActionResponse::respond("Stream restarted", coordinator.restart_stream().await?)
    }
    "set_video" => {
      let raw = req
        .video
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("video is required"))?;
      let source: VideoSource = raw.parse().map_err(ApiError::bad_request)?;
      let session = coordinator.select_video_source(source).await?;
      ActionResponse::respond(format!("Video changed to {source}"), session)
    }
    "start_search" => {
      let session = coordinator.start_search(target).await?;
      let message = format!(
        "Searching for {}",
        target_to_wire(session.target.as_deref())
      );
      ActionResponse::respond(message, session)
    }
    _ => return Err(ApiError::bad_request("Invalid action")),
  };
  Ok(response)
}

async fn current_target(State(state): State<AppState>) -> Result<Json<TargetView>, ApiError> {
  let session = state.coordinator().refresh_target().await?;
  Ok(Json(TargetView {
    target: session.target,
  }))
}

async fn session(State(state): State<AppState>) -> Json<SessionSnapshot> {
  Json(state.coordinator().snapshot())
}

async fn reset_session(State(state): State<AppState>) -> Result<Json<SessionSnapshot>, ApiError> {
  Ok(Json(state.coordinator().reset().await?))
}

async fn report_detections(
  State(state): State<AppState>,
  Json(payloads): Json<Vec<DetectionPayload>>,
) -> Result<Json<Vec<DetectionRecord>>, ApiError> {
  Ok(Json(state.coordinator().report_detections(payloads)?))
}

async fn current_detections(State(state): State<AppState>) -> Json<Vec<DetectionRecord>> {
  Json(state.coordinator().current_view())
}

async fn detection_history(State(state): State<AppState>) -> Json<Vec<DetectionRecord>> {
  Json(state.coordinator().history_view())
}

async fn live_detections(State(state): State<AppState>) -> Json<Vec<DetectionRecord>> {
  Json(state.coordinator().live_view())
}

#[derive(Debug, Serialize)]
struct StreamHandleView {
  #[serde(flatten)]
  handle: StreamHandle,
  feed_url: String,
}

async fn stream_handle(State(state): State<AppState>) -> Result<Json<StreamHandleView>, ApiError> {
  let handle = state
    .coordinator()
    .stream_handle()
    .ok_or_else(|| ApiError::not_found("no video source selected"))?;
  let feed_url = handle.feed_url(&state.config().detection_service_url)?;
  Ok(Json(StreamHandleView {
    handle,
    feed_url: feed_url.to_string(),
  }))
}
