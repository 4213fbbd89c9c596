//! In-process stand-in for the detection service used by the integration
//! tests. It follows the remote's contract: empty target names and unknown
//! videos are rejected with 400, and switching video re-arms the feed's
//! default target.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Url;
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};

#[derive(Debug, Clone)]
pub struct Sighting {
    pub label: String,
    pub camera: String,
    pub count: u32,
    pub confidence: f64,
}

#[derive(Debug)]
pub struct RemoteState {
    pub target: String,
    pub video: String,
    pub streaming: bool,
    pub restarts: u32,
    pub sightings: Vec<Sighting>,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            target: "Fajar".to_string(),
            video: "pasar".to_string(),
            streaming: false,
            restarts: 0,
            sightings: vec![],
        }
    }
}

pub type SharedRemote = Arc<Mutex<RemoteState>>;

fn default_target(video: &str) -> Option<&'static str> {
    match video {
        "pasar" => Some("Fajar"),
        "dublin" => Some("Dublin"),
        "night_city" => Some("George"),
        _ => None,
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn set_target(State(remote): State<SharedRemote>, Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        return bad_request("Target name is required");
    }
    remote.lock().await.target = name.clone();
    Json(json!({ "message": format!("Target set to {name}"), "target": name })).into_response()
}

async fn set_video(State(remote): State<SharedRemote>, Json(body): Json<Value>) -> Response {
    let video = body["video"].as_str().unwrap_or_default().to_string();
    let Some(target) = default_target(&video) else {
        return bad_request("Invalid video type");
    };
    let mut state = remote.lock().await;
    state.video = video.clone();
    state.target = target.to_string();
    Json(json!({
        "message": format!("Video changed to {video}"),
        "video": video,
        "target": target,
    }))
    .into_response()
}

async fn start_stream(State(remote): State<SharedRemote>) -> Json<Value> {
    remote.lock().await.streaming = true;
    Json(json!({ "message": "Stream started" }))
}

async fn restart_stream(State(remote): State<SharedRemote>) -> Json<Value> {
    let mut state = remote.lock().await;
    state.streaming = true;
    state.restarts += 1;
    Json(json!({ "message": "Stream restarted" }))
}

async fn stop_stream(State(remote): State<SharedRemote>) -> Json<Value> {
    remote.lock().await.streaming = false;
    Json(json!({ "message": "Stream stopped" }))
}

async fn get_target(State(remote): State<SharedRemote>) -> Json<Value> {
    Json(json!({ "target": remote.lock().await.target }))
}

async fn metrics(State(remote): State<SharedRemote>) -> String {
    let state = remote.lock().await;
    let mut out = String::from(
        "# HELP ai_detected_objects Objects detected per class\n# TYPE ai_detected_objects gauge\n",
    );
    for s in &state.sightings {
        out.push_str(&format!(
            "ai_detected_objects{{camera=\"{}\",label=\"{}\",model=\"yolo\",video_type=\"{}\"}} {}\n",
            s.camera, s.label, state.video, s.count
        ));
    }
    out.push_str("# HELP ai_confidence_avg Average confidence score\n# TYPE ai_confidence_avg gauge\n");
    for s in &state.sightings {
        out.push_str(&format!(
            "ai_confidence_avg{{camera=\"{}\",label=\"{}\",model=\"yolo\",video_type=\"{}\"}} {}\n",
            s.camera, s.label, state.video, s.confidence
        ));
    }
    out
}

pub fn detection_service(remote: SharedRemote) -> Router {
    Router::new()
        .route("/set_target", post(set_target))
        .route("/set_video", post(set_video))
        .route("/start_stream", get(start_stream))
        .route("/restart_stream", get(restart_stream))
        .route("/stop_stream", get(stop_stream))
        .route("/get_target", get(get_target))
        .route("/metrics", get(metrics))
        .with_state(remote)
}

pub async fn spawn_router(router: Router) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("server failed");
    });
    Ok((addr, handle))
}

pub async fn spawn_detection_service() -> Result<(Url, SharedRemote, JoinHandle<()>)> {
    let remote: SharedRemote = Arc::new(Mutex::new(RemoteState::default()));
    let (addr, handle) = spawn_router(detection_service(remote.clone())).await?;
    let base = Url::parse(&format!("http://{addr}/"))?;
    Ok((base, remote, handle))
}
