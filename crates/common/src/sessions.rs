use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire sentinel the detection service understands as "no class filter".
pub const MATCH_ALL_TARGET: &str = "*";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
  Pasar,
  Dublin,
  NightCity,
}

impl VideoSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      VideoSource::Pasar => "pasar",
      VideoSource::Dublin => "dublin",
      VideoSource::NightCity => "night_city",
    }
  }

  /// Target the detection service arms after switching to this feed.
  pub fn default_target(&self) -> &'static str {
    match self {
      VideoSource::Pasar => "Fajar",
      VideoSource::Dublin => "Dublin",
      VideoSource::NightCity => "George",
    }
  }
}

impl fmt::Display for VideoSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for VideoSource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "pasar" => Ok(VideoSource::Pasar),
      "dublin" => Ok(VideoSource::Dublin),
      "night_city" => Ok(VideoSource::NightCity),
      other => Err(format!(
        "unknown video source '{}' (expected one of: pasar, dublin, night_city)",
        other
      )),
    }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
  #[default]
  Idle,
  Starting,
  Running,
  Stopping,
}

impl StreamPhase {
  pub fn is_running(&self) -> bool {
    matches!(self, StreamPhase::Running)
  }
}

impl fmt::Display for StreamPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      StreamPhase::Idle => "idle",
      StreamPhase::Starting => "starting",
      StreamPhase::Running => "running",
      StreamPhase::Stopping => "stopping",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  SetTarget,
  SetVideo,
  StartStream,
  RestartStream,
  StopStream,
  StartSearch,
  RefreshTarget,
  Reset,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::SetTarget => "set_target",
      OperationKind::SetVideo => "set_video",
      OperationKind::StartStream => "start_stream",
      OperationKind::RestartStream => "restart_stream",
      OperationKind::StopStream => "stop_stream",
      OperationKind::StartSearch => "start_search",
      OperationKind::RefreshTarget => "refresh_target",
      OperationKind::Reset => "reset",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct OperationId(pub u64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOperation {
  pub id: OperationId,
  pub kind: OperationKind,
}

/// Point-in-time copy of the coordinator's belief about the remote session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
  pub video_source: Option<VideoSource>,
  pub target: Option<String>,
  pub stream_phase: StreamPhase,
  pub stream_epoch: u64,
  pub pending: Option<PendingOperation>,
}

pub fn target_to_wire(target: Option<&str>) -> &str {
  target.unwrap_or(MATCH_ALL_TARGET)
}

pub fn target_from_wire(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() || trimmed == MATCH_ALL_TARGET {
    None
  } else {
    Some(trimmed.to_string())
  }
}

// Remote detection service wire format

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTargetRequest {
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTargetAck {
  #[serde(default)]
  pub message: Option<String>,
  pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVideoRequest {
  pub video: VideoSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetVideoAck {
  #[serde(default)]
  pub message: Option<String>,
  pub video: VideoSource,
  #[serde(default)]
  pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamAck {
  #[serde(default)]
  pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResponse {
  pub target: String,
}

// UI-facing action endpoint

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionActionRequest {
  pub action: String,
  #[serde(default)]
  pub target: Option<String>,
  #[serde(default)]
  pub video: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetView {
  pub target: Option<String>,
}
