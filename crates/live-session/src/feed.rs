use crate::{binder::StreamHandle, coordinator::SessionCoordinator};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::detections::DetectionPayload;
use regex::Regex;
use reqwest::Url;
use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
  time::Duration,
};
use telemetry::metrics::LIVE_SESSION_POLL_ERRORS;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const COUNT_SERIES: &str = "ai_detected_objects";
const CONFIDENCE_SERIES: &str = "ai_confidence_avg";

/// One `(label, camera)` reading: how many objects the remote currently sees
/// and the detection built from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
  pub objects: f64,
  pub payload: DetectionPayload,
}

impl Sighting {
  fn key(&self) -> (String, String) {
    (
      self.payload.target_name.clone(),
      self.payload.location.clone(),
    )
  }

  fn reading(&self) -> (f64, f32) {
    (self.objects, self.payload.confidence)
  }
}

/// Source of detection results produced by the remote service.
#[async_trait]
pub trait DetectionFeed: Send + Sync {
  async fn poll(&self) -> Result<Vec<Sighting>>;
}

/// Reads detections from the Prometheus exposition of the detection service.
///
/// Every `(label, camera)` pair with a positive object count becomes one
/// sighting whose confidence is the matching average.
pub struct MetricsDetectionFeed {
  endpoint: Url,
  client: reqwest::Client,
  sample: Regex,
  label: Regex,
}

impl MetricsDetectionFeed {
  pub fn new(base: &Url, timeout: Duration) -> Result<Self> {
    let endpoint = base.join("metrics").context("invalid metrics endpoint")?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let sample = Regex::new(r"^([a-zA-Z_:][a-zA-Z0-9_:]*)\{([^}]*)\}\s+(\S+)")
      .context("invalid sample pattern")?;
    let label = Regex::new(r#"([a-zA-Z_][a-zA-Z0-9_]*)="((?:[^"\\]|\\.)*)""#)
      .context("invalid label pattern")?;
    Ok(Self {
      endpoint,
      client,
      sample,
      label,
    })
  }

  pub fn parse(&self, body: &str, observed_at: DateTime<Utc>) -> Vec<Sighting> {
    let mut counts: BTreeMap<(String, String), f64> = BTreeMap::new();
    let mut confidences: BTreeMap<(String, String), f64> = BTreeMap::new();

    for line in body.lines().map(str::trim) {
      if line.starts_with('#') {
        continue;
      }
      let Some(caps) = self.sample.captures(line) else {
        continue;
      };
      let series = match &caps[1] {
        COUNT_SERIES => &mut counts,
        CONFIDENCE_SERIES => &mut confidences,
        _ => continue,
      };
      let Ok(value) = caps[3].parse::<f64>() else {
        continue;
      };
      if !value.is_finite() {
        continue;
      }

      let labels: BTreeMap<&str, String> = self
        .label
        .captures_iter(&caps[2])
        .filter_map(|l| Some((l.get(1)?.as_str(), unescape(l.get(2)?.as_str()))))
        .collect();
      let (Some(name), Some(camera)) = (labels.get("label"), labels.get("camera")) else {
        continue;
      };
      if name.trim().is_empty() || camera.trim().is_empty() {
        continue;
      }

      // Several models may report the same class on the same camera.
      let entry = series.entry((name.clone(), camera.clone())).or_insert(0.0);
      *entry = entry.max(value);
    }

    counts
      .into_iter()
      .filter(|(_, count)| *count > 0.0)
      .filter_map(|(key, objects)| {
        let confidence = *confidences.get(&key)?;
        let (name, camera) = key;
        Some(Sighting {
          objects,
          payload: DetectionPayload::new(
            name,
            confidence.clamp(0.0, 1.0) as f32,
            camera,
            observed_at,
          ),
        })
      })
      .collect()
  }
}

fn unescape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut chars = raw.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some(other) => out.push(other),
      None => out.push('\\'),
    }
  }
  out
}

#[async_trait]
impl DetectionFeed for MetricsDetectionFeed {
  #[instrument(skip_all, fields(endpoint = %self.endpoint))]
  async fn poll(&self) -> Result<Vec<Sighting>> {
    let resp = self
      .client
      .get(self.endpoint.clone())
      .send()
      .await
      .context("metrics request failed")?;
    let body = resp
      .error_for_status()
      .context("metrics endpoint returned error status")?
      .text()
      .await
      .context("failed to read metrics body")?;
    Ok(self.parse(&body, Utc::now()))
  }
}

/// Polls a [`DetectionFeed`] while the stream is running and reports what
/// changed to the coordinator.
///
/// The remote exposes gauges that hold their last value, so a reading is
/// reported once per stream handle and armed target until it changes.
pub struct DetectionPoller {
  coordinator: SessionCoordinator,
  feed: Arc<dyn DetectionFeed>,
  scope: Option<(StreamHandle, Option<String>)>,
  seen: HashMap<(String, String), (f64, f32)>,
}

impl DetectionPoller {
  pub fn new(coordinator: SessionCoordinator, feed: Arc<dyn DetectionFeed>) -> Self {
    Self {
      coordinator,
      feed,
      scope: None,
      seen: HashMap::new(),
    }
  }

  pub fn spawn(mut self, every: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        tokio::select! {
            _ = token.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = self.poll_once().await {
                    LIVE_SESSION_POLL_ERRORS.inc();
                    warn!(error = %err, "detection poll failed");
                }
            }
        }
      }
      debug!("detection poller stopped");
    })
  }

  /// One poll cycle. Results are tagged with the handle that was current
  /// when the poll started, so a switch mid-poll yields stale records and a
  /// reset mid-poll drops them. Returns the number of records stored.
  pub async fn poll_once(&mut self) -> Result<usize> {
    let Some(handle) = self.coordinator.stream_handle() else {
      return Ok(0);
    };
    let snapshot = self.coordinator.snapshot();
    if !snapshot.stream_phase.is_running() {
      return Ok(0);
    }
    let target = snapshot.target;
    let scope = (handle, target.clone());
    if self.scope.as_ref() != Some(&scope) {
      self.seen.clear();
      self.scope = Some(scope);
    }

    let changed: Vec<Sighting> = self
      .feed
      .poll()
      .await?
      .into_iter()
      .filter(|s| {
        target
          .as_deref()
          .is_none_or(|t| s.payload.target_name.trim().eq_ignore_ascii_case(t))
      })
      .filter(|s| self.seen.get(&s.key()) != Some(&s.reading()))
      .collect();
    if changed.is_empty() {
      return Ok(0);
    }

    let readings: Vec<_> = changed.iter().map(|s| (s.key(), s.reading())).collect();
    let payloads = changed
      .into_iter()
      .map(|s| s.payload.with_source_epoch(handle.epoch()))
      .collect();
    let records = self.coordinator.report_for_handle(&handle, payloads)?;
    self.seen.extend(readings);
    debug!(count = records.len(), epoch = handle.epoch(), "polled detections stored");
    Ok(records.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::StubSessionClient;
  use common::sessions::VideoSource;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const EXPOSITION: &str = r#"# HELP ai_detected_objects Objects detected per class
# TYPE ai_detected_objects gauge
ai_detected_objects{camera="Entrance Area",label="Fajar",model="yolo",video_type="pasar"} 2.0
ai_detected_objects{camera="Food Court Area",label="akbar",model="yolo",video_type="pasar"} 0.0
ai_detected_objects{camera="Entrance Area",label="George",model="yolo",video_type="pasar"} 1.0
# HELP ai_confidence_avg Average confidence score
# TYPE ai_confidence_avg gauge
ai_confidence_avg{camera="Entrance Area",label="Fajar",model="yolo",video_type="pasar"} 0.91
ai_confidence_avg{camera="Food Court Area",label="akbar",model="yolo",video_type="pasar"} 0.87
ai_fps{camera="Entrance Area",model="yolo"} 24.0
"#;

  fn feed() -> MetricsDetectionFeed {
    let base = Url::parse("http://localhost:5001/").unwrap();
    MetricsDetectionFeed::new(&base, Duration::from_secs(1)).unwrap()
  }

  #[test]
  fn parse_yields_positive_counts_with_confidence() {
    let now = Utc::now();
    let sightings = feed().parse(EXPOSITION, now);
    // George has no average and akbar a zero count.
    assert_eq!(sightings.len(), 1);
    let Sighting { objects, payload } = &sightings[0];
    assert_eq!(*objects, 2.0);
    assert_eq!(payload.target_name, "Fajar");
    assert_eq!(payload.location, "Entrance Area");
    assert!((payload.confidence - 0.91).abs() < f32::EPSILON);
    assert_eq!(payload.observed_at, now);
    assert!(payload.source_epoch.is_none());
  }

  #[test]
  fn parse_clamps_confidence_and_unescapes_labels() {
    let body = concat!(
      "ai_detected_objects{camera=\"Gate \\\"A\\\"\",label=\"Dublin\"} 3\n",
      "ai_confidence_avg{camera=\"Gate \\\"A\\\"\",label=\"Dublin\"} 1.7\n",
      "garbage line\n",
    );
    let sightings = feed().parse(body, Utc::now());
    assert_eq!(sightings.len(), 1);
    assert_eq!(sightings[0].payload.location, "Gate \"A\"");
    assert_eq!(sightings[0].payload.confidence, 1.0);
  }

  /// Reports the same names on every poll. With `growing` set the object
  /// count rises by one per poll.
  struct FixedFeed {
    names: Vec<String>,
    growing: bool,
    polls: AtomicUsize,
  }

  #[async_trait]
  impl DetectionFeed for FixedFeed {
    async fn poll(&self) -> Result<Vec<Sighting>> {
      let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
      let objects = if self.growing { n as f64 } else { 1.0 };
      Ok(
        self
          .names
          .iter()
          .map(|name| Sighting {
            objects,
            payload: DetectionPayload::new(name.as_str(), 0.9, "Entrance Area", Utc::now()),
          })
          .collect(),
      )
    }
  }

  fn fixed(names: &[&str], growing: bool) -> Arc<FixedFeed> {
    Arc::new(FixedFeed {
      names: names.iter().map(|n| n.to_string()).collect(),
      growing,
      polls: AtomicUsize::new(0),
    })
  }

  #[tokio::test]
  async fn poll_once_skips_when_stream_not_running() {
    let coord = SessionCoordinator::new(StubSessionClient::new(), 5);
    let feed = fixed(&["Fajar"], false);
    let mut poller = DetectionPoller::new(coord, feed.clone());
    assert_eq!(poller.poll_once().await.unwrap(), 0);
    assert_eq!(feed.polls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn poll_once_filters_by_armed_target() {
    let coord = SessionCoordinator::new(StubSessionClient::new(), 5);
    coord.select_video_source(VideoSource::Pasar).await.unwrap();
    coord.arm_target(Some("fajar")).await.unwrap();

    let mut poller = DetectionPoller::new(coord.clone(), fixed(&["Fajar", "akbar"], false));
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    let current = coord.current_view();
    assert_eq!(current[0].target_name(), "Fajar");
    assert_eq!(current[0].source_epoch(), 1);

    coord.arm_target(None).await.unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn unchanged_readings_are_reported_once_per_handle() {
    let coord = SessionCoordinator::new(StubSessionClient::new(), 5);
    coord.select_video_source(VideoSource::Pasar).await.unwrap();
    let feed = fixed(&["Fajar"], false);
    let mut poller = DetectionPoller::new(coord.clone(), feed.clone());

    assert_eq!(poller.poll_once().await.unwrap(), 1);
    for _ in 0..200 {
      assert_eq!(poller.poll_once().await.unwrap(), 0);
    }
    assert_eq!(feed.polls.load(Ordering::SeqCst), 201);
    assert_eq!(coord.current_view().len(), 1);
    assert_eq!(coord.history_view().len(), 1);

    // A new stream generation starts from a clean slate.
    coord.restart_stream().await.unwrap();
    assert_eq!(poller.poll_once().await.unwrap(), 1);
    assert_eq!(coord.live_view().len(), 1);
  }

  #[tokio::test]
  async fn changed_readings_are_reported_again() {
    let coord = SessionCoordinator::new(StubSessionClient::new(), 5);
    coord.select_video_source(VideoSource::Pasar).await.unwrap();
    let mut poller = DetectionPoller::new(coord.clone(), fixed(&["Fajar"], true));
    for _ in 0..3 {
      assert_eq!(poller.poll_once().await.unwrap(), 1);
    }
    assert_eq!(coord.current_view().len(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn poller_runs_until_cancelled() {
    let coord = SessionCoordinator::new(StubSessionClient::new(), 50);
    coord.select_video_source(VideoSource::Pasar).await.unwrap();
    let feed = fixed(&["Fajar"], true);
    let token = CancellationToken::new();

    let handle = DetectionPoller::new(coord.clone(), feed.clone())
      .spawn(Duration::from_secs(1), token.clone());
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    token.cancel();
    handle.await.unwrap();

    let polls = feed.polls.load(Ordering::SeqCst);
    assert!(polls >= 3, "polled {polls} times");
    assert_eq!(coord.history_view().len(), polls);
  }
}
