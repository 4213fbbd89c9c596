use crate::state::SessionState;
use anyhow::{Context, Result};
use common::{detections::DetectionRecord, sessions::VideoSource};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Identifies one generation of the live video. Consumers must drop their
/// connection and re-acquire whenever a newer handle is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandle {
  generation: u64,
  epoch: u64,
  source: VideoSource,
}

impl StreamHandle {
  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  pub fn source(&self) -> VideoSource {
    self.source
  }

  /// Bumped on session reset so handles from an earlier session never match
  /// a later one that reuses epoch numbers.
  pub fn generation(&self) -> u64 {
    self.generation
  }

  /// Annotated MJPEG feed URL for this handle. The query string makes every
  /// epoch a distinct resource, so a video element reconnects on change.
  pub fn feed_url(&self, base: &Url) -> Result<Url> {
    let mut url = base.join("video_feed").context("invalid video feed endpoint")?;
    url
      .query_pairs_mut()
      .append_pair("epoch", &self.epoch.to_string())
      .append_pair("source", self.source.as_str())
      .append_pair("generation", &self.generation.to_string());
    Ok(url)
  }
}

pub struct StreamViewBinder {
  generation: u64,
  current: Option<StreamHandle>,
  tx: watch::Sender<Option<StreamHandle>>,
}

impl Default for StreamViewBinder {
  fn default() -> Self {
    Self::new()
  }
}

impl StreamViewBinder {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(None);
    Self {
      generation: 0,
      current: None,
      tx,
    }
  }

  /// Re-derives the handle from `state` and publishes it if the source or the
  /// epoch moved. Returns the handle now in force.
  pub fn bind(&mut self, state: &SessionState) -> Option<StreamHandle> {
    let next = state.video_source.map(|source| StreamHandle {
      generation: self.generation,
      epoch: state.stream_epoch,
      source,
    });
    if next != self.current {
      self.current = next;
      self.tx.send_replace(next);
    }
    self.current
  }

  /// Invalidates every handle issued so far.
  pub fn retire(&mut self) {
    self.generation += 1;
    self.current = None;
    self.tx.send_replace(None);
  }

  pub fn current(&self) -> Option<StreamHandle> {
    self.current
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<StreamHandle>> {
    self.tx.subscribe()
  }

  pub fn is_current(&self, handle: &StreamHandle) -> bool {
    self.current.as_ref() == Some(handle)
  }

  /// Records from an older epoch stay in the ledger but never count as live.
  pub fn is_live(&self, record: &DetectionRecord) -> bool {
    self
      .current
      .is_some_and(|handle| handle.epoch == record.source_epoch())
  }
}
