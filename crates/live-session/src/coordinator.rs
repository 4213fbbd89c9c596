use crate::{
  binder::{StreamHandle, StreamViewBinder},
  client::SessionClient,
  config::SessionConfig,
  error::SessionError,
  ledger::DetectionLedger,
  state::SessionState,
};
use common::{
  detections::{DetectionPayload, DetectionRecord},
  sessions::{
    OperationId, OperationKind, SessionSnapshot, StreamPhase, VideoSource, target_from_wire,
    target_to_wire,
  },
  validation::validate_target_name,
};
use std::{
  future::Future,
  sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicU64, Ordering},
  },
};
use telemetry::metrics::{
  LIVE_SESSION_BUSY_REJECTIONS, LIVE_SESSION_DETECTIONS_INGESTED,
  LIVE_SESSION_DETECTIONS_REJECTED, LIVE_SESSION_OPERATIONS, LIVE_SESSION_STREAM_EPOCH,
  set_stream_phase,
};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

const PHASES: [&str; 4] = ["idle", "starting", "running", "stopping"];

/// Everything a commit has to change atomically.
struct Session {
  state: SessionState,
  ledger: DetectionLedger,
  binder: StreamViewBinder,
}

struct Inner {
  client: Arc<dyn SessionClient>,
  slot: Mutex<()>,
  session: RwLock<Session>,
  next_op: AtomicU64,
}

/// Holds the mutation slot for one logical operation. Dropping it clears the
/// `pending` marker before the slot is handed to the next waiter.
struct MutationGuard<'a> {
  inner: &'a Inner,
  id: OperationId,
  _slot: MutexGuard<'a, ()>,
}

impl Drop for MutationGuard<'_> {
  fn drop(&mut self) {
    let id = self.id;
    self.inner.update(|s| s.state.finish(id));
  }
}

impl Inner {
  fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
    let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
    f(&session)
  }

  fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
    let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
    let out = f(&mut session);
    debug_assert!(session.state.holds_invariants());
    LIVE_SESSION_STREAM_EPOCH.set(i64::try_from(session.state.stream_epoch).unwrap_or(i64::MAX));
    set_stream_phase(&session.state.stream_phase.to_string(), &PHASES);
    out
  }

  fn begin<'a>(&'a self, slot: MutexGuard<'a, ()>, kind: OperationKind) -> MutationGuard<'a> {
    let id = OperationId(self.next_op.fetch_add(1, Ordering::Relaxed) + 1);
    self.update(|s| s.state.begin(id, kind));
    MutationGuard {
      inner: self,
      id,
      _slot: slot,
    }
  }

  fn try_acquire(&self, kind: OperationKind) -> Result<MutationGuard<'_>, SessionError> {
    match self.slot.try_lock() {
      Ok(slot) => Ok(self.begin(slot, kind)),
      Err(_) => {
        let pending = self.read(|s| s.state.pending.map(|p| p.kind));
        LIVE_SESSION_BUSY_REJECTIONS
          .with_label_values(&[kind.as_str()])
          .inc();
        debug!(operation = %kind, ?pending, "mutation slot busy");
        Err(SessionError::Busy { pending })
      }
    }
  }

  async fn acquire(&self, kind: OperationKind) -> MutationGuard<'_> {
    let slot = self.slot.lock().await;
    self.begin(slot, kind)
  }
}

/// Serializes every mutation of one live detection session and keeps the
/// session state, the detection ledger and the stream view consistent.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
  inner: Arc<Inner>,
}

impl SessionCoordinator {
  pub fn new(client: Arc<dyn SessionClient>, history_capacity: usize) -> Self {
    Self::with_ledger(client, DetectionLedger::new(history_capacity))
  }

  pub fn from_config(client: Arc<dyn SessionClient>, config: &SessionConfig) -> Self {
    let ledger =
      DetectionLedger::new(config.history_capacity).with_current_capacity(config.current_capacity);
    Self::with_ledger(client, ledger)
  }

  fn with_ledger(client: Arc<dyn SessionClient>, ledger: DetectionLedger) -> Self {
    let session = Session {
      state: SessionState::default(),
      ledger,
      binder: StreamViewBinder::new(),
    };
    Self {
      inner: Arc::new(Inner {
        client,
        slot: Mutex::new(()),
        session: RwLock::new(session),
        next_op: AtomicU64::new(0),
      }),
    }
  }

  /// Switches the live feed. A no-op when `source` is already selected.
  pub async fn select_video_source(
    &self,
    source: VideoSource,
  ) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::SetVideo, self.select_video_source_op(source))
      .await
  }

  /// Arms the remote target; `None` matches every known target.
  pub async fn arm_target(&self, target: Option<&str>) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::SetTarget, self.arm_target_op(target))
      .await
  }

  /// Arms `target`, clears the current results and starts the stream if it
  /// is not running yet. Sub-steps that already succeeded stay committed
  /// when a later one fails.
  pub async fn start_search(&self, target: Option<&str>) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::StartSearch, self.start_search_op(target))
      .await
  }

  pub async fn start_stream(&self) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::StartStream, self.start_stream_op())
      .await
  }

  pub async fn restart_stream(&self) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::RestartStream, self.restart_stream_op())
      .await
  }

  /// Waits for any in-flight mutation instead of failing with `Busy`.
  pub async fn stop_stream(&self) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::StopStream, self.stop_stream_op())
      .await
  }

  /// Adopts the target the remote service currently has armed.
  pub async fn refresh_target(&self) -> Result<SessionSnapshot, SessionError> {
    self
      .run(OperationKind::RefreshTarget, self.refresh_target_op())
      .await
  }

  /// Returns to the initial session: no source, no target, idle stream,
  /// empty ledger. Every handle issued before is invalidated.
  pub async fn reset(&self) -> Result<SessionSnapshot, SessionError> {
    self.run(OperationKind::Reset, self.reset_op()).await
  }

  /// Validates the whole batch, then appends every record to the ledger.
  /// Payloads without an epoch are tagged with the current one; an epoch
  /// ahead of the current one rejects the batch.
  pub fn report_detections(
    &self,
    payloads: Vec<DetectionPayload>,
  ) -> Result<Vec<DetectionRecord>, SessionError> {
    self.ingest(payloads, None)
  }

  /// Like [`report_detections`](Self::report_detections) for results
  /// collected while `handle` was on screen. The batch is dropped when the
  /// session has been reset since `handle` was issued.
  pub fn report_for_handle(
    &self,
    handle: &StreamHandle,
    payloads: Vec<DetectionPayload>,
  ) -> Result<Vec<DetectionRecord>, SessionError> {
    self.ingest(payloads, Some(handle.generation()))
  }

  fn ingest(
    &self,
    payloads: Vec<DetectionPayload>,
    generation: Option<u64>,
  ) -> Result<Vec<DetectionRecord>, SessionError> {
    for (index, payload) in payloads.iter().enumerate() {
      if let Err(err) = payload.validate() {
        LIVE_SESSION_DETECTIONS_REJECTED.inc();
        return Err(SessionError::validation(format!(
          "detection #{index}: {err:#}"
        )));
      }
    }

    let outcome = self.inner.update(|s| {
      if generation.is_some_and(|g| g != s.binder.generation()) {
        return Ok(None);
      }
      let epoch = s.state.stream_epoch;
      let ahead = payloads
        .iter()
        .enumerate()
        .find_map(|(index, p)| p.source_epoch.filter(|e| *e > epoch).map(|e| (index, e)));
      if let Some((index, claimed)) = ahead {
        return Err(SessionError::validation(format!(
          "detection #{index}: source epoch {claimed} is ahead of current epoch {epoch}"
        )));
      }

      let records = payloads
        .into_iter()
        .map(|payload| {
          let record = DetectionRecord::from_payload(payload, epoch);
          let freshness = if record.source_epoch() == epoch {
            "fresh"
          } else {
            "stale"
          };
          LIVE_SESSION_DETECTIONS_INGESTED
            .with_label_values(&[freshness])
            .inc();
          s.ledger.append(record.clone());
          record
        })
        .collect::<Vec<_>>();
      Ok(Some(records))
    });

    match outcome {
      Ok(Some(records)) => {
        debug!(count = records.len(), "detections recorded");
        Ok(records)
      }
      Ok(None) => {
        debug!("detections from a retired stream generation dropped");
        Ok(Vec::new())
      }
      Err(err) => {
        LIVE_SESSION_DETECTIONS_REJECTED.inc();
        Err(err)
      }
    }
  }

  pub fn snapshot(&self) -> SessionSnapshot {
    self.inner.read(|s| s.state.snapshot())
  }

  pub fn current_view(&self) -> Vec<DetectionRecord> {
    self.inner.read(|s| s.ledger.current_view())
  }

  pub fn history_view(&self) -> Vec<DetectionRecord> {
    self.inner.read(|s| s.ledger.history_view())
  }

  /// Current results that belong to the stream generation on screen.
  pub fn live_view(&self) -> Vec<DetectionRecord> {
    self.inner.read(|s| {
      s.ledger
        .current_view()
        .into_iter()
        .filter(|record| s.binder.is_live(record))
        .collect()
    })
  }

  pub fn history_capacity(&self) -> usize {
    self.inner.read(|s| s.ledger.capacity())
  }

  pub fn stream_handle(&self) -> Option<StreamHandle> {
    self.inner.read(|s| s.binder.current())
  }

  pub fn subscribe_handles(&self) -> watch::Receiver<Option<StreamHandle>> {
    self.inner.read(|s| s.binder.subscribe())
  }

  pub fn is_handle_current(&self, handle: &StreamHandle) -> bool {
    self.inner.read(|s| s.binder.is_current(handle))
  }

  async fn run(
    &self,
    kind: OperationKind,
    op: impl Future<Output = Result<(), SessionError>>,
  ) -> Result<SessionSnapshot, SessionError> {
    let result = op.await;
    let outcome = match &result {
      Ok(()) => "ok",
      Err(err) => err.outcome(),
    };
    LIVE_SESSION_OPERATIONS
      .with_label_values(&[kind.as_str(), outcome])
      .inc();
    match result {
      Ok(()) => Ok(self.snapshot()),
      Err(err) => {
        match &err {
          SessionError::Busy { .. } | SessionError::Validation(_) => {
            debug!(operation = %kind, error = %err, "session operation rejected")
          }
          _ => warn!(operation = %kind, error = %err, "session operation failed"),
        }
        Err(err)
      }
    }
  }

  async fn select_video_source_op(&self, source: VideoSource) -> Result<(), SessionError> {
    if self.inner.read(|s| s.state.video_source == Some(source)) {
      return Ok(());
    }
    let _guard = self.inner.try_acquire(OperationKind::SetVideo)?;
    if self.inner.read(|s| s.state.video_source == Some(source)) {
      return Ok(());
    }

    let prior = self.inner.update(|s| {
      let prior = s.state.stream_phase;
      s.state.stream_phase = StreamPhase::Starting;
      prior
    });

    let ack = match self.inner.client.set_video(source).await {
      Ok(ack) => ack,
      Err(err) => {
        self.inner.update(|s| s.state.stream_phase = prior);
        return Err(err.into());
      }
    };
    if ack.video != source {
      warn!(requested = %source, reported = %ack.video, "detection service reported a different video");
    }
    let target = match ack.target.as_deref() {
      Some(raw) => target_from_wire(raw),
      None => Some(source.default_target().to_string()),
    };

    // set_video already starts capture on the remote, so a failed restart
    // does not undo the switch.
    if let Err(err) = self.inner.client.restart_stream().await {
      warn!(source = %source, error = %err, "stream restart after video switch failed");
    }

    let epoch = self.inner.update(|s| {
      s.state.video_source = Some(source);
      s.state.stream_epoch += 1;
      s.state.target = target;
      s.state.stream_phase = StreamPhase::Running;
      s.ledger.clear_current();
      s.binder.bind(&s.state);
      s.state.stream_epoch
    });
    info!(source = %source, epoch, "video source switched");
    Ok(())
  }

  async fn arm_target_op(&self, target: Option<&str>) -> Result<(), SessionError> {
    let target = normalize_target(target)?;
    let _guard = self.inner.try_acquire(OperationKind::SetTarget)?;
    self.arm(target.as_deref()).await
  }

  async fn start_search_op(&self, target: Option<&str>) -> Result<(), SessionError> {
    let target = normalize_target(target)?;
    let _guard = self.inner.try_acquire(OperationKind::StartSearch)?;
    if self.inner.read(|s| s.state.video_source.is_none()) {
      return Err(SessionError::validation(
        "select a video source before starting a search",
      ));
    }

    self.arm(target.as_deref()).await?;
    self.inner.update(|s| s.ledger.clear_current());
    self.start().await
  }

  async fn start_stream_op(&self) -> Result<(), SessionError> {
    let _guard = self.inner.try_acquire(OperationKind::StartStream)?;
    self.start().await
  }

  async fn restart_stream_op(&self) -> Result<(), SessionError> {
    let _guard = self.inner.try_acquire(OperationKind::RestartStream)?;
    let prior = self.inner.update(|s| {
      if s.state.video_source.is_none() {
        return Err(SessionError::validation("no video source selected"));
      }
      let prior = s.state.stream_phase;
      s.state.stream_phase = StreamPhase::Starting;
      Ok(prior)
    })?;

    match self.inner.client.restart_stream().await {
      Ok(_) => {
        let epoch = self.inner.update(|s| {
          s.state.stream_epoch += 1;
          s.state.stream_phase = StreamPhase::Running;
          s.binder.bind(&s.state);
          s.state.stream_epoch
        });
        info!(epoch, "stream restarted");
        Ok(())
      }
      Err(err) => {
        self.inner.update(|s| s.state.stream_phase = prior);
        Err(err.into())
      }
    }
  }

  async fn stop_stream_op(&self) -> Result<(), SessionError> {
    let _guard = self.inner.acquire(OperationKind::StopStream).await;
    // The remote may be capturing even when the local phase is idle.
    let prior = self.inner.update(|s| {
      let prior = s.state.stream_phase;
      if prior != StreamPhase::Idle {
        s.state.stream_phase = StreamPhase::Stopping;
      }
      prior
    });

    match self.inner.client.stop_stream().await {
      Ok(_) => {
        self.inner.update(|s| {
          s.state.stream_phase = StreamPhase::Idle;
          s.ledger.clear_current();
        });
        info!("stream stopped");
        Ok(())
      }
      Err(err) => {
        self.inner.update(|s| s.state.stream_phase = prior);
        Err(err.into())
      }
    }
  }

  async fn refresh_target_op(&self) -> Result<(), SessionError> {
    let _guard = self.inner.acquire(OperationKind::RefreshTarget).await;
    let resp = self.inner.client.get_target().await?;
    let target = target_from_wire(&resp.target);
    self.inner.update(|s| s.state.target = target);
    Ok(())
  }

  async fn reset_op(&self) -> Result<(), SessionError> {
    let _guard = self.inner.acquire(OperationKind::Reset).await;
    self.inner.update(|s| {
      s.state.reset();
      s.ledger.clear();
      s.binder.retire();
    });
    info!("session reset");
    Ok(())
  }

  /// Caller holds the mutation slot.
  async fn arm(&self, target: Option<&str>) -> Result<(), SessionError> {
    let ack = self.inner.client.set_target(target).await?;
    let armed = target_from_wire(&ack.target);
    info!(target = target_to_wire(armed.as_deref()), "target armed");
    self.inner.update(|s| s.state.target = armed);
    Ok(())
  }

  /// Caller holds the mutation slot.
  async fn start(&self) -> Result<(), SessionError> {
    let prior = self.inner.update(|s| {
      if s.state.video_source.is_none() {
        return Err(SessionError::validation("no video source selected"));
      }
      if s.state.stream_phase.is_running() {
        return Ok(None);
      }
      let prior = s.state.stream_phase;
      s.state.stream_phase = StreamPhase::Starting;
      Ok(Some(prior))
    })?;
    let Some(prior) = prior else {
      return Ok(());
    };

    match self.inner.client.start_stream().await {
      Ok(_) => {
        self.inner.update(|s| s.state.stream_phase = StreamPhase::Running);
        info!("stream started");
        Ok(())
      }
      Err(err) => {
        self.inner.update(|s| s.state.stream_phase = prior);
        Err(err.into())
      }
    }
  }
}

fn normalize_target(target: Option<&str>) -> Result<Option<String>, SessionError> {
  match target {
    None => Ok(None),
    Some(raw) => {
      validate_target_name(raw).map_err(|e| SessionError::validation(e.to_string()))?;
      Ok(Some(raw.trim().to_string()))
    }
  }
}
