use common::sessions::{
  OperationId, OperationKind, PendingOperation, SessionSnapshot, StreamPhase, VideoSource,
};

/// The coordinator's belief about the remote session. Only the coordinator
/// mutates it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
  pub video_source: Option<VideoSource>,
  pub target: Option<String>,
  pub stream_phase: StreamPhase,
  pub stream_epoch: u64,
  pub pending: Option<PendingOperation>,
}

impl SessionState {
  pub fn snapshot(&self) -> SessionSnapshot {
    SessionSnapshot {
      video_source: self.video_source,
      target: self.target.clone(),
      stream_phase: self.stream_phase,
      stream_epoch: self.stream_epoch,
      pending: self.pending,
    }
  }

  pub fn begin(&mut self, id: OperationId, kind: OperationKind) {
    self.pending = Some(PendingOperation { id, kind });
  }

  /// Clears `pending` if it still belongs to `id`.
  pub fn finish(&mut self, id: OperationId) {
    if self.pending.map(|p| p.id) == Some(id) {
      self.pending = None;
    }
  }

  /// Returns to the initial values while keeping the in-flight marker, which
  /// is owned by whoever holds the mutation slot.
  pub fn reset(&mut self) {
    let pending = self.pending;
    *self = Self {
      pending,
      ..Self::default()
    };
  }

  pub fn holds_invariants(&self) -> bool {
    !(self.stream_phase == StreamPhase::Running && self.video_source.is_none())
  }
}
