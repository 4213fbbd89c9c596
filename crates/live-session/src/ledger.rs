use common::detections::DetectionRecord;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
pub const DEFAULT_CURRENT_CAPACITY: usize = 100;

/// Detection results of one session.
///
/// `current` holds the active search's results, newest first, and is cleared
/// whenever a new search starts or the stream stops. Beyond
/// `current_capacity` the oldest result falls off. `history` keeps the last
/// `capacity` records in arrival order and evicts the oldest first.
#[derive(Debug, Clone)]
pub struct DetectionLedger {
  current: VecDeque<DetectionRecord>,
  history: VecDeque<DetectionRecord>,
  capacity: usize,
  current_capacity: usize,
}

impl Default for DetectionLedger {
  fn default() -> Self {
    Self::new(DEFAULT_HISTORY_CAPACITY)
  }
}

impl DetectionLedger {
  /// A capacity of zero is raised to one.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      current: VecDeque::new(),
      history: VecDeque::with_capacity(capacity),
      capacity,
      current_capacity: DEFAULT_CURRENT_CAPACITY,
    }
  }

  pub fn with_current_capacity(mut self, current_capacity: usize) -> Self {
    self.current_capacity = current_capacity.max(1);
    self.current.truncate(self.current_capacity);
    self
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn current_capacity(&self) -> usize {
    self.current_capacity
  }

  pub fn append(&mut self, record: DetectionRecord) {
    if self.history.len() == self.capacity {
      self.history.pop_front();
    }
    self.history.push_back(record.clone());
    if self.current.len() == self.current_capacity {
      self.current.pop_back();
    }
    self.current.push_front(record);
  }

  pub fn clear_current(&mut self) {
    self.current.clear();
  }

  pub fn clear(&mut self) {
    self.current.clear();
    self.history.clear();
  }

  /// Most recent first.
  pub fn current_view(&self) -> Vec<DetectionRecord> {
    self.current.iter().cloned().collect()
  }

  /// Arrival order, oldest first.
  pub fn history_view(&self) -> Vec<DetectionRecord> {
    self.history.iter().cloned().collect()
  }
}
