use crate::{client::SessionClient, error::ClientError};
use async_trait::async_trait;
use common::sessions::{
  MATCH_ALL_TARGET, SetTargetAck, SetVideoAck, StreamAck, TargetResponse, VideoSource,
  target_to_wire,
};
use std::{
  collections::HashMap,
  sync::{Arc, atomic::{AtomicBool, Ordering}},
};
use tokio::sync::{Mutex, Notify};

#[derive(Clone, Copy, Debug)]
pub enum Failure {
  Remote,
  Timeout,
  Network,
}

impl Failure {
  fn to_error(self) -> ClientError {
    match self {
      Failure::Remote => ClientError::Remote {
        status: 500,
        body: "injected failure".into(),
      },
      Failure::Timeout => ClientError::Timeout,
      Failure::Network => ClientError::Network("connection refused".into()),
    }
  }
}

/// In-memory detection service. Records every call, can fail any method on
/// demand, and can park one call until the test releases it.
pub struct StubSessionClient {
  calls: Mutex<Vec<&'static str>>,
  failures: Mutex<HashMap<&'static str, Failure>>,
  target: Mutex<String>,
  hold: Mutex<Option<&'static str>>,
  holding: AtomicBool,
  entered: Notify,
  gate: Notify,
}

impl StubSessionClient {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      calls: Mutex::new(vec![]),
      failures: Mutex::new(HashMap::new()),
      target: Mutex::new(MATCH_ALL_TARGET.to_string()),
      hold: Mutex::new(None),
      holding: AtomicBool::new(false),
      entered: Notify::new(),
      gate: Notify::new(),
    })
  }

  pub async fn calls(&self) -> Vec<&'static str> {
    self.calls.lock().await.clone()
  }

  pub async fn fail(&self, method: &'static str, failure: Failure) {
    self.failures.lock().await.insert(method, failure);
  }

  pub async fn heal(&self, method: &'static str) {
    self.failures.lock().await.remove(method);
  }

  /// The next call to `method` blocks until [`release`](Self::release).
  pub async fn hold(&self, method: &'static str) {
    *self.hold.lock().await = Some(method);
  }

  /// Resolves once the held call has reached the stub.
  pub async fn wait_held(&self) {
    self.entered.notified().await;
  }

  pub fn release(&self) {
    self.gate.notify_one();
  }

  pub fn is_holding(&self) -> bool {
    self.holding.load(Ordering::SeqCst)
  }

  pub async fn set_remote_target(&self, target: &str) {
    *self.target.lock().await = target.to_string();
  }

  async fn step(&self, method: &'static str) -> Result<(), ClientError> {
    self.calls.lock().await.push(method);
    let held = {
      let mut hold = self.hold.lock().await;
      if *hold == Some(method) {
        hold.take();
        true
      } else {
        false
      }
    };
    if held {
      self.holding.store(true, Ordering::SeqCst);
      self.entered.notify_one();
      self.gate.notified().await;
      self.holding.store(false, Ordering::SeqCst);
    }
    match self.failures.lock().await.get(method) {
      Some(failure) => Err(failure.to_error()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl SessionClient for StubSessionClient {
  async fn set_target(&self, target: Option<&str>) -> Result<SetTargetAck, ClientError> {
    self.step("set_target").await?;
    let wire = target_to_wire(target).to_string();
    *self.target.lock().await = wire.clone();
    Ok(SetTargetAck {
      message: Some(format!("Target set to {wire}")),
      target: wire,
    })
  }

  async fn set_video(&self, source: VideoSource) -> Result<SetVideoAck, ClientError> {
    self.step("set_video").await?;
    let target = source.default_target().to_string();
    *self.target.lock().await = target.clone();
    Ok(SetVideoAck {
      message: Some(format!("Video changed to {source}")),
      video: source,
      target: Some(target),
    })
  }

  async fn start_stream(&self) -> Result<StreamAck, ClientError> {
    self.step("start_stream").await?;
    Ok(StreamAck::default())
  }

  async fn restart_stream(&self) -> Result<StreamAck, ClientError> {
    self.step("restart_stream").await?;
    Ok(StreamAck::default())
  }

  async fn stop_stream(&self) -> Result<StreamAck, ClientError> {
    self.step("stop_stream").await?;
    Ok(StreamAck::default())
  }

  async fn get_target(&self) -> Result<TargetResponse, ClientError> {
    self.step("get_target").await?;
    Ok(TargetResponse {
      target: self.target.lock().await.clone(),
    })
  }
}
