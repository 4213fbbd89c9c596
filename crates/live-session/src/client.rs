use crate::{config::SessionConfig, error::ClientError};
use anyhow::Result;
use async_trait::async_trait;
use common::sessions::{
  SetTargetAck, SetTargetRequest, SetVideoAck, SetVideoRequest, StreamAck, TargetResponse,
  VideoSource, target_to_wire,
};
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

/// One method per capability of the remote detection service. Implementations
/// hold no session state and never retry.
#[async_trait]
pub trait SessionClient: Send + Sync {
  /// Arms `target`; `None` asks the service to match every known target.
  async fn set_target(&self, target: Option<&str>) -> Result<SetTargetAck, ClientError>;
  async fn set_video(&self, source: VideoSource) -> Result<SetVideoAck, ClientError>;
  async fn start_stream(&self) -> Result<StreamAck, ClientError>;
  async fn restart_stream(&self) -> Result<StreamAck, ClientError>;
  async fn stop_stream(&self) -> Result<StreamAck, ClientError>;
  async fn get_target(&self) -> Result<TargetResponse, ClientError>;
}

pub struct HttpSessionClient {
  base: Url,
  client: reqwest::Client,
}

impl HttpSessionClient {
  pub fn new(base: Url, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .timeout(request_timeout)
      .build()?;
    Ok(Self { base, client })
  }

  pub fn from_config(config: &SessionConfig) -> Result<Self> {
    Self::new(
      config.detection_service_url.clone(),
      config.connect_timeout,
      config.request_timeout,
    )
  }

  fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
    self
      .base
      .join(path)
      .map_err(|e| ClientError::Network(format!("invalid detection service endpoint '{path}': {e}")))
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
    let resp = request.send().await.map_err(ClientError::from_transport)?;
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(ClientError::Remote {
        status: status.as_u16(),
        body,
      });
    }
    let bytes = resp.bytes().await.map_err(ClientError::from_transport)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
      status: status.as_u16(),
      message: e.to_string(),
    })
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
    let url = self.endpoint(path)?;
    debug!(%url, "detection service request");
    self.send(self.client.get(url)).await
  }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
  #[instrument(skip_all, fields(armed = target_to_wire(target)))]
  async fn set_target(&self, target: Option<&str>) -> Result<SetTargetAck, ClientError> {
    let url = self.endpoint("set_target")?;
    let body = SetTargetRequest {
      name: target_to_wire(target).to_string(),
    };
    self.send(self.client.post(url).json(&body)).await
  }

  #[instrument(skip_all, fields(source = %source))]
  async fn set_video(&self, source: VideoSource) -> Result<SetVideoAck, ClientError> {
    let url = self.endpoint("set_video")?;
    let body = SetVideoRequest { video: source };
    self.send(self.client.post(url).json(&body)).await
  }

  #[instrument(skip_all)]
  async fn start_stream(&self) -> Result<StreamAck, ClientError> {
    self.get("start_stream").await
  }

  #[instrument(skip_all)]
  async fn restart_stream(&self) -> Result<StreamAck, ClientError> {
    self.get("restart_stream").await
  }

  #[instrument(skip_all)]
  async fn stop_stream(&self) -> Result<StreamAck, ClientError> {
    self.get("stop_stream").await
  }

  #[instrument(skip_all)]
  async fn get_target(&self) -> Result<TargetResponse, ClientError> {
    self.get("get_target").await
  }
}
