use anyhow::{Context, Result};
use reqwest::Url;
use std::{env, net::SocketAddr, time::Duration};

#[derive(Clone, Debug)]
pub struct SessionConfig {
  pub bind_addr: SocketAddr,
  pub detection_service_url: Url,
  pub node_id: String,
  pub history_capacity: usize,
  pub current_capacity: usize,
  pub poll_interval_ms: u64,
  pub connect_timeout: Duration,
  pub request_timeout: Duration,
}

impl SessionConfig {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let bind = lookup("LIVE_SESSION_ADDR").unwrap_or_else(|| "0.0.0.0:8090".to_string());
    let bind_addr: SocketAddr = bind.parse().context("invalid LIVE_SESSION_ADDR")?;

    let service = lookup("DETECTION_SERVICE_URL")
      .or_else(|| lookup("FLASK_API_URL"))
      .unwrap_or_else(|| "http://localhost:5001".to_string());
    let detection_service_url =
      with_trailing_slash(Url::parse(&service).context("invalid DETECTION_SERVICE_URL")?);

    let node_id = lookup("NODE_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let history_capacity = parse_or(&lookup, "DETECTION_HISTORY_CAPACITY", 5usize).max(1);
    let current_capacity = parse_or(&lookup, "DETECTION_CURRENT_CAPACITY", 100usize).max(1);
    let poll_interval_ms = parse_or(&lookup, "DETECTION_POLL_INTERVAL_MS", 2_000u64);
    let connect_timeout = Duration::from_secs(parse_or(&lookup, "REMOTE_CONNECT_TIMEOUT_SECS", 3u64));
    let request_timeout = Duration::from_secs(parse_or(&lookup, "REMOTE_REQUEST_TIMEOUT_SECS", 10u64));

    Ok(Self {
      bind_addr,
      detection_service_url,
      node_id,
      history_capacity,
      current_capacity,
      poll_interval_ms,
      connect_timeout,
      request_timeout,
    })
  }

  /// `None` when polling is disabled.
  pub fn poll_interval(&self) -> Option<Duration> {
    (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
  }
}

fn parse_or<T: std::str::FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  key: &str,
  default: T,
) -> T {
  lookup(key)
    .and_then(|v| v.trim().parse::<T>().ok())
    .unwrap_or(default)
}

// Url::join replaces the last path segment unless the base ends with '/'.
fn with_trailing_slash(mut url: Url) -> Url {
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  url
}
