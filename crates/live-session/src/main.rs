use anyhow::Result;
use live_session::{
  client::{HttpSessionClient, SessionClient},
  config::SessionConfig,
  coordinator::SessionCoordinator,
  feed::{DetectionFeed, DetectionPoller, MetricsDetectionFeed},
  routes::{self, AppState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  let _log_guard = telemetry::init_with_service("live-session");

  let config = SessionConfig::from_env()?;
  let client: Arc<dyn SessionClient> = Arc::new(HttpSessionClient::from_config(&config)?);
  let coordinator = SessionCoordinator::from_config(client, &config);

  let shutdown = CancellationToken::new();
  let poller = match config.poll_interval() {
    Some(every) => {
      let feed: Arc<dyn DetectionFeed> = Arc::new(MetricsDetectionFeed::new(
        &config.detection_service_url,
        config.request_timeout,
      )?);
      Some(DetectionPoller::new(coordinator.clone(), feed).spawn(every, shutdown.clone()))
    }
    None => None,
  };

  let app = routes::router(AppState::new(config.clone(), coordinator));
  let listener = TcpListener::bind(config.bind_addr).await?;

  info!(
    addr = %config.bind_addr,
    node_id = %config.node_id,
    version = common::VERSION,
    detection_service = %config.detection_service_url,
    polling = poller.is_some(),
    "live-session listening"
  );

  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  shutdown.cancel();
  if let Some(poller) = poller {
    let _ = poller.await;
  }

  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{SignalKind, signal};
    if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
      let _ = sigterm.recv().await;
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
      _ = ctrl_c => {},
      _ = terminate => {},
  }

  info!("shutdown signal received");
}
