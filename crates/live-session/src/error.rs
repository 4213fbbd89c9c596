use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use common::sessions::OperationKind;
use serde_json::json;
use thiserror::Error;

/// Failures of a single call against the detection service.
#[derive(Debug, Error)]
pub enum ClientError {
  #[error("network error: {0}")]
  Network(String),

  #[error("detection service returned {status}: {body}")]
  Remote { status: u16, body: String },

  #[error("detection service request timed out")]
  Timeout,

  #[error("malformed response from detection service ({status}): {message}")]
  Decode { status: u16, message: String },
}

impl ClientError {
  pub fn from_transport(err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout
    } else if let Some(status) = err.status() {
      Self::Remote {
        status: status.as_u16(),
        body: err.to_string(),
      }
    } else {
      Self::Network(err.to_string())
    }
  }
}

/// Errors surfaced by every coordinator operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("another session operation is in flight")]
  Busy { pending: Option<OperationKind> },

  #[error("network error: {0}")]
  Network(String),

  #[error("detection service rejected the request ({status}): {body}")]
  Remote { status: u16, body: String },

  #[error("detection service timed out")]
  Timeout,
}

impl SessionError {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  /// Short label used as the `outcome` of operation metrics.
  pub fn outcome(&self) -> &'static str {
    match self {
      SessionError::Validation(_) => "validation",
      SessionError::Busy { .. } => "busy",
      SessionError::Network(_) => "network",
      SessionError::Remote { .. } => "remote",
      SessionError::Timeout => "timeout",
    }
  }
}

impl From<ClientError> for SessionError {
  fn from(err: ClientError) -> Self {
    match err {
      ClientError::Network(msg) => SessionError::Network(msg),
      ClientError::Remote { status, body } => SessionError::Remote { status, body },
      ClientError::Timeout => SessionError::Timeout,
      ClientError::Decode { status, message } => SessionError::Remote {
        status,
        body: message,
      },
    }
  }
}

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("bad gateway: {0}")]
  BadGateway(String),

  #[error("gateway timeout: {0}")]
  GatewayTimeout(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ApiError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Self::NotFound(msg.into())
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::Internal(msg.into())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
      ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
      ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
      ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
      ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
      ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
    };

    (status, Json(json!({ "error": message }))).into_response()
  }
}

impl From<SessionError> for ApiError {
  fn from(err: SessionError) -> Self {
    let message = err.to_string();
    match err {
      SessionError::Validation(_) => ApiError::BadRequest(message),
      SessionError::Busy { .. } => ApiError::Conflict(message),
      SessionError::Network(_) | SessionError::Remote { .. } => ApiError::BadGateway(message),
      SessionError::Timeout => ApiError::GatewayTimeout(message),
    }
  }
}

impl From<anyhow::Error> for ApiError {
  fn from(err: anyhow::Error) -> Self {
    ApiError::internal(err.to_string())
  }
}
