use crate::validation::{validate_confidence, validate_name};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A detection as delivered by a feed or the push route, before it is
/// accepted into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionPayload {
  pub target_name: String,
  pub confidence: f32,
  pub location: String,
  pub observed_at: DateTime<Utc>,
  /// Epoch the producer was collecting under. `None` means the epoch that is
  /// current when the payload is reported.
  #[serde(default)]
  pub source_epoch: Option<u64>,
}

impl DetectionPayload {
  pub fn new(
    target_name: impl Into<String>,
    confidence: f32,
    location: impl Into<String>,
    observed_at: DateTime<Utc>,
  ) -> Self {
    Self {
      target_name: target_name.into(),
      confidence,
      location: location.into(),
      observed_at,
      source_epoch: None,
    }
  }

  pub fn with_source_epoch(mut self, epoch: u64) -> Self {
    self.source_epoch = Some(epoch);
    self
  }

  pub fn validate(&self) -> Result<()> {
    validate_name(&self.target_name, "target_name")?;
    validate_name(&self.location, "location")?;
    validate_confidence(self.confidence)
      .with_context(|| format!("invalid detection for '{}'", self.target_name))?;
    Ok(())
  }
}

/// One accepted match. Fields are only readable; a record never changes after
/// it has been created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionRecord {
  id: Uuid,
  target_name: String,
  confidence: f32,
  location: String,
  observed_at: DateTime<Utc>,
  source_epoch: u64,
}

impl DetectionRecord {
  /// Builds a record from an already validated payload. `epoch` is used when
  /// the payload does not carry its own.
  pub fn from_payload(payload: DetectionPayload, epoch: u64) -> Self {
    Self {
      id: Uuid::new_v4(),
      target_name: payload.target_name.trim().to_string(),
      confidence: payload.confidence,
      location: payload.location.trim().to_string(),
      observed_at: payload.observed_at,
      source_epoch: payload.source_epoch.unwrap_or(epoch),
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn target_name(&self) -> &str {
    &self.target_name
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn location(&self) -> &str {
    &self.location
  }

  pub fn observed_at(&self) -> DateTime<Utc> {
    self.observed_at
  }

  pub fn source_epoch(&self) -> u64 {
    self.source_epoch
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn payload(name: &str, confidence: f32) -> DetectionPayload {
    DetectionPayload::new(name, confidence, "Entrance Area", Utc::now())
  }

  #[test]
  fn payload_validation_rejects_bad_input() {
    assert!(payload("Fajar", 0.91).validate().is_ok());
    assert!(payload("", 0.91).validate().is_err());
    assert!(payload("Fajar", 1.2).validate().is_err());
    assert!(payload("Fajar", f32::NAN).validate().is_err());

    let mut no_location = payload("Fajar", 0.5);
    no_location.location = "  ".into();
    assert!(no_location.validate().is_err());
  }

  #[test]
  fn record_takes_epoch_from_payload_when_present() {
    let tagged = DetectionRecord::from_payload(payload("Fajar", 0.9).with_source_epoch(2), 7);
    assert_eq!(tagged.source_epoch(), 2);

    let untagged = DetectionRecord::from_payload(payload("Fajar", 0.9), 7);
    assert_eq!(untagged.source_epoch(), 7);
  }

  #[test]
  fn records_get_distinct_ids() {
    let a = DetectionRecord::from_payload(payload("Fajar", 0.9), 1);
    let b = DetectionRecord::from_payload(payload("Fajar", 0.9), 1);
    assert_ne!(a.id(), b.id());
  }

  #[test]
  fn payload_deserializes_without_epoch() {
    let json = r#"{
      "target_name": "akbar",
      "confidence": 0.87,
      "location": "Food Court Area",
      "observed_at": "2024-08-15T14:30:00Z"
    }"#;
    let parsed: DetectionPayload = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.target_name, "akbar");
    assert!(parsed.source_epoch.is_none());
  }
}
