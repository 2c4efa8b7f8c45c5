//! Audit event types

use crate::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// A sealed, sequence-numbered audit event.
///
/// Events are only ever produced by an [`AuditStore`](crate::AuditStore)
/// finalizing a [`PendingAuditEvent`]; there is no way to build one with an
/// arbitrary `seq` or hash from outside the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Strictly increasing sequence number, starting at 1
    pub seq: u64,

    /// Event type
    #[serde(rename = "type")]
    pub event_type: AuditEventType,

    /// Who caused the event
    pub actor: AuditActor,

    /// Intent or plan the event concerns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// When the event was recorded
    pub timestamp: DateTime<Utc>,

    /// Event-specific details
    pub payload: serde_json::Value,

    /// Hash of the previous event (None for the first event)
    pub previous_hash: Option<String>,

    /// Hash of this event
    pub event_hash: String,
}

impl AuditEvent {
    /// Start building a new event
    pub fn builder(event_type: AuditEventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }

    /// Recompute this event's hash from its contents
    pub fn compute_hash(&self) -> String {
        compute_event_hash(
            self.seq,
            &self.event_type,
            &self.actor,
            self.subject.as_deref(),
            &self.timestamp,
            &self.payload,
            self.previous_hash.as_deref(),
        )
    }
}

/// Builder for pending events
#[derive(Debug)]
pub struct AuditEventBuilder {
    event_type: AuditEventType,
    actor: Option<AuditActor>,
    subject: Option<String>,
    payload: serde_json::Map<String, serde_json::Value>,
}

impl AuditEventBuilder {
    fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            actor: None,
            subject: None,
            payload: serde_json::Map::new(),
        }
    }

    /// Set actor
    pub fn actor(mut self, actor: AuditActor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Set the intent or plan id the event is about
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Add a payload field
    pub fn field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.payload.insert(key.into(), value);
        self
    }

    /// Build the pending event (sequence and hashes are assigned by the store)
    pub fn build(self) -> Result<PendingAuditEvent> {
        Ok(PendingAuditEvent {
            event_type: self.event_type,
            actor: self.actor.ok_or(AuditError::Incomplete("actor"))?,
            subject: self.subject,
            timestamp: Utc::now(),
            payload: serde_json::Value::Object(self.payload),
        })
    }
}

/// Event awaiting a sequence number and chain position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuditEvent {
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    pub subject: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl PendingAuditEvent {
    /// Seal the event at `seq`, chaining it to `previous_hash`
    pub(crate) fn finalize(self, seq: u64, previous_hash: Option<String>) -> AuditEvent {
        let event_hash = compute_event_hash(
            seq,
            &self.event_type,
            &self.actor,
            self.subject.as_deref(),
            &self.timestamp,
            &self.payload,
            previous_hash.as_deref(),
        );

        AuditEvent {
            seq,
            event_type: self.event_type,
            actor: self.actor,
            subject: self.subject,
            timestamp: self.timestamp,
            payload: self.payload,
            previous_hash,
            event_hash,
        }
    }
}

fn compute_event_hash(
    seq: u64,
    event_type: &AuditEventType,
    actor: &AuditActor,
    subject: Option<&str>,
    timestamp: &DateTime<Utc>,
    payload: &serde_json::Value,
    previous_hash: Option<&str>,
) -> String {
    let hash_input = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        seq,
        event_type,
        serde_json::to_string(actor).unwrap_or_default(),
        subject.unwrap_or(""),
        timestamp.to_rfc3339(),
        serde_json::to_string(payload).unwrap_or_default(),
        previous_hash.unwrap_or("")
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Who caused an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    /// Actor type
    pub actor_type: ActorType,

    /// Actor identifier
    pub id: String,
}

impl AuditActor {
    /// Create a system actor
    pub fn system(component: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::System,
            id: component.into(),
        }
    }

    /// Create a human operator actor
    pub fn human(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Human,
            id: id.into(),
        }
    }

    /// Create a plan-generating agent actor
    pub fn agent(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Agent,
            id: id.into(),
        }
    }

    /// Create an external client actor
    pub fn client(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::Client,
            id: id.into(),
        }
    }
}

/// Actor types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    System,
    Agent,
    Client,
}

/// Audit event types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Intent lifecycle
    IntentReceived,
    IntentRejected,

    // Composition
    PlansComposed,
    MetaPlanComparison,

    // Plan lifecycle
    PlanSubmitted,
    PlanApproved,
    PlanResumed,
    PlanCompleted,
    PlanAborted,
    ExecutionRejected,

    // Learning
    PreferenceLearning,
    ConfidenceCalibrated,

    // Global control
    HaltEngaged,
    HaltReleased,
    OrchestratorStarted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentReceived => "intent_received",
            Self::IntentRejected => "intent_rejected",
            Self::PlansComposed => "plans_composed",
            Self::MetaPlanComparison => "meta_plan_comparison",
            Self::PlanSubmitted => "plan_submitted",
            Self::PlanApproved => "plan_approved",
            Self::PlanResumed => "plan_resumed",
            Self::PlanCompleted => "plan_completed",
            Self::PlanAborted => "plan_aborted",
            Self::ExecutionRejected => "execution_rejected",
            Self::PreferenceLearning => "preference_learning",
            Self::ConfidenceCalibrated => "confidence_calibrated",
            Self::HaltEngaged => "halt_engaged",
            Self::HaltReleased => "halt_released",
            Self::OrchestratorStarted => "orchestrator_started",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| AuditError::InvalidQuery(format!("unknown event type '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingAuditEvent {
        AuditEvent::builder(AuditEventType::IntentReceived)
            .actor(AuditActor::client("cli"))
            .subject("intent-1")
            .field("kind", "inspect")
            .field("confidence", 0.8)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_actor() {
        let err = AuditEvent::builder(AuditEventType::HaltEngaged)
            .build()
            .unwrap_err();
        assert!(matches!(err, AuditError::Incomplete("actor")));
    }

    #[test]
    fn test_finalize_chains_hashes() {
        let first = pending().finalize(1, None);
        assert_eq!(first.seq, 1);
        assert!(first.previous_hash.is_none());
        assert_eq!(first.event_hash, first.compute_hash());

        let second = pending().finalize(2, Some(first.event_hash.clone()));
        assert_eq!(second.previous_hash, Some(first.event_hash.clone()));
        assert_ne!(second.event_hash, first.event_hash);
    }

    #[test]
    fn test_hash_covers_payload() {
        let mut event = pending().finalize(1, None);
        event.payload["confidence"] = serde_json::json!(0.1);
        assert_ne!(event.event_hash, event.compute_hash());
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&AuditEventType::MetaPlanComparison).unwrap();
        assert_eq!(json, "\"meta_plan_comparison\"");
        assert_eq!(
            "preference_learning".parse::<AuditEventType>().unwrap(),
            AuditEventType::PreferenceLearning
        );
        assert!("plan_deleted".parse::<AuditEventType>().is_err());
    }

    #[test]
    fn test_type_field_serialized_as_type() {
        let event = pending().finalize(1, None);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "intent_received");
        assert_eq!(value["actor"]["actor_type"], "client");
    }
}
