//! Governance domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a plan-generating agent
pub type AgentId = String;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an intent
    IntentId
);
uuid_id!(
    /// Unique identifier for a plan
    PlanId
);

/// Kinds of intent the orchestrator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Inspect,
    InspectRepo,
    SummariseLogs,
    AnalyzeCode,
    PlanAction,
    ApplyPatch,
    BlockPurchase,
    VerifyAccount,
    RequireMfa,
    FlagForReview,
    Allow,
}

impl IntentKind {
    pub const ALL: [IntentKind; 11] = [
        Self::Inspect,
        Self::InspectRepo,
        Self::SummariseLogs,
        Self::AnalyzeCode,
        Self::PlanAction,
        Self::ApplyPatch,
        Self::BlockPurchase,
        Self::VerifyAccount,
        Self::RequireMfa,
        Self::FlagForReview,
        Self::Allow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspect => "inspect",
            Self::InspectRepo => "inspect_repo",
            Self::SummariseLogs => "summarise_logs",
            Self::AnalyzeCode => "analyze_code",
            Self::PlanAction => "plan_action",
            Self::ApplyPatch => "apply_patch",
            Self::BlockPurchase => "block_purchase",
            Self::VerifyAccount => "verify_account",
            Self::RequireMfa => "require_mfa",
            Self::FlagForReview => "flag_for_review",
            Self::Allow => "allow",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an approved plan may go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum ExecutionMode {
    #[serde(rename = "reason-only")]
    ReasonOnly,
    #[serde(rename = "simulate")]
    Simulate,
    #[default]
    #[serde(rename = "propose")]
    Propose,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 3] = [Self::ReasonOnly, Self::Simulate, Self::Propose];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReasonOnly => "reason-only",
            Self::Simulate => "simulate",
            Self::Propose => "propose",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Rejected,
}

/// A proposed phase sequence supplied with an intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// A validated, queued intent.
///
/// Everything except `status` and `rejection_reason` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub kind: IntentKind,
    pub target: String,
    pub mode: ExecutionMode,
    /// Caller-reported confidence, advisory only
    pub confidence: f64,
    /// Confidence scaled by the learned (kind, mode) penalty
    pub calibrated_confidence: f64,
    pub context: serde_json::Value,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
    pub status: IntentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Principal that submitted the intent through the gateway
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

/// Plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Proposed,
    PendingApproval,
    Approved,
    Executing,
    Completed,
    Aborted,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    pub action: String,
    pub description: String,
}

/// A candidate course of action for an intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub intent_id: IntentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_agent: Option<AgentId>,
    pub steps: Vec<PlanStep>,
    /// Agent's self-reported confidence
    pub confidence_score: f64,
    /// Presentation rank among the intent's plans (0 = recommended)
    pub rank: usize,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Proof that a human approved a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub plan_id: PlanId,
    pub approver: String,
    pub approved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        for kind in IntentKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(IntentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(IntentKind::parse("delete_everything"), None);
    }

    #[test]
    fn test_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&ExecutionMode::ReasonOnly).unwrap(),
            "\"reason-only\""
        );
        assert_eq!(ExecutionMode::parse("simulate"), Some(ExecutionMode::Simulate));
        assert_eq!(ExecutionMode::default(), ExecutionMode::Propose);
    }

    #[test]
    fn test_plan_status_terminal() {
        assert!(PlanStatus::Completed.is_terminal());
        assert!(PlanStatus::Aborted.is_terminal());
        assert!(!PlanStatus::Executing.is_terminal());
        assert_eq!(
            serde_json::to_string(&PlanStatus::PendingApproval).unwrap(),
            "\"pending_approval\""
        );
    }

    #[test]
    fn test_ids_round_trip_through_display() {
        let id = PlanId::generate();
        let parsed: PlanId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<IntentId>().is_err());
    }
}
