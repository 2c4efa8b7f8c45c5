//! Warden governance core.
//!
//! Intents arrive as raw JSON and pass through the [`validator`]. Valid
//! intents are queued and handed to the [`composer`], which asks every
//! configured plan agent for a candidate plan. Candidates wait in the
//! [`bridge`] until a human approves one, and only an approved plan can be
//! resumed into execution, one at a time, and never while the halt is on.
//!
//! The [`calibrator`] learns from human selections to reorder future
//! candidate lists. It has no say over approval or execution.
//!
//! Every state change is recorded in the `warden-audit` log before it is
//! applied; see [`Orchestrator`].

pub mod bridge;
pub mod calibrator;
pub mod composer;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod types;
pub mod validator;

pub use bridge::{ApprovalBridge, ApprovalDecision, Transition};
pub use calibrator::{
    calibrate, CalibrationOutcome, CalibrationPolicy, DecayMode, PenaltyAdjustment, PenaltyEntry, PenaltyTable,
    PreferenceCalibrator, PreferenceWeights,
};
pub use composer::{
    AgentError, AgentSpec, ComposerConfig, Composition, DirectAgent, FixedAgent, PhasedAgent, PlanAgent,
    PlanComparison, PlanComposer, PlanProposal,
};
pub use config::{OrchestratorConfig, ValidatorConfig};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, Page, PlanFilter, StateSnapshot, Submission, Window, NO_VIABLE_PLAN};
pub use types::{
    AgentId, ApprovalRecord, ExecutionMode, Intent, IntentId, IntentKind, IntentStatus, Phase, Plan, PlanId,
    PlanStatus, PlanStep,
};
pub use validator::{FieldViolation, IntentDraft, IntentValidator, ValidationError};
