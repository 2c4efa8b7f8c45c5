//! The orchestrator: the single owner of governance state.
//!
//! All mutations take the state write guard and follow the same order:
//! check the request, append the audit events, then apply the change. The
//! events of one operation are appended as a single batch; if the append
//! fails none of them are stored and the change is never applied.

use crate::bridge::{ApprovalBridge, ApprovalDecision, Transition};
use crate::calibrator::{PenaltyAdjustment, PenaltyEntry, PenaltyTable, PreferenceCalibrator, PreferenceWeights};
use crate::composer::{Composition, PlanComposer};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::types::{ApprovalRecord, ExecutionMode, Intent, IntentId, IntentKind, IntentStatus, Plan, PlanId, PlanStatus};
use crate::validator::IntentValidator;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use warden_audit::{AuditActor, AuditEvent, AuditEventBuilder, AuditEventType, AuditStore};

/// Rejection reason when every candidate plan is pruned
pub const NO_VIABLE_PLAN: &str = "no_viable_plan";

const ORCHESTRATOR: &str = "orchestrator";
const COMPOSER: &str = "composer";
const CALIBRATOR: &str = "calibrator";

/// Response to an intent submission
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub intent_id: IntentId,
    pub status: IntentStatus,
    pub plan_ids: Vec<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

/// Point-in-time view of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub halted: bool,
    pub current_executing_plan: Option<PlanId>,
    pub plan_count: usize,
    pub intent_count: usize,
    pub pending_intents: usize,
    pub audit_events: u64,
    pub preference_weights: PreferenceWeights,
    pub confidence_penalties: Vec<PenaltyEntry>,
}

/// Offset pagination for registry listings
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T: Clone> Page<T> {
    fn collect<'a>(items: impl Iterator<Item = &'a T>, window: Window) -> Self
    where
        T: 'a,
    {
        let matching: Vec<&T> = items.collect();
        Self {
            total: matching.len(),
            items: matching
                .into_iter()
                .skip(window.offset)
                .take(window.limit)
                .cloned()
                .collect(),
            offset: window.offset,
            limit: window.limit,
        }
    }
}

/// Plan listing filter
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub status: Option<PlanStatus>,
    pub intent_id: Option<IntentId>,
}

struct OrchestratorState {
    intents: HashMap<IntentId, Intent>,
    /// Submission order
    queue: Vec<IntentId>,
    bridge: ApprovalBridge,
    calibrator: PreferenceCalibrator,
    penalties: PenaltyTable,
}

impl OrchestratorState {
    fn intent(&self, intent_id: IntentId) -> Result<&Intent> {
        self.intents
            .get(&intent_id)
            .ok_or(OrchestratorError::IntentNotFound(intent_id))
    }

    fn submission(&self, intent_id: IntentId) -> Result<Submission> {
        let intent = self.intent(intent_id)?;
        Ok(Submission {
            intent_id,
            status: intent.status,
            plan_ids: self.bridge.plans_for(intent_id).map(|p| p.id).collect(),
            rejection_reason: intent.rejection_reason.clone(),
        })
    }

    fn is_composed(&self, intent: &Intent) -> bool {
        intent.status != IntentStatus::Pending || self.bridge.plans_for(intent.id).next().is_some()
    }
}

/// Governance orchestrator
pub struct Orchestrator {
    state: RwLock<OrchestratorState>,
    audit: Arc<dyn AuditStore>,
    validator: IntentValidator,
    composer: PlanComposer,
    auto_compose: bool,
}

impl Orchestrator {
    /// Build an orchestrator with the agents named in `config`
    pub fn new(config: &OrchestratorConfig, audit: Arc<dyn AuditStore>) -> Self {
        Self::with_composer(config, audit, PlanComposer::from_config(&config.composer))
    }

    pub fn with_composer(config: &OrchestratorConfig, audit: Arc<dyn AuditStore>, composer: PlanComposer) -> Self {
        Self {
            state: RwLock::new(OrchestratorState {
                intents: HashMap::new(),
                queue: Vec::new(),
                bridge: ApprovalBridge::new(config.start_halted),
                calibrator: PreferenceCalibrator::new(config.calibration.clone()),
                penalties: PenaltyTable::new(),
            }),
            audit,
            validator: config.validator.build(),
            composer,
            auto_compose: config.auto_compose,
        }
    }

    /// The audit log backing this orchestrator
    pub fn audit_log(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    /// Append every event of one operation, or none of them
    async fn record_all(&self, events: Vec<AuditEventBuilder>) -> Result<()> {
        let pending = events
            .into_iter()
            .map(AuditEventBuilder::build)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if let Err(e) = self.audit.append_batch(pending).await {
            warn!(error = %e, "Audit append failed; operation aborted");
            return Err(OrchestratorError::AuditWriteFailure(e));
        }
        Ok(())
    }

    async fn record(&self, event: AuditEventBuilder) -> Result<()> {
        self.record_all(vec![event]).await
    }

    /// Record startup configuration
    pub async fn start(&self) -> Result<()> {
        let state = self.state.read().await;
        self.record(
            AuditEvent::builder(AuditEventType::OrchestratorStarted)
                .actor(AuditActor::system(ORCHESTRATOR))
                .field("halted", state.bridge.is_halted())
                .field("agents", self.composer.agent_ids())
                .field("learning_enabled", state.calibrator.policy().enabled),
        )
        .await?;
        info!(halted = state.bridge.is_halted(), "Orchestrator started");
        Ok(())
    }

    /// Validate and enqueue an intent, composing plans if configured to.
    ///
    /// With auto-compose on, the intent and its plans are recorded together:
    /// a failed append leaves neither behind.
    #[instrument(skip(self, raw))]
    pub async fn submit_intent(&self, raw: &Value, principal: &str) -> Result<Submission> {
        let draft = self.validator.validate(raw)?;

        let (penalty, weights) = {
            let state = self.state.read().await;
            (state.penalties.penalty(draft.kind, draft.mode), state.calibrator.weights().clone())
        };

        let intent = Intent {
            id: IntentId::generate(),
            kind: draft.kind,
            target: draft.target,
            mode: draft.mode,
            confidence: draft.confidence,
            calibrated_confidence: draft.confidence * penalty,
            context: draft.context,
            source: draft.source,
            notes: draft.notes,
            patch_content: draft.patch_content,
            phases: draft.phases,
            status: IntentStatus::Pending,
            rejection_reason: None,
            submitted_by: principal.to_string(),
            submitted_at: Utc::now(),
        };

        let composition = if self.auto_compose {
            Some(self.composer.compose(&intent, &weights).await)
        } else {
            None
        };

        let mut state = self.state.write().await;

        let mut events = vec![AuditEvent::builder(AuditEventType::IntentReceived)
            .actor(AuditActor::client(principal))
            .subject(intent.id.to_string())
            .field("kind", intent.kind)
            .field("mode", intent.mode)
            .field("target", &intent.target)
            .field("source", &intent.source)
            .field("confidence", intent.confidence)
            .field("calibrated_confidence", intent.calibrated_confidence)];
        if let Some(composition) = &composition {
            events.extend(composition_events(intent.id, composition));
        }
        self.record_all(events).await?;

        let intent_id = intent.id;
        state.queue.push(intent_id);
        state.intents.insert(intent_id, intent);
        info!(intent_id = %intent_id, "Intent queued");

        if let Some(composition) = composition {
            apply_composition(&mut state, intent_id, composition);
        }
        state.submission(intent_id)
    }

    /// Compose and submit plans for a pending intent.
    ///
    /// Agents run without the state lock. An intent that already has plans
    /// or a final status is left alone.
    #[instrument(skip(self))]
    pub async fn compose_intent(&self, intent_id: IntentId) -> Result<Submission> {
        let (intent, weights) = {
            let state = self.state.read().await;
            let intent = state.intent(intent_id)?;
            if state.is_composed(intent) {
                return state.submission(intent_id);
            }
            (intent.clone(), state.calibrator.weights().clone())
        };

        let composition = self.composer.compose(&intent, &weights).await;

        let mut state = self.state.write().await;
        if state.is_composed(state.intent(intent_id)?) {
            return state.submission(intent_id);
        }

        self.record_all(composition_events(intent_id, &composition)).await?;
        apply_composition(&mut state, intent_id, composition);
        state.submission(intent_id)
    }

    /// Record a human approval. Approving an already approved plan returns
    /// the existing record and changes nothing.
    ///
    /// The approval and the preference update it triggers are recorded
    /// together, so learning runs exactly once per selection.
    #[instrument(skip(self))]
    pub async fn approve(&self, plan_id: PlanId, approver: &str) -> Result<ApprovalRecord> {
        let mut state = self.state.write().await;

        let transition = match state.bridge.prepare_approve(plan_id, approver)? {
            ApprovalDecision::Existing(record) => {
                info!(plan_id = %plan_id, "Plan already approved");
                return Ok(record);
            }
            ApprovalDecision::New(transition) => transition,
        };

        let Transition::Approve { record, superseded } = &transition else {
            return Err(OrchestratorError::PlanNotFound(plan_id));
        };
        let record = record.clone();
        let plan = current_plan(&state, plan_id)?;
        let outcome = plan
            .originating_agent
            .as_deref()
            .map(|agent| state.calibrator.propose(agent));

        let mut events = vec![AuditEvent::builder(AuditEventType::PlanApproved)
            .actor(AuditActor::human(approver))
            .subject(plan_id.to_string())
            .field("intent_id", plan.intent_id)
            .field("superseded", superseded)];
        if let Some(outcome) = &outcome {
            events.push(
                AuditEvent::builder(AuditEventType::PreferenceLearning)
                    .actor(AuditActor::system(CALIBRATOR))
                    .subject(plan_id.to_string())
                    .field("selected_agent", &outcome.selected_agent)
                    .field("before", &outcome.before)
                    .field("after", &outcome.after)
                    .field("clamped", outcome.clamped)
                    .field("learning_enabled", outcome.learning_enabled),
            );
        }
        self.record_all(events).await?;

        state.bridge.apply(transition, record.approved_at);
        if let Some(intent) = state.intents.get_mut(&plan.intent_id) {
            intent.status = IntentStatus::Approved;
        }
        if let Some(outcome) = outcome {
            state.calibrator.apply(outcome);
        }
        info!(plan_id = %plan_id, approver, "Plan approved");

        Ok(record)
    }

    /// Start executing an approved plan.
    ///
    /// This is the compare-and-set point for single-plan exclusivity. Every
    /// refusal is recorded as `execution_rejected`.
    #[instrument(skip(self))]
    pub async fn resume(&self, plan_id: PlanId, actor: &str) -> Result<Plan> {
        let mut state = self.state.write().await;

        let transition = match state.bridge.prepare_resume(plan_id) {
            Ok(transition) => transition,
            Err(e) => {
                warn!(plan_id = %plan_id, error = %e, "Execution rejected");
                self.record(
                    AuditEvent::builder(AuditEventType::ExecutionRejected)
                        .actor(AuditActor::human(actor))
                        .subject(plan_id.to_string())
                        .field("reason", rejection_code(&e))
                        .field("message", e.to_string())
                        .field("halted", state.bridge.is_halted())
                        .field("current_executing_plan", state.bridge.current_executing_plan()),
                )
                .await?;
                return Err(e);
            }
        };

        self.record(
            AuditEvent::builder(AuditEventType::PlanResumed)
                .actor(AuditActor::human(actor))
                .subject(plan_id.to_string()),
        )
        .await?;

        state.bridge.apply(transition, Utc::now());
        info!(plan_id = %plan_id, "Plan executing");
        current_plan(&state, plan_id)
    }

    /// External signal that an executing plan finished. The outcome and the
    /// penalty adjustment it causes are recorded together.
    #[instrument(skip(self, detail))]
    pub async fn complete(&self, plan_id: PlanId, success: bool, detail: Option<String>, actor: &str) -> Result<Plan> {
        let mut state = self.state.write().await;
        let transition = state.bridge.prepare_complete(plan_id, success)?;

        let intent = state.intent(current_plan(&state, plan_id)?.intent_id)?;
        let adjustment = if success {
            PenaltyAdjustment::Recovery
        } else {
            PenaltyAdjustment::Decay
        };
        let change = PenaltyChange::compute(&state.penalties, intent.kind, intent.mode, adjustment);

        let mut events = vec![AuditEvent::builder(AuditEventType::PlanCompleted)
            .actor(AuditActor::system(actor))
            .subject(plan_id.to_string())
            .field("success", success)
            .field("detail", &detail)];
        events.extend(change.iter().map(PenaltyChange::event));
        self.record_all(events).await?;

        state.bridge.apply(transition, Utc::now());
        if let Some(change) = change {
            change.apply(&mut state.penalties);
        }
        info!(plan_id = %plan_id, success, "Plan finished");

        current_plan(&state, plan_id)
    }

    /// Reset every confidence penalty to neutral
    #[instrument(skip(self))]
    pub async fn reset_penalties(&self, actor: &str) -> Result<StateSnapshot> {
        {
            let mut state = self.state.write().await;
            let changes: Vec<PenaltyChange> = state
                .penalties
                .entries()
                .into_iter()
                .filter_map(|e| PenaltyChange::compute(&state.penalties, e.kind, e.mode, PenaltyAdjustment::Reset))
                .collect();

            if !changes.is_empty() {
                self.record_all(changes.iter().map(PenaltyChange::event).collect()).await?;
                for change in changes {
                    change.apply(&mut state.penalties);
                }
            }
            info!(actor, "Confidence penalties reset");
        }
        self.state().await
    }

    /// Abort a plan that is not executing
    #[instrument(skip(self))]
    pub async fn abort(&self, plan_id: PlanId, reason: &str, actor: &str) -> Result<Plan> {
        let mut state = self.state.write().await;
        let transition = state.bridge.prepare_abort(plan_id, reason)?;

        self.record(
            AuditEvent::builder(AuditEventType::PlanAborted)
                .actor(AuditActor::human(actor))
                .subject(plan_id.to_string())
                .field("reason", reason),
        )
        .await?;
        state.bridge.apply(transition, Utc::now());
        info!(plan_id = %plan_id, reason, "Plan aborted");
        current_plan(&state, plan_id)
    }

    /// Engage the halt. An executing plan keeps running.
    #[instrument(skip(self))]
    pub async fn halt(&self, actor: &str, reason: Option<String>) -> Result<StateSnapshot> {
        {
            let mut state = self.state.write().await;
            self.record(
                AuditEvent::builder(AuditEventType::HaltEngaged)
                    .actor(AuditActor::human(actor))
                    .field("reason", &reason)
                    .field("was_halted", state.bridge.is_halted())
                    .field("current_executing_plan", state.bridge.current_executing_plan()),
            )
            .await?;
            state.bridge.apply(Transition::Halt, Utc::now());
            warn!(actor, reason = reason.as_deref().unwrap_or(""), "Halt engaged");
        }
        self.state().await
    }

    /// Release the halt so approved plans may be resumed
    #[instrument(skip(self))]
    pub async fn release_halt(&self, actor: &str) -> Result<StateSnapshot> {
        {
            let mut state = self.state.write().await;
            self.record(
                AuditEvent::builder(AuditEventType::HaltReleased)
                    .actor(AuditActor::human(actor))
                    .field("was_halted", state.bridge.is_halted()),
            )
            .await?;
            state.bridge.apply(Transition::ReleaseHalt, Utc::now());
            info!(actor, "Halt released");
        }
        self.state().await
    }

    pub async fn state(&self) -> Result<StateSnapshot> {
        let mut snapshot = {
            let state = self.state.read().await;
            StateSnapshot {
                halted: state.bridge.is_halted(),
                current_executing_plan: state.bridge.current_executing_plan(),
                plan_count: state.bridge.plan_count(),
                intent_count: state.queue.len(),
                pending_intents: state
                    .intents
                    .values()
                    .filter(|i| i.status == IntentStatus::Pending)
                    .count(),
                audit_events: 0,
                preference_weights: state.calibrator.weights().clone(),
                confidence_penalties: state.penalties.entries(),
            }
        };
        snapshot.audit_events = self.audit.len().await?;
        Ok(snapshot)
    }

    pub async fn get_intent(&self, intent_id: IntentId) -> Result<Intent> {
        self.state.read().await.intent(intent_id).cloned()
    }

    pub async fn get_plan(&self, plan_id: PlanId) -> Result<Plan> {
        current_plan(&*self.state.read().await, plan_id)
    }

    /// Intents in submission order
    pub async fn list_intents(&self, status: Option<IntentStatus>, window: Window) -> Page<Intent> {
        let state = self.state.read().await;
        let intents = state
            .queue
            .iter()
            .filter_map(|id| state.intents.get(id))
            .filter(|i| status.map_or(true, |s| i.status == s));
        Page::collect(intents, window)
    }

    /// Plans in registration order
    pub async fn list_plans(&self, filter: &PlanFilter, window: Window) -> Page<Plan> {
        let state = self.state.read().await;
        let plans = state.bridge.plans().filter(|p| {
            filter.status.map_or(true, |s| p.status == s) && filter.intent_id.map_or(true, |i| p.intent_id == i)
        });
        Page::collect(plans, window)
    }
}

/// Events describing one composition run
fn composition_events(intent_id: IntentId, composition: &Composition) -> Vec<AuditEventBuilder> {
    let mut events = vec![AuditEvent::builder(AuditEventType::MetaPlanComparison)
        .actor(AuditActor::system(COMPOSER))
        .subject(intent_id.to_string())
        .field("comparison", &composition.comparison)];

    if composition.is_empty() {
        events.push(
            AuditEvent::builder(AuditEventType::IntentRejected)
                .actor(AuditActor::system(COMPOSER))
                .subject(intent_id.to_string())
                .field("reason", NO_VIABLE_PLAN),
        );
        return events;
    }

    events.push(
        AuditEvent::builder(AuditEventType::PlansComposed)
            .actor(AuditActor::system(COMPOSER))
            .subject(intent_id.to_string())
            .field("plan_ids", &composition.comparison.ordering),
    );
    events.extend(composition.plans.iter().map(|plan| {
        AuditEvent::builder(AuditEventType::PlanSubmitted)
            .actor(AuditActor::system(ORCHESTRATOR))
            .subject(plan.id.to_string())
            .field("intent_id", intent_id)
            .field("originating_agent", &plan.originating_agent)
            .field("confidence_score", plan.confidence_score)
            .field("rank", plan.rank)
    }));
    events
}

/// Register the plans of a recorded composition, or reject the intent
fn apply_composition(state: &mut OrchestratorState, intent_id: IntentId, composition: Composition) {
    if composition.is_empty() {
        if let Some(intent) = state.intents.get_mut(&intent_id) {
            intent.status = IntentStatus::Rejected;
            intent.rejection_reason = Some(NO_VIABLE_PLAN.to_string());
        }
        warn!(intent_id = %intent_id, "No viable plan; intent rejected");
        return;
    }

    let at = Utc::now();
    for plan in composition.plans {
        let plan_id = plan.id;
        state.bridge.register(plan);
        if let Ok(transition) = state.bridge.prepare_submit(plan_id) {
            state.bridge.apply(transition, at);
        }
    }
    info!(intent_id = %intent_id, plans = state.bridge.plans_for(intent_id).count(), "Plans awaiting approval");
}

/// A pending penalty update for one (kind, mode) pair
struct PenaltyChange {
    kind: IntentKind,
    mode: ExecutionMode,
    adjustment: PenaltyAdjustment,
    before: f64,
    after: f64,
}

impl PenaltyChange {
    /// `None` when the adjustment would not move the penalty
    fn compute(table: &PenaltyTable, kind: IntentKind, mode: ExecutionMode, adjustment: PenaltyAdjustment) -> Option<Self> {
        let before = table.penalty(kind, mode);
        let after = table.adjusted(kind, mode, adjustment);
        (before != after).then_some(Self {
            kind,
            mode,
            adjustment,
            before,
            after,
        })
    }

    fn event(&self) -> AuditEventBuilder {
        AuditEvent::builder(AuditEventType::ConfidenceCalibrated)
            .actor(AuditActor::system(CALIBRATOR))
            .field("kind", self.kind)
            .field("mode", self.mode)
            .field("adjustment", self.adjustment)
            .field("before", self.before)
            .field("after", self.after)
    }

    fn apply(self, table: &mut PenaltyTable) {
        table.set(self.kind, self.mode, self.after);
    }
}

fn current_plan(state: &OrchestratorState, plan_id: PlanId) -> Result<Plan> {
    state
        .bridge
        .plan(plan_id)
        .cloned()
        .ok_or(OrchestratorError::PlanNotFound(plan_id))
}

fn rejection_code(error: &OrchestratorError) -> &'static str {
    match error {
        OrchestratorError::HaltActive(_) => "halt_active",
        OrchestratorError::ConcurrentExecutionRejected { .. } => "concurrent_execution",
        OrchestratorError::PlanNotFound(_) => "plan_not_found",
        OrchestratorError::InvalidTransition { .. } => "invalid_transition",
        _ => "rejected",
    }
}
