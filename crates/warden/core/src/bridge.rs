//! Approval bridge: the plan lifecycle and the global halt flag.
//!
//! Every operation is split in two. `prepare_*` checks the request against
//! the current state and returns a [`Transition`] without touching anything.
//! [`ApprovalBridge::apply`] installs a transition and cannot fail. The
//! orchestrator records the transition in the audit log between the two
//! steps, so a failed audit write leaves the bridge unchanged.
//!
//! The bridge never consults preference weights or confidence scores.

use crate::error::{OrchestratorError, Result};
use crate::types::{ApprovalRecord, IntentId, Plan, PlanId, PlanStatus};
use crate::validator::ValidationError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Reason recorded on plans dropped because a sibling was approved
pub const SUPERSEDED: &str = "superseded";

/// A checked state change, ready to apply
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Submit {
        plan_id: PlanId,
    },
    Approve {
        record: ApprovalRecord,
        superseded: Vec<PlanId>,
    },
    Resume {
        plan_id: PlanId,
    },
    Complete {
        plan_id: PlanId,
        success: bool,
    },
    Abort {
        plan_id: PlanId,
        reason: String,
    },
    Halt,
    ReleaseHalt,
}

/// Result of checking an approval
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalDecision {
    /// The plan was approved before; nothing changes
    Existing(ApprovalRecord),
    /// A first approval, to be audited and applied
    New(Transition),
}

/// Plan registry and execution gate
#[derive(Debug)]
pub struct ApprovalBridge {
    halted: bool,
    current_executing_plan: Option<PlanId>,
    plans: HashMap<PlanId, Plan>,
    order: Vec<PlanId>,
    approvals: HashMap<PlanId, ApprovalRecord>,
}

impl ApprovalBridge {
    pub fn new(start_halted: bool) -> Self {
        Self {
            halted: start_halted,
            current_executing_plan: None,
            plans: HashMap::new(),
            order: Vec::new(),
            approvals: HashMap::new(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn current_executing_plan(&self) -> Option<PlanId> {
        self.current_executing_plan
    }

    pub fn plan(&self, plan_id: PlanId) -> Option<&Plan> {
        self.plans.get(&plan_id)
    }

    pub fn approval(&self, plan_id: PlanId) -> Option<&ApprovalRecord> {
        self.approvals.get(&plan_id)
    }

    pub fn plan_count(&self) -> usize {
        self.order.len()
    }

    /// Plans in registration order
    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.order.iter().filter_map(|id| self.plans.get(id))
    }

    /// Plans belonging to one intent
    pub fn plans_for(&self, intent_id: IntentId) -> impl Iterator<Item = &Plan> {
        self.plans().filter(move |p| p.intent_id == intent_id)
    }

    fn get(&self, plan_id: PlanId) -> Result<&Plan> {
        self.plans
            .get(&plan_id)
            .ok_or(OrchestratorError::PlanNotFound(plan_id))
    }

    fn invalid(plan: &Plan, action: &'static str) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            plan_id: plan.id,
            from: plan.status,
            action,
        }
    }

    /// Add a freshly composed plan in `Proposed`
    pub fn register(&mut self, mut plan: Plan) {
        plan.status = PlanStatus::Proposed;
        self.order.push(plan.id);
        self.plans.insert(plan.id, plan);
    }

    pub fn prepare_submit(&self, plan_id: PlanId) -> Result<Transition> {
        let plan = self.get(plan_id)?;
        if plan.status != PlanStatus::Proposed {
            return Err(Self::invalid(plan, "submit"));
        }
        Ok(Transition::Submit { plan_id })
    }

    pub fn prepare_approve(&self, plan_id: PlanId, approver: &str) -> Result<ApprovalDecision> {
        if approver.trim().is_empty() {
            return Err(ValidationError::single("approver", "approver must be non-empty").into());
        }

        let plan = self.get(plan_id)?;
        if let Some(record) = self.approvals.get(&plan_id) {
            return Ok(ApprovalDecision::Existing(record.clone()));
        }
        if plan.status != PlanStatus::PendingApproval {
            return Err(Self::invalid(plan, "approve"));
        }

        let superseded = self
            .plans_for(plan.intent_id)
            .filter(|p| p.id != plan_id && !p.status.is_terminal() && p.status != PlanStatus::Executing)
            .map(|p| p.id)
            .collect();

        Ok(ApprovalDecision::New(Transition::Approve {
            record: ApprovalRecord {
                plan_id,
                approver: approver.to_string(),
                approved_at: Utc::now(),
            },
            superseded,
        }))
    }

    /// Compare-and-set check for starting execution
    pub fn prepare_resume(&self, plan_id: PlanId) -> Result<Transition> {
        let plan = self.get(plan_id)?;
        if plan.status == PlanStatus::Executing {
            if let Some(executing) = self.current_executing_plan {
                return Err(OrchestratorError::ConcurrentExecutionRejected {
                    requested: plan_id,
                    executing,
                });
            }
        }
        if plan.status != PlanStatus::Approved || !self.approvals.contains_key(&plan_id) {
            return Err(Self::invalid(plan, "resume"));
        }
        if self.halted {
            return Err(OrchestratorError::HaltActive(plan_id));
        }
        if let Some(executing) = self.current_executing_plan {
            return Err(OrchestratorError::ConcurrentExecutionRejected {
                requested: plan_id,
                executing,
            });
        }
        Ok(Transition::Resume { plan_id })
    }

    pub fn prepare_complete(&self, plan_id: PlanId, success: bool) -> Result<Transition> {
        let plan = self.get(plan_id)?;
        if plan.status != PlanStatus::Executing {
            return Err(Self::invalid(plan, "complete"));
        }
        Ok(Transition::Complete { plan_id, success })
    }

    pub fn prepare_abort(&self, plan_id: PlanId, reason: &str) -> Result<Transition> {
        if reason.trim().is_empty() {
            return Err(ValidationError::single("reason", "reason must be non-empty").into());
        }
        let plan = self.get(plan_id)?;
        if plan.status.is_terminal() || plan.status == PlanStatus::Executing {
            return Err(Self::invalid(plan, "abort"));
        }
        Ok(Transition::Abort {
            plan_id,
            reason: reason.to_string(),
        })
    }

    /// Install a prepared transition
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) {
        match transition {
            Transition::Submit { plan_id } => {
                self.set_status(plan_id, PlanStatus::PendingApproval, None, at);
            }
            Transition::Approve { record, superseded } => {
                self.set_status(record.plan_id, PlanStatus::Approved, None, at);
                for sibling in superseded {
                    self.set_status(sibling, PlanStatus::Aborted, Some(SUPERSEDED.to_string()), at);
                }
                self.approvals.insert(record.plan_id, record);
            }
            Transition::Resume { plan_id } => {
                self.set_status(plan_id, PlanStatus::Executing, None, at);
                self.current_executing_plan = Some(plan_id);
            }
            Transition::Complete { plan_id, success } => {
                let (status, reason) = if success {
                    (PlanStatus::Completed, None)
                } else {
                    (PlanStatus::Aborted, Some("execution_failed".to_string()))
                };
                self.set_status(plan_id, status, reason, at);
                if self.current_executing_plan == Some(plan_id) {
                    self.current_executing_plan = None;
                }
            }
            Transition::Abort { plan_id, reason } => {
                self.set_status(plan_id, PlanStatus::Aborted, Some(reason), at);
            }
            Transition::Halt => self.halted = true,
            Transition::ReleaseHalt => self.halted = false,
        }
    }

    fn set_status(&mut self, plan_id: PlanId, status: PlanStatus, reason: Option<String>, at: DateTime<Utc>) {
        if let Some(plan) = self.plans.get_mut(&plan_id) {
            plan.status = status;
            plan.updated_at = at;
            if reason.is_some() {
                plan.abort_reason = reason;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlanStep;

    fn plan(intent_id: IntentId) -> Plan {
        let now = Utc::now();
        Plan {
            id: PlanId::generate(),
            intent_id,
            originating_agent: Some("a".into()),
            steps: vec![PlanStep {
                index: 0,
                phase_id: None,
                action: "inspect".into(),
                description: "inspect X".into(),
            }],
            confidence_score: 0.8,
            rank: 0,
            status: PlanStatus::Proposed,
            rationale: None,
            abort_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn pending(bridge: &mut ApprovalBridge, intent_id: IntentId) -> PlanId {
        let plan = plan(intent_id);
        let id = plan.id;
        bridge.register(plan);
        let t = bridge.prepare_submit(id).unwrap();
        bridge.apply(t, Utc::now());
        id
    }

    fn approve(bridge: &mut ApprovalBridge, id: PlanId) {
        match bridge.prepare_approve(id, "alice").unwrap() {
            ApprovalDecision::New(t) => bridge.apply(t, Utc::now()),
            ApprovalDecision::Existing(_) => panic!("expected first approval"),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut bridge = ApprovalBridge::new(false);
        let id = pending(&mut bridge, IntentId::generate());
        assert_eq!(bridge.plan(id).unwrap().status, PlanStatus::PendingApproval);

        approve(&mut bridge, id);
        let t = bridge.prepare_resume(id).unwrap();
        bridge.apply(t, Utc::now());
        assert_eq!(bridge.current_executing_plan(), Some(id));

        let t = bridge.prepare_complete(id, true).unwrap();
        bridge.apply(t, Utc::now());
        assert_eq!(bridge.plan(id).unwrap().status, PlanStatus::Completed);
        assert_eq!(bridge.current_executing_plan(), None);
    }

    #[test]
    fn test_resume_requires_approval() {
        let mut bridge = ApprovalBridge::new(false);
        let id = pending(&mut bridge, IntentId::generate());
        assert!(matches!(
            bridge.prepare_resume(id),
            Err(OrchestratorError::InvalidTransition { action: "resume", .. })
        ));
    }

    #[test]
    fn test_halt_blocks_resume() {
        let mut bridge = ApprovalBridge::new(true);
        let id = pending(&mut bridge, IntentId::generate());
        approve(&mut bridge, id);
        assert!(matches!(
            bridge.prepare_resume(id),
            Err(OrchestratorError::HaltActive(p)) if p == id
        ));

        bridge.apply(Transition::ReleaseHalt, Utc::now());
        assert!(bridge.prepare_resume(id).is_ok());
    }

    #[test]
    fn test_single_executing_plan() {
        let mut bridge = ApprovalBridge::new(false);
        let a = pending(&mut bridge, IntentId::generate());
        let b = pending(&mut bridge, IntentId::generate());
        approve(&mut bridge, a);
        approve(&mut bridge, b);

        let t = bridge.prepare_resume(a).unwrap();
        bridge.apply(t, Utc::now());

        assert!(matches!(
            bridge.prepare_resume(a),
            Err(OrchestratorError::ConcurrentExecutionRejected { requested, executing }) if requested == a && executing == a
        ));

        match bridge.prepare_resume(b) {
            Err(OrchestratorError::ConcurrentExecutionRejected { requested, executing }) => {
                assert_eq!(requested, b);
                assert_eq!(executing, a);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_approve_is_idempotent() {
        let mut bridge = ApprovalBridge::new(false);
        let id = pending(&mut bridge, IntentId::generate());
        approve(&mut bridge, id);
        let record = bridge.approval(id).cloned().unwrap();

        match bridge.prepare_approve(id, "bob").unwrap() {
            ApprovalDecision::Existing(existing) => assert_eq!(existing, record),
            ApprovalDecision::New(_) => panic!("second approval must not create a record"),
        }
    }

    #[test]
    fn test_approve_supersedes_siblings() {
        let mut bridge = ApprovalBridge::new(false);
        let intent = IntentId::generate();
        let chosen = pending(&mut bridge, intent);
        let sibling = pending(&mut bridge, intent);
        let unrelated = pending(&mut bridge, IntentId::generate());

        approve(&mut bridge, chosen);

        let sibling = bridge.plan(sibling).unwrap();
        assert_eq!(sibling.status, PlanStatus::Aborted);
        assert_eq!(sibling.abort_reason.as_deref(), Some(SUPERSEDED));
        assert_eq!(bridge.plan(unrelated).unwrap().status, PlanStatus::PendingApproval);
    }

    #[test]
    fn test_empty_approver_rejected() {
        let mut bridge = ApprovalBridge::new(false);
        let id = pending(&mut bridge, IntentId::generate());
        assert!(matches!(
            bridge.prepare_approve(id, "  "),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn test_abort_rules() {
        let mut bridge = ApprovalBridge::new(false);
        let id = pending(&mut bridge, IntentId::generate());
        approve(&mut bridge, id);
        let t = bridge.prepare_resume(id).unwrap();
        bridge.apply(t, Utc::now());

        assert!(bridge.prepare_abort(id, "stop").is_err());

        let t = bridge.prepare_complete(id, false).unwrap();
        bridge.apply(t, Utc::now());
        assert_eq!(bridge.plan(id).unwrap().status, PlanStatus::Aborted);
        assert!(bridge.prepare_abort(id, "again").is_err());
    }

    #[test]
    fn test_unknown_plan() {
        let bridge = ApprovalBridge::new(false);
        let id = PlanId::generate();
        assert!(matches!(
            bridge.prepare_resume(id),
            Err(OrchestratorError::PlanNotFound(p)) if p == id
        ));
    }
}
