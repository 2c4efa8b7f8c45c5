//! Plan composition.
//!
//! Every configured [`PlanAgent`] is asked for a proposal concurrently. Slow
//! or failing agents shrink the candidate set instead of failing the intent.
//! Survivors of the confidence floor are ranked by
//! `confidence_score * weight(agent)` for presentation only.

use crate::calibrator::PreferenceWeights;
use crate::types::{AgentId, Intent, Plan, PlanId, PlanStatus, PlanStep};
use crate::validator::phase_order;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What an agent hands back for an intent
#[derive(Debug, Clone)]
pub struct PlanProposal {
    pub steps: Vec<PlanStep>,
    /// Self-reported confidence in [0, 1]
    pub confidence_score: f64,
    pub rationale: Option<String>,
}

/// Errors from plan-generating agents
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent failed: {0}")]
    Failed(String),

    #[error("agent returned an invalid proposal: {0}")]
    InvalidProposal(String),
}

/// A stateless plan-generating agent
#[async_trait]
pub trait PlanAgent: Send + Sync {
    /// Stable identifier used for preference weights
    fn id(&self) -> &str;

    /// Propose a plan for an intent
    async fn propose(&self, intent: &Intent) -> Result<PlanProposal, AgentError>;
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AgentSpec {
    /// One step straight from the intent
    Direct { id: AgentId },
    /// One step per phase task, in dependency order
    Phased { id: AgentId },
    /// Direct steps with a fixed confidence score
    Fixed { id: AgentId, confidence: f64 },
}

impl AgentSpec {
    pub fn id(&self) -> &str {
        match self {
            Self::Direct { id } | Self::Phased { id } | Self::Fixed { id, .. } => id,
        }
    }

    /// Instantiate the agent
    pub fn build(&self) -> Arc<dyn PlanAgent> {
        match self {
            Self::Direct { id } => Arc::new(DirectAgent::new(id.clone())),
            Self::Phased { id } => Arc::new(PhasedAgent::new(id.clone())),
            Self::Fixed { id, confidence } => Arc::new(FixedAgent::new(id.clone(), *confidence)),
        }
    }
}

/// Composer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposerConfig {
    /// Plans scoring below this are pruned
    #[serde(default = "default_min_plan_confidence")]
    pub min_plan_confidence: f64,

    /// Per-agent deadline
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSpec>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            min_plan_confidence: default_min_plan_confidence(),
            agent_timeout_ms: default_agent_timeout_ms(),
            agents: default_agents(),
        }
    }
}

fn default_min_plan_confidence() -> f64 {
    0.5
}

fn default_agent_timeout_ms() -> u64 {
    5_000
}

fn default_agents() -> Vec<AgentSpec> {
    vec![AgentSpec::Phased {
        id: "planner".to_string(),
    }]
}

fn direct_steps(intent: &Intent) -> Vec<PlanStep> {
    vec![PlanStep {
        index: 0,
        phase_id: None,
        action: intent.kind.as_str().to_string(),
        description: format!(
            "{} {} ({})",
            intent.kind, intent.target, intent.mode
        ),
    }]
}

/// Single-step plan scored with the intent's calibrated confidence
pub struct DirectAgent {
    id: AgentId,
}

impl DirectAgent {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl PlanAgent for DirectAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn propose(&self, intent: &Intent) -> Result<PlanProposal, AgentError> {
        Ok(PlanProposal {
            steps: direct_steps(intent),
            confidence_score: intent.calibrated_confidence,
            rationale: Some(format!("Direct {} on {}", intent.kind, intent.target)),
        })
    }
}

/// Expands declared phases into ordered steps
pub struct PhasedAgent {
    id: AgentId,
}

impl PhasedAgent {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl PlanAgent for PhasedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn propose(&self, intent: &Intent) -> Result<PlanProposal, AgentError> {
        if intent.phases.is_empty() {
            return Ok(PlanProposal {
                steps: direct_steps(intent),
                confidence_score: intent.calibrated_confidence,
                rationale: Some("No phases declared; single step".to_string()),
            });
        }

        let order = phase_order(&intent.phases)
            .ok_or_else(|| AgentError::InvalidProposal("phase dependencies form a cycle".into()))?;

        let mut steps = Vec::new();
        for phase in order.into_iter().map(|i| &intent.phases[i]) {
            if phase.tasks.is_empty() {
                steps.push(PlanStep {
                    index: steps.len(),
                    phase_id: Some(phase.phase_id.clone()),
                    action: intent.kind.as_str().to_string(),
                    description: phase.description.clone(),
                });
            }
            for task in &phase.tasks {
                steps.push(PlanStep {
                    index: steps.len(),
                    phase_id: Some(phase.phase_id.clone()),
                    action: intent.kind.as_str().to_string(),
                    description: task.clone(),
                });
            }
        }

        Ok(PlanProposal {
            steps,
            confidence_score: intent.calibrated_confidence,
            rationale: Some(format!("{} phases in dependency order", intent.phases.len())),
        })
    }
}

/// Direct steps with a configured score
pub struct FixedAgent {
    id: AgentId,
    confidence: f64,
}

impl FixedAgent {
    pub fn new(id: impl Into<AgentId>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            confidence,
        }
    }
}

#[async_trait]
impl PlanAgent for FixedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn propose(&self, intent: &Intent) -> Result<PlanProposal, AgentError> {
        Ok(PlanProposal {
            steps: direct_steps(intent),
            confidence_score: self.confidence,
            rationale: None,
        })
    }
}

/// Per-agent line of the comparison artifact
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub agent_id: AgentId,
    pub raw_score: Option<f64>,
    pub weight: f64,
    pub weighted_score: Option<f64>,
    pub pruned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything needed to audit how the candidate plans were ordered
#[derive(Debug, Clone, Serialize)]
pub struct PlanComparison {
    pub min_plan_confidence: f64,
    pub candidates: Vec<CandidateSummary>,
    /// Surviving plans, recommended first
    pub ordering: Vec<PlanId>,
}

/// Output of one composition round
#[derive(Debug, Clone)]
pub struct Composition {
    /// Ranked surviving plans, all `Proposed`
    pub plans: Vec<Plan>,
    pub comparison: PlanComparison,
}

impl Composition {
    /// Nothing survived pruning
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Fans an intent out to agents and ranks the results
pub struct PlanComposer {
    agents: Vec<Arc<dyn PlanAgent>>,
    min_plan_confidence: f64,
    agent_timeout: Duration,
}

impl PlanComposer {
    pub fn new(agents: Vec<Arc<dyn PlanAgent>>, min_plan_confidence: f64, agent_timeout: Duration) -> Self {
        Self {
            agents,
            min_plan_confidence,
            agent_timeout,
        }
    }

    pub fn from_config(config: &ComposerConfig) -> Self {
        Self::new(
            config.agents.iter().map(AgentSpec::build).collect(),
            config.min_plan_confidence,
            Duration::from_millis(config.agent_timeout_ms),
        )
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id()).collect()
    }

    /// Collect, prune and rank candidate plans for `intent`
    pub async fn compose(&self, intent: &Intent, weights: &PreferenceWeights) -> Composition {
        let calls = self.agents.iter().map(|agent| async move {
            let result = tokio::time::timeout(self.agent_timeout, agent.propose(intent)).await;
            let result = match result {
                Ok(Ok(proposal)) => check_proposal(proposal),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "timed out after {}ms",
                    self.agent_timeout.as_millis()
                )),
            };
            (agent.id().to_string(), result)
        });

        let results = join_all(calls).await;
        let now = Utc::now();

        let mut candidates = Vec::with_capacity(results.len());
        let mut survivors: Vec<(f64, Plan)> = Vec::new();

        for (agent_id, result) in results {
            let weight = weights.weight(&agent_id);
            match result {
                Ok(proposal) => {
                    let score = proposal.confidence_score;
                    let pruned = score < self.min_plan_confidence;
                    let mut summary = CandidateSummary {
                        agent_id: agent_id.clone(),
                        raw_score: Some(score),
                        weight,
                        weighted_score: Some(score * weight),
                        pruned,
                        plan_id: None,
                        rank: None,
                        error: None,
                    };

                    if pruned {
                        debug!(agent = %agent_id, score, "Pruned plan below confidence floor");
                    } else {
                        let plan = Plan {
                            id: PlanId::generate(),
                            intent_id: intent.id,
                            originating_agent: Some(agent_id.clone()),
                            steps: proposal.steps,
                            confidence_score: score,
                            rank: 0,
                            status: PlanStatus::Proposed,
                            rationale: proposal.rationale,
                            abort_reason: None,
                            created_at: now,
                            updated_at: now,
                        };
                        summary.plan_id = Some(plan.id);
                        survivors.push((score * weight, plan));
                    }
                    candidates.push(summary);
                }
                Err(error) => {
                    warn!(agent = %agent_id, intent_id = %intent.id, %error, "Plan agent produced no candidate");
                    candidates.push(CandidateSummary {
                        agent_id,
                        raw_score: None,
                        weight,
                        weighted_score: None,
                        pruned: false,
                        plan_id: None,
                        rank: None,
                        error: Some(error),
                    });
                }
            }
        }

        survivors.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .total_cmp(a_score)
                .then_with(|| a.originating_agent.cmp(&b.originating_agent))
        });

        let plans: Vec<Plan> = survivors
            .into_iter()
            .enumerate()
            .map(|(rank, (_, mut plan))| {
                plan.rank = rank;
                plan
            })
            .collect();

        for candidate in &mut candidates {
            candidate.rank = candidate
                .plan_id
                .and_then(|id| plans.iter().position(|p| p.id == id));
        }

        Composition {
            comparison: PlanComparison {
                min_plan_confidence: self.min_plan_confidence,
                candidates,
                ordering: plans.iter().map(|p| p.id).collect(),
            },
            plans,
        }
    }
}

fn check_proposal(proposal: PlanProposal) -> Result<PlanProposal, String> {
    if !(0.0..=1.0).contains(&proposal.confidence_score) {
        return Err(format!(
            "confidence score {} outside [0, 1]",
            proposal.confidence_score
        ));
    }
    if proposal.steps.is_empty() {
        return Err("proposal has no steps".to_string());
    }
    Ok(proposal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionMode, IntentId, IntentKind, IntentStatus, Phase};

    fn intent(confidence: f64) -> Intent {
        Intent {
            id: IntentId::generate(),
            kind: IntentKind::Inspect,
            target: "X".to_string(),
            mode: ExecutionMode::ReasonOnly,
            confidence,
            calibrated_confidence: confidence,
            context: serde_json::Value::Null,
            source: "test".to_string(),
            notes: None,
            patch_content: None,
            phases: Vec::new(),
            status: IntentStatus::Pending,
            rejection_reason: None,
            submitted_by: "tester".to_string(),
            submitted_at: Utc::now(),
        }
    }

    struct SlowAgent;

    #[async_trait]
    impl PlanAgent for SlowAgent {
        fn id(&self) -> &str {
            "slow"
        }

        async fn propose(&self, _intent: &Intent) -> Result<PlanProposal, AgentError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(AgentError::Failed("unreachable".into()))
        }
    }

    struct BrokenAgent;

    #[async_trait]
    impl PlanAgent for BrokenAgent {
        fn id(&self) -> &str {
            "broken"
        }

        async fn propose(&self, _intent: &Intent) -> Result<PlanProposal, AgentError> {
            Err(AgentError::Failed("model unavailable".into()))
        }
    }

    fn fixed(agents: &[(&str, f64)]) -> Vec<Arc<dyn PlanAgent>> {
        agents
            .iter()
            .map(|(id, c)| Arc::new(FixedAgent::new(*id, *c)) as Arc<dyn PlanAgent>)
            .collect()
    }

    #[tokio::test]
    async fn test_prunes_below_floor() {
        let composer = PlanComposer::new(
            fixed(&[("a", 0.3), ("b", 0.7), ("c", 0.9)]),
            0.5,
            Duration::from_secs(1),
        );

        let composition = composer.compose(&intent(0.8), &PreferenceWeights::new()).await;

        let scores: Vec<f64> = composition.plans.iter().map(|p| p.confidence_score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert_eq!(composition.comparison.candidates.len(), 3);
        assert!(composition.comparison.candidates[0].pruned);
        assert!(composition.plans.iter().all(|p| p.status == PlanStatus::Proposed));
    }

    #[tokio::test]
    async fn test_weights_bias_ordering() {
        let composer = PlanComposer::new(
            fixed(&[("b", 0.7), ("c", 0.9)]),
            0.5,
            Duration::from_secs(1),
        );
        let weights = PreferenceWeights::from([("b", 1.5), ("c", 1.0)]);

        let composition = composer.compose(&intent(0.8), &weights).await;

        assert_eq!(composition.plans[0].originating_agent.as_deref(), Some("b"));
        assert_eq!(composition.plans[0].rank, 0);
        assert_eq!(composition.plans[1].rank, 1);
        assert_eq!(composition.comparison.ordering[0], composition.plans[0].id);
        // Raw scores are untouched by weighting
        assert_eq!(composition.plans[0].confidence_score, 0.7);
    }

    #[tokio::test]
    async fn test_all_pruned_is_empty() {
        let composer = PlanComposer::new(fixed(&[("a", 0.1)]), 0.5, Duration::from_secs(1));
        let composition = composer.compose(&intent(0.8), &PreferenceWeights::new()).await;
        assert!(composition.is_empty());
        assert!(composition.comparison.ordering.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_and_failed_agents_degrade() {
        let mut agents = fixed(&[("steady", 0.8)]);
        agents.push(Arc::new(SlowAgent));
        agents.push(Arc::new(BrokenAgent));

        let composer = PlanComposer::new(agents, 0.5, Duration::from_millis(100));
        let composition = composer.compose(&intent(0.8), &PreferenceWeights::new()).await;

        assert_eq!(composition.plans.len(), 1);
        let errors: Vec<_> = composition
            .comparison
            .candidates
            .iter()
            .filter_map(|c| c.error.as_deref())
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("timed out")));
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_a_failure() {
        let composer = PlanComposer::new(fixed(&[("wild", 1.7)]), 0.0, Duration::from_secs(1));
        let composition = composer.compose(&intent(0.8), &PreferenceWeights::new()).await;
        assert!(composition.is_empty());
        assert!(composition.comparison.candidates[0].error.is_some());
    }

    #[tokio::test]
    async fn test_phased_agent_orders_steps() {
        let mut intent = intent(0.9);
        intent.phases = vec![
            Phase {
                phase_id: "deploy".into(),
                description: "Deploy".into(),
                depends_on: vec!["build".into()],
                tasks: vec![],
            },
            Phase {
                phase_id: "build".into(),
                description: "Build".into(),
                depends_on: vec![],
                tasks: vec!["compile".into(), "package".into()],
            },
        ];

        let proposal = PhasedAgent::new("planner").propose(&intent).await.unwrap();
        let descriptions: Vec<&str> = proposal.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(descriptions, vec!["compile", "package", "Deploy"]);
        assert_eq!(proposal.steps[2].index, 2);
    }

    #[test]
    fn test_agent_spec_config() {
        let specs: Vec<AgentSpec> = serde_json::from_str(
            r#"[{"strategy":"direct","id":"d"},{"strategy":"fixed","id":"f","confidence":0.6}]"#,
        )
        .unwrap();
        assert_eq!(specs[1].id(), "f");
        assert_eq!(specs[1].build().id(), "f");
    }
}
