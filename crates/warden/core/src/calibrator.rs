//! Preference calibration.
//!
//! Per-agent weights bias the *presentation order* of composed plans and
//! nothing else. The update rule is a pure function of the current weights
//! and one human selection so it can be exercised without the approval gate.
//!
//! Two decay rules are available. The default, [`DecayMode::Multiplicative`],
//! scales every weight by `decay_rate` and reproduces the reference selection
//! `{A:1.0, B:1.2, C:0.8}` -> C chosen -> `{A:0.95, B:1.14, C:0.91}`.
//! [`DecayMode::TowardNeutral`] implements the "decay toward neutral" rule
//! `1.0 + (w - 1.0) * decay_rate`, which gives different numbers for the
//! same selection; it must be selected explicitly.
//!
//! A second, independent table tracks a confidence penalty per
//! (intent kind, mode) from execution outcomes. It only scales the advisory
//! confidence shown on new intents.

use crate::types::{AgentId, ExecutionMode, IntentKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Neutral weight every agent starts from
pub const NEUTRAL_WEIGHT: f64 = 1.0;

/// How existing weights decay before the selected agent is boosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayMode {
    /// `w * decay_rate`. Default; matches the reference selection numbers
    #[default]
    Multiplicative,
    /// `1.0 + (w - 1.0) * decay_rate`, pulling weights back toward 1.0
    TowardNeutral,
}

/// Learning policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationPolicy {
    /// Learning is opt-in; when off every weight stays at 1.0
    #[serde(default)]
    pub enabled: bool,

    /// Defaults to [`DecayMode::Multiplicative`], not the toward-neutral rule
    #[serde(default)]
    pub decay_mode: DecayMode,

    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_min_weight")]
    pub min_weight: f64,

    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            decay_mode: DecayMode::default(),
            decay_rate: default_decay_rate(),
            learning_rate: default_learning_rate(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
        }
    }
}

fn default_decay_rate() -> f64 {
    0.95
}

fn default_learning_rate() -> f64 {
    0.15
}

fn default_min_weight() -> f64 {
    0.5
}

fn default_max_weight() -> f64 {
    2.0
}

impl CalibrationPolicy {
    /// Check the policy is internally consistent
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_weight <= NEUTRAL_WEIGHT && NEUTRAL_WEIGHT <= self.max_weight) {
            return Err(format!(
                "weight bounds [{}, {}] must contain the neutral weight 1.0",
                self.min_weight, self.max_weight
            ));
        }
        if !(0.0..=1.0).contains(&self.decay_rate) {
            return Err(format!("decay_rate {} must be within [0, 1]", self.decay_rate));
        }
        if !(self.learning_rate >= 0.0 && self.learning_rate.is_finite()) {
            return Err(format!(
                "learning_rate {} must be a non-negative number",
                self.learning_rate
            ));
        }
        Ok(())
    }
}

/// Agent weights. Agents never seen are at the neutral weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreferenceWeights(BTreeMap<AgentId, f64>);

impl PreferenceWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(&self, agent: &str) -> f64 {
        self.0.get(agent).copied().unwrap_or(NEUTRAL_WEIGHT)
    }

    pub fn set(&mut self, agent: impl Into<AgentId>, weight: f64) {
        self.0.insert(agent.into(), weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &f64)> {
        self.0.iter()
    }
}

impl<const N: usize> From<[(&str, f64); N]> for PreferenceWeights {
    fn from(entries: [(&str, f64); N]) -> Self {
        Self(entries.into_iter().map(|(a, w)| (a.to_string(), w)).collect())
    }
}

/// Result of one calibration step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationOutcome {
    pub before: PreferenceWeights,
    pub after: PreferenceWeights,
    pub selected_agent: AgentId,
    /// Whether any weight hit a bound
    pub clamped: bool,
    pub learning_enabled: bool,
}

/// Apply one human selection: decay every weight, boost the selected agent,
/// then clamp every weight into `[min_weight, max_weight]`.
pub fn calibrate(
    weights: &PreferenceWeights,
    selected_agent: &str,
    policy: &CalibrationPolicy,
) -> CalibrationOutcome {
    if !policy.enabled {
        return CalibrationOutcome {
            before: weights.clone(),
            after: weights.clone(),
            selected_agent: selected_agent.to_string(),
            clamped: false,
            learning_enabled: false,
        };
    }

    let mut after = weights.clone();
    if !after.0.contains_key(selected_agent) {
        after.set(selected_agent, NEUTRAL_WEIGHT);
    }

    for w in after.0.values_mut() {
        *w = match policy.decay_mode {
            DecayMode::Multiplicative => *w * policy.decay_rate,
            DecayMode::TowardNeutral => NEUTRAL_WEIGHT + (*w - NEUTRAL_WEIGHT) * policy.decay_rate,
        };
    }

    if let Some(w) = after.0.get_mut(selected_agent) {
        *w += policy.learning_rate;
    }

    let mut clamped = false;
    for w in after.0.values_mut() {
        let bounded = w.clamp(policy.min_weight, policy.max_weight);
        if bounded != *w {
            clamped = true;
            *w = bounded;
        }
    }

    CalibrationOutcome {
        before: weights.clone(),
        after,
        selected_agent: selected_agent.to_string(),
        clamped,
        learning_enabled: true,
    }
}

/// Weights plus the policy that governs them
#[derive(Debug, Clone, Default)]
pub struct PreferenceCalibrator {
    policy: CalibrationPolicy,
    weights: PreferenceWeights,
}

impl PreferenceCalibrator {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self {
            policy,
            weights: PreferenceWeights::new(),
        }
    }

    pub fn policy(&self) -> &CalibrationPolicy {
        &self.policy
    }

    /// Current weights (pinned at neutral while learning is disabled)
    pub fn weights(&self) -> &PreferenceWeights {
        &self.weights
    }

    /// Compute the update for a selection without applying it
    pub fn propose(&self, selected_agent: &str) -> CalibrationOutcome {
        calibrate(&self.weights, selected_agent, &self.policy)
    }

    /// Install the weights from a previously proposed outcome
    pub fn apply(&mut self, outcome: CalibrationOutcome) {
        if outcome.learning_enabled {
            self.weights = outcome.after;
        }
    }
}

/// Execution outcome feeding the confidence penalty table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyAdjustment {
    /// Plan failed after execution
    Decay,
    /// Plan completed
    Recovery,
    Reset,
}

const PENALTY_DECAY: f64 = 0.85;
const PENALTY_FLOOR: f64 = 0.30;
const PENALTY_RECOVERY: f64 = 0.05;

/// One row of the penalty table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PenaltyEntry {
    pub kind: IntentKind,
    pub mode: ExecutionMode,
    pub penalty: f64,
}

/// Confidence penalty per (kind, mode), in `[0.30, 1.0]`
#[derive(Debug, Clone, Default)]
pub struct PenaltyTable {
    penalties: HashMap<(IntentKind, ExecutionMode), f64>,
}

impl PenaltyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn penalty(&self, kind: IntentKind, mode: ExecutionMode) -> f64 {
        self.penalties.get(&(kind, mode)).copied().unwrap_or(1.0)
    }

    /// Value the penalty would take after `adjustment`
    pub fn adjusted(&self, kind: IntentKind, mode: ExecutionMode, adjustment: PenaltyAdjustment) -> f64 {
        let current = self.penalty(kind, mode);
        match adjustment {
            PenaltyAdjustment::Decay => (current * PENALTY_DECAY).max(PENALTY_FLOOR),
            PenaltyAdjustment::Recovery => (current + PENALTY_RECOVERY).min(1.0),
            PenaltyAdjustment::Reset => 1.0,
        }
    }

    pub fn set(&mut self, kind: IntentKind, mode: ExecutionMode, penalty: f64) {
        self.penalties.insert((kind, mode), penalty);
    }

    pub fn entries(&self) -> Vec<PenaltyEntry> {
        let mut entries: Vec<PenaltyEntry> = self
            .penalties
            .iter()
            .map(|(&(kind, mode), &penalty)| PenaltyEntry { kind, mode, penalty })
            .collect();
        entries.sort_by_key(|e| (e.kind, e.mode));
        entries
    }
}
