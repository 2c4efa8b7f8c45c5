//! Orchestrator configuration

use crate::calibrator::CalibrationPolicy;
use crate::composer::ComposerConfig;
use crate::validator::IntentValidator;
use serde::{Deserialize, Serialize};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Start with the execution halt engaged
    #[serde(default = "default_true")]
    pub start_halted: bool,

    /// Compose plans as part of intent submission
    #[serde(default = "default_true")]
    pub auto_compose: bool,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub composer: ComposerConfig,

    /// Preference learning policy
    #[serde(default)]
    pub calibration: CalibrationPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            start_halted: true,
            auto_compose: true,
            validator: ValidatorConfig::default(),
            composer: ComposerConfig::default(),
            calibration: CalibrationPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), String> {
        self.calibration.validate()?;

        if !(0.0..=1.0).contains(&self.composer.min_plan_confidence) {
            return Err(format!(
                "composer.min_plan_confidence {} must be within [0, 1]",
                self.composer.min_plan_confidence
            ));
        }
        if self.composer.agent_timeout_ms == 0 {
            return Err("composer.agent_timeout_ms must be positive".to_string());
        }
        if self.composer.agents.is_empty() {
            return Err("composer.agents must name at least one agent".to_string());
        }

        let mut ids: Vec<&str> = self.composer.agents.iter().map(|a| a.id()).collect();
        ids.sort_unstable();
        if let Some(dup) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(format!("duplicate agent id: {}", dup[0]));
        }

        Ok(())
    }
}

/// Intent validator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_max_target_len")]
    pub max_target_len: usize,

    #[serde(default = "default_max_phases")]
    pub max_phases: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_target_len: default_max_target_len(),
            max_phases: default_max_phases(),
        }
    }
}

impl ValidatorConfig {
    pub fn build(&self) -> IntentValidator {
        IntentValidator::new(self.max_target_len, self.max_phases)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_target_len() -> usize {
    1024
}

fn default_max_phases() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::AgentSpec;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.start_halted);
        assert!(config.auto_compose);
        assert!(!config.calibration.enabled);
        assert_eq!(config.composer.min_plan_confidence, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"start_halted": false, "calibration": {"enabled": true}}"#).unwrap();
        assert!(!config.start_halted);
        assert!(config.calibration.enabled);
        assert_eq!(config.calibration.learning_rate, 0.15);
        assert_eq!(config.validator.max_phases, 64);
    }

    #[test]
    fn test_duplicate_agents_rejected() {
        let mut config = OrchestratorConfig::default();
        config.composer.agents = vec![
            AgentSpec::Direct { id: "a".into() },
            AgentSpec::Fixed {
                id: "a".into(),
                confidence: 0.7,
            },
        ];
        assert!(config.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_bad_floor_rejected() {
        let mut config = OrchestratorConfig::default();
        config.composer.min_plan_confidence = 1.5;
        assert!(config.validate().is_err());
    }
}
