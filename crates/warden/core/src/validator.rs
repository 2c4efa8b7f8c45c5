//! Intent schema validation.
//!
//! Validation works on raw JSON so that every violated constraint can be
//! reported at once. Nothing is recorded or queued here; the orchestrator
//! only assigns an id once a draft has passed.

use crate::config::ValidatorConfig;
use crate::types::{ExecutionMode, IntentKind, Phase};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

const ALLOWED_FIELDS: [&str; 9] = [
    "kind",
    "target",
    "mode",
    "confidence",
    "context",
    "source",
    "notes",
    "patch_content",
    "phases",
];

const PHASE_FIELDS: [&str; 4] = ["phase_id", "description", "depends_on", "tasks"];

/// Confidence assumed when the caller does not report one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// A single violated constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// JSON path of the offending field
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Rejected intent with every violated constraint
#[derive(Debug, Clone, Error)]
#[error("intent validation failed with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message)],
        }
    }
}

/// Structurally valid intent fields, not yet queued
#[derive(Debug, Clone)]
pub struct IntentDraft {
    pub kind: IntentKind,
    pub target: String,
    pub mode: ExecutionMode,
    pub confidence: f64,
    pub context: Value,
    pub source: String,
    pub notes: Option<String>,
    pub patch_content: Option<String>,
    pub phases: Vec<Phase>,
}

/// Schema checker for inbound intents
#[derive(Debug, Clone)]
pub struct IntentValidator {
    max_target_len: usize,
    max_phases: usize,
}

impl Default for IntentValidator {
    fn default() -> Self {
        ValidatorConfig::default().build()
    }
}

impl IntentValidator {
    pub fn new(max_target_len: usize, max_phases: usize) -> Self {
        Self {
            max_target_len,
            max_phases,
        }
    }

    /// Validate a raw intent body
    pub fn validate(&self, raw: &Value) -> Result<IntentDraft, ValidationError> {
        let Some(obj) = raw.as_object() else {
            return Err(ValidationError::single("$", "intent must be a JSON object"));
        };

        let mut violations = Vec::new();

        for key in obj.keys() {
            if !ALLOWED_FIELDS.contains(&key.as_str()) {
                violations.push(FieldViolation::new(key.as_str(), "unknown field"));
            }
        }

        let kind = match obj.get("kind") {
            None => {
                violations.push(FieldViolation::new("kind", "required field missing"));
                None
            }
            Some(Value::String(s)) => {
                let kind = IntentKind::parse(s);
                if kind.is_none() {
                    violations.push(FieldViolation::new(
                        "kind",
                        format!("'{}' is not one of {}", s, kind_list()),
                    ));
                }
                kind
            }
            Some(_) => {
                violations.push(FieldViolation::new("kind", "must be a string"));
                None
            }
        };

        let target = match obj.get("target") {
            None => {
                violations.push(FieldViolation::new("target", "required field missing"));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                violations.push(FieldViolation::new("target", "must not be empty"));
                None
            }
            Some(Value::String(s)) if s.len() > self.max_target_len => {
                violations.push(FieldViolation::new(
                    "target",
                    format!("must be at most {} bytes", self.max_target_len),
                ));
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                violations.push(FieldViolation::new("target", "must be a string"));
                None
            }
        };

        let mode = match obj.get("mode") {
            None => ExecutionMode::default(),
            Some(Value::String(s)) => ExecutionMode::parse(s).unwrap_or_else(|| {
                violations.push(FieldViolation::new(
                    "mode",
                    format!("'{}' is not one of reason-only, simulate, propose", s),
                ));
                ExecutionMode::default()
            }),
            Some(_) => {
                violations.push(FieldViolation::new("mode", "must be a string"));
                ExecutionMode::default()
            }
        };

        let confidence = match obj.get("confidence") {
            None => DEFAULT_CONFIDENCE,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(c) if (0.0..=1.0).contains(&c) => c,
                _ => {
                    violations.push(FieldViolation::new(
                        "confidence",
                        "must be between 0.0 and 1.0",
                    ));
                    DEFAULT_CONFIDENCE
                }
            },
            Some(_) => {
                violations.push(FieldViolation::new("confidence", "must be a number"));
                DEFAULT_CONFIDENCE
            }
        };

        let context = match obj.get("context") {
            None => Value::Null,
            Some(v @ (Value::String(_) | Value::Object(_))) => v.clone(),
            Some(_) => {
                violations.push(FieldViolation::new(
                    "context",
                    "must be a string or an object",
                ));
                Value::Null
            }
        };

        let source = optional_string(obj, "source", &mut violations)
            .unwrap_or_else(|| "unknown".to_string());
        let notes = optional_string(obj, "notes", &mut violations);
        let patch_content = optional_string(obj, "patch_content", &mut violations);

        if kind == Some(IntentKind::ApplyPatch) && patch_content.is_none() {
            violations.push(FieldViolation::new(
                "patch_content",
                "required for apply_patch intents",
            ));
        }

        let phases = match obj.get("phases") {
            None => Vec::new(),
            Some(Value::Array(items)) => self.validate_phases(items, &mut violations),
            Some(_) => {
                violations.push(FieldViolation::new("phases", "must be an array"));
                Vec::new()
            }
        };

        match (kind, target) {
            (Some(kind), Some(target)) if violations.is_empty() => Ok(IntentDraft {
                kind,
                target,
                mode,
                confidence,
                context,
                source,
                notes,
                patch_content,
                phases,
            }),
            _ => Err(ValidationError { violations }),
        }
    }

    fn validate_phases(&self, items: &[Value], violations: &mut Vec<FieldViolation>) -> Vec<Phase> {
        if items.len() > self.max_phases {
            violations.push(FieldViolation::new(
                "phases",
                format!("at most {} phases are allowed", self.max_phases),
            ));
            return Vec::new();
        }

        let mut phases = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("phases[{}]", i);
            let Some(obj) = item.as_object() else {
                violations.push(FieldViolation::new(path, "must be an object"));
                continue;
            };

            let before = violations.len();
            for key in obj.keys() {
                if !PHASE_FIELDS.contains(&key.as_str()) {
                    violations.push(FieldViolation::new(format!("{}.{}", path, key), "unknown field"));
                }
            }

            let phase_id = required_string(obj, &path, "phase_id", violations);
            let description = required_string(obj, &path, "description", violations);
            let depends_on = string_array(obj, &path, "depends_on", violations);
            let tasks = string_array(obj, &path, "tasks", violations);

            if violations.len() == before {
                if let (Some(phase_id), Some(description)) = (phase_id, description) {
                    phases.push(Phase {
                        phase_id,
                        description,
                        depends_on,
                        tasks,
                    });
                }
            }
        }

        if phases.len() == items.len() {
            let before = violations.len();
            let mut seen = HashSet::new();
            for (i, phase) in phases.iter().enumerate() {
                if !seen.insert(phase.phase_id.as_str()) {
                    violations.push(FieldViolation::new(
                        format!("phases[{}].phase_id", i),
                        format!("duplicate phase id '{}'", phase.phase_id),
                    ));
                }
            }
            for (i, phase) in phases.iter().enumerate() {
                for dep in &phase.depends_on {
                    if !seen.contains(dep.as_str()) {
                        violations.push(FieldViolation::new(
                            format!("phases[{}].depends_on", i),
                            format!("unknown phase '{}'", dep),
                        ));
                    }
                }
            }
            if violations.len() == before && phase_order(&phases).is_none() {
                violations.push(FieldViolation::new("phases", "phase dependencies form a cycle"));
            }
        }

        phases
    }
}

/// Topological order of phases (indices), stable with respect to input
/// order. Returns `None` when the dependencies contain a cycle.
pub fn phase_order(phases: &[Phase]) -> Option<Vec<usize>> {
    let index: HashMap<&str, usize> = phases
        .iter()
        .enumerate()
        .map(|(i, p)| (p.phase_id.as_str(), i))
        .collect();

    let mut remaining: Vec<usize> = phases
        .iter()
        .map(|p| {
            p.depends_on
                .iter()
                .filter(|d| index.contains_key(d.as_str()))
                .count()
        })
        .collect();

    let mut order = Vec::with_capacity(phases.len());
    let mut placed = vec![false; phases.len()];

    while order.len() < phases.len() {
        let next = (0..phases.len()).find(|&i| !placed[i] && remaining[i] == 0)?;
        placed[next] = true;
        order.push(next);

        let id = phases[next].phase_id.as_str();
        for (i, phase) in phases.iter().enumerate() {
            if !placed[i] {
                remaining[i] -= phase.depends_on.iter().filter(|d| d.as_str() == id).count();
            }
        }
    }

    Some(order)
}

fn kind_list() -> String {
    IntentKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn optional_string(
    obj: &Map<String, Value>,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            violations.push(FieldViolation::new(field, "must be a string"));
            None
        }
    }
}

fn required_string(
    obj: &Map<String, Value>,
    path: &str,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            violations.push(FieldViolation::new(format!("{}.{}", path, field), "must not be empty"));
            None
        }
        Some(_) => {
            violations.push(FieldViolation::new(format!("{}.{}", path, field), "must be a string"));
            None
        }
        None => {
            violations.push(FieldViolation::new(
                format!("{}.{}", path, field),
                "required field missing",
            ));
            None
        }
    }
}

fn string_array(
    obj: &Map<String, Value>,
    path: &str,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Vec<String> {
    match obj.get(field) {
        None => Vec::new(),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(_) => {
            violations.push(FieldViolation::new(
                format!("{}.{}", path, field),
                "must be an array of strings",
            ));
            Vec::new()
        }
    }
}
