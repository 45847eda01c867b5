use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use air_core::{AirError, PolicyId, Result};

use crate::condition::Condition;
use crate::killswitch::{KillSwitch, LimitType};
use crate::risk::ToolRisk;
use crate::tier::AutonomyTier;

/// An oversight policy. Immutable once stored; changed only by full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub autonomy_tier: AutonomyTier,
    #[serde(default)]
    pub tool_risks: Vec<ToolRisk>,
    #[serde(default)]
    pub kill_switches: Vec<KillSwitch>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Agents this policy is scoped to. Empty means every agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
}

impl Policy {
    pub fn applies_to(&self, agent_id: &str) -> bool {
        self.agents.is_empty() || self.agents.iter().any(|a| a == agent_id)
    }

    pub fn has_enabled_switches(&self) -> bool {
        self.kill_switches.iter().any(|k| k.enabled)
    }

    /// Structural checks that serde can't express.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AirError::validation("id", "must not be empty"));
        }
        if self.id.contains('/') || self.id.chars().any(char::is_whitespace) {
            return Err(AirError::validation(
                "id",
                format!("'{}' must not contain '/' or whitespace", self.id),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(AirError::validation("name", "must not be empty"));
        }

        let mut seen = HashSet::new();
        for (i, risk) in self.tool_risks.iter().enumerate() {
            if risk.tool_name.is_empty() {
                return Err(AirError::validation(
                    format!("tool_risks[{i}].tool_name"),
                    "must not be empty",
                ));
            }
            if !seen.insert(risk.tool_name.as_str()) {
                return Err(AirError::validation(
                    format!("tool_risks[{i}]"),
                    format!("duplicate entry for tool '{}'", risk.tool_name),
                ));
            }
        }

        for (i, ks) in self.kill_switches.iter().enumerate() {
            if ks.switch_type.trim().is_empty() {
                return Err(AirError::validation(
                    format!("kill_switches[{i}].switch_type"),
                    "must not be empty",
                ));
            }
            if !ks.threshold.is_finite() || ks.threshold < 0.0 {
                return Err(AirError::validation(
                    format!("kill_switches[{i}].threshold"),
                    format!("{} must be a finite number >= 0", ks.threshold),
                ));
            }
            if ks.window_secs == Some(0) {
                return Err(AirError::validation(
                    format!("kill_switches[{i}].window_secs"),
                    "must be greater than 0",
                ));
            }
            if ks.window_secs.is_some() && ks.limit_type != LimitType::Rate {
                return Err(AirError::validation(
                    format!("kill_switches[{i}].window_secs"),
                    "only applies to rate switches",
                ));
            }
        }

        for (i, c) in self.conditions.iter().enumerate() {
            if c.field.trim().is_empty() {
                return Err(AirError::validation(
                    format!("conditions[{i}].field"),
                    "must not be empty",
                ));
            }
            if c.operator.wants_list() && !c.value.is_array() {
                return Err(AirError::validation(
                    format!("conditions[{i}].value"),
                    format!("operator '{}' needs an array value", c.operator),
                ));
            }
        }

        Ok(())
    }
}

/// Read a JSON array of policies from disk and validate each one.
pub fn load_seed_file(path: &Path) -> Result<Vec<Policy>> {
    let raw = std::fs::read_to_string(path)?;
    let policies: Vec<Policy> = serde_json::from_str(&raw)?;
    for p in &policies {
        p.validate()?;
    }
    info!(path = %path.display(), count = policies.len(), "loaded seed policies");
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "id": "integration-test-policy",
            "name": "Integration Test Policy",
            "description": "Policy for integration testing",
            "autonomy_tier": "gated",
            "tool_risks": [
                {"tool_name": "dangerous_tool", "risk_tier": "critical", "requires_approval": true}
            ],
            "kill_switches": [
                {"switch_type": "spend_usd", "limit_type": "absolute", "threshold": 10.0, "action": "halt", "enabled": true}
            ],
            "conditions": [
                {"field": "tool_name", "operator": "eq", "value": "blocked_tool", "action": "deny", "reason": "Tool is blocked by policy"}
            ]
        })
    }

    #[test]
    fn test_round_trip_is_field_for_field() {
        let doc = sample();
        let policy: Policy = serde_json::from_value(doc.clone()).unwrap();
        policy.validate().unwrap();
        assert_eq!(serde_json::to_value(&policy).unwrap(), doc);
    }

    #[test]
    fn test_applies_to() {
        let mut policy: Policy = serde_json::from_value(sample()).unwrap();
        assert!(policy.applies_to("anyone"));
        policy.agents = vec!["a1".into()];
        assert!(policy.applies_to("a1"));
        assert!(!policy.applies_to("a2"));
    }

    #[test]
    fn test_unknown_tier_is_rejected() {
        let mut doc = sample();
        doc["autonomy_tier"] = json!("reckless");
        assert!(serde_json::from_value::<Policy>(doc).is_err());
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let mut doc = sample();
        doc["conditions"][0]["operator"] = json!("like");
        assert!(serde_json::from_value::<Policy>(doc).is_err());
    }

    #[test]
    fn test_duplicate_tool_risk_rejected() {
        let mut policy: Policy = serde_json::from_value(sample()).unwrap();
        policy.tool_risks.push(policy.tool_risks[0].clone());
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate entry for tool 'dangerous_tool'"));
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut policy: Policy = serde_json::from_value(sample()).unwrap();
        policy.kill_switches[0].threshold = -1.0;
        assert!(matches!(policy.validate(), Err(AirError::Validation { .. })));
        policy.kill_switches[0].threshold = f64::NAN;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_in_operator_needs_array() {
        let mut doc = sample();
        doc["conditions"][0]["operator"] = json!("in");
        let policy: Policy = serde_json::from_value(doc).unwrap();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_bad_ids_rejected() {
        let mut policy: Policy = serde_json::from_value(sample()).unwrap();
        policy.id = "".into();
        assert!(policy.validate().is_err());
        policy.id = "a/b".into();
        assert!(policy.validate().is_err());
        policy.id = "a b".into();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_load_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, serde_json::to_string(&json!([sample()])).unwrap()).unwrap();
        let policies = load_seed_file(&path).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].id, "integration-test-policy");
    }
}
