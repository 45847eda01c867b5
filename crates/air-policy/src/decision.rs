use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use air_core::{ActionName, AgentId, PolicyId};

use crate::risk::RiskTier;
use crate::tier::AutonomyTier;

/// A request to decide whether an agent may perform an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub agent_id: AgentId,
    /// Tool or action name.
    pub action: ActionName,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl EvaluationRequest {
    pub fn new(agent_id: impl Into<AgentId>, action: impl Into<ActionName>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action: action.into(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Policy named in `context.policy_id`. Only used to explain a fallback decision.
    pub fn policy_id(&self) -> Option<&str> {
        self.context.get("policy_id").and_then(Value::as_str)
    }
}

/// Final verdict. Variants are ordered by restrictiveness, least first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    /// Permitted but recorded, or recorded instead of executed under shadow.
    Log,
    /// Waiting on human approval.
    Pending,
    Deny,
    Halt,
}

impl DecisionAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Log => "log",
            Self::Pending => "pending",
            Self::Deny => "deny",
            Self::Halt => "halt",
        }
    }

    /// Whether the caller may go ahead without further interaction.
    pub fn permits(&self) -> bool {
        matches!(self, Self::Allow | Self::Log)
    }

    /// Like [`permits`](Self::permits), but a `log` under the shadow tier
    /// means "record, don't execute".
    pub fn permits_under(&self, tier: AutonomyTier) -> bool {
        match self {
            Self::Log => tier != AutonomyTier::Shadow,
            other => other.permits(),
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which evaluation stage produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    KillSwitch,
    Condition,
    Risk,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDecision {
    pub decision_id: Uuid,
    pub agent_id: AgentId,
    pub action: DecisionAction,
    pub allowed: bool,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Policy that produced the decision. `None` for the restrictive default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<PolicyId>,
    pub stage: DecisionStage,
    /// Tier the verdict was computed under, after trust adjustment.
    pub autonomy_tier: AutonomyTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<f64>,
    pub evaluated_at: DateTime<Utc>,
}
