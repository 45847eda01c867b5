use serde::{Deserialize, Serialize};
use std::fmt;

use crate::policy::Policy;

/// Declared risk of a tool, ordered low → critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-tool risk declaration inside a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRisk {
    pub tool_name: String,
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub requires_approval: bool,
}

/// Result of classifying an action against a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub risk_tier: RiskTier,
    pub requires_approval: bool,
    /// False when the policy says nothing about the tool.
    pub declared: bool,
}

impl Classification {
    /// Baseline for tools the policy doesn't mention.
    pub const BASELINE: Classification = Classification {
        risk_tier: RiskTier::Low,
        requires_approval: false,
        declared: false,
    };
}

/// Map an action name to its declared risk. Unknown tools get the baseline.
pub fn classify(policy: &Policy, action: &str) -> Classification {
    policy
        .tool_risks
        .iter()
        .find(|r| r.tool_name == action)
        .map(|r| Classification {
            risk_tier: r.risk_tier,
            requires_approval: r.requires_approval,
            declared: true,
        })
        .unwrap_or(Classification::BASELINE)
}
