use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use air_core::AirError;

use crate::risk::RiskTier;

/// Four oversight tiers, ordered from most to least restrictive:
///
/// - **shadow**: The agent proposes, nothing executes. Every action is logged;
///   critical actions are refused outright.
/// - **gated**: Only low-risk actions run unattended; anything else needs approval.
/// - **supervised**: Low and medium risk run freely; high and critical need approval.
/// - **autonomous**: Everything but critical actions runs freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AutonomyTier {
    Shadow = 0,
    Gated = 1,
    Supervised = 2,
    Autonomous = 3,
}

/// What a tier says about an action of a given risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierVerdict {
    Allow,
    Log,
    RequireApproval,
    Deny,
}

impl TierVerdict {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Log => "log",
            Self::RequireApproval => "require_approval",
            Self::Deny => "deny",
        }
    }
}

impl AutonomyTier {
    pub const ALL: [AutonomyTier; 4] = [
        AutonomyTier::Shadow,
        AutonomyTier::Gated,
        AutonomyTier::Supervised,
        AutonomyTier::Autonomous,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Gated => "gated",
            Self::Supervised => "supervised",
            Self::Autonomous => "autonomous",
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Shadow => "Actions are recorded but never executed",
            Self::Gated => "Only low-risk actions run without human approval",
            Self::Supervised => "Acts freely on low and medium risk, escalates the rest",
            Self::Autonomous => "Acts freely, escalates critical actions only",
        }
    }

    /// The static tier × risk matrix.
    pub fn verdict(&self, risk: RiskTier) -> TierVerdict {
        use RiskTier::*;
        use TierVerdict::*;
        match (self, risk) {
            (Self::Shadow, Critical) => Deny,
            (Self::Shadow, _) => Log,
            (Self::Gated, Low) => Allow,
            (Self::Gated, _) => RequireApproval,
            (Self::Supervised, Low | Medium) => Allow,
            (Self::Supervised, _) => RequireApproval,
            (Self::Autonomous, Critical) => RequireApproval,
            (Self::Autonomous, _) => Allow,
        }
    }

    /// Whether the tier itself stops an action of this risk from running unattended.
    pub fn blocks(&self, risk: RiskTier) -> bool {
        matches!(
            self.verdict(risk),
            TierVerdict::RequireApproval | TierVerdict::Deny
        )
    }

    /// One tier less restrictive (saturating).
    pub fn promote(&self) -> Self {
        match self {
            Self::Shadow => Self::Gated,
            Self::Gated => Self::Supervised,
            Self::Supervised | Self::Autonomous => Self::Autonomous,
        }
    }

    /// One tier more restrictive (saturating).
    pub fn demote(&self) -> Self {
        match self {
            Self::Shadow | Self::Gated => Self::Shadow,
            Self::Supervised => Self::Gated,
            Self::Autonomous => Self::Supervised,
        }
    }

    /// The more restrictive of two tiers.
    pub fn strictest(self, other: Self) -> Self {
        self.min(other)
    }

    pub fn descriptor(&self) -> TierDescriptor {
        TierDescriptor {
            name: *self,
            level: self.level(),
            description: self.description().to_string(),
            gates: RiskTier::ALL
                .iter()
                .map(|risk| RiskGate {
                    risk_tier: *risk,
                    verdict: self.verdict(*risk),
                })
                .collect(),
        }
    }
}

impl FromStr for AutonomyTier {
    type Err = AirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == needle)
            .ok_or_else(|| AirError::UnknownTier(s.to_string()))
    }
}

impl fmt::Display for AutonomyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Public description of a tier, as served by `GET /v1/tiers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDescriptor {
    pub name: AutonomyTier,
    pub level: u8,
    pub description: String,
    pub gates: Vec<RiskGate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskGate {
    pub risk_tier: RiskTier,
    pub verdict: TierVerdict,
}

/// All tiers, least to most permissive.
pub fn list_tiers() -> Vec<TierDescriptor> {
    AutonomyTier::ALL.iter().map(|t| t.descriptor()).collect()
}

/// Look up a tier by name.
pub fn tier(name: &str) -> air_core::Result<TierDescriptor> {
    Ok(name.parse::<AutonomyTier>()?.descriptor())
}

pub fn tier_verdict(tier: AutonomyTier, risk: RiskTier) -> TierVerdict {
    tier.verdict(risk)
}

pub fn tier_blocks(tier: AutonomyTier, risk: RiskTier) -> bool {
    tier.blocks(risk)
}
