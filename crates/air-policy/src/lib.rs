//! # air-policy
//!
//! The policy decision engine. Holds oversight policies, tracks their kill
//! switches, scores agent trust from episode history, and turns an
//! `(agent, action, context)` request into an allow / deny / halt / log /
//! pending decision.

pub mod condition;
pub mod decision;
pub mod engine;
pub mod killswitch;
pub mod ledger;
pub mod policy;
pub mod risk;
pub mod store;
pub mod tier;
pub mod trust;

pub use condition::{Attributes, Condition, ConditionAction, Operator};
pub use decision::{DecisionAction, DecisionStage, EvaluationDecision, EvaluationRequest};
pub use engine::PolicyEngine;
pub use killswitch::{
    IngestSummary, KillSwitch, KillSwitchTracker, LimitType, MetricsReport, SwitchAction,
    SwitchSettings, SwitchStatus, SwitchTrip,
};
pub use ledger::{
    CachedLedger, EpisodeLedger, HttpEpisodeLedger, LedgerAggregate, NullLedger, StaticLedger,
};
pub use policy::Policy;
pub use risk::{Classification, RiskTier, ToolRisk};
pub use store::{InMemoryPolicyStore, PolicyRecord, PolicyStore};
pub use tier::{AutonomyTier, TierDescriptor, TierVerdict, list_tiers, tier, tier_blocks, tier_verdict};
pub use trust::{TrustLevel, TrustScore, TrustScorer, TrustSource};
