use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use air_config::{AirConfig, TrustConfig};
use air_core::AgentId;

use crate::ledger::{EpisodeLedger, LedgerAggregate};
use crate::risk::RiskTier;
use crate::tier::AutonomyTier;

/// Score given to agents with no usable history.
pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Neutral,
    High,
}

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSource {
    /// Derived from the agent's episode history.
    Ledger,
    /// History was unavailable; the neutral score was used.
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustScore {
    pub agent_id: AgentId,
    pub score: f64,
    pub level: TrustLevel,
    pub source: TrustSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<LedgerAggregate>,
}

impl TrustScore {
    pub fn neutral(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            score: NEUTRAL_SCORE,
            level: TrustLevel::Neutral,
            source: TrustSource::Neutral,
            history: None,
        }
    }
}

/// Smoothed success ratio, pulled toward neutral until enough episodes exist,
/// minus a penalty for agents whose average episode cost exceeds the ceiling.
/// Every recorded episode counts toward the volume; only successes raise the ratio.
pub fn compute_score(history: &LedgerAggregate, config: &TrustConfig) -> f64 {
    if history.episodes == 0 {
        return NEUTRAL_SCORE;
    }
    let n = history.episodes as f64;
    let ratio = (history.successes as f64 + 1.0) / (n + 2.0);
    let confidence = n / (n + config.confidence_episodes as f64);
    let mut score = NEUTRAL_SCORE + (ratio - NEUTRAL_SCORE) * confidence;
    if history.avg_cost_usd() > config.cost_ceiling_usd {
        score -= config.cost_penalty;
    }
    score.clamp(0.0, 1.0)
}

pub fn level_for(score: f64, config: &TrustConfig) -> TrustLevel {
    if score >= config.high_threshold {
        TrustLevel::High
    } else if score < config.low_threshold {
        TrustLevel::Low
    } else {
        TrustLevel::Neutral
    }
}

/// Shift a tier by trust. High trust earns one step more autonomy, except
/// for critical actions; low trust costs one step.
pub fn adjust_tier(base: AutonomyTier, level: TrustLevel, risk: RiskTier) -> AutonomyTier {
    match level {
        TrustLevel::High if risk != RiskTier::Critical => base.promote(),
        TrustLevel::Low => base.demote(),
        _ => base,
    }
}

/// Scores agents from their episode history.
#[derive(Clone)]
pub struct TrustScorer {
    ledger: Arc<dyn EpisodeLedger>,
    config: Arc<RwLock<AirConfig>>,
}

impl TrustScorer {
    pub fn new(ledger: Arc<dyn EpisodeLedger>, config: Arc<RwLock<AirConfig>>) -> Self {
        Self { ledger, config }
    }

    pub fn ledger(&self) -> &Arc<dyn EpisodeLedger> {
        &self.ledger
    }

    /// Never fails: an unreachable ledger yields the neutral score.
    pub async fn score(&self, agent_id: &str) -> TrustScore {
        let history = match self.ledger.aggregate(agent_id).await {
            Ok(history) => history,
            Err(e) => {
                warn!(
                    agent = agent_id,
                    ledger = self.ledger.name(),
                    error = %e,
                    "episode history unavailable, using neutral trust"
                );
                return TrustScore::neutral(agent_id);
            }
        };

        let trust = self.config.read().trust.clone();
        let score = compute_score(&history, &trust);
        let level = level_for(score, &trust);
        debug!(agent = agent_id, score, level = ?level, episodes = history.episodes, "trust scored");
        TrustScore {
            agent_id: agent_id.to_string(),
            score,
            level,
            source: TrustSource::Ledger,
            history: Some(history),
        }
    }
}
