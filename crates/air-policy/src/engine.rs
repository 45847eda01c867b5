use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use air_config::AirConfig;
use air_core::{AirError, Result};

use crate::condition::{Attributes, ConditionAction, resolve};
use crate::decision::{DecisionAction, DecisionStage, EvaluationDecision, EvaluationRequest};
use crate::killswitch::{KillSwitchTracker, SwitchAction, SwitchSettings, TripCheck};
use crate::ledger::ledger_from_config;
use crate::policy::{Policy, load_seed_file};
use crate::risk::{RiskTier, classify};
use crate::store::{InMemoryPolicyStore, PolicyRecord, PolicyStore};
use crate::tier::{AutonomyTier, TierVerdict};
use crate::trust::{TrustScore, TrustScorer, adjust_tier};

/// One policy's verdict on a request.
#[derive(Debug, Clone)]
struct Outcome {
    policy_id: String,
    action: DecisionAction,
    requires_approval: bool,
    reason: Option<String>,
    stage: DecisionStage,
    tier: AutonomyTier,
    risk: RiskTier,
}

/// Result of the stages that run before trust is known.
enum Screen {
    Decided(Outcome),
    /// Go on to risk gating, carrying any `log` annotation.
    Gate { note: Option<String> },
}

/// Decides whether an agent may act, based on the stored policies, their
/// kill switches, and the agent's track record.
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    tracker: KillSwitchTracker,
    trust: TrustScorer,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>, trust: TrustScorer, settings: SwitchSettings) -> Self {
        let tracker = KillSwitchTracker::new(Arc::clone(&store), settings);
        Self {
            store,
            tracker,
            trust,
        }
    }

    /// In-memory engine wired from configuration. Seed policies are loaded
    /// if `engine.seed_file` points at an existing file.
    pub fn from_config(config: Arc<RwLock<AirConfig>>) -> Result<Self> {
        let snapshot = config.read().clone();
        let ledger = ledger_from_config(&snapshot.ledger)?;
        let engine = Self::new(
            Arc::new(InMemoryPolicyStore::new()),
            TrustScorer::new(ledger, config),
            SwitchSettings::from(&snapshot.kill_switch),
        );

        if let Some(path) = &snapshot.engine.seed_file {
            if path.exists() {
                let count = engine.seed(load_seed_file(path)?)?;
                info!(count, path = %path.display(), "seeded policies");
            } else {
                warn!(path = %path.display(), "seed file not found, starting empty");
            }
        }
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn tracker(&self) -> &KillSwitchTracker {
        &self.tracker
    }

    pub fn trust(&self) -> &TrustScorer {
        &self.trust
    }

    // ── Policy management ──────────────────────────────────────

    /// Validate and store a policy, replacing any policy with the same id.
    /// Returns the stored record and whether it replaced an existing one.
    pub fn put_policy(&self, policy: Policy) -> Result<(Arc<PolicyRecord>, bool)> {
        policy.validate()?;
        let (record, replaced) = self.store.put(policy);
        info!(
            policy_id = %record.policy.id,
            tier = %record.policy.autonomy_tier,
            replaced,
            "policy stored"
        );
        Ok((record, replaced))
    }

    /// Replace the policy at `id`. The body must carry the same id.
    pub fn replace_policy(&self, id: &str, policy: Policy) -> Result<Arc<PolicyRecord>> {
        if policy.id != id {
            return Err(AirError::validation(
                "id",
                format!("body id '{}' does not match path id '{id}'", policy.id),
            ));
        }
        Ok(self.put_policy(policy)?.0)
    }

    pub fn get_policy(&self, id: &str) -> Result<Policy> {
        self.store
            .get(id)
            .map(|r| r.policy.clone())
            .ok_or_else(|| AirError::not_found("policy", id))
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.store.list().iter().map(|r| r.policy.clone()).collect()
    }

    pub fn delete_policy(&self, id: &str) -> Result<()> {
        match self.store.delete(id) {
            Some(_) => {
                info!(policy_id = id, "policy deleted");
                Ok(())
            }
            None => Err(AirError::not_found("policy", id)),
        }
    }

    /// Store a batch of policies, all of which must validate first.
    pub fn seed(&self, policies: Vec<Policy>) -> Result<usize> {
        for p in &policies {
            p.validate()?;
        }
        let count = policies.len();
        for p in policies {
            self.store.put(p);
        }
        Ok(count)
    }

    pub async fn trust_profile(&self, agent_id: &str) -> TrustScore {
        self.trust.score(agent_id).await
    }

    // ── Evaluation ─────────────────────────────────────────────

    /// Decide a request. Never fails: anything that goes wrong along the way
    /// resolves to a more restrictive decision.
    pub async fn evaluate(&self, req: &EvaluationRequest) -> EvaluationDecision {
        let requested = self.requested_tier(req);
        let records = self.select(req);

        if records.is_empty() {
            return self.restrictive_default(req);
        }

        let attrs = Attributes::new(&req.agent_id, &req.action, &req.context);
        let screens: Vec<Screen> = records
            .iter()
            .map(|r| self.screen(r, &attrs, requested))
            .collect();

        // Trust is only worth a ledger round trip if some policy gets to risk gating.
        let needs_trust = screens.iter().any(|s| matches!(s, Screen::Gate { .. }));
        let trust = if needs_trust {
            Some(self.trust.score(&req.agent_id).await)
        } else {
            None
        };

        let outcomes = records.iter().zip(screens).map(|(record, screen)| match screen {
            Screen::Decided(outcome) => outcome,
            Screen::Gate { note } => {
                let neutral;
                let score = match &trust {
                    Some(t) => t,
                    None => {
                        neutral = TrustScore::neutral(&req.agent_id);
                        &neutral
                    }
                };
                gate(&record.policy, req, requested, score, note)
            }
        });

        // Most restrictive wins; on a tie the earlier policy id is kept.
        let Some(winner) = outcomes.reduce(|best, next| {
            if next.action > best.action { next } else { best }
        }) else {
            return self.restrictive_default(req);
        };

        info!(
            agent_id = %req.agent_id,
            action = %req.action,
            policy_id = %winner.policy_id,
            decision = %winner.action,
            stage = ?winner.stage,
            "request evaluated"
        );

        EvaluationDecision {
            decision_id: Uuid::new_v4(),
            agent_id: req.agent_id.clone(),
            action: winner.action,
            allowed: winner.action.permits_under(winner.tier),
            requires_approval: winner.requires_approval,
            reason: winner.reason,
            policy_id: Some(winner.policy_id),
            stage: winner.stage,
            autonomy_tier: winner.tier,
            risk_tier: Some(winner.risk),
            trust_score: trust.map(|t| t.score),
            evaluated_at: Utc::now(),
        }
    }

    /// Every policy that applies to the agent. A `context.policy_id` cannot
    /// narrow this set; one that names a policy outside it is ignored.
    fn select(&self, req: &EvaluationRequest) -> Vec<Arc<PolicyRecord>> {
        let records = self.store.applicable(&req.agent_id);
        if let Some(id) = req.policy_id() {
            if !records.iter().any(|r| r.policy.id == id) {
                warn!(
                    agent_id = %req.agent_id,
                    policy_id = id,
                    "requested policy does not apply to agent, ignored"
                );
            }
        }
        records
    }

    /// Tier asked for in `context.autonomy_tier`. Anything unusable is
    /// treated as the most restrictive tier.
    fn requested_tier(&self, req: &EvaluationRequest) -> Option<AutonomyTier> {
        let raw = req.context.get("autonomy_tier")?;
        let parsed = match raw.as_str() {
            Some(name) => name.parse::<AutonomyTier>(),
            None => Err(AirError::UnknownTier(raw.to_string())),
        };
        match parsed {
            Ok(tier) => Some(tier),
            Err(e) => {
                warn!(agent_id = %req.agent_id, error = %e, "unusable requested tier, treating as shadow");
                Some(AutonomyTier::Shadow)
            }
        }
    }

    /// Kill switches, then conditions.
    fn screen(
        &self,
        record: &PolicyRecord,
        attrs: &Attributes,
        requested: Option<AutonomyTier>,
    ) -> Screen {
        let policy = &record.policy;
        let decided = |action: DecisionAction, stage: DecisionStage, reason: String| {
            Screen::Decided(Outcome {
                policy_id: policy.id.clone(),
                action,
                requires_approval: false,
                reason: Some(reason),
                stage,
                tier: base_tier(policy, requested),
                risk: classify(policy, attrs_action(attrs)).risk_tier,
            })
        };
        let mut note = None;

        if policy.has_enabled_switches() {
            match record
                .switches
                .check(&policy.kill_switches, self.tracker.settings().lock_timeout)
            {
                TripCheck::Clear => {}
                TripCheck::Unavailable => {
                    error!(policy_id = %policy.id, "kill switch state unavailable, failing closed");
                    return decided(
                        DecisionAction::Halt,
                        DecisionStage::KillSwitch,
                        "kill switch state unavailable".into(),
                    );
                }
                TripCheck::Tripped { action: SwitchAction::Halt, reason } => {
                    return decided(DecisionAction::Halt, DecisionStage::KillSwitch, reason);
                }
                TripCheck::Tripped { action: SwitchAction::Deny, reason } => {
                    return decided(DecisionAction::Deny, DecisionStage::KillSwitch, reason);
                }
                TripCheck::Tripped { action: SwitchAction::Log, reason } => {
                    debug!(policy_id = %policy.id, "logging kill switch tripped, continuing");
                    note = Some(reason);
                }
            }
        }

        if let Some(c) = resolve(&policy.conditions, attrs) {
            let reason = if c.reason.is_empty() {
                format!("condition on '{}' matched", c.field)
            } else {
                c.reason.clone()
            };
            match c.action {
                ConditionAction::Deny => {
                    return decided(DecisionAction::Deny, DecisionStage::Condition, reason);
                }
                ConditionAction::Allow => {
                    return match note {
                        Some(note) => decided(DecisionAction::Log, DecisionStage::Condition, note),
                        None => decided(DecisionAction::Allow, DecisionStage::Condition, reason),
                    };
                }
                ConditionAction::Log => note = Some(reason),
            }
        }

        Screen::Gate { note }
    }

    /// Used when no policy applies: shadow tier, recorded but not executed.
    fn restrictive_default(&self, req: &EvaluationRequest) -> EvaluationDecision {
        let reason = match req.policy_id() {
            Some(id) => format!(
                "no policy applies to agent '{}' (requested '{id}'); applying restrictive default",
                req.agent_id
            ),
            None => format!(
                "no policy applies to agent '{}'; applying restrictive default",
                req.agent_id
            ),
        };
        let action = DecisionAction::Log;
        let tier = AutonomyTier::Shadow;
        info!(agent_id = %req.agent_id, action = %req.action, "no applicable policy");

        EvaluationDecision {
            decision_id: Uuid::new_v4(),
            agent_id: req.agent_id.clone(),
            action,
            allowed: action.permits_under(tier),
            requires_approval: false,
            reason: Some(reason),
            policy_id: None,
            stage: DecisionStage::Default,
            autonomy_tier: tier,
            risk_tier: None,
            trust_score: None,
            evaluated_at: Utc::now(),
        }
    }
}

fn attrs_action(attrs: &Attributes) -> &str {
    attrs
        .get("action")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

fn base_tier(policy: &Policy, requested: Option<AutonomyTier>) -> AutonomyTier {
    requested.map_or(policy.autonomy_tier, |t| policy.autonomy_tier.strictest(t))
}

/// Risk and tier gating for one policy.
fn gate(
    policy: &Policy,
    req: &EvaluationRequest,
    requested: Option<AutonomyTier>,
    trust: &TrustScore,
    note: Option<String>,
) -> Outcome {
    let class = classify(policy, &req.action);
    let risk = class.risk_tier;
    let base = base_tier(policy, requested);

    // Trust can move the tier, but never past a refusal of the base tier.
    let (tier, verdict) = match base.verdict(risk) {
        TierVerdict::Deny => (base, TierVerdict::Deny),
        _ => {
            let effective = adjust_tier(base, trust.level, risk);
            (effective, effective.verdict(risk))
        }
    };
    if tier != base {
        debug!(
            policy_id = %policy.id,
            base = %base,
            effective = %tier,
            trust = trust.score,
            "tier adjusted by trust"
        );
    }

    let (action, requires_approval, reason) = match verdict {
        TierVerdict::Allow if class.requires_approval => (
            DecisionAction::Pending,
            true,
            Some(format!("tool '{}' requires approval", req.action)),
        ),
        TierVerdict::Allow => (DecisionAction::Allow, false, None),
        TierVerdict::Log => (
            DecisionAction::Log,
            false,
            Some(format!("{tier} tier records '{}' without executing it", req.action)),
        ),
        TierVerdict::RequireApproval => (
            DecisionAction::Pending,
            true,
            Some(format!("{risk} risk action requires approval under {tier} tier")),
        ),
        TierVerdict::Deny => (
            DecisionAction::Deny,
            false,
            Some(format!("{risk} risk action is not permitted under {tier} tier")),
        ),
    };

    let (action, reason) = match (action, note) {
        (DecisionAction::Allow, Some(note)) => (DecisionAction::Log, Some(note)),
        (action, _) => (action, reason),
    };

    Outcome {
        policy_id: policy.id.clone(),
        action,
        requires_approval,
        reason,
        stage: DecisionStage::Risk,
        tier,
        risk,
    }
}
