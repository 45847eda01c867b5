use serde::{Deserialize, Serialize};

/// A recorded execution trace of an agent's task, as served by the episode store.
///
/// The policy engine never writes episodes; it only reads them to derive trust.
/// Every numeric field is defaulted so partially populated records still parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub agent_id: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub status: EpisodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Success,
    Failure,
    /// Anything the store reports that is neither a success nor a failure
    /// (running, cancelled, ...). Ignored by trust scoring.
    #[default]
    #[serde(other)]
    Other,
}

/// A single step of an episode (usually a model call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Episode {
    /// Cost of the episode, falling back to the sum of its steps when the
    /// store did not fill in the total.
    pub fn effective_cost_usd(&self) -> f64 {
        if self.total_cost_usd > 0.0 {
            self.total_cost_usd
        } else {
            self.steps.iter().map(|s| s.cost_usd).sum()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EpisodeStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == EpisodeStatus::Failure
    }
}
