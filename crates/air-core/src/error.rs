use thiserror::Error;

/// Unified error type for the AIR policy engine.
#[derive(Error, Debug)]
pub enum AirError {
    // ── Lookup errors ──────────────────────────────────────────
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // ── Input errors ───────────────────────────────────────────
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Misconfiguration ───────────────────────────────────────
    #[error("unknown autonomy tier: {0}")]
    UnknownTier(String),

    #[error("unknown condition operator: {0}")]
    UnknownOperator(String),

    #[error("config error: {0}")]
    Config(String),

    // ── Collaborators ──────────────────────────────────────────
    #[error("upstream unavailable: {service}: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AirError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Errors that point at a broken deployment rather than a bad request.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::UnknownTier(_) | Self::UnknownOperator(_) | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AirError>;
