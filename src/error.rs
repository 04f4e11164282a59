use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `agentplane`.
///
/// Reconcilers return this so the runtime can tell an expected condition
/// (already folded into a status write) from one that needs a backoff requeue.
/// The binary edge keeps using `anyhow::Result` for context chains.
#[derive(Debug, Error)]
pub enum Error {
    // ── Store ────────────────────────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Policy ───────────────────────────────────────────────────────────
    #[error("policy: {0}")]
    Policy(#[from] PolicyViolation),

    // ── Workload ─────────────────────────────────────────────────────────
    #[error("workload: {0}")]
    Workload(String),

    // ── Extraction ───────────────────────────────────────────────────────
    #[error("extraction: {0}")]
    Extraction(#[from] ExtractionError),

    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("conflict writing {kind} {namespace}/{name}: object has been modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} {name} is in namespace {namespace}, not {expected}")]
    NamespaceMismatch {
        kind: String,
        name: String,
        namespace: String,
        expected: String,
    },

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

// ─── Policy violations ───────────────────────────────────────────────────────

/// A user-facing denial. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct PolicyViolation {
    pub reason: String,
}

impl PolicyViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ─── Extraction errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("marker {0} opened but never closed")]
    UnterminatedMarker(String),

    #[error("result payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("log tail unavailable: {0}")]
    Logs(String),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_displays_key() {
        let err = Error::Store(StoreError::NotFound {
            kind: "AgentRun".into(),
            namespace: "default".into(),
            name: "demo".into(),
        });
        assert!(err.to_string().contains("AgentRun default/demo not found"));
    }

    #[test]
    fn store_error_predicates() {
        let conflict = StoreError::Conflict {
            kind: "Job".into(),
            namespace: "ns".into(),
            name: "a".into(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert!(!conflict.is_already_exists());
    }

    #[test]
    fn policy_violation_displays_reason() {
        let err = Error::Policy(PolicyViolation::new("spawn depth 4 exceeds max 3"));
        assert_eq!(err.to_string(), "policy: spawn depth 4 exceeds max 3");
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: Error = anyhow_err.into();
        assert!(err.to_string().contains("something went wrong"));
    }
}
