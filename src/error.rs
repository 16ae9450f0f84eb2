//! Error types for the tracking engine.

/// The result type used throughout tracky.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reconciliation, scheduling and escalation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record failed validation and cannot be applied.
    #[error("validation failed for {record}: {message}")]
    Validation {
        /// External id (or other label) of the offending record.
        record: String,
        /// What was wrong with it.
        message: String,
    },

    /// An import produced more record errors than the configured threshold.
    #[error("import aborted: {count} record errors exceed threshold of {threshold}")]
    ImportAborted {
        /// Number of record-level errors.
        count: usize,
        /// The configured threshold.
        threshold: usize,
        /// The individual error messages.
        errors: Vec<String>,
    },

    /// A cycle was detected in the dependency graph.
    #[error("cycle detected in dependency graph: {}", cycle.join(" -> "))]
    CycleDetected {
        /// The literal cycle, first node repeated at the end.
        cycle: Vec<String>,
    },

    /// A traversal walked further than the structural depth cap.
    #[error("dependency chain exceeds depth cap of {cap}: {}", chain.join(" -> "))]
    DepthExceeded {
        /// The cap that was hit.
        cap: usize,
        /// The chain walked up to the cap.
        chain: Vec<String>,
    },

    /// A manager or backup link would make the resource hierarchy cyclic.
    #[error("resource hierarchy violation on {resource}: {message}")]
    ResourceHierarchy {
        /// Resource whose link was rejected.
        resource: String,
        /// Description of the violation.
        message: String,
    },

    /// An entity was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind (task, alert, program, ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// No token matches the presented magic link.
    #[error("response token not found")]
    TokenNotFound,

    /// The token's deadline has passed.
    #[error("response token expired")]
    TokenExpired,

    /// The token was already consumed or revoked.
    #[error("ALREADY_USED: response token has already been used")]
    TokenAlreadyUsed,

    /// An approval decision was requested for a response that cannot take one.
    #[error("approval not possible for response {response}: {reason}")]
    Approval {
        /// The response id.
        response: String,
        /// Why the decision was refused.
        reason: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a validation error for the given record.
    #[must_use]
    pub fn validation(record: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { record: record.into(), message: message.into() }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(), source: None }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Storage { message: message.into(), source: Some(source.into()) }
    }
}
