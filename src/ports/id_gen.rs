//! ID generator port for record identifiers and magic-link tokens.

/// Generates unique identifiers for new records and magic-link tokens.
///
/// Tests substitute a predictable sequence so that ids and tokens are
/// reproducible.
pub trait IdGenerator: Send + Sync {
    /// Generates a new identifier for a record of the given kind
    /// (e.g. `"task"`, `"alert"`).
    fn generate_id(&self, kind: &str) -> String;

    /// Generates an unguessable raw token for a magic link.
    fn generate_token(&self) -> String;
}
