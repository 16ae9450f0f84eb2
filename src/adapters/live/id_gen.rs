//! Live adapter for the `IdGenerator` port.

use uuid::Uuid;

use crate::ports::IdGenerator;

/// Live ID generator backed by random UUIDs.
///
/// Record ids carry their kind as a prefix (`alert-3f2a...`) so that ids in
/// logs and snapshots are self-describing.
pub struct LiveIdGenerator;

impl LiveIdGenerator {
    /// Creates a new live ID generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LiveIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for LiveIdGenerator {
    fn generate_id(&self, kind: &str) -> String {
        format!("{kind}-{}", Uuid::new_v4().simple())
    }

    fn generate_token(&self) -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let gen = LiveIdGenerator::new();
        let id1 = gen.generate_id("task");
        let id2 = gen.generate_id("task");

        assert_ne!(id1, id2);
        assert!(id1.starts_with("task-"));
        assert_eq!(id1.len(), "task-".len() + 32);
    }

    #[test]
    fn tokens_are_long_hex() {
        let token = LiveIdGenerator::new().generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
