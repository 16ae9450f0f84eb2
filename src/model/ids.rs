//! Strongly typed identifiers for stored entities.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier string.
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Returns the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

entity_id!(
    /// Internal program identifier.
    ProgramId
);
entity_id!(
    /// Internal project identifier.
    ProjectId
);
entity_id!(
    /// Internal phase identifier.
    PhaseId
);
entity_id!(
    /// Internal task identifier.
    TaskId
);
entity_id!(
    /// Internal dependency identifier.
    DependencyId
);
entity_id!(
    /// Internal resource identifier.
    ResourceId
);
entity_id!(
    /// Alert identifier.
    AlertId
);
entity_id!(
    /// Status response identifier.
    ResponseId
);
