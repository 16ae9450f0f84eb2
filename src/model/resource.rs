//! People who own tasks and receive alerts.

use serde::{Deserialize, Serialize};

use super::ids::ResourceId;

/// Whether a resource can currently receive work and alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    /// Available.
    #[default]
    Active,
    /// On leave.
    OnLeave,
    /// Not reachable.
    Unavailable,
    /// Reduced capacity but reachable.
    Partial,
}

impl Availability {
    /// Whether alerts may be routed to a resource in this state.
    #[must_use]
    pub fn can_receive_alerts(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A person in the organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Internal id.
    pub id: ResourceId,
    /// Key used by the import source.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Notification address.
    pub email: Option<String>,
    /// IANA timezone name.
    pub timezone: String,
    /// Country used for holiday lookups.
    pub country_code: Option<String>,
    /// Maximum utilisation percentage.
    pub max_utilization: u8,
    /// Current availability. Never overwritten by imports.
    pub availability: Availability,
    /// Line manager.
    pub manager_id: Option<ResourceId>,
    /// Designated backup.
    pub backup_resource_id: Option<ResourceId>,
}
