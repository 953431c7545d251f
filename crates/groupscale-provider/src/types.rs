//! Domain types for provider access.
//!
//! These mirror what the cloud reports about instance groups and their
//! members. Nothing here is cached beyond a single discovery cycle; every
//! value is re-read from the provider when needed. All types are
//! serializable so fixtures can be loaded from JSON.

use serde::{Deserialize, Serialize};

/// Provider-assigned identifier of an instance group (e.g. `grp-sda44`).
pub type GroupId = String;

/// Provider-assigned identifier of an instance (e.g. `srv-lv426`).
pub type InstanceId = String;

// ── Groups ─────────────────────────────────────────────────────────

/// A provider-side named collection of instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderGroup {
    pub id: GroupId,
    pub name: String,
    /// Free-text descriptor; scalable groups encode `"<min>:<max>"` here.
    #[serde(default)]
    pub description: String,
    /// Member summaries in provider order.
    #[serde(default)]
    pub members: Vec<InstanceSummary>,
}

impl ProviderGroup {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn has_member(&self, instance_id: &str) -> bool {
        self.members.iter().any(|m| m.id == instance_id)
    }
}

/// The slice of an instance that the provider embeds in a group listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSummary {
    pub id: InstanceId,
    /// Raw provider status string: "active", "creating", "deleting", ...
    pub status: String,
}

// ── Instances ──────────────────────────────────────────────────────

/// Provenance of an image as reported by the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Available,
    Deprecated,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::Available => write!(f, "available"),
            ImageStatus::Deprecated => write!(f, "deprecated"),
            ImageStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Image reference carried by an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    pub id: String,
    #[serde(default)]
    pub status: ImageStatus,
}

/// Full instance record returned by `get_instance`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub status: String,
    pub instance_type: String,
    pub image: ImageRef,
    /// Placement zone; empty when the provider did not report one.
    #[serde(default)]
    pub zone_id: String,
    /// Every group this instance currently belongs to.
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    /// Unix timestamp (seconds) of deletion, if the instance is gone.
    #[serde(default)]
    pub deleted_at: Option<u64>,
}

impl Instance {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn in_group(&self, group_id: &str) -> bool {
        self.group_ids.iter().any(|g| g == group_id)
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id.clone(),
            status: self.status.clone(),
        }
    }
}

/// Lifecycle state of an instance as seen by the autoscaler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Running,
    Deleting,
    /// Any status the provider reports that is not a normal lifecycle step.
    Error { code: String, message: String },
}

impl InstanceState {
    /// Map a raw provider status string onto a lifecycle state.
    pub fn from_status(status: &str) -> Self {
        match status {
            "active" => InstanceState::Running,
            "creating" => InstanceState::Creating,
            "deleting" => InstanceState::Deleting,
            other => InstanceState::Error {
                code: other.to_string(),
                message: other.to_string(),
            },
        }
    }
}

// ── Launch templates ───────────────────────────────────────────────

/// Attributes used to create a new instance that matches a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchTemplate {
    /// Name given to every instance created from this template.
    pub name: String,
    pub instance_type: String,
    pub image_id: String,
    /// `None` leaves placement to the provider (zone-balanced groups).
    pub zone_id: Option<String>,
    /// The scaling group the new instance joins.
    pub group_id: GroupId,
    /// The cluster-wide parent group, when one was discovered.
    pub parent_group_id: Option<GroupId>,
    /// Base64-encoded boot payload.
    pub user_data: String,
}

impl LaunchTemplate {
    /// Groups a new instance is placed in: parent first, then its own.
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.parent_group_id
            .iter()
            .chain(std::iter::once(&self.group_id))
            .cloned()
            .collect()
    }
}
