//! Consensus extractor — derive one launch template from group members.
//!
//! Each attribute is voted on independently. A value carries a provenance
//! rank (`available` > `deprecated` > `unknown`); a higher-ranked value
//! supersedes a lower-ranked one, a lower-ranked value never displaces the
//! current one, and two different values of equal rank are a conflict.
//!
//! ```text
//! instance_type   every member, rank available
//! image_id        every member, rank from the image status
//! zone_id         one zone      -> Some(zone)
//!                 several zones -> None (balanced, new instances go anywhere)
//! ```
//!
//! Instance type and image must be resolved once all members are seen.

use tracing::{debug, warn};

use groupscale_provider::{ImageStatus, Instance};

use crate::config::ConflictPolicy;
use crate::error::ConsensusError;

/// The shared attributes new group members are created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAttributes {
    pub instance_type: String,
    pub image_id: String,
    /// `None` when the group spans several zones.
    pub zone_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Provenance {
    Unknown,
    Deprecated,
    Available,
}

impl From<ImageStatus> for Provenance {
    fn from(status: ImageStatus) -> Self {
        match status {
            ImageStatus::Available => Provenance::Available,
            ImageStatus::Deprecated => Provenance::Deprecated,
            ImageStatus::Unknown => Provenance::Unknown,
        }
    }
}

#[derive(Debug)]
struct Candidate {
    value: String,
    provenance: Provenance,
}

/// Running vote for a single attribute.
#[derive(Debug)]
struct AttributeVote {
    attribute: &'static str,
    best: Option<Candidate>,
}

impl AttributeVote {
    fn new(attribute: &'static str) -> Self {
        Self {
            attribute,
            best: None,
        }
    }

    fn offer(
        &mut self,
        value: &str,
        provenance: Provenance,
        policy: ConflictPolicy,
    ) -> Result<(), ConsensusError> {
        if value.is_empty() {
            return Ok(());
        }
        let Some(best) = self.best.as_mut() else {
            self.best = Some(Candidate {
                value: value.to_string(),
                provenance,
            });
            return Ok(());
        };

        if best.value == value {
            best.provenance = best.provenance.max(provenance);
        } else if provenance > best.provenance {
            debug!(
                attribute = self.attribute,
                old = %best.value,
                new = %value,
                "superseded by a better-ranked value"
            );
            best.value = value.to_string();
            best.provenance = provenance;
        } else if provenance < best.provenance {
            debug!(
                attribute = self.attribute,
                kept = %best.value,
                ignored = %value,
                "ignored lower-ranked value"
            );
        } else {
            warn!(
                attribute = self.attribute,
                kept = %best.value,
                rejected = %value,
                "group members disagree"
            );
            if policy == ConflictPolicy::Reject {
                return Err(ConsensusError::Conflict {
                    attribute: self.attribute,
                    kept: best.value.clone(),
                    rejected: value.to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolve(self) -> Result<String, ConsensusError> {
        self.best
            .map(|c| c.value)
            .ok_or(ConsensusError::Unresolved(self.attribute))
    }
}

#[derive(Debug)]
enum ZoneVote {
    Unset,
    Single(String),
    Balanced,
}

impl ZoneVote {
    fn offer(&mut self, zone: &str) {
        if zone.is_empty() {
            return;
        }
        match self {
            ZoneVote::Unset => *self = ZoneVote::Single(zone.to_string()),
            ZoneVote::Single(current) if current != zone => {
                debug!(first = %current, other = %zone, "group is zone balanced");
                *self = ZoneVote::Balanced;
            }
            _ => {}
        }
    }

    fn resolve(self) -> Option<String> {
        match self {
            ZoneVote::Single(zone) => Some(zone),
            ZoneVote::Unset | ZoneVote::Balanced => None,
        }
    }
}

/// Derives [`LaunchAttributes`] from a set of member instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusExtractor {
    policy: ConflictPolicy,
}

impl ConsensusExtractor {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Scan `members` in order and agree on type, image and zone.
    pub fn extract(&self, members: &[Instance]) -> Result<LaunchAttributes, ConsensusError> {
        if members.is_empty() {
            return Err(ConsensusError::NoMembers);
        }

        let mut instance_type = AttributeVote::new("instance type");
        let mut image = AttributeVote::new("image");
        let mut zone = ZoneVote::Unset;

        for member in members {
            debug!(
                instance = %member.id,
                image = %member.image.id,
                image_status = %member.image.status,
                zone = %member.zone_id,
                "sampling member"
            );
            instance_type.offer(&member.instance_type, Provenance::Available, self.policy)?;
            image.offer(&member.image.id, member.image.status.into(), self.policy)?;
            zone.offer(&member.zone_id);
        }

        Ok(LaunchAttributes {
            instance_type: instance_type.resolve()?,
            image_id: image.resolve()?,
            zone_id: zone.resolve(),
        })
    }
}
