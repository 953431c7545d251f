//! Error types for the autoscaling core.

use std::time::Duration;

use thiserror::Error;

use groupscale_provider::ProviderError;

/// Errors returned by node group operations.
#[derive(Debug, Error)]
pub enum NodeGroupError {
    #[error("invalid delta {delta}: {reason}")]
    InvalidDelta { delta: i64, reason: &'static str },

    #[error("size increase too large: desired {desired}, max {max}")]
    MaxSizeExceeded { desired: usize, max: usize },

    #[error("min size reached: size {size}, min {min}; no further instances will be deleted")]
    MinSizeReached { size: usize, min: usize },

    #[error(
        "attempt to delete existing instances: target size {target}, delta {delta}, existing {existing}"
    )]
    ShrinkWouldDeleteNodes {
        target: usize,
        delta: i64,
        existing: usize,
    },

    #[error("instance {instance} belongs to a different group than {group}")]
    ForeignInstance { instance: String, group: String },

    #[error("group {group} did not converge within {waited:?} while {waiting_for}")]
    ConvergenceTimeout {
        group: String,
        waiting_for: String,
        waited: Duration,
    },

    #[error("{0} is not implemented by this provider")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl NodeGroupError {
    /// Whether the request was rejected before any provider mutation.
    pub fn is_bounds_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDelta { .. }
                | Self::MaxSizeExceeded { .. }
                | Self::MinSizeReached { .. }
                | Self::ShrinkWouldDeleteNodes { .. }
        )
    }
}

pub type NodeGroupResult<T> = Result<T, NodeGroupError>;

/// Reasons a group's launch template cannot be derived from its members.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("group has no members to sample")]
    NoMembers,

    #[error("members disagree on {attribute}: kept {kept}, rejected {rejected}")]
    Conflict {
        attribute: &'static str,
        kept: String,
        rejected: String,
    },

    #[error("no member reported a usable {0}")]
    Unresolved(&'static str),
}

/// Errors that abort a whole discovery cycle.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("discovery aborted: {0}")]
    Provider(#[from] ProviderError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Fatal startup conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("required environment variable {0:?} not set")]
    MissingEnv(&'static str),

    #[error("kubernetes version {value:?} is not a valid version: {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("join command does not match the sanitisation pattern")]
    InvalidJoinCommand,

    #[error("convergence {0} must be greater than zero")]
    ZeroConvergence(&'static str),

    #[error("cluster name must be set to the fully qualified internal domain name of the cluster")]
    MissingClusterName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_violations_are_classified() {
        assert!(
            NodeGroupError::InvalidDelta {
                delta: 0,
                reason: "must be positive"
            }
            .is_bounds_violation()
        );
        assert!(NodeGroupError::MaxSizeExceeded { desired: 6, max: 4 }.is_bounds_violation());
        assert!(NodeGroupError::MinSizeReached { size: 1, min: 1 }.is_bounds_violation());
        assert!(
            !NodeGroupError::ForeignInstance {
                instance: "srv-1".into(),
                group: "grp-1".into()
            }
            .is_bounds_violation()
        );
        assert!(
            !NodeGroupError::Provider(ProviderError::Transport("reset".into()))
                .is_bounds_violation()
        );
    }

    #[test]
    fn provider_errors_pass_through_verbatim() {
        let err: NodeGroupError = ProviderError::Transport("connection reset".into()).into();
        assert_eq!(err.to_string(), "provider transport error: connection reset");
    }
}
