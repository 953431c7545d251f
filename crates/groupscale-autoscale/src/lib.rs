//! groupscale-autoscale — cloud-provider side of a cluster autoscaler.
//!
//! Tagged instance groups on an IaaS account become node groups the
//! autoscaler can grow and shrink. A group is scalable when its name ends
//! with `.<cluster>` and its description holds `<min>:<max>` bounds.
//!
//! # Lifecycle
//!
//! ```text
//! Catalog::refresh
//!   list groups ─► filter (suffix, members, bounds)
//!               ─► fetch members ─► ConsensusExtractor ─► LaunchTemplate
//!               ─► NodeGroup { bounds, template } + MembershipIndex
//!
//! NodeGroup::increase_size(n)    create n instances, poll until size ≥ target
//! NodeGroup::delete_nodes(refs)  destroy each, poll until it is gone
//! ```
//!
//! Every mutation is followed by bounded polling (1s interval, 30s budget
//! by default) so the autoscaler never observes a half-applied change.

pub mod catalog;
pub mod config;
pub mod consensus;
pub mod descriptor;
pub mod error;
pub mod node_group;
pub mod poller;
pub mod user_data;

pub use catalog::{Catalog, GPU_LABEL, MembershipIndex, PROVIDER_NAME, RefreshSummary};
pub use config::{CatalogConfig, ConflictPolicy, ConvergenceConfig};
pub use consensus::{ConsensusExtractor, LaunchAttributes};
pub use descriptor::{Bounds, parse_bounds};
pub use error::{BootError, CatalogError, ConsensusError, NodeGroupError};
pub use node_group::{GroupInstance, InstanceRef, NodeGroup};
pub use user_data::BootConfig;
