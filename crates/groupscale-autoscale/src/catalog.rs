//! Catalog — discovery of scalable groups.
//!
//! Each refresh rebuilds the full node group set and the instance → group
//! index from the provider's group listing. Nothing carries over between
//! cycles: a group seen again is a brand-new `NodeGroup`.
//!
//! # Eligibility
//!
//! ```text
//! name ends with ".<cluster>"      else ignored
//! at least one member              else ignored
//! descriptor "<min>:<max>", min<max else pinned to its size and ignored
//! members agree on a template      else warned about and ignored
//! ```
//!
//! The group named exactly `<cluster>` is the parent group; every new
//! instance joins it as well as its own scaling group.
//!
//! A failed listing or instance lookup aborts the cycle and leaves the
//! previous cycle's state in place. A group without a template only drops
//! that group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use groupscale_provider::{GroupId, Instance, InstanceId, LaunchTemplate, ProviderAccess, ProviderGroup};

use crate::config::CatalogConfig;
use crate::consensus::ConsensusExtractor;
use crate::descriptor::bounds_or_fixed;
use crate::error::CatalogResult;
use crate::node_group::{InstanceRef, NodeGroup};
use crate::user_data::BootConfig;

/// Name under which this provider registers with the autoscaler.
pub const PROVIDER_NAME: &str = "groupscale";

/// Node label carried by GPU instances.
pub const GPU_LABEL: &str = "cloud.groupscale.io/gpu-node";

/// Instance id → owning group id, as of the last refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipIndex {
    entries: HashMap<InstanceId, GroupId>,
}

impl MembershipIndex {
    pub fn group_for(&self, instance_id: &str) -> Option<&str> {
        self.entries.get(instance_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of one discovery cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Groups surfaced to the autoscaler.
    pub groups: usize,
    /// Instances indexed across those groups.
    pub instances: usize,
    /// Cluster groups left out (empty, fixed size, or no template).
    pub skipped: usize,
}

/// Source of node groups for the autoscaler.
pub struct Catalog {
    config: CatalogConfig,
    boot: BootConfig,
    provider: Arc<dyn ProviderAccess>,
    extractor: ConsensusExtractor,
    node_groups: Vec<NodeGroup>,
    membership: MembershipIndex,
}

impl Catalog {
    /// Create an empty catalog. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(config: CatalogConfig, boot: BootConfig, provider: Arc<dyn ProviderAccess>) -> Self {
        let extractor = ConsensusExtractor::new(config.conflict_policy);
        Self {
            config,
            boot,
            provider,
            extractor,
            node_groups: Vec::new(),
            membership: MembershipIndex::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    pub fn gpu_label(&self) -> &'static str {
        GPU_LABEL
    }

    /// GPU instance types this provider can create. None are offered.
    pub fn available_gpu_types(&self) -> HashSet<String> {
        HashSet::new()
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Node groups found by the last successful refresh.
    pub fn node_groups(&self) -> &[NodeGroup] {
        &self.node_groups
    }

    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    /// The group an instance belonged to at the last refresh, if any.
    pub fn node_group_for(&self, instance: &InstanceRef) -> Option<&NodeGroup> {
        let group_id = self.membership.group_for(instance.id())?;
        debug!(instance = %instance.id(), group = %group_id, "instance resolved to group");
        self.node_groups.iter().find(|g| g.id() == group_id)
    }

    /// Nothing is held open between calls.
    pub fn cleanup(&self) -> CatalogResult<()> {
        Ok(())
    }

    /// Rebuild node groups and membership from the provider.
    pub async fn refresh(&mut self) -> CatalogResult<RefreshSummary> {
        let groups = self.provider.list_groups().await?;
        let suffix = self.config.cluster_suffix();
        let parent_group_id = self.find_parent_group(&groups);
        let user_data = self.boot.user_data();

        let mut node_groups = Vec::new();
        let mut entries = HashMap::new();
        let mut skipped = 0;

        for group in &groups {
            if !group.name.ends_with(&suffix) {
                continue;
            }
            if group.members.is_empty() {
                debug!(group = %group.id, name = %group.name, "skipping group without members");
                skipped += 1;
                continue;
            }
            let bounds = bounds_or_fixed(&group.id, &group.description, group.size());
            if !bounds.is_scalable() {
                debug!(group = %group.id, name = %group.name, "skipping fixed-size group");
                skipped += 1;
                continue;
            }

            let members = self.fetch_members(group).await?;
            let attributes = match self.extractor.extract(&members) {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!(group = %group.id, name = %group.name, error = %e, "skipping group without a launch template");
                    skipped += 1;
                    continue;
                }
            };

            let template = LaunchTemplate {
                name: format!("{}{}", self.config.server_name_prefix, group.name),
                instance_type: attributes.instance_type,
                image_id: attributes.image_id,
                zone_id: attributes.zone_id,
                group_id: group.id.clone(),
                parent_group_id: parent_group_id.clone(),
                user_data: user_data.clone(),
            };
            for member in &group.members {
                entries.insert(member.id.clone(), group.id.clone());
            }
            let node_group = NodeGroup::new(
                &group.id,
                bounds,
                template,
                self.config.convergence,
                Arc::clone(&self.provider),
            );
            debug!(node_group = ?node_group, "node group discovered");
            node_groups.push(node_group);
        }

        let summary = RefreshSummary {
            groups: node_groups.len(),
            instances: entries.len(),
            skipped,
        };
        self.node_groups = node_groups;
        self.membership = MembershipIndex { entries };
        info!(
            instances = summary.instances,
            groups = summary.groups,
            skipped = summary.skipped,
            "refresh complete"
        );
        Ok(summary)
    }

    /// Refresh every `interval` until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), cluster = %self.config.cluster_name, "catalog refresh loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.refresh().await {
                        error!(error = %e, "refresh failed; keeping previous groups");
                    }
                }
                _ = shutdown.changed() => {
                    info!("catalog refresh loop shutting down");
                    break;
                }
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn find_parent_group(&self, groups: &[ProviderGroup]) -> Option<GroupId> {
        let parent = groups
            .iter()
            .find(|g| g.name == self.config.cluster_name)
            .map(|g| g.id.clone());
        if parent.is_none() {
            warn!(cluster = %self.config.cluster_name, "unable to detect parent group for cluster");
        }
        parent
    }

    /// Full records of a group's live members. Members that vanished since
    /// the listing are skipped; any other lookup failure aborts the cycle.
    async fn fetch_members(&self, group: &ProviderGroup) -> CatalogResult<Vec<Instance>> {
        let mut members = Vec::with_capacity(group.size());
        for summary in &group.members {
            match self.provider.get_instance(&summary.id).await {
                Ok(instance) if instance.is_deleted() => {
                    debug!(group = %group.id, instance = %summary.id, "ignoring deleted member");
                }
                Ok(instance) => members.push(instance),
                Err(e) if e.is_not_found() => {
                    debug!(group = %group.id, instance = %summary.id, "member vanished since listing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(members)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("config", &self.config)
            .field("node_groups", &self.node_groups.len())
            .field("instances", &self.membership.len())
            .finish_non_exhaustive()
    }
}
