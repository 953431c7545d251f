//! NodeGroup — the scaling contract for one provider group.
//!
//! Every size query is a fresh `get_group` round trip; nothing is cached.
//! Mutations are synchronous from the caller's point of view: `increase_size`
//! and `delete_nodes` return only once the provider reports the new state
//! (or the convergence budget is spent), so target size and current size
//! are always the same number.
//!
//! ```text
//! increase_size(delta)
//!   delta > 0, size + delta <= max      (else bounds violation, no call)
//!   create_instance × delta             (first failure aborts, no rollback)
//!   poll get_group until size >= desired
//!
//! delete_nodes([a, b, ...])             (fail-fast, in order)
//!   size > min                          (else bounds violation)
//!   get_instance: member of this group  (else foreign instance)
//!   destroy_instance
//!   poll get_instance until gone from this group
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use groupscale_provider::{InstanceState, LaunchTemplate, ProviderAccess};

use crate::config::ConvergenceConfig;
use crate::descriptor::Bounds;
use crate::error::{NodeGroupError, NodeGroupResult};
use crate::poller::{PollError, poll_converged};

/// Scheme used when rendering orchestrator provider ids.
pub const PROVIDER_ID_SCHEME: &str = "groupscale";

/// Reference to an instance as handed over by the autoscaler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    id: String,
}

impl InstanceRef {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    /// Accepts `<scheme>://<id>` as well as a bare instance id.
    pub fn from_provider_id(provider_id: &str) -> Self {
        let id = provider_id
            .split_once("://")
            .map_or(provider_id, |(_, id)| id);
        Self::new(id.trim_start_matches('/'))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider_id(&self) -> String {
        format!("{PROVIDER_ID_SCHEME}://{}", self.id)
    }
}

/// A group member and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInstance {
    pub id: String,
    pub state: InstanceState,
}

/// A scalable provider group.
pub struct NodeGroup {
    id: String,
    bounds: Bounds,
    template: LaunchTemplate,
    convergence: ConvergenceConfig,
    provider: Arc<dyn ProviderAccess>,
}

impl NodeGroup {
    pub fn new(
        id: &str,
        bounds: Bounds,
        template: LaunchTemplate,
        convergence: ConvergenceConfig,
        provider: Arc<dyn ProviderAccess>,
    ) -> Self {
        Self {
            id: id.to_string(),
            bounds,
            template,
            convergence,
            provider,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn min_size(&self) -> usize {
        self.bounds.min
    }

    pub fn max_size(&self) -> usize {
        self.bounds.max
    }

    /// Template used for every instance this group creates.
    pub fn template(&self) -> &LaunchTemplate {
        &self.template
    }

    /// Groups are discovered, never provisioned by the autoscaler.
    pub fn autoprovisioned(&self) -> bool {
        false
    }

    /// Number of instances the provider currently lists in the group.
    pub async fn target_size(&self) -> NodeGroupResult<usize> {
        let group = self.provider.get_group(&self.id).await?;
        debug!(group = %self.id, size = group.size(), "target size");
        Ok(group.size())
    }

    /// Identical to [`target_size`](Self::target_size): there is no pending
    /// size tracked apart from existing instances.
    pub async fn current_size(&self) -> NodeGroupResult<usize> {
        self.target_size().await
    }

    /// Whether the provider still knows this group.
    pub async fn exist(&self) -> bool {
        self.provider.get_group(&self.id).await.is_ok()
    }

    /// Current members with their lifecycle state.
    pub async fn nodes(&self) -> NodeGroupResult<Vec<GroupInstance>> {
        let group = self.provider.get_group(&self.id).await?;
        debug!(group = %self.id, members = group.size(), "listing nodes");
        Ok(group
            .members
            .iter()
            .map(|m| GroupInstance {
                id: m.id.clone(),
                state: InstanceState::from_status(&m.status),
            })
            .collect())
    }

    /// Create `delta` instances and wait until the group reports them.
    pub async fn increase_size(&self, delta: i64) -> NodeGroupResult<()> {
        debug!(group = %self.id, delta, "increase size");
        let count = match usize::try_from(delta) {
            Ok(count) if count > 0 => count,
            _ => {
                return Err(NodeGroupError::InvalidDelta {
                    delta,
                    reason: "size increase must be positive",
                });
            }
        };

        let size = self.target_size().await?;
        let desired = size + count;
        if desired > self.max_size() {
            return Err(NodeGroupError::MaxSizeExceeded {
                desired,
                max: self.max_size(),
            });
        }

        self.create_instances(count).await?;

        let this = self;
        self.wait_for(format!("growing to {desired} instances"), move || async move {
            this.target_size().await.map(|size| size >= desired)
        })
        .await?;
        info!(group = %self.id, from = size, to = desired, "group grown");
        Ok(())
    }

    /// Always fails: shrinking the target would mean deleting existing
    /// instances, which must go through [`delete_nodes`](Self::delete_nodes).
    pub async fn decrease_target_size(&self, delta: i64) -> NodeGroupResult<()> {
        debug!(group = %self.id, delta, "decrease target size");
        if delta >= 0 {
            return Err(NodeGroupError::InvalidDelta {
                delta,
                reason: "size decrease must be negative",
            });
        }

        // One observation serves as both target and existing count.
        let size = self.target_size().await?;
        Err(NodeGroupError::ShrinkWouldDeleteNodes {
            target: size,
            delta,
            existing: size,
        })
    }

    /// Delete the given instances one at a time, stopping at the first
    /// failure. Deletions already completed are kept.
    pub async fn delete_nodes(&self, instances: &[InstanceRef]) -> NodeGroupResult<()> {
        debug!(group = %self.id, count = instances.len(), "delete nodes");
        for instance in instances {
            let size = self.current_size().await?;
            if size <= self.min_size() {
                return Err(NodeGroupError::MinSizeReached {
                    size,
                    min: self.min_size(),
                });
            }
            self.delete_instance(instance.id()).await?;
        }
        Ok(())
    }

    /// Node groups cannot be created through the autoscaler.
    pub fn create(&self) -> NodeGroupResult<NodeGroup> {
        Err(NodeGroupError::NotImplemented("node group creation"))
    }

    /// Node groups cannot be deleted through the autoscaler.
    pub fn delete(&self) -> NodeGroupResult<()> {
        Err(NodeGroupError::NotImplemented("node group deletion"))
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn create_instances(&self, count: usize) -> NodeGroupResult<()> {
        for created in 0..count {
            match self.provider.create_instance(&self.template).await {
                Ok(instance) => {
                    debug!(group = %self.id, %instance, "instance requested");
                }
                Err(e) => {
                    warn!(
                        group = %self.id,
                        created,
                        requested = count,
                        error = %e,
                        "instance creation failed; created instances are kept"
                    );
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn delete_instance(&self, instance: &str) -> NodeGroupResult<()> {
        if self.is_missing(instance).await? {
            return Err(NodeGroupError::ForeignInstance {
                instance: instance.to_string(),
                group: self.id.clone(),
            });
        }

        self.provider.destroy_instance(instance).await?;

        let this = self;
        self.wait_for(format!("removing instance {instance}"), move || async move {
            this.is_missing(instance).await
        })
        .await?;
        info!(group = %self.id, %instance, "instance deleted");
        Ok(())
    }

    /// An instance is missing when it is unknown, deleted, or no longer
    /// lists this group.
    async fn is_missing(&self, instance: &str) -> NodeGroupResult<bool> {
        match self.provider.get_instance(instance).await {
            Ok(found) => Ok(found.is_deleted() || !found.in_group(&self.id)),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for<F, Fut>(&self, waiting_for: String, condition: F) -> NodeGroupResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = NodeGroupResult<bool>>,
    {
        poll_converged(&self.convergence, condition)
            .await
            .map_err(|e| match e {
                PollError::TimedOut { waited } => {
                    warn!(group = %self.id, %waiting_for, ?waited, "provider did not converge");
                    NodeGroupError::ConvergenceTimeout {
                        group: self.id.clone(),
                        waiting_for,
                        waited,
                    }
                }
                PollError::Predicate(err) => err,
            })
    }
}

impl fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGroup")
            .field("id", &self.id)
            .field("min_size", &self.bounds.min)
            .field("max_size", &self.bounds.max)
            .field("template", &self.template)
            .field("convergence", &self.convergence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use groupscale_provider::memory::{CallCounts, Operation};
    use groupscale_provider::{
        ImageRef, ImageStatus, Instance, MemoryProvider, ProviderError, ProviderGroup,
    };

    const GROUP: &str = "grp-sda44";

    fn test_instance(id: &str, group_id: &str, status: &str) -> Instance {
        Instance {
            id: id.to_string(),
            name: "auto.workers.k8s-fake.cluster.local".to_string(),
            status: status.to_string(),
            instance_type: "typ-testy".to_string(),
            image: ImageRef {
                id: "img-testy".to_string(),
                status: ImageStatus::Available,
            },
            zone_id: "zon-testy".to_string(),
            group_ids: vec![group_id.to_string()],
            deleted_at: None,
        }
    }

    fn test_template() -> LaunchTemplate {
        LaunchTemplate {
            name: "auto.workers.k8s-fake.cluster.local".to_string(),
            instance_type: "typ-testy".to_string(),
            image_id: "img-testy".to_string(),
            zone_id: Some("zon-testy".to_string()),
            group_id: GROUP.to_string(),
            parent_group_id: None,
            user_data: String::new(),
        }
    }

    /// A 1:4 group with two active members and a foreign group with one.
    fn test_provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        let groups = [
            (GROUP, "workers.k8s-fake.cluster.local"),
            ("grp-other", "db.k8s-fake.cluster.local"),
        ];
        for (id, name) in groups {
            provider.put_group(ProviderGroup {
                id: id.to_string(),
                name: name.to_string(),
                description: "1:4".to_string(),
                members: Vec::new(),
            });
        }
        provider.put_instance(test_instance("srv-lv426", GROUP, "active"));
        provider.put_instance(test_instance("srv-rp897", GROUP, "active"));
        provider.put_instance(test_instance("srv-testy", "grp-other", "active"));
        provider
    }

    fn test_group(provider: &MemoryProvider) -> NodeGroup {
        NodeGroup::new(
            GROUP,
            Bounds { min: 1, max: 4 },
            test_template(),
            ConvergenceConfig::default(),
            Arc::new(provider.clone()),
        )
    }

    fn refs(ids: &[&str]) -> Vec<InstanceRef> {
        ids.iter().map(|id| InstanceRef::new(id)).collect()
    }

    #[test]
    fn bounds_and_identity() {
        let group = test_group(&MemoryProvider::new());
        assert_eq!(group.id(), GROUP);
        assert_eq!(group.min_size(), 1);
        assert_eq!(group.max_size(), 4);
        assert!(!group.autoprovisioned());
        assert!(matches!(group.create(), Err(NodeGroupError::NotImplemented(_))));
        assert!(matches!(group.delete(), Err(NodeGroupError::NotImplemented(_))));
    }

    #[test]
    fn debug_output_names_group_and_bounds() {
        let rendered = format!("{:?}", test_group(&MemoryProvider::new()));
        assert!(rendered.contains(GROUP));
        assert!(rendered.contains("max_size: 4"));
    }

    #[test]
    fn instance_ref_parses_provider_ids() {
        assert_eq!(InstanceRef::from_provider_id("groupscale://srv-lv426").id(), "srv-lv426");
        assert_eq!(InstanceRef::from_provider_id("cloud:///srv-lv426").id(), "srv-lv426");
        assert_eq!(InstanceRef::from_provider_id("srv-lv426").id(), "srv-lv426");
        assert_eq!(InstanceRef::new("srv-1").provider_id(), "groupscale://srv-1");
    }

    #[tokio::test]
    async fn sizes_are_read_from_provider() {
        let provider = test_provider();
        let group = test_group(&provider);
        assert_eq!(group.target_size().await.unwrap(), 2);
        assert_eq!(group.current_size().await.unwrap(), 2);
        assert_eq!(provider.calls().get_group, 2);
    }

    #[tokio::test]
    async fn size_query_failure_propagates() {
        let provider = test_provider();
        provider.fail_next(Operation::GetGroup, ProviderError::Transport("reset".into()));
        let group = test_group(&provider);
        let err = group.target_size().await.unwrap_err();
        assert!(matches!(err, NodeGroupError::Provider(ProviderError::Transport(_))));
    }

    #[tokio::test]
    async fn exist_follows_provider() {
        let provider = test_provider();
        assert!(test_group(&provider).exist().await);
        provider.fail_next(Operation::GetGroup, ProviderError::group_not_found(GROUP));
        assert!(!test_group(&provider).exist().await);
    }

    #[tokio::test]
    async fn nodes_map_provider_status() {
        let provider = test_provider();
        provider.put_instance(test_instance("srv-new", GROUP, "creating"));
        provider.put_instance(test_instance("srv-bad", GROUP, "unavailable"));
        let nodes = test_group(&provider).nodes().await.unwrap();
        let states: Vec<_> = nodes.iter().map(|n| (n.id.as_str(), n.state.clone())).collect();
        assert_eq!(
            states,
            vec![
                ("srv-lv426", InstanceState::Running),
                ("srv-rp897", InstanceState::Running),
                ("srv-new", InstanceState::Creating),
                (
                    "srv-bad",
                    InstanceState::Error {
                        code: "unavailable".into(),
                        message: "unavailable".into()
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn increase_requires_positive_delta() {
        let provider = test_provider();
        let group = test_group(&provider);
        for delta in [0, -1] {
            let err = group.increase_size(delta).await.unwrap_err();
            assert!(matches!(err, NodeGroupError::InvalidDelta { .. }));
        }
        assert_eq!(provider.calls().get_group, 0);
        assert_eq!(provider.calls().create_instance, 0);
    }

    #[tokio::test]
    async fn increase_past_max_creates_nothing() {
        let provider = test_provider();
        let err = test_group(&provider).increase_size(4).await.unwrap_err();
        assert!(matches!(
            err,
            NodeGroupError::MaxSizeExceeded { desired: 6, max: 4 }
        ));
        assert_eq!(provider.calls().create_instance, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn increase_waits_for_group_to_grow() {
        let provider = test_provider();
        let group = test_group(&provider);
        group.increase_size(2).await.unwrap();

        assert_eq!(provider.calls().create_instance, 2);
        assert_eq!(group.target_size().await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn increase_times_out_when_provider_stalls() {
        let provider = test_provider();
        provider.set_stalled(true);
        let started = tokio::time::Instant::now();

        let err = test_group(&provider).increase_size(1).await.unwrap_err();

        assert!(matches!(err, NodeGroupError::ConvergenceTimeout { .. }));
        assert!(!err.is_bounds_violation());
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(provider.calls().create_instance, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_aborts_without_rollback() {
        let provider = test_provider();
        provider.fail_nth(
            Operation::CreateInstance,
            2,
            ProviderError::Rejected("quota exceeded".into()),
        );
        let group = test_group(&provider);

        let err = group.increase_size(2).await.unwrap_err();
        assert!(matches!(err, NodeGroupError::Provider(ProviderError::Rejected(_))));
        assert_eq!(provider.calls().create_instance, 2);
        assert_eq!(provider.calls().destroy_instance, 0);
        assert_eq!(group.target_size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn decrease_target_size_always_fails() {
        let provider = test_provider();
        let group = test_group(&provider);

        for delta in [0, 1] {
            let err = group.decrease_target_size(delta).await.unwrap_err();
            assert!(matches!(err, NodeGroupError::InvalidDelta { .. }));
        }
        assert_eq!(provider.calls().get_group, 0);

        let err = group.decrease_target_size(-1).await.unwrap_err();
        assert!(matches!(
            err,
            NodeGroupError::ShrinkWouldDeleteNodes {
                target: 2,
                delta: -1,
                existing: 2
            }
        ));
        assert_eq!(provider.calls().destroy_instance, 0);
    }

    #[tokio::test]
    async fn deleting_nothing_is_a_noop() {
        let provider = test_provider();
        test_group(&provider).delete_nodes(&[]).await.unwrap();
        assert_eq!(provider.calls(), CallCounts::default());
    }

    #[tokio::test]
    async fn foreign_instance_is_never_destroyed() {
        let provider = test_provider();
        let err = test_group(&provider)
            .delete_nodes(&refs(&["srv-testy"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGroupError::ForeignInstance { ref instance, .. } if instance == "srv-testy"));
        assert_eq!(provider.calls().destroy_instance, 0);
    }

    #[tokio::test]
    async fn unknown_instance_is_treated_as_foreign() {
        let provider = test_provider();
        let err = test_group(&provider)
            .delete_nodes(&refs(&["srv-ghost"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGroupError::ForeignInstance { .. }));
        assert_eq!(provider.calls().destroy_instance, 0);
    }

    #[tokio::test]
    async fn membership_lookup_failure_aborts() {
        let provider = test_provider();
        provider.fail_next(Operation::GetInstance, ProviderError::Transport("reset".into()));
        let err = test_group(&provider)
            .delete_nodes(&refs(&["srv-rp897"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGroupError::Provider(ProviderError::Transport(_))));
        assert_eq!(provider.calls().destroy_instance, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_waits_for_instance_to_leave() {
        let provider = test_provider();
        let group = test_group(&provider);
        group.delete_nodes(&refs(&["srv-rp897"])).await.unwrap();

        assert_eq!(provider.calls().destroy_instance, 1);
        assert_eq!(group.current_size().await.unwrap(), 1);
        assert!(provider.get_instance("srv-rp897").await.unwrap().is_deleted());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_stops_at_min_size() {
        let provider = test_provider();
        let group = test_group(&provider);

        let err = group
            .delete_nodes(&refs(&["srv-rp897", "srv-lv426"]))
            .await
            .unwrap_err();

        assert!(matches!(err, NodeGroupError::MinSizeReached { size: 1, min: 1 }));
        assert_eq!(provider.calls().destroy_instance, 1);
        // The first deletion stands.
        assert_eq!(group.current_size().await.unwrap(), 1);
        assert!(!provider.get_instance("srv-lv426").await.unwrap().is_deleted());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_times_out_when_provider_stalls() {
        let provider = test_provider();
        provider.set_stalled(true);
        let err = test_group(&provider)
            .delete_nodes(&refs(&["srv-rp897", "srv-lv426"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeGroupError::ConvergenceTimeout { .. }));
        assert_eq!(provider.calls().destroy_instance, 1);
    }
}
