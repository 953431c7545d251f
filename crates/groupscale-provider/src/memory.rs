//! MemoryProvider — in-memory provider backend.
//!
//! Holds groups and instances behind a mutex and applies mutations the
//! way a well-behaved cloud would: a created instance appears in every
//! group named by its template, a destroyed instance is marked deleted and
//! dropped from its groups. Two knobs model a misbehaving provider:
//!
//! - **stalled** mode accepts create/destroy calls but never applies them,
//!   so convergence can be observed to time out.
//! - **failure injection** makes the n-th upcoming call of an operation
//!   return a chosen error.
//!
//! Call counters let tests assert that a call was never issued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::ProviderAccess;
use crate::error::{ProviderError, ProviderResult};
use crate::types::*;

/// Serializable content of a provider: the fixture format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSnapshot {
    #[serde(default)]
    pub groups: Vec<ProviderGroup>,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// Provider operations, used to target failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListGroups,
    GetGroup,
    GetInstance,
    CreateInstance,
    DestroyInstance,
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_groups: usize,
    pub get_group: usize,
    pub get_instance: usize,
    pub create_instance: usize,
    pub destroy_instance: usize,
}

impl CallCounts {
    fn bump(&mut self, op: Operation) {
        match op {
            Operation::ListGroups => self.list_groups += 1,
            Operation::GetGroup => self.get_group += 1,
            Operation::GetInstance => self.get_instance += 1,
            Operation::CreateInstance => self.create_instance += 1,
            Operation::DestroyInstance => self.destroy_instance += 1,
        }
    }
}

/// A pending injected failure: fires when `remaining` reaches zero.
#[derive(Debug)]
struct InjectedFailure {
    op: Operation,
    remaining: usize,
    error: ProviderError,
}

#[derive(Debug, Default)]
struct Inner {
    groups: Vec<ProviderGroup>,
    instances: HashMap<InstanceId, Instance>,
    next_id: u64,
    stalled: bool,
    failures: Vec<InjectedFailure>,
    calls: CallCounts,
}

impl Inner {
    /// Count the call and fire any injected failure that is due.
    fn enter(&mut self, op: Operation) -> ProviderResult<()> {
        self.calls.bump(op);
        let mut fired = None;
        for (idx, failure) in self.failures.iter_mut().enumerate() {
            if failure.op != op {
                continue;
            }
            failure.remaining = failure.remaining.saturating_sub(1);
            if failure.remaining == 0 && fired.is_none() {
                fired = Some(idx);
            }
        }
        match fired {
            Some(idx) => Err(self.failures.remove(idx).error),
            None => Ok(()),
        }
    }

    fn group_mut(&mut self, id: &str) -> Option<&mut ProviderGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }
}

/// Thread-safe in-memory provider.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: ProviderSnapshot) -> Self {
        let provider = Self::new();
        for group in snapshot.groups {
            provider.put_group(group);
        }
        for instance in snapshot.instances {
            provider.put_instance(instance);
        }
        provider
    }

    /// Parse a JSON fixture into a provider.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let snapshot: ProviderSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a group, keeping its member list as given.
    pub fn put_group(&self, group: ProviderGroup) {
        let mut state = self.state();
        match state.group_mut(&group.id) {
            Some(existing) => *existing = group,
            None => state.groups.push(group),
        }
    }

    /// Insert or replace an instance record.
    ///
    /// The instance is added to the member list of every known group it
    /// names, unless it is deleted.
    pub fn put_instance(&self, instance: Instance) {
        let mut state = self.state();
        if !instance.is_deleted() {
            for group_id in &instance.group_ids {
                if let Some(group) = state.group_mut(group_id)
                    && !group.has_member(&instance.id)
                {
                    group.members.push(instance.summary());
                }
            }
        }
        state.instances.insert(instance.id.clone(), instance);
    }

    /// Accept mutations without ever applying them.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Fail the `nth` upcoming call (1-based) of `op` with `error`.
    pub fn fail_nth(&self, op: Operation, nth: usize, error: ProviderError) {
        self.state().failures.push(InjectedFailure {
            op,
            remaining: nth.max(1),
            error,
        });
    }

    /// Fail the very next call of `op` with `error`.
    pub fn fail_next(&self, op: Operation, error: ProviderError) {
        self.fail_nth(op, 1, error);
    }

    /// Calls received so far.
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Copy out the current content.
    pub fn snapshot(&self) -> ProviderSnapshot {
        let state = self.state();
        let mut instances: Vec<Instance> = state.instances.values().cloned().collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        ProviderSnapshot {
            groups: state.groups.clone(),
            instances,
        }
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryProvider")
            .field("groups", &state.groups.len())
            .field("instances", &state.instances.len())
            .field("stalled", &state.stalled)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAccess for MemoryProvider {
    async fn list_groups(&self) -> ProviderResult<Vec<ProviderGroup>> {
        let mut state = self.state();
        state.enter(Operation::ListGroups)?;
        debug!(groups = state.groups.len(), "listed groups");
        Ok(state.groups.clone())
    }

    async fn get_group(&self, id: &str) -> ProviderResult<ProviderGroup> {
        let mut state = self.state();
        state.enter(Operation::GetGroup)?;
        state
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::group_not_found(id))
    }

    async fn get_instance(&self, id: &str) -> ProviderResult<Instance> {
        let mut state = self.state();
        state.enter(Operation::GetInstance)?;
        state
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::instance_not_found(id))
    }

    async fn create_instance(&self, template: &LaunchTemplate) -> ProviderResult<InstanceId> {
        let mut state = self.state();
        state.enter(Operation::CreateInstance)?;
        if state.group_mut(&template.group_id).is_none() {
            return Err(ProviderError::group_not_found(&template.group_id));
        }

        state.next_id += 1;
        let id = format!("srv-{:05x}", state.next_id);
        if state.stalled {
            debug!(instance = %id, "create accepted but not applied");
            return Ok(id);
        }

        let instance = Instance {
            id: id.clone(),
            name: template.name.clone(),
            status: "creating".to_string(),
            instance_type: template.instance_type.clone(),
            image: ImageRef {
                id: template.image_id.clone(),
                status: ImageStatus::Available,
            },
            zone_id: template.zone_id.clone().unwrap_or_default(),
            group_ids: template.group_ids(),
            deleted_at: None,
        };
        for group_id in &instance.group_ids {
            if let Some(group) = state.group_mut(group_id) {
                group.members.push(instance.summary());
            }
        }
        state.instances.insert(id.clone(), instance);
        debug!(instance = %id, group = %template.group_id, "instance created");
        Ok(id)
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.enter(Operation::DestroyInstance)?;
        let stalled = state.stalled;
        let instance = state
            .instances
            .get_mut(id)
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| ProviderError::instance_not_found(id))?;
        if stalled {
            debug!(instance = %id, "destroy accepted but not applied");
            return Ok(());
        }

        instance.status = "deleted".to_string();
        instance.deleted_at = Some(epoch_secs());
        for group in &mut state.groups {
            group.members.retain(|m| m.id != id);
        }
        debug!(instance = %id, "instance destroyed");
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
