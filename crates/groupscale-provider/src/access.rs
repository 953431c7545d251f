//! Provider access interface.
//!
//! Every call is a fresh round trip to the cloud. Implementations must
//! report a missing group or instance as [`ProviderError::NotFound`] so
//! callers can tell absence apart from transport failure.
//!
//! [`ProviderError::NotFound`]: crate::ProviderError::NotFound

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::{Instance, InstanceId, LaunchTemplate, ProviderGroup};

/// Instance and group primitives exposed by the cloud provider.
#[async_trait]
pub trait ProviderAccess: Send + Sync {
    /// List every group visible to the account.
    async fn list_groups(&self) -> ProviderResult<Vec<ProviderGroup>>;

    /// Fetch a single group with its current member list.
    async fn get_group(&self, id: &str) -> ProviderResult<ProviderGroup>;

    /// Fetch the full record of a single instance.
    async fn get_instance(&self, id: &str) -> ProviderResult<Instance>;

    /// Request a new instance. Returns the provider-assigned id.
    async fn create_instance(&self, template: &LaunchTemplate) -> ProviderResult<InstanceId>;

    /// Request destruction of an instance.
    async fn destroy_instance(&self, id: &str) -> ProviderResult<()>;
}
