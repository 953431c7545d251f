//! groupscale-provider — access to the cloud provider's instance groups.
//!
//! Defines the provider-side data model (groups, member summaries, full
//! instance records, launch templates) and the [`ProviderAccess`] trait
//! through which the autoscaling core talks to the cloud. The provider is
//! assumed to be fallible and eventually consistent: a mutation that
//! returned `Ok` may not be observable in the next read.
//!
//! # Architecture
//!
//! ```text
//! groupscale-autoscale (Catalog, NodeGroup)
//!   └── Arc<dyn ProviderAccess>
//!         ├── real cloud client (external)
//!         └── MemoryProvider (tests, fixture mode)
//! ```
//!
//! `MemoryProvider` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Mutex<..>>`) so a test can keep a handle for assertions while the
//! core owns another.

pub mod access;
pub mod error;
pub mod memory;
pub mod types;

pub use access::ProviderAccess;
pub use error::{ProviderError, ProviderResult};
pub use memory::{MemoryProvider, ProviderSnapshot};
pub use types::*;
