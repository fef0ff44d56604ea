//! Azure Resource Manager client for static egress gateway provisioning.
//!
//! Covers the resources an AKS static egress setup touches:
//!
//! - **Resource groups, VNETs, subnets, peerings** - [`network`]
//! - **AKS clusters and node pools** - [`aks`]
//! - **Managed identities and role assignments** - [`identity`]
//! - **Scale sets behind node pools** - [`compute`]
//! - **Container instances** used as an external target - [`container`]
//!
//! Every `create_*` call is an ARM PUT and therefore safe to repeat. Long
//! running operations are awaited by polling `provisioningState` with a
//! bounded exponential [`Backoff`] instead of fixed sleeps.

pub mod aks;
pub mod backoff;
pub mod client;
pub mod compute;
pub mod container;
pub mod credential;
pub mod error;
pub mod identity;
pub mod models;
pub mod network;

pub use aks::{AgentPoolSpec, ClusterSpec};
pub use backoff::Backoff;
pub use client::{resource_name, AzureClient, ARM_ENDPOINT};
pub use compute::{resolve_pool_scale_set, ScaleSet};
pub use container::{ContainerGroupSpec, ACI_DELEGATION};
pub use credential::{
    account_show, AccessToken, AccountInfo, AzureCliCredential, StaticTokenCredential,
    TokenCredential,
};
pub use error::AzureError;
pub use identity::{BuiltInRole, ManagedIdentity};
pub use network::Subnet;
