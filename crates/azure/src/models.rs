//! Azure Resource Manager request and response models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Properties that expose an ARM `provisioningState`.
pub trait ProvisioningState {
    /// Current provisioning state, if reported.
    fn provisioning_state(&self) -> Option<&str>;
}

/// Generic ARM resource envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmResource<P> {
    /// Fully qualified resource ID.
    #[serde(default)]
    pub id: String,
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Location.
    #[serde(default)]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Resource-specific properties.
    pub properties: P,
}

impl<P: ProvisioningState> ArmResource<P> {
    /// Provisioning state of the wrapped resource.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties.provisioning_state()
    }
}

/// ARM list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmList<T> {
    /// Page of items.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Next page URL.
    pub next_link: Option<String>,
}

/// Reference to another resource by ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceReference {
    /// Resource ID.
    pub id: String,
}

macro_rules! impl_provisioning_state {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ProvisioningState for $ty {
                fn provisioning_state(&self) -> Option<&str> {
                    self.provisioning_state.as_deref()
                }
            }
        )*
    };
}

impl_provisioning_state!(
    ResourceGroupProperties,
    VirtualNetworkProperties,
    SubnetProperties,
    PeeringProperties,
    ManagedClusterProperties,
    AgentPoolProperties,
    ScaleSetProperties,
    ContainerGroupProperties,
);

// ============================================================================
// Resource groups
// ============================================================================

/// Resource group properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupProperties {
    pub provisioning_state: Option<String>,
}

/// Create/update resource group body.
#[derive(Debug, Serialize)]
pub struct CreateResourceGroupRequest {
    pub location: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

// ============================================================================
// Virtual networks
// ============================================================================

/// Virtual network properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub address_space: AddressSpace,
    #[serde(default)]
    pub subnets: Vec<ArmResource<SubnetProperties>>,
}

/// Address space of a virtual network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

/// Create/update virtual network body.
#[derive(Debug, Serialize)]
pub struct CreateVirtualNetworkRequest {
    pub location: String,
    pub properties: CreateVirtualNetworkProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVirtualNetworkProperties {
    pub address_space: AddressSpace,
}

/// Subnet properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperties {
    pub provisioning_state: Option<String>,
    pub address_prefix: Option<String>,
    #[serde(default)]
    pub delegations: Vec<SubnetDelegation>,
}

/// Subnet delegation to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetDelegation {
    pub name: String,
    pub properties: SubnetDelegationProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetDelegationProperties {
    pub service_name: String,
}

/// Create/update subnet body.
#[derive(Debug, Serialize)]
pub struct CreateSubnetRequest {
    pub properties: CreateSubnetProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubnetProperties {
    pub address_prefix: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delegations: Vec<SubnetDelegation>,
}

/// VNET peering properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringProperties {
    pub provisioning_state: Option<String>,
    /// `Initiated`, `Connected` or `Disconnected`.
    pub peering_state: Option<String>,
    pub remote_virtual_network: Option<ResourceReference>,
}

/// Create/update peering body.
#[derive(Debug, Serialize)]
pub struct CreatePeeringRequest {
    pub properties: CreatePeeringProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeeringProperties {
    pub remote_virtual_network: ResourceReference,
    pub allow_virtual_network_access: bool,
    pub allow_forwarded_traffic: bool,
    pub allow_gateway_transit: bool,
    pub use_remote_gateways: bool,
}

// ============================================================================
// AKS
// ============================================================================

/// Managed cluster properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterProperties {
    pub provisioning_state: Option<String>,
    pub kubernetes_version: Option<String>,
    pub dns_prefix: Option<String>,
    pub fqdn: Option<String>,
    pub node_resource_group: Option<String>,
    #[serde(default)]
    pub agent_pool_profiles: Vec<AgentPoolProfile>,
}

/// Agent pool summary embedded in the cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProfile {
    pub name: String,
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub vm_size: String,
    pub mode: Option<String>,
    pub provisioning_state: Option<String>,
}

/// Create/update managed cluster body.
#[derive(Debug, Serialize)]
pub struct CreateManagedClusterRequest {
    pub location: String,
    pub identity: ManagedServiceIdentity,
    pub properties: CreateManagedClusterProperties,
}

/// Cluster identity block.
#[derive(Debug, Serialize)]
pub struct ManagedServiceIdentity {
    #[serde(rename = "type")]
    pub identity_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateManagedClusterProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    pub dns_prefix: String,
    pub agent_pool_profiles: Vec<CreateAgentPoolProfile>,
    pub network_profile: NetworkProfile,
}

/// System pool definition inside the cluster create body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentPoolProfile {
    pub name: String,
    pub count: i32,
    pub vm_size: String,
    pub os_type: String,
    pub mode: String,
    #[serde(rename = "vnetSubnetID")]
    pub vnet_subnet_id: String,
}

/// Cluster network profile.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    pub network_plugin: String,
    pub service_cidr: String,
    #[serde(rename = "dnsServiceIP")]
    pub dns_service_ip: String,
}

/// Agent pool (node pool) properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProperties {
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub count: i32,
    #[serde(default)]
    pub vm_size: String,
    pub mode: Option<String>,
    #[serde(default)]
    pub node_taints: Vec<String>,
    #[serde(default)]
    pub node_labels: HashMap<String, String>,
    #[serde(rename = "vnetSubnetID")]
    pub vnet_subnet_id: Option<String>,
}

/// Create/update agent pool body.
#[derive(Debug, Serialize)]
pub struct CreateAgentPoolRequest {
    pub properties: CreateAgentPoolProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentPoolProperties {
    pub count: i32,
    pub vm_size: String,
    pub os_type: String,
    pub mode: String,
    #[serde(rename = "vnetSubnetID")]
    pub vnet_subnet_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub node_taints: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub node_labels: HashMap<String, String>,
}

/// Cluster credentials response.
#[derive(Debug, Deserialize)]
pub struct CredentialResults {
    #[serde(default)]
    pub kubeconfigs: Vec<CredentialResult>,
}

/// Single kubeconfig entry.
#[derive(Debug, Deserialize)]
pub struct CredentialResult {
    pub name: String,
    /// Base64 encoded kubeconfig.
    pub value: String,
}

// ============================================================================
// Managed identity and RBAC
// ============================================================================

/// User-assigned identity properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProperties {
    pub tenant_id: String,
    pub principal_id: String,
    pub client_id: String,
}

/// Create/update identity body.
#[derive(Debug, Serialize)]
pub struct CreateIdentityRequest {
    pub location: String,
}

/// Role assignment properties.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    pub role_definition_id: String,
    pub principal_id: String,
    pub scope: Option<String>,
}

/// Create role assignment body.
#[derive(Debug, Serialize)]
pub struct CreateRoleAssignmentRequest {
    pub properties: CreateRoleAssignmentProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleAssignmentProperties {
    pub role_definition_id: String,
    pub principal_id: String,
    pub principal_type: String,
}

// ============================================================================
// Compute
// ============================================================================

/// Scale set properties (subset).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetProperties {
    pub provisioning_state: Option<String>,
    pub unique_id: Option<String>,
}

// ============================================================================
// Container instances
// ============================================================================

/// Container group properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupProperties {
    pub provisioning_state: Option<String>,
    pub ip_address: Option<ContainerGroupIpAddress>,
    pub os_type: Option<String>,
}

/// IP address block of a container group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerGroupIpAddress {
    #[serde(rename = "type")]
    pub ip_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub ports: Vec<ContainerPort>,
}

/// Exposed port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerPort {
    pub protocol: String,
    pub port: u16,
}

/// Create/update container group body.
#[derive(Debug, Serialize)]
pub struct CreateContainerGroupRequest {
    pub location: String,
    pub properties: CreateContainerGroupProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContainerGroupProperties {
    pub containers: Vec<Container>,
    pub os_type: String,
    pub restart_policy: String,
    pub ip_address: ContainerGroupIpAddress,
    pub subnet_ids: Vec<ResourceReference>,
}

/// Container definition.
#[derive(Debug, Serialize)]
pub struct Container {
    pub name: String,
    pub properties: ContainerProperties,
}

#[derive(Debug, Serialize)]
pub struct ContainerProperties {
    pub image: String,
    pub ports: Vec<ContainerPortSpec>,
    pub resources: ResourceRequirements,
}

#[derive(Debug, Serialize)]
pub struct ContainerPortSpec {
    pub port: u16,
}

#[derive(Debug, Serialize)]
pub struct ResourceRequirements {
    pub requests: ResourceRequests,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequests {
    pub cpu: f64,
    #[serde(rename = "memoryInGB")]
    pub memory_in_gb: f64,
}
