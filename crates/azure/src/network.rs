//! Resource groups, virtual networks, subnets and peerings.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::client::AzureClient;
use crate::error::AzureError;
use crate::models::{
    AddressSpace, ArmResource, CreatePeeringProperties, CreatePeeringRequest,
    CreateResourceGroupRequest, CreateSubnetProperties, CreateSubnetRequest,
    CreateVirtualNetworkProperties, CreateVirtualNetworkRequest, PeeringProperties,
    ResourceGroupProperties, ResourceReference, SubnetDelegation, SubnetDelegationProperties,
    SubnetProperties, VirtualNetworkProperties,
};

/// API version for resource groups.
const RESOURCES_API_VERSION: &str = "2021-04-01";

/// API version for Microsoft.Network.
const NETWORK_API_VERSION: &str = "2023-09-01";

/// Network resources settle quickly; bound each wait to this.
const NETWORK_WAIT: Duration = Duration::from_secs(300);

/// A provisioned subnet.
#[derive(Debug, Clone)]
pub struct Subnet {
    /// Full resource ID.
    pub id: String,
    /// Subnet name.
    pub name: String,
    /// Address prefix (CIDR).
    pub address_prefix: String,
}

impl From<ArmResource<SubnetProperties>> for Subnet {
    fn from(resource: ArmResource<SubnetProperties>) -> Self {
        Self {
            id: resource.id,
            name: resource.name,
            address_prefix: resource.properties.address_prefix.unwrap_or_default(),
        }
    }
}

impl AzureClient {
    fn resource_group_path(&self, name: &str) -> String {
        format!("{}/resourcegroups/{name}", self.subscription_scope())
    }

    fn vnet_path(&self, resource_group: &str, vnet: &str) -> String {
        format!(
            "{}/providers/Microsoft.Network/virtualNetworks/{vnet}",
            self.resource_group_scope(resource_group)
        )
    }

    /// Create or update a resource group.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: HashMap<String, String>,
    ) -> Result<ArmResource<ResourceGroupProperties>, AzureError> {
        info!(resource_group = %name, location = %location, "Creating resource group");

        let url = self.url(&self.resource_group_path(name), RESOURCES_API_VERSION);
        let body = CreateResourceGroupRequest {
            location: location.to_string(),
            tags,
        };

        self.put(&url, &body).await
    }

    /// Whether a resource group exists.
    ///
    /// # Errors
    ///
    /// Returns an error on any failure other than "not found".
    pub async fn resource_group_exists(&self, name: &str) -> Result<bool, AzureError> {
        let url = self.url(&self.resource_group_path(name), RESOURCES_API_VERSION);
        self.exists(&url).await
    }

    /// Begin deleting a resource group and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn delete_resource_group(&self, name: &str) -> Result<(), AzureError> {
        info!(resource_group = %name, "Deleting resource group");
        let url = self.url(&self.resource_group_path(name), RESOURCES_API_VERSION);
        self.delete(&url).await
    }

    /// Create or update a virtual network and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails or does not settle in time.
    pub async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
        address_prefixes: Vec<String>,
    ) -> Result<ArmResource<VirtualNetworkProperties>, AzureError> {
        info!(
            resource_group = %resource_group,
            vnet = %name,
            prefixes = ?address_prefixes,
            "Creating virtual network"
        );

        let url = self.url(&self.vnet_path(resource_group, name), NETWORK_API_VERSION);
        let body = CreateVirtualNetworkRequest {
            location: location.to_string(),
            properties: CreateVirtualNetworkProperties {
                address_space: AddressSpace { address_prefixes },
            },
        };

        let _: ArmResource<VirtualNetworkProperties> = self.put(&url, &body).await?;
        self.wait_provisioned(&url, name, NETWORK_WAIT).await
    }

    /// Get a virtual network.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<ArmResource<VirtualNetworkProperties>, AzureError> {
        let url = self.url(&self.vnet_path(resource_group, name), NETWORK_API_VERSION);
        self.get(&url).await
    }

    /// Create or update a subnet, optionally delegated to a service, and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails or does not settle in time.
    pub async fn create_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        address_prefix: &str,
        delegation: Option<&str>,
    ) -> Result<Subnet, AzureError> {
        info!(
            vnet = %vnet,
            subnet = %name,
            prefix = %address_prefix,
            delegation = ?delegation,
            "Creating subnet"
        );

        let url = self.url(
            &format!("{}/subnets/{name}", self.vnet_path(resource_group, vnet)),
            NETWORK_API_VERSION,
        );
        let delegations = delegation
            .map(|service| {
                vec![SubnetDelegation {
                    name: format!("{name}-delegation"),
                    properties: SubnetDelegationProperties {
                        service_name: service.to_string(),
                    },
                }]
            })
            .unwrap_or_default();
        let body = CreateSubnetRequest {
            properties: CreateSubnetProperties {
                address_prefix: address_prefix.to_string(),
                delegations,
            },
        };

        let _: ArmResource<SubnetProperties> = self.put(&url, &body).await?;
        let subnet: ArmResource<SubnetProperties> =
            self.wait_provisioned(&url, name, NETWORK_WAIT).await?;
        Ok(subnet.into())
    }

    /// Get a subnet.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
    ) -> Result<Subnet, AzureError> {
        let url = self.url(
            &format!("{}/subnets/{name}", self.vnet_path(resource_group, vnet)),
            NETWORK_API_VERSION,
        );
        let subnet: ArmResource<SubnetProperties> = self.get(&url).await?;
        Ok(subnet.into())
    }

    /// Create or update one direction of a VNET peering and wait for it.
    ///
    /// The peering only reaches `Connected` once the remote side exists too.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails or does not settle in time.
    pub async fn create_peering(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        remote_vnet_id: &str,
    ) -> Result<ArmResource<PeeringProperties>, AzureError> {
        info!(vnet = %vnet, peering = %name, remote = %remote_vnet_id, "Creating VNET peering");

        let url = self.url(
            &format!(
                "{}/virtualNetworkPeerings/{name}",
                self.vnet_path(resource_group, vnet)
            ),
            NETWORK_API_VERSION,
        );
        let body = CreatePeeringRequest {
            properties: CreatePeeringProperties {
                remote_virtual_network: ResourceReference {
                    id: remote_vnet_id.to_string(),
                },
                allow_virtual_network_access: true,
                allow_forwarded_traffic: true,
                allow_gateway_transit: false,
                use_remote_gateways: false,
            },
        };

        let _: ArmResource<PeeringProperties> = self.put(&url, &body).await?;
        self.wait_provisioned(&url, name, NETWORK_WAIT).await
    }

    /// Get a VNET peering.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_peering(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
    ) -> Result<ArmResource<PeeringProperties>, AzureError> {
        let url = self.url(
            &format!(
                "{}/virtualNetworkPeerings/{name}",
                self.vnet_path(resource_group, vnet)
            ),
            NETWORK_API_VERSION,
        );
        self.get(&url).await
    }

    /// Poll a peering until its `peeringState` is `Connected`.
    ///
    /// A peering stays `Initiated` until the remote direction exists, and
    /// turns `Disconnected` if the remote side was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::ProvisioningFailed`] on `Disconnected`,
    /// [`AzureError::Timeout`] past the deadline, or any non-transient request error.
    pub async fn wait_peering_connected(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<ArmResource<PeeringProperties>, AzureError> {
        info!(vnet = %vnet, peering = %name, "Waiting for peering to connect");

        let start = Instant::now();
        let mut attempt = 0_u32;

        loop {
            match self.get_peering(resource_group, vnet, name).await {
                Ok(peering) => {
                    let state = peering
                        .properties
                        .peering_state
                        .clone()
                        .unwrap_or_else(|| "Unknown".to_string());
                    debug!(peering = %name, state = %state, "Polling peering state");

                    match state.as_str() {
                        "Connected" => return Ok(peering),
                        "Disconnected" => {
                            return Err(AzureError::ProvisioningFailed {
                                resource: format!("peering {name}"),
                                state,
                            });
                        }
                        _ => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(peering = %name, error = %e, "Transient error while polling");
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= timeout {
                return Err(AzureError::Timeout {
                    resource: format!("peering {name}"),
                    secs: timeout.as_secs(),
                });
            }

            let delay = self
                .backoff()
                .delay_for_attempt(attempt)
                .min(timeout.saturating_sub(start.elapsed()));
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}
