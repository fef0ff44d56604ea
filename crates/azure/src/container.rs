//! Azure Container Instances used as the external connectivity target.

use std::time::Duration;

use tracing::info;

use crate::client::AzureClient;
use crate::error::AzureError;
use crate::models::{
    ArmResource, Container, ContainerGroupIpAddress, ContainerGroupProperties, ContainerPort,
    ContainerPortSpec, ContainerProperties, CreateContainerGroupProperties,
    CreateContainerGroupRequest, ResourceReference, ResourceRequests, ResourceRequirements,
};

/// Azure API version for Microsoft.ContainerInstance.
const ACI_API_VERSION: &str = "2023-05-01";

/// Service name a subnet must be delegated to before it can host container groups.
pub const ACI_DELEGATION: &str = "Microsoft.ContainerInstance/containerGroups";

/// Desired single-container group on a private subnet.
#[derive(Debug, Clone)]
pub struct ContainerGroupSpec {
    /// Group (and container) name.
    pub name: String,
    /// Location.
    pub location: String,
    /// Container image.
    pub image: String,
    /// TCP port exposed on the private IP.
    pub port: u16,
    /// Delegated subnet ID.
    pub subnet_id: String,
}

impl AzureClient {
    fn container_group_path(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.ContainerInstance/containerGroups/{name}",
            self.resource_group_scope(resource_group)
        )
    }

    /// Create or update a container group. Returns once ARM accepts the request.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn create_container_group(
        &self,
        resource_group: &str,
        spec: &ContainerGroupSpec,
    ) -> Result<ArmResource<ContainerGroupProperties>, AzureError> {
        info!(name = %spec.name, image = %spec.image, "Creating container group");

        let body = CreateContainerGroupRequest {
            location: spec.location.clone(),
            properties: CreateContainerGroupProperties {
                containers: vec![Container {
                    name: spec.name.clone(),
                    properties: ContainerProperties {
                        image: spec.image.clone(),
                        ports: vec![ContainerPortSpec { port: spec.port }],
                        resources: ResourceRequirements {
                            requests: ResourceRequests {
                                cpu: 1.0,
                                memory_in_gb: 1.0,
                            },
                        },
                    },
                }],
                os_type: "Linux".to_string(),
                restart_policy: "Always".to_string(),
                ip_address: ContainerGroupIpAddress {
                    ip_type: "Private".to_string(),
                    ip: None,
                    ports: vec![ContainerPort {
                        protocol: "TCP".to_string(),
                        port: spec.port,
                    }],
                },
                subnet_ids: vec![ResourceReference {
                    id: spec.subnet_id.clone(),
                }],
            },
        };

        let url = self.url(
            &self.container_group_path(resource_group, &spec.name),
            ACI_API_VERSION,
        );
        self.put(&url, &body).await
    }

    /// Get a container group.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_container_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<ArmResource<ContainerGroupProperties>, AzureError> {
        let url = self.url(&self.container_group_path(resource_group, name), ACI_API_VERSION);
        self.get(&url).await
    }

    /// Wait for a container group and return its private IP.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails, the deadline passes, or no IP is assigned.
    pub async fn wait_container_group_ready(
        &self,
        resource_group: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<String, AzureError> {
        let url = self.url(&self.container_group_path(resource_group, name), ACI_API_VERSION);
        let group: ArmResource<ContainerGroupProperties> = self
            .wait_provisioned(&url, &format!("container group {name}"), timeout)
            .await?;

        group
            .properties
            .ip_address
            .and_then(|ip| ip.ip)
            .ok_or_else(|| AzureError::Config(format!("Container group {name} has no IP address")))
    }
}
