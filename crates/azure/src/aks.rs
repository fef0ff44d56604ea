//! AKS managed clusters and agent pools.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use tracing::info;

use crate::client::AzureClient;
use crate::error::AzureError;
use crate::models::{
    AgentPoolProperties, ArmResource, CreateAgentPoolProfile, CreateAgentPoolProperties,
    CreateAgentPoolRequest, CreateManagedClusterProperties, CreateManagedClusterRequest,
    CredentialResults, ManagedClusterProperties, ManagedServiceIdentity, NetworkProfile,
};

/// Azure API version for AKS.
const AKS_API_VERSION: &str = "2024-05-01";

/// Desired AKS cluster.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    /// Cluster name (also used as DNS prefix).
    pub name: String,
    /// Location.
    pub location: String,
    /// Kubernetes version; `None` lets AKS pick its default.
    pub kubernetes_version: Option<String>,
    /// System pool name.
    pub system_pool_name: String,
    /// System pool node count.
    pub node_count: i32,
    /// System pool VM size.
    pub node_vm_size: String,
    /// Subnet the system pool is bound to.
    pub vnet_subnet_id: String,
    /// Service CIDR; must not overlap the VNET.
    pub service_cidr: String,
    /// Cluster DNS service IP inside `service_cidr`.
    pub dns_service_ip: String,
}

/// Desired user agent pool.
#[derive(Debug, Clone)]
pub struct AgentPoolSpec {
    /// Pool name (1-12 lowercase alphanumerics).
    pub name: String,
    /// Node count.
    pub node_count: i32,
    /// VM size.
    pub vm_size: String,
    /// Subnet the pool is bound to.
    pub vnet_subnet_id: String,
    /// Taints in `key=value:Effect` form.
    pub taints: Vec<String>,
    /// Node labels.
    pub labels: HashMap<String, String>,
}

impl AzureClient {
    fn cluster_path(&self, resource_group: &str, name: &str) -> String {
        format!(
            "{}/providers/Microsoft.ContainerService/managedClusters/{name}",
            self.resource_group_scope(resource_group)
        )
    }

    /// Create or update an AKS cluster. Returns once ARM accepts the request.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn create_cluster(
        &self,
        resource_group: &str,
        spec: &ClusterSpec,
    ) -> Result<ArmResource<ManagedClusterProperties>, AzureError> {
        info!(
            cluster = %spec.name,
            location = %spec.location,
            nodes = spec.node_count,
            "Creating AKS cluster"
        );

        let body = CreateManagedClusterRequest {
            location: spec.location.clone(),
            identity: ManagedServiceIdentity {
                identity_type: "SystemAssigned".to_string(),
            },
            properties: CreateManagedClusterProperties {
                kubernetes_version: spec.kubernetes_version.clone(),
                dns_prefix: spec.name.clone(),
                agent_pool_profiles: vec![CreateAgentPoolProfile {
                    name: spec.system_pool_name.clone(),
                    count: spec.node_count,
                    vm_size: spec.node_vm_size.clone(),
                    os_type: "Linux".to_string(),
                    mode: "System".to_string(),
                    vnet_subnet_id: spec.vnet_subnet_id.clone(),
                }],
                network_profile: NetworkProfile {
                    network_plugin: "azure".to_string(),
                    service_cidr: spec.service_cidr.clone(),
                    dns_service_ip: spec.dns_service_ip.clone(),
                },
            },
        };

        let url = self.url(&self.cluster_path(resource_group, &spec.name), AKS_API_VERSION);
        let cluster: ArmResource<ManagedClusterProperties> = self.put(&url, &body).await?;

        info!(cluster = %cluster.name, "AKS cluster creation initiated");
        Ok(cluster)
    }

    /// Get an AKS cluster.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_cluster(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<ArmResource<ManagedClusterProperties>, AzureError> {
        let url = self.url(&self.cluster_path(resource_group, name), AKS_API_VERSION);
        self.get(&url).await
    }

    /// Wait until the cluster reports `Succeeded`.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails or the deadline passes.
    pub async fn wait_cluster_ready(
        &self,
        resource_group: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<ArmResource<ManagedClusterProperties>, AzureError> {
        let url = self.url(&self.cluster_path(resource_group, name), AKS_API_VERSION);
        self.wait_provisioned(&url, &format!("cluster {name}"), timeout)
            .await
    }

    /// Create or update a user agent pool. Returns once ARM accepts the request.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn create_agent_pool(
        &self,
        resource_group: &str,
        cluster: &str,
        spec: &AgentPoolSpec,
    ) -> Result<ArmResource<AgentPoolProperties>, AzureError> {
        info!(
            cluster = %cluster,
            pool = %spec.name,
            nodes = spec.node_count,
            taints = ?spec.taints,
            "Creating agent pool"
        );

        let body = CreateAgentPoolRequest {
            properties: CreateAgentPoolProperties {
                count: spec.node_count,
                vm_size: spec.vm_size.clone(),
                os_type: "Linux".to_string(),
                mode: "User".to_string(),
                vnet_subnet_id: spec.vnet_subnet_id.clone(),
                node_taints: spec.taints.clone(),
                node_labels: spec.labels.clone(),
            },
        };

        let url = self.url(
            &format!(
                "{}/agentPools/{}",
                self.cluster_path(resource_group, cluster),
                spec.name
            ),
            AKS_API_VERSION,
        );
        self.put(&url, &body).await
    }

    /// Get an agent pool.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::NotFound`] if it does not exist.
    pub async fn get_agent_pool(
        &self,
        resource_group: &str,
        cluster: &str,
        pool: &str,
    ) -> Result<ArmResource<AgentPoolProperties>, AzureError> {
        let url = self.url(
            &format!("{}/agentPools/{pool}", self.cluster_path(resource_group, cluster)),
            AKS_API_VERSION,
        );
        self.get(&url).await
    }

    /// Wait until the agent pool reports `Succeeded`.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning fails or the deadline passes.
    pub async fn wait_agent_pool_ready(
        &self,
        resource_group: &str,
        cluster: &str,
        pool: &str,
        timeout: Duration,
    ) -> Result<ArmResource<AgentPoolProperties>, AzureError> {
        let url = self.url(
            &format!("{}/agentPools/{pool}", self.cluster_path(resource_group, cluster)),
            AKS_API_VERSION,
        );
        self.wait_provisioned(&url, &format!("agent pool {pool}"), timeout)
            .await
    }

    /// Fetch the user kubeconfig for a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if no kubeconfig is returned or it cannot be decoded.
    pub async fn get_user_kubeconfig(
        &self,
        resource_group: &str,
        cluster: &str,
    ) -> Result<String, AzureError> {
        let url = self.url(
            &format!(
                "{}/listClusterUserCredential",
                self.cluster_path(resource_group, cluster)
            ),
            AKS_API_VERSION,
        );

        let creds: CredentialResults = self.post(&url).await?;

        let kubeconfig = creds
            .kubeconfigs
            .first()
            .ok_or_else(|| AzureError::Config("No kubeconfig available".to_string()))?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&kubeconfig.value)
            .map_err(|e| AzureError::Config(format!("Failed to decode kubeconfig: {e}")))?;

        String::from_utf8(decoded)
            .map_err(|e| AzureError::Config(format!("Invalid kubeconfig: {e}")))
    }
}
