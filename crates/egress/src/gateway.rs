//! kube-egress-gateway artifacts: the Helm values file carrying Azure
//! coordinates, and the `StaticGatewayConfiguration` custom resource.

use std::path::Path;

use anyhow::{Context, Result};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::EgressConfig;

/// Internal load balancer the controller creates in front of gateway nodes.
pub const GATEWAY_LOAD_BALANCER_NAME: &str = "kubeegressgateway-ilb";

/// User agent the controller reports to ARM.
const CONTROLLER_USER_AGENT: &str = "kube-egress-gateway-controller";

/// Which annotation opts a pod into a gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodAnnotation {
    /// `kubernetes.azure.com/static-gateway-configuration`.
    #[default]
    Current,
    /// `egressgateway.kubernetes.azure.com/gateway-name` (older controller releases).
    Legacy,
}

impl PodAnnotation {
    /// Annotation key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Current => "kubernetes.azure.com/static-gateway-configuration",
            Self::Legacy => "egressgateway.kubernetes.azure.com/gateway-name",
        }
    }
}

impl std::str::FromStr for PodAnnotation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "legacy" => Ok(Self::Legacy),
            _ => Err(anyhow::anyhow!(
                "Unknown annotation style: {s}. Supported: current, legacy"
            )),
        }
    }
}

// ============================================================================
// Helm values (azure_config.yaml)
// ============================================================================

/// Azure coordinates the controller needs to manage gateway resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCloudConfig {
    pub cloud: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub use_managed_identity_extension: bool,
    #[serde(rename = "userAssignedIdentityID")]
    pub user_assigned_identity_id: String,
    pub user_agent: String,
    /// Resource group of the gateway scale set (the node resource group).
    pub resource_group: String,
    pub location: String,
    pub gateway_load_balancer_name: String,
    pub load_balancer_resource_group: String,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub subnet_name: String,
}

/// Values discovered in the cloud that feed [`AzureCloudConfig`].
#[derive(Debug, Clone)]
pub struct DiscoveredAzure<'a> {
    pub subscription_id: &'a str,
    pub tenant_id: &'a str,
    pub identity_client_id: &'a str,
    pub node_resource_group: &'a str,
}

impl AzureCloudConfig {
    /// Combine static config with values returned by the cloud.
    #[must_use]
    pub fn new(config: &EgressConfig, discovered: &DiscoveredAzure<'_>) -> Self {
        Self {
            cloud: "AzurePublicCloud".to_string(),
            tenant_id: discovered.tenant_id.to_string(),
            subscription_id: discovered.subscription_id.to_string(),
            use_managed_identity_extension: true,
            user_assigned_identity_id: discovered.identity_client_id.to_string(),
            user_agent: CONTROLLER_USER_AGENT.to_string(),
            resource_group: discovered.node_resource_group.to_string(),
            location: config.location.clone(),
            gateway_load_balancer_name: GATEWAY_LOAD_BALANCER_NAME.to_string(),
            load_balancer_resource_group: discovered.node_resource_group.to_string(),
            vnet_name: config.vnet_name.clone(),
            vnet_resource_group: config.resource_group.clone(),
            subnet_name: config.egress_subnet_name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HelmValues {
    config: HelmConfigSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelmConfigSection {
    azure_cloud_config: AzureCloudConfig,
}

/// Render the values file passed to `helm -f`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_azure_config(cloud_config: &AzureCloudConfig) -> Result<String> {
    let values = HelmValues {
        config: HelmConfigSection {
            azure_cloud_config: cloud_config.clone(),
        },
    };
    serde_yaml::to_string(&values).context("Failed to render azure_config.yaml")
}

/// Parse a rendered values file back into its Azure section.
///
/// # Errors
///
/// Returns an error if the YAML does not have the expected shape.
pub fn parse_azure_config(yaml: &str) -> Result<AzureCloudConfig> {
    let values: HelmValues =
        serde_yaml::from_str(yaml).context("Failed to parse azure_config.yaml")?;
    Ok(values.config.azure_cloud_config)
}

/// Write the values file (mode 0600 on Unix; it names the identity).
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_azure_config(path: &Path, cloud_config: &AzureCloudConfig) -> Result<()> {
    let yaml = render_azure_config(cloud_config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
    }

    Ok(())
}

// ============================================================================
// StaticGatewayConfiguration
// ============================================================================

/// Where traffic goes when no route CIDR matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DefaultRoute {
    /// Everything not excluded leaves through the gateway.
    #[default]
    StaticEgressGateway,
    /// Everything not listed in `routeCidrs` uses normal node egress.
    AzureNetworking,
}

/// Gateway scale set reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayVmssProfile {
    pub vmss_resource_group: String,
    pub vmss_name: String,
    pub public_ip_prefix_size: i32,
}

/// Desired static egress gateway.
#[derive(CustomResource, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "egressgateway.kubernetes.azure.com",
    version = "v1alpha1",
    kind = "StaticGatewayConfiguration",
    namespaced
)]
#[kube(status = "StaticGatewayConfigurationStatus")]
#[kube(printcolumn = r#"{"name":"Prefix","type":"string","jsonPath":".status.egressIpPrefix"}"#)]
#[serde(rename_all = "camelCase")]
pub struct StaticGatewayConfigurationSpec {
    pub gateway_vmss_profile: GatewayVmssProfile,
    pub provision_public_ips: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_prefix_id: Option<String>,
    pub default_route: DefaultRoute,
    #[serde(default)]
    pub route_cidrs: Vec<String>,
    #[serde(default)]
    pub exclude_cidrs: Vec<String>,
}

/// Status written by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticGatewayConfigurationStatus {
    /// Egress prefix (or IP) allocated to the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_ip_prefix: Option<String>,
}

/// Build the gateway configuration for the resolved gateway scale set.
///
/// Cluster-internal ranges are excluded so only traffic leaving the
/// cluster VNET is steered through the gateway.
#[must_use]
pub fn build_gateway_configuration(
    config: &EgressConfig,
    vmss_name: &str,
    vmss_resource_group: &str,
) -> StaticGatewayConfiguration {
    let spec = StaticGatewayConfigurationSpec {
        gateway_vmss_profile: GatewayVmssProfile {
            vmss_resource_group: vmss_resource_group.to_string(),
            vmss_name: vmss_name.to_string(),
            public_ip_prefix_size: 31,
        },
        provision_public_ips: config.provision_public_ips,
        public_ip_prefix_id: None,
        default_route: config.default_route,
        route_cidrs: config.route_cidrs.iter().map(ToString::to_string).collect(),
        exclude_cidrs: vec![config.vnet_cidr.to_string(), config.service_cidr.to_string()],
    };

    let mut gateway = StaticGatewayConfiguration::new(&config.gateway_name, spec);
    gateway.metadata.namespace = Some(config.demo_namespace.clone());
    gateway
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered() -> DiscoveredAzure<'static> {
        DiscoveredAzure {
            subscription_id: "sub-123",
            tenant_id: "tenant-456",
            identity_client_id: "client-789",
            node_resource_group: "MC_demo-rg_demo_eastus",
        }
    }

    #[test]
    fn test_azure_config_carries_discovered_ids() {
        let config = EgressConfig::with_defaults("demo".into());
        let cloud = AzureCloudConfig::new(&config, &discovered());
        let yaml = render_azure_config(&cloud).unwrap();

        assert!(yaml.starts_with("config:\n  azureCloudConfig:\n"));
        assert!(yaml.contains("subscriptionId: sub-123"));
        assert!(yaml.contains("tenantId: tenant-456"));
        assert!(yaml.contains("userAssignedIdentityID: client-789"));
        assert!(yaml.contains("gatewayLoadBalancerName: kubeegressgateway-ilb"));

        let parsed = parse_azure_config(&yaml).unwrap();
        assert_eq!(parsed.subscription_id, "sub-123");
        assert_eq!(parsed.tenant_id, "tenant-456");
        assert_eq!(parsed.user_assigned_identity_id, "client-789");
        assert_eq!(parsed.resource_group, "MC_demo-rg_demo_eastus");
        assert_eq!(parsed.vnet_resource_group, "demo-rg");
        assert_eq!(parsed.subnet_name, "gateway-subnet");
    }

    #[test]
    fn test_write_azure_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("azure_config.yaml");
        let config = EgressConfig::with_defaults("demo".into());

        write_azure_config(&path, &AzureCloudConfig::new(&config, &discovered())).unwrap();

        let parsed = parse_azure_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.user_assigned_identity_id, "client-789");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_gateway_configuration_manifest() {
        let config = EgressConfig::with_defaults("demo".into());
        let gateway = build_gateway_configuration(
            &config,
            "aks-gwnodepool-12345678-vmss",
            "MC_demo-rg_demo_eastus",
        );

        let value = serde_json::to_value(&gateway).unwrap();
        assert_eq!(value["apiVersion"], "egressgateway.kubernetes.azure.com/v1alpha1");
        assert_eq!(value["kind"], "StaticGatewayConfiguration");
        assert_eq!(value["metadata"]["name"], "aks-static-egress");
        assert_eq!(value["metadata"]["namespace"], "egress-demo");

        let spec = &value["spec"];
        assert_eq!(spec["defaultRoute"], "staticEgressGateway");
        assert_eq!(spec["provisionPublicIps"], false);
        assert_eq!(
            spec["gatewayVmssProfile"]["vmssName"],
            "aks-gwnodepool-12345678-vmss"
        );
        assert_eq!(
            spec["gatewayVmssProfile"]["vmssResourceGroup"],
            "MC_demo-rg_demo_eastus"
        );
        assert_eq!(spec["excludeCidrs"][0], "10.243.0.0/16");
        assert_eq!(spec["excludeCidrs"][1], "10.0.0.0/16");
        assert!(spec.get("publicIpPrefixId").is_none());
    }

    #[test]
    fn test_azure_networking_routes_only_listed_cidrs() {
        let mut config = EgressConfig::with_defaults("demo".into());
        config.default_route = DefaultRoute::AzureNetworking;
        config.route_cidrs = vec!["10.245.0.0/16".parse().unwrap()];

        let gateway = build_gateway_configuration(&config, "vmss", "MC_rg");
        let value = serde_json::to_value(&gateway).unwrap();
        assert_eq!(value["spec"]["defaultRoute"], "azureNetworking");
        assert_eq!(value["spec"]["routeCidrs"][0], "10.245.0.0/16");

        let parsed: StaticGatewayConfiguration = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.spec.default_route, DefaultRoute::AzureNetworking);
    }

    #[test]
    fn test_annotation_keys() {
        assert_eq!(
            PodAnnotation::Current.key(),
            "kubernetes.azure.com/static-gateway-configuration"
        );
        assert_eq!(
            "legacy".parse::<PodAnnotation>().unwrap().key(),
            "egressgateway.kubernetes.azure.com/gateway-name"
        );
        assert!("other".parse::<PodAnnotation>().is_err());
    }
}
