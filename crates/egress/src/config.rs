//! Provisioning configuration.
//!
//! Every value has a default derived from the cluster name, so a config file
//! only needs to list what differs. Files are TOML.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::{DefaultRoute, PodAnnotation};

/// Taint/label key the gateway controller selects gateway nodes by.
pub const GATEWAY_MODE_KEY: &str = "kubeegressgateway.azure.com/mode";

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{subnet} ({cidr}) is not inside VNET {vnet}")]
    SubnetOutsideVnet {
        subnet: String,
        cidr: Ipv4Net,
        vnet: Ipv4Net,
    },
    #[error("{a} ({a_cidr}) overlaps {b} ({b_cidr})")]
    Overlap {
        a: String,
        a_cidr: Ipv4Net,
        b: String,
        b_cidr: Ipv4Net,
    },
    #[error("DNS service IP {ip} is not inside service CIDR {cidr}")]
    DnsOutsideServiceCidr { ip: Ipv4Addr, cidr: Ipv4Net },
    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
    #[error("node pool name {0:?} must be 1-12 lowercase letters or digits, starting with a letter")]
    InvalidPoolName(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Helm chart and controller image settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChartConfig {
    /// Git repository holding the chart.
    pub repo_url: String,
    /// Branch or tag to fetch.
    pub git_ref: String,
    /// Chart directory inside the repository.
    pub chart_path: String,
    /// Helm release name.
    pub release_name: String,
    /// Namespace the controller runs in.
    pub namespace: String,
    /// `common.imageRepository` value.
    pub image_repository: String,
    /// `common.imageTag` value.
    pub image_tag: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/Azure/kube-egress-gateway.git".into(),
            git_ref: "main".into(),
            chart_path: "helm/kube-egress-gateway".into(),
            release_name: "kube-egress-gateway".into(),
            namespace: "kube-egress-gateway-system".into(),
            image_repository: "mcr.microsoft.com/aks".into(),
            image_tag: "v0.0.21".into(),
        }
    }
}

/// External target reached over VNET peering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Provision the target and run the connectivity test.
    pub enabled: bool,
    /// Resource group for the target VNET and container.
    pub resource_group: String,
    /// Target VNET name.
    pub vnet_name: String,
    /// Target VNET address space; must not overlap the cluster VNET.
    pub vnet_cidr: Ipv4Net,
    /// Subnet delegated to Azure Container Instances.
    pub subnet_name: String,
    /// Subnet address prefix.
    pub subnet_cidr: Ipv4Net,
    /// Container group name.
    pub container_name: String,
    /// Image that echoes the caller's address (`RemoteAddr: ip:port`).
    pub image: String,
    /// HTTP port the image listens on.
    pub port: u16,
}

impl TargetConfig {
    fn with_defaults(cluster_name: &str) -> Self {
        Self {
            enabled: true,
            resource_group: format!("{cluster_name}-target-rg"),
            vnet_name: format!("{cluster_name}-target-vnet"),
            vnet_cidr: net(10, 245, 0, 0, 16),
            subnet_name: "aci-subnet".into(),
            subnet_cidr: net(10, 245, 0, 0, 24),
            container_name: format!("{cluster_name}-echo"),
            image: "traefik/whoami:v1.10".into(),
            port: 80,
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::with_defaults("egress")
    }
}

/// Readiness deadlines, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub cluster_minutes: u32,
    pub node_pool_minutes: u32,
    pub container_minutes: u32,
    pub peering_minutes: u32,
    pub pod_minutes: u32,
    pub helm_minutes: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            cluster_minutes: 20,
            node_pool_minutes: 15,
            container_minutes: 10,
            peering_minutes: 5,
            pod_minutes: 5,
            helm_minutes: 10,
        }
    }
}

impl Timeouts {
    /// Convert a minute count to a [`std::time::Duration`].
    #[must_use]
    pub fn duration(minutes: u32) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(minutes) * 60)
    }
}

/// Full provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EgressConfig {
    // Cluster identity
    /// AKS cluster name.
    pub cluster_name: String,
    /// Resource group for the cluster and its network.
    pub resource_group: String,
    /// Azure region (e.g. "eastus").
    pub location: String,
    /// Subscription; resolved from `az account show` when unset.
    pub subscription_id: Option<String>,
    /// Kubernetes version; AKS default when unset.
    pub kubernetes_version: Option<String>,
    /// System pool name.
    pub system_pool_name: String,
    /// System pool node count.
    pub node_count: u8,
    /// System pool VM size.
    pub node_vm_size: String,

    // Networking
    /// Cluster VNET name.
    pub vnet_name: String,
    /// Cluster VNET address space.
    pub vnet_cidr: Ipv4Net,
    /// Subnet for regular nodes and pods.
    pub default_subnet_name: String,
    pub default_subnet_cidr: Ipv4Net,
    /// Subnet for gateway nodes.
    pub egress_subnet_name: String,
    pub egress_subnet_cidr: Ipv4Net,
    /// Kubernetes service CIDR (must not overlap any VNET).
    pub service_cidr: Ipv4Net,
    /// Cluster DNS service address.
    pub dns_service_ip: Ipv4Addr,

    // Gateway
    /// Gateway node pool name.
    pub gateway_pool_name: String,
    /// Gateway node count.
    pub gateway_node_count: u8,
    /// Gateway node VM size.
    pub gateway_vm_size: String,
    /// Managed identity used by the gateway controller.
    pub identity_name: String,
    /// `StaticGatewayConfiguration` name.
    pub gateway_name: String,
    /// Namespace for the gateway configuration and test pods.
    pub demo_namespace: String,
    /// Annotation used to opt pods into the gateway.
    pub annotation: PodAnnotation,
    /// Ask the controller for public egress IPs.
    pub provision_public_ips: bool,
    /// Route for traffic matching neither `route_cidrs` nor the exclusions.
    pub default_route: DefaultRoute,
    /// Destinations always sent through the gateway.
    pub route_cidrs: Vec<Ipv4Net>,

    /// Helm chart settings.
    pub chart: ChartConfig,
    /// Connectivity target settings.
    pub target: TargetConfig,
    /// Readiness deadlines.
    pub timeouts: Timeouts,

    // Paths
    /// Output directory for kubeconfig, rendered files and state.
    pub output_dir: PathBuf,
    /// Merge the kubeconfig into `~/.kube/config` at the end.
    pub merge_kubeconfig: bool,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self::with_defaults("egress".into())
    }
}

fn net(a: u8, b: u8, c: u8, d: u8, prefix: u8) -> Ipv4Net {
    let addr = Ipv4Addr::new(a, b, c, d);
    Ipv4Net::new(addr, prefix).unwrap_or_else(|_| Ipv4Net::from(addr))
}

impl EgressConfig {
    /// Create config with sensible defaults for a given cluster name.
    #[must_use]
    pub fn with_defaults(cluster_name: String) -> Self {
        let output_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".egress")
            .join(&cluster_name);

        Self {
            resource_group: format!("{cluster_name}-rg"),
            location: "eastus".into(),
            subscription_id: None,
            kubernetes_version: None,
            system_pool_name: "nodepool1".into(),
            node_count: 2,
            node_vm_size: "Standard_DS2_v2".into(),
            vnet_name: format!("{cluster_name}-vnet"),
            vnet_cidr: net(10, 243, 0, 0, 16),
            default_subnet_name: "aks-subnet".into(),
            default_subnet_cidr: net(10, 243, 0, 0, 20),
            egress_subnet_name: "gateway-subnet".into(),
            egress_subnet_cidr: net(10, 243, 16, 0, 24),
            service_cidr: net(10, 0, 0, 0, 16),
            dns_service_ip: Ipv4Addr::new(10, 0, 0, 10),
            gateway_pool_name: "gwnodepool".into(),
            gateway_node_count: 2,
            gateway_vm_size: "Standard_DS2_v2".into(),
            identity_name: format!("{cluster_name}-egress-identity"),
            gateway_name: "aks-static-egress".into(),
            demo_namespace: "egress-demo".into(),
            annotation: PodAnnotation::default(),
            provision_public_ips: false,
            default_route: DefaultRoute::default(),
            route_cidrs: Vec::new(),
            chart: ChartConfig::default(),
            target: TargetConfig::with_defaults(&cluster_name),
            timeouts: Timeouts::default(),
            output_dir,
            merge_kubeconfig: false,
            cluster_name,
        }
    }

    /// Load a TOML config file. Missing keys take defaults derived from
    /// the file's `cluster_name` (or `"egress"`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse TOML, filling unspecified keys from [`Self::with_defaults`].
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has invalid values.
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: toml::Table = toml::from_str(content)?;
        let cluster_name = raw
            .get("cluster_name")
            .and_then(toml::Value::as_str)
            .unwrap_or("egress")
            .to_string();

        let mut merged = toml::Table::try_from(Self::with_defaults(cluster_name))?;
        merge_tables(&mut merged, raw);
        Ok(merged.try_into()?)
    }

    /// Check the invariants the cloud would otherwise reject late (or not at all).
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("cluster_name", &self.cluster_name),
            ("resource_group", &self.resource_group),
            ("location", &self.location),
            ("gateway_name", &self.gateway_name),
            ("demo_namespace", &self.demo_namespace),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }

        if self.node_count == 0 {
            return Err(ConfigError::ZeroCount("node_count"));
        }
        if self.gateway_node_count == 0 {
            return Err(ConfigError::ZeroCount("gateway_node_count"));
        }
        validate_pool_name(&self.system_pool_name)?;
        validate_pool_name(&self.gateway_pool_name)?;

        let vnet = self.vnet_cidr;
        for (name, subnet) in [
            (&self.default_subnet_name, self.default_subnet_cidr),
            (&self.egress_subnet_name, self.egress_subnet_cidr),
        ] {
            if !vnet.contains(&subnet) {
                return Err(ConfigError::SubnetOutsideVnet {
                    subnet: name.clone(),
                    cidr: subnet,
                    vnet,
                });
            }
        }

        check_disjoint(
            &self.default_subnet_name,
            self.default_subnet_cidr,
            &self.egress_subnet_name,
            self.egress_subnet_cidr,
        )?;
        check_disjoint(
            "service CIDR",
            self.service_cidr,
            &self.vnet_name,
            self.vnet_cidr,
        )?;

        if !self.service_cidr.contains(&self.dns_service_ip) {
            return Err(ConfigError::DnsOutsideServiceCidr {
                ip: self.dns_service_ip,
                cidr: self.service_cidr,
            });
        }

        // Nothing would reach the gateway otherwise.
        if self.default_route == DefaultRoute::AzureNetworking && self.route_cidrs.is_empty() {
            return Err(ConfigError::Empty("route_cidrs"));
        }

        if self.target.enabled {
            let target = &self.target;
            check_disjoint(&self.vnet_name, self.vnet_cidr, &target.vnet_name, target.vnet_cidr)?;
            check_disjoint("service CIDR", self.service_cidr, &target.vnet_name, target.vnet_cidr)?;
            if !target.vnet_cidr.contains(&target.subnet_cidr) {
                return Err(ConfigError::SubnetOutsideVnet {
                    subnet: target.subnet_name.clone(),
                    cidr: target.subnet_cidr,
                    vnet: target.vnet_cidr,
                });
            }
        }

        Ok(())
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.output_dir.join("provision-state.json")
    }

    /// Get the kubeconfig path.
    #[must_use]
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.output_dir.join("kubeconfig")
    }

    /// Get the rendered Helm values path.
    #[must_use]
    pub fn azure_config_path(&self) -> PathBuf {
        self.output_dir.join("azure_config.yaml")
    }

    /// Directory the chart repository is cloned into.
    #[must_use]
    pub fn chart_checkout_dir(&self) -> PathBuf {
        self.output_dir.join("kube-egress-gateway")
    }

    /// Taint applied to gateway nodes.
    #[must_use]
    pub fn gateway_taint(&self) -> String {
        format!("{GATEWAY_MODE_KEY}=true:NoSchedule")
    }
}

fn validate_pool_name(name: &str) -> Result<(), ConfigError> {
    let valid = (1..=12).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidPoolName(name.to_string()))
    }
}

fn overlaps(a: Ipv4Net, b: Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

fn check_disjoint(a: &str, a_cidr: Ipv4Net, b: &str, b_cidr: Ipv4Net) -> Result<(), ConfigError> {
    if overlaps(a_cidr, b_cidr) {
        Err(ConfigError::Overlap {
            a: a.to_string(),
            a_cidr,
            b: b.to_string(),
            b_cidr,
        })
    } else {
        Ok(())
    }
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
