//! Provisioning state persistence.
//!
//! Every completed step and every fact discovered in the cloud is written to
//! `provision-state.json` so an interrupted run picks up where it stopped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EgressConfig;
use crate::connectivity::ConnectivityReport;

/// Provisioning steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    /// Not yet started.
    NotStarted,
    /// Checking local tools and Azure login.
    ValidatingPrerequisites,

    // Cluster network
    CreatingResourceGroup,
    CreatingVirtualNetwork,
    /// Default and egress subnets.
    CreatingSubnets,

    // Cluster
    CreatingCluster,
    WaitingClusterReady,
    CreatingGatewayNodePool,
    WaitingNodePoolReady,

    // Gateway identity
    CreatingIdentity,
    /// Finding the scale set backing the gateway pool.
    ResolvingGatewayScaleSet,
    AssigningRoles,

    // Gateway install
    FetchingCredentials,
    RenderingAzureConfig,
    InstallingGatewayChart,
    CreatingStaticGateway,
    DeployingTestPods,

    // External target
    ProvisioningTarget,
    PeeringNetworks,
    VerifyingConnectivity,

    /// Provisioning complete.
    Complete,
}

impl ProvisionStep {
    /// Get the next step in the sequence.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::NotStarted => Self::ValidatingPrerequisites,
            Self::ValidatingPrerequisites => Self::CreatingResourceGroup,
            Self::CreatingResourceGroup => Self::CreatingVirtualNetwork,
            Self::CreatingVirtualNetwork => Self::CreatingSubnets,
            Self::CreatingSubnets => Self::CreatingCluster,
            Self::CreatingCluster => Self::WaitingClusterReady,
            Self::WaitingClusterReady => Self::CreatingGatewayNodePool,
            Self::CreatingGatewayNodePool => Self::WaitingNodePoolReady,
            Self::WaitingNodePoolReady => Self::CreatingIdentity,
            Self::CreatingIdentity => Self::ResolvingGatewayScaleSet,
            Self::ResolvingGatewayScaleSet => Self::AssigningRoles,
            Self::AssigningRoles => Self::FetchingCredentials,
            Self::FetchingCredentials => Self::RenderingAzureConfig,
            Self::RenderingAzureConfig => Self::InstallingGatewayChart,
            Self::InstallingGatewayChart => Self::CreatingStaticGateway,
            Self::CreatingStaticGateway => Self::DeployingTestPods,
            Self::DeployingTestPods => Self::ProvisioningTarget,
            Self::ProvisioningTarget => Self::PeeringNetworks,
            Self::PeeringNetworks => Self::VerifyingConnectivity,
            Self::VerifyingConnectivity | Self::Complete => Self::Complete,
        }
    }

    /// Get a human-readable description of the step.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::ValidatingPrerequisites => "Validating prerequisites",
            Self::CreatingResourceGroup => "Creating resource group",
            Self::CreatingVirtualNetwork => "Creating cluster virtual network",
            Self::CreatingSubnets => "Creating default and egress subnets",
            Self::CreatingCluster => "Creating AKS cluster",
            Self::WaitingClusterReady => "Waiting for cluster to be ready",
            Self::CreatingGatewayNodePool => "Creating gateway node pool",
            Self::WaitingNodePoolReady => "Waiting for gateway node pool",
            Self::CreatingIdentity => "Creating managed identity",
            Self::ResolvingGatewayScaleSet => "Resolving gateway scale set",
            Self::AssigningRoles => "Assigning identity roles",
            Self::FetchingCredentials => "Fetching cluster credentials",
            Self::RenderingAzureConfig => "Rendering azure_config.yaml",
            Self::InstallingGatewayChart => "Installing kube-egress-gateway",
            Self::CreatingStaticGateway => "Creating StaticGatewayConfiguration",
            Self::DeployingTestPods => "Deploying test pods",
            Self::ProvisioningTarget => "Provisioning external target",
            Self::PeeringNetworks => "Peering virtual networks",
            Self::VerifyingConnectivity => "Verifying egress source addresses",
            Self::Complete => "Complete",
        }
    }

    /// Get the step number for progress display.
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::ValidatingPrerequisites => 1,
            Self::CreatingResourceGroup => 2,
            Self::CreatingVirtualNetwork => 3,
            Self::CreatingSubnets => 4,
            Self::CreatingCluster => 5,
            Self::WaitingClusterReady => 6,
            Self::CreatingGatewayNodePool => 7,
            Self::WaitingNodePoolReady => 8,
            Self::CreatingIdentity => 9,
            Self::ResolvingGatewayScaleSet => 10,
            Self::AssigningRoles => 11,
            Self::FetchingCredentials => 12,
            Self::RenderingAzureConfig => 13,
            Self::InstallingGatewayChart => 14,
            Self::CreatingStaticGateway => 15,
            Self::DeployingTestPods => 16,
            Self::ProvisioningTarget => 17,
            Self::PeeringNetworks => 18,
            Self::VerifyingConnectivity => 19,
            Self::Complete => 20,
        }
    }

    /// Total number of steps.
    pub const TOTAL_STEPS: u8 = 20;

    /// Steps that only exist to build and exercise the external target.
    #[must_use]
    pub fn is_connectivity_test(self) -> bool {
        matches!(
            self,
            Self::ProvisioningTarget | Self::PeeringNetworks | Self::VerifyingConnectivity
        )
    }
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Facts returned by Azure and Kubernetes while provisioning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredFacts {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub vnet_id: Option<String>,
    pub default_subnet_id: Option<String>,
    pub egress_subnet_id: Option<String>,
    pub cluster_id: Option<String>,
    /// `MC_*` resource group AKS manages.
    pub node_resource_group: Option<String>,
    pub identity_resource_id: Option<String>,
    pub identity_client_id: Option<String>,
    pub identity_principal_id: Option<String>,
    pub gateway_vmss_name: Option<String>,
    pub gateway_vmss_id: Option<String>,
    pub kubeconfig_path: Option<PathBuf>,
    pub azure_config_path: Option<PathBuf>,
    pub chart_path: Option<PathBuf>,
    pub target_vnet_id: Option<String>,
    pub target_subnet_id: Option<String>,
    pub target_ip: Option<String>,
    pub connectivity: Option<ConnectivityReport>,
}

/// Full provisioning state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionState {
    /// Configuration the run was started with.
    pub config: EgressConfig,
    /// Current step.
    pub step: ProvisionStep,
    /// What has been discovered so far.
    #[serde(default)]
    pub facts: DiscoveredFacts,
    /// Timestamp of last state update.
    pub updated_at: String,
    /// Number of retry attempts for current step.
    pub attempt_count: u32,
    /// Last error message (if any).
    pub last_error: Option<String>,
}

impl ProvisionState {
    /// Create a new provisioning state.
    #[must_use]
    pub fn new(config: EgressConfig) -> Self {
        Self {
            config,
            step: ProvisionStep::NotStarted,
            facts: DiscoveredFacts::default(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Load state from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).context("Failed to read state file")?;
        let state: Self = serde_json::from_str(&content).context("Failed to parse state file")?;

        info!(
            "Loaded provisioning state: step={:?}, attempt={}",
            state.step, state.attempt_count
        );
        Ok(Some(state))
    }

    /// Save state to its file in the output directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(&self.config.output_dir)
            .context("Failed to create output directory")?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(self.config.state_file(), content).context("Failed to write state file")?;

        Ok(())
    }

    /// Remove the state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed.
    pub fn remove(config: &EgressConfig) -> Result<()> {
        let path = config.state_file();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove state file")?;
        }
        Ok(())
    }

    /// Update the current step and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn set_step(&mut self, step: ProvisionStep) -> Result<()> {
        info!("Step: {} -> {}", self.step, step);
        self.step = step;
        self.attempt_count = 0;
        self.last_error = None;
        self.save()
    }

    /// Advance to the next step.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn advance(&mut self) -> Result<()> {
        let next = self.step.next();
        self.set_step(next)
    }

    /// Record an error for the current step.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn record_error(&mut self, error: &str) -> Result<()> {
        self.last_error = Some(error.to_string());
        self.attempt_count += 1;
        self.save()
    }

    /// Mutate discovered facts and save.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub fn update_facts(&mut self, f: impl FnOnce(&mut DiscoveredFacts)) -> Result<()> {
        f(&mut self.facts);
        self.save()
    }

    /// Check if provisioning is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == ProvisionStep::Complete
    }

    /// Check if we can resume from this state.
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.step != ProvisionStep::NotStarted && self.step != ProvisionStep::Complete
    }

    /// Resource groups this run may have created, cluster group first.
    ///
    /// The target group is listed when the config enables it or when any
    /// target resource was recorded, whichever flags later runs passed.
    #[must_use]
    pub fn resource_groups(&self) -> Vec<String> {
        let facts = &self.facts;
        let target_created = facts.target_vnet_id.is_some()
            || facts.target_subnet_id.is_some()
            || facts.target_ip.is_some();

        let mut groups = vec![self.config.resource_group.clone()];
        if self.config.target.enabled || target_created {
            groups.push(self.config.target.resource_group.clone());
        }
        groups
    }

    /// Fetch a fact recorded by an earlier step.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing fact, which means the state file
    /// was edited or an earlier step was skipped.
    pub fn require<'a, T: ?Sized>(value: Option<&'a T>, what: &str) -> Result<&'a T> {
        value.with_context(|| format!("{what} missing from saved state; re-run from scratch"))
    }
}

/// Retry configuration for whole steps.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(10)).unwrap_or(10);
        let multiplier = self.backoff_multiplier.powi(exp);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry given the current attempt count.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
