//! Provisioning orchestration.
//!
//! Drives the cluster, gateway pool, identity, chart, gateway configuration,
//! test pods and external target through [`ProvisionStep`] in order, saving
//! state after each step so a failed run resumes where it stopped.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use egress_azure::{
    account_show, AgentPoolSpec, AzureClient, AzureError, BuiltInRole, ClusterSpec,
    ContainerGroupSpec, Subnet, TokenCredential, ACI_DELEGATION,
};
use futures::future::try_join_all;
use ipnet::Ipv4Net;
use tracing::{error, info, warn};

use crate::config::{EgressConfig, Timeouts, GATEWAY_MODE_KEY};
use crate::connectivity::{curl_command, ConnectivityReport, Observation};
use crate::gateway::{
    build_gateway_configuration, write_azure_config, AzureCloudConfig, DiscoveredAzure,
};
use crate::state::{DiscoveredFacts, ProvisionState, ProvisionStep, RetryConfig};
use crate::validator::PrerequisitesValidator;
use crate::workloads::{self, Workloads, GATEWAY_POD, PLAIN_POD};
use crate::{helm, kubeconfig, ui};

/// Tag stamped on every resource group this tool creates.
const CREATED_BY_TAG: (&str, &str) = ("created-by", "egress-cli");

/// Peering name from the cluster VNET to the target VNET, and back.
const PEERING_TO_TARGET: &str = "cluster-to-target";
const PEERING_TO_CLUSTER: &str = "target-to-cluster";

/// Role assignments the gateway controller's identity needs, as `(scope, role)`.
///
/// The VNET scope covers subnet join for gateway NICs, the node resource
/// group covers the internal load balancer and public IP prefixes, and the
/// scale set scope covers NIC IP configuration updates.
#[must_use]
pub fn gateway_role_assignments(
    vnet_id: &str,
    node_resource_group_scope: &str,
    vmss_id: &str,
) -> [(String, BuiltInRole); 3] {
    [
        (vnet_id.to_string(), BuiltInRole::NetworkContributor),
        (
            node_resource_group_scope.to_string(),
            BuiltInRole::NetworkContributor,
        ),
        (vmss_id.to_string(), BuiltInRole::VirtualMachineContributor),
    ]
}

/// Whether an error is worth retrying the whole step for.
#[must_use]
pub fn is_transient_error(error: &anyhow::Error) -> bool {
    if let Some(azure) = error.chain().find_map(|e| e.downcast_ref::<AzureError>()) {
        return azure.is_transient();
    }

    let msg = format!("{error:#}").to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("too many requests")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("try again")
}

/// Build an ARM client for the subscription recorded in the facts.
///
/// # Errors
///
/// Returns an error if no subscription is known or the HTTP client cannot be built.
pub fn azure_client(
    facts: &DiscoveredFacts,
    credential: Arc<dyn TokenCredential>,
) -> Result<AzureClient> {
    let subscription =
        ProvisionState::require(facts.subscription_id.as_deref(), "subscription ID")?;
    AzureClient::new(subscription, credential).context("Failed to create Azure client")
}

/// Reuse a subnet if it exists with the expected prefix, otherwise create it.
async fn ensure_subnet(
    azure: &AzureClient,
    resource_group: &str,
    vnet: &str,
    name: &str,
    cidr: Ipv4Net,
    delegation: Option<&str>,
) -> Result<Subnet> {
    match azure.get_subnet(resource_group, vnet, name).await {
        Ok(existing) => {
            let prefix: Option<Ipv4Net> = existing.address_prefix.parse().ok();
            if prefix != Some(cidr) {
                bail!(
                    "Subnet {name} exists with prefix {} but {cidr} is configured",
                    existing.address_prefix
                );
            }
            info!(subnet = %name, prefix = %cidr, "Subnet already exists");
            Ok(existing)
        }
        Err(AzureError::NotFound(_)) => Ok(azure
            .create_subnet(resource_group, vnet, name, &cidr.to_string(), delegation)
            .await?),
        Err(e) => Err(e.into()),
    }
}

/// Call the target from both test pods and classify what it saw.
///
/// # Errors
///
/// Returns an error if a required fact is missing or the exec fails.
pub async fn run_connectivity_check(
    config: &EgressConfig,
    facts: &DiscoveredFacts,
) -> Result<ConnectivityReport> {
    let kubeconfig_path = ProvisionState::require(facts.kubeconfig_path.as_deref(), "kubeconfig")?;
    let target_ip: Ipv4Addr = ProvisionState::require(facts.target_ip.as_deref(), "target IP")?
        .parse()
        .context("Saved target IP is not an IPv4 address")?;

    let kube = Workloads::from_kubeconfig(kubeconfig_path).await?;
    let namespace = &config.demo_namespace;
    let command = curl_command(target_ip, config.target.port);

    let mut observations = Vec::with_capacity(2);
    for pod in [GATEWAY_POD, PLAIN_POD] {
        // A failed curl still yields a (failing) observation.
        let (body, error) = match kube.exec_capture(namespace, pod, command.clone()).await {
            Ok(output) => {
                let error = output.error();
                (output.stdout, error)
            }
            Err(e) => {
                warn!(pod, error = %e, "Connectivity exec failed");
                (String::new(), Some(format!("{e:#}")))
            }
        };
        info!(pod, response = %body.trim(), error = ?error, "Target response");
        observations.push(
            Observation::from_response(
                pod,
                &body,
                config.egress_subnet_cidr,
                config.default_subnet_cidr,
            )
            .with_error(error),
        );
    }

    let plain_pod = observations.pop().context("missing plain pod observation")?;
    let gateway_pod = observations
        .pop()
        .context("missing gateway pod observation")?;

    Ok(ConnectivityReport::new(
        format!("{target_ip}:{}", config.target.port),
        gateway_pod,
        plain_pod,
    ))
}

/// Main provisioner that orchestrates the full run.
pub struct Provisioner {
    /// Provisioning state (persisted across runs).
    state: ProvisionState,
    /// Retry configuration for transient errors.
    retry_config: RetryConfig,
    /// ARM token source.
    credential: Arc<dyn TokenCredential>,
    /// Created once the subscription is known.
    azure: Option<AzureClient>,
    /// Whether this invocation runs the connectivity steps. Not persisted.
    connectivity_enabled: bool,
}

impl Provisioner {
    /// Create a new provisioner or resume from existing state.
    ///
    /// Saved state for the same cluster wins over the passed config so a
    /// resumed run keeps the names and ranges it started with. A disabled
    /// connectivity test only skips those steps for this invocation; the
    /// saved config keeps tracking the target.
    ///
    /// # Errors
    ///
    /// Returns an error if state loading fails.
    pub fn new_or_resume(
        config: EgressConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.output_dir).context("Failed to create output directory")?;
        let connectivity_enabled = config.target.enabled;

        let state = match ProvisionState::load(&config.state_file())? {
            Some(mut existing) if existing.can_resume() => {
                ui::print_info(&format!("Resuming provisioning from: {}", existing.step));
                if let Some(ref err) = existing.last_error {
                    ui::print_warning(&format!("Previous error: {err}"));
                }
                existing.config.merge_kubeconfig = config.merge_kubeconfig;
                existing
            }
            Some(existing) if existing.is_complete() => {
                ui::print_success("Provisioning already complete!");
                existing
            }
            _ => ProvisionState::new(config),
        };

        Ok(Self {
            state,
            retry_config: RetryConfig::default(),
            credential,
            azure: None,
            connectivity_enabled,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ProvisionState {
        &self.state
    }

    /// Run provisioning to completion with automatic retry/resume.
    ///
    /// # Errors
    ///
    /// Returns an error if a step fails permanently or exhausts its retries.
    pub async fn run_to_completion(&mut self) -> Result<()> {
        if self.state.is_complete() {
            self.print_success_summary();
            return Ok(());
        }

        ui::print_section("Provisioning Static Egress Gateway");

        loop {
            if self.state.step == ProvisionStep::NotStarted {
                self.state.advance()?;
            }

            if self.should_skip(self.state.step) {
                info!(step = ?self.state.step, "Connectivity test disabled, skipping");
                self.state.advance()?;
                continue;
            }

            if self.state.step != ProvisionStep::Complete {
                ui::print_progress_step(
                    self.state.step.step_number(),
                    ProvisionStep::TOTAL_STEPS,
                    self.state.step.description(),
                );
            }

            match self.execute_current_step().await {
                Ok(()) => {
                    if self.state.is_complete() {
                        self.print_success_summary();
                        return Ok(());
                    }
                    self.state.advance()?;
                }
                Err(e) => {
                    self.state.record_error(&format!("{e:#}"))?;

                    if is_transient_error(&e)
                        && self.retry_config.should_retry(self.state.attempt_count)
                    {
                        let delay = self
                            .retry_config
                            .delay_for_attempt(self.state.attempt_count);
                        warn!(
                            attempt = self.state.attempt_count,
                            error = %e,
                            delay_secs = delay.as_secs(),
                            "Transient error, retrying"
                        );
                        ui::print_warning(&format!(
                            "Transient error (attempt {}): {e:#}",
                            self.state.attempt_count
                        ));
                        ui::print_info(&format!("Retrying in {} seconds...", delay.as_secs()));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    error!(step = ?self.state.step, error = %e, "Provisioning failed");
                    ui::print_error(&format!(
                        "Provisioning failed at step '{}': {e:#}",
                        self.state.step
                    ));
                    ui::print_info("State has been saved. Re-run the same command to resume.");
                    return Err(e);
                }
            }
        }
    }

    fn should_skip(&self, step: ProvisionStep) -> bool {
        step.is_connectivity_test()
            && !(self.connectivity_enabled && self.state.config.target.enabled)
    }

    /// Execute the current step.
    async fn execute_current_step(&mut self) -> Result<()> {
        info!(step = ?self.state.step, "Executing step");

        match self.state.step {
            ProvisionStep::NotStarted | ProvisionStep::Complete => {}
            ProvisionStep::ValidatingPrerequisites => self.validate_prerequisites().await?,
            ProvisionStep::CreatingResourceGroup => self.create_resource_group().await?,
            ProvisionStep::CreatingVirtualNetwork => self.create_virtual_network().await?,
            ProvisionStep::CreatingSubnets => self.create_subnets().await?,
            ProvisionStep::CreatingCluster => self.create_cluster().await?,
            ProvisionStep::WaitingClusterReady => self.wait_cluster_ready().await?,
            ProvisionStep::CreatingGatewayNodePool => self.create_gateway_pool().await?,
            ProvisionStep::WaitingNodePoolReady => self.wait_gateway_pool_ready().await?,
            ProvisionStep::CreatingIdentity => self.create_identity().await?,
            ProvisionStep::ResolvingGatewayScaleSet => self.resolve_gateway_scale_set().await?,
            ProvisionStep::AssigningRoles => self.assign_roles().await?,
            ProvisionStep::FetchingCredentials => self.fetch_credentials().await?,
            ProvisionStep::RenderingAzureConfig => self.render_azure_config()?,
            ProvisionStep::InstallingGatewayChart => self.install_gateway_chart().await?,
            ProvisionStep::CreatingStaticGateway => self.create_static_gateway().await?,
            ProvisionStep::DeployingTestPods => self.deploy_test_pods().await?,
            ProvisionStep::ProvisioningTarget => self.provision_target().await?,
            ProvisionStep::PeeringNetworks => self.peer_networks().await?,
            ProvisionStep::VerifyingConnectivity => self.verify_connectivity().await?,
        }

        Ok(())
    }

    fn azure(&mut self) -> Result<AzureClient> {
        if let Some(ref client) = self.azure {
            return Ok(client.clone());
        }
        let client = azure_client(&self.state.facts, Arc::clone(&self.credential))?;
        self.azure = Some(client.clone());
        Ok(client)
    }

    fn config(&self) -> &EgressConfig {
        &self.state.config
    }

    // --- Prerequisites ---

    async fn validate_prerequisites(&mut self) -> Result<()> {
        PrerequisitesValidator::new().validate()?;
        self.state.config.validate()?;

        let account = account_show()
            .await
            .context("Azure CLI is not logged in (run `az login`)")?;
        let subscription = self
            .state
            .config
            .subscription_id
            .clone()
            .unwrap_or(account.subscription_id);

        ui::print_kv("Subscription", &subscription);
        ui::print_kv("Tenant", &account.tenant_id);

        self.azure = None;
        self.state.update_facts(|facts| {
            facts.subscription_id = Some(subscription);
            facts.tenant_id = Some(account.tenant_id);
        })
    }

    // --- Network ---

    async fn create_resource_group(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();
        let tags = HashMap::from([
            (CREATED_BY_TAG.0.to_string(), CREATED_BY_TAG.1.to_string()),
            ("cluster".to_string(), config.cluster_name.clone()),
        ]);
        azure
            .create_resource_group(&config.resource_group, &config.location, tags)
            .await?;
        Ok(())
    }

    async fn create_virtual_network(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        // A PUT without subnets would try to delete existing ones.
        let vnet = match azure
            .get_virtual_network(&config.resource_group, &config.vnet_name)
            .await
        {
            Ok(vnet) => {
                info!(vnet = %vnet.name, "Virtual network already exists");
                vnet
            }
            Err(AzureError::NotFound(_)) => {
                azure
                    .create_virtual_network(
                        &config.resource_group,
                        &config.vnet_name,
                        &config.location,
                        vec![config.vnet_cidr.to_string()],
                    )
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        self.state.update_facts(|facts| facts.vnet_id = Some(vnet.id))
    }

    async fn create_subnets(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        // Sequential: ARM serialises writes to one VNET anyway.
        let default = ensure_subnet(
            &azure,
            &config.resource_group,
            &config.vnet_name,
            &config.default_subnet_name,
            config.default_subnet_cidr,
            None,
        )
        .await?;
        let egress = ensure_subnet(
            &azure,
            &config.resource_group,
            &config.vnet_name,
            &config.egress_subnet_name,
            config.egress_subnet_cidr,
            None,
        )
        .await?;

        self.state.update_facts(|facts| {
            facts.default_subnet_id = Some(default.id);
            facts.egress_subnet_id = Some(egress.id);
        })
    }

    // --- Cluster ---

    async fn create_cluster(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();
        let subnet_id =
            ProvisionState::require(self.state.facts.default_subnet_id.as_deref(), "default subnet ID")?;

        let spec = ClusterSpec {
            name: config.cluster_name.clone(),
            location: config.location.clone(),
            kubernetes_version: config.kubernetes_version.clone(),
            system_pool_name: config.system_pool_name.clone(),
            node_count: i32::from(config.node_count),
            node_vm_size: config.node_vm_size.clone(),
            vnet_subnet_id: subnet_id.to_string(),
            service_cidr: config.service_cidr.to_string(),
            dns_service_ip: config.dns_service_ip.to_string(),
        };

        // A PUT on an existing cluster would list only the system pool.
        let cluster = match azure
            .get_cluster(&config.resource_group, &config.cluster_name)
            .await
        {
            Ok(existing) => {
                info!(
                    cluster = %existing.name,
                    state = ?existing.provisioning_state(),
                    "AKS cluster already exists"
                );
                existing
            }
            Err(AzureError::NotFound(_)) => {
                azure.create_cluster(&config.resource_group, &spec).await?
            }
            Err(e) => return Err(e.into()),
        };
        self.state.update_facts(|facts| facts.cluster_id = Some(cluster.id))
    }

    async fn wait_cluster_ready(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        ui::print_info("AKS cluster creation usually takes 5-10 minutes...");
        let cluster = azure
            .wait_cluster_ready(
                &config.resource_group,
                &config.cluster_name,
                Timeouts::duration(config.timeouts.cluster_minutes),
            )
            .await?;

        let node_rg = cluster
            .properties
            .node_resource_group
            .context("Cluster has no node resource group")?;
        ui::print_kv("Node resource group", &node_rg);

        self.state.update_facts(|facts| {
            facts.cluster_id = Some(cluster.id);
            facts.node_resource_group = Some(node_rg);
        })
    }

    async fn create_gateway_pool(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();
        let subnet_id =
            ProvisionState::require(self.state.facts.egress_subnet_id.as_deref(), "egress subnet ID")?;

        let spec = AgentPoolSpec {
            name: config.gateway_pool_name.clone(),
            node_count: i32::from(config.gateway_node_count),
            vm_size: config.gateway_vm_size.clone(),
            vnet_subnet_id: subnet_id.to_string(),
            taints: vec![config.gateway_taint()],
            labels: HashMap::from([(GATEWAY_MODE_KEY.to_string(), "true".to_string())]),
        };

        match azure
            .get_agent_pool(&config.resource_group, &config.cluster_name, &spec.name)
            .await
        {
            Ok(existing) => info!(
                pool = %existing.name,
                state = ?existing.provisioning_state(),
                "Gateway node pool already exists"
            ),
            Err(AzureError::NotFound(_)) => {
                azure
                    .create_agent_pool(&config.resource_group, &config.cluster_name, &spec)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn wait_gateway_pool_ready(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        azure
            .wait_agent_pool_ready(
                &config.resource_group,
                &config.cluster_name,
                &config.gateway_pool_name,
                Timeouts::duration(config.timeouts.node_pool_minutes),
            )
            .await?;
        Ok(())
    }

    // --- Identity ---

    async fn create_identity(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        let identity = azure
            .create_user_assigned_identity(
                &config.resource_group,
                &config.identity_name,
                &config.location,
            )
            .await?;
        ui::print_kv("Identity client ID", &identity.client_id);

        self.state.update_facts(|facts| {
            facts.identity_resource_id = Some(identity.resource_id);
            facts.identity_client_id = Some(identity.client_id);
            facts.identity_principal_id = Some(identity.principal_id);
            if facts.tenant_id.is_none() {
                facts.tenant_id = Some(identity.tenant_id);
            }
        })
    }

    async fn resolve_gateway_scale_set(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let node_rg = ProvisionState::require(
            self.state.facts.node_resource_group.as_deref(),
            "node resource group",
        )?;

        let scale_set = azure
            .find_pool_scale_set(node_rg, &self.state.config.gateway_pool_name)
            .await?;
        ui::print_kv("Gateway scale set", &scale_set.name);

        self.state.update_facts(|facts| {
            facts.gateway_vmss_name = Some(scale_set.name);
            facts.gateway_vmss_id = Some(scale_set.id);
        })
    }

    async fn assign_roles(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let facts = &self.state.facts;
        let principal =
            ProvisionState::require(facts.identity_principal_id.as_deref(), "identity principal ID")?;
        let vnet_id = ProvisionState::require(facts.vnet_id.as_deref(), "VNET ID")?;
        let node_rg =
            ProvisionState::require(facts.node_resource_group.as_deref(), "node resource group")?;
        let vmss_id = ProvisionState::require(facts.gateway_vmss_id.as_deref(), "gateway VMSS ID")?;

        for (scope, role) in
            gateway_role_assignments(vnet_id, &azure.resource_group_scope(node_rg), vmss_id)
        {
            azure.assign_role(&scope, role, principal).await?;
            ui::print_check_result(&role.to_string(), true, Some(egress_azure::resource_name(&scope)));
        }
        Ok(())
    }

    // --- Gateway install ---

    async fn fetch_credentials(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();

        let content = azure
            .get_user_kubeconfig(&config.resource_group, &config.cluster_name)
            .await?;
        let path = config.kubeconfig_path();
        kubeconfig::write_kubeconfig(&path, &content)?;

        if config.merge_kubeconfig {
            let merged = kubeconfig::merge_kubeconfig(&path, &config.cluster_name)?;
            ui::print_info(&format!("Merged kubeconfig into {}", merged.display()));
        }

        let kube = Workloads::from_kubeconfig(&path).await?;
        let nodes = kube.check_gateway_nodes(&config.gateway_pool_name).await?;
        ui::print_check_result(
            "Gateway nodes tainted and labelled",
            true,
            Some(&format!("{nodes} node(s)")),
        );

        self.state.update_facts(|facts| facts.kubeconfig_path = Some(path))
    }

    fn render_azure_config(&mut self) -> Result<()> {
        let facts = &self.state.facts;
        let discovered = DiscoveredAzure {
            subscription_id: ProvisionState::require(facts.subscription_id.as_deref(), "subscription ID")?,
            tenant_id: ProvisionState::require(facts.tenant_id.as_deref(), "tenant ID")?,
            identity_client_id: ProvisionState::require(
                facts.identity_client_id.as_deref(),
                "identity client ID",
            )?,
            node_resource_group: ProvisionState::require(
                facts.node_resource_group.as_deref(),
                "node resource group",
            )?,
        };

        let cloud_config = AzureCloudConfig::new(&self.state.config, &discovered);
        let path = self.state.config.azure_config_path();
        write_azure_config(&path, &cloud_config)?;
        ui::print_kv("Helm values", &path.display().to_string());

        self.state.update_facts(|facts| facts.azure_config_path = Some(path))
    }

    async fn install_gateway_chart(&mut self) -> Result<()> {
        let config = self.config().clone();
        let facts = &self.state.facts;
        let values = ProvisionState::require(facts.azure_config_path.as_deref(), "azure config path")?;
        let kubeconfig_path = ProvisionState::require(facts.kubeconfig_path.as_deref(), "kubeconfig")?;

        let chart_dir = helm::fetch_chart(&config.chart, &config.chart_checkout_dir()).await?;
        helm::install_gateway_chart(
            &config.chart,
            &chart_dir,
            values,
            kubeconfig_path,
            Timeouts::duration(config.timeouts.helm_minutes),
        )
        .await?;

        self.state.update_facts(|facts| facts.chart_path = Some(chart_dir))
    }

    async fn create_static_gateway(&mut self) -> Result<()> {
        let config = self.config();
        let facts = &self.state.facts;
        let kubeconfig_path = ProvisionState::require(facts.kubeconfig_path.as_deref(), "kubeconfig")?;
        let vmss_name =
            ProvisionState::require(facts.gateway_vmss_name.as_deref(), "gateway VMSS name")?;
        let node_rg =
            ProvisionState::require(facts.node_resource_group.as_deref(), "node resource group")?;

        let kube = Workloads::from_kubeconfig(kubeconfig_path).await?;
        kube.ensure_namespace(&config.demo_namespace).await?;

        let gateway = build_gateway_configuration(config, vmss_name, node_rg);
        kube.apply_gateway(&gateway).await?;

        let prefix = kube
            .wait_gateway_ready(
                &config.demo_namespace,
                &config.gateway_name,
                Timeouts::duration(config.timeouts.pod_minutes),
            )
            .await?;
        ui::print_kv("Gateway egress prefix", &prefix);
        Ok(())
    }

    async fn deploy_test_pods(&mut self) -> Result<()> {
        let config = self.config();
        let kubeconfig_path =
            ProvisionState::require(self.state.facts.kubeconfig_path.as_deref(), "kubeconfig")?;

        let kube = Workloads::from_kubeconfig(kubeconfig_path).await?;
        let pods = workloads::test_pods(config);
        try_join_all(pods.iter().map(|pod| kube.apply_pod(pod))).await?;

        let timeout = Timeouts::duration(config.timeouts.pod_minutes);
        try_join_all(
            [GATEWAY_POD, PLAIN_POD]
                .map(|name| kube.wait_pod_running(&config.demo_namespace, name, timeout)),
        )
        .await?;
        Ok(())
    }

    // --- External target ---

    async fn provision_target(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();
        let target = &config.target;

        let tags = HashMap::from([
            (CREATED_BY_TAG.0.to_string(), CREATED_BY_TAG.1.to_string()),
            ("cluster".to_string(), config.cluster_name.clone()),
        ]);
        azure
            .create_resource_group(&target.resource_group, &config.location, tags)
            .await?;

        let vnet = match azure
            .get_virtual_network(&target.resource_group, &target.vnet_name)
            .await
        {
            Ok(vnet) => vnet,
            Err(AzureError::NotFound(_)) => {
                azure
                    .create_virtual_network(
                        &target.resource_group,
                        &target.vnet_name,
                        &config.location,
                        vec![target.vnet_cidr.to_string()],
                    )
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let subnet = ensure_subnet(
            &azure,
            &target.resource_group,
            &target.vnet_name,
            &target.subnet_name,
            target.subnet_cidr,
            Some(ACI_DELEGATION),
        )
        .await?;

        let spec = ContainerGroupSpec {
            name: target.container_name.clone(),
            location: config.location.clone(),
            image: target.image.clone(),
            port: target.port,
            subnet_id: subnet.id.clone(),
        };
        // Re-applying a running group restarts it.
        match azure
            .get_container_group(&target.resource_group, &target.container_name)
            .await
        {
            Ok(existing) => info!(name = %existing.name, "Container group already exists"),
            Err(AzureError::NotFound(_)) => {
                azure
                    .create_container_group(&target.resource_group, &spec)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
        let ip = azure
            .wait_container_group_ready(
                &target.resource_group,
                &target.container_name,
                Timeouts::duration(config.timeouts.container_minutes),
            )
            .await?;
        ui::print_kv("Target address", &format!("{ip}:{}", target.port));

        self.state.update_facts(|facts| {
            facts.target_vnet_id = Some(vnet.id);
            facts.target_subnet_id = Some(subnet.id);
            facts.target_ip = Some(ip);
        })
    }

    async fn peer_networks(&mut self) -> Result<()> {
        let azure = self.azure()?;
        let config = self.config();
        let facts = &self.state.facts;
        let vnet_id = ProvisionState::require(facts.vnet_id.as_deref(), "VNET ID")?;
        let target_vnet_id = ProvisionState::require(facts.target_vnet_id.as_deref(), "target VNET ID")?;

        azure
            .create_peering(
                &config.resource_group,
                &config.vnet_name,
                PEERING_TO_TARGET,
                target_vnet_id,
            )
            .await?;
        azure
            .create_peering(
                &config.target.resource_group,
                &config.target.vnet_name,
                PEERING_TO_CLUSTER,
                vnet_id,
            )
            .await?;

        // Each direction stays `Initiated` until the other one exists.
        let timeout = Timeouts::duration(config.timeouts.peering_minutes);
        azure
            .wait_peering_connected(
                &config.resource_group,
                &config.vnet_name,
                PEERING_TO_TARGET,
                timeout,
            )
            .await?;
        azure
            .wait_peering_connected(
                &config.target.resource_group,
                &config.target.vnet_name,
                PEERING_TO_CLUSTER,
                timeout,
            )
            .await?;
        ui::print_check_result("VNET peering", true, Some("Connected in both directions"));
        Ok(())
    }

    async fn verify_connectivity(&mut self) -> Result<()> {
        let report = run_connectivity_check(&self.state.config, &self.state.facts).await?;
        ui::print_connectivity_report(&report);

        let failures = report.failures();
        self.state
            .update_facts(|facts| facts.connectivity = Some(report))?;

        if !failures.is_empty() {
            anyhow::bail!("Egress verification failed: {}", failures.join("; "));
        }
        Ok(())
    }

    /// Print success summary at the end.
    fn print_success_summary(&self) {
        let config = &self.state.config;
        let facts = &self.state.facts;

        ui::print_section("Provisioning Complete!");
        ui::print_success("Static egress gateway is ready.");

        ui::print_kv("Cluster", &config.cluster_name);
        ui::print_kv("Resource group", &config.resource_group);
        if let Some(ref node_rg) = facts.node_resource_group {
            ui::print_kv("Node resource group", node_rg);
        }
        if let Some(ref vmss) = facts.gateway_vmss_name {
            ui::print_kv("Gateway scale set", vmss);
        }
        if let Some(ref kc) = facts.kubeconfig_path {
            ui::print_kv("Kubeconfig", &kc.display().to_string());
        }
        if let Some(ref report) = facts.connectivity {
            ui::print_connectivity_report(report);
        }

        ui::print_section("Quick Start");
        ui::print_info(&format!(
            "Annotate a pod with {}: {} to route its egress through the gateway.",
            config.annotation.key(),
            config.gateway_name
        ));
        ui::print_info("Re-check the source addresses with: egress verify");
        ui::print_info("Remove everything with: egress teardown");
    }
}
