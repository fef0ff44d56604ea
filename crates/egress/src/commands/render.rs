use anyhow::{Context, Result};
use clap::Args;

use super::{load_saved_state, ConfigArgs};
use crate::gateway::{build_gateway_configuration, render_azure_config, AzureCloudConfig, DiscoveredAzure};
use crate::state::ProvisionState;
use crate::workloads;

/// Print the Helm values and Kubernetes manifests for a provisioned cluster.
#[derive(Args, Debug)]
pub struct RenderCommand {
    #[command(flatten)]
    source: ConfigArgs,
}

impl RenderCommand {
    /// Print the rendered documents.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning has not discovered the required values yet.
    pub async fn run(&self) -> Result<()> {
        let config = self.source.resolve()?;
        let state = load_saved_state(&config)?;
        print!("{}", render_documents(&state)?);
        Ok(())
    }
}

/// `azure_config.yaml`, the gateway configuration and test pods as one YAML stream.
///
/// # Errors
///
/// Returns an error naming the first missing fact.
pub fn render_documents(state: &ProvisionState) -> Result<String> {
    let facts = &state.facts;
    let node_rg =
        ProvisionState::require(facts.node_resource_group.as_deref(), "node resource group")?;

    let discovered = DiscoveredAzure {
        subscription_id: ProvisionState::require(facts.subscription_id.as_deref(), "subscription ID")?,
        tenant_id: ProvisionState::require(facts.tenant_id.as_deref(), "tenant ID")?,
        identity_client_id: ProvisionState::require(
            facts.identity_client_id.as_deref(),
            "identity client ID",
        )?,
        node_resource_group: node_rg,
    };
    let vmss_name =
        ProvisionState::require(facts.gateway_vmss_name.as_deref(), "gateway VMSS name")?;

    let mut out = format!("# {}\n", state.config.azure_config_path().display());
    out.push_str(&render_azure_config(&AzureCloudConfig::new(
        &state.config,
        &discovered,
    ))?);

    let mut manifests = vec![serde_yaml::to_string(&build_gateway_configuration(
        &state.config,
        vmss_name,
        node_rg,
    ))
    .context("Failed to render StaticGatewayConfiguration")?];
    for pod in workloads::test_pods(&state.config) {
        manifests.push(serde_yaml::to_string(&pod).context("Failed to render test pod")?);
    }

    for manifest in manifests {
        out.push_str("---\n");
        out.push_str(&manifest);
    }
    Ok(out)
}
