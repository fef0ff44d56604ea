use anyhow::Result;
use clap::Args;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};

use super::ConfigArgs;
use crate::config::EgressConfig;
use crate::orchestrator::Provisioner;
use crate::ui;

/// Provision the cluster, gateway pool, controller and connectivity test.
#[derive(Args, Debug)]
pub struct ProvisionCommand {
    #[command(flatten)]
    source: ConfigArgs,

    /// Azure region (overrides the config file).
    #[arg(short, long, value_name = "REGION")]
    location: Option<String>,

    /// Kubernetes version (overrides the config file).
    #[arg(long, value_name = "VERSION")]
    kubernetes_version: Option<String>,

    /// Gateway pool node count (overrides the config file).
    #[arg(long, value_name = "N")]
    gateway_node_count: Option<u8>,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,

    /// Do not create the external target or verify egress addresses.
    #[arg(long)]
    skip_connectivity_test: bool,

    /// Merge the cluster kubeconfig into ~/.kube/config.
    #[arg(long)]
    merge_kubeconfig: bool,
}

impl ProvisionCommand {
    fn apply_overrides(&self, config: &mut EgressConfig) {
        if let Some(ref location) = self.location {
            config.location.clone_from(location);
        }
        if let Some(ref version) = self.kubernetes_version {
            config.kubernetes_version = Some(version.clone());
        }
        if let Some(count) = self.gateway_node_count {
            config.gateway_node_count = count;
        }
        if self.skip_connectivity_test {
            config.target.enabled = false;
        }
        if self.merge_kubeconfig {
            config.merge_kubeconfig = true;
        }
    }

    /// Run provisioning.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or provisioning fails.
    pub async fn run(&self) -> Result<()> {
        ui::print_banner();

        let mut config = self.source.resolve()?;
        self.apply_overrides(&mut config);
        config.validate()?;

        print_config_summary(&config);

        if !self.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Create these Azure resources?")
                .default(true)
                .interact()?;

            if !proceed {
                println!("{}", "Provisioning cancelled.".yellow());
                return Ok(());
            }
        }

        let mut provisioner = Provisioner::new_or_resume(config, self.source.credential())?;
        provisioner.run_to_completion().await
    }
}

fn print_config_summary(config: &EgressConfig) {
    ui::print_section("Configuration");
    ui::print_kv("Cluster", &config.cluster_name);
    ui::print_kv("Resource group", &config.resource_group);
    ui::print_kv("Location", &config.location);
    ui::print_kv(
        "Cluster VNET",
        &format!("{} ({})", config.vnet_name, config.vnet_cidr),
    );
    ui::print_kv(
        "Default subnet",
        &format!("{} ({})", config.default_subnet_name, config.default_subnet_cidr),
    );
    ui::print_kv(
        "Egress subnet",
        &format!("{} ({})", config.egress_subnet_name, config.egress_subnet_cidr),
    );
    ui::print_kv(
        "Gateway pool",
        &format!(
            "{} x{} {}",
            config.gateway_pool_name, config.gateway_node_count, config.gateway_vm_size
        ),
    );
    ui::print_kv(
        "Chart",
        &format!("{}@{}", config.chart.repo_url, config.chart.git_ref),
    );
    if config.target.enabled {
        ui::print_kv(
            "Target",
            &format!("{} ({})", config.target.resource_group, config.target.vnet_cidr),
        );
    } else {
        ui::print_kv("Target", "connectivity test skipped");
    }
    ui::print_kv("Output", &config.output_dir.display().to_string());
    println!();
}
