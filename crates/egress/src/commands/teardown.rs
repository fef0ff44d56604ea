use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use egress_azure::{account_show, AzureClient};
use tracing::info;

use super::ConfigArgs;
use crate::state::ProvisionState;
use crate::ui;

/// Delete the cluster and target resource groups and forget saved state.
#[derive(Args, Debug)]
pub struct TeardownCommand {
    #[command(flatten)]
    source: ConfigArgs,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,

    /// Keep the saved state file.
    #[arg(long)]
    keep_state: bool,
}

impl TeardownCommand {
    /// Run the teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if a deletion request fails.
    pub async fn run(&self) -> Result<()> {
        let config = self.source.resolve()?;

        // Saved state knows what was actually created.
        let saved = ProvisionState::load(&config.state_file())?;
        let subscription = match saved
            .as_ref()
            .and_then(|s| s.facts.subscription_id.clone())
            .or_else(|| config.subscription_id.clone())
        {
            Some(subscription) => subscription,
            None => {
                account_show()
                    .await
                    .context("Azure CLI is not logged in (run `az login`)")?
                    .subscription_id
            }
        };
        let state = saved.unwrap_or_else(|| ProvisionState::new(config));
        let groups = state.resource_groups();
        let config = state.config;

        ui::print_section("Teardown");
        for group in &groups {
            ui::print_kv("Resource group", group);
        }
        println!();

        if !self.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Delete these resource groups and everything in them?")
                .default(false)
                .interact()?;

            if !proceed {
                println!("{}", "Teardown cancelled.".yellow());
                return Ok(());
            }
        }

        let azure = AzureClient::new(subscription, self.source.credential())
            .context("Failed to create Azure client")?;

        for group in &groups {
            if !azure.resource_group_exists(group).await? {
                ui::print_info(&format!("{group} not found, skipping"));
                continue;
            }
            azure
                .delete_resource_group(group)
                .await
                .with_context(|| format!("Failed to delete resource group {group}"))?;
            ui::print_success(&format!("Deletion started for {group}"));
        }
        // AKS removes its node resource group together with the cluster.
        info!(cluster = %config.cluster_name, "Teardown requested");

        if !self.keep_state {
            ProvisionState::remove(&config)?;
            ui::print_info("Removed saved provisioning state");
        }
        Ok(())
    }
}
