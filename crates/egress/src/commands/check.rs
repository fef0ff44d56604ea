use anyhow::{Context, Result};
use clap::Args;
use egress_azure::account_show;

use crate::ui;
use crate::validator::PrerequisitesValidator;

/// Check local tools and the Azure CLI login.
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// Only check tools on PATH, not the Azure login.
    #[arg(long)]
    offline: bool,
}

impl CheckCommand {
    /// Run the checks.
    ///
    /// # Errors
    ///
    /// Returns an error if a critical tool is missing or the CLI is not logged in.
    pub async fn run(&self) -> Result<()> {
        ui::print_section("Prerequisites");
        PrerequisitesValidator::new().validate()?;

        if self.offline {
            return Ok(());
        }

        let account = account_show()
            .await
            .context("Azure CLI is not logged in (run `az login`)")?;
        ui::print_check_result("Azure login", true, Some(&account.name));
        ui::print_kv("Subscription", &account.subscription_id);
        ui::print_kv("Tenant", &account.tenant_id);
        Ok(())
    }
}
