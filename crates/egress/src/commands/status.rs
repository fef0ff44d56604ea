use anyhow::Result;
use clap::Args;

use super::{load_saved_state, ConfigArgs};
use crate::state::{ProvisionState, ProvisionStep};
use crate::ui;

/// Show saved provisioning progress and discovered resources.
#[derive(Args, Debug)]
pub struct StatusCommand {
    #[command(flatten)]
    source: ConfigArgs,

    /// Output the raw state as JSON.
    #[arg(long)]
    json: bool,
}

impl StatusCommand {
    /// Print the state.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no saved state.
    pub async fn run(&self) -> Result<()> {
        let config = self.source.resolve()?;
        let state = load_saved_state(&config)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        print_status(&state);
        Ok(())
    }
}

fn print_status(state: &ProvisionState) {
    ui::print_section(&format!("Cluster {}", state.config.cluster_name));

    ui::print_kv(
        "Step",
        &format!(
            "[{}/{}] {}",
            state.step.step_number(),
            ProvisionStep::TOTAL_STEPS,
            state.step
        ),
    );
    ui::print_kv("Updated", &state.updated_at);
    if let Some(ref error) = state.last_error {
        ui::print_error(&format!(
            "Last error (attempt {}): {error}",
            state.attempt_count
        ));
    }

    let facts = &state.facts;
    let rows: [(&str, Option<String>); 9] = [
        ("Subscription", facts.subscription_id.clone()),
        ("Tenant", facts.tenant_id.clone()),
        ("Node resource group", facts.node_resource_group.clone()),
        ("Identity client ID", facts.identity_client_id.clone()),
        ("Gateway scale set", facts.gateway_vmss_name.clone()),
        (
            "Kubeconfig",
            facts.kubeconfig_path.as_ref().map(|p| p.display().to_string()),
        ),
        (
            "Helm values",
            facts.azure_config_path.as_ref().map(|p| p.display().to_string()),
        ),
        ("Target IP", facts.target_ip.clone()),
        (
            "Last verification",
            facts.connectivity.as_ref().map(|r| {
                let verdict = if r.passed() { "passed" } else { "failed" };
                format!("{verdict} at {}", r.checked_at)
            }),
        ),
    ];

    println!();
    for (key, value) in rows {
        if let Some(value) = value {
            ui::print_kv(key, &value);
        }
    }
}
