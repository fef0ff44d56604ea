use anyhow::Result;
use clap::Args;

use super::{load_saved_state, ConfigArgs};
use crate::orchestrator::run_connectivity_check;
use crate::state::ProvisionStep;
use crate::ui;

/// Re-run the egress source check against the saved target.
#[derive(Args, Debug)]
pub struct VerifyCommand {
    #[command(flatten)]
    source: ConfigArgs,

    /// Output the report as JSON.
    #[arg(long)]
    json: bool,
}

impl VerifyCommand {
    /// Run the verification.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning has not reached the target yet or the check fails.
    pub async fn run(&self) -> Result<()> {
        let config = self.source.resolve()?;
        let mut state = load_saved_state(&config)?;

        if state.step < ProvisionStep::VerifyingConnectivity {
            anyhow::bail!(
                "Provisioning stopped at '{}'; the target is not ready yet",
                state.step
            );
        }
        if !state.config.target.enabled {
            anyhow::bail!("Connectivity test was skipped for this cluster");
        }

        let report = run_connectivity_check(&state.config, &state.facts).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            ui::print_section("Egress Verification");
            ui::print_connectivity_report(&report);
        }

        let passed = report.passed();
        state.update_facts(|facts| facts.connectivity = Some(report))?;

        if passed {
            Ok(())
        } else {
            anyhow::bail!("Egress verification failed")
        }
    }
}
