use anyhow::Result;
use colored::Colorize;
use std::process::Command;

use crate::ui;

/// Validates the local tools provisioning shells out to.
pub struct PrerequisitesValidator {
    requirements: Vec<Requirement>,
}

struct Requirement {
    name: &'static str,
    binary: &'static str,
    version_args: &'static [&'static str],
    install_instructions: &'static str,
    critical: bool,
}

impl Requirement {
    /// Tool is on `PATH` and answers its version command.
    fn check(&self) -> Result<String> {
        let path = which::which(self.binary)
            .map_err(|_| anyhow::anyhow!("{} not found on PATH", self.binary))?;

        let output = Command::new(&path).args(self.version_args).output()?;
        if !output.status.success() {
            anyhow::bail!("{} {} failed", self.binary, self.version_args.join(" "));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl PrerequisitesValidator {
    pub fn new() -> Self {
        let requirements = vec![
            Requirement {
                name: "Azure CLI",
                binary: "az",
                version_args: &["version", "--output", "tsv"],
                install_instructions:
                    "Install the Azure CLI from https://learn.microsoft.com/cli/azure/install-azure-cli",
                critical: true,
            },
            Requirement {
                name: "kubectl",
                binary: "kubectl",
                version_args: &["version", "--client"],
                install_instructions: "Install kubectl from https://kubernetes.io/docs/tasks/tools/",
                critical: true,
            },
            Requirement {
                name: "Helm",
                binary: "helm",
                version_args: &["version", "--short"],
                install_instructions: "Install Helm from https://helm.sh/docs/intro/install/",
                critical: true,
            },
            Requirement {
                name: "git",
                binary: "git",
                version_args: &["--version"],
                install_instructions: "Install git to fetch the kube-egress-gateway chart",
                critical: true,
            },
        ];

        Self { requirements }
    }

    /// Check every tool, print the results, and fail if a critical one is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any critical tool is missing or broken.
    pub fn validate(&self) -> Result<()> {
        println!();
        let mut failures = Vec::new();

        for requirement in &self.requirements {
            match requirement.check() {
                Ok(version) => {
                    let version = (!version.is_empty()).then_some(version.as_str());
                    ui::print_check_result(requirement.name, true, version);
                }
                Err(e) => {
                    tracing::debug!(tool = requirement.binary, error = %e, "Prerequisite check failed");
                    ui::print_check_result(requirement.name, false, None);
                    failures.push(requirement);
                }
            }
        }

        println!();

        if failures.is_empty() {
            ui::print_success("All prerequisites met!");
            return Ok(());
        }

        ui::print_warning("Some prerequisites are not met:");
        println!();
        for failure in &failures {
            if failure.critical {
                println!(
                    "  {} {} - {}",
                    "✗".red(),
                    failure.name.red(),
                    failure.install_instructions.bright_black()
                );
            } else {
                println!(
                    "  {} {} - {}",
                    "⚠".yellow(),
                    failure.name.yellow(),
                    failure.install_instructions.bright_black()
                );
            }
        }
        println!();

        if failures.iter().any(|f| f.critical) {
            return Err(anyhow::anyhow!(
                "Critical prerequisites not met. Please install the required tools and try again."
            ));
        }

        Ok(())
    }
}

impl Default for PrerequisitesValidator {
    fn default() -> Self {
        Self::new()
    }
}
