//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use egress_azure::{AzureCliCredential, StaticTokenCredential, TokenCredential};

use crate::config::EgressConfig;
use crate::state::ProvisionState;

pub mod check;
pub mod provision;
pub mod render;
pub mod status;
pub mod teardown;
pub mod verify;

/// Where the configuration (and therefore the saved state) comes from.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration file path (TOML).
    #[arg(short, long, value_name = "FILE", env = "EGRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Cluster name, when no config file is used.
    #[arg(long, value_name = "NAME", conflicts_with = "config")]
    cluster_name: Option<String>,

    /// Azure subscription (defaults to the Azure CLI's active one).
    #[arg(long, value_name = "ID", env = "AZURE_SUBSCRIPTION_ID")]
    subscription: Option<String>,

    /// ARM bearer token; the Azure CLI is used when unset.
    #[arg(long, value_name = "TOKEN", env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

impl ConfigArgs {
    /// Build the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a config file nor a cluster name is given,
    /// or the file cannot be loaded.
    pub fn resolve(&self) -> Result<EgressConfig> {
        let mut config = match (&self.config, &self.cluster_name) {
            (Some(path), _) => EgressConfig::load(path)?,
            (None, Some(name)) => EgressConfig::with_defaults(name.clone()),
            (None, None) => {
                anyhow::bail!("Pass --config FILE (or EGRESS_CONFIG) or --cluster-name NAME")
            }
        };

        if let Some(ref subscription) = self.subscription {
            config.subscription_id = Some(subscription.clone());
        }
        Ok(config)
    }

    /// Token source for ARM calls.
    #[must_use]
    pub fn credential(&self) -> Arc<dyn TokenCredential> {
        match self.access_token {
            Some(ref token) => Arc::new(StaticTokenCredential::new(token.clone())),
            None => Arc::new(AzureCliCredential::new()),
        }
    }
}

/// Load the state a previous `provision` left behind.
///
/// # Errors
///
/// Returns an error if there is no saved state for this cluster.
pub fn load_saved_state(config: &EgressConfig) -> Result<ProvisionState> {
    ProvisionState::load(&config.state_file())?.with_context(|| {
        format!(
            "No saved state at {} (run `egress provision` first)",
            config.state_file().display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: Option<PathBuf>, cluster_name: Option<&str>) -> ConfigArgs {
        ConfigArgs {
            config,
            cluster_name: cluster_name.map(str::to_string),
            subscription: Some("sub-override".into()),
            access_token: None,
        }
    }

    #[test]
    fn test_resolve_from_cluster_name() {
        let config = args(None, Some("demo")).resolve().unwrap();
        assert_eq!(config.cluster_name, "demo");
        assert_eq!(config.resource_group, "demo-rg");
        assert_eq!(config.subscription_id.as_deref(), Some("sub-override"));
    }

    #[test]
    fn test_resolve_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("egress.toml");
        std::fs::write(&path, "cluster_name = \"filed\"\nlocation = \"westus2\"\n").unwrap();

        let config = args(Some(path), None).resolve().unwrap();
        assert_eq!(config.cluster_name, "filed");
        assert_eq!(config.location, "westus2");
    }

    #[test]
    fn test_resolve_requires_source() {
        assert!(args(None, None).resolve().is_err());
    }

    #[test]
    fn test_missing_state_is_explained() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EgressConfig::with_defaults("demo".into());
        config.output_dir = dir.path().to_path_buf();

        let err = load_saved_state(&config).unwrap_err();
        assert!(err.to_string().contains("egress provision"));
    }
}
