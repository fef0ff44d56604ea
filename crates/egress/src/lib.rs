//! AKS static egress gateway provisioner library.
//!
//! Provides the resumable provisioning flow behind the `egress` binary so it
//! can be driven from other crates.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use egress_azure::AzureCliCredential;
//! use egress_cli::{EgressConfig, Provisioner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EgressConfig::with_defaults("my-cluster".into());
//!     let mut provisioner =
//!         Provisioner::new_or_resume(config, Arc::new(AzureCliCredential::new()))?;
//!     provisioner.run_to_completion().await?;
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Subcommands share an async signature even when they do not await
#![allow(clippy::unused_async)]

pub mod commands;
pub mod config;
pub mod connectivity;
pub mod gateway;
pub mod helm;
pub mod kubeconfig;
pub mod orchestrator;
pub mod state;
pub mod ui;
pub mod validator;
pub mod workloads;

// Re-export commonly used types at the crate root
pub use config::EgressConfig;
pub use connectivity::ConnectivityReport;
pub use gateway::{AzureCloudConfig, PodAnnotation, StaticGatewayConfiguration};
pub use orchestrator::Provisioner;
pub use state::{ProvisionState, ProvisionStep};
