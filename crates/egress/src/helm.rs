//! kube-egress-gateway chart checkout and Helm release.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ChartConfig;

/// Run a command and return stdout, failing with stderr on non-zero exit.
async fn run(program: &str, args: &[String], kubeconfig: Option<&Path>) -> Result<String> {
    debug!(program, args = ?args, "Running command");

    let mut command = Command::new(program);
    command.args(args);
    if let Some(kubeconfig) = kubeconfig {
        command.env("KUBECONFIG", kubeconfig);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to execute {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{program} failed: {}", stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Arguments for a shallow clone of the chart repository.
#[must_use]
pub fn clone_args(chart: &ChartConfig, checkout_dir: &Path) -> Vec<String> {
    vec![
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        "--branch".to_string(),
        chart.git_ref.clone(),
        chart.repo_url.clone(),
        checkout_dir.display().to_string(),
    ]
}

/// Arguments for an idempotent `helm upgrade --install`.
#[must_use]
pub fn upgrade_install_args(
    chart: &ChartConfig,
    chart_dir: &Path,
    values_file: &Path,
    timeout: Duration,
) -> Vec<String> {
    vec![
        "upgrade".to_string(),
        "--install".to_string(),
        chart.release_name.clone(),
        chart_dir.display().to_string(),
        "--namespace".to_string(),
        chart.namespace.clone(),
        "--create-namespace".to_string(),
        "--set".to_string(),
        format!("common.imageRepository={}", chart.image_repository),
        "--set".to_string(),
        format!("common.imageTag={}", chart.image_tag),
        "-f".to_string(),
        values_file.display().to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        format!("{}s", timeout.as_secs()),
    ]
}

/// Clone the chart repository unless a checkout already exists.
///
/// Returns the chart directory inside the checkout.
///
/// # Errors
///
/// Returns an error if `git clone` fails or the chart is missing from the checkout.
pub async fn fetch_chart(chart: &ChartConfig, checkout_dir: &Path) -> Result<PathBuf> {
    if checkout_dir.join(".git").exists() {
        info!(dir = %checkout_dir.display(), "Chart checkout already present");
    } else {
        if checkout_dir.exists() {
            std::fs::remove_dir_all(checkout_dir)
                .context("Failed to remove incomplete chart checkout")?;
        }
        info!(repo = %chart.repo_url, git_ref = %chart.git_ref, "Cloning kube-egress-gateway");
        run("git", &clone_args(chart, checkout_dir), None).await?;
    }

    let chart_dir = checkout_dir.join(&chart.chart_path);
    if !chart_dir.join("Chart.yaml").exists() {
        anyhow::bail!(
            "No Chart.yaml under {} (check chart.chart_path)",
            chart_dir.display()
        );
    }
    Ok(chart_dir)
}

/// Install or upgrade the gateway release and wait for it to become ready.
///
/// # Errors
///
/// Returns an error if helm fails.
pub async fn install_gateway_chart(
    chart: &ChartConfig,
    chart_dir: &Path,
    values_file: &Path,
    kubeconfig: &Path,
    timeout: Duration,
) -> Result<()> {
    info!(
        release = %chart.release_name,
        namespace = %chart.namespace,
        "Installing kube-egress-gateway"
    );
    run(
        "helm",
        &upgrade_install_args(chart, chart_dir, values_file, timeout),
        Some(kubeconfig),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_install_args() {
        let chart = ChartConfig::default();
        let args = upgrade_install_args(
            &chart,
            Path::new("/tmp/chart/helm/kube-egress-gateway"),
            Path::new("/tmp/azure_config.yaml"),
            Duration::from_secs(600),
        );

        assert_eq!(&args[..3], ["upgrade", "--install", "kube-egress-gateway"]);
        assert!(args.contains(&"--create-namespace".to_string()));
        assert!(args.contains(&"common.imageRepository=mcr.microsoft.com/aks".to_string()));
        assert!(args.contains(&format!("common.imageTag={}", chart.image_tag)));

        let values = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[values + 1], "/tmp/azure_config.yaml");
        assert_eq!(args.last().unwrap(), "600s");
    }

    #[test]
    fn test_clone_args_are_shallow() {
        let chart = ChartConfig::default();
        let args = clone_args(&chart, Path::new("/tmp/checkout"));
        assert_eq!(
            args,
            [
                "clone",
                "--depth",
                "1",
                "--branch",
                "main",
                "https://github.com/Azure/kube-egress-gateway.git",
                "/tmp/checkout"
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_chart_reuses_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let chart = ChartConfig::default();
        let chart_dir = dir.path().join(&chart.chart_path);
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(&chart_dir).unwrap();
        std::fs::write(chart_dir.join("Chart.yaml"), "name: kube-egress-gateway\n").unwrap();

        let found = fetch_chart(&chart, dir.path()).await.unwrap();
        assert_eq!(found, chart_dir);
    }

    #[tokio::test]
    async fn test_fetch_chart_requires_chart_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();

        let err = fetch_chart(&ChartConfig::default(), dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No Chart.yaml"));
    }
}
