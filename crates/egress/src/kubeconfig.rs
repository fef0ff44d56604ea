//! Kubeconfig storage.
//!
//! The AKS user kubeconfig is written next to the provisioning state and can
//! optionally be merged into `~/.kube/config`.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::info;

/// Get the default kubeconfig path (~/.kube/config).
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Write a kubeconfig readable only by the current user.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_kubeconfig(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write kubeconfig to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict kubeconfig permissions")?;
    }

    info!(path = %path.display(), "Wrote kubeconfig");
    Ok(())
}

/// Merge a kubeconfig file into the user's default kubeconfig.
///
/// Uses `kubectl config view --flatten` over both files so existing contexts
/// survive, then switches the current context to the new cluster.
///
/// # Errors
///
/// Returns an error if the merge fails.
pub fn merge_kubeconfig(source: &Path, context_name: &str) -> Result<PathBuf> {
    let default_path = default_kubeconfig_path().context("Could not determine home directory")?;
    merge_into(source, &default_path, context_name)?;
    Ok(default_path)
}

fn merge_into(source: &Path, target: &Path, context_name: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).context("Failed to create ~/.kube directory")?;
    }

    info!(
        source = %source.display(),
        target = %target.display(),
        "Merging kubeconfig"
    );

    let source_content =
        std::fs::read_to_string(source).context("Failed to read fetched kubeconfig")?;

    if !target.exists() {
        write_kubeconfig(target, &source_content)?;
        return Ok(());
    }

    // Earlier entries win on conflicts, so the fresh credentials go first.
    let kubeconfig_env = format!("{}:{}", source.display(), target.display());

    let output = Command::new("kubectl")
        .env("KUBECONFIG", &kubeconfig_env)
        .args(["config", "view", "--flatten"])
        .output()
        .context("Failed to run kubectl config view --flatten")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Failed to merge kubeconfig: {}", stderr.trim());
    }

    let merged = String::from_utf8(output.stdout).context("Merged kubeconfig is not UTF-8")?;
    write_kubeconfig(target, &merged)?;

    let set_context = Command::new("kubectl")
        .env("KUBECONFIG", target)
        .args(["config", "use-context", context_name])
        .output()
        .context("Failed to set kubectl context")?;

    if !set_context.status.success() {
        tracing::warn!(context = context_name, "Merged kubeconfig but could not switch context");
    }

    info!(context = context_name, "Merged kubeconfig and set current context");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kubeconfig_path() {
        let path = default_kubeconfig_path().unwrap();
        assert!(path.to_string_lossy().contains(".kube"));
        assert!(path.to_string_lossy().ends_with("config"));
    }

    #[test]
    fn test_write_kubeconfig_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("kubeconfig");

        write_kubeconfig(&path, "apiVersion: v1\nkind: Config\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_merge_into_missing_target_copies_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("kubeconfig");
        let target = dir.path().join("home").join(".kube").join("config");
        std::fs::write(&source, "apiVersion: v1\n").unwrap();

        merge_into(&source, &target, "demo").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "apiVersion: v1\n");
    }
}
