//! Virtual machine scale sets backing AKS node pools.

use regex::Regex;
use tracing::debug;

use crate::client::AzureClient;
use crate::error::AzureError;
use crate::models::{ArmList, ArmResource, ScaleSetProperties};

/// Azure API version for Compute.
const COMPUTE_API_VERSION: &str = "2023-09-01";

/// Tag AKS puts on every scale set it manages.
pub const POOL_NAME_TAG: &str = "aks-managed-poolName";

/// A scale set in the node resource group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSet {
    /// Full resource ID.
    pub id: String,
    /// Scale set name.
    pub name: String,
    /// Value of the `aks-managed-poolName` tag, if present.
    pub pool_tag: Option<String>,
}

impl From<ArmResource<ScaleSetProperties>> for ScaleSet {
    fn from(resource: ArmResource<ScaleSetProperties>) -> Self {
        let pool_tag = resource.tags.get(POOL_NAME_TAG).cloned();
        Self {
            id: resource.id,
            name: resource.name,
            pool_tag,
        }
    }
}

/// Pick the single scale set that backs `pool`.
///
/// A scale set matches when its `aks-managed-poolName` tag equals the pool
/// name or, if untagged, its name is exactly `aks-<pool>-<digits>-vmss`.
/// Pools whose names share a prefix never match each other.
///
/// # Errors
///
/// [`AzureError::NotFound`] when nothing matches, [`AzureError::Config`] when
/// more than one scale set matches.
pub fn resolve_pool_scale_set<'a>(
    scale_sets: &'a [ScaleSet],
    pool: &str,
) -> Result<&'a ScaleSet, AzureError> {
    let pattern = Regex::new(&format!(r"^aks-{}-\d+-vmss$", regex::escape(pool)))
        .map_err(|e| AzureError::Config(format!("Invalid pool name {pool}: {e}")))?;

    let matches: Vec<&ScaleSet> = scale_sets
        .iter()
        .filter(|set| match set.pool_tag.as_deref() {
            Some(tag) => tag == pool,
            None => pattern.is_match(&set.name),
        })
        .collect();

    match matches.as_slice() {
        [single] => Ok(single),
        [] => Err(AzureError::NotFound(format!(
            "No scale set found for node pool {pool} (candidates: {})",
            scale_sets
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
        many => Err(AzureError::Config(format!(
            "Node pool {pool} matches {} scale sets: {}",
            many.len(),
            many.iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

impl AzureClient {
    /// List scale sets in a resource group, following pagination.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn list_scale_sets(&self, resource_group: &str) -> Result<Vec<ScaleSet>, AzureError> {
        let mut url = self.url(
            &format!(
                "{}/providers/Microsoft.Compute/virtualMachineScaleSets",
                self.resource_group_scope(resource_group)
            ),
            COMPUTE_API_VERSION,
        );
        let mut sets = Vec::new();

        loop {
            let page: ArmList<ArmResource<ScaleSetProperties>> = self.get(&url).await?;
            sets.extend(page.value.into_iter().map(ScaleSet::from));
            match page.next_link {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        debug!(resource_group = %resource_group, count = sets.len(), "Listed scale sets");
        Ok(sets)
    }

    /// Resolve the scale set backing an AKS node pool.
    ///
    /// # Errors
    ///
    /// See [`resolve_pool_scale_set`].
    pub async fn find_pool_scale_set(
        &self,
        node_resource_group: &str,
        pool: &str,
    ) -> Result<ScaleSet, AzureError> {
        let sets = self.list_scale_sets(node_resource_group).await?;
        resolve_pool_scale_set(&sets, pool).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str, tag: Option<&str>) -> ScaleSet {
        ScaleSet {
            id: format!("/vmss/{name}"),
            name: name.to_string(),
            pool_tag: tag.map(str::to_string),
        }
    }

    #[test]
    fn test_resolves_by_tag() {
        let sets = vec![
            set("aks-nodepool1-12345678-vmss", Some("nodepool1")),
            set("aks-gwnodepool-87654321-vmss", Some("gwnodepool")),
        ];
        let found = resolve_pool_scale_set(&sets, "gwnodepool").unwrap();
        assert_eq!(found.name, "aks-gwnodepool-87654321-vmss");
    }

    #[test]
    fn test_prefix_sharing_pools_do_not_collide() {
        // A substring match on "gw" would hit both of these.
        let sets = vec![
            set("aks-gw-11111111-vmss", None),
            set("aks-gw2-22222222-vmss", None),
        ];
        let found = resolve_pool_scale_set(&sets, "gw").unwrap();
        assert_eq!(found.name, "aks-gw-11111111-vmss");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let sets = vec![set("aks-nodepool1-12345678-vmss", Some("nodepool1"))];
        let err = resolve_pool_scale_set(&sets, "gwnodepool").unwrap_err();
        assert!(matches!(err, AzureError::NotFound(_)));
        assert!(err.to_string().contains("aks-nodepool1-12345678-vmss"));
    }

    #[test]
    fn test_ambiguous_match_is_error() {
        let sets = vec![
            set("aks-gwnodepool-1-vmss", Some("gwnodepool")),
            set("aks-gwnodepool-2-vmss", Some("gwnodepool")),
        ];
        let err = resolve_pool_scale_set(&sets, "gwnodepool").unwrap_err();
        assert!(matches!(err, AzureError::Config(_)));
    }

    #[test]
    fn test_tag_wins_over_name() {
        // Tagged for another pool even though the name looks right.
        let sets = vec![set("aks-gwnodepool-1-vmss", Some("other"))];
        assert!(resolve_pool_scale_set(&sets, "gwnodepool").is_err());
    }
}
