//! User-assigned managed identities and role assignments.

use tracing::{debug, info};
use uuid::Uuid;

use crate::client::AzureClient;
use crate::error::AzureError;
use crate::models::{
    ArmResource, CreateIdentityRequest, CreateRoleAssignmentProperties,
    CreateRoleAssignmentRequest, IdentityProperties, RoleAssignmentProperties,
};

/// API version for Microsoft.ManagedIdentity.
const IDENTITY_API_VERSION: &str = "2023-01-31";

/// API version for Microsoft.Authorization role assignments.
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";

/// A user-assigned managed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedIdentity {
    /// Full resource ID.
    pub resource_id: String,
    /// Application (client) ID.
    pub client_id: String,
    /// Service principal object ID.
    pub principal_id: String,
    /// Tenant the identity lives in.
    pub tenant_id: String,
}

impl From<ArmResource<IdentityProperties>> for ManagedIdentity {
    fn from(resource: ArmResource<IdentityProperties>) -> Self {
        Self {
            resource_id: resource.id,
            client_id: resource.properties.client_id,
            principal_id: resource.properties.principal_id,
            tenant_id: resource.properties.tenant_id,
        }
    }
}

/// Built-in Azure roles used by the gateway controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInRole {
    Reader,
    NetworkContributor,
    VirtualMachineContributor,
    Contributor,
}

impl BuiltInRole {
    /// Role definition GUID (identical in every tenant).
    #[must_use]
    pub fn definition_guid(self) -> &'static str {
        match self {
            Self::Reader => "acdd72a7-3385-48ef-bd42-f606fba81ae7",
            Self::NetworkContributor => "4d97b98b-1d4f-4787-a291-c67834d212e7",
            Self::VirtualMachineContributor => "9980e02c-c2be-4d73-94e8-173b1dc7cf3c",
            Self::Contributor => "b24988ac-6180-42a0-ab88-20f7382dd24c",
        }
    }

    /// Display name as shown by Azure.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Reader => "Reader",
            Self::NetworkContributor => "Network Contributor",
            Self::VirtualMachineContributor => "Virtual Machine Contributor",
            Self::Contributor => "Contributor",
        }
    }
}

impl std::fmt::Display for BuiltInRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Deterministic assignment name so re-running creates no duplicates.
#[must_use]
pub fn role_assignment_name(scope: &str, role: BuiltInRole, principal_id: &str) -> Uuid {
    let key = format!(
        "{}|{}|{}",
        scope.to_lowercase(),
        role.definition_guid(),
        principal_id.to_lowercase()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

impl AzureClient {
    /// Create or update a user-assigned identity.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request.
    pub async fn create_user_assigned_identity(
        &self,
        resource_group: &str,
        name: &str,
        location: &str,
    ) -> Result<ManagedIdentity, AzureError> {
        info!(identity = %name, resource_group = %resource_group, "Creating managed identity");

        let url = self.url(
            &format!(
                "{}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{name}",
                self.resource_group_scope(resource_group)
            ),
            IDENTITY_API_VERSION,
        );
        let body = CreateIdentityRequest {
            location: location.to_string(),
        };

        let identity: ArmResource<IdentityProperties> = self.put(&url, &body).await?;
        Ok(identity.into())
    }

    /// Assign a built-in role to a principal at a scope.
    ///
    /// An existing identical assignment counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if ARM rejects the request for any other reason.
    pub async fn assign_role(
        &self,
        scope: &str,
        role: BuiltInRole,
        principal_id: &str,
    ) -> Result<(), AzureError> {
        let assignment = role_assignment_name(scope, role, principal_id);
        info!(role = %role, scope = %scope, principal = %principal_id, "Assigning role");

        let url = self.url(
            &format!("{scope}/providers/Microsoft.Authorization/roleAssignments/{assignment}"),
            AUTHORIZATION_API_VERSION,
        );
        let body = CreateRoleAssignmentRequest {
            properties: CreateRoleAssignmentProperties {
                role_definition_id: format!(
                    "{}/providers/Microsoft.Authorization/roleDefinitions/{}",
                    self.subscription_scope(),
                    role.definition_guid()
                ),
                principal_id: principal_id.to_string(),
                principal_type: "ServicePrincipal".to_string(),
            },
        };

        match self
            .put::<ArmResource<RoleAssignmentProperties>, _>(&url, &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(AzureError::Conflict { code, .. }) if code == "RoleAssignmentExists" => {
                debug!(role = %role, scope = %scope, "Role assignment already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
