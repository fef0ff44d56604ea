//! Rendered gateway values carry the IDs Azure actually returned.

use std::sync::Arc;

use egress_azure::{AzureClient, StaticTokenCredential};
use egress_cli::gateway::{parse_azure_config, render_azure_config, DiscoveredAzure};
use egress_cli::{AzureCloudConfig, EgressConfig};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "00000000-0000-0000-0000-000000000001";

#[tokio::test]
async fn test_identity_response_flows_into_azure_config() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/demo-rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/demo-egress-identity"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/identities/demo-egress-identity",
            "name": "demo-egress-identity",
            "location": "eastus",
            "properties": {
                "tenantId": "72f988bf-86f1-41af-91ab-2d7cd011db47",
                "principalId": "5c1a7d0e-3b8f-4f43-9a40-2f6d1e0b9c11",
                "clientId": "e2b6c8a4-91d3-4c57-8f0a-6b3d2c1e7f90"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = EgressConfig::with_defaults("demo".into());
    let azure = AzureClient::with_base_url(
        SUB,
        Arc::new(StaticTokenCredential::new("test-token")),
        server.uri(),
    )
    .unwrap();

    let identity = azure
        .create_user_assigned_identity(&config.resource_group, &config.identity_name, &config.location)
        .await
        .unwrap();

    let discovered = DiscoveredAzure {
        subscription_id: SUB,
        tenant_id: &identity.tenant_id,
        identity_client_id: &identity.client_id,
        node_resource_group: "MC_demo-rg_demo_eastus",
    };
    let yaml = render_azure_config(&AzureCloudConfig::new(&config, &discovered)).unwrap();

    assert_eq!(identity.client_id, "e2b6c8a4-91d3-4c57-8f0a-6b3d2c1e7f90");
    assert!(yaml.contains(&identity.client_id));

    let parsed = parse_azure_config(&yaml).unwrap();
    assert_eq!(parsed.user_assigned_identity_id, identity.client_id);
    assert_eq!(parsed.tenant_id, identity.tenant_id);
    assert_eq!(parsed.subscription_id, SUB);
    // The principal ID is for role assignments only.
    assert!(!yaml.contains(&identity.principal_id));
}
