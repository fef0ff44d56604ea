//! ARM client behaviour against a mock Resource Manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use egress_azure::{
    AgentPoolSpec, AzureClient, AzureError, Backoff, BuiltInRole, ClusterSpec,
    ContainerGroupSpec, StaticTokenCredential, ACI_DELEGATION,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "00000000-0000-0000-0000-000000000001";

async fn client(server: &MockServer) -> AzureClient {
    AzureClient::with_base_url(
        SUB,
        Arc::new(StaticTokenCredential::new("test-token")),
        server.uri(),
    )
    .unwrap()
    .with_backoff(Backoff::fixed(Duration::from_millis(10)))
}

#[tokio::test]
async fn test_create_subnet_waits_for_succeeded() {
    let server = MockServer::start().await;
    let subnet_path = format!(
        "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/gw"
    );
    let subnet_id = subnet_path.clone();

    Mock::given(method("PUT"))
        .and(path(subnet_path.as_str()))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_partial_json(json!({"properties": {"addressPrefix": "10.243.16.0/24"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": subnet_id,
            "name": "gw",
            "properties": {"provisioningState": "Updating", "addressPrefix": "10.243.16.0/24"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(subnet_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": subnet_id,
            "name": "gw",
            "properties": {"provisioningState": "Updating", "addressPrefix": "10.243.16.0/24"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(subnet_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": subnet_id,
            "name": "gw",
            "properties": {"provisioningState": "Succeeded", "addressPrefix": "10.243.16.0/24"}
        })))
        .mount(&server)
        .await;

    let subnet = client(&server)
        .await
        .create_subnet("rg", "vnet", "gw", "10.243.16.0/24", None)
        .await
        .unwrap();

    assert_eq!(subnet.name, "gw");
    assert_eq!(subnet.address_prefix, "10.243.16.0/24");
    assert!(subnet.id.ends_with("/subnets/gw"));
}

#[tokio::test]
async fn test_wait_cluster_ready_reports_failed_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1"
        )))
        .and(query_param("api-version", "2024-05-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "aks1-id",
            "name": "aks1",
            "location": "eastus",
            "properties": {"provisioningState": "Failed"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .wait_cluster_ready("rg", "aks1", Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        AzureError::ProvisioningFailed { state, .. } => assert_eq!(state, "Failed"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wait_times_out_while_creating() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1/agentPools/gw"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "gw-id",
            "name": "gw",
            "properties": {"provisioningState": "Creating", "count": 2, "vmSize": "Standard_DS2_v2"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .wait_agent_pool_ready("rg", "aks1", "gw", Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, AzureError::Timeout { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_create_agent_pool_sends_taints_and_labels() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1/agentPools/gwnodepool"
        )))
        .and(body_partial_json(json!({
            "properties": {
                "mode": "User",
                "count": 2,
                "vnetSubnetID": "/subnets/gw",
                "nodeTaints": ["kubeegressgateway.azure.com/mode=true:NoSchedule"],
                "nodeLabels": {"kubeegressgateway.azure.com/mode": "true"}
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pool-id",
            "name": "gwnodepool",
            "properties": {"provisioningState": "Creating", "count": 2, "vmSize": "Standard_DS2_v2"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let spec = AgentPoolSpec {
        name: "gwnodepool".into(),
        node_count: 2,
        vm_size: "Standard_DS2_v2".into(),
        vnet_subnet_id: "/subnets/gw".into(),
        taints: vec!["kubeegressgateway.azure.com/mode=true:NoSchedule".into()],
        labels: HashMap::from([(
            "kubeegressgateway.azure.com/mode".to_string(),
            "true".to_string(),
        )]),
    };

    let pool = client(&server)
        .await
        .create_agent_pool("rg", "aks1", &spec)
        .await
        .unwrap();
    assert_eq!(pool.provisioning_state(), Some("Creating"));
}

#[tokio::test]
async fn test_existing_role_assignment_is_success() {
    let server = MockServer::start().await;
    let scope = format!("/subscriptions/{SUB}/resourceGroups/rg");

    Mock::given(method("PUT"))
        .and(body_partial_json(json!({
            "properties": {
                "principalId": "principal-1",
                "principalType": "ServicePrincipal",
                "roleDefinitionId": format!(
                    "/subscriptions/{SUB}/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7"
                )
            }
        })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"code": "RoleAssignmentExists", "message": "The role assignment already exists."}
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .await
        .assign_role(&scope, BuiltInRole::Reader, "principal-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_forbidden_role_assignment_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": "AuthorizationFailed", "message": "no permission"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .assign_role("/subscriptions/x", BuiltInRole::Contributor, "p")
        .await
        .unwrap_err();
    assert!(matches!(err, AzureError::Auth(ref m) if m == "no permission"));
}

#[tokio::test]
async fn test_user_kubeconfig_is_decoded() {
    let server = MockServer::start().await;
    let kubeconfig = "apiVersion: v1\nkind: Config\n";

    Mock::given(method("POST"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1/listClusterUserCredential"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kubeconfigs": [{
                "name": "clusterUser",
                "value": base64::engine::general_purpose::STANDARD.encode(kubeconfig)
            }]
        })))
        .mount(&server)
        .await;

    let fetched = client(&server)
        .await
        .get_user_kubeconfig("rg", "aks1")
        .await
        .unwrap();
    assert_eq!(fetched, kubeconfig);
}

#[tokio::test]
async fn test_find_pool_scale_set_follows_pages() {
    let server = MockServer::start().await;
    let list_path = format!(
        "/subscriptions/{SUB}/resourceGroups/MC_rg_aks1_eastus/providers/Microsoft.Compute/virtualMachineScaleSets"
    );

    Mock::given(method("GET"))
        .and(path(list_path.as_str()))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "id": "/vmss/aks-gwnodepool-22222222-vmss",
                "name": "aks-gwnodepool-22222222-vmss",
                "tags": {"aks-managed-poolName": "gwnodepool"},
                "properties": {"provisioningState": "Succeeded"}
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(list_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "id": "/vmss/aks-nodepool1-11111111-vmss",
                "name": "aks-nodepool1-11111111-vmss",
                "tags": {"aks-managed-poolName": "nodepool1"},
                "properties": {"provisioningState": "Succeeded"}
            }],
            "nextLink": format!("{}{list_path}?api-version=2023-09-01&page=2", server.uri())
        })))
        .mount(&server)
        .await;

    let set = client(&server)
        .await
        .find_pool_scale_set("MC_rg_aks1_eastus", "gwnodepool")
        .await
        .unwrap();
    assert_eq!(set.name, "aks-gwnodepool-22222222-vmss");
}

#[tokio::test]
async fn test_delete_missing_resource_group_is_ok() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(format!("/subscriptions/{SUB}/resourcegroups/gone")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ResourceGroupNotFound", "message": "not found"}
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/subscriptions/{SUB}/resourcegroups/gone")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client(&server).await;
    client.delete_resource_group("gone").await.unwrap();
    assert!(!client.resource_group_exists("gone").await.unwrap());
}

#[tokio::test]
async fn test_container_group_ip_is_returned() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/target-rg/providers/Microsoft.ContainerInstance/containerGroups/echo"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "echo-id",
            "name": "echo",
            "properties": {
                "provisioningState": "Succeeded",
                "ipAddress": {"type": "Private", "ip": "10.245.0.4", "ports": [{"protocol": "TCP", "port": 80}]}
            }
        })))
        .mount(&server)
        .await;

    let ip = client(&server)
        .await
        .wait_container_group_ready("target-rg", "echo", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ip, "10.245.0.4");
}

#[tokio::test]
async fn test_create_cluster_binds_subnet_and_network_profile() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1"
        )))
        .and(body_partial_json(json!({
            "location": "eastus",
            "identity": {"type": "SystemAssigned"},
            "properties": {
                "dnsPrefix": "aks1",
                "agentPoolProfiles": [{
                    "name": "nodepool1",
                    "mode": "System",
                    "count": 2,
                    "vnetSubnetID": "/subnets/aks-subnet"
                }],
                "networkProfile": {
                    "networkPlugin": "azure",
                    "serviceCidr": "10.0.0.0/16",
                    "dnsServiceIP": "10.0.0.10"
                }
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "aks1-id",
            "name": "aks1",
            "location": "eastus",
            "properties": {"provisioningState": "Creating"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let spec = ClusterSpec {
        name: "aks1".into(),
        location: "eastus".into(),
        kubernetes_version: None,
        system_pool_name: "nodepool1".into(),
        node_count: 2,
        node_vm_size: "Standard_DS2_v2".into(),
        vnet_subnet_id: "/subnets/aks-subnet".into(),
        service_cidr: "10.0.0.0/16".into(),
        dns_service_ip: "10.0.0.10".into(),
    };

    let cluster = client(&server)
        .await
        .create_cluster("rg", &spec)
        .await
        .unwrap();
    assert_eq!(cluster.name, "aks1");
    assert_eq!(cluster.provisioning_state(), Some("Creating"));
}

#[tokio::test]
async fn test_identity_ids_come_from_response() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/gw-identity"
        )))
        .and(body_partial_json(json!({"location": "eastus"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "/identities/gw-identity",
            "name": "gw-identity",
            "location": "eastus",
            "properties": {
                "tenantId": "11111111-2222-3333-4444-555555555555",
                "principalId": "66666666-7777-8888-9999-000000000000",
                "clientId": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = client(&server)
        .await
        .create_user_assigned_identity("rg", "gw-identity", "eastus")
        .await
        .unwrap();

    assert_eq!(identity.resource_id, "/identities/gw-identity");
    assert_eq!(identity.client_id, "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
    assert_eq!(identity.principal_id, "66666666-7777-8888-9999-000000000000");
    assert_eq!(identity.tenant_id, "11111111-2222-3333-4444-555555555555");
}

#[tokio::test]
async fn test_create_peering_references_remote_vnet() {
    let server = MockServer::start().await;
    let peering_path = format!(
        "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/virtualNetworkPeerings/cluster-to-target"
    );

    Mock::given(method("PUT"))
        .and(path(peering_path.as_str()))
        .and(body_partial_json(json!({
            "properties": {
                "remoteVirtualNetwork": {"id": "/vnets/target-vnet"},
                "allowVirtualNetworkAccess": true,
                "useRemoteGateways": false
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": peering_path,
            "name": "cluster-to-target",
            "properties": {"provisioningState": "Updating", "peeringState": "Initiated"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(peering_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": peering_path,
            "name": "cluster-to-target",
            "properties": {
                "provisioningState": "Succeeded",
                "peeringState": "Initiated",
                "remoteVirtualNetwork": {"id": "/vnets/target-vnet"}
            }
        })))
        .mount(&server)
        .await;

    let peering = client(&server)
        .await
        .create_peering("rg", "vnet", "cluster-to-target", "/vnets/target-vnet")
        .await
        .unwrap();

    // Provisioned is not the same as connected.
    assert_eq!(peering.properties.peering_state.as_deref(), Some("Initiated"));
    assert_eq!(
        peering.properties.remote_virtual_network.unwrap().id,
        "/vnets/target-vnet"
    );
}

#[tokio::test]
async fn test_wait_peering_connected_polls_until_connected() {
    let server = MockServer::start().await;
    let peering_path = format!(
        "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/virtualNetworkPeerings/cluster-to-target"
    );

    Mock::given(method("GET"))
        .and(path(peering_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": peering_path,
            "name": "cluster-to-target",
            "properties": {"provisioningState": "Succeeded", "peeringState": "Initiated"}
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(peering_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": peering_path,
            "name": "cluster-to-target",
            "properties": {"provisioningState": "Succeeded", "peeringState": "Connected"}
        })))
        .mount(&server)
        .await;

    let peering = client(&server)
        .await
        .wait_peering_connected("rg", "vnet", "cluster-to-target", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(peering.properties.peering_state.as_deref(), Some("Connected"));
}

#[tokio::test]
async fn test_disconnected_peering_fails_fast() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/target-rg/providers/Microsoft.Network/virtualNetworks/target-vnet/virtualNetworkPeerings/target-to-cluster"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "peering-id",
            "name": "target-to-cluster",
            "properties": {"provisioningState": "Succeeded", "peeringState": "Disconnected"}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .await
        .wait_peering_connected(
            "target-rg",
            "target-vnet",
            "target-to-cluster",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

    match err {
        AzureError::ProvisioningFailed { state, .. } => assert_eq!(state, "Disconnected"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_create_container_group_uses_private_subnet() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/target-rg/providers/Microsoft.ContainerInstance/containerGroups/echo"
        )))
        .and(body_partial_json(json!({
            "location": "eastus",
            "properties": {
                "osType": "Linux",
                "containers": [{
                    "name": "echo",
                    "properties": {"image": "traefik/whoami:v1.10", "ports": [{"port": 80}]}
                }],
                "ipAddress": {"type": "Private", "ports": [{"protocol": "TCP", "port": 80}]},
                "subnetIds": [{"id": "/subnets/target"}]
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "echo-id",
            "name": "echo",
            "properties": {"provisioningState": "Pending"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let spec = ContainerGroupSpec {
        name: "echo".into(),
        location: "eastus".into(),
        image: "traefik/whoami:v1.10".into(),
        port: 80,
        subnet_id: "/subnets/target".into(),
    };

    let group = client(&server)
        .await
        .create_container_group("target-rg", &spec)
        .await
        .unwrap();
    assert_eq!(group.provisioning_state(), Some("Pending"));
}

#[tokio::test]
async fn test_delegated_subnet_body() {
    let server = MockServer::start().await;
    let subnet_path = format!(
        "/subscriptions/{SUB}/resourceGroups/target-rg/providers/Microsoft.Network/virtualNetworks/target-vnet/subnets/aci"
    );

    Mock::given(method("PUT"))
        .and(path(subnet_path.as_str()))
        .and(body_partial_json(json!({
            "properties": {
                "addressPrefix": "10.245.0.0/24",
                "delegations": [{"properties": {"serviceName": ACI_DELEGATION}}]
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": subnet_path,
            "name": "aci",
            "properties": {"provisioningState": "Succeeded", "addressPrefix": "10.245.0.0/24"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(subnet_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": subnet_path,
            "name": "aci",
            "properties": {"provisioningState": "Succeeded", "addressPrefix": "10.245.0.0/24"}
        })))
        .mount(&server)
        .await;

    let subnet = client(&server)
        .await
        .create_subnet("target-rg", "target-vnet", "aci", "10.245.0.0/24", Some(ACI_DELEGATION))
        .await
        .unwrap();
    assert_eq!(subnet.name, "aci");
}

#[tokio::test]
async fn test_missing_cluster_and_container_group_are_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "ResourceNotFound", "message": "not found"}
        })))
        .mount(&server)
        .await;

    let azure = client(&server).await;
    assert!(matches!(
        azure.get_cluster("rg", "aks1").await,
        Err(AzureError::NotFound(_))
    ));
    assert!(matches!(
        azure.get_agent_pool("rg", "aks1", "gw").await,
        Err(AzureError::NotFound(_))
    ));
    assert!(matches!(
        azure.get_container_group("rg", "echo").await,
        Err(AzureError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_get_agent_pool_reads_mode_and_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.ContainerService/managedClusters/aks1/agentPools/gw"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "/agentPools/gw",
            "name": "gw",
            "properties": {"provisioningState": "Succeeded", "mode": "Gateway", "count": 2}
        })))
        .mount(&server)
        .await;

    let pool = client(&server)
        .await
        .get_agent_pool("rg", "aks1", "gw")
        .await
        .unwrap();
    assert_eq!(pool.name, "gw");
    assert_eq!(pool.provisioning_state(), Some("Succeeded"));
}
