//! Kubernetes side of the setup: gateway configuration, test pods, exec.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Container, Namespace, Node, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};
use kube::api::{Api, AttachParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, Config};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::config::{EgressConfig, GATEWAY_MODE_KEY};
use crate::gateway::StaticGatewayConfiguration;

/// Field manager for server-side apply.
const FIELD_MANAGER: &str = "egress-cli";

/// Image used by both test pods.
pub const CURL_IMAGE: &str = "curlimages/curl:8.8.0";

/// Pod routed through the gateway.
pub const GATEWAY_POD: &str = "egress-gateway-pod";

/// Pod using normal node egress.
pub const PLAIN_POD: &str = "egress-plain-pod";

/// Label AKS puts on every node with its pool name.
const AGENT_POOL_LABEL: &str = "agentpool";

/// Build a test pod; `annotation` opts it into a gateway.
#[must_use]
pub fn test_pod(name: &str, namespace: &str, annotation: Option<(&str, &str)>) -> Pod {
    let annotations = annotation
        .map(|(key, value)| BTreeMap::from([(key.to_string(), value.to_string())]));

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app.kubernetes.io/part-of".to_string(),
                "egress-demo".to_string(),
            )])),
            annotations,
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(1),
            containers: vec![Container {
                name: "curl".to_string(),
                image: Some(CURL_IMAGE.to_string()),
                command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

/// Both test pods for a config.
#[must_use]
pub fn test_pods(config: &EgressConfig) -> [Pod; 2] {
    [
        test_pod(
            GATEWAY_POD,
            &config.demo_namespace,
            Some((config.annotation.key(), &config.gateway_name)),
        ),
        test_pod(PLAIN_POD, &config.demo_namespace, None),
    ]
}

/// Whether a node carries the gateway taint and label.
#[must_use]
pub fn is_gateway_node(node: &Node) -> bool {
    let labelled = node
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(GATEWAY_MODE_KEY))
        .is_some_and(|v| v == "true");

    let tainted = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .is_some_and(|taints| {
            taints.iter().any(|t| {
                t.key == GATEWAY_MODE_KEY
                    && t.value.as_deref() == Some("true")
                    && t.effect == "NoSchedule"
            })
        });

    labelled && tainted
}

/// Output of a command run in a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit reason when the command did not succeed.
    pub failure: Option<String>,
}

impl ExecOutput {
    /// Failure reason with the command's stderr appended, or `None` on success.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        let failure = self.failure.as_deref()?;
        let stderr = self.stderr.trim();
        Some(if stderr.is_empty() {
            failure.to_string()
        } else {
            format!("{failure}: {stderr}")
        })
    }
}

/// Turn the exec status the API server sends at the end of a session into
/// a failure reason. `Success` yields `None`.
#[must_use]
pub fn exec_failure(status: &Status) -> Option<String> {
    if status.status.as_deref() == Some("Success") {
        return None;
    }

    let exit_code = status
        .details
        .as_ref()
        .and_then(|details| details.causes.as_ref())
        .and_then(|causes| {
            causes
                .iter()
                .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
        })
        .and_then(|cause| cause.message.clone());

    Some(match exit_code {
        Some(code) => format!("exit code {code}"),
        None => status
            .message
            .clone()
            .or_else(|| status.reason.clone())
            .unwrap_or_else(|| "command failed".to_string()),
    })
}

async fn read_all(reader: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

/// Kubernetes access for one cluster.
pub struct Workloads {
    client: Client,
}

impl Workloads {
    /// Create a client from a kubeconfig file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot be created.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig from {}", path.display()))?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to create Kubernetes config from kubeconfig")?;

        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;

        Ok(Self { client })
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    /// Create the namespace if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the apply fails.
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };

        api.patch(name, &Self::apply_params(), &Patch::Apply(&namespace))
            .await
            .with_context(|| format!("Failed to apply namespace {name}"))?;
        debug!(namespace = name, "Namespace applied");
        Ok(())
    }

    /// Server-side apply the gateway configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no namespace or the apply fails.
    pub async fn apply_gateway(&self, gateway: &StaticGatewayConfiguration) -> Result<()> {
        let namespace = gateway
            .metadata
            .namespace
            .as_deref()
            .context("StaticGatewayConfiguration has no namespace")?;
        let name = gateway
            .metadata
            .name
            .as_deref()
            .context("StaticGatewayConfiguration has no name")?;

        let api: Api<StaticGatewayConfiguration> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &Self::apply_params(), &Patch::Apply(gateway))
            .await
            .with_context(|| format!("Failed to apply StaticGatewayConfiguration {name}"))?;

        info!(name, namespace, "Applied StaticGatewayConfiguration");
        Ok(())
    }

    /// Wait until the controller publishes an egress prefix for the gateway.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or watch failure.
    pub async fn wait_gateway_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<String> {
        let api: Api<StaticGatewayConfiguration> = Api::namespaced(self.client.clone(), namespace);

        let has_prefix = |obj: Option<&StaticGatewayConfiguration>| {
            obj.and_then(|o| o.status.as_ref())
                .and_then(|s| s.egress_ip_prefix.as_ref())
                .is_some()
        };

        let ready = tokio::time::timeout(timeout, await_condition(api, name, has_prefix))
            .await
            .with_context(|| {
                format!(
                    "StaticGatewayConfiguration {name} had no egress prefix after {}s",
                    timeout.as_secs()
                )
            })?
            .context("Failed to watch StaticGatewayConfiguration")?;

        ready
            .and_then(|o| o.status)
            .and_then(|s| s.egress_ip_prefix)
            .context("StaticGatewayConfiguration disappeared while waiting")
    }

    /// Server-side apply a pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the pod is missing its name or namespace, or the apply fails.
    pub async fn apply_pod(&self, pod: &Pod) -> Result<()> {
        let namespace = pod.metadata.namespace.as_deref().context("Pod has no namespace")?;
        let name = pod.metadata.name.as_deref().context("Pod has no name")?;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &Self::apply_params(), &Patch::Apply(pod))
            .await
            .with_context(|| format!("Failed to apply pod {name}"))?;
        debug!(pod = name, namespace, "Pod applied");
        Ok(())
    }

    /// Wait for a pod to reach `Running`.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout or watch failure.
    pub async fn wait_pod_running(&self, namespace: &str, name: &str, timeout: Duration) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        tokio::time::timeout(timeout, await_condition(api, name, conditions::is_pod_running()))
            .await
            .with_context(|| format!("Pod {name} not running after {}s", timeout.as_secs()))?
            .with_context(|| format!("Failed to watch pod {name}"))?;

        info!(pod = name, "Pod running");
        Ok(())
    }

    /// Run a command in a pod and capture its output and exit status.
    ///
    /// A command that runs but exits non-zero is not an error here; its
    /// failure is reported in [`ExecOutput::failure`].
    ///
    /// # Errors
    ///
    /// Returns an error if the exec session cannot be opened or read.
    pub async fn exec_capture(
        &self,
        namespace: &str,
        pod: &str,
        command: Vec<String>,
    ) -> Result<ExecOutput> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        debug!(pod, command = ?command, "Exec in pod");

        let mut attached = api
            .exec(pod, command, &AttachParams::default().stdout(true).stderr(true))
            .await
            .with_context(|| format!("Failed to exec in pod {pod}"))?;

        let status = attached.take_status();
        let (stdout, stderr) = tokio::try_join!(
            read_all(attached.stdout()),
            read_all(attached.stderr())
        )
        .context("Failed to read exec output")?;

        let failure = match status {
            Some(status) => status.await.as_ref().and_then(exec_failure),
            None => None,
        };
        attached.join().await.context("Exec session failed")?;

        Ok(ExecOutput {
            stdout,
            stderr,
            failure,
        })
    }

    /// Count nodes in the gateway pool, failing if any lacks the gateway taint or label.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has no nodes or a node is not isolated.
    pub async fn check_gateway_nodes(&self, pool_name: &str) -> Result<usize> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(&format!("{AGENT_POOL_LABEL}={pool_name}")))
            .await
            .context("Failed to list nodes")?;

        if nodes.items.is_empty() {
            anyhow::bail!("No nodes found for pool {pool_name}");
        }

        let unisolated: Vec<String> = nodes
            .items
            .iter()
            .filter(|n| !is_gateway_node(n))
            .filter_map(|n| n.metadata.name.clone())
            .collect();

        if !unisolated.is_empty() {
            anyhow::bail!(
                "Gateway pool nodes missing {GATEWAY_MODE_KEY} taint or label: {}",
                unisolated.join(", ")
            );
        }

        Ok(nodes.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PodAnnotation;
    use serde_json::json;

    fn node(labels: serde_json::Value, taints: serde_json::Value) -> Node {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": { "name": "aks-gwnodepool-0", "labels": labels },
            "spec": { "taints": taints }
        }))
        .unwrap()
    }

    #[test]
    fn test_gateway_pod_is_annotated() {
        let config = EgressConfig::with_defaults("demo".into());
        let [gateway, plain] = test_pods(&config);

        let annotations = gateway.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("kubernetes.azure.com/static-gateway-configuration"),
            Some(&"aks-static-egress".to_string())
        );
        assert_eq!(gateway.metadata.namespace.as_deref(), Some("egress-demo"));
        assert!(plain.metadata.annotations.unwrap_or_default().is_empty());

        let container = &plain.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some(CURL_IMAGE));
    }

    #[test]
    fn test_pod_manifest_is_complete() {
        let pod = test_pod(GATEWAY_POD, "egress-demo", Some(("k", "v")));
        let value = serde_json::to_value(&pod).unwrap();

        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["kind"], "Pod");
        assert_eq!(value["metadata"]["name"], GATEWAY_POD);
        assert_eq!(value["metadata"]["namespace"], "egress-demo");
        assert_eq!(value["metadata"]["annotations"]["k"], "v");
        assert_eq!(value["spec"]["containers"][0]["command"], json!(["sleep", "infinity"]));
        assert_eq!(value["spec"]["terminationGracePeriodSeconds"], 1);
    }

    #[test]
    fn test_legacy_annotation() {
        let mut config = EgressConfig::with_defaults("demo".into());
        config.annotation = PodAnnotation::Legacy;
        let [gateway, _] = test_pods(&config);

        let annotations = gateway.metadata.annotations.unwrap();
        assert!(annotations.contains_key("egressgateway.kubernetes.azure.com/gateway-name"));
    }

    #[test]
    fn test_gateway_node_detection() {
        let isolated = node(
            json!({ GATEWAY_MODE_KEY: "true", "agentpool": "gwnodepool" }),
            json!([{ "key": GATEWAY_MODE_KEY, "value": "true", "effect": "NoSchedule" }]),
        );
        assert!(is_gateway_node(&isolated));

        let untainted = node(json!({ GATEWAY_MODE_KEY: "true" }), json!([]));
        assert!(!is_gateway_node(&untainted));

        let soft = node(
            json!({ GATEWAY_MODE_KEY: "true" }),
            json!([{ "key": GATEWAY_MODE_KEY, "value": "true", "effect": "PreferNoSchedule" }]),
        );
        assert!(!is_gateway_node(&soft));
    }

    fn status(value: serde_json::Value) -> Status {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_exec_failure_from_status() {
        assert_eq!(exec_failure(&status(json!({ "status": "Success" }))), None);

        let timed_out = status(json!({
            "status": "Failure",
            "reason": "NonZeroExitCode",
            "message": "command terminated with non-zero exit code: exit code 28",
            "details": { "causes": [{ "reason": "ExitCode", "message": "28" }] }
        }));
        assert_eq!(exec_failure(&timed_out).as_deref(), Some("exit code 28"));

        let internal = status(json!({ "status": "Failure", "message": "container not found" }));
        assert_eq!(exec_failure(&internal).as_deref(), Some("container not found"));
    }

    #[test]
    fn test_exec_output_error_includes_stderr() {
        let output = ExecOutput {
            stdout: String::new(),
            stderr: "curl: (28) Connection timed out after 15001 milliseconds\n".into(),
            failure: Some("exit code 28".into()),
        };
        assert_eq!(
            output.error().as_deref(),
            Some("exit code 28: curl: (28) Connection timed out after 15001 milliseconds")
        );

        let ok = ExecOutput {
            stdout: "RemoteAddr: 10.243.16.7:41822".into(),
            ..ExecOutput::default()
        };
        assert_eq!(ok.error(), None);
    }
}
