//! Azure Resource Manager HTTP client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::credential::TokenCredential;
use crate::error::{parse_error_body, AzureError};
use crate::models::{ArmResource, ProvisioningState};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Public ARM endpoint.
pub const ARM_ENDPOINT: &str = "https://management.azure.com";

/// Azure Resource Manager client scoped to one subscription.
#[derive(Clone)]
pub struct AzureClient {
    /// HTTP client.
    client: Client,
    /// Token source.
    credential: Arc<dyn TokenCredential>,
    /// Subscription ID.
    subscription_id: String,
    /// ARM base URL (no trailing slash).
    base_url: String,
    /// Polling schedule used by the `wait_*` helpers.
    backoff: Backoff,
}

impl AzureClient {
    /// Create a client against the public ARM endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        subscription_id: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, AzureError> {
        Self::with_base_url(subscription_id, credential, ARM_ENDPOINT)
    }

    /// Create a client against a custom endpoint (sovereign clouds, tests).
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn with_base_url(
        subscription_id: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
        base_url: impl Into<String>,
    ) -> Result<Self, AzureError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(AzureError::Http)?;

        Ok(Self {
            client,
            credential,
            subscription_id: subscription_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            backoff: Backoff::default(),
        })
    }

    /// Replace the polling schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Polling schedule used by the `wait_*` helpers.
    pub(crate) fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Subscription this client operates on.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// `/subscriptions/{id}` scope.
    #[must_use]
    pub fn subscription_scope(&self) -> String {
        format!("/subscriptions/{}", self.subscription_id)
    }

    /// `/subscriptions/{id}/resourceGroups/{rg}` scope.
    #[must_use]
    pub fn resource_group_scope(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{resource_group}",
            self.subscription_id
        )
    }

    /// Build a full URL from a resource path and API version.
    pub(crate) fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{path}?api-version={api_version}", self.base_url)
    }

    async fn bearer(&self) -> Result<String, AzureError> {
        Ok(format!("Bearer {}", self.credential.token().await?.token))
    }

    /// Authenticated GET.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, AzureError> {
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Authenticated PUT with a JSON body.
    pub(crate) async fn put<T, B>(&self, url: &str, body: &B) -> Result<T, AzureError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        debug!(url = %url, "PUT request");

        let response = self
            .client
            .put(url)
            .header("Authorization", self.bearer().await?)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Authenticated POST without a body, parsing the response.
    pub(crate) async fn post<T: DeserializeOwned>(&self, url: &str) -> Result<T, AzureError> {
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer().await?)
            .header("Content-Length", "0")
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Authenticated DELETE. A missing resource counts as deleted.
    pub(crate) async fn delete(&self, url: &str) -> Result<(), AzureError> {
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    /// Whether a GET on the URL finds a resource.
    pub(crate) async fn exists(&self, url: &str) -> Result<bool, AzureError> {
        match self.get::<serde_json::Value>(url).await {
            Ok(_) => Ok(true),
            Err(AzureError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Handle API response.
    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, AzureError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        let text = response.text().await?;
        let body = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(body).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            AzureError::Serialization(e)
        })
    }

    /// Map a non-success response to an [`AzureError`].
    async fn error_from(response: Response) -> AzureError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&text);

        match status {
            StatusCode::NOT_FOUND => AzureError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AzureError::Auth(message),
            StatusCode::CONFLICT => AzureError::Conflict { code, message },
            StatusCode::TOO_MANY_REQUESTS => AzureError::Throttled { retry_after },
            _ => AzureError::Api {
                status: status.as_u16(),
                code,
                message,
            },
        }
    }

    /// Poll a resource until its provisioning state is `Succeeded`.
    ///
    /// `Failed` and `Canceled` are terminal. Transient poll failures are
    /// logged and retried until the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::ProvisioningFailed`] on a terminal state,
    /// [`AzureError::Timeout`] past the deadline, or any non-transient request error.
    pub async fn wait_provisioned<P>(
        &self,
        url: &str,
        resource: &str,
        timeout: Duration,
    ) -> Result<ArmResource<P>, AzureError>
    where
        P: DeserializeOwned + ProvisioningState,
    {
        info!(resource, timeout_secs = timeout.as_secs(), "Waiting for provisioning");

        let start = Instant::now();
        let mut attempt = 0_u32;

        loop {
            match self.get::<ArmResource<P>>(url).await {
                Ok(current) => {
                    let state = current.provisioning_state().unwrap_or("Unknown").to_string();
                    debug!(
                        resource,
                        state = %state,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Polling provisioning state"
                    );

                    match state.as_str() {
                        "Succeeded" => {
                            info!(resource, "Provisioning succeeded");
                            return Ok(current);
                        }
                        "Failed" | "Canceled" => {
                            return Err(AzureError::ProvisioningFailed {
                                resource: resource.to_string(),
                                state,
                            });
                        }
                        _ => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(resource, error = %e, "Transient error while polling");
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= timeout {
                return Err(AzureError::Timeout {
                    resource: resource.to_string(),
                    secs: timeout.as_secs(),
                });
            }

            let delay = self
                .backoff
                .delay_for_attempt(attempt)
                .min(timeout.saturating_sub(start.elapsed()));
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

/// Last path segment of a resource ID, or the input if it is already a name.
#[must_use]
pub fn resource_name(id: &str) -> &str {
    if id.contains('/') {
        id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name() {
        assert_eq!(
            resource_name("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1"),
            "vnet1"
        );
        assert_eq!(resource_name("vnet1"), "vnet1");
    }
}
