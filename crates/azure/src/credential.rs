//! Access token acquisition.
//!
//! Authentication is delegated to the Azure CLI: whatever `az login` session
//! is active on the workstation is what the provisioner acts as.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AzureError;

/// ARM audience used when requesting tokens.
pub const ARM_RESOURCE: &str = "https://management.azure.com/";

/// Refresh tokens that expire within this window.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// A bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Raw bearer token.
    pub token: String,
    /// Expiry instant.
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Whether the token should be refreshed now.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - now < ChronoDuration::minutes(REFRESH_MARGIN_MINUTES)
    }
}

/// Source of ARM bearer tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Return a token valid for at least a few minutes.
    async fn token(&self) -> Result<AccessToken, AzureError>;
}

/// Fixed token, e.g. from `AZURE_ACCESS_TOKEN`.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<AccessToken, AzureError> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

/// Token obtained from `az account get-access-token`, cached until near expiry.
#[derive(Default)]
pub struct AzureCliCredential {
    cached: Mutex<Option<AccessToken>>,
}

impl AzureCliCredential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    async fn token(&self) -> Result<AccessToken, AzureError> {
        let mut cached = self.cached.lock().await;
        if let Some(ref token) = *cached {
            if !token.needs_refresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        debug!("Requesting ARM access token from Azure CLI");
        let stdout = run_az(&[
            "account",
            "get-access-token",
            "--resource",
            ARM_RESOURCE,
            "--output",
            "json",
        ])
        .await?;

        let token = parse_cli_token(&stdout)?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Subscription and tenant of the active Azure CLI session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Subscription ID.
    #[serde(rename = "id")]
    pub subscription_id: String,
    /// Tenant ID.
    pub tenant_id: String,
    /// Subscription display name.
    #[serde(default)]
    pub name: String,
}

/// Run `az account show`.
///
/// # Errors
///
/// Returns an error if the CLI is missing, not logged in, or prints unexpected output.
pub async fn account_show() -> Result<AccountInfo, AzureError> {
    let stdout = run_az(&["account", "show", "--output", "json"]).await?;
    Ok(serde_json::from_str(&stdout)?)
}

async fn run_az(args: &[&str]) -> Result<String, AzureError> {
    let output = Command::new("az")
        .args(args)
        .output()
        .await
        .map_err(|e| AzureError::Credential(format!("Failed to execute az: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AzureError::Credential(format!(
            "az {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    /// Local time, e.g. `2024-05-01 10:23:45.000000`.
    expires_on: Option<String>,
    /// Unix seconds (newer CLI versions).
    #[serde(rename = "expires_on")]
    expires_on_unix: Option<i64>,
}

fn parse_cli_token(stdout: &str) -> Result<AccessToken, AzureError> {
    let response: CliTokenResponse = serde_json::from_str(stdout)?;

    let expires_on = response
        .expires_on_unix
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| {
            response.expires_on.as_deref().and_then(|s| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .and_then(|naive| chrono::Local.from_local_datetime(&naive).single())
                    .map(|local| local.with_timezone(&Utc))
            })
        })
        .unwrap_or_else(|| Utc::now() + ChronoDuration::minutes(30));

    if response.access_token.is_empty() {
        return Err(AzureError::Credential(
            "Azure CLI returned an empty access token".to_string(),
        ));
    }

    Ok(AccessToken {
        token: response.access_token,
        expires_on,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_token_unix_expiry() {
        let token = parse_cli_token(
            r#"{"accessToken":"eyJ0","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1893456000,"subscription":"sub","tenant":"tenant","tokenType":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "eyJ0");
        assert_eq!(token.expires_on.timestamp(), 1_893_456_000);
    }

    #[test]
    fn test_parse_cli_token_local_expiry() {
        let token = parse_cli_token(
            r#"{"accessToken":"abc","expiresOn":"2030-01-01 00:00:00.000000"}"#,
        )
        .unwrap();
        assert_eq!(token.token, "abc");
        assert!(token.expires_on > Utc::now());
    }

    #[test]
    fn test_parse_cli_token_rejects_empty() {
        assert!(parse_cli_token(r#"{"accessToken":""}"#).is_err());
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        let fresh = AccessToken {
            token: "t".into(),
            expires_on: now + ChronoDuration::minutes(30),
        };
        let stale = AccessToken {
            token: "t".into(),
            expires_on: now + ChronoDuration::minutes(2),
        };
        assert!(!fresh.needs_refresh(now));
        assert!(stale.needs_refresh(now));
    }

    #[tokio::test]
    async fn test_static_credential() {
        let credential = StaticTokenCredential::new("fixed");
        let token = credential.token().await.unwrap();
        assert_eq!(token.token, "fixed");
        assert!(!token.needs_refresh(Utc::now()));
    }
}
