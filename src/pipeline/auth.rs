//! Bearer-token acquisition for Azure OpenAI.
//!
//! Azure OpenAI accepts Entra ID access tokens in place of static API keys.
//! [`DefaultCredential`] walks the usual ambient identity sources in order and
//! uses the first one that yields a token:
//!
//! 1. `AZURE_OPENAI_AD_TOKEN` — a token acquired out of band
//! 2. `AZURE_TENANT_ID` + `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` — service principal
//! 3. `IDENTITY_ENDPOINT` + `IDENTITY_HEADER` — App Service / Container Apps managed identity
//! 4. `az account get-access-token` — the developer's Azure CLI login
//!
//! The winning token is cached until five minutes before it expires, so a
//! batch run asks the identity provider once rather than once per image.

use crate::error::FormulaError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// OAuth scope for Azure Cognitive Services (Azure OpenAI included).
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Default Entra ID authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// A bearer token and, when known, its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    /// `None` means the source gave no expiry; the token is kept for the
    /// lifetime of the credential.
    pub expires_at: Option<SystemTime>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<SystemTime>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// True if the token is usable for at least the refresh margin.
    pub fn is_fresh(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => at
                .checked_sub(EXPIRY_MARGIN)
                .is_some_and(|deadline| deadline > SystemTime::now()),
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A source of bearer tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Obtain a token for `scope` (e.g. [`COGNITIVE_SERVICES_SCOPE`]).
    async fn get_token(&self, scope: &str) -> Result<AccessToken, FormulaError>;
}

/// `https://x/.default` → `https://x`, the form v1 token endpoints expect.
fn scope_to_resource(scope: &str) -> &str {
    scope.trim_end_matches("/.default")
}

fn unavailable(detail: impl Into<String>) -> FormulaError {
    FormulaError::CredentialUnavailable {
        detail: detail.into(),
    }
}

/// Parse an `expires_on` field that may be a number or a numeric string of
/// seconds since the Unix epoch.
pub fn parse_expires_on(value: &serde_json::Value) -> Option<SystemTime> {
    let secs = match value {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

// ── Static token ─────────────────────────────────────────────────────────

/// A token supplied directly, e.g. from `AZURE_OPENAI_AD_TOKEN`.
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    fn name(&self) -> &str {
        "static-token"
    }

    async fn get_token(&self, _scope: &str) -> Result<AccessToken, FormulaError> {
        Ok(AccessToken::new(self.token.clone(), None))
    }
}

// ── Service principal ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 client-credentials flow for a service principal.
pub struct ClientSecretCredential {
    client: reqwest::Client,
    authority_host: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    pub fn new(
        client: reqwest::Client,
        authority_host: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            authority_host: authority_host.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    fn name(&self) -> &str {
        "client-secret"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, FormulaError> {
        let url = self.token_url();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| unavailable(format!("token request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable token response: {e}")))?;

        let expires_at = parsed
            .expires_in
            .map(|secs| SystemTime::now() + Duration::from_secs(secs));
        Ok(AccessToken::new(parsed.access_token, expires_at))
    }
}

// ── Managed identity ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ManagedIdentityResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

/// Managed identity exposed through `IDENTITY_ENDPOINT` / `IDENTITY_HEADER`.
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    endpoint: String,
    header: String,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        header: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            header: header.into(),
            client_id,
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &str {
        "managed-identity"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, FormulaError> {
        let mut query = vec![
            ("api-version", "2019-08-01"),
            ("resource", scope_to_resource(scope)),
        ];
        if let Some(ref id) = self.client_id {
            query.push(("client_id", id.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .header("X-IDENTITY-HEADER", &self.header)
            .send()
            .await
            .map_err(|e| unavailable(format!("managed identity endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(format!(
                "managed identity returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: ManagedIdentityResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable managed identity response: {e}")))?;

        let expires_at = parsed.expires_on.as_ref().and_then(parse_expires_on);
        Ok(AccessToken::new(parsed.access_token, expires_at))
    }
}

// ── Azure CLI ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureCliToken {
    access_token: String,
    #[serde(default, rename = "expires_on")]
    expires_on: Option<serde_json::Value>,
}

/// Parse the JSON printed by `az account get-access-token -o json`.
pub fn parse_azure_cli_output(stdout: &[u8]) -> Result<AccessToken, FormulaError> {
    let parsed: AzureCliToken = serde_json::from_slice(stdout)
        .map_err(|e| unavailable(format!("unreadable Azure CLI output: {e}")))?;
    let expires_at = parsed.expires_on.as_ref().and_then(parse_expires_on);
    Ok(AccessToken::new(parsed.access_token, expires_at))
}

/// Token from the signed-in Azure CLI (`az login`).
#[derive(Debug, Default)]
pub struct AzureCliCredential;

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &str {
        "azure-cli"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, FormulaError> {
        let mut command = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.args(["/C", "az"]);
            c
        } else {
            tokio::process::Command::new("az")
        };
        command.args([
            "account",
            "get-access-token",
            "--resource",
            scope_to_resource(scope),
            "--output",
            "json",
        ]);

        let output = command
            .output()
            .await
            .map_err(|e| unavailable(format!("could not run Azure CLI: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!(
                "Azure CLI failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_azure_cli_output(&output.stdout)
    }
}

// ── Chain ────────────────────────────────────────────────────────────────

/// Tries each source in order and caches the first token obtained.
pub struct DefaultCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    cache: Mutex<Option<AccessToken>>,
}

impl DefaultCredential {
    /// Chain built from explicit sources, tried in the given order.
    pub fn with_sources(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            cache: Mutex::new(None),
        }
    }

    /// The standard chain, configured from the process environment.
    pub fn from_env(client: reqwest::Client) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), client)
    }

    /// The standard chain, configured from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F, client: reqwest::Client) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut sources: Vec<Arc<dyn TokenCredential>> = Vec::new();

        if let Some(token) = get("AZURE_OPENAI_AD_TOKEN") {
            sources.push(Arc::new(StaticTokenCredential::new(token)));
        }

        if let (Some(tenant), Some(client_id), Some(secret)) = (
            get("AZURE_TENANT_ID"),
            get("AZURE_CLIENT_ID"),
            get("AZURE_CLIENT_SECRET"),
        ) {
            let authority =
                get("AZURE_AUTHORITY_HOST").unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());
            sources.push(Arc::new(ClientSecretCredential::new(
                client.clone(),
                authority,
                tenant,
                client_id,
                secret,
            )));
        }

        if let (Some(endpoint), Some(header)) = (get("IDENTITY_ENDPOINT"), get("IDENTITY_HEADER")) {
            sources.push(Arc::new(ManagedIdentityCredential::new(
                client,
                endpoint,
                header,
                get("AZURE_CLIENT_ID"),
            )));
        }

        sources.push(Arc::new(AzureCliCredential));

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        debug!("Credential chain: {}", names.join(" → "));

        Self::with_sources(sources)
    }

    /// Names of the configured sources, in order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &str {
        "default"
    }

    async fn get_token(&self, scope: &str) -> Result<AccessToken, FormulaError> {
        let mut cache = self.cache.lock().await;
        if let Some(ref token) = *cache {
            if token.is_fresh() {
                return Ok(token.clone());
            }
        }

        let mut failures = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => {
                    info!("Acquired access token via {}", source.name());
                    *cache = Some(token.clone());
                    return Ok(token);
                }
                Err(e) => {
                    debug!("Credential {} unavailable: {}", source.name(), e);
                    failures.push(format!("  • {}: {}", source.name(), e));
                }
            }
        }

        Err(unavailable(format!(
            "Tried:\n{}\nRun `az login`, or set AZURE_OPENAI_AD_TOKEN or the AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET triple.",
            failures.join("\n")
        )))
    }
}
