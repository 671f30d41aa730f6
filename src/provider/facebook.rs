// Facebook Provider
// Authorization-code flow against the Facebook Graph API. The token exchange
// and profile fetch both use simple GET requests with query parameters, as
// the Graph API expects.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{IdentityProvider, ProviderConfig};
use crate::error::GateError;
use crate::identity::ExternalIdentity;

const FACEBOOK_AUTH_URL: &str = "https://www.facebook.com/v13.0/dialog/oauth";
const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v13.0/oauth/access_token";
const FACEBOOK_PROFILE_URL: &str = "https://graph.facebook.com/v13.0/me";

/// Permissions requested from the user. Email is the critical one; the
/// login flow cannot correlate accounts without it.
const SCOPES: &[&str] = &["email", "public_profile"];

/// Profile fields requested alongside the id.
const PROFILE_FIELDS: &str = "id,email,name,verified";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub struct FacebookProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl FacebookProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, GateError> {
        if config.app_id.is_empty() || config.app_secret.is_empty() {
            return Err(GateError::NotConfigured);
        }

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                GateError::ProviderExchangeFailed(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl IdentityProvider for FacebookProvider {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn authorization_url(&self, state: &str) -> Result<String, GateError> {
        let mut url = url::Url::parse(FACEBOOK_AUTH_URL).map_err(|e| {
            GateError::InvalidConfig {
                key: "auth_url".to_string(),
                reason: e.to_string(),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.app_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state)
            .append_pair("scope", &SCOPES.join(","));
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, GateError> {
        debug!("exchanging authorization code");
        let response = self
            .http_client
            .get(FACEBOOK_TOKEN_URL)
            .query(&[
                ("client_id", self.config.app_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_secret", self.config.app_secret.as_str()),
                ("code", code),
            ])
            .send()
            .await?;

        let status = response.status();
        let body: TokenResponse = response.json().await?;

        if let Some(error) = body.error {
            warn!(
                status = %status,
                kind = ?error.kind,
                "token exchange rejected"
            );
            return Err(GateError::ProviderExchangeFailed(
                error
                    .message
                    .unwrap_or_else(|| "token exchange rejected".to_string()),
            ));
        }

        body.access_token.ok_or_else(|| {
            GateError::ProviderExchangeFailed("token response had no access_token".to_string())
        })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalIdentity, GateError> {
        let response = self
            .http_client
            .get(FACEBOOK_PROFILE_URL)
            .query(&[("fields", PROFILE_FIELDS), ("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GateError::ProviderExchangeFailed(format!(
                "profile request failed with status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response.json().await?;
        ExternalIdentity::from_profile_json(value)
    }
}
