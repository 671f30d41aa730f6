// Identity Providers
// Generic IdentityProvider trait plus the Facebook implementation. The
// reconciliation core only ever sees the trait and the ExternalIdentity it
// yields.

use async_trait::async_trait;

use crate::error::GateError;
use crate::identity::ExternalIdentity;

pub mod facebook;

pub use facebook::FacebookProvider;

/// Credentials and callback address for one provider instance.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub app_id: String,
    pub app_secret: String,

    /// Absolute URL the provider redirects back to
    pub redirect_uri: String,
}

/// Authorization-code OAuth2 exchange against one identity provider.
/// Implementations are stateless; one instance serves concurrent logins.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stable provider name used in routes and audit events.
    fn name(&self) -> &'static str;

    /// Front-channel URL the visitor is sent to, carrying the anti-forgery
    /// state value.
    fn authorization_url(&self, state: &str) -> Result<String, GateError>;

    /// Back-channel exchange: authorization code to access token.
    async fn exchange_code(&self, code: &str) -> Result<String, GateError>;

    /// Fetch the user's profile with an access token.
    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalIdentity, GateError>;
}

/// Build a provider by name from the current plugin credentials.
pub fn create_provider(
    name: &str,
    config: ProviderConfig,
) -> Result<Box<dyn IdentityProvider>, GateError> {
    match name {
        "facebook" => Ok(Box::new(FacebookProvider::new(config)?)),
        other => Err(GateError::InvalidConfig {
            key: "provider".to_string(),
            reason: format!("unsupported provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            app_id: "app-1".to_string(),
            app_secret: "s3cret".to_string(),
            redirect_uri: "http://localhost:4000/auth/facebook/callback".to_string(),
        }
    }

    #[test]
    fn test_factory_known_provider() {
        let provider = create_provider("facebook", config()).unwrap();
        assert_eq!(provider.name(), "facebook");
    }

    #[test]
    fn test_factory_unknown_provider() {
        let result = create_provider("myspace", config());
        assert!(matches!(result, Err(GateError::InvalidConfig { .. })));
    }
}
