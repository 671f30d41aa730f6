// Gateway Error Types
// One terminal error per failed login or admin request; nothing is retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    // Reconciliation outcomes that block the login
    #[error("external identity is not verified by the provider")]
    UnverifiedIdentity,

    #[error("external identity has no email address")]
    MissingEmail,

    #[error("account email is not verified")]
    NotVerified,

    #[error("account has not been approved by an administrator")]
    NotApproved,

    #[error("self-registration is disabled")]
    RegistrationDisabled,

    #[error("account creation failed: {0}")]
    AccountCreationFailed(String),

    // OAuth exchange failures
    #[error("provider exchange failed: {0}")]
    ProviderExchangeFailed(String),

    #[error("anti-forgery state mismatch")]
    StateMismatch,

    // Administrative failures
    #[error("invalid account link: {0}")]
    InvalidLink(String),

    // Configuration failures
    #[error("provider credentials have not been configured")]
    NotConfigured,

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    // Storage failures from the host collaborators
    #[error("directory error: {0}")]
    Directory(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::ProviderExchangeFailed(err.to_string())
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::ProviderExchangeFailed(format!("malformed provider response: {}", err))
    }
}

impl GateError {
    /// HTTP status for error responses
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::UnverifiedIdentity | GateError::NotVerified | GateError::NotApproved => 403,

            GateError::MissingEmail
            | GateError::RegistrationDisabled
            | GateError::StateMismatch
            | GateError::InvalidLink(_) => 400,

            GateError::ProviderExchangeFailed(_) => 502,

            GateError::NotConfigured
            | GateError::InvalidConfig { .. }
            | GateError::AccountCreationFailed(_)
            | GateError::Directory(_)
            | GateError::Internal(_) => 500,
        }
    }

    /// Message rendered to the visitor. Each failure is distinct so the user
    /// knows whether to fix something on the provider side, wait for an
    /// administrator, or restart the flow.
    pub fn user_message(&self) -> String {
        match self {
            GateError::UnverifiedIdentity => {
                "Only verified accounts are authorized. Please verify your account with the \
                 identity provider and then try again."
                    .to_string()
            }
            GateError::MissingEmail => {
                "You must grant access to your email address in order to use this website. \
                 Please remove the application on the provider site and try again."
                    .to_string()
            }
            GateError::NotVerified => {
                "This account has not been verified. Please check your email for a \
                 verification message."
                    .to_string()
            }
            GateError::NotApproved => {
                "This account has not been approved. Please wait for an administrator to \
                 approve it."
                    .to_string()
            }
            GateError::RegistrationDisabled => {
                "The administrator has disabled registrations.".to_string()
            }
            GateError::AccountCreationFailed(_) => {
                "Unable to create your account. Please try again.".to_string()
            }
            GateError::ProviderExchangeFailed(_) => {
                "Your login code is invalid. This can happen if you hit back in your browser \
                 after login or if logins have been set up incorrectly by the administrator."
                    .to_string()
            }
            GateError::StateMismatch => {
                "The state does not match. You may have been tricked into loading this page."
                    .to_string()
            }
            GateError::InvalidLink(reason) => format!("The user could not be linked: {}", reason),
            GateError::NotConfigured => {
                "Logins with the identity provider have not been set up by the administrator."
                    .to_string()
            }
            GateError::InvalidConfig { .. } | GateError::Directory(_) | GateError::Internal(_) => {
                "An error occurred trying to log you in. Please try again.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GateError::NotApproved.status_code(), 403);
        assert_eq!(GateError::StateMismatch.status_code(), 400);
        assert_eq!(
            GateError::ProviderExchangeFailed("boom".to_string()).status_code(),
            502
        );
        assert_eq!(GateError::NotConfigured.status_code(), 500);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            GateError::UnverifiedIdentity,
            GateError::MissingEmail,
            GateError::NotVerified,
            GateError::NotApproved,
            GateError::RegistrationDisabled,
            GateError::AccountCreationFailed("x".to_string()),
            GateError::ProviderExchangeFailed("x".to_string()),
            GateError::StateMismatch,
            GateError::NotConfigured,
        ];

        let messages: Vec<String> = errors.iter().map(|e| e.user_message()).collect();
        for (i, a) in messages.iter().enumerate() {
            for (j, b) in messages.iter().enumerate() {
                if i != j {
                    assert_ne!(
                        a, b,
                        "messages for {:?} and {:?} collide",
                        errors[i], errors[j]
                    );
                }
            }
        }
    }

    #[test]
    fn test_display() {
        let err = GateError::InvalidConfig {
            key: "redirect_uri".to_string(),
            reason: "not a URL".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration value for redirect_uri: not a URL"
        );
    }
}
