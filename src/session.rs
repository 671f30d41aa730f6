// Flow Session Management
// Two short-lived token stores back the login flow: anti-forgery state for
// the round trip to the provider, and one-time login tokens that hand a
// finished reconciliation over to the host session layer without echoing
// credentials through the browser.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::GateError;
use crate::reconcile::random_secret;

/// How long a visitor has to come back from the provider.
const FLOW_TTL_MINUTES: i64 = 15;

/// How long a completed login may sit unclaimed. The redirect consumes it
/// within one request, so this only bounds abandoned flows.
const LOGIN_TOKEN_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
struct FlowSession {
    /// Where to send the user after a successful login
    return_url: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Pending OAuth round trips, keyed by the anti-forgery state value.
#[derive(Default)]
pub struct FlowSessionStore {
    sessions: Mutex<HashMap<String, FlowSession>>,
}

impl FlowSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a flow: mint a state value and remember the return URL.
    pub fn begin(&self, return_url: Option<String>) -> Result<String, GateError> {
        let state = random_secret();
        let mut sessions = self.lock()?;
        sessions.retain(|_, s| s.expires_at > Utc::now());
        sessions.insert(
            state.clone(),
            FlowSession {
                return_url,
                expires_at: Utc::now() + Duration::minutes(FLOW_TTL_MINUTES),
            },
        );
        debug!(pending = sessions.len(), "flow session created");
        Ok(state)
    }

    /// Redeem the state echoed back by the provider. A miss is a forged or
    /// replayed callback; each state works exactly once.
    pub fn redeem(&self, state: &str) -> Result<Option<String>, GateError> {
        let mut sessions = self.lock()?;
        match sessions.remove(state) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.return_url),
            Some(_) => Err(GateError::StateMismatch),
            None => Err(GateError::StateMismatch),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, FlowSession>>, GateError> {
        self.sessions
            .lock()
            .map_err(|e| GateError::Internal(format!("flow session lock failed: {}", e)))
    }
}

#[derive(Debug, Clone)]
struct LoginToken {
    account_id: String,
    expires_at: DateTime<Utc>,
}

/// One-time tokens minted after reconciliation succeeds. The callback
/// handler redirects to the host login endpoint with the token; the host
/// claims it server-side and opens its own session.
#[derive(Default)]
pub struct LoginTokenStore {
    tokens: Mutex<HashMap<String, LoginToken>>,
}

impl LoginTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, account_id: &str) -> Result<String, GateError> {
        let token = random_secret();
        let mut tokens = self.lock()?;
        tokens.retain(|_, t| t.expires_at > Utc::now());
        tokens.insert(
            token.clone(),
            LoginToken {
                account_id: account_id.to_string(),
                expires_at: Utc::now() + Duration::seconds(LOGIN_TOKEN_TTL_SECONDS),
            },
        );
        Ok(token)
    }

    /// Claim a token, returning the account it was issued for. Single use.
    pub fn claim(&self, token: &str) -> Result<Option<String>, GateError> {
        let mut tokens = self.lock()?;
        Ok(tokens
            .remove(token)
            .filter(|t| t.expires_at > Utc::now())
            .map(|t| t.account_id))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LoginToken>>, GateError> {
        self.tokens
            .lock()
            .map_err(|e| GateError::Internal(format!("login token lock failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_state_round_trip() {
        let store = FlowSessionStore::new();
        let state = store.begin(Some("/tree/smith".to_string())).unwrap();

        let return_url = store.redeem(&state).unwrap();
        assert_eq!(return_url.as_deref(), Some("/tree/smith"));
    }

    #[test]
    fn test_flow_state_single_use() {
        let store = FlowSessionStore::new();
        let state = store.begin(None).unwrap();

        assert!(store.redeem(&state).is_ok());
        assert!(matches!(
            store.redeem(&state),
            Err(GateError::StateMismatch)
        ));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let store = FlowSessionStore::new();
        assert!(matches!(
            store.redeem("never-issued"),
            Err(GateError::StateMismatch)
        ));
    }

    #[test]
    fn test_states_are_unique() {
        let store = FlowSessionStore::new();
        let a = store.begin(None).unwrap();
        let b = store.begin(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_login_token_single_use() {
        let store = LoginTokenStore::new();
        let token = store.issue("acct-1").unwrap();

        assert_eq!(store.claim(&token).unwrap().as_deref(), Some("acct-1"));
        assert_eq!(store.claim(&token).unwrap(), None);
    }

    #[test]
    fn test_unknown_login_token() {
        let store = LoginTokenStore::new();
        assert_eq!(store.claim("nope").unwrap(), None);
    }
}
