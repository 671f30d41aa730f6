// Identity Reconciliation
// The decision core of the gateway: given an authenticated external
// identity, either log in an existing local account, block on a
// verification/approval gate, or provision a new account and apply any
// staged pre-approval grants.

use std::sync::Arc;
use tracing::{debug, info};

use crate::audit::AuditLog;
use crate::directory::{LocalAccount, NewAccount, PermissionStore, UserDirectory};
use crate::error::GateError;
use crate::identity::{ExternalIdentity, cleanse_username, truncate_username};
use crate::ledger::PreApprovalLedger;

/// Request-scoped policy snapshot. Taken from the plugin settings and the
/// host's global account policy at the start of each request; reconciliation
/// never reads ambient configuration.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub require_verified: bool,
    pub registration_enabled: bool,
    pub require_admin_approval: bool,
    pub max_username_len: usize,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            require_verified: true,
            registration_enabled: true,
            require_admin_approval: true,
            max_username_len: 32,
        }
    }
}

/// Successful reconciliation result.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// An existing, authorized account; `linked_external_id` has been set.
    LoggedIn(LocalAccount),

    /// A freshly provisioned account. When `admin_approved` is false the
    /// user still has to wait for an administrator before logging in.
    Registered {
        account: LocalAccount,
        admin_approved: bool,
    },
}

pub struct Reconciler {
    directory: Arc<dyn UserDirectory>,
    ledger: Arc<dyn PreApprovalLedger>,
    permissions: Arc<dyn PermissionStore>,
    audit: Arc<AuditLog>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        ledger: Arc<dyn PreApprovalLedger>,
        permissions: Arc<dyn PermissionStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            directory,
            ledger,
            permissions,
            audit,
        }
    }

    /// Map an external identity to a local account outcome. Every error is
    /// terminal for the request; the caller clears flow state and renders
    /// the matching message.
    pub fn reconcile(
        &self,
        identity: &ExternalIdentity,
        policy: &ReconcilePolicy,
    ) -> Result<Outcome, GateError> {
        if policy.require_verified && !identity.verified {
            self.audit
                .login_failure(None, "external identity not verified");
            return Err(GateError::UnverifiedIdentity);
        }

        let existing = match self.directory.find_by_external_id(&cleanse_username(&identity.id))? {
            Some(account) => Some(account),
            None => match &identity.email {
                None => {
                    self.audit.login_failure(None, "identity has no email");
                    return Err(GateError::MissingEmail);
                }
                // Implicit link: same email means the same person created a
                // manual account before trying social login.
                Some(email) => self.directory.find_by_email(email)?,
            },
        };

        match existing {
            Some(account) => self.login_existing(account, identity),
            None => self.register(identity, policy),
        }
    }

    /// Existing-account path: evaluate the verification and approval gates,
    /// then link the external id.
    fn login_existing(
        &self,
        account: LocalAccount,
        identity: &ExternalIdentity,
    ) -> Result<Outcome, GateError> {
        if !account.is_admin {
            if !account.email_verified {
                self.audit
                    .login_failure(Some(&account.username), "not verified");
                return Err(GateError::NotVerified);
            }
            if !account.admin_approved {
                self.audit
                    .login_failure(Some(&account.username), "not approved");
                return Err(GateError::NotApproved);
            }
        }

        // Links always hold the cleansed form so admin lookups and the
        // pre-approval guard agree on the key.
        self.directory
            .link_external_id(&account.id, &cleanse_username(&identity.id))?;
        let account = self
            .directory
            .find_by_id(&account.id)?
            .ok_or_else(|| GateError::Directory("account vanished during link".to_string()))?;

        self.audit.login_success(&account.username, &identity.id);
        info!(username = %account.username, external_id = %identity.id, "login");
        Ok(Outcome::LoggedIn(account))
    }

    /// Registration path: provision a local account and consume any staged
    /// pre-approval entry.
    fn register(
        &self,
        identity: &ExternalIdentity,
        policy: &ReconcilePolicy,
    ) -> Result<Outcome, GateError> {
        if !policy.registration_enabled {
            self.audit.login_failure(None, "registration disabled");
            return Err(GateError::RegistrationDisabled);
        }

        // The email presence was checked before the directory lookups.
        let email = identity
            .email
            .clone()
            .ok_or(GateError::MissingEmail)?;

        let username = self.pick_username(identity, &email, policy.max_username_len)?;
        let external_username = cleanse_username(&identity.id);

        // Peek only; the entry is claimed after the account exists, so a
        // failed create leaves it staged for the next attempt.
        let admin_approved =
            self.ledger.get(&external_username)?.is_some() || !policy.require_admin_approval;

        self.audit.registration_request(&username, &identity.id);

        let account = self.directory.create_account(NewAccount {
            username: username.clone(),
            real_name: identity.name.clone(),
            email,
            password: random_secret(),
            verification_hash: random_secret(),
            // The provider already verified the address.
            email_verified: true,
            admin_approved,
            linked_external_id: Some(external_username.clone()),
        })?;

        // Atomic claim: racing registrations both reach here at most once
        // for the same entry, and only one take() returns it.
        if let Some(entry) = self.ledger.take(&external_username)? {
            for (dataset_id, grant) in &entry.grants {
                debug!(
                    account_id = %account.id,
                    dataset = %dataset_id,
                    role = grant.edit_role.as_token(),
                    "applying pre-approval grant"
                );
                self.permissions
                    .apply_grant(&account.id, dataset_id, grant)?;
            }
        }

        info!(
            username = %account.username,
            external_id = %identity.id,
            admin_approved,
            "registered"
        );
        Ok(Outcome::Registered {
            account,
            admin_approved,
        })
    }

    /// Candidate username: the cleansed external id, falling back to the
    /// truncated email on collision. The fallback is re-checked too;
    /// a second collision fails outright rather than risking a silent
    /// create failure.
    fn pick_username(
        &self,
        identity: &ExternalIdentity,
        email: &str,
        max_len: usize,
    ) -> Result<String, GateError> {
        let candidate = truncate_username(&cleanse_username(&identity.id), max_len);

        if self.directory.find_by_username(&candidate)?.is_none() {
            return Ok(candidate);
        }

        let fallback = truncate_username(email, max_len);
        if self.directory.find_by_username(&fallback)?.is_some() {
            self.audit
                .login_failure(None, "no available username for registration");
            return Err(GateError::AccountCreationFailed(format!(
                "usernames '{}' and '{}' are both taken",
                candidate, fallback
            )));
        }

        Ok(fallback)
    }
}

/// Opaque random secret for generated passwords and verification hashes.
pub fn random_secret() -> String {
    format!("{:032x}", rand::random::<u128>())
}
