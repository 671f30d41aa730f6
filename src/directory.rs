// Host User Directory
// The gateway does not own user storage; it talks to the host application's
// directory through this trait. An in-memory implementation backs tests and
// the demo server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::GateError;
use crate::ledger::DatasetGrant;

/// Account owned by the host application. The gateway reads it and patches
/// `linked_external_id` plus the initial provisioning fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAccount {
    /// Host-assigned account id
    pub id: String,

    /// Login username, unique within the host
    pub username: String,

    /// Display name
    pub real_name: String,

    /// Contact email
    pub email: String,

    /// Set once the user has confirmed their email address
    pub email_verified: bool,

    /// Set once an administrator has approved the account
    pub admin_approved: bool,

    /// Administrators bypass the verification and approval gates
    pub is_admin: bool,

    /// External-provider user id, unique across accounts when set
    pub linked_external_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Fields for provisioning a new account during registration.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub real_name: String,
    pub email: String,
    /// Opaque random password, never surfaced to the user
    pub password: String,
    /// Random hash for the host's email-verification machinery
    pub verification_hash: String,
    pub email_verified: bool,
    pub admin_approved: bool,
    pub linked_external_id: Option<String>,
}

/// Host user directory operations consumed by the gateway.
pub trait UserDirectory: Send + Sync {
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<LocalAccount>, GateError>;

    fn find_by_email(&self, email: &str) -> Result<Option<LocalAccount>, GateError>;

    fn find_by_username(&self, username: &str) -> Result<Option<LocalAccount>, GateError>;

    fn find_by_id(&self, account_id: &str) -> Result<Option<LocalAccount>, GateError>;

    fn create_account(&self, new: NewAccount) -> Result<LocalAccount, GateError>;

    /// Set `linked_external_id` on an account. Callers must have checked
    /// that no other account carries the same external id.
    fn link_external_id(&self, account_id: &str, external_id: &str) -> Result<(), GateError>;

    fn unlink_external_id(&self, account_id: &str) -> Result<(), GateError>;

    /// All accounts, for the admin summary.
    fn all_accounts(&self) -> Result<Vec<LocalAccount>, GateError>;
}

/// Host dataset permission store: per-account, per-dataset grants.
pub trait PermissionStore: Send + Sync {
    fn apply_grant(
        &self,
        account_id: &str,
        dataset_id: &str,
        grant: &DatasetGrant,
    ) -> Result<(), GateError>;

    fn grants_for(&self, account_id: &str) -> Result<HashMap<String, DatasetGrant>, GateError>;
}

/// In-memory directory used by tests and the demo server.
#[derive(Default)]
pub struct InMemoryDirectory {
    accounts: Mutex<HashMap<String, LocalAccount>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing host account (tests and demo setup).
    pub fn insert(&self, account: LocalAccount) {
        self.accounts
            .lock()
            .expect("directory mutex poisoned")
            .insert(account.id.clone(), account);
    }

    fn find_where<F>(&self, predicate: F) -> Result<Option<LocalAccount>, GateError>
    where
        F: Fn(&LocalAccount) -> bool,
    {
        let accounts = self
            .accounts
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;
        Ok(accounts.values().find(|a| predicate(a)).cloned())
    }
}

impl UserDirectory for InMemoryDirectory {
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<LocalAccount>, GateError> {
        self.find_where(|a| a.linked_external_id.as_deref() == Some(external_id))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<LocalAccount>, GateError> {
        self.find_where(|a| a.email == email)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<LocalAccount>, GateError> {
        self.find_where(|a| a.username == username)
    }

    fn find_by_id(&self, account_id: &str) -> Result<Option<LocalAccount>, GateError> {
        self.find_where(|a| a.id == account_id)
    }

    fn create_account(&self, new: NewAccount) -> Result<LocalAccount, GateError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;

        if accounts.values().any(|a| a.username == new.username) {
            return Err(GateError::AccountCreationFailed(format!(
                "username '{}' already exists",
                new.username
            )));
        }

        let account = LocalAccount {
            id: uuid::Uuid::new_v4().to_string(),
            username: new.username,
            real_name: new.real_name,
            email: new.email,
            email_verified: new.email_verified,
            admin_approved: new.admin_approved,
            is_admin: false,
            linked_external_id: new.linked_external_id,
            created_at: Utc::now(),
        };

        debug!(account_id = %account.id, username = %account.username, "created account");
        accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    fn link_external_id(&self, account_id: &str, external_id: &str) -> Result<(), GateError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;

        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| GateError::Directory(format!("account {} not found", account_id)))?;
        account.linked_external_id = Some(external_id.to_string());
        Ok(())
    }

    fn unlink_external_id(&self, account_id: &str) -> Result<(), GateError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;

        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| GateError::Directory(format!("account {} not found", account_id)))?;
        account.linked_external_id = None;
        Ok(())
    }

    fn all_accounts(&self) -> Result<Vec<LocalAccount>, GateError> {
        let accounts = self
            .accounts
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;
        let mut all: Vec<LocalAccount> = accounts.values().cloned().collect();
        all.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(all)
    }
}

/// In-memory dataset permission store.
#[derive(Default)]
pub struct InMemoryPermissions {
    // account_id -> dataset_id -> grant
    grants: Mutex<HashMap<String, HashMap<String, DatasetGrant>>>,
}

impl InMemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionStore for InMemoryPermissions {
    fn apply_grant(
        &self,
        account_id: &str,
        dataset_id: &str,
        grant: &DatasetGrant,
    ) -> Result<(), GateError> {
        let mut grants = self
            .grants
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;
        grants
            .entry(account_id.to_string())
            .or_default()
            .insert(dataset_id.to_string(), grant.clone());
        Ok(())
    }

    fn grants_for(&self, account_id: &str) -> Result<HashMap<String, DatasetGrant>, GateError> {
        let grants = self
            .grants
            .lock()
            .map_err(|e| GateError::Directory(format!("lock failed: {}", e)))?;
        Ok(grants.get(account_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EditRole;

    fn new_account(username: &str, email: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            real_name: "Test User".to_string(),
            email: email.to_string(),
            password: "secret".to_string(),
            verification_hash: "hash".to_string(),
            email_verified: true,
            admin_approved: false,
            linked_external_id: None,
        }
    }

    #[test]
    fn test_create_and_lookup() {
        let dir = InMemoryDirectory::new();
        let account = dir.create_account(new_account("ada", "ada@x.com")).unwrap();

        assert!(dir.find_by_username("ada").unwrap().is_some());
        assert!(dir.find_by_email("ada@x.com").unwrap().is_some());
        assert!(dir.find_by_id(&account.id).unwrap().is_some());
        assert!(dir.find_by_external_id("123").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let dir = InMemoryDirectory::new();
        dir.create_account(new_account("ada", "a@x.com")).unwrap();
        let result = dir.create_account(new_account("ada", "b@x.com"));
        assert!(matches!(result, Err(GateError::AccountCreationFailed(_))));
    }

    #[test]
    fn test_link_and_unlink() {
        let dir = InMemoryDirectory::new();
        let account = dir.create_account(new_account("ada", "a@x.com")).unwrap();

        dir.link_external_id(&account.id, "fb-123").unwrap();
        let found = dir.find_by_external_id("fb-123").unwrap().unwrap();
        assert_eq!(found.id, account.id);

        dir.unlink_external_id(&account.id).unwrap();
        assert!(dir.find_by_external_id("fb-123").unwrap().is_none());
    }

    #[test]
    fn test_apply_grant() {
        let perms = InMemoryPermissions::new();
        let grant = DatasetGrant {
            root_record_id: Some("I1".to_string()),
            default_record_id: None,
            edit_role: EditRole::Editor,
        };

        perms.apply_grant("acct-1", "smith-tree", &grant).unwrap();
        let grants = perms.grants_for("acct-1").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants["smith-tree"].root_record_id.as_deref(), Some("I1"));
    }
}
