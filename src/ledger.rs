// Pre-approval Ledger
// Administrators stage per-dataset grants for external usernames before the
// user's first login. An entry is consumed exactly once, at the moment it is
// applied to a freshly provisioned account.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use crate::directory::UserDirectory;
use crate::error::GateError;
use crate::identity::cleanse_username;

/// Role granted on a single dataset, matching the host's role ladder.
/// Serialized values are the host's stored role tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditRole {
    #[serde(rename = "none")]
    Visitor,
    #[serde(rename = "access")]
    Member,
    #[serde(rename = "edit")]
    Editor,
    #[serde(rename = "accept")]
    Moderator,
    #[serde(rename = "admin")]
    Manager,
}

impl EditRole {
    /// Parse the host's stored role token.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "none" => Some(EditRole::Visitor),
            "access" => Some(EditRole::Member),
            "edit" => Some(EditRole::Editor),
            "accept" => Some(EditRole::Moderator),
            "admin" => Some(EditRole::Manager),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            EditRole::Visitor => "none",
            EditRole::Member => "access",
            EditRole::Editor => "edit",
            EditRole::Moderator => "accept",
            EditRole::Manager => "admin",
        }
    }
}

/// Permission fields staged for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetGrant {
    /// Root individual shown when the user opens the tree
    pub root_record_id: Option<String>,

    /// Record representing the user themselves within the tree
    pub default_record_id: Option<String>,

    pub edit_role: EditRole,
}

/// Grants staged for one external username, keyed by dataset id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreApprovalEntry {
    pub grants: HashMap<String, DatasetGrant>,
}

impl PreApprovalEntry {
    pub fn single(dataset_id: &str, grant: DatasetGrant) -> Self {
        let mut grants = HashMap::new();
        grants.insert(dataset_id.to_string(), grant);
        Self { grants }
    }
}

/// Keyed store for pre-approval entries. Keys are normalized usernames;
/// implementations must make each operation a single atomic
/// read-modify-write so concurrent admin edits and racing registrations
/// cannot lose updates or double-apply an entry.
pub trait PreApprovalLedger: Send + Sync {
    fn get(&self, external_username: &str) -> Result<Option<PreApprovalEntry>, GateError>;

    fn upsert(&self, external_username: &str, entry: PreApprovalEntry) -> Result<(), GateError>;

    /// Returns true when an entry was present and removed.
    fn delete(&self, external_username: &str) -> Result<bool, GateError>;

    /// Atomically claim an entry: get and delete in one step. Registration
    /// uses this so a grant is applied at most once.
    fn take(&self, external_username: &str) -> Result<Option<PreApprovalEntry>, GateError>;

    fn usernames(&self) -> Result<Vec<String>, GateError>;
}

/// In-memory ledger. One mutex guards the whole map, so every trait method
/// is a single critical section.
#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, PreApprovalEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, PreApprovalEntry>>, GateError> {
        self.entries
            .lock()
            .map_err(|e| GateError::Internal(format!("ledger lock failed: {}", e)))
    }
}

impl PreApprovalLedger for InMemoryLedger {
    fn get(&self, external_username: &str) -> Result<Option<PreApprovalEntry>, GateError> {
        Ok(self.lock()?.get(&cleanse_username(external_username)).cloned())
    }

    fn upsert(&self, external_username: &str, entry: PreApprovalEntry) -> Result<(), GateError> {
        self.lock()?.insert(cleanse_username(external_username), entry);
        Ok(())
    }

    fn delete(&self, external_username: &str) -> Result<bool, GateError> {
        Ok(self
            .lock()?
            .remove(&cleanse_username(external_username))
            .is_some())
    }

    fn take(&self, external_username: &str) -> Result<Option<PreApprovalEntry>, GateError> {
        Ok(self.lock()?.remove(&cleanse_username(external_username)))
    }

    fn usernames(&self) -> Result<Vec<String>, GateError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Admin-facing upsert. Normalizes the username and rejects entries for
/// identities that already registered; a ledger entry is only meaningful
/// before the first login. Returns the normalized username on success.
pub fn upsert_entry(
    directory: &dyn UserDirectory,
    ledger: &dyn PreApprovalLedger,
    raw_username: &str,
    entry: PreApprovalEntry,
) -> Result<String, GateError> {
    let username = cleanse_username(raw_username);
    if username.is_empty() {
        return Err(GateError::InvalidLink(
            "missing external username".to_string(),
        ));
    }

    if directory.find_by_external_id(&username)?.is_some() {
        warn!(username = %username, "refusing pre-approval for an already-linked identity");
        return Err(GateError::InvalidLink(
            "an account is already linked to that identity".to_string(),
        ));
    }

    ledger.upsert(&username, entry)?;
    Ok(username)
}

/// Admin-facing delete; idempotent. Returns whether an entry existed.
pub fn delete_entry(
    ledger: &dyn PreApprovalLedger,
    raw_username: &str,
) -> Result<bool, GateError> {
    let username = cleanse_username(raw_username);
    if username.is_empty() {
        return Ok(false);
    }
    ledger.delete(&username)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, NewAccount};

    fn grant() -> DatasetGrant {
        DatasetGrant {
            root_record_id: Some("I1".to_string()),
            default_record_id: Some("I2".to_string()),
            edit_role: EditRole::Member,
        }
    }

    #[test]
    fn test_upsert_then_delete_round_trip() {
        let dir = InMemoryDirectory::new();
        let ledger = InMemoryLedger::new();

        upsert_entry(
            &dir,
            &ledger,
            "John.Doe",
            PreApprovalEntry::single("smith-tree", grant()),
        )
        .unwrap();
        assert!(ledger.get("johndoe").unwrap().is_some());

        assert!(delete_entry(&ledger, "JOHNDOE").unwrap());
        assert!(ledger.get("johndoe").unwrap().is_none());
        // idempotent
        assert!(!delete_entry(&ledger, "johndoe").unwrap());
    }

    #[test]
    fn test_keys_are_normalized() {
        let ledger = InMemoryLedger::new();
        ledger
            .upsert("John.Doe", PreApprovalEntry::single("t", grant()))
            .unwrap();

        assert!(ledger.get("johndoe").unwrap().is_some());
        assert_eq!(ledger.usernames().unwrap(), vec!["johndoe".to_string()]);
    }

    #[test]
    fn test_take_is_single_use() {
        let ledger = InMemoryLedger::new();
        ledger
            .upsert("abc", PreApprovalEntry::single("t", grant()))
            .unwrap();

        assert!(ledger.take("abc").unwrap().is_some());
        assert!(ledger.take("abc").unwrap().is_none());
    }

    #[test]
    fn test_upsert_rejects_linked_identity() {
        let dir = InMemoryDirectory::new();
        let account = dir
            .create_account(NewAccount {
                username: "ada".to_string(),
                real_name: "Ada".to_string(),
                email: "ada@x.com".to_string(),
                password: "p".to_string(),
                verification_hash: "h".to_string(),
                email_verified: true,
                admin_approved: true,
                linked_external_id: None,
            })
            .unwrap();
        dir.link_external_id(&account.id, "johndoe").unwrap();

        let ledger = InMemoryLedger::new();
        let result = upsert_entry(
            &dir,
            &ledger,
            "John.Doe",
            PreApprovalEntry::single("t", grant()),
        );

        assert!(matches!(result, Err(GateError::InvalidLink(_))));
        assert!(ledger.get("johndoe").unwrap().is_none());
    }

    #[test]
    fn test_edit_role_tokens() {
        assert_eq!(EditRole::parse("edit"), Some(EditRole::Editor));
        assert_eq!(EditRole::parse("bogus"), None);
        assert_eq!(EditRole::Manager.as_token(), "admin");

        let json = serde_json::to_string(&EditRole::Moderator).unwrap();
        assert_eq!(json, "\"accept\"");
    }
}
