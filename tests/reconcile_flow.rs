// End-to-end reconciliation scenarios wired through the assembled
// application state: first-visit registration, pre-approved registration,
// and an existing account blocked on administrator approval.

use std::sync::Arc;

use treegate::directory::NewAccount;
use treegate::ledger::{DatasetGrant, EditRole, PreApprovalEntry};
use treegate::routes::AppState;
use treegate::{Config, ExternalIdentity, GateError, Outcome};

fn state() -> Arc<AppState> {
    treegate::build_state(&Config::default())
}

fn identity(id: &str, email: &str) -> ExternalIdentity {
    ExternalIdentity {
        id: id.to_string(),
        email: Some(email.to_string()),
        name: "Test Person".to_string(),
        verified: true,
    }
}

#[tokio::test]
async fn test_first_visit_creates_pending_account() {
    let state = state();

    let outcome = state
        .reconciler
        .reconcile(&identity("1000234", "ada@x.com"), &Default::default())
        .unwrap();

    let account = match outcome {
        Outcome::Registered {
            account,
            admin_approved: false,
        } => account,
        other => panic!("expected pending registration, got {:?}", other),
    };

    assert_eq!(account.username, "1000234");
    assert_eq!(account.email, "ada@x.com");
    assert!(account.email_verified);
    assert!(!account.admin_approved);

    // The account is persisted and found again by external id.
    let found = state.directory.find_by_external_id("1000234").unwrap();
    assert_eq!(found.unwrap().id, account.id);

    // A pending account cannot log in on the next attempt.
    let result = state
        .reconciler
        .reconcile(&identity("1000234", "ada@x.com"), &Default::default());
    assert!(matches!(result, Err(GateError::NotApproved)));
}

#[tokio::test]
async fn test_preapproved_first_visit_logs_straight_in() {
    let state = state();
    let grant = DatasetGrant {
        root_record_id: Some("I1".to_string()),
        default_record_id: Some("I7".to_string()),
        edit_role: EditRole::Editor,
    };
    state
        .ledger
        .upsert("1000234", PreApprovalEntry::single("smith-tree", grant.clone()))
        .unwrap();

    let outcome = state
        .reconciler
        .reconcile(&identity("1000234", "ada@x.com"), &Default::default())
        .unwrap();

    let account = match outcome {
        Outcome::Registered {
            account,
            admin_approved: true,
        } => account,
        other => panic!("expected approved registration, got {:?}", other),
    };

    // Grants applied, entry consumed.
    let grants = state.permissions.grants_for(&account.id).unwrap();
    assert_eq!(grants.get("smith-tree"), Some(&grant));
    assert!(state.ledger.get("1000234").unwrap().is_none());

    // The approved account can claim a login token end to end.
    let token = state.login_tokens.issue(&account.id).unwrap();
    assert_eq!(
        state.login_tokens.claim(&token).unwrap().as_deref(),
        Some(account.id.as_str())
    );
    assert_eq!(state.login_tokens.claim(&token).unwrap(), None);
}

#[tokio::test]
async fn test_existing_unapproved_account_is_blocked() {
    let state = state();
    state
        .directory
        .create_account(NewAccount {
            username: "ada".to_string(),
            real_name: "Ada".to_string(),
            email: "ada@x.com".to_string(),
            password: "p".to_string(),
            verification_hash: "h".to_string(),
            email_verified: true,
            admin_approved: false,
            linked_external_id: None,
        })
        .unwrap();

    let result = state
        .reconciler
        .reconcile(&identity("1000234", "ada@x.com"), &Default::default());
    assert!(matches!(result, Err(GateError::NotApproved)));

    // Nothing was linked and no second account appeared.
    let accounts = state.directory.all_accounts().unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].linked_external_id, None);
}

#[tokio::test]
async fn test_existing_approved_account_logs_in_and_links() {
    let state = state();
    state
        .directory
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

    let outcome = state
        .reconciler
        .reconcile(&identity("1000234", "ada@x.com"), &Default::default())
        .unwrap();

    match outcome {
        Outcome::LoggedIn(account) => {
            assert_eq!(account.username, "ada");
            assert_eq!(account.linked_external_id.as_deref(), Some("1000234"));
        }
        other => panic!("expected login, got {:?}", other),
    }

    // Later visits find the account by the link even if the email changes
    // on the provider side.
    let outcome = state
        .reconciler
        .reconcile(&identity("1000234", "new-address@x.com"), &Default::default())
        .unwrap();
    assert!(matches!(outcome, Outcome::LoggedIn(a) if a.username == "ada"));
}
