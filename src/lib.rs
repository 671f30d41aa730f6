// Social-login gateway for genealogy web applications. Exchanges an OAuth2
// authorization code for an external identity, reconciles it against the
// host's user directory, and applies administrator-staged pre-approval
// grants to freshly registered accounts.

use std::sync::Arc;
use tracing::info;

pub mod audit;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod provider;
pub mod reconcile;
pub mod routes;
pub mod session;

pub use config::{Config, HostPolicy, PluginSettings};
pub use error::GateError;
pub use identity::ExternalIdentity;
pub use reconcile::{Outcome, ReconcilePolicy, Reconciler};
pub use routes::{AppState, create_router};

/// Assemble an application state on in-memory collaborators. The demo
/// server and the integration tests both start here; a real host wires in
/// its own directory, ledger, permission and settings implementations.
pub fn build_state(config: &Config) -> Arc<AppState> {
    let directory = Arc::new(directory::InMemoryDirectory::new());
    let ledger = Arc::new(ledger::InMemoryLedger::new());
    let permissions = Arc::new(directory::InMemoryPermissions::new());
    let settings = Arc::new(config::InMemorySettings::new());
    let audit = Arc::new(audit::AuditLog::new());

    let reconciler = Reconciler::new(
        directory.clone(),
        ledger.clone(),
        permissions.clone(),
        audit.clone(),
    );

    Arc::new(AppState {
        directory,
        ledger,
        permissions,
        settings,
        policy: HostPolicy::default(),
        flows: session::FlowSessionStore::new(),
        login_tokens: session::LoginTokenStore::new(),
        audit,
        reconciler,
        base_url: config.base_url.clone(),
    })
}

/// Run the gateway on the configured address until the task is cancelled.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let state = build_state(&config);
    let router = create_router(state);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, base_url = %config.base_url, "gateway listening");

    axum::serve(listener, router).await?;
    Ok(())
}
