// HTTP Routes
// Login flow handlers, the admin surface, and the login-button asset.

use axum::{
    Json, Router,
    extract::{Form, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::{HostPolicy, PluginSettings, SettingsStore};
use crate::directory::{PermissionStore, UserDirectory};
use crate::error::GateError;
use crate::ledger::{
    DatasetGrant, EditRole, PreApprovalEntry, PreApprovalLedger, delete_entry, upsert_entry,
};
use crate::provider::{IdentityProvider, ProviderConfig, create_provider};
use crate::reconcile::{Outcome, ReconcilePolicy, Reconciler};
use crate::session::{FlowSessionStore, LoginTokenStore};

/// Record id pattern used by the host's datasets.
static RECORD_ID_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9:_-]{1,20}$").expect("record id pattern is valid")
});

pub struct AppState {
    pub directory: Arc<dyn UserDirectory>,
    pub ledger: Arc<dyn PreApprovalLedger>,
    pub permissions: Arc<dyn PermissionStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub policy: HostPolicy,
    pub flows: FlowSessionStore,
    pub login_tokens: LoginTokenStore,
    pub audit: Arc<AuditLog>,
    pub reconciler: Reconciler,

    /// Public base URL used to build the callback address
    pub base_url: String,
}

impl AppState {
    fn plugin_settings(&self) -> PluginSettings {
        PluginSettings::load(self.settings.as_ref())
    }

    fn redirect_uri(&self) -> String {
        format!(
            "{}/auth/facebook/callback",
            self.base_url.trim_end_matches('/')
        )
    }

    /// Build the provider from the settings as they are right now, so admin
    /// credential changes take effect without a restart.
    fn provider(&self) -> Result<Box<dyn IdentityProvider>, GateError> {
        let settings = self.plugin_settings();
        if !settings.is_configured() {
            return Err(GateError::NotConfigured);
        }
        create_provider(
            "facebook",
            ProviderConfig {
                app_id: settings.app_id,
                app_secret: settings.app_secret,
                redirect_uri: self.redirect_uri(),
            },
        )
    }

    fn reconcile_policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            require_verified: self.plugin_settings().require_verified,
            registration_enabled: self.policy.registration_enabled,
            require_admin_approval: self.policy.require_admin_approval,
            max_username_len: self.policy.max_username_len,
        }
    }
}

/// Render a terminal flow error: status from the taxonomy, message for the
/// visitor, details only in the log.
fn error_page(err: GateError) -> Response {
    warn!(error = %err, "login flow failed");
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = format!(
        "<!DOCTYPE html><html><body><p>{}</p><p><a href=\"/\">Return to the home page</a></p></body></html>",
        html_escape::encode_text(&err.user_message())
    );
    (status, Html(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    /// Page to return to after login
    url: Option<String>,

    /// Dataset the login button was shown on; used as a fallback return
    /// target when no explicit url is given
    dataset: Option<String>,
}

/// Start the login flow: mint state, remember the return URL, send the
/// visitor to the provider dialog.
async fn start_login(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LoginParams>,
) -> Response {
    let provider = match state.provider() {
        Ok(p) => p,
        Err(err) => return error_page(err),
    };

    // Never bounce the user back into the login machinery itself.
    let return_url = params
        .url
        .filter(|u| !u.contains("login") && !u.contains("facebook"))
        .or_else(|| {
            params
                .dataset
                .map(|d| format!("/tree/{}", urlencoding::encode(&d)))
        });

    state.audit.login_attempt(provider.name());

    let flow_state = match state.flows.begin(return_url) {
        Ok(s) => s,
        Err(err) => return error_page(err),
    };

    match provider.authorization_url(&flow_state) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(err) => error_page(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,

    /// Error fields the provider sets when the user cancels
    error: Option<String>,
    error_reason: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Provider-reported error: drop any pending flow state first.
    if let Some(error) = &params.error {
        if let Some(flow_state) = &params.state {
            let _ = state.flows.redeem(flow_state);
        }
        let reason = params.error_reason.as_deref().unwrap_or("");
        state
            .audit
            .login_failure(None, &format!("provider error: {} {}", error, reason));

        let message = if reason == "user_denied" {
            "You must allow the login request to sign in with this provider.".to_string()
        } else {
            GateError::ProviderExchangeFailed(error.clone()).user_message()
        };
        let body = format!(
            "<!DOCTYPE html><html><body><p>{}</p><p><a href=\"/\">Return to the home page</a></p></body></html>",
            html_escape::encode_text(&message)
        );
        return (StatusCode::BAD_REQUEST, Html(body)).into_response();
    }

    // The state must have been issued by us, once.
    let return_url = match params.state.as_deref().map(|s| state.flows.redeem(s)) {
        Some(Ok(url)) => url,
        Some(Err(err)) => return error_page(err),
        None => return error_page(GateError::StateMismatch),
    };

    let code = match params.code {
        Some(code) => code,
        None => {
            return error_page(GateError::ProviderExchangeFailed(
                "provider returned no authorization code".to_string(),
            ));
        }
    };

    match run_exchange(&state, &code).await {
        Ok(outcome) => finish_login(&state, outcome, return_url),
        Err(err) => error_page(err),
    }
}

/// Back-channel half of the callback: token exchange, profile fetch,
/// reconciliation.
async fn run_exchange(state: &AppState, code: &str) -> Result<Outcome, GateError> {
    let provider = state.provider()?;
    let access_token = provider.exchange_code(code).await?;
    let identity = provider.fetch_profile(&access_token).await?;
    state
        .reconciler
        .reconcile(&identity, &state.reconcile_policy())
}

/// Hand a successful reconciliation to the host: mint a one-time login
/// token and redirect, or show the pending-approval notice.
fn finish_login(state: &AppState, outcome: Outcome, return_url: Option<String>) -> Response {
    let account = match outcome {
        Outcome::LoggedIn(account) => account,
        Outcome::Registered {
            account,
            admin_approved,
        } => {
            if !admin_approved {
                info!(username = %account.username, "registration pending approval");
                let body = "<!DOCTYPE html><html><body><p>Your account has been created and is \
                            waiting for an administrator to approve it. You will not be able to \
                            sign in until then.</p></body></html>";
                return (StatusCode::OK, Html(body.to_string())).into_response();
            }
            account
        }
    };

    let token = match state.login_tokens.issue(&account.id) {
        Ok(t) => t,
        Err(err) => return error_page(err),
    };

    let target = return_url.unwrap_or_else(|| "/".to_string());
    let separator = if target.contains('?') { '&' } else { '?' };
    let location = format!(
        "{}{}login_token={}",
        target,
        separator,
        urlencoding::encode(&token)
    );
    Redirect::temporary(&location).into_response()
}

#[derive(Debug, Serialize)]
pub struct AdminNotice {
    pub success: bool,
    pub notice: String,
}

fn admin_notice(success: bool, notice: impl Into<String>) -> Response {
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(AdminNotice {
            success,
            notice: notice.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    app_id: String,
    app_secret: String,
    #[serde(default)]
    require_verified: bool,
    #[serde(default)]
    hide_standard_forms: bool,
}

async fn save_settings(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Response {
    let settings = PluginSettings {
        app_id: form.app_id.trim().to_string(),
        app_secret: form.app_secret.trim().to_string(),
        require_verified: form.require_verified,
        hide_standard_forms: form.hide_standard_forms,
    };
    settings.save(state.settings.as_ref());
    state.audit.configuration_change("provider settings saved");
    admin_notice(true, "Settings saved.")
}

#[derive(Debug, Deserialize)]
pub struct LinkForm {
    account_id: String,
    external_username: String,
}

/// Link a local account to an external username. Any ledger entry staged
/// for that username is consumed; the account already exists, so the grants
/// no longer apply.
async fn link_account(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LinkForm>,
) -> Response {
    let username = crate::identity::cleanse_username(&form.external_username);
    if username.is_empty() {
        return admin_notice(false, GateError::InvalidLink("missing external username".to_string()).user_message());
    }

    let already = match state.directory.find_by_external_id(&username) {
        Ok(found) => found,
        Err(err) => return admin_notice(false, err.user_message()),
    };
    if let Some(other) = already {
        if other.id != form.account_id {
            return admin_notice(
                false,
                GateError::InvalidLink(format!(
                    "'{}' is already linked to account '{}'",
                    username, other.username
                ))
                .user_message(),
            );
        }
    }

    if let Err(err) = state.directory.link_external_id(&form.account_id, &username) {
        return admin_notice(false, err.user_message());
    }
    if let Err(err) = state.ledger.delete(&username) {
        return admin_notice(false, err.user_message());
    }

    state.audit.configuration_change("account link added");
    admin_notice(true, format!("Linked '{}'.", username))
}

#[derive(Debug, Deserialize)]
pub struct UnlinkForm {
    account_id: String,
}

async fn unlink_account(
    State(state): State<Arc<AppState>>,
    Form(form): Form<UnlinkForm>,
) -> Response {
    if let Err(err) = state.directory.unlink_external_id(&form.account_id) {
        return admin_notice(false, err.user_message());
    }
    state.audit.configuration_change("account link removed");
    admin_notice(true, "Link removed.")
}

#[derive(Debug, Deserialize)]
pub struct PreApprovalForm {
    external_username: String,
    dataset_id: String,
    root_record_id: Option<String>,
    default_record_id: Option<String>,
    edit_role: String,
}

async fn save_preapproval(
    State(state): State<Arc<AppState>>,
    Form(form): Form<PreApprovalForm>,
) -> Response {
    let edit_role = match EditRole::parse(&form.edit_role) {
        Some(role) => role,
        None => return admin_notice(false, format!("Unknown role '{}'.", form.edit_role)),
    };

    for record_id in [&form.root_record_id, &form.default_record_id]
        .into_iter()
        .flatten()
        .filter(|id| !id.is_empty())
    {
        if !RECORD_ID_RE.is_match(record_id) {
            return admin_notice(false, format!("Invalid record id '{}'.", record_id));
        }
    }

    let grant = DatasetGrant {
        root_record_id: form.root_record_id.filter(|s| !s.is_empty()),
        default_record_id: form.default_record_id.filter(|s| !s.is_empty()),
        edit_role,
    };
    let entry = PreApprovalEntry::single(&form.dataset_id, grant);

    match upsert_entry(
        state.directory.as_ref(),
        state.ledger.as_ref(),
        &form.external_username,
        entry,
    ) {
        Ok(username) => {
            state.audit.configuration_change("pre-approval saved");
            admin_notice(true, format!("Pre-approval saved for '{}'.", username))
        }
        Err(err) => admin_notice(false, err.user_message()),
    }
}

#[derive(Debug, Deserialize)]
pub struct PreApprovalDeleteForm {
    external_username: String,
}

async fn delete_preapproval(
    State(state): State<Arc<AppState>>,
    Form(form): Form<PreApprovalDeleteForm>,
) -> Response {
    match delete_entry(state.ledger.as_ref(), &form.external_username) {
        Ok(true) => {
            state.audit.configuration_change("pre-approval deleted");
            admin_notice(true, "Pre-approval deleted.")
        }
        Ok(false) => admin_notice(true, "No pre-approval existed for that username."),
        Err(err) => admin_notice(false, err.user_message()),
    }
}

#[derive(Debug, Serialize)]
struct AccountSummary {
    id: String,
    username: String,
    real_name: String,
    linked_external_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdminSummary {
    configured: bool,
    app_id: String,
    require_verified: bool,
    hide_standard_forms: bool,
    linked_accounts: Vec<AccountSummary>,
    unlinked_accounts: Vec<AccountSummary>,
    preapproved_usernames: Vec<String>,
}

/// Admin overview. The secret never leaves the settings store.
async fn admin_summary(State(state): State<Arc<AppState>>) -> Response {
    let settings = state.plugin_settings();

    let accounts = match state.directory.all_accounts() {
        Ok(accounts) => accounts,
        Err(err) => return admin_notice(false, err.user_message()),
    };
    let usernames = match state.ledger.usernames() {
        Ok(names) => names,
        Err(err) => return admin_notice(false, err.user_message()),
    };

    let (linked, unlinked): (Vec<_>, Vec<_>) = accounts
        .into_iter()
        .partition(|a| a.linked_external_id.is_some());
    let summarize = |accounts: Vec<crate::directory::LocalAccount>| {
        accounts
            .into_iter()
            .map(|a| AccountSummary {
                id: a.id,
                username: a.username,
                real_name: a.real_name,
                linked_external_id: a.linked_external_id,
            })
            .collect::<Vec<_>>()
    };

    Json(AdminSummary {
        configured: settings.is_configured(),
        app_id: settings.app_id,
        require_verified: settings.require_verified,
        hide_standard_forms: settings.hide_standard_forms,
        linked_accounts: summarize(linked),
        unlinked_accounts: summarize(unlinked),
        preapproved_usernames: usernames,
    })
    .into_response()
}

/// Login-button snippet injected into the host's login pages. When the
/// admin hides the standard forms the script also removes the
/// username/password form from view.
async fn login_button_script(State(state): State<Arc<AppState>>) -> Response {
    let settings = state.plugin_settings();
    if !settings.is_configured() {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/javascript")],
            String::new(),
        )
            .into_response();
    }

    let hide = if settings.hide_standard_forms {
        "document.querySelectorAll('form[name=login-form], form[name=register-form]')\n    .forEach(function (form) { form.style.display = 'none'; });\n  "
    } else {
        ""
    };
    let script = format!(
        "(function () {{\n  {}var button = document.createElement('a');\n  button.className = 'social-login-button';\n  button.href = '/auth/facebook/login?url=' + encodeURIComponent(window.location.href);\n  button.textContent = 'Login with Facebook';\n  var anchor = document.querySelector('form[name=login-form]') || document.body;\n  anchor.parentNode.insertBefore(button, anchor);\n}})();\n",
        hide
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/javascript")],
        script,
    )
        .into_response()
}

/// Build the gateway router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/facebook/login", get(start_login))
        .route("/auth/facebook/callback", get(callback))
        .route("/auth/facebook/admin", get(admin_summary))
        .route("/auth/facebook/admin/settings", post(save_settings))
        .route("/auth/facebook/admin/link", post(link_account))
        .route("/auth/facebook/admin/unlink", post(unlink_account))
        .route("/auth/facebook/admin/preapproved", post(save_preapproval))
        .route(
            "/auth/facebook/admin/preapproved/delete",
            post(delete_preapproval),
        )
        .route("/assets/login-button.js", get(login_button_script))
        .with_state(state)
}
