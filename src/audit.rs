// Audit Log
// Structured record of authentication and configuration events, mirrored to
// the tracing subscriber. The host's durable log is the real sink; the
// in-memory buffer exists so the admin surface and tests can inspect recent
// activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AuditEventKind {
    LoginAttempt,
    LoginSuccess,
    LoginFailure,
    RegistrationRequest,
    ConfigurationChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub username: Option<String>,
    pub details: HashMap<String, String>,
    pub error_message: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, username: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            username,
            details: HashMap::new(),
            error_message: None,
        }
    }

    pub fn with_detail<K: ToString, V: ToString>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error_message = Some(error);
        self
    }
}

#[derive(Default)]
pub struct AuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: AuditEvent) {
        match event.kind {
            AuditEventKind::LoginFailure => {
                warn!(
                    event_id = %event.id,
                    kind = ?event.kind,
                    username = ?event.username,
                    error = ?event.error_message,
                    "audit event"
                );
            }
            _ => {
                info!(
                    event_id = %event.id,
                    kind = ?event.kind,
                    username = ?event.username,
                    "audit event"
                );
            }
        }

        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn login_attempt(&self, provider: &str) {
        self.record(
            AuditEvent::new(AuditEventKind::LoginAttempt, None).with_detail("provider", provider),
        );
    }

    pub fn login_success(&self, username: &str, external_id: &str) {
        self.record(
            AuditEvent::new(AuditEventKind::LoginSuccess, Some(username.to_string()))
                .with_detail("external_id", external_id),
        );
    }

    pub fn login_failure(&self, username: Option<&str>, reason: &str) {
        self.record(
            AuditEvent::new(AuditEventKind::LoginFailure, username.map(|s| s.to_string()))
                .with_error(reason.to_string()),
        );
    }

    pub fn registration_request(&self, username: &str, external_id: &str) {
        self.record(
            AuditEvent::new(
                AuditEventKind::RegistrationRequest,
                Some(username.to_string()),
            )
            .with_detail("external_id", external_id),
        );
    }

    pub fn configuration_change(&self, what: &str) {
        self.record(
            AuditEvent::new(AuditEventKind::ConfigurationChange, None).with_detail("change", what),
        );
    }

    /// Most recent events, newest last.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().map(|e| e.clone()).unwrap_or_default();
        let skip = events.len().saturating_sub(limit);
        events.into_iter().skip(skip).collect()
    }

    pub fn count_of(&self, kind: &AuditEventKind) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| &e.kind == kind).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_recorded() {
        let log = AuditLog::new();
        log.login_attempt("facebook");
        log.login_success("ada", "123");
        log.login_failure(Some("ada"), "not approved");

        assert_eq!(log.count_of(&AuditEventKind::LoginAttempt), 1);
        assert_eq!(log.count_of(&AuditEventKind::LoginSuccess), 1);
        assert_eq!(log.count_of(&AuditEventKind::LoginFailure), 1);

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].kind, AuditEventKind::LoginFailure);
        assert_eq!(recent[1].error_message.as_deref(), Some("not approved"));
    }

    #[test]
    fn test_recent_limit() {
        let log = AuditLog::new();
        for i in 0..10 {
            log.configuration_change(&format!("change {}", i));
        }
        assert_eq!(log.recent(3).len(), 3);
        assert_eq!(log.recent(100).len(), 10);
    }
}
