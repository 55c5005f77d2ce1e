use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

/// Security-relevant happenings that downstream systems (mail, admin
/// alerting, audit) may want to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityEvent {
    AccountLocked {
        tenant_id: Uuid,
        user_id: Uuid,
        locked_until_seconds: i64,
    },
    TokenReuseDetected {
        tenant_id: Uuid,
        user_id: Uuid,
        session_id: Uuid,
    },
    TwoFactorEnabled {
        tenant_id: Uuid,
        user_id: Uuid,
    },
}

/// Sink for security events. Awaiting `notify` only enqueues the event;
/// implementations must not block on slow transports.
#[async_trait]
pub trait SecurityNotifier: Send + Sync {
    async fn notify(&self, event: SecurityEvent);
}

/// Drops every event.
pub struct NoopNotifier;

#[async_trait]
impl SecurityNotifier for NoopNotifier {
    async fn notify(&self, _event: SecurityEvent) {}
}

/// Hands a freshly minted phone OTP code to a transport (SMS gateway).
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, phone: &str, code: &str);
}

/// Records events for assertions in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SecurityNotifier for RecordingNotifier {
    async fn notify(&self, event: SecurityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Captures delivered OTP codes instead of sending them anywhere.
#[derive(Default)]
pub struct MockOtpDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockOtpDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(p, _)| p == phone)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl OtpDelivery for MockOtpDelivery {
    async fn deliver(&self, phone: &str, code: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((phone.to_string(), code.to_string()));
        }
    }
}
