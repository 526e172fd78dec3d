use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::observe::Notifier;
use crate::policy::{HttpInterceptor, RequestContext};
use crate::util::lock_unpoisoned;

pub(crate) const DEFAULT_UNAUTHORIZED_GRACE: Duration = Duration::from_secs(1);
const SESSION_EXPIRED_NOTICE: &str = "Session expired, please sign in again";

/// Persisted session record. The bearer token lives at `state.token`.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<Value>;

    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.store(serde_json::json!({ "state": { "token": token.into() } }));
        store
    }

    pub fn store(&self, record: Value) {
        *lock_unpoisoned(&self.record) = Some(record);
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<Value> {
        lock_unpoisoned(&self.record).clone()
    }

    fn clear(&self) {
        *lock_unpoisoned(&self.record) = None;
    }
}

pub fn session_token(record: &Value) -> Option<&str> {
    record
        .pointer("/state/token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
}

/// Attaches `Authorization: Bearer <token>` when the session has a token and
/// the caller did not set the header itself.
pub struct AuthInjector {
    store: Arc<dyn SessionStore>,
}

impl AuthInjector {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl HttpInterceptor for AuthInjector {
    fn on_request(&self, _context: &RequestContext, headers: &mut HeaderMap) {
        if headers.contains_key(AUTHORIZATION) {
            return;
        }
        let Some(record) = self.store.load() else {
            return;
        };
        let Some(token) = session_token(&record) else {
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => debug!("session token is not a valid header value"),
        }
    }
}

/// Where the application goes when the session is no longer valid.
pub trait Navigator: Send + Sync {
    fn to_login(&self);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn to_login(&self) {}
}

/// Runs the logout path once per burst of 401 responses.
pub(crate) struct UnauthorizedHandler {
    store: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    grace: Duration,
    redirect_pending: Arc<AtomicBool>,
}

impl UnauthorizedHandler {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        notifier: Arc<dyn Notifier>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            navigator,
            notifier,
            grace,
            redirect_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns `false` when a redirect is already scheduled.
    pub(crate) fn handle(&self) -> bool {
        if self
            .redirect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        warn!("received 401, clearing session and redirecting to login");
        self.store.clear();
        self.notifier.notice(SESSION_EXPIRED_NOTICE);

        let navigator = Arc::clone(&self.navigator);
        let redirect_pending = Arc::clone(&self.redirect_pending);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            navigator.to_login();
            redirect_pending.store(false, Ordering::Release);
        });
        true
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.redirect_pending.load(Ordering::Acquire)
    }
}
