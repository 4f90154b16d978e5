use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, SessionError};

/// Buffer time before expiry to trigger refresh (5 minutes)
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Keys tried, in order, when looking for a human-readable identity name.
const DISPLAY_NAME_KEYS: [&str; 3] = ["nome", "name", "email"];

/// A short-lived access token and the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential that expires `expires_in_secs` from now.
    ///
    /// Returns `None` when the expiry does not fit in a timestamp.
    pub fn try_new(token: impl Into<String>, expires_in_secs: i64) -> Option<Self> {
        let expires_at = expiry_from_now(expires_in_secs)?;
        Some(Self::with_expiry(token, expires_at))
    }

    /// Like `try_new`, but clamps an unrepresentable expiry to the nearest bound.
    pub fn new(token: impl Into<String>, expires_in_secs: i64) -> Self {
        let expires_at = expiry_from_now(expires_in_secs).unwrap_or(if expires_in_secs < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self::with_expiry(token, expires_at)
    }

    pub fn with_expiry(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if the credential will expire soon and should be renewed
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .checked_sub_signed(Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
            .map_or(true, |refresh_at| Utc::now() > refresh_at)
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

fn expiry_from_now(secs: i64) -> Option<DateTime<Utc>> {
    Utc::now().checked_add_signed(Duration::try_seconds(secs)?)
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Opaque profile of the authenticated user, as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(Map<String, Value>);

impl Identity {
    /// Accept a server payload as an identity. Only JSON objects qualify.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SessionError::MalformedPayload(format!(
                "identity must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn display_name(&self) -> Option<&str> {
        DISPLAY_NAME_KEYS
            .iter()
            .find_map(|key| self.0.get(*key).and_then(Value::as_str))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Default)]
struct SessionData {
    credential: Option<Credential>,
    identity: Option<Identity>,
}

#[derive(Default)]
struct Inner {
    data: SessionData,
    /// Bumped by every `clear()`.
    generation: u64,
    subscribers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
}

impl Inner {
    /// Emit the current identity to every live subscriber, dropping closed ones.
    fn publish(&mut self) {
        let identity = self.data.identity.clone();
        self.subscribers
            .retain(|tx| tx.send(identity.clone()).is_ok());
    }
}

/// Single source of truth for the current credential and identity.
///
/// Construct one per process and share it behind an `Arc`. Every mutation
/// updates both fields and notifies identity subscribers under one lock, so
/// no reader can observe a credential without its matching identity.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Mutations never panic half-way, so a poisoned lock still holds a consistent session.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the credential and identity together.
    pub fn set_session(&self, credential: Credential, identity: Option<Identity>) {
        let mut inner = self.lock();
        debug!(expires_at = %credential.expires_at(), has_identity = identity.is_some(), "Session set");
        inner.data = SessionData {
            credential: Some(credential),
            identity,
        };
        inner.publish();
    }

    /// Install a renewed credential, keeping the current identity unless a new one is given.
    pub fn replace_credential(&self, credential: Credential, identity: Option<Identity>) {
        Self::install_renewal(&mut self.lock(), credential, identity);
    }

    /// Install a renewed credential only if the session has not been cleared
    /// since `generation` was read. Returns whether it was installed.
    pub fn replace_credential_if_current(
        &self,
        generation: u64,
        credential: Credential,
        identity: Option<Identity>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(expected = generation, current = inner.generation, "Session cleared during renewal, discarding credential");
            return false;
        }
        Self::install_renewal(&mut inner, credential, identity);
        true
    }

    fn install_renewal(inner: &mut Inner, credential: Credential, identity: Option<Identity>) {
        let identity = identity.or_else(|| inner.data.identity.take());
        debug!(expires_at = %credential.expires_at(), "Credential replaced");
        inner.data = SessionData {
            credential: Some(credential),
            identity,
        };
        inner.publish();
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        debug!(was_authenticated = inner.data.credential.is_some(), "Session cleared");
        inner.data = SessionData::default();
        inner.generation += 1;
        inner.publish();
    }

    /// Get the bearer token if a session exists
    pub fn current_credential(&self) -> Option<String> {
        self.lock()
            .data
            .credential
            .as_ref()
            .map(|c| c.token().to_string())
    }

    pub fn credential(&self) -> Option<Credential> {
        self.lock().data.credential.clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.lock().data.identity.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().data.credential.as_ref().map(Credential::expires_at)
    }

    /// Changes every time the session is cleared.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().data.credential.is_some()
    }

    /// Subscribe to identity changes.
    ///
    /// Each call starts an independent subscription that yields one item per
    /// mutation made after the call, in mutation order. The stream only ends
    /// when the store itself is dropped.
    pub fn identity_stream(&self) -> impl Stream<Item = Option<Identity>> + Send + 'static {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|identity| (identity, rx))
        })
    }

    /// Number of live identity subscriptions (closed ones are pruned on the next mutation).
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
