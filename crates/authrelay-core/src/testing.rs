//! In-crate test doubles for the transport, renewal and navigation seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{ApiRequest, ApiResponse};
use crate::error::{Result, SessionError};
use crate::guard::Navigator;
use crate::renewal::{Renewal, Renewer, Transport};

/// Spin the scheduler until `condition` holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was never reached");
}

#[derive(Debug, Clone)]
pub(crate) struct SentRequest {
    pub url: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

enum Route {
    Status(StatusCode),
    Error(SessionError),
}

/// Answers 200 for the accepted bearer token and 401 for anything else,
/// unless a path has a scripted override.
pub(crate) struct ScriptedTransport {
    accepted: Mutex<Option<String>>,
    routes: Mutex<HashMap<String, Route>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn accepting(token: &str) -> Self {
        Self {
            accepted: Mutex::new(Some(token.to_string())),
            routes: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn accept(&self, token: &str) {
        *self.accepted.lock().unwrap() = Some(token.to_string());
    }

    pub fn reject_all(&self) {
        *self.accepted.lock().unwrap() = None;
    }

    pub fn respond_with(&self, path: &str, status: StatusCode) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Status(status));
    }

    pub fn fail_with(&self, path: &str, err: SessionError) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Route::Error(err));
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let authorization = request.authorization().map(str::to_string);
        self.sent.lock().unwrap().push(SentRequest {
            url: request.url.clone(),
            authorization: authorization.clone(),
            body: request.body.clone(),
        });

        {
            let routes = self.routes.lock().unwrap();
            if let Some((_, route)) = routes.iter().find(|(path, _)| request.url.ends_with(path.as_str())) {
                return match route {
                    Route::Status(status) => Ok(ApiResponse::new(*status, "")),
                    Route::Error(err) => Err(err.clone()),
                };
            }
        }

        let expected = self
            .accepted
            .lock()
            .unwrap()
            .as_ref()
            .map(|token| format!("Bearer {}", token));
        if expected.is_some() && authorization == expected {
            Ok(ApiResponse::new(StatusCode::OK, request.url))
        } else {
            Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
        }
    }
}

/// A renewer whose call can be held open until the test releases it.
pub(crate) struct GatedRenewer {
    gate: Option<Notify>,
    outcome: Mutex<Result<Renewal>>,
    panics: bool,
    calls: AtomicUsize,
}

impl GatedRenewer {
    pub fn immediate(outcome: Result<Renewal>) -> Self {
        Self {
            gate: None,
            outcome: Mutex::new(outcome),
            panics: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(outcome: Result<Renewal>) -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::immediate(outcome)
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::immediate(Err(SessionError::RenewalFailed("unused".into())))
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn set_outcome(&self, outcome: Result<Renewal>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renewer for GatedRenewer {
    async fn renew(&self) -> Result<Renewal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.panics {
            panic!("renewer blew up");
        }
        self.outcome.lock().unwrap().clone()
    }
}

/// Records every redirect it is asked to perform.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, target: &str) {
        self.redirects.lock().unwrap().push(target.to_string());
    }
}
