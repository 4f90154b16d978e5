//! Single-flight credential renewal.
//!
//! When a request comes back 401 the coordinator either starts a renewal
//! (the request becomes the *trigger*) or, if one is already running, parks
//! the request in a FIFO queue of waiters. When the renewal settles the
//! queue is drained: waiters are resent in arrival order with the new
//! credential, or all failed with the same error.

use std::collections::VecDeque;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{Renewal, Renewer, Transport};
use crate::api::{authorize, ApiRequest, ApiResponse, RequestEnvelope};
use crate::auth::SessionStore;
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InFlight,
}

/// A request suspended on the outcome of the in-flight renewal.
struct Waiter {
    envelope: RequestEnvelope,
    reply: oneshot::Sender<Result<ApiResponse>>,
}

struct RenewalState {
    phase: Phase,
    waiters: VecDeque<Waiter>,
    renewals_started: u64,
}

/// How a failed request joined the renewal cycle.
enum Admission {
    /// Started a new renewal against the session at `generation`; the channel
    /// pair carries its outcome back to the trigger.
    Trigger {
        notify: oneshot::Sender<Result<()>>,
        outcome: oneshot::Receiver<Result<()>>,
        generation: u64,
    },
    /// Queued behind a renewal that is already running.
    Queued(oneshot::Receiver<Result<ApiResponse>>),
}

struct Shared {
    store: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    renewer: Arc<dyn Renewer>,
    state: Mutex<RenewalState>,
}

/// Sends authenticated requests and recovers from expired credentials.
///
/// Clone is cheap; every clone drives the same renewal state.
#[derive(Clone)]
pub struct RenewalCoordinator {
    shared: Arc<Shared>,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        renewer: Arc<dyn Renewer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                renewer,
                state: Mutex::new(RenewalState {
                    phase: Phase::Idle,
                    waiters: VecDeque::new(),
                    renewals_started: 0,
                }),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.shared.store
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn pending_waiters(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Total renewal calls issued since construction.
    pub fn renewals_started(&self) -> u64 {
        self.shared.lock().renewals_started
    }

    /// Authorize and send a request, renewing the credential once on 401.
    ///
    /// Statuses other than 401 and transport errors are returned untouched.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let envelope = RequestEnvelope::new(request);
        if let Some(response) = self.shared.attempt(&envelope).await? {
            return Ok(response);
        }

        debug!(url = %envelope.request().url, "Authentication failure, entering renewal");
        match self.shared.admit(&envelope) {
            Admission::Trigger {
                notify,
                outcome,
                generation,
            } => {
                // Runs detached so dropping this future cannot strand the waiters.
                tokio::spawn(Arc::clone(&self.shared).run_renewal(notify, generation));
                outcome.await.unwrap_or_else(|_| Err(abandoned()))?;
                self.shared.replay(envelope).await
            }
            Admission::Queued(reply) => reply.await.unwrap_or_else(|_| Err(abandoned())),
        }
    }
}

fn abandoned() -> SessionError {
    SessionError::RenewalFailed("renewal ended without a result".to_string())
}

fn signed_out() -> SessionError {
    SessionError::RenewalFailed("session was signed out during renewal".to_string())
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RenewalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch(&self, envelope: &RequestEnvelope) -> Result<ApiResponse> {
        let request = authorize(envelope.request(), &self.store);
        self.transport.send(request).await
    }

    /// Send one attempt. `None` means a first 401 that may enter renewal;
    /// a 401 on an envelope already marked retried is terminal.
    async fn attempt(&self, envelope: &RequestEnvelope) -> Result<Option<ApiResponse>> {
        let response = self.dispatch(envelope).await?;
        if !response.is_auth_failure() {
            return Ok(Some(response));
        }
        if envelope.is_retried() {
            warn!(url = %envelope.request().url, "Request rejected again after renewal");
            return Err(SessionError::AuthenticationFailed);
        }
        Ok(None)
    }

    /// Resend after a renewal.
    async fn replay(&self, envelope: RequestEnvelope) -> Result<ApiResponse> {
        let envelope = envelope.into_retry();
        self.attempt(&envelope)
            .await?
            .ok_or(SessionError::AuthenticationFailed)
    }

    /// Phase check and enqueue happen under one lock with no await in between.
    fn admit(&self, envelope: &RequestEnvelope) -> Admission {
        let mut state = self.lock();
        match state.phase {
            Phase::Idle => {
                state.phase = Phase::InFlight;
                state.renewals_started += 1;
                let (notify, outcome) = oneshot::channel();
                Admission::Trigger {
                    notify,
                    outcome,
                    generation: self.store.generation(),
                }
            }
            Phase::InFlight => {
                let (reply, rx) = oneshot::channel();
                state.waiters.push_back(Waiter {
                    envelope: envelope.clone(),
                    reply,
                });
                debug!(waiters = state.waiters.len(), "Queued behind in-flight renewal");
                Admission::Queued(rx)
            }
        }
    }

    /// Return to Idle and hand back everything that queued during the renewal.
    fn settle(&self) -> VecDeque<Waiter> {
        let mut state = self.lock();
        state.phase = Phase::Idle;
        mem::take(&mut state.waiters)
    }

    async fn run_renewal(self: Arc<Self>, notify: oneshot::Sender<Result<()>>, generation: u64) {
        info!("Renewing session credential");
        let outcome = AssertUnwindSafe(self.renewer.renew())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SessionError::RenewalFailed("renewal call panicked".into())));

        match outcome {
            Ok(Renewal {
                credential,
                identity,
            }) => {
                // A logout while the renewal ran must not be undone by its result.
                if !self.store.replace_credential_if_current(generation, credential, identity) {
                    warn!("Session signed out during renewal, discarding renewed credential");
                    self.fail_all(notify, signed_out());
                    return;
                }
                let waiters = self.settle();
                info!(waiters = waiters.len(), "Session renewed, replaying queued requests");
                let _ = notify.send(Ok(()));
                self.drain_replay(waiters).await;
            }
            Err(err) => {
                let err = match err {
                    SessionError::RenewalFailed(_) => err,
                    other => SessionError::RenewalFailed(other.to_string()),
                };
                warn!(error = %err, "Session renewal failed, clearing session");
                self.store.clear();
                self.fail_all(notify, err);
            }
        }
    }

    /// Settle and hand the same error to the trigger and every waiter.
    fn fail_all(&self, notify: oneshot::Sender<Result<()>>, err: SessionError) {
        let waiters = self.settle();
        debug!(waiters = waiters.len(), "Failing queued requests");
        let _ = notify.send(Err(err.clone()));
        for waiter in waiters {
            let _ = waiter.reply.send(Err(err.clone()));
        }
    }

    /// Resend each waiter exactly once, strictly in arrival order.
    async fn drain_replay(&self, waiters: VecDeque<Waiter>) {
        for Waiter { envelope, reply } in waiters {
            if reply.is_closed() {
                debug!(url = %envelope.request().url, "Caller gave up waiting, skipping replay");
                continue;
            }
            let result = self.replay(envelope).await;
            let _ = reply.send(result);
        }
    }
}
