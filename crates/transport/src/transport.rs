//! Single-flight JSON-RPC transport.
//!
//! A `Transport` carries at most one request at a time. Every `send()`
//! ends in exactly one delegate notification unless [`Transport::cancel`]
//! settled it first, in which case nothing is delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ansel_export_protocol::constants::{
    DEFAULT_REQUEST_TIMEOUT, MAX_AUTH_CHALLENGES, MAX_RESPONSE_SIZE,
};
use ansel_export_protocol::{Fault, FaultKind, Request, Response};

use crate::auth::{AuthChallenge, ChallengeFuture, Credentials};
use crate::backend::{HttpBackend, HttpRequest};

/// Errors returned by [`Transport::send`] instead of a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("another request is already in flight")]
    ConcurrentRequest,

    #[error("request cancelled")]
    Cancelled,
}

/// Receives the outcome of each request and answers auth challenges.
///
/// Notifications run on whichever task completed the request.
pub trait TransportDelegate: Send + Sync {
    /// A response was decoded from the server (success or server fault).
    fn did_receive_response(&self, _request_id: &str, _response: &Response) {}

    /// The request failed locally (parse, transport, or declined auth).
    fn did_fail(&self, _request_id: &str, _fault: &Fault) {}

    /// The server demanded credentials. Returning `None` cancels the
    /// request with an auth-cancelled fault.
    fn did_receive_auth_challenge<'a>(&'a self, challenge: &'a AuthChallenge)
    -> ChallengeFuture<'a>;
}

/// Delegate that answers the first challenge of each request with fixed
/// credentials and declines any repeat.
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl TransportDelegate for StaticCredentials {
    fn did_receive_auth_challenge<'a>(
        &'a self,
        challenge: &'a AuthChallenge,
    ) -> ChallengeFuture<'a> {
        Box::pin(async move {
            if challenge.attempt == 1 {
                Some(self.credentials.clone())
            } else {
                debug!(
                    realm = ?challenge.realm,
                    user = %self.credentials.username,
                    "credentials rejected"
                );
                None
            }
        })
    }
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Deadline for each HTTP round trip.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// The request currently owned by a transport.
struct InFlight {
    id: String,
    cancel: CancellationToken,
    /// Set by whichever of completion or cancellation happens first.
    settled: Arc<AtomicBool>,
}

/// Sends one JSON-RPC request at a time to a fixed endpoint.
pub struct Transport {
    endpoint: String,
    backend: Arc<dyn HttpBackend>,
    delegate: Arc<dyn TransportDelegate>,
    config: TransportConfig,
    credentials: Mutex<Option<Credentials>>,
    in_flight: Mutex<Option<InFlight>>,
    last_raw: Mutex<Option<Vec<u8>>>,
}

/// Clears the in-flight slot on every exit path of `send`.
struct InFlightGuard<'a> {
    transport: &'a Transport,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self
            .transport
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.id == self.id) {
            *slot = None;
        }
    }
}

impl Transport {
    pub fn new(
        endpoint: impl Into<String>,
        backend: Arc<dyn HttpBackend>,
        delegate: Arc<dyn TransportDelegate>,
        config: TransportConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            backend,
            delegate,
            config,
            credentials: Mutex::new(None),
            in_flight: Mutex::new(None),
            last_raw: Mutex::new(None),
        }
    }

    /// Sends these credentials with every request instead of waiting for
    /// a challenge.
    pub fn with_credentials(self, credentials: Credentials) -> Self {
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` while a request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Raw body of the last decoded response, kept for diagnostics.
    pub fn last_raw_response(&self) -> Option<Vec<u8>> {
        self.last_raw
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends a request and waits for its outcome.
    ///
    /// Faults (server, parse, transport, declined auth) come back as
    /// `Ok(Response::Fault(..))`. `Err` means no response exists: either
    /// another request owns the transport or this one was cancelled.
    pub async fn send(&self, request: &Request) -> Result<Response, SendError> {
        let (id, cancel, settled) = self.begin()?;
        let _guard = InFlightGuard {
            transport: self,
            id: id.clone(),
        };

        debug!(request_id = %id, method = %request.method(), "sending request");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = self.round_trip(&id, request) => Some(response),
        };

        match outcome {
            Some(response) if !settled.swap(true, Ordering::AcqRel) => {
                self.notify(&id, &response);
                Ok(response)
            }
            _ => {
                debug!(request_id = %id, "request cancelled, outcome suppressed");
                Err(SendError::Cancelled)
            }
        }
    }

    /// Aborts the in-flight request, if any. Idempotent.
    pub fn cancel(&self) {
        let slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = slot.as_ref() {
            if !flight.settled.swap(true, Ordering::AcqRel) {
                debug!(request_id = %flight.id, "cancelling request");
            }
            flight.cancel.cancel();
        }
    }

    fn begin(&self) -> Result<(String, CancellationToken, Arc<AtomicBool>), SendError> {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            warn!(in_flight = %current.id, "rejecting concurrent request");
            return Err(SendError::ConcurrentRequest);
        }
        let id = Request::new_id();
        let cancel = CancellationToken::new();
        let settled = Arc::new(AtomicBool::new(false));
        *slot = Some(InFlight {
            id: id.clone(),
            cancel: cancel.clone(),
            settled: settled.clone(),
        });
        Ok((id, cancel, settled))
    }

    fn notify(&self, id: &str, response: &Response) {
        match response {
            Response::Fault(fault) if fault.kind() != FaultKind::Server => {
                warn!(request_id = %id, error = %fault, "request failed");
                self.delegate.did_fail(id, fault);
            }
            _ => self.delegate.did_receive_response(id, response),
        }
    }

    /// Performs the HTTP exchange, answering auth challenges along the way.
    async fn round_trip(&self, id: &str, request: &Request) -> Response {
        let body = match request.encode(id) {
            Ok(b) => b,
            Err(e) => {
                return Response::Fault(
                    Fault::parse(format!("failed to encode request: {e}")).with_source(e),
                );
            }
        };

        let mut challenges = 0;
        loop {
            let credentials = self
                .credentials
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let http_request = HttpRequest {
                url: &self.endpoint,
                body: &body,
                headers: request.headers(),
                credentials: credentials.as_ref(),
            };

            let reply =
                match tokio::time::timeout(self.config.timeout, self.backend.post(http_request))
                    .await
                {
                    Err(_) => return Response::Fault(Fault::transport("request timed out")),
                    Ok(Err(e)) => {
                        return Response::Fault(Fault::transport(e.to_string()).with_source(e));
                    }
                    Ok(Ok(reply)) => reply,
                };

            if reply.status == 401 {
                challenges += 1;
                if challenges > MAX_AUTH_CHALLENGES {
                    return Response::Fault(Fault::auth_cancelled());
                }
                let challenge = AuthChallenge::from_header(
                    &self.endpoint,
                    reply.www_authenticate.as_deref(),
                    challenges,
                );
                debug!(request_id = %id, attempt = challenges, "authentication challenge");
                match self.delegate.did_receive_auth_challenge(&challenge).await {
                    Some(creds) => {
                        *self
                            .credentials
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(creds);
                        continue;
                    }
                    None => return Response::Fault(Fault::auth_cancelled()),
                }
            }

            if !reply.is_success() {
                return Response::Fault(Fault::transport(format!(
                    "HTTP status {}",
                    reply.status
                )));
            }
            if reply.body.len() > MAX_RESPONSE_SIZE {
                return Response::Fault(Fault::transport(format!(
                    "response too large ({} bytes)",
                    reply.body.len()
                )));
            }

            trace!(request_id = %id, bytes = reply.body.len(), "received response body");
            let response = Response::decode(&reply.body);
            *self.last_raw.lock().unwrap_or_else(PoisonError::into_inner) = Some(reply.body);
            return response;
        }
    }
}
