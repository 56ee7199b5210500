//! Session state machine and gallery cache.
//!
//! A session moves `Disconnected -> Connecting -> Connected`, or ends in
//! `Error` or `Cancelled`. Both of those are terminal. The gallery cache is
//! only populated while connected.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ansel_export_protocol::framing::version_string;
use ansel_export_protocol::types::{parse_gallery_list, parse_id};
use ansel_export_protocol::{Fault, Framing, GalleryRecord, Request, Response};
use ansel_export_transport::{
    HttpBackend, ReqwestBackend, StaticCredentials, Transport, TransportConfig,
    TransportDelegate, validate_endpoint,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::gallery::Gallery;
use crate::observer::{GalleryObserver, Observers, SessionObserver};
use crate::progress::Progress;

/// Connection state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connecting failed. Terminal.
    Error,
    /// Cancelled by the caller. Terminal.
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "in error",
            SessionState::Cancelled => "cancelled",
        })
    }
}

/// Per-session call settings fixed at connect time and shared with galleries.
#[derive(Debug)]
pub(crate) struct CallContext {
    pub(crate) framing: Framing,
    pub(crate) scope: String,
    pub(crate) key_image_view: String,
    user_agent: Option<String>,
}

impl CallContext {
    /// Adds the session's extra headers to a request.
    pub(crate) fn prepare(&self, request: Request) -> Request {
        decorate(request, self.user_agent.as_deref())
    }
}

fn decorate(request: Request, user_agent: Option<&str>) -> Request {
    match user_agent {
        Some(ua) => request.with_header("User-Agent", ua),
        None => request,
    }
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    backend: Arc<dyn HttpBackend>,
    delegate: Arc<dyn TransportDelegate>,
    pub(crate) runtime: Handle,
    state: Mutex<SessionState>,
    galleries: RwLock<Vec<Gallery>>,
    context: RwLock<Option<Arc<CallContext>>>,
    server_version: RwLock<Option<String>>,
    /// Transport for connect, listing and gallery creation.
    transport: Transport,
    cancel: CancellationToken,
    pub(crate) progress: Progress,
    pub(crate) observers: Arc<Observers>,
}

/// A connection to one gallery service account.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session on the current tokio runtime.
    pub fn new(
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        Self::with_runtime(config, observer, runtime)
    }

    /// Creates a session that spawns uploads on `runtime`.
    pub fn with_runtime(
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
        runtime: Handle,
    ) -> Result<Self, SessionError> {
        let backend = Arc::new(ReqwestBackend::new()?);
        Self::with_backend(config, backend, observer, runtime)
    }

    /// Creates a session over an explicit HTTP backend.
    pub fn with_backend(
        config: SessionConfig,
        backend: Arc<dyn HttpBackend>,
        observer: Arc<dyn SessionObserver>,
        runtime: Handle,
    ) -> Result<Self, SessionError> {
        validate_endpoint(&config.endpoint).map_err(SessionError::InvalidEndpoint)?;

        let delegate: Arc<dyn TransportDelegate> =
            Arc::new(StaticCredentials::new(config.credentials.clone()));
        let transport = build_transport(&config, &backend, &delegate, config.request_transport());

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                backend,
                delegate,
                runtime,
                state: Mutex::new(SessionState::Disconnected),
                galleries: RwLock::new(Vec::new()),
                context: RwLock::new(None),
                server_version: RwLock::new(None),
                transport,
                cancel: CancellationToken::new(),
                progress: Progress::new(),
                observers: Arc::new(Observers::new(observer)),
            }),
        })
    }

    /// Registers the observer for upload and key image events.
    pub fn set_gallery_observer(&self, observer: Arc<dyn GalleryObserver>) {
        self.inner.observers.set_gallery(observer);
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// Progress shared with every gallery of this session.
    pub fn progress(&self) -> Progress {
        self.inner.progress.clone()
    }

    /// Server version reported during negotiation, if any.
    pub fn server_version(&self) -> Option<String> {
        self.inner
            .server_version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Framing selected at connect, if connected.
    pub fn framing(&self) -> Option<Framing> {
        self.inner.context().map(|c| c.framing.clone())
    }

    /// Snapshot of the gallery cache. Empty unless connected.
    pub fn galleries(&self) -> Vec<Gallery> {
        self.inner
            .galleries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn gallery_by_id(&self, id: i64) -> Result<Gallery, SessionError> {
        self.inner
            .galleries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|g| g.id() == id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("id {id}")))
    }

    pub fn gallery_by_index(&self, index: usize) -> Result<Gallery, SessionError> {
        self.inner
            .galleries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(format!("index {index}")))
    }

    /// Connects, negotiates the framing and loads the gallery list.
    ///
    /// Exactly one of the initialized, error or cancelled callbacks fires.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.inner.begin_connect()?;
        info!(endpoint = %self.inner.config.endpoint, "connecting");

        let result = self.inner.run_connect().await;
        self.inner.finish_connect(result)
    }

    /// Creates a gallery and appends it to the cache.
    pub async fn create_gallery(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Gallery, SessionError> {
        let context = self.inner.require_connected("create a gallery")?;
        let request = context.framing.create_gallery(&context.scope, name, description);

        let result = self
            .inner
            .call(context.prepare(request))
            .await
            .map_err(classify_create_error)?;
        let id = parse_id(&result)?
            .ok_or_else(|| SessionError::Parse(Fault::parse("createGallery returned no id")))?;

        let gallery = Gallery::new(
            GalleryRecord {
                id,
                name: name.to_string(),
                description: description.to_string(),
                image_count: 0,
                key_image_id: None,
            },
            &self.inner,
            context,
        );

        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Connected {
            gallery.invalidate();
            return Err(SessionError::Cancelled);
        }
        self.inner
            .galleries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(gallery.clone());
        drop(state);

        info!(gallery = id, name, "gallery created");
        Ok(gallery)
    }

    /// Re-lists galleries and replaces the cache. Old handles become stale.
    ///
    /// On failure the session stays connected and the cache is untouched.
    pub async fn refresh_galleries(&self) -> Result<(), SessionError> {
        let context = self.inner.require_connected("refresh galleries")?;
        let records = self.inner.list(&context).await?;
        let fresh: Vec<Gallery> = records
            .into_iter()
            .map(|r| Gallery::new(r, &self.inner, context.clone()))
            .collect();

        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Connected {
            fresh.iter().for_each(Gallery::invalidate);
            return Err(SessionError::Cancelled);
        }
        let old = std::mem::replace(
            &mut *self
                .inner
                .galleries
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        drop(state);

        old.iter().for_each(Gallery::invalidate);
        debug!(count = self.galleries().len(), "gallery list refreshed");
        Ok(())
    }

    /// Cancels the session and any work in flight. Idempotent.
    pub fn cancel(&self) {
        let (previous, dropped) = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            if previous.is_terminal() {
                return;
            }
            *state = SessionState::Cancelled;
            let dropped = std::mem::take(
                &mut *self
                    .inner
                    .galleries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            (previous, dropped)
        };

        info!(from = %previous, "session cancelled");
        self.inner.cancel.cancel();
        self.inner.transport.cancel();
        dropped.iter().for_each(Gallery::invalidate);

        // A pending connect reports its own cancellation.
        if previous != SessionState::Connecting {
            self.inner.observers.session().on_session_cancelled();
        }
    }
}

impl SessionInner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self) -> Option<Arc<CallContext>> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds a transport sharing this session's backend and credentials.
    pub(crate) fn make_transport(&self, config: TransportConfig) -> Transport {
        build_transport(&self.config, &self.backend, &self.delegate, config)
    }

    pub(crate) fn upload_transport_config(&self) -> TransportConfig {
        self.config.upload_transport()
    }

    pub(crate) fn request_transport_config(&self) -> TransportConfig {
        self.config.request_transport()
    }

    fn begin_connect(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "connect",
                state: *state,
            });
        }
        *state = SessionState::Connecting;
        Ok(())
    }

    fn require_connected(&self, operation: &'static str) -> Result<Arc<CallContext>, SessionError> {
        let state = self.state();
        match self.context() {
            Some(context) if state == SessionState::Connected => Ok(context),
            _ => Err(SessionError::InvalidState { operation, state }),
        }
    }

    fn checkpoint(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() || self.progress.should_cancel() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    async fn run_connect(self: &Arc<Self>) -> Result<Vec<Gallery>, SessionError> {
        self.checkpoint()?;
        let framing = match self.config.framing.fixed() {
            Some(framing) => framing,
            None => {
                self.progress.lock().set_message("Checking server version");
                self.negotiate().await?
            }
        };
        debug!(framing = ?framing, "framing selected");

        let context = Arc::new(CallContext {
            framing,
            scope: self.config.scope.clone(),
            key_image_view: self.config.key_image_view.clone(),
            user_agent: self.config.user_agent.clone(),
        });
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(context.clone());

        self.checkpoint()?;
        self.progress.lock().set_message("Loading galleries");
        let records = self.list(&context).await?;
        self.progress
            .lock()
            .set_message(format!("Found {} galleries", records.len()));
        self.checkpoint()?;

        Ok(records
            .into_iter()
            .map(|r| Gallery::new(r, self, context.clone()))
            .collect())
    }

    /// Queries the server version and picks the framing from it.
    async fn negotiate(&self) -> Result<Framing, SessionError> {
        let Some(request) = self.config.framing.version_request() else {
            return Ok(Framing::LegacyPositional);
        };
        let method = request.method().to_string();
        let request = decorate(request, self.config.user_agent.as_deref());

        match self.send(&request).await? {
            Response::Success(result) => {
                let version = version_string(&result);
                info!(version = ?version, "server version");
                let framing = version
                    .as_deref()
                    .map_or(Framing::LegacyPositional, Framing::from_version);
                *self
                    .server_version
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = version;
                Ok(framing)
            }
            Response::Fault(fault) if fault.is_method_not_found() => {
                debug!(method = %method, "version query not supported, using positional calls");
                Ok(Framing::LegacyPositional)
            }
            Response::Fault(fault) => Err(fault.into()),
        }
    }

    async fn list(&self, context: &CallContext) -> Result<Vec<GalleryRecord>, SessionError> {
        let request = context.prepare(context.framing.list_galleries(&context.scope));
        let result = self.call(request).await?;
        Ok(parse_gallery_list(&result)?)
    }

    /// Sends a request, giving up early if the session or progress is cancelled.
    async fn send(&self, request: &Request) -> Result<Response, SessionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            _ = self.progress.cancelled() => Err(SessionError::Cancelled),
            response = self.transport.send(request) => Ok(response?),
        }
    }

    async fn call(&self, request: Request) -> Result<Value, SessionError> {
        Ok(self.send(&request).await?.into_result()?)
    }

    fn finish_connect(&self, result: Result<Vec<Gallery>, SessionError>) -> Result<(), SessionError> {
        let observers = self.observers.clone();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // cancel() ran while the calls were in flight.
        if *state == SessionState::Cancelled {
            drop(state);
            if let Ok(galleries) = &result {
                galleries.iter().for_each(Gallery::invalidate);
            }
            observers.session().on_session_cancelled();
            return Err(SessionError::Cancelled);
        }

        match result {
            Ok(galleries) => {
                let count = galleries.len();
                *self.galleries.write().unwrap_or_else(PoisonError::into_inner) = galleries;
                *state = SessionState::Connected;
                drop(state);
                info!(galleries = count, "session connected");
                observers.session().on_session_initialized();
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                *state = SessionState::Cancelled;
                drop(state);
                self.cancel.cancel();
                info!("connect cancelled");
                observers.session().on_session_cancelled();
                Err(SessionError::Cancelled)
            }
            Err(err) => {
                *state = SessionState::Error;
                drop(state);
                warn!(error = %err, "connect failed");
                observers.session().on_session_error(&err);
                Err(err)
            }
        }
    }
}

fn build_transport(
    config: &SessionConfig,
    backend: &Arc<dyn HttpBackend>,
    delegate: &Arc<dyn TransportDelegate>,
    transport: TransportConfig,
) -> Transport {
    let t = Transport::new(
        config.endpoint.clone(),
        backend.clone(),
        delegate.clone(),
        transport,
    );
    if config.preemptive_auth {
        t.with_credentials(config.credentials.clone())
    } else {
        t
    }
}

/// Narrows a server fault from `createGallery` to the likely cause.
fn classify_create_error(err: SessionError) -> SessionError {
    match err {
        SessionError::Server(fault) => {
            let message = fault.message.to_ascii_lowercase();
            if message.contains("already exists") {
                SessionError::Duplicate(fault)
            } else if message.contains("access denied") || message.contains("permission") {
                SessionError::PermissionDenied(fault)
            } else {
                SessionError::Server(fault)
            }
        }
        other => other,
    }
}
