//! Error types for sessions and galleries.

use ansel_export_protocol::{Fault, FaultKind};
use ansel_export_transport::{BackendError, SendError};

use crate::session::SessionState;

/// Coarse classification shared by [`SessionError`] and [`GalleryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthFailure,
    ParseError,
    TransportError,
    ConcurrentRequest,
    GalleryBusy,
    NotFound,
    InvalidState,
    Cancelled,
    /// Fault raised by the service itself.
    Server,
}

impl ErrorKind {
    /// Maps a fault to its error kind.
    pub fn of_fault(fault: &Fault) -> Self {
        match fault.kind() {
            FaultKind::AuthCancelled => ErrorKind::AuthFailure,
            FaultKind::Parse => ErrorKind::ParseError,
            FaultKind::Transport => ErrorKind::TransportError,
            FaultKind::Server => ErrorKind::Server,
        }
    }
}

/// Errors from [`Session`](crate::Session) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("gallery not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailure(Fault),

    #[error("malformed response: {0}")]
    Parse(Fault),

    #[error("transport error: {0}")]
    Transport(Fault),

    #[error("server error: {0}")]
    Server(Fault),

    #[error("gallery already exists: {0}")]
    Duplicate(Fault),

    #[error("permission denied: {0}")]
    PermissionDenied(Fault),

    #[error("another request is already in flight")]
    ConcurrentRequest,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidState { .. }
            | SessionError::InvalidEndpoint(_)
            | SessionError::NoRuntime
            | SessionError::HttpClient(_) => ErrorKind::InvalidState,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::AuthFailure(_) => ErrorKind::AuthFailure,
            SessionError::Parse(_) => ErrorKind::ParseError,
            SessionError::Transport(_) => ErrorKind::TransportError,
            SessionError::Server(_)
            | SessionError::Duplicate(_)
            | SessionError::PermissionDenied(_) => ErrorKind::Server,
            SessionError::ConcurrentRequest => ErrorKind::ConcurrentRequest,
            SessionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The underlying fault, for errors that carry one.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            SessionError::AuthFailure(f)
            | SessionError::Parse(f)
            | SessionError::Transport(f)
            | SessionError::Server(f)
            | SessionError::Duplicate(f)
            | SessionError::PermissionDenied(f) => Some(f),
            _ => None,
        }
    }
}

impl From<Fault> for SessionError {
    fn from(fault: Fault) -> Self {
        match fault.kind() {
            FaultKind::AuthCancelled => SessionError::AuthFailure(fault),
            FaultKind::Parse => SessionError::Parse(fault),
            FaultKind::Transport => SessionError::Transport(fault),
            FaultKind::Server => SessionError::Server(fault),
        }
    }
}

impl From<SendError> for SessionError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::ConcurrentRequest => SessionError::ConcurrentRequest,
            SendError::Cancelled => SessionError::Cancelled,
        }
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::HttpClient(err.to_string())
    }
}

/// Errors from [`Gallery`](crate::Gallery) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GalleryError {
    #[error("gallery {gallery_id} is busy with another upload")]
    Busy { gallery_id: i64 },

    #[error("image data is empty")]
    EmptyImage,

    #[error("gallery {gallery_id} is stale; refresh the gallery list")]
    Stale { gallery_id: i64 },

    #[error("session is closed")]
    SessionClosed,

    #[error("session is {state}")]
    InvalidState { state: SessionState },

    #[error("gallery {gallery_id} has no key image")]
    NoKeyImage { gallery_id: i64 },

    #[error(transparent)]
    Fault(Fault),

    #[error("another request is already in flight")]
    ConcurrentRequest,

    #[error("operation cancelled")]
    Cancelled,
}

impl GalleryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GalleryError::Busy { .. } => ErrorKind::GalleryBusy,
            GalleryError::EmptyImage
            | GalleryError::Stale { .. }
            | GalleryError::SessionClosed
            | GalleryError::InvalidState { .. } => ErrorKind::InvalidState,
            GalleryError::NoKeyImage { .. } => ErrorKind::NotFound,
            GalleryError::Fault(f) => ErrorKind::of_fault(f),
            GalleryError::ConcurrentRequest => ErrorKind::ConcurrentRequest,
            GalleryError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<Fault> for GalleryError {
    fn from(fault: Fault) -> Self {
        GalleryError::Fault(fault)
    }
}

impl From<SendError> for GalleryError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::ConcurrentRequest => GalleryError::ConcurrentRequest,
            SendError::Cancelled => GalleryError::Cancelled,
        }
    }
}
