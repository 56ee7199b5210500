//! HTTP transport for Ansel JSON-RPC calls.
//!
//! A [`Transport`] owns at most one in-flight request, answers
//! authentication challenges through its [`TransportDelegate`], and
//! guarantees that a cancelled request never reports an outcome.

pub mod auth;
pub mod backend;
pub mod transport;

pub use auth::{AuthChallenge, ChallengeFuture, Credentials};
pub use backend::{
    BackendError, HttpBackend, HttpReply, HttpRequest, PostFuture, ReqwestBackend,
    validate_endpoint,
};
pub use transport::{SendError, StaticCredentials, Transport, TransportConfig, TransportDelegate};
