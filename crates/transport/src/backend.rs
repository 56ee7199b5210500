//! HTTP layer underneath the transport.
//!
//! `HttpBackend` keeps the request/response state machine independent of
//! the HTTP client so it can be exercised with scripted backends.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{CONTENT_TYPE, WWW_AUTHENTICATE};

use ansel_export_protocol::constants::MAX_RESPONSE_SIZE;

use crate::auth::Credentials;

/// One HTTP POST.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub body: &'a [u8],
    pub headers: &'a [(String, String)],
    pub credentials: Option<&'a Credentials>,
}

/// Raw HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
    /// `WWW-Authenticate` header, if present.
    pub www_authenticate: Option<String>,
}

impl HttpReply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            www_authenticate: None,
        }
    }

    pub fn unauthorized(realm: &str) -> Self {
        Self {
            status: 401,
            body: Vec::new(),
            www_authenticate: Some(format!("Basic realm=\"{realm}\"")),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors below the HTTP status level.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response too large (over {limit} bytes)")]
    TooLarge { limit: usize },

    #[error("{0}")]
    Other(String),
}

/// Future returned by [`HttpBackend::post`].
pub type PostFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpReply, BackendError>> + Send + 'a>>;

/// Sends request bodies to the RPC endpoint.
pub trait HttpBackend: Send + Sync {
    fn post<'a>(&'a self, request: HttpRequest<'a>) -> PostFuture<'a>;
}

/// Production backend built on `reqwest`.
pub struct ReqwestBackend {
    http: reqwest::Client,
    max_body: usize,
}

impl ReqwestBackend {
    /// Creates a backend with a fresh connection pool.
    pub fn new() -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            max_body: MAX_RESPONSE_SIZE,
        })
    }

    /// Overrides the largest response body accepted.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }
}

/// Rejects a declared `Content-Length` above `limit`.
fn check_declared_length(length: Option<u64>, limit: usize) -> Result<(), BackendError> {
    match length {
        Some(len) if len > limit as u64 => Err(BackendError::TooLarge { limit }),
        _ => Ok(()),
    }
}

/// Appends one body chunk, failing once the body grows past `limit`.
fn append_chunk(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), BackendError> {
    if body.len() + chunk.len() > limit {
        return Err(BackendError::TooLarge { limit });
    }
    body.extend_from_slice(chunk);
    Ok(())
}

impl HttpBackend for ReqwestBackend {
    fn post<'a>(&'a self, request: HttpRequest<'a>) -> PostFuture<'a> {
        Box::pin(async move {
            let mut builder = self
                .http
                .post(request.url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.to_vec());
            for (name, value) in request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(creds) = request.credentials {
                builder = builder.basic_auth(&creds.username, Some(&creds.password));
            }

            let mut resp = builder.send().await?;
            let status = resp.status().as_u16();
            let www_authenticate = resp
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            check_declared_length(resp.content_length(), self.max_body)?;
            let mut body = Vec::new();
            while let Some(chunk) = resp.chunk().await? {
                append_chunk(&mut body, &chunk, self.max_body)?;
            }

            Ok(HttpReply {
                status,
                body,
                www_authenticate,
            })
        })
    }
}

/// Checks that an endpoint is an absolute HTTP(S) URL.
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(endpoint).map_err(|e| format!("{endpoint}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("{endpoint}: unsupported scheme `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_helpers() {
        assert!(HttpReply::ok("{}").is_success());
        let r = HttpReply::unauthorized("Horde");
        assert!(!r.is_success());
        assert_eq!(r.www_authenticate.as_deref(), Some("Basic realm=\"Horde\""));
    }

    #[test]
    fn endpoint_validation() {
        assert!(validate_endpoint("https://photos.example.com/rpc.php").is_ok());
        assert!(validate_endpoint("http://localhost:8080/horde/rpc.php").is_ok());
        assert!(validate_endpoint("ftp://example.com").is_err());
        assert!(validate_endpoint("not a url").is_err());
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        assert!(check_declared_length(None, 10).is_ok());
        assert!(check_declared_length(Some(10), 10).is_ok());
        let err = check_declared_length(Some(11), 10).unwrap_err();
        assert!(matches!(err, BackendError::TooLarge { limit: 10 }));
    }

    #[test]
    fn chunked_body_stops_at_limit() {
        let mut body = Vec::new();
        append_chunk(&mut body, b"0123", 8).unwrap();
        append_chunk(&mut body, b"4567", 8).unwrap();
        let err = append_chunk(&mut body, b"8", 8).unwrap_err();
        assert_eq!(err.to_string(), "response too large (over 8 bytes)");
        assert_eq!(body, b"01234567");
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::Other("connection refused".into());
        assert_eq!(err.to_string(), "connection refused");
    }
}
