use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    FAULT_AUTH_CANCELLED, FAULT_METHOD_NOT_FOUND, FAULT_PARSE_ERROR, FAULT_TRANSPORT_ERROR,
    JSONRPC_VERSION,
};

/// A remote procedure call: method name plus ordered parameters.
///
/// Parameter order is significant; older servers bind arguments by
/// position. `headers` are extra HTTP headers sent alongside the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: String,
    params: Vec<Value>,
    headers: Vec<(String, String)>,
}

/// Wire form of a request.
#[derive(Serialize)]
struct RequestEnvelope<'a> {
    version: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: &'a str,
}

impl Request {
    /// Creates a request with the given method and positional parameters.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            headers: Vec::new(),
        }
    }

    /// Adds an extra HTTP header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Serializes the request body with the given correlation id.
    pub fn encode(&self, id: &str) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&RequestEnvelope {
            version: JSONRPC_VERSION,
            method: &self.method,
            params: &self.params,
            id,
        })
    }

    /// Generates a fresh correlation id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Classification of a fault by origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Raised by the remote service.
    Server,
    /// Response body could not be decoded.
    Parse,
    /// Network, HTTP status, TLS or timeout failure.
    Transport,
    /// An authentication challenge was declined.
    AuthCancelled,
}

/// A structured RPC failure: numeric code plus human-readable message.
///
/// Locally synthesized faults may carry the underlying error for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct Fault {
    pub code: i32,
    pub message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Fault {
    /// A fault reported by the server.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(FAULT_PARSE_ERROR, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FAULT_TRANSPORT_ERROR, message)
    }

    pub fn auth_cancelled() -> Self {
        Self::new(FAULT_AUTH_CANCELLED, "authentication challenge was cancelled")
    }

    /// Attaches the underlying error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn kind(&self) -> FaultKind {
        match self.code {
            FAULT_PARSE_ERROR => FaultKind::Parse,
            FAULT_TRANSPORT_ERROR => FaultKind::Transport,
            FAULT_AUTH_CANCELLED => FaultKind::AuthCancelled,
            _ => FaultKind::Server,
        }
    }

    /// Returns `true` if the server does not know the called method.
    pub fn is_method_not_found(&self) -> bool {
        self.code == FAULT_METHOD_NOT_FOUND
    }
}

impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error object inside a response envelope.
#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default, alias = "faultCode")]
    code: Option<Value>,
    #[serde(default, alias = "faultString")]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Decoded outcome of a call: exactly one of a result value or a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Value),
    Fault(Fault),
}

impl Response {
    /// Decodes a response body.
    ///
    /// Never fails: a malformed body decodes to a [`FaultKind::Parse`] fault.
    pub fn decode(body: &[u8]) -> Self {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                return Response::Fault(
                    Fault::parse(format!("invalid response body: {e}")).with_source(e),
                );
            }
        };
        let Some(obj) = value.as_object() else {
            return Response::Fault(Fault::parse("response body is not an object"));
        };

        if let Some(err) = obj.get("error").filter(|e| !e.is_null()) {
            return match ErrorObject::deserialize(err) {
                Ok(e) => {
                    let code = e
                        .code
                        .as_ref()
                        .and_then(crate::types::int_value)
                        .and_then(|c| i32::try_from(c).ok())
                        .unwrap_or(0);
                    let message = e.message.or(e.name).unwrap_or_default();
                    Response::Fault(Fault::new(code, message))
                }
                Err(e) => Response::Fault(
                    Fault::parse(format!("invalid error object: {e}")).with_source(e),
                ),
            };
        }

        match obj.get("result") {
            Some(result) => Response::Success(result.clone()),
            None => Response::Fault(Fault::parse("response has neither result nor error")),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Response::Fault(_))
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Response::Fault(f) => Some(f),
            Response::Success(_) => None,
        }
    }

    /// Converts into a `Result`, so callers can use `?`.
    pub fn into_result(self) -> Result<Value, Fault> {
        match self {
            Response::Success(v) => Ok(v),
            Response::Fault(f) => Err(f),
        }
    }
}
