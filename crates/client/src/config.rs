//! Session connection parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ansel_export_protocol::FramingPolicy;
use ansel_export_protocol::constants::{
    DEFAULT_IMAGE_VIEW, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCOPE, DEFAULT_UPLOAD_TIMEOUT,
};
use ansel_export_transport::{Credentials, TransportConfig};

/// Everything a [`Session`](crate::Session) needs to reach the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// RPC endpoint, e.g. `https://photos.example.com/horde/rpc.php`.
    pub endpoint: String,

    pub credentials: Credentials,

    /// Application scope the galleries live in.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// How the call framing is chosen.
    #[serde(default)]
    pub framing: FramingPolicy,

    /// Timeout for metadata calls, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for image uploads, in seconds.
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// Optional `User-Agent` header sent with every call.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Image view requested for key image URLs.
    #[serde(default = "default_key_image_view")]
    pub key_image_view: String,

    /// Send credentials with the first request instead of waiting for a 401.
    #[serde(default = "default_true")]
    pub preemptive_auth: bool,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.into()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_upload_timeout() -> u64 {
    DEFAULT_UPLOAD_TIMEOUT.as_secs()
}

fn default_key_image_view() -> String {
    DEFAULT_IMAGE_VIEW.into()
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Creates a config with default settings for the given endpoint and account.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: Credentials::new(username, password),
            scope: default_scope(),
            framing: FramingPolicy::default(),
            request_timeout_secs: default_request_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            user_agent: None,
            key_image_view: default_key_image_view(),
            preemptive_auth: true,
        }
    }

    pub fn with_framing(mut self, framing: FramingPolicy) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Transport settings for metadata calls.
    pub fn request_transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    /// Transport settings for uploads.
    pub fn upload_transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.upload_timeout_secs.max(1)),
        }
    }
}
