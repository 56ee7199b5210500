//! Credentials and authentication challenges.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Username/password pair sent with HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A server demand for credentials (HTTP 401).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub endpoint: String,
    /// Realm from `WWW-Authenticate`, if the server sent one.
    pub realm: Option<String>,
    /// 1-based count of challenges seen for the current request.
    pub attempt: u32,
}

impl AuthChallenge {
    /// Builds a challenge from a `WWW-Authenticate` header value.
    pub fn from_header(endpoint: &str, header: Option<&str>, attempt: u32) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            realm: header.and_then(parse_realm),
            attempt,
        }
    }
}

/// Extracts `realm="..."` from a `WWW-Authenticate` value.
fn parse_realm(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();
    let start = lower.find("realm=")? + "realm=".len();
    let rest = &header[start..];
    let realm = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split([',', ' ']).next().unwrap_or_default(),
    };
    Some(realm.to_string()).filter(|r| !r.is_empty())
}

/// Future returned by challenge handlers.
pub type ChallengeFuture<'a> = Pin<Box<dyn Future<Output = Option<Credentials>> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_password() {
        let c = Credentials::new("alice", "s3cret");
        let dbg = format!("{c:?}");
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("s3cret"));
    }

    #[test]
    fn realm_parsing() {
        let c = AuthChallenge::from_header("http://x", Some(r#"Basic realm="Horde RPC""#), 1);
        assert_eq!(c.realm.as_deref(), Some("Horde RPC"));

        let c = AuthChallenge::from_header("http://x", Some("Basic Realm=photos, charset=x"), 2);
        assert_eq!(c.realm.as_deref(), Some("photos"));
        assert_eq!(c.attempt, 2);

        let c = AuthChallenge::from_header("http://x", Some("Basic"), 1);
        assert_eq!(c.realm, None);

        let c = AuthChallenge::from_header("http://x", None, 1);
        assert_eq!(c.realm, None);
    }
}
