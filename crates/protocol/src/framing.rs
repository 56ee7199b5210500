//! Version-dependent call framing.
//!
//! Old servers bind arguments by position and take the application scope
//! as the first argument. Newer servers take the required arguments first
//! and fold every optional one into a trailing `params` object.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::{NAMED_PARAMETERS_MIN_MAJOR, PERMS_EDIT, method};
use crate::envelope::Request;
use crate::types::{ImageEncoding, ImagePayload};

/// Call framing selected once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    LegacyPositional,
    /// Named-parameter calls, tagged with the server version that enabled them.
    NamedParameters(String),
}

impl Framing {
    /// Picks the framing for a reported server version string.
    pub fn from_version(version: &str) -> Self {
        match parse_major(version) {
            Some(major) if major >= NAMED_PARAMETERS_MIN_MAJOR => {
                Framing::NamedParameters(version.trim().to_string())
            }
            _ => Framing::LegacyPositional,
        }
    }

    pub fn list_galleries(&self, scope: &str) -> Request {
        let params = match self {
            Framing::LegacyPositional => vec![json!(scope), json!(PERMS_EDIT)],
            Framing::NamedParameters(_) => vec![json!({"scope": scope, "perm": PERMS_EDIT})],
        };
        Request::new(method::LIST_GALLERIES, params)
    }

    pub fn create_gallery(&self, scope: &str, name: &str, description: &str) -> Request {
        let attributes = json!({"name": name, "desc": description});
        let params = match self {
            Framing::LegacyPositional => vec![json!(scope), attributes],
            Framing::NamedParameters(_) => vec![attributes, json!({"scope": scope})],
        };
        Request::new(method::CREATE_GALLERY, params)
    }

    pub fn save_image(
        &self,
        scope: &str,
        gallery_id: i64,
        image: &ImagePayload,
        encoding: ImageEncoding,
        set_as_default: bool,
    ) -> Request {
        let image = serde_json::to_value(image).unwrap_or(Value::Null);
        let params = match self {
            Framing::LegacyPositional => vec![
                json!(scope),
                json!(gallery_id),
                image,
                json!(set_as_default),
                Value::Null,
                json!(encoding.as_str()),
            ],
            Framing::NamedParameters(_) => vec![
                json!(gallery_id),
                image,
                json!({
                    "scope": scope,
                    "default": set_as_default,
                    "encoding": encoding.as_str(),
                }),
            ],
        };
        Request::new(method::SAVE_IMAGE, params)
    }

    pub fn gallery_key_image(&self, scope: &str, gallery_id: i64) -> Request {
        match self {
            Framing::LegacyPositional => Request::new(
                method::GET_DEFAULT_IMAGE,
                vec![json!(scope), json!(gallery_id)],
            ),
            Framing::NamedParameters(_) => Request::new(
                method::GET_GALLERY_KEY_IMAGE,
                vec![json!(gallery_id), json!({"scope": scope})],
            ),
        }
    }

    pub fn image_url(&self, scope: &str, image_id: i64, view: &str, full: bool) -> Request {
        let params = match self {
            Framing::LegacyPositional => {
                vec![json!(scope), json!(image_id), json!(view), json!(full)]
            }
            Framing::NamedParameters(_) => vec![
                json!(image_id),
                json!({"scope": scope, "view": view, "full": full}),
            ],
        };
        Request::new(method::GET_IMAGE_URL, params)
    }
}

/// Extracts the leading major number of a version string
/// (`"3.0.1"` → 3, `"Ansel H4 (2.0-git)"` → 4).
pub fn parse_major(version: &str) -> Option<u32> {
    let start = version.find(|c: char| c.is_ascii_digit())?;
    let digits: String = version[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// How a session decides its framing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FramingPolicy {
    /// Always positional; no version query.
    Legacy,
    /// Always named; no version query.
    Named { version: String },
    /// Query the server version once at connect.
    Negotiate {
        #[serde(default = "default_version_method")]
        method: String,
    },
}

fn default_version_method() -> String {
    method::GET_VERSION.to_string()
}

impl Default for FramingPolicy {
    fn default() -> Self {
        FramingPolicy::Negotiate {
            method: default_version_method(),
        }
    }
}

impl FramingPolicy {
    /// The framing to use without a round trip, if the policy fixes one.
    pub fn fixed(&self) -> Option<Framing> {
        match self {
            FramingPolicy::Legacy => Some(Framing::LegacyPositional),
            FramingPolicy::Named { version } => Some(Framing::NamedParameters(version.clone())),
            FramingPolicy::Negotiate { .. } => None,
        }
    }

    /// The version query to issue, if the policy negotiates.
    pub fn version_request(&self) -> Option<Request> {
        match self {
            FramingPolicy::Negotiate { method } => Some(Request::new(method.clone(), Vec::new())),
            _ => None,
        }
    }
}

/// Turns a version query result into a version string.
pub fn version_string(result: &Value) -> Option<String> {
    match result {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named() -> Framing {
        Framing::NamedParameters("2.1".into())
    }

    #[test]
    fn major_version_parsing() {
        assert_eq!(parse_major("3.0.1"), Some(3));
        assert_eq!(parse_major("v12"), Some(12));
        assert_eq!(parse_major("Ansel H4 (2.0-git)"), Some(4));
        assert_eq!(parse_major("unknown"), None);
    }

    #[test]
    fn framing_from_version() {
        assert_eq!(Framing::from_version("1.1"), Framing::LegacyPositional);
        assert_eq!(
            Framing::from_version(" 2.0 "),
            Framing::NamedParameters("2.0".into())
        );
        assert_eq!(Framing::from_version("garbage"), Framing::LegacyPositional);
    }

    #[test]
    fn list_galleries_forms() {
        let legacy = Framing::LegacyPositional.list_galleries("ansel");
        assert_eq!(legacy.method(), method::LIST_GALLERIES);
        assert_eq!(legacy.params(), &[json!("ansel"), json!(PERMS_EDIT)]);

        let named = named().list_galleries("ansel");
        assert_eq!(named.params(), &[json!({"scope": "ansel", "perm": PERMS_EDIT})]);
    }

    #[test]
    fn save_image_positional_order() {
        let image = ImagePayload::new("a.jpg", "", b"\x01", "image/jpeg", ImageEncoding::Base64);
        let req =
            Framing::LegacyPositional.save_image("ansel", 4, &image, ImageEncoding::Base64, true);
        let p = req.params();
        assert_eq!(p.len(), 6);
        assert_eq!(p[0], json!("ansel"));
        assert_eq!(p[1], json!(4));
        assert_eq!(p[2]["filename"], "a.jpg");
        assert_eq!(p[3], json!(true));
        assert_eq!(p[4], Value::Null);
        assert_eq!(p[5], json!("base64"));
    }

    #[test]
    fn save_image_named_form() {
        let image = ImagePayload::new("a.jpg", "", b"\x01", "image/jpeg", ImageEncoding::Binhex);
        let req = named().save_image("ansel", 4, &image, ImageEncoding::Binhex, false);
        let p = req.params();
        assert_eq!(p.len(), 3);
        assert_eq!(p[0], json!(4));
        assert_eq!(p[1]["data"], "01");
        assert_eq!(
            p[2],
            json!({"scope": "ansel", "default": false, "encoding": "binhex"})
        );
    }

    #[test]
    fn key_image_method_depends_on_framing() {
        assert_eq!(
            Framing::LegacyPositional.gallery_key_image("s", 1).method(),
            method::GET_DEFAULT_IMAGE
        );
        assert_eq!(
            named().gallery_key_image("s", 1).method(),
            method::GET_GALLERY_KEY_IMAGE
        );
    }

    #[test]
    fn create_and_url_forms() {
        let c = Framing::LegacyPositional.create_gallery("s", "Trip", "d");
        assert_eq!(c.params(), &[json!("s"), json!({"name": "Trip", "desc": "d"})]);
        let c = named().create_gallery("s", "Trip", "d");
        assert_eq!(c.params(), &[json!({"name": "Trip", "desc": "d"}), json!({"scope": "s"})]);

        let u = Framing::LegacyPositional.image_url("s", 9, "thumb", true);
        assert_eq!(u.params(), &[json!("s"), json!(9), json!("thumb"), json!(true)]);
        let u = named().image_url("s", 9, "thumb", true);
        assert_eq!(
            u.params(),
            &[json!(9), json!({"scope": "s", "view": "thumb", "full": true})]
        );
    }

    #[test]
    fn policy_serde_and_defaults() {
        let p: FramingPolicy = serde_json::from_str(r#"{"mode":"negotiate"}"#).unwrap();
        assert_eq!(p, FramingPolicy::default());
        assert!(p.fixed().is_none());
        assert_eq!(p.version_request().unwrap().method(), method::GET_VERSION);

        let p: FramingPolicy =
            serde_json::from_str(r#"{"mode":"named","version":"3.0"}"#).unwrap();
        assert_eq!(p.fixed(), Some(Framing::NamedParameters("3.0".into())));
        assert!(p.version_request().is_none());

        let p: FramingPolicy = serde_json::from_str(r#"{"mode":"legacy"}"#).unwrap();
        assert_eq!(p.fixed(), Some(Framing::LegacyPositional));
    }

    #[test]
    fn version_string_from_result() {
        assert_eq!(version_string(&json!("2.0")), Some("2.0".into()));
        assert_eq!(version_string(&json!(3)), Some("3".into()));
        assert_eq!(version_string(&json!("")), None);
        assert_eq!(version_string(&json!(null)), None);
    }
}
