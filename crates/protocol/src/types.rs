use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Fault;

/// Reads an integer that may arrive as a JSON number or a numeric string.
///
/// PHP servers frequently serialize database ids as strings.
pub fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn string_of(obj: &Map<String, Value>, keys: &[&str]) -> String {
    match first_of(obj, keys) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// One gallery as reported by `images.listGalleries`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub image_count: u64,
    /// `None` when the gallery has no key image yet.
    pub key_image_id: Option<i64>,
}

impl GalleryRecord {
    /// Decodes a record. `key` is the map key the record was listed under,
    /// used as the id when the record itself carries none.
    pub fn from_value(key: Option<&str>, value: &Value) -> Result<Self, Fault> {
        let obj = value
            .as_object()
            .ok_or_else(|| Fault::parse("gallery record is not an object"))?;

        let id = first_of(obj, &["share_id", "id", "gallery_id"])
            .and_then(int_value)
            .or_else(|| key.and_then(|k| k.trim().parse().ok()))
            .ok_or_else(|| Fault::parse("gallery record has no id"))?;

        let image_count = first_of(obj, &["attribute_images", "images", "image_count"])
            .and_then(int_value)
            .unwrap_or(0)
            .max(0) as u64;

        let key_image_id = first_of(obj, &["attribute_default", "default"])
            .and_then(int_value)
            .filter(|id| *id > 0);

        Ok(Self {
            id,
            name: string_of(obj, &["attribute_name", "name"]),
            description: string_of(obj, &["attribute_desc", "desc", "description"]),
            image_count,
            key_image_id,
        })
    }
}

/// Decodes the result of `images.listGalleries`.
///
/// Accepts an object keyed by gallery id (returned in ascending id order)
/// or an array (order preserved).
pub fn parse_gallery_list(result: &Value) -> Result<Vec<GalleryRecord>, Fault> {
    match result {
        Value::Array(items) => items
            .iter()
            .map(|v| GalleryRecord::from_value(None, v))
            .collect(),
        Value::Object(map) => {
            let mut records = map
                .iter()
                .map(|(k, v)| GalleryRecord::from_value(Some(k), v))
                .collect::<Result<Vec<_>, _>>()?;
            records.sort_by_key(|r| r.id);
            Ok(records)
        }
        other => Err(Fault::parse(format!(
            "unexpected gallery list result: {other}"
        ))),
    }
}

/// Decodes a single id result (`createGallery`, key image lookups).
///
/// Returns `None` for null, `false` and non-positive ids.
pub fn parse_id(result: &Value) -> Result<Option<i64>, Fault> {
    match result {
        Value::Null | Value::Bool(false) => Ok(None),
        other => int_value(other)
            .map(|id| Some(id).filter(|id| *id > 0))
            .ok_or_else(|| Fault::parse(format!("expected an id, got {other}"))),
    }
}

/// Result of `images.saveImage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveImageResult {
    pub image_id: i64,
    pub gallery_id: Option<i64>,
    pub image_count: Option<u64>,
}

impl SaveImageResult {
    /// Decodes either the full result object or a bare image id.
    pub fn from_value(result: &Value) -> Result<Self, Fault> {
        let (image_id, gallery_id, image_count) = match result {
            Value::Object(obj) => (
                first_of(obj, &["image_id", "imageId"]).and_then(int_value),
                first_of(obj, &["gallery_id", "galleryId"]).and_then(int_value),
                first_of(obj, &["image_count", "imageCount"])
                    .and_then(int_value)
                    .map(|c| c.max(0) as u64),
            ),
            other => (int_value(other), None, None),
        };
        let image_id = image_id
            .filter(|id| *id > 0)
            .ok_or_else(|| Fault::parse(format!("saveImage result has no image id: {result}")))?;
        Ok(Self {
            image_id,
            gallery_id,
            image_count,
        })
    }
}

/// Transfer encoding for image bytes inside the JSON body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    #[default]
    Base64,
    Binhex,
}

impl ImageEncoding {
    /// Tag sent to the server.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageEncoding::Base64 => "base64",
            ImageEncoding::Binhex => "binhex",
        }
    }

    pub fn encode(&self, data: &[u8]) -> String {
        match self {
            ImageEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(data),
            ImageEncoding::Binhex => hex::encode(data),
        }
    }
}

/// The `image` argument of `images.saveImage`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePayload {
    pub filename: String,
    pub description: String,
    /// Encoded image bytes.
    pub data: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl ImagePayload {
    pub fn new(
        filename: impl Into<String>,
        description: impl Into<String>,
        data: &[u8],
        content_type: impl Into<String>,
        encoding: ImageEncoding,
    ) -> Self {
        Self {
            filename: filename.into(),
            description: description.into(),
            data: encoding.encode(data),
            content_type: content_type.into(),
        }
    }
}
