use std::time::Duration;

/// JSON-RPC envelope version sent with every request.
pub const JSONRPC_VERSION: &str = "1.1";

/// Application scope used when the caller does not configure one.
pub const DEFAULT_SCOPE: &str = "ansel";

/// Timeout for metadata calls (listing, creating, lookups).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for image uploads.
///
/// A single `saveImage` call carries the whole encoded image, so it gets a
/// longer budget than metadata calls.
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum number of authentication challenges answered for one request.
pub const MAX_AUTH_CHALLENGES: u32 = 3;

/// Maximum accepted response body size (16 MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Lowest server major version that accepts the named-parameter call forms.
pub const NAMED_PARAMETERS_MIN_MAJOR: u32 = 2;

/// Image view requested when resolving key image URLs.
pub const DEFAULT_IMAGE_VIEW: &str = "thumb";

/// Remote method names of the images API.
pub mod method {
    pub const LIST_GALLERIES: &str = "images.listGalleries";
    pub const CREATE_GALLERY: &str = "images.createGallery";
    pub const SAVE_IMAGE: &str = "images.saveImage";
    /// Key image lookup on servers using positional parameters.
    pub const GET_DEFAULT_IMAGE: &str = "images.getDefaultImage";
    /// Key image lookup on servers using named parameters.
    pub const GET_GALLERY_KEY_IMAGE: &str = "images.getGalleryKeyImage";
    pub const GET_IMAGE_URL: &str = "images.getImageUrl";
    /// Default version query used by framing negotiation.
    pub const GET_VERSION: &str = "images.getVersion";
}

/// Permission bit asking the server for galleries the user can add to.
pub const PERMS_EDIT: u32 = 8;

/// Fault code for a body that could not be decoded.
pub const FAULT_PARSE_ERROR: i32 = -32700;
/// Fault code the server returns for an unknown method.
pub const FAULT_METHOD_NOT_FOUND: i32 = -32601;
/// Fault code for network, HTTP status, TLS and timeout failures.
pub const FAULT_TRANSPORT_ERROR: i32 = -32300;
/// Fault code for an authentication challenge nobody answered.
pub const FAULT_AUTH_CANCELLED: i32 = -32401;
