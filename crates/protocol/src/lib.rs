//! Wire types for the Ansel `images.*` JSON-RPC API.
//!
//! Covers request/response envelopes, fault classification, the
//! version-dependent call framing, and decoding of gallery records.

pub mod constants;
pub mod envelope;
pub mod framing;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::{Fault, FaultKind, Request, Response};
pub use framing::{Framing, FramingPolicy};
pub use types::{GalleryRecord, ImageEncoding, ImagePayload, SaveImageResult};
