//! Client for exporting images to an Ansel photo gallery.
//!
//! A [`Session`] connects to the service and caches its galleries. Each
//! [`Gallery`] runs at most one upload at a time, reports results through a
//! [`GalleryObserver`] and publishes progress through a shared [`Progress`]
//! that another thread may poll and cancel.

pub mod config;
pub mod error;
pub mod gallery;
pub mod observer;
pub mod progress;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use error::{ErrorKind, GalleryError, SessionError};
pub use gallery::{Gallery, ImageUpload, UploadHandle, UploadOutcome, UploadState};
pub use observer::{GalleryObserver, NoopObserver, SessionObserver};
pub use progress::{Progress, ProgressGuard, ProgressState};
pub use session::{Session, SessionState};

pub use ansel_export_protocol::{Fault, FaultKind, FramingPolicy, ImageEncoding};
pub use ansel_export_transport::{Credentials, HttpBackend};
