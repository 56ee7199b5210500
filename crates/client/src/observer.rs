//! Callback interfaces for session and gallery events.
//!
//! Callbacks run on whichever runtime worker completed the request. They
//! must not assume any particular thread.

use std::sync::{Arc, PoisonError, RwLock};

use ansel_export_protocol::Fault;

use crate::error::SessionError;

/// Receives session lifecycle events.
pub trait SessionObserver: Send + Sync {
    /// The session is connected and the gallery list is loaded.
    fn on_session_initialized(&self);

    /// Connecting failed. The session is now in the error state.
    fn on_session_error(&self, error: &SessionError);

    /// The session was cancelled.
    fn on_session_cancelled(&self) {}
}

/// Receives per-gallery upload and lookup events.
pub trait GalleryObserver: Send + Sync {
    fn on_gallery_upload_complete(&self, gallery_id: i64, image_id: i64);

    fn on_gallery_upload_failed(&self, gallery_id: i64, fault: &Fault);

    fn on_gallery_upload_cancelled(&self, _gallery_id: i64) {}

    fn on_key_image_url(&self, _gallery_id: i64, _url: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_session_initialized(&self) {}
    fn on_session_error(&self, _error: &SessionError) {}
}

impl GalleryObserver for NoopObserver {
    fn on_gallery_upload_complete(&self, _gallery_id: i64, _image_id: i64) {}
    fn on_gallery_upload_failed(&self, _gallery_id: i64, _fault: &Fault) {}
}

/// Observers registered on a session, shared with its galleries.
pub(crate) struct Observers {
    session: Arc<dyn SessionObserver>,
    gallery: RwLock<Arc<dyn GalleryObserver>>,
}

impl Observers {
    pub(crate) fn new(session: Arc<dyn SessionObserver>) -> Self {
        Self {
            session,
            gallery: RwLock::new(Arc::new(NoopObserver)),
        }
    }

    pub(crate) fn session(&self) -> &dyn SessionObserver {
        self.session.as_ref()
    }

    /// Current gallery observer. Cloned so callbacks run without the lock.
    pub(crate) fn gallery(&self) -> Arc<dyn GalleryObserver> {
        self.gallery
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_gallery(&self, observer: Arc<dyn GalleryObserver>) {
        *self.gallery.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }
}
