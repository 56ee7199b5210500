//! Galleries and their upload state machine.
//!
//! A gallery is `Ready` or `Busy`. `upload_image` flips it to `Busy` under
//! the lock and a second upload is refused until the first one settles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ansel_export_protocol::types::parse_id;
use ansel_export_protocol::{
    Fault, GalleryRecord, ImageEncoding, ImagePayload, Request, Response, SaveImageResult,
};
use ansel_export_transport::{SendError, Transport};

use crate::error::GalleryError;
use crate::observer::Observers;
use crate::progress::Progress;
use crate::session::{CallContext, SessionInner, SessionState};

/// Upload state of a gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Ready,
    Busy,
}

/// One image to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub data: Vec<u8>,
    pub filename: String,
    pub description: String,
    /// MIME type, e.g. `image/jpeg`.
    pub content_type: String,
    pub encoding: ImageEncoding,
    /// Make this image the gallery's key image.
    pub set_as_default: bool,
}

impl ImageUpload {
    pub fn new(data: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
            description: String::new(),
            content_type: "image/jpeg".into(),
            encoding: ImageEncoding::default(),
            set_as_default: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.set_as_default = true;
        self
    }
}

/// How an upload ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Completed { image_id: i64 },
    Failed(Fault),
    Cancelled,
}

/// Handle to a dispatched upload.
///
/// Dropping it does not cancel the upload.
#[derive(Debug)]
pub struct UploadHandle {
    gallery_id: i64,
    join: JoinHandle<UploadOutcome>,
}

impl UploadHandle {
    pub fn gallery_id(&self) -> i64 {
        self.gallery_id
    }

    /// Waits for the upload to settle.
    pub async fn outcome(self) -> UploadOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => UploadOutcome::Cancelled,
            Err(e) => UploadOutcome::Failed(Fault::transport(format!("upload task failed: {e}"))),
        }
    }
}

struct UploadSlot {
    state: UploadState,
    cancel: Option<CancellationToken>,
}

/// Owned by an upload task. Returns the gallery to `Ready` if the task is
/// dropped before it settles, e.g. when the runtime shuts down.
struct PendingUpload {
    inner: Arc<GalleryInner>,
    gallery_id: i64,
    settled: bool,
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        {
            let mut slot = self.inner.lock_upload();
            slot.state = UploadState::Ready;
            slot.cancel = None;
        }
        warn!(gallery = self.gallery_id, "upload dropped before it settled");
        self.inner
            .observers
            .gallery()
            .on_gallery_upload_cancelled(self.gallery_id);
    }
}

struct GalleryInner {
    record: RwLock<GalleryRecord>,
    key_image_url: RwLock<Option<String>>,
    upload: Mutex<UploadSlot>,
    stale: AtomicBool,
    /// Carries `saveImage` calls.
    upload_transport: Transport,
    /// Carries key image lookups, so they can run during an upload.
    lookup_transport: Transport,
    session: Weak<SessionInner>,
    context: Arc<CallContext>,
    runtime: tokio::runtime::Handle,
    progress: Progress,
    observers: Arc<Observers>,
}

/// A remote gallery owned by a session. Clones share state.
#[derive(Clone)]
pub struct Gallery {
    inner: Arc<GalleryInner>,
}

impl std::fmt::Debug for Gallery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gallery")
            .field("record", &self.record())
            .field("upload_state", &self.upload_state())
            .field("stale", &self.is_stale())
            .finish()
    }
}

impl Gallery {
    pub(crate) fn new(
        record: GalleryRecord,
        session: &Arc<SessionInner>,
        context: Arc<CallContext>,
    ) -> Self {
        Self {
            inner: Arc::new(GalleryInner {
                record: RwLock::new(record),
                key_image_url: RwLock::new(None),
                upload: Mutex::new(UploadSlot {
                    state: UploadState::Ready,
                    cancel: None,
                }),
                stale: AtomicBool::new(false),
                upload_transport: session.make_transport(session.upload_transport_config()),
                lookup_transport: session.make_transport(session.request_transport_config()),
                session: Arc::downgrade(session),
                context,
                runtime: session.runtime.clone(),
                progress: session.progress.clone(),
                observers: session.observers.clone(),
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.read_record().id
    }

    pub fn name(&self) -> String {
        self.inner.read_record().name.clone()
    }

    pub fn description(&self) -> String {
        self.inner.read_record().description.clone()
    }

    pub fn image_count(&self) -> u64 {
        self.inner.read_record().image_count
    }

    pub fn key_image_id(&self) -> Option<i64> {
        self.inner.read_record().key_image_id
    }

    /// Key image URL, once resolved by [`request_key_image_url`](Self::request_key_image_url).
    pub fn key_image_url(&self) -> Option<String> {
        self.inner
            .key_image_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the gallery's current record.
    pub fn record(&self) -> GalleryRecord {
        self.inner.read_record().clone()
    }

    pub fn upload_state(&self) -> UploadState {
        self.inner.lock_upload().state
    }

    /// Returns `true` once the owning session dropped this handle from its
    /// cache (refresh or cancel).
    pub fn is_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Acquire)
    }

    /// Starts uploading an image and returns immediately.
    ///
    /// Fails synchronously, without any callback, if the gallery is busy,
    /// stale, the image is empty or the session is not connected.
    pub fn upload_image(&self, upload: ImageUpload) -> Result<UploadHandle, GalleryError> {
        let gallery_id = self.id();
        if upload.data.is_empty() {
            return Err(GalleryError::EmptyImage);
        }
        if self.is_stale() {
            return Err(GalleryError::Stale { gallery_id });
        }
        let session = self
            .inner
            .session
            .upgrade()
            .ok_or(GalleryError::SessionClosed)?;
        let state = session.state();
        if state != SessionState::Connected {
            return Err(GalleryError::InvalidState { state });
        }

        let cancel = CancellationToken::new();
        {
            let mut slot = self.inner.lock_upload();
            // invalidate() marks the handle stale before it takes this lock.
            if self.is_stale() {
                return Err(GalleryError::Stale { gallery_id });
            }
            if slot.state == UploadState::Busy {
                warn!(gallery = gallery_id, "upload rejected, gallery busy");
                return Err(GalleryError::Busy { gallery_id });
            }
            slot.state = UploadState::Busy;
            slot.cancel = Some(cancel.clone());
        }

        let ctx = &self.inner.context;
        let payload = ImagePayload::new(
            &upload.filename,
            &upload.description,
            &upload.data,
            &upload.content_type,
            upload.encoding,
        );
        let request = ctx.prepare(ctx.framing.save_image(
            &ctx.scope,
            gallery_id,
            &payload,
            upload.encoding,
            upload.set_as_default,
        ));

        debug!(
            gallery = gallery_id,
            file = %upload.filename,
            bytes = upload.data.len(),
            encoding = upload.encoding.as_str(),
            "dispatching upload"
        );
        let pending = PendingUpload {
            inner: self.inner.clone(),
            gallery_id,
            settled: false,
        };
        let join = self.inner.runtime.spawn(self.inner.clone().run_upload(
            pending,
            request,
            cancel,
            upload.filename,
            upload.set_as_default,
        ));

        Ok(UploadHandle { gallery_id, join })
    }

    /// Cancels the in-flight upload, if any. Idempotent.
    pub fn cancel_upload(&self) {
        if let Some(token) = &self.inner.lock_upload().cancel {
            token.cancel();
        }
        self.inner.upload_transport.cancel();
    }

    /// Resolves the key image URL, looking up the key image id first if it
    /// is not known yet.
    pub async fn request_key_image_url(&self) -> Result<String, GalleryError> {
        let gallery_id = self.id();
        if self.is_stale() {
            return Err(GalleryError::Stale { gallery_id });
        }
        let state = self
            .inner
            .session
            .upgrade()
            .ok_or(GalleryError::SessionClosed)?
            .state();
        if state != SessionState::Connected {
            return Err(GalleryError::InvalidState { state });
        }

        let ctx = &self.inner.context;
        let key_image_id = match self.key_image_id() {
            Some(id) => id,
            None => {
                let result = self
                    .inner
                    .lookup(ctx.framing.gallery_key_image(&ctx.scope, gallery_id))
                    .await?;
                let id = parse_id(&result)?.ok_or(GalleryError::NoKeyImage { gallery_id })?;
                self.inner.write_record().key_image_id = Some(id);
                id
            }
        };

        let result = self
            .inner
            .lookup(ctx.framing.image_url(&ctx.scope, key_image_id, &ctx.key_image_view, true))
            .await?;
        let url = result
            .as_str()
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Fault::parse(format!("getImageUrl returned {result}")))?;

        *self
            .inner
            .key_image_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(url.clone());
        debug!(gallery = gallery_id, url = %url, "key image resolved");
        self.inner
            .observers
            .gallery()
            .on_key_image_url(gallery_id, &url);
        Ok(url)
    }

    /// Marks the handle stale and cancels its upload.
    pub(crate) fn invalidate(&self) {
        self.inner.stale.store(true, Ordering::Release);
        self.cancel_upload();
        self.inner.lookup_transport.cancel();
    }
}

impl GalleryInner {
    fn read_record(&self) -> std::sync::RwLockReadGuard<'_, GalleryRecord> {
        self.record.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_record(&self) -> std::sync::RwLockWriteGuard<'_, GalleryRecord> {
        self.record.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_upload(&self) -> std::sync::MutexGuard<'_, UploadSlot> {
        self.upload.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lookup(&self, request: Request) -> Result<serde_json::Value, GalleryError> {
        let request = self.context.prepare(request);
        Ok(self.lookup_transport.send(&request).await?.into_result()?)
    }

    async fn run_upload(
        self: Arc<Self>,
        pending: PendingUpload,
        request: Request,
        cancel: CancellationToken,
        filename: String,
        set_as_default: bool,
    ) -> UploadOutcome {
        let gallery_id = self.read_record().id;
        let sent = self.send_upload(&request, &cancel, &filename).await;
        let outcome = self.settle(pending, sent, &cancel, set_as_default);

        let observer = self.observers.gallery();
        match &outcome {
            UploadOutcome::Completed { image_id } => {
                info!(gallery = gallery_id, image = image_id, file = %filename, "upload complete");
                let name = self.read_record().name.clone();
                self.progress
                    .lock()
                    .set_message(format!("Uploaded {filename} to {name}"));
                observer.on_gallery_upload_complete(gallery_id, *image_id);
            }
            UploadOutcome::Failed(fault) => {
                warn!(gallery = gallery_id, file = %filename, error = %fault, "upload failed");
                self.progress
                    .lock()
                    .set_message(format!("Failed to upload {filename}"));
                observer.on_gallery_upload_failed(gallery_id, fault);
            }
            UploadOutcome::Cancelled => {
                info!(gallery = gallery_id, file = %filename, "upload cancelled");
                self.progress
                    .lock()
                    .set_message(format!("Cancelled upload of {filename}"));
                observer.on_gallery_upload_cancelled(gallery_id);
            }
        }
        outcome
    }

    /// Performs the `saveImage` round trip.
    async fn send_upload(
        &self,
        request: &Request,
        cancel: &CancellationToken,
        filename: &str,
    ) -> Result<SaveImageResult, UploadOutcome> {
        if cancel.is_cancelled() || self.progress.should_cancel() {
            return Err(UploadOutcome::Cancelled);
        }
        let name = self.read_record().name.clone();
        self.progress
            .lock()
            .set_message(format!("Uploading {filename} to {name}"));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SendError::Cancelled),
            _ = self.progress.cancelled() => Err(SendError::Cancelled),
            response = self.upload_transport.send(request) => response,
        };

        match response {
            Ok(Response::Success(value)) => {
                SaveImageResult::from_value(&value).map_err(UploadOutcome::Failed)
            }
            Ok(Response::Fault(fault)) => Err(UploadOutcome::Failed(fault)),
            Err(SendError::Cancelled) => Err(UploadOutcome::Cancelled),
            Err(SendError::ConcurrentRequest) => Err(UploadOutcome::Failed(Fault::transport(
                "upload transport already in use",
            ))),
        }
    }

    /// Returns the gallery to `Ready` and applies a confirmed upload.
    ///
    /// The cancel token is checked under the upload lock, so an upload
    /// cancelled before this point never reports success.
    fn settle(
        &self,
        mut pending: PendingUpload,
        sent: Result<SaveImageResult, UploadOutcome>,
        cancel: &CancellationToken,
        set_as_default: bool,
    ) -> UploadOutcome {
        let mut slot = self.lock_upload();
        pending.settled = true;
        slot.state = UploadState::Ready;
        slot.cancel = None;

        if cancel.is_cancelled() {
            return UploadOutcome::Cancelled;
        }
        let saved = match sent {
            Ok(saved) => saved,
            Err(outcome) => return outcome,
        };

        let mut record = self.write_record();
        record.image_count = saved
            .image_count
            .unwrap_or_else(|| record.image_count.saturating_add(1));
        if set_as_default {
            record.key_image_id = Some(saved.image_id);
            *self
                .key_image_url
                .write()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
        drop(record);
        drop(slot);

        self.progress.lock().increment(1);
        UploadOutcome::Completed {
            image_id: saved.image_id,
        }
    }
}
