//! Export run: connect, pick the gallery, upload files one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{info, warn};

use ansel_export_client::{
    Fault, Gallery, GalleryObserver, ImageUpload, Progress, Session, SessionError,
    SessionObserver, UploadOutcome,
};

use crate::config::{Config, Target, content_type_for};

/// Interval between progress reports from the polling thread.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Logs session and upload events.
struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_session_initialized(&self) {
        info!("session ready");
    }

    fn on_session_error(&self, error: &SessionError) {
        warn!(error = %error, "session failed");
    }

    fn on_session_cancelled(&self) {
        info!("session cancelled");
    }
}

impl GalleryObserver for LogObserver {
    fn on_gallery_upload_complete(&self, gallery_id: i64, image_id: i64) {
        info!(gallery = gallery_id, image = image_id, "image stored");
    }

    fn on_gallery_upload_failed(&self, gallery_id: i64, fault: &Fault) {
        warn!(gallery = gallery_id, error = %fault, "image rejected");
    }

    fn on_gallery_upload_cancelled(&self, gallery_id: i64) {
        info!(gallery = gallery_id, "upload cancelled");
    }

    fn on_key_image_url(&self, gallery_id: i64, url: &str) {
        info!(gallery = gallery_id, url, "key image");
    }
}

#[derive(Debug, Default)]
struct Summary {
    uploaded: u32,
    failed: u32,
    cancelled: bool,
}

pub async fn run(config: Config, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let observer = Arc::new(LogObserver);
    let session = Session::new(config.session.clone(), observer.clone())?;
    session.set_gallery_observer(observer);

    let progress = session.progress();
    progress.lock().set_total(files.len() as u64);

    let interrupt = progress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            interrupt.request_cancel();
        }
    });

    let done = Arc::new(AtomicBool::new(false));
    let poller = spawn_poller(progress.clone(), done.clone());

    let result = export(&session, &config.target, &files, &progress).await;

    done.store(true, Ordering::Release);
    if poller.join().is_err() {
        warn!("progress poller panicked");
    }

    let summary = result?;
    info!(
        uploaded = summary.uploaded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "export summary"
    );
    if summary.failed > 0 {
        bail!("{} of {} images failed", summary.failed, files.len());
    }
    Ok(())
}

async fn export(
    session: &Session,
    target: &Target,
    files: &[PathBuf],
    progress: &Progress,
) -> anyhow::Result<Summary> {
    session.connect().await.context("connecting")?;
    let gallery = resolve_gallery(session, target).await?;
    info!(gallery = gallery.id(), name = %gallery.name(), "exporting");

    let mut summary = Summary::default();
    for (i, path) in files.iter().enumerate() {
        if progress.should_cancel() {
            session.cancel();
            summary.cancelled = true;
            break;
        }

        let upload = read_upload(path, target, i == 0).await?;
        match gallery.upload_image(upload)?.outcome().await {
            UploadOutcome::Completed { .. } => summary.uploaded += 1,
            UploadOutcome::Failed(_) => summary.failed += 1,
            UploadOutcome::Cancelled => {
                session.cancel();
                summary.cancelled = true;
                break;
            }
        }
    }

    if summary.uploaded > 0 && !summary.cancelled {
        if let Err(e) = gallery.request_key_image_url().await {
            warn!(error = %e, "key image lookup failed");
        }
    }
    Ok(summary)
}

async fn read_upload(path: &Path, target: &Target, first: bool) -> anyhow::Result<ImageUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();

    let upload = ImageUpload::new(data, filename)
        .with_content_type(content_type_for(path))
        .with_encoding(target.encoding);
    Ok(if first && target.set_first_as_key {
        upload.as_default()
    } else {
        upload
    })
}

/// Finds the target gallery, creating it when configured to.
async fn resolve_gallery(session: &Session, target: &Target) -> anyhow::Result<Gallery> {
    if let Some(id) = target.gallery_id {
        return Ok(session.gallery_by_id(id)?);
    }
    let Some(name) = &target.gallery_name else {
        return session
            .gallery_by_index(0)
            .context("the account has no galleries");
    };
    if let Some(gallery) = session.galleries().into_iter().find(|g| &g.name() == name) {
        return Ok(gallery);
    }
    if !target.create_missing {
        bail!("no gallery named {name:?}");
    }
    info!(name = %name, "creating gallery");
    Ok(session.create_gallery(name, &target.description).await?)
}

/// Reports progress from a plain thread, the way a host UI loop would.
fn spawn_poller(progress: Progress, done: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last = None;
        while !done.load(Ordering::Acquire) {
            let snapshot = {
                let guard = progress.lock();
                (guard.current_value(), guard.total_value(), guard.message().to_string())
            };
            if last.as_ref() != Some(&snapshot) {
                let (current, total, message) = &snapshot;
                info!(current, total, message = %message, "progress");
                last = Some(snapshot);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    })
}
