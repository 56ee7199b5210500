//! End-to-end export against a scripted gallery service.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::runtime::Handle;

use ansel_export_client::{
    Fault, FramingPolicy, GalleryObserver, ImageUpload, Session, SessionConfig, SessionError,
    SessionObserver, SessionState, UploadOutcome,
};
use ansel_export_transport::{HttpBackend, HttpReply, HttpRequest, PostFuture};

/// Minimal service: two galleries, every upload stored as image 99.
#[derive(Default)]
struct GalleryService {
    methods: Mutex<Vec<String>>,
}

impl HttpBackend for GalleryService {
    fn post<'a>(&'a self, request: HttpRequest<'a>) -> PostFuture<'a> {
        let body: Value = serde_json::from_slice(request.body).unwrap();
        let method = body["method"].as_str().unwrap().to_string();
        self.methods.lock().unwrap().push(method.clone());

        let reply = match method.as_str() {
            "images.getVersion" => json!({"result": "1.2", "id": body["id"]}),
            "images.listGalleries" => json!({
                "result": {
                    "1": {"share_id": "1", "attribute_name": "Trip", "attribute_images": "12"},
                    "2": {"share_id": "2", "attribute_name": "Family", "attribute_images": "40"}
                },
                "error": null,
                "id": body["id"],
            }),
            "images.saveImage" => json!({"result": {"imageId": 99}, "error": null, "id": body["id"]}),
            _ => json!({"error": {"code": -32601, "message": "unknown method"}, "id": body["id"]}),
        };
        Box::pin(async move { Ok(HttpReply::ok(serde_json::to_vec(&reply).unwrap())) })
    }
}

#[derive(Default)]
struct Log {
    lines: Mutex<Vec<String>>,
}

impl Log {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl SessionObserver for Log {
    fn on_session_initialized(&self) {
        self.push("initialized".into());
    }

    fn on_session_error(&self, error: &SessionError) {
        self.push(format!("error: {error}"));
    }
}

impl GalleryObserver for Log {
    fn on_gallery_upload_complete(&self, gallery_id: i64, image_id: i64) {
        self.push(format!("complete {gallery_id} {image_id}"));
    }

    fn on_gallery_upload_failed(&self, gallery_id: i64, fault: &Fault) {
        self.push(format!("failed {gallery_id}: {fault}"));
    }
}

#[tokio::test]
async fn upload_to_first_gallery() {
    let service = Arc::new(GalleryService::default());
    let log = Arc::new(Log::default());
    let config = SessionConfig::new("https://photos.example.com/horde/rpc.php", "alice", "pw");
    let session =
        Session::with_backend(config, service.clone(), log.clone(), Handle::current()).unwrap();
    session.set_gallery_observer(log.clone());

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.server_version().as_deref(), Some("1.2"));

    let names: Vec<_> = session.galleries().iter().map(|g| g.name()).collect();
    assert_eq!(names, ["Trip", "Family"]);

    let gallery = session.gallery_by_id(1).unwrap();
    let before = gallery.image_count();
    let handle = gallery
        .upload_image(ImageUpload::new(vec![7u8; 10], "beach.jpg"))
        .unwrap();

    assert_eq!(handle.outcome().await, UploadOutcome::Completed { image_id: 99 });
    assert_eq!(gallery.image_count(), before + 1);
    assert_eq!(session.gallery_by_id(2).unwrap().image_count(), 40);
    assert_eq!(log.lines(), ["initialized", "complete 1 99"]);
    assert_eq!(
        *service.methods.lock().unwrap(),
        ["images.getVersion", "images.listGalleries", "images.saveImage"]
    );
}

#[tokio::test]
async fn progress_is_readable_from_another_thread() {
    let service = Arc::new(GalleryService::default());
    let log = Arc::new(Log::default());
    let config = SessionConfig::new("https://photos.example.com/horde/rpc.php", "alice", "pw")
        .with_framing(FramingPolicy::Legacy);
    let session = Session::with_backend(config, service, log.clone(), Handle::current()).unwrap();
    session.set_gallery_observer(log.clone());
    session.connect().await.unwrap();

    let progress = session.progress();
    progress.lock().set_total(3);

    let gallery = session.gallery_by_index(1).unwrap();
    for i in 0..3 {
        let upload = ImageUpload::new(vec![1, 2, 3], format!("img{i}.jpg"));
        let outcome = gallery.upload_image(upload).unwrap().outcome().await;
        assert_eq!(outcome, UploadOutcome::Completed { image_id: 99 });
    }

    let poller = std::thread::spawn(move || {
        let guard = progress.lock();
        (guard.current_value(), guard.fraction(), guard.message().to_string())
    });
    let (current, fraction, message) = poller.join().unwrap();
    assert_eq!(current, 3);
    assert_eq!(fraction, Some(1.0));
    assert_eq!(message, "Uploaded img2.jpg to Family");
    assert_eq!(gallery.image_count(), 43);
}
