//! Scripted backend and recording observers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::Notify;

use ansel_export_protocol::Fault;
use ansel_export_protocol::constants::FAULT_METHOD_NOT_FOUND;
use ansel_export_transport::{HttpBackend, HttpReply, HttpRequest, PostFuture};

use crate::error::SessionError;
use crate::observer::{GalleryObserver, SessionObserver};

#[derive(Clone)]
pub(crate) enum Reply {
    Result(Value),
    Fault(i32, String),
    Status(u16),
}

/// Backend answering by method name. The last scripted reply for a method
/// repeats; unscripted methods answer "method not found".
#[derive(Default)]
pub(crate) struct MockBackend {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<(String, Value)>>,
    headers: Mutex<Vec<(String, String)>>,
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, method: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn result(&self, method: &str, value: Value) {
        self.reply(method, Reply::Result(value));
    }

    pub(crate) fn fault(&self, method: &str, code: i32, message: &str) {
        self.reply(method, Reply::Fault(code, message.to_string()));
    }

    /// Holds every call to `method` until the returned gate is notified.
    pub(crate) fn gate(&self, method: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(method.to_string(), gate.clone());
        gate
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p)
            .collect()
    }

    /// Extra headers seen across all calls.
    pub(crate) fn headers(&self) -> Vec<(String, String)> {
        self.headers.lock().unwrap().clone()
    }

    fn next_reply(&self, method: &str) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::Fault(FAULT_METHOD_NOT_FOUND, format!("method {method} not found")),
        }
    }
}

impl HttpBackend for MockBackend {
    fn post<'a>(&'a self, request: HttpRequest<'a>) -> PostFuture<'a> {
        let body: Value = serde_json::from_slice(request.body).unwrap();
        let method = body["method"].as_str().unwrap().to_string();
        let id = body["id"].clone();
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), body["params"].clone()));
        self.headers
            .lock()
            .unwrap()
            .extend(request.headers.iter().cloned());
        let gate = self.gates.lock().unwrap().get(&method).cloned();

        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let body = match self.next_reply(&method) {
                Reply::Result(v) => json!({"result": v, "error": null, "id": id}),
                Reply::Fault(code, message) => {
                    json!({"error": {"code": code, "message": message}, "id": id})
                }
                Reply::Status(status) => {
                    return Ok(HttpReply {
                        status,
                        body: Vec::new(),
                        www_authenticate: None,
                    });
                }
            };
            Ok(HttpReply::ok(serde_json::to_vec(&body).unwrap()))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Initialized,
    SessionError(String),
    SessionCancelled,
    UploadComplete(i64, i64),
    UploadFailed(i64, Fault),
    UploadCancelled(i64),
    KeyImageUrl(i64, String),
}

/// Observer recording every callback in order.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for Recorder {
    fn on_session_initialized(&self) {
        self.push(Event::Initialized);
    }

    fn on_session_error(&self, error: &SessionError) {
        self.push(Event::SessionError(error.to_string()));
    }

    fn on_session_cancelled(&self) {
        self.push(Event::SessionCancelled);
    }
}

impl GalleryObserver for Recorder {
    fn on_gallery_upload_complete(&self, gallery_id: i64, image_id: i64) {
        self.push(Event::UploadComplete(gallery_id, image_id));
    }

    fn on_gallery_upload_failed(&self, gallery_id: i64, fault: &Fault) {
        self.push(Event::UploadFailed(gallery_id, fault.clone()));
    }

    fn on_gallery_upload_cancelled(&self, gallery_id: i64) {
        self.push(Event::UploadCancelled(gallery_id));
    }

    fn on_key_image_url(&self, gallery_id: i64, url: &str) {
        self.push(Event::KeyImageUrl(gallery_id, url.to_string()));
    }
}

/// Gallery list result in the server's keyed-object form.
pub(crate) fn two_galleries() -> Value {
    json!({
        "1": {"share_id": 1, "attribute_name": "Trip", "attribute_desc": "", "attribute_images": 5},
        "2": {"share_id": 2, "attribute_name": "Family", "attribute_desc": "kids", "attribute_images": "3"}
    })
}
