//! Scripted in-memory HTTP client for unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{StreamError, StreamResult};
use crate::http::{HttpClient, HttpResponse};

pub const VENDOR_SCRIPT: &str = r#"
var ub98484234 = function (rid, did, tt) {
    if (!/native code/.test(window.navigator) || !/native code/.test(document.createElement)) {
        throw new Error('automation detected');
    }
    return 'v=220120250101&did=' + did + '&tt=' + tt + '&sign=' + CryptoJS.MD5(rid + did + tt).toString();
};
"#;

enum Scripted {
    Respond(HttpResponse),
    Gated(Arc<Notify>, HttpResponse),
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub url: String,
    pub form: Vec<(String, String)>,
}

impl RecordedPost {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
pub struct FakeHttp {
    gets: Mutex<VecDeque<Scripted>>,
    posts: Mutex<VecDeque<Scripted>>,
    get_log: Mutex<Vec<String>>,
    post_log: Mutex<Vec<RecordedPost>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, response: HttpResponse) {
        self.gets.lock().push_back(Scripted::Respond(response));
    }

    /// Queue a GET response that is held back until the returned gate is notified.
    pub fn push_get_gated(&self, response: HttpResponse) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gets
            .lock()
            .push_back(Scripted::Gated(Arc::clone(&gate), response));
        gate
    }

    pub fn push_get_hang(&self) {
        self.gets.lock().push_back(Scripted::Hang);
    }

    pub fn push_post(&self, response: HttpResponse) {
        self.posts.lock().push_back(Scripted::Respond(response));
    }

    pub fn push_post_hang(&self) {
        self.posts.lock().push_back(Scripted::Hang);
    }

    pub fn get_count(&self) -> usize {
        self.get_log.lock().len()
    }

    pub fn get_urls(&self) -> Vec<String> {
        self.get_log.lock().clone()
    }

    pub fn post_count(&self) -> usize {
        self.post_log.lock().len()
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.post_log.lock().clone()
    }
}

async fn answer(next: Option<Scripted>, url: String) -> StreamResult<HttpResponse> {
    match next {
        Some(Scripted::Respond(response)) => Ok(response),
        Some(Scripted::Gated(gate, response)) => {
            gate.notified().await;
            Ok(response)
        }
        Some(Scripted::Hang) => std::future::pending::<StreamResult<HttpResponse>>().await,
        None => Err(StreamError::Transport(format!(
            "no scripted response for {}",
            url
        ))),
    }
}

impl HttpClient for FakeHttp {
    fn get(&self, url: &str) -> impl Future<Output = StreamResult<HttpResponse>> + Send {
        self.get_log.lock().push(url.to_string());
        let next = self.gets.lock().pop_front();
        answer(next, url.to_string())
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> impl Future<Output = StreamResult<HttpResponse>> + Send {
        self.post_log.lock().push(RecordedPost {
            url: url.to_string(),
            form: form.to_vec(),
        });
        let next = self.posts.lock().pop_front();
        answer(next, url.to_string())
    }
}

/// A successful script endpoint response carrying [`VENDOR_SCRIPT`].
pub fn script_envelope(address: &str) -> HttpResponse {
    script_envelope_with(address, VENDOR_SCRIPT)
}

pub fn script_envelope_with(address: &str, source: &str) -> HttpResponse {
    let mut data = serde_json::Map::new();
    data.insert(format!("room{address}"), source.into());
    let body = serde_json::json!({ "error": 0, "data": data });
    HttpResponse::new(200, body.to_string())
}

/// A play endpoint envelope with the given error code and no data.
pub fn play_error(code: i64) -> HttpResponse {
    let body = serde_json::json!({ "error": code, "msg": "", "data": null });
    HttpResponse::new(200, body.to_string())
}

/// A play endpoint envelope offering the usual qualities with `rate` in effect.
pub fn play_envelope(code: i64, rate: i64, cdn: &str) -> HttpResponse {
    let body = serde_json::json!({
        "error": code,
        "msg": "ok",
        "data": {
            "room_id": 123456,
            "rtmp_url": "https://hw-tct.douyucdn.cn/live",
            "rtmp_live": format!("123456r_{rate}.flv?wsAuth=abc"),
            "rtmp_cdn": cdn,
            "rate": rate,
            "multirates": [
                { "name": "蓝光4M", "rate": 0, "highBit": 1 },
                { "name": "超清", "rate": 3, "highBit": 0 },
                { "name": "高清", "rate": 2, "highBit": 0 },
            ],
        },
    });
    HttpResponse::new(200, body.to_string())
}
