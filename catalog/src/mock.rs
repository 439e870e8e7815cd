//! A scripted stand-in for the YouTube Data API, used by the unit tests.
//!
//! The server binds to an ephemeral localhost port, answers every request from a handler
//! closure, and records what it was asked so tests can count metered calls.

use crate::config::CatalogConfig;
use crate::duration::format_duration;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use hyper_util::rt::TokioIo;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Path without the leading slash, e.g. `videos`.
    pub endpoint: String,
    pub raw_query: String,
    pub params: BTreeMap<String, String>,
    pub if_none_match: Option<String>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn from_request(req: &Request<body::Incoming>) -> Self {
        let raw_query = req.uri().query().unwrap_or("").to_string();
        Self {
            endpoint: req.uri().path().trim_start_matches('/').to_string(),
            params: form_urlencoded::parse(raw_query.as_bytes())
                .into_owned()
                .collect(),
            raw_query,
            if_none_match: req
                .headers()
                .get(hyper::header::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockReply {
    status: u16,
    body: String,
    etag: Option<String>,
}

impl MockReply {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            etag: None,
        }
    }

    /// An error in the API's error envelope, carrying `reason`.
    pub fn error(status: u16, reason: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({
                "error": {
                    "code": status,
                    "message": message,
                    "errors": [{ "reason": reason, "message": message }]
                }
            })
            .to_string(),
            etag: None,
        }
    }

    pub fn not_modified() -> Self {
        Self {
            status: 304,
            body: String::new(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() =
            StatusCode::from_u16(self.status).expect("mock replies use valid status codes");
        let headers = response.headers_mut();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        if let Some(etag) = self.etag {
            headers.insert(
                hyper::header::ETAG,
                etag.parse().expect("mock etags are valid header values"),
            );
        }
        response
    }
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockReply + Send + Sync>;

pub struct MockYouTube {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    server: JoinHandle<()>,
}

impl MockYouTube {
    /// Starts a server that answers every request with `handler`.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock YouTube server");
        let addr = listener.local_addr().expect("get mock server address");
        let handler: Handler = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let server = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((conn, _)) = listener.accept().await {
                    let conn = TokioIo::new(conn);
                    let handler = Arc::clone(&handler);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<body::Incoming>| {
                            let recorded = RecordedRequest::from_request(&req);
                            requests.lock().unwrap().push(recorded.clone());
                            let reply = handler(&recorded);
                            async move { Ok::<_, Infallible>(reply.into_response()) }
                        });
                        let _ = http1::Builder::new().serve_connection(conn, service).await;
                    });
                }
            })
        };

        Self {
            addr,
            requests,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests made against `endpoint` (e.g. `"search"`).
    pub fn count(&self, endpoint: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }
}

impl Drop for MockYouTube {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Configuration pointed at `mock`, with a credential and a negligible retry delay.
pub fn test_catalog_config(mock: &MockYouTube) -> CatalogConfig {
    CatalogConfig {
        api_base: mock.base_url(),
        retry_delay: Duration::from_millis(1),
        ..CatalogConfig::default()
    }
    .with_api_key("test-key")
}

/// A full `video` resource of the given length.
pub fn video_json(id: &str, duration_secs: u64) -> Value {
    video_json_on(id, duration_secs, "UCchannel", "2024-01-01T00:00:00Z")
}

pub fn video_json_on(id: &str, duration_secs: u64, channel_id: &str, published_at: &str) -> Value {
    json!({
        "kind": "youtube#video",
        "id": id,
        "snippet": {
            "title": format!("Video {id}"),
            "description": "",
            "thumbnails": {
                "default": { "url": format!("https://i.ytimg.com/vi/{id}/default.jpg"), "width": 120, "height": 90 }
            },
            "channelId": channel_id,
            "channelTitle": format!("Channel {channel_id}"),
            "publishedAt": published_at
        },
        "contentDetails": { "duration": format_duration(duration_secs) },
        "statistics": { "viewCount": "100", "likeCount": "10" }
    })
}

/// A `videos.list` page.
pub fn video_page(items: Vec<Value>, next_page_token: Option<&str>) -> Value {
    json!({ "items": items, "nextPageToken": next_page_token })
}

/// A `search.list` page that only identifies videos.
pub fn search_page(ids: &[&str], next_page_token: Option<&str>) -> Value {
    let items: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": { "kind": "youtube#video", "videoId": id } }))
        .collect();
    json!({ "items": items, "nextPageToken": next_page_token })
}

pub fn channel_json(id: &str) -> Value {
    json!({
        "id": id,
        "snippet": {
            "title": format!("Channel {id}"),
            "thumbnails": {
                "default": { "url": format!("https://yt3.ggpht.com/{id}/default.jpg") }
            }
        }
    })
}

/// Answers `videos.list` by id from `videos`, in the order requested.
pub fn videos_by_id(req: &RecordedRequest, videos: &[Value]) -> MockReply {
    let wanted: Vec<&str> = req.param("id").unwrap_or("").split(',').collect();
    let items: Vec<Value> = wanted
        .iter()
        .filter_map(|id| videos.iter().find(|v| v["id"] == *id).cloned())
        .collect();
    MockReply::json(video_page(items, None))
}

/// Answers `channels.list` with a snippet for every requested id.
pub fn channels_by_id(req: &RecordedRequest) -> MockReply {
    let items: Vec<Value> = req
        .param("id")
        .unwrap_or("")
        .split(',')
        .filter(|id| !id.is_empty())
        .map(channel_json)
        .collect();
    MockReply::json(json!({ "items": items }))
}

/// A catalog backed by a fresh in-process store and pointed at `mock`.
pub fn test_catalog(mock: &MockYouTube) -> crate::Catalog {
    test_catalog_with(mock, |_| {})
}

/// Like [`test_catalog`], with `tweak` applied to the configuration first.
pub fn test_catalog_with(mock: &MockYouTube, tweak: impl FnOnce(&mut CatalogConfig)) -> crate::Catalog {
    let mut config = test_catalog_config(mock);
    tweak(&mut config);
    crate::Catalog::new(config, Arc::new(crate::store::MemoryStore::new()))
}
