//! In-process mock of the release forge.
//!
//! Serves the release index, HEAD with an explicit Content-Length and ranged
//! GETs answered with 206. Faults can be injected per range start and every
//! ranged GET is counted by its start offset.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How an injected failure looks on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 503 with an empty body
    Unavailable,
    /// 206 carrying only the first half of the requested range
    Truncate,
    /// 206 of the requested length, but served from offset 0
    WrongRange,
}

#[derive(Default)]
pub struct ForgeState {
    releases: Mutex<HashMap<String, serde_json::Value>>,
    assets: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<HashMap<u64, (Fault, u32)>>,
    hits: Mutex<HashMap<u64, u32>>,
    head_requests: AtomicU32,
    head_disabled: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

pub struct MockForge {
    pub addr: SocketAddr,
    pub state: Arc<ForgeState>,
    handle: JoinHandle<()>,
}

impl MockForge {
    pub async fn start() -> Self {
        let state = Arc::new(ForgeState::default());
        let app = Router::new()
            .route("/repos/:owner/:name/releases", get(list_releases))
            .route(
                "/:owner/:name/releases/download/:tag/:file",
                get(download_asset).head(head_asset),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn asset_url(&self, owner: &str, name: &str, tag: &str, file: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.base_url(),
            owner,
            name,
            tag,
            file
        )
    }

    pub fn set_releases(&self, owner: &str, name: &str, releases: serde_json::Value) {
        self.state
            .releases
            .lock()
            .unwrap()
            .insert(format!("{}/{}", owner, name), releases);
    }

    pub fn add_asset(&self, file: &str, bytes: Vec<u8>) {
        self.state.assets.lock().unwrap().insert(file.to_string(), bytes);
    }

    /// Fail the first `times` ranged GETs starting at `start`.
    pub fn fail_range(&self, start: u64, fault: Fault, times: u32) {
        self.state.faults.lock().unwrap().insert(start, (fault, times));
    }

    /// Ranged GETs received with this start offset.
    pub fn hits(&self, start: u64) -> u32 {
        self.state.hits.lock().unwrap().get(&start).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> u32 {
        self.state.hits.lock().unwrap().values().sum()
    }

    pub fn head_requests(&self) -> u32 {
        self.state.head_requests.load(Ordering::SeqCst)
    }

    /// Answer HEAD with 405 so clients must fall back to a ranged size lookup.
    pub fn disable_head(&self) {
        self.state.head_disabled.store(true, Ordering::SeqCst);
    }

    /// Delay every asset GET before responding.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }
}

impl Drop for MockForge {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn list_releases(
    State(state): State<Arc<ForgeState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Response {
    match state.releases.lock().unwrap().get(&format!("{}/{}", owner, name)) {
        Some(releases) => Json(releases.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn head_asset(
    State(state): State<Arc<ForgeState>>,
    Path((_owner, _name, _tag, file)): Path<(String, String, String, String)>,
) -> Response {
    state.head_requests.fetch_add(1, Ordering::SeqCst);
    if state.head_disabled.load(Ordering::SeqCst) {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let len = match state.assets.lock().unwrap().get(&file) {
        Some(bytes) => bytes.len(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, len)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::empty())
        .unwrap()
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn download_asset(
    State(state): State<Arc<ForgeState>>,
    Path((_owner, _name, _tag, file)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let delay = *state.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let bytes = match state.assets.lock().unwrap().get(&file) {
        Some(bytes) => bytes.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    let total = bytes.len() as u64;

    let Some((start, end)) = parse_range(&headers) else {
        return (StatusCode::OK, bytes).into_response();
    };
    *state.hits.lock().unwrap().entry(start).or_insert(0) += 1;

    if start >= total || end < start {
        return Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", total))
            .body(Body::empty())
            .unwrap();
    }
    let end = end.min(total - 1);
    let (mut first, mut last) = (start, end);

    let fault = {
        let mut faults = state.faults.lock().unwrap();
        match faults.get_mut(&start) {
            Some((fault, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*fault)
            }
            _ => None,
        }
    };
    if fault == Some(Fault::WrongRange) {
        last -= first;
        first = 0;
    }
    let mut body = bytes[first as usize..=last as usize].to_vec();
    match fault {
        Some(Fault::Unavailable) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Some(Fault::Truncate) => body.truncate(body.len() / 2),
        Some(Fault::WrongRange) | None => {}
    }

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", first, last, total),
        )
        .body(Body::from(body))
        .unwrap()
}
