//! In-process backend for client tests: serves scripted responses and records
//! every request it sees.

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
struct MockRoute {
    method: String,
    path: String,
    status: u16,
    body: String,
}

#[derive(Default)]
struct MockState {
    routes: Mutex<Vec<MockRoute>>,
    hits: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub(crate) struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

async fn respond(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(|q| q.to_string()),
        authorization: header_string(&headers, header::AUTHORIZATION),
        content_type: header_string(&headers, header::CONTENT_TYPE),
        body,
    });

    let route = state
        .routes
        .lock()
        .unwrap()
        .iter()
        .find(|r| r.method == method.as_str() && r.path == uri.path())
        .cloned();

    match route {
        Some(route) => (
            StatusCode::from_u16(route.status).unwrap(),
            [(header::CONTENT_TYPE, "application/json")],
            route.body,
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"message":"No mock route"}"#.to_string(),
        )
            .into_response(),
    }
}

impl MockBackend {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(respond).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            state,
            server,
        }
    }

    /// Scripts `method path` to answer with `status` and a raw body. Later
    /// routes for the same method and path replace earlier ones.
    pub(crate) fn route(&self, method: &str, path: &str, status: u16, body: impl Into<String>) {
        let mut routes = self.state.routes.lock().unwrap();
        routes.retain(|r| !(r.method == method && r.path == path));
        routes.push(MockRoute {
            method: method.to_string(),
            path: path.to_string(),
            status,
            body: body.into(),
        });
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub(crate) fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<RecordedRequest> {
        self.state.requests.lock().unwrap().last().cloned()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// An address nothing is listening on.
pub(crate) async fn unused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/api")
}
