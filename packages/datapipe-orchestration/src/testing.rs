//! Canned-response HTTP server for client tests

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Shared {
    responses: Mutex<VecDeque<(u16, String)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Shared {
    /// Queued responses are served in order; the last one repeats
    fn next_response(&self) -> (u16, String) {
        let mut queue = self.responses.lock();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or((200, String::new()))
        } else {
            queue.front().cloned().unwrap_or((200, String::new()))
        }
    }
}

async fn respond(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    shared.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let (status, body) = shared.next_response();
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

/// Axum router on an ephemeral port that answers every route from a queue
pub struct FakeHttpServer {
    pub base_url: String,
    shared: Arc<Shared>,
    dropped: Arc<AtomicUsize>,
}

impl FakeHttpServer {
    pub async fn start(responses: Vec<(u16, &str)>) -> Self {
        Self::start_dropping(0, responses).await
    }

    /// Accept and immediately close the first `drop_first` connections
    /// before serving the queue
    pub async fn start_dropping(drop_first: usize, responses: Vec<(u16, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|(s, b)| (s, b.to_string()))
                    .collect(),
            ),
            requests: Mutex::default(),
        });
        let dropped = Arc::new(AtomicUsize::new(0));

        let app = Router::new().fallback(respond).with_state(shared.clone());
        let counter = dropped.clone();
        tokio::spawn(async move {
            for _ in 0..drop_first {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                drop(stream);
                counter.fetch_add(1, Ordering::SeqCst);
            }
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            shared,
            dropped,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.shared.requests.lock().len()
    }

    pub fn dropped_connections(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}
