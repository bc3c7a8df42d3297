//! HTTP mock servers for integration testing.
//!
//! Each server binds a random local port, serves a minimal subset of the
//! real API, captures what it receives, and can be told to fail the next N
//! requests with a given status code.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::embedding::MockEmbedder;
use crate::store::cosine_similarity;

/// Queue of injected failures shared by both servers.
#[derive(Debug, Default)]
struct FailureQueue {
    statuses: Mutex<VecDeque<u16>>,
}

impl FailureQueue {
    fn push(&self, count: usize, status: u16) {
        let mut statuses = self.statuses.lock().unwrap();
        statuses.extend(std::iter::repeat_n(status, count));
    }

    fn take(&self) -> Option<Response> {
        let status = self.statuses.lock().unwrap().pop_front()?;
        let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Some(
            (
                code,
                Json(json!({ "error": { "message": "injected failure" } })),
            )
                .into_response(),
        )
    }
}

/// Running axum server plus its shutdown plumbing.
struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    async fn spawn(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        // Give the server a moment to start
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ============================================================================
// OpenAI-compatible embeddings server
// ============================================================================

#[derive(Debug, Default)]
struct EmbeddingState {
    failures: FailureQueue,
    requests: AtomicUsize,
    captured: Mutex<Vec<(String, usize)>>,
    forced_dimension: Mutex<Option<usize>>,
}

/// Mock of `POST /embeddings`.
///
/// Vectors come from [`MockEmbedder::vector_for`], so results match the
/// in-process mock embedder byte for byte.
pub struct MockEmbeddingServer {
    server: ServerHandle,
    state: Arc<EmbeddingState>,
}

impl MockEmbeddingServer {
    /// Start a new mock server on a random available port.
    pub async fn start() -> Self {
        let state = Arc::new(EmbeddingState::default());
        let app = Router::new()
            .route("/embeddings", post(handle_embeddings))
            .with_state(Arc::clone(&state));

        Self {
            server: ServerHandle::spawn(app).await,
            state,
        }
    }

    /// Get the server's base URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.server.addr)
    }

    /// Fail the next `count` requests with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.state.failures.push(count, status);
    }

    /// Return vectors of `dimension` regardless of the requested size.
    pub fn force_dimension(&self, dimension: usize) {
        *self.state.forced_dimension.lock().unwrap() = Some(dimension);
    }

    /// Total requests received, including failed ones.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// `(input, dimensions)` of every successfully served request.
    pub fn captured_inputs(&self) -> Vec<(String, usize)> {
        self.state.captured.lock().unwrap().clone()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

async fn handle_embeddings(
    State(state): State<Arc<EmbeddingState>>,
    Json(request): Json<Value>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if let Some(failure) = state.failures.take() {
        return failure;
    }

    let input = request["input"].as_str().unwrap_or_default().to_string();
    let dimensions = request["dimensions"].as_u64().unwrap_or(8) as usize;
    let returned = state.forced_dimension.lock().unwrap().unwrap_or(dimensions);
    let embedding = MockEmbedder::vector_for(input.as_bytes(), returned);

    state.captured.lock().unwrap().push((input, dimensions));

    (
        StatusCode::OK,
        Json(json!({
            "object": "list",
            "model": request["model"],
            "data": [{ "object": "embedding", "index": 0, "embedding": embedding }],
        })),
    )
        .into_response()
}

// ============================================================================
// Qdrant REST server
// ============================================================================

#[derive(Debug, Default)]
struct MockCollection {
    size: usize,
    points: BTreeMap<String, (Vec<f32>, Value)>,
}

#[derive(Debug, Default)]
struct QdrantState {
    failures: FailureQueue,
    collections: Mutex<HashMap<String, MockCollection>>,
}

/// Mock of the Qdrant collection and point endpoints.
pub struct MockQdrantServer {
    server: ServerHandle,
    state: Arc<QdrantState>,
}

impl MockQdrantServer {
    /// Start a new mock server on a random available port.
    pub async fn start() -> Self {
        let state = Arc::new(QdrantState::default());
        let app = Router::new()
            .route(
                "/collections/{name}",
                get(handle_get_collection).put(handle_create_collection),
            )
            .route("/collections/{name}/points", put(handle_upsert))
            .route("/collections/{name}/points/search", post(handle_search))
            .route("/collections/{name}/points/count", post(handle_count))
            .with_state(Arc::clone(&state));

        Self {
            server: ServerHandle::spawn(app).await,
            state,
        }
    }

    /// Get the server's base URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.server.addr)
    }

    /// Fail the next `count` requests with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        self.state.failures.push(count, status);
    }

    /// Number of points stored in a collection.
    pub fn point_count(&self, collection: &str) -> usize {
        self.state
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.points.len())
            .unwrap_or(0)
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": { "error": format!("Collection `{name}` doesn't exist!") } })),
    )
        .into_response()
}

fn ok(result: Value) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "result": result, "status": "ok", "time": 0.0 })),
    )
        .into_response()
}

async fn handle_get_collection(
    State(state): State<Arc<QdrantState>>,
    Path(name): Path<String>,
) -> Response {
    if let Some(failure) = state.failures.take() {
        return failure;
    }
    let collections = state.collections.lock().unwrap();
    match collections.get(&name) {
        Some(c) => ok(json!({
            "status": "green",
            "points_count": c.points.len(),
            "config": { "params": { "vectors": { "size": c.size, "distance": "Cosine" } } },
        })),
        None => not_found(&name),
    }
}

async fn handle_create_collection(
    State(state): State<Arc<QdrantState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = state.failures.take() {
        return failure;
    }
    let size = body["vectors"]["size"].as_u64().unwrap_or(0) as usize;
    state
        .collections
        .lock()
        .unwrap()
        .entry(name)
        .or_insert_with(|| MockCollection {
            size,
            points: BTreeMap::new(),
        });
    ok(json!(true))
}

async fn handle_upsert(
    State(state): State<Arc<QdrantState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = state.failures.take() {
        return failure;
    }
    let mut collections = state.collections.lock().unwrap();
    let Some(collection) = collections.get_mut(&name) else {
        return not_found(&name);
    };

    let points = body["points"].as_array().cloned().unwrap_or_default();
    for point in points {
        let id = point["id"].as_str().unwrap_or_default().to_string();
        let vector: Vec<f32> = serde_json::from_value(point["vector"].clone()).unwrap_or_default();
        if vector.len() != collection.size {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": { "error": "Wrong input: Vector dimension error" } })),
            )
                .into_response();
        }
        collection
            .points
            .insert(id, (vector, point["payload"].clone()));
    }
    ok(json!({ "operation_id": 0, "status": "completed" }))
}

async fn handle_search(
    State(state): State<Arc<QdrantState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(failure) = state.failures.take() {
        return failure;
    }
    let collections = state.collections.lock().unwrap();
    let Some(collection) = collections.get(&name) else {
        return not_found(&name);
    };

    let query: Vec<f32> = serde_json::from_value(body["vector"].clone()).unwrap_or_default();
    let limit = body["limit"].as_u64().unwrap_or(10) as usize;
    let with_vector = body["with_vector"].as_bool().unwrap_or(false);

    let mut hits: Vec<(f64, &String, &(Vec<f32>, Value))> = collection
        .points
        .iter()
        .map(|(id, point)| (cosine_similarity(&query, &point.0), id, point))
        .collect();
    hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);

    let result: Vec<Value> = hits
        .into_iter()
        .map(|(score, id, (vector, payload))| {
            let vector = if with_vector { json!(vector) } else { Value::Null };
            json!({ "id": id, "version": 0, "score": score, "payload": payload, "vector": vector })
        })
        .collect();
    ok(json!(result))
}

async fn handle_count(
    State(state): State<Arc<QdrantState>>,
    Path(name): Path<String>,
) -> Response {
    if let Some(failure) = state.failures.take() {
        return failure;
    }
    let collections = state.collections.lock().unwrap();
    match collections.get(&name) {
        Some(c) => ok(json!({ "count": c.points.len() })),
        None => not_found(&name),
    }
}
