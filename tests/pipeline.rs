//! End-to-end pipeline tests against a mock Ollama server.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use datamat_rag::config::Config;
use datamat_rag::embedding::Embedder;
use datamat_rag::error::{PipelineError, Result};
use datamat_rag::generation::{GenerativeBackend, OllamaBackend};
use datamat_rag::pipeline::{BuildStatus, PipelineManager};
use serde_json::{json, Value};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════
// Test infrastructure
// ═══════════════════════════════════════════════════════════════════════

/// Deterministic bag-of-words embedder: each token is hashed into one of
/// 64 buckets and the result is normalized.
struct TestEmbedder;

#[async_trait]
impl Embedder for TestEmbedder {
    fn model_name(&self) -> &str {
        "test-hash-64"
    }

    fn dims(&self) -> usize {
        64
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 64];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let bucket = token
            .to_lowercase()
            .bytes()
            .fold(5381u32, |h, b| h.wrapping_mul(33) ^ b as u32) as usize
            % 64;
        v[bucket] += 1.0;
    }
    datamat_core::vector::normalize(&mut v);
    v
}

#[derive(Default)]
struct MockState {
    down: AtomicBool,
    fail_generate: AtomicBool,
    requests: Mutex<Vec<Value>>,
}

async fn tags(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    if state.down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})));
    }
    (StatusCode::OK, Json(json!({ "models": [] })))
}

/// Echoes the length of the context section of the prompt.
async fn generate(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().unwrap().push(body.clone());
    if state.fail_generate.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "model crashed" })),
        );
    }
    let prompt = body["prompt"].as_str().unwrap_or_default();
    let context = prompt
        .split_once("\n\n")
        .and_then(|(_, rest)| rest.rsplit_once("\n\nQuestion: "))
        .map(|(ctx, _)| ctx)
        .unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({ "response": format!("context has {} chars", context.chars().count()) })),
    )
}

async fn start_mock() -> (String, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let app = Router::new()
        .route("/api/tags", get(tags))
        .route("/api/generate", post(generate))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(tmp: &TempDir, base_url: &str) -> Config {
    let mut config = Config::minimal();
    config.dataset.dir = tmp.path().join("datasets");
    config.index.root = tmp.path().join("chroma_db");
    config.generation.base_url = base_url.to_string();
    config.generation.timeout_secs = 10;
    config.generation.probe_timeout_secs = 2;
    std::fs::create_dir_all(&config.dataset.dir).unwrap();
    config
}

fn manager(config: Config) -> Arc<PipelineManager> {
    let backend: Arc<dyn GenerativeBackend> =
        Arc::new(OllamaBackend::new(&config.generation).unwrap());
    Arc::new(PipelineManager::with_components(
        config,
        Arc::new(TestEmbedder),
        backend,
    ))
}

/// 500 rows × 5 columns.
fn write_sales(dir: &Path, name: &str) {
    let regions = ["north", "south", "east", "west"];
    let products = ["widget", "gadget", "gizmo"];
    let mut body = String::from("order_id,region,product,units,price\n");
    for i in 0..500 {
        body.push_str(&format!(
            "{},{},{},{},{}.{:02}\n",
            i,
            regions[i % regions.len()],
            products[i % products.len()],
            (i * 7) % 50 + 1,
            10 + i % 90,
            i % 100
        ));
    }
    std::fs::write(dir.join(name), body).unwrap();
}

fn write_small(dir: &Path, name: &str, marker: &str, mtime_secs: u64) {
    let path = dir.join(name);
    std::fs::write(&path, format!("name,note\n{},first\n{},second\n", marker, marker)).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .unwrap();
}

// ═══════════════════════════════════════════════════════════════════════
// Dataset selection
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_newest_dataset_is_indexed() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_small(&config.dataset.dir, "a.csv", "alpha", 1_000_000);
    write_small(&config.dataset.dir, "b.csv", "bravo", 2_000_000);
    let mgr = manager(config.clone());

    let chain = mgr.setup(false).await.unwrap().unwrap();
    assert_eq!(chain.stats().dataset, config.dataset.dir.join("b.csv"));
    let hits = chain.retriever().retrieve_k("bravo", 10).await.unwrap();
    assert!(hits.iter().all(|h| h.chunk.text.contains("bravo")));

    write_small(&config.dataset.dir, "a.csv", "alpha", 3_000_000);
    let chain = mgr.setup(false).await.unwrap().unwrap();
    assert_eq!(chain.stats().dataset, config.dataset.dir.join("a.csv"));
}

#[tokio::test]
async fn test_empty_directory_returns_none_without_probing() {
    let tmp = TempDir::new().unwrap();
    let url = format!("http://127.0.0.1:{}", find_free_port());
    let mgr = manager(test_config(&tmp, &url));

    assert!(mgr.setup(false).await.unwrap().is_none());
    assert!(mgr.current().is_none());
    assert_eq!(*mgr.subscribe().borrow(), BuildStatus::Idle);
}

#[tokio::test]
async fn test_ask_before_setup_has_no_active_pipeline() {
    let tmp = TempDir::new().unwrap();
    let (url, state) = start_mock().await;
    let mgr = manager(test_config(&tmp, &url));

    let err = mgr.ask("how many rows?").await.unwrap_err();
    assert!(matches!(err, PipelineError::NoActivePipeline));
    assert!(state.requests.lock().unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
// End to end
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sales_dataset_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let (url, state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config.clone());

    let chain = mgr.setup(false).await.unwrap().unwrap();
    assert_eq!(chain.stats().rows, 500);
    assert_eq!(chain.stats().chunks, 500);
    assert_eq!(chain.stats().dims, 64);

    let answer = mgr.ask("Which region sold the most gadget units?").await.unwrap();
    let chars: usize = answer
        .trim_start_matches("context has ")
        .trim_end_matches(" chars")
        .parse()
        .unwrap();
    assert!(chars > 0);
    assert!(chars <= config.generation.max_context_chars);

    let requests = state.requests.lock().unwrap();
    let body = &requests[0];
    assert_eq!(body["model"], "llama3.2");
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["num_ctx"], 4096);
    let prompt = body["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("Use the following pieces of context"));
    assert!(prompt.ends_with("Question: Which region sold the most gadget units?\nHelpful Answer:"));
}

#[tokio::test]
async fn test_retrieve_k_returns_min_of_k_and_total() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);

    let chain = mgr.setup(false).await.unwrap().unwrap();
    let retriever = chain.retriever();
    assert_eq!(retriever.retrieve_k("north widget", 7).await.unwrap().len(), 7);
    assert_eq!(retriever.retrieve_k("north widget", 10_000).await.unwrap().len(), 500);
    assert_eq!(retriever.retrieve("north widget").await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_generation_error_status_is_surfaced() {
    let tmp = TempDir::new().unwrap();
    let (url, state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);
    mgr.setup(false).await.unwrap();

    state.fail_generate.store(true, Ordering::SeqCst);
    let err = mgr.ask("total units?").await.unwrap_err();
    match err {
        PipelineError::Generation { status, .. } => assert_eq!(status, Some(500)),
        other => panic!("expected Generation, got {:?}", other),
    }
    assert!(mgr.current().is_some());
}

#[tokio::test]
async fn test_unreachable_backend_fails_setup_fast() {
    let tmp = TempDir::new().unwrap();
    let url = format!("http://127.0.0.1:{}", find_free_port());
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config.clone());

    let err = mgr.setup(false).await.err().unwrap();
    assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    assert!(err.is_retryable());
    assert!(mgr.current().is_none());
    let leftovers = std::fs::read_dir(&config.index.root)
        .map(|rd| rd.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Rebuilds
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_forced_rebuild_keeps_chunk_count() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);

    let first = mgr.setup(false).await.unwrap().unwrap();
    let second = mgr.setup(true).await.unwrap().unwrap();
    assert_eq!(first.stats().chunks, second.stats().chunks);
    assert_ne!(first.stats().location, second.stats().location);
    assert!(second.stats().location.exists());
}

#[tokio::test]
async fn test_unchanged_dataset_reuses_chain() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);

    let first = mgr.setup(false).await.unwrap().unwrap();
    let again = mgr.setup(false).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[tokio::test]
async fn test_failed_forced_rebuild_keeps_previous_chain() {
    let tmp = TempDir::new().unwrap();
    let (url, state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);

    let first = mgr.setup(false).await.unwrap().unwrap();
    state.down.store(true, Ordering::SeqCst);
    let err = mgr.setup(true).await.err().unwrap();
    assert!(matches!(err, PipelineError::BackendUnavailable { .. }));

    state.down.store(false, Ordering::SeqCst);
    let current = mgr.current().unwrap();
    assert!(Arc::ptr_eq(&first, &current));
    assert!(mgr.ask("units in the east?").await.is_ok());
}

#[tokio::test]
async fn test_background_setup_reports_ready() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);
    let mut rx = mgr.subscribe();

    let handle = mgr.setup_in_background(false);
    let status = tokio::time::timeout(
        Duration::from_secs(30),
        rx.wait_for(|s| matches!(s, BuildStatus::Ready { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    match status {
        BuildStatus::Ready { stats } => assert_eq!(stats.rows, 500),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(handle.await.unwrap().unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_setups_are_serialized() {
    let tmp = TempDir::new().unwrap();
    let (url, _state) = start_mock().await;
    let config = test_config(&tmp, &url);
    write_sales(&config.dataset.dir, "sales.csv");
    let mgr = manager(config);

    let a = mgr.setup_in_background(true);
    let b = mgr.setup_in_background(true);
    let a = a.await.unwrap().unwrap().unwrap();
    let b = b.await.unwrap().unwrap().unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.stats().chunks, b.stats().chunks);
    let current = mgr.current().unwrap();
    assert!(Arc::ptr_eq(&current, &a) || Arc::ptr_eq(&current, &b));
}
