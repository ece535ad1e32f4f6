use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_CATEGORIES: &str = "/products/categories";
pub const PATH_CATEGORY_LIST: &str = "/products/category-list";
pub const PATH_CATEGORY: &str = "/products/category/{category}";
pub const PATH_ECHO: &str = "/echo";

/// Categories served by the mock catalog.
pub const CATEGORIES: &[&str] = &["beauty", "fragrances", "groceries", "laptops", "smartphones"];

/// Knobs for latency and injected failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogBehavior {
    /// Added to every catalog response.
    pub latency: Duration,
    /// Every `n`-th catalog request answers 500.
    pub fail_every: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    failures_injected: Arc<AtomicU64>,
}

impl TestServerStats {
    /// Counts the request and returns its 1-based sequence number.
    fn next_request(&self) -> u64 {
        self.requests_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failures_injected(&self) -> u64 {
        self.failures_injected.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
struct AppState {
    stats: TestServerStats,
    behavior: CatalogBehavior,
}

impl AppState {
    /// Applies latency and failure injection. `Some` is the injected error response.
    async fn admit(&self) -> Option<Response> {
        let n = self.stats.next_request();
        if !self.behavior.latency.is_zero() {
            sleep(self.behavior.latency).await;
        }
        match self.behavior.fail_every {
            Some(every) if every > 0 && n % every == 0 => {
                self.stats.failures_injected.fetch_add(1, Ordering::Relaxed);
                Some((StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CategoryDetails {
    slug: &'static str,
    name: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct Product {
    id: u64,
    title: String,
    category: String,
    price: f64,
}

#[derive(Debug, Serialize)]
struct ProductPage {
    products: Vec<Product>,
    total: usize,
    skip: usize,
    limit: usize,
}

fn display_name(slug: &str) -> String {
    let mut chars = slug.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn handle_categories(State(state): State<AppState>) -> Response {
    if let Some(res) = state.admit().await {
        return res;
    }
    let body: Vec<CategoryDetails> = CATEGORIES
        .iter()
        .map(|&slug| CategoryDetails {
            slug,
            name: display_name(slug),
            url: format!("https://catalog.test/products/category/{slug}"),
        })
        .collect();
    axum::Json(body).into_response()
}

async fn handle_category_list(State(state): State<AppState>) -> Response {
    if let Some(res) = state.admit().await {
        return res;
    }
    axum::Json(CATEGORIES).into_response()
}

async fn handle_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Response {
    if let Some(res) = state.admit().await {
        return res;
    }
    let products: Vec<Product> = if CATEGORIES.contains(&category.as_str()) {
        (1..=3)
            .map(|i| Product {
                id: i,
                title: format!("{} #{i}", display_name(&category)),
                category: category.clone(),
                price: 9.99 * i as f64,
            })
            .collect()
    } else {
        Vec::new()
    };
    let total = products.len();
    axum::Json(ProductPage {
        products,
        total,
        skip: 0,
        limit: 30,
    })
    .into_response()
}

async fn handle_echo(State(state): State<AppState>, body: Bytes) -> (StatusCode, Bytes) {
    state.stats.next_request();
    (StatusCode::OK, body)
}

pub fn router(stats: TestServerStats, behavior: CatalogBehavior) -> Router {
    Router::new()
        .route(PATH_CATEGORIES, get(handle_categories))
        .route(PATH_CATEGORY_LIST, get(handle_category_list))
        .route(PATH_CATEGORY, get(handle_category))
        .route(PATH_ECHO, post(handle_echo))
        .with_state(AppState { stats, behavior })
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(CatalogBehavior::default()).await
    }

    pub async fn start_with(behavior: CatalogBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone(), behavior);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
