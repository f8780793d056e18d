//! Integration tests for the Shopfront cart engine.
//!
//! [`MockBackend`] is an in-process axum server implementing the storefront
//! REST contract the cart gateway consumes. Tests drive the real
//! `HttpCartGateway` and `FileGuestCartStore` against it over HTTP.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p shopfront-integration-tests
//!
//! # With engine logs
//! RUST_LOG=shopfront_cart=debug cargo test -p shopfront-integration-tests
//! ```
//!
//! # Routes
//!
//! ```text
//! GET    /api/v1/cart             - Authoritative cart (bearer auth)
//! POST   /api/v1/cart/add         - Add item, returns the item (201)
//! PUT    /api/v1/cart/items/{id}  - Set quantity, returns the item
//! DELETE /api/v1/cart/items/{id}  - Remove item, returns a message
//! DELETE /api/v1/cart/clear       - Remove every item
//! GET    /api/v1/products/{id}    - Product lookup
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use shopfront_cart::config::{CartConfig, GatewayConfig, MergeConfig};
use shopfront_cart::{AuthToken, PricingRules, Product};
use shopfront_core::{CartItemId, ProductId, UserId};
use tokio::task::JoinHandle;
use url::Url;

pub use axum::http::StatusCode;

// =============================================================================
// Tracing
// =============================================================================

/// Install a test subscriber honoring `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fixtures
// =============================================================================

/// A catalog product with the given price and stock.
#[must_use]
pub fn product(id: i32, price: i64, stock: i64) -> Product {
    Product {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        price: Decimal::from(price),
        description: format!("Description of product {id}"),
        image: format!("/images/products/{id}.jpg"),
        stock,
        category_id: None,
        sku: Some(format!("SKU-{id:04}")),
        is_active: true,
    }
}

/// Temporary directory removed on drop.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("shopfront-it-{}", uuid::Uuid::new_v4())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &FsPath {
        &self.path
    }
}

impl Default for TempDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

// =============================================================================
// Backend state
// =============================================================================

/// Backend endpoints, for fault injection and hit counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    GetCart,
    AddItem,
    UpdateItem,
    RemoveItem,
    Clear,
    GetProduct,
}

/// A scripted misbehavior for the next request to a route.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Answer with this status and an error body.
    Status(StatusCode),
    /// Answer 200 with a body that is not JSON.
    Garbage,
    /// Sleep before handling the request normally.
    Stall(Duration),
    /// Handle the request, then answer 200 with a body that is not JSON.
    /// Only honored by `POST /cart/add`.
    ApplyThenGarbage,
}

#[derive(Debug, Clone)]
struct StoredItem {
    id: CartItemId,
    product_id: ProductId,
    quantity: i64,
}

#[derive(Debug, Default)]
struct Backend {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Vec<StoredItem>>,
    tokens: HashMap<String, UserId>,
    next_item_id: i32,
    /// Scripted outcomes per route; `None` lets the request through.
    faults: HashMap<Route, VecDeque<Option<Fault>>>,
    hits: HashMap<Route, usize>,
    add_returns_cart: bool,
}

impl Backend {
    fn cart_json(&self, user_id: UserId) -> Value {
        let items: Vec<Value> = self
            .carts
            .get(&user_id)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        json!({
                            "id": item.id,
                            "cart_id": user_id,
                            "product_id": item.product_id,
                            "quantity": item.quantity,
                            "product": self.products.get(&item.product_id),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut cart = json!({
            "id": user_id,
            "user_id": user_id,
            "is_active": true,
        });
        // omitted when empty, like the real backend
        if !items.is_empty() {
            cart["cart_items"] = Value::Array(items);
        }
        cart
    }

    fn item_json(&self, user_id: UserId, item: &StoredItem) -> Value {
        json!({
            "id": item.id,
            "cart_id": user_id,
            "product_id": item.product_id,
            "quantity": item.quantity,
            "product": self.products.get(&item.product_id),
        })
    }

    fn check_stock(&self, product_id: ProductId, quantity: i64) -> Result<(), ApiError> {
        let product = self
            .products
            .get(&product_id)
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Product not found"))?;
        if quantity > product.stock {
            return Err(ApiError::new(StatusCode::BAD_REQUEST, "Insufficient stock"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct SharedState(Arc<Mutex<Backend>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the hit and play the next scripted fault, if any. Returns
    /// `true` when the handler must garble its response.
    async fn begin(&self, route: Route) -> Result<bool, ApiError> {
        let fault = {
            let mut backend = self.lock();
            *backend.hits.entry(route).or_default() += 1;
            backend.faults.get_mut(&route).and_then(VecDeque::pop_front).flatten()
        };

        match fault {
            None => Ok(false),
            Some(Fault::ApplyThenGarbage) => Ok(true),
            Some(Fault::Status(status)) => Err(ApiError::new(status, "Injected failure")),
            Some(Fault::Garbage) => Err(ApiError(garbage())),
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(false)
            }
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<UserId, ApiError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authorization header required"))?;

        self.lock()
            .tokens
            .get(token)
            .copied()
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

/// Error response with a `{ "error": ... }` body.
struct ApiError(Response);

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        Self((status, Json(json!({ "error": message }))).into_response())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct AddBody {
    product_id: ProductId,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    quantity: i64,
}

async fn get_cart(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.begin(Route::GetCart).await?;
    let user_id = state.authorize(&headers)?;
    Ok(Json(state.lock().cart_json(user_id)).into_response())
}

async fn add_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Result<Response, ApiError> {
    let garble = state.begin(Route::AddItem).await?;
    let user_id = state.authorize(&headers)?;
    if body.quantity < 1 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Quantity must be at least 1"));
    }

    let mut backend = state.lock();
    let current = backend
        .carts
        .get(&user_id)
        .and_then(|items| items.iter().find(|i| i.product_id == body.product_id))
        .map_or(0, |item| item.quantity);
    backend.check_stock(body.product_id, current + body.quantity)?;

    backend.next_item_id += 1;
    let next_id = CartItemId::new(backend.next_item_id);
    let items = backend.carts.entry(user_id).or_default();
    let item = match items.iter_mut().find(|i| i.product_id == body.product_id) {
        Some(item) => {
            item.quantity += body.quantity;
            item.clone()
        }
        None => {
            let item = StoredItem {
                id: next_id,
                product_id: body.product_id,
                quantity: body.quantity,
            };
            items.push(item.clone());
            item
        }
    };

    if garble {
        return Ok(garbage());
    }
    if backend.add_returns_cart {
        return Ok(Json(backend.cart_json(user_id)).into_response());
    }
    Ok((StatusCode::CREATED, Json(backend.item_json(user_id, &item))).into_response())
}

fn garbage() -> Response {
    (StatusCode::OK, "<html>upstream proxy error</html>").into_response()
}

async fn update_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(item_id): Path<i32>,
    Json(body): Json<UpdateBody>,
) -> Result<Response, ApiError> {
    state.begin(Route::UpdateItem).await?;
    let user_id = state.authorize(&headers)?;
    if body.quantity < 1 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Quantity must be at least 1"));
    }

    let item_id = CartItemId::new(item_id);
    let mut backend = state.lock();
    let product_id = backend
        .carts
        .get(&user_id)
        .and_then(|items| items.iter().find(|i| i.id == item_id))
        .map(|item| item.product_id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Cart item not found"))?;
    backend.check_stock(product_id, body.quantity)?;

    let items = backend.carts.entry(user_id).or_default();
    let mut updated = None;
    for item in items.iter_mut().filter(|i| i.id == item_id) {
        item.quantity = body.quantity;
        updated = Some(item.clone());
    }
    let item = updated.ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Cart item not found"))?;

    Ok(Json(backend.item_json(user_id, &item)).into_response())
}

async fn remove_item(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(item_id): Path<i32>,
) -> Result<Response, ApiError> {
    state.begin(Route::RemoveItem).await?;
    let user_id = state.authorize(&headers)?;

    let item_id = CartItemId::new(item_id);
    let mut backend = state.lock();
    let items = backend.carts.entry(user_id).or_default();
    let before = items.len();
    items.retain(|item| item.id != item_id);
    if items.len() == before {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Cart item not found"));
    }

    Ok(Json(json!({ "message": "Item removed from cart" })).into_response())
}

async fn clear_cart(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.begin(Route::Clear).await?;
    let user_id = state.authorize(&headers)?;
    state.lock().carts.remove(&user_id);
    Ok(Json(json!({ "message": "Cart cleared" })).into_response())
}

async fn get_product(
    State(state): State<SharedState>,
    Path(product_id): Path<i32>,
) -> Result<Response, ApiError> {
    state.begin(Route::GetProduct).await?;
    let backend = state.lock();
    let product = backend
        .products
        .get(&ProductId::new(product_id))
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Product not found"))?;
    Ok(Json(product).into_response())
}

fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/cart", get(get_cart))
        .route("/cart/add", post(add_item))
        .route("/cart/items/{id}", put(update_item).delete(remove_item))
        .route("/cart/clear", delete(clear_cart))
        .route("/products/{id}", get(get_product));

    Router::new().nest("/api/v1", api).with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// In-process storefront backend bound to an ephemeral port.
///
/// The server task is aborted on drop.
#[derive(Debug)]
pub struct MockBackend {
    base_url: Url,
    state: SharedState,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Start the server.
    ///
    /// # Errors
    ///
    /// Returns error if no local port can be bound.
    pub async fn start() -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let base_url =
            Url::parse(&format!("http://{addr}/api/v1")).map_err(std::io::Error::other)?;

        let state = SharedState::default();
        let app = router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock backend stopped");
            }
        });

        tracing::debug!(%addr, "Mock backend listening");
        Ok(Self {
            base_url,
            state,
            server,
        })
    }

    /// Base URL of the REST API.
    #[must_use]
    pub fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    /// Gateway config pointing at this backend, with a short timeout.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new(self.base_url());
        config.request_timeout = Duration::from_millis(500);
        config
    }

    /// Full engine config with the guest cart stored under `dir`.
    #[must_use]
    pub fn cart_config(&self, dir: &FsPath) -> CartConfig {
        CartConfig {
            gateway: self.gateway_config(),
            guest_cart_dir: dir.to_path_buf(),
            merge: MergeConfig {
                confirm_attempts: 3,
                confirm_delay: Duration::from_millis(10),
            },
            pricing: PricingRules::default(),
        }
    }

    pub fn add_product(&self, product: Product) {
        self.state.lock().products.insert(product.id, product);
    }

    pub fn remove_product(&self, product_id: ProductId) {
        self.state.lock().products.remove(&product_id);
    }

    /// Register a bearer token for a user.
    #[must_use]
    pub fn issue_token(&self, user_id: UserId) -> AuthToken {
        let token = format!("token-{}", uuid::Uuid::new_v4());
        self.state.lock().tokens.insert(token.clone(), user_id);
        AuthToken::new(token)
    }

    /// Invalidate a bearer token.
    pub fn revoke_token(&self, token: &AuthToken) {
        self.state.lock().tokens.remove(token.expose());
    }

    /// Put an item straight into a user's cart.
    pub fn seed_item(&self, user_id: UserId, product_id: ProductId, quantity: i64) {
        let mut backend = self.state.lock();
        backend.next_item_id += 1;
        let id = CartItemId::new(backend.next_item_id);
        backend.carts.entry(user_id).or_default().push(StoredItem {
            id,
            product_id,
            quantity,
        });
    }

    /// Quantity of a product in a user's cart (0 when absent).
    #[must_use]
    pub fn quantity(&self, user_id: UserId, product_id: ProductId) -> i64 {
        self.state
            .lock()
            .carts
            .get(&user_id)
            .map_or(0, |items| {
                items
                    .iter()
                    .filter(|i| i.product_id == product_id)
                    .map(|i| i.quantity)
                    .sum()
            })
    }

    /// Number of items in a user's cart.
    #[must_use]
    pub fn item_count(&self, user_id: UserId) -> usize {
        self.state.lock().carts.get(&user_id).map_or(0, Vec::len)
    }

    /// Make `POST /cart/add` answer with the whole cart instead of the item.
    pub fn set_add_returns_cart(&self, enabled: bool) {
        self.state.lock().add_returns_cart = enabled;
    }

    /// Script a fault for the next `times` requests to `route`.
    pub fn inject(&self, route: Route, fault: Fault, times: usize) {
        self.inject_after(route, 0, fault, times);
    }

    /// Let `successes` requests to `route` through, then script `times` faults.
    pub fn inject_after(&self, route: Route, successes: usize, fault: Fault, times: usize) {
        let mut backend = self.state.lock();
        let queue = backend.faults.entry(route).or_default();
        queue.extend(std::iter::repeat_n(None, successes));
        queue.extend(std::iter::repeat_n(Some(fault), times));
    }

    /// Requests served on `route` so far.
    #[must_use]
    pub fn hits(&self, route: Route) -> usize {
        self.state.lock().hits.get(&route).copied().unwrap_or(0)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}
