//! Remote cart gateway and product catalog.
//!
//! # Architecture
//!
//! - The backend is the source of truth for authenticated carts; every
//!   mutation returns the authoritative [`RemoteCart`]
//! - Products are looked up by id for guest hydration and cached in memory
//!   via `moka`
//! - [`HttpCartGateway`] implements both traits over `reqwest`
//!
//! The traits are the seam the engine is generic over, so tests can swap in
//! an in-memory backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopfront_cart::gateway::{CartGateway, HttpCartGateway};
//!
//! let gateway = HttpCartGateway::new(&config.gateway)?;
//! let cart = gateway.get_cart(&token).await?;
//! ```

mod http;
pub mod types;

use std::future::Future;

use shopfront_core::{CartItemId, ProductId, Quantity};
use thiserror::Error;

use crate::auth::AuthToken;

pub use http::HttpCartGateway;
pub use types::{Product, RemoteCart, RemoteCartItem};

/// Errors that can occur when talking to the storefront backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP transport failed (connection refused, reset, TLS).
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request exceeded the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Missing or rejected bearer token (HTTP 401).
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request rejected by the backend (other 4xx).
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Backend failed (5xx).
    #[error("Unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The mutation was applied but fetching the resulting cart failed.
    #[error("Mutation applied, cart fetch failed: {0}")]
    Unconfirmed(Box<GatewayError>),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Authoritative cart operations, authenticated with a bearer token.
///
/// Every mutation resolves to the cart as the backend sees it after the
/// mutation, so callers can replace their local state wholesale. When the
/// mutation succeeds but that cart cannot be fetched, implementations return
/// [`GatewayError::Unconfirmed`].
pub trait CartGateway: Send + Sync {
    /// Fetch the authoritative cart (`GET /cart`).
    fn get_cart(
        &self,
        token: &AuthToken,
    ) -> impl Future<Output = Result<RemoteCart, GatewayError>> + Send;

    /// Add `quantity` units of a product (`POST /cart/add`). Additive: an
    /// existing line for the product is incremented.
    fn add_item(
        &self,
        token: &AuthToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<RemoteCart, GatewayError>> + Send;

    /// Set the quantity of an existing item (`PUT /cart/items/{id}`).
    fn update_item(
        &self,
        token: &AuthToken,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<RemoteCart, GatewayError>> + Send;

    /// Delete an item (`DELETE /cart/items/{id}`).
    fn remove_item(
        &self,
        token: &AuthToken,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<RemoteCart, GatewayError>> + Send;

    /// Remove every item (`DELETE /cart/clear`).
    fn clear(&self, token: &AuthToken) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Product lookup used to build display-ready guest lines.
pub trait ProductCatalog: Send + Sync {
    /// Fetch a product by id (`GET /products/{id}`).
    fn get_product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Product, GatewayError>> + Send;
}
