//! `reqwest` implementation of the cart gateway and product catalog.
//!
//! Mutations that answer with a single item (or a bare message) are followed
//! by `GET /cart`, so callers always receive the authoritative cart.
//! Products are cached using `moka` (5-minute TTL by default).

use std::sync::Arc;

use moka::future::Cache;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use shopfront_core::{CartItemId, ProductId, Quantity};
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    AddToCartRequest, AddToCartResponse, ErrorBody, Product, RemoteCart, UpdateCartItemRequest,
};
use super::{CartGateway, GatewayError, ProductCatalog};
use crate::auth::AuthToken;
use crate::config::GatewayConfig;

/// Client for the storefront REST API.
///
/// Cheap to clone; clones share the connection pool and product cache.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    products: Option<Cache<ProductId, Product>>,
}

impl std::fmt::Debug for HttpCartGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartGateway")
            .field("base_url", &self.inner.base_url.as_str())
            .field("product_cache", &self.inner.products.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpCartGateway {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let products = (!config.product_cache_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(config.product_cache_capacity)
                .time_to_live(config.product_cache_ttl)
                .build()
        });

        // Url::join replaces the last path segment unless the base ends in '/'
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url,
                products,
            }),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        Ok(self.inner.base_url.join(path)?)
    }

    /// Invalidate a cached product.
    pub async fn invalidate_product(&self, product_id: ProductId) {
        if let Some(cache) = &self.inner.products {
            cache.invalidate(&product_id).await;
        }
    }
}

/// Send a request and decode a JSON body on success.
async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, GatewayError> {
    let body = send(request).await?;
    decode(&body)
}

/// Send a request and return the body text on success.
async fn send(request: reqwest::RequestBuilder) -> Result<String, GatewayError> {
    let response = request.send().await.map_err(map_transport)?;
    let status = response.status();
    let body = response.text().await.map_err(map_transport)?;

    if status.is_success() {
        return Ok(body);
    }
    Err(status_error(status, &body))
}

/// Send a mutation. Once the backend has answered 2xx the change is
/// applied, so any later failure is [`GatewayError::Unconfirmed`].
async fn send_mutation(request: reqwest::RequestBuilder) -> Result<String, GatewayError> {
    let response = request.send().await.map_err(map_transport)?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.map_err(map_transport)?;
        return Err(status_error(status, &body));
    }
    response
        .text()
        .await
        .map_err(|e| GatewayError::Unconfirmed(Box::new(map_transport(e))))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %body.chars().take(500).collect::<String>(),
            "Failed to parse cart API response"
        );
        GatewayError::Malformed(e.to_string())
    })
}

fn status_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Unauthorized,
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        s if s.is_client_error() => GatewayError::Rejected {
            status: s.as_u16(),
            message,
        },
        s => {
            tracing::error!(
                status = %s,
                body = %body.chars().take(500).collect::<String>(),
                "Cart API returned non-success status"
            );
            GatewayError::Unavailable {
                status: s.as_u16(),
                message,
            }
        }
    }
}

impl HttpCartGateway {
    async fn fetch_after_mutation(&self, token: &AuthToken) -> Result<RemoteCart, GatewayError> {
        self.get_cart(token)
            .await
            .map_err(|e| GatewayError::Unconfirmed(Box::new(e)))
    }
}

fn map_transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err)
    }
}

impl CartGateway for HttpCartGateway {
    #[instrument(skip(self, token))]
    async fn get_cart(&self, token: &AuthToken) -> Result<RemoteCart, GatewayError> {
        let url = self.endpoint("cart")?;
        let cart: RemoteCart =
            send_json(self.inner.client.get(url).bearer_auth(token.expose())).await?;
        debug!(cart_id = %cart.id, items = cart.cart_items.len(), "Fetched cart");
        Ok(cart)
    }

    #[instrument(skip(self, token), fields(product_id = %product_id, quantity = %quantity))]
    async fn add_item(
        &self,
        token: &AuthToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<RemoteCart, GatewayError> {
        let url = self.endpoint("cart/add")?;
        let body = send_mutation(
            self.inner
                .client
                .post(url)
                .bearer_auth(token.expose())
                .json(&AddToCartRequest {
                    product_id,
                    quantity,
                }),
        )
        .await?;
        // the add is applied even when its body cannot be read
        let response: AddToCartResponse =
            decode(&body).map_err(|e| GatewayError::Unconfirmed(Box::new(e)))?;

        match response {
            AddToCartResponse::Cart(cart) => Ok(cart),
            AddToCartResponse::Item(item) => {
                debug!(item_id = %item.id, "Item added, fetching authoritative cart");
                self.fetch_after_mutation(token).await
            }
        }
    }

    #[instrument(skip(self, token), fields(item_id = %item_id, quantity = %quantity))]
    async fn update_item(
        &self,
        token: &AuthToken,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> Result<RemoteCart, GatewayError> {
        let url = self.endpoint(&format!("cart/items/{item_id}"))?;
        send_mutation(
            self.inner
                .client
                .put(url)
                .bearer_auth(token.expose())
                .json(&UpdateCartItemRequest { quantity }),
        )
        .await?;
        self.fetch_after_mutation(token).await
    }

    #[instrument(skip(self, token), fields(item_id = %item_id))]
    async fn remove_item(
        &self,
        token: &AuthToken,
        item_id: CartItemId,
    ) -> Result<RemoteCart, GatewayError> {
        let url = self.endpoint(&format!("cart/items/{item_id}"))?;
        send_mutation(self.inner.client.delete(url).bearer_auth(token.expose())).await?;
        self.fetch_after_mutation(token).await
    }

    #[instrument(skip(self, token))]
    async fn clear(&self, token: &AuthToken) -> Result<(), GatewayError> {
        let url = self.endpoint("cart/clear")?;
        send_mutation(self.inner.client.delete(url).bearer_auth(token.expose())).await?;
        Ok(())
    }
}

impl ProductCatalog for HttpCartGateway {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn get_product(&self, product_id: ProductId) -> Result<Product, GatewayError> {
        if let Some(cache) = &self.inner.products
            && let Some(product) = cache.get(&product_id).await
        {
            debug!("Cache hit for product");
            return Ok(product);
        }

        let url = self.endpoint(&format!("products/{product_id}"))?;
        let product: Product = send_json(self.inner.client.get(url)).await?;

        if product.id != product_id {
            return Err(GatewayError::Malformed(format!(
                "requested product {product_id}, got {}",
                product.id
            )));
        }

        if let Some(cache) = &self.inner.products {
            cache.insert(product_id, product.clone()).await;
        }

        Ok(product)
    }
}
