//! Wire types for the storefront REST API.
//!
//! These mirror the JSON the backend emits. Fields the backend omits when
//! empty carry `#[serde(default)]`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shopfront_core::{CartId, CartItemId, CategoryId, ProductId, Quantity, UserId};

/// A product record from `GET /products/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product ID.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price in the store currency.
    pub price: Decimal,
    /// Long description.
    #[serde(default)]
    pub description: String,
    /// Primary image URL.
    #[serde(default)]
    pub image: String,
    /// Units on hand (advisory, not reserved).
    #[serde(default)]
    pub stock: i64,
    /// Category ID.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Stock keeping unit.
    #[serde(default)]
    pub sku: Option<String>,
    /// Whether the product is listed.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

const fn default_true() -> bool {
    true
}

/// The authoritative cart from `GET /cart`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCart {
    /// Cart ID.
    pub id: CartId,
    /// Owning user.
    pub user_id: UserId,
    /// Whether this is the user's active cart.
    pub is_active: bool,
    /// Cart items, omitted by the backend when empty.
    #[serde(default)]
    pub cart_items: Vec<RemoteCartItem>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single item in a [`RemoteCart`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCartItem {
    /// Server-assigned item ID.
    pub id: CartItemId,
    /// Owning cart.
    #[serde(default)]
    pub cart_id: Option<CartId>,
    /// Product in this line.
    pub product_id: ProductId,
    /// Quantity as stored by the backend (not validated on the wire).
    pub quantity: i64,
    /// Preloaded product, present on `GET /cart`.
    #[serde(default)]
    pub product: Option<Product>,
}

/// Body of `POST /cart/add`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Body of `PUT /cart/items/{id}`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UpdateCartItemRequest {
    pub quantity: Quantity,
}

/// Response of `POST /cart/add`: the backend returns either the touched item
/// or the whole cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddToCartResponse {
    Cart(RemoteCart),
    Item(RemoteCartItem),
}

/// Error body returned by the backend on non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
