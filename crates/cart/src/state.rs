//! In-memory cart state owned by the engine.

use rust_decimal::Decimal;
use shopfront_core::{CartItemId, ProductId, Quantity};
use uuid::Uuid;

use crate::gateway::Product;

/// Identifier of a cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineId {
    /// Assigned locally: guest lines, and optimistic lines not yet confirmed.
    Local(Uuid),
    /// Assigned by the backend.
    Server(CartItemId),
}

impl LineId {
    /// Fresh local identifier.
    #[must_use]
    pub fn local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    /// The backend item id, if the line has been confirmed.
    #[must_use]
    pub const fn server_id(&self) -> Option<CartItemId> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

/// Denormalized product attributes kept for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub name: String,
    pub image: Option<String>,
    /// Advisory stock at the time of the snapshot.
    pub stock: i64,
}

impl From<&Product> for ProductSnapshot {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            image: (!product.image.is_empty()).then(|| product.image.clone()),
            stock: product.stock,
        }
    }
}

/// A single line in the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub line_id: LineId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    /// Unit price snapshot.
    pub unit_price: Decimal,
    pub product: ProductSnapshot,
}

impl CartLine {
    /// Build a line for a product with a fresh local id.
    #[must_use]
    pub fn local(product: &Product, quantity: Quantity) -> Self {
        Self {
            line_id: LineId::local(),
            product_id: product.id,
            quantity,
            unit_price: product.price,
            product: ProductSnapshot::from(product),
        }
    }

    /// `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity.get())
    }
}

/// Where the cart currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CartSource {
    /// Guest storage on this device.
    Guest,
    /// The backend, on behalf of an authenticated user.
    Remote,
}

/// Observable cart state.
///
/// Lines are kept in insertion order, which is also display order, and hold
/// at most one line per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartState {
    pub lines: Vec<CartLine>,
    pub is_loading: bool,
    pub source: CartSource,
    /// Bumped every time the engine publishes a change.
    pub revision: u64,
}

impl CartState {
    /// Empty, idle state.
    #[must_use]
    pub const fn new(source: CartSource) -> Self {
        Self {
            lines: Vec::new(),
            is_loading: false,
            source,
            revision: 0,
        }
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| u64::from(line.quantity.get()))
            .sum()
    }

    /// Sum of `unit_price × quantity` over all lines.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Line for a product, if any.
    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id == product_id)
    }

    /// Quantity held for a product (0 when absent).
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.line(product_id).map_or(0, |line| line.quantity.get())
    }

    pub(crate) fn position(&self, product_id: ProductId) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| line.product_id == product_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(id: i32, price: i64) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("product {id}"),
            price: Decimal::from(price),
            description: String::new(),
            image: String::new(),
            stock: 10,
            category_id: None,
            sku: None,
            is_active: true,
        }
    }

    #[test]
    fn test_totals() {
        let mut state = CartState::new(CartSource::Guest);
        state
            .lines
            .push(CartLine::local(&product(1, 1500), Quantity::new(2).unwrap()));
        state
            .lines
            .push(CartLine::local(&product(2, 700), Quantity::new(3).unwrap()));

        assert_eq!(state.total_items(), 5);
        assert_eq!(state.total_price(), Decimal::from(1500 * 2 + 700 * 3));
        assert_eq!(state.quantity_of(ProductId::new(2)), 3);
        assert_eq!(state.quantity_of(ProductId::new(9)), 0);
    }

    #[test]
    fn test_snapshot_drops_empty_image() {
        let snapshot = ProductSnapshot::from(&product(1, 10));
        assert_eq!(snapshot.image, None);
    }

    #[test]
    fn test_line_id_server_id() {
        assert_eq!(
            LineId::Server(CartItemId::new(4)).server_id(),
            Some(CartItemId::new(4))
        );
        assert_eq!(LineId::local().server_id(), None);
    }
}
