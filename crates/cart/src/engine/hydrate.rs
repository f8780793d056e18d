//! Building cart lines from backend data.

use futures::future::join_all;
use shopfront_core::{ProductId, Quantity, UserId};
use tracing::warn;

use crate::error::CartError;
use crate::gateway::{GatewayError, Product, ProductCatalog, RemoteCart};
use crate::guest::GuestCartRecord;
use crate::state::{CartLine, CartState, LineId, ProductSnapshot};

/// Map the authoritative cart to cart lines.
///
/// Items with a non-positive quantity are dropped. Duplicate items for one
/// product are folded into the first one.
pub(crate) fn lines_from_remote(
    cart: &RemoteCart,
    user_id: Option<UserId>,
) -> Result<Vec<CartLine>, CartError> {
    if let Some(user_id) = user_id
        && cart.user_id != user_id
    {
        return Err(CartError::MalformedResponse(format!(
            "cart {} belongs to user {}, expected {user_id}",
            cart.id, cart.user_id
        )));
    }

    let mut lines: Vec<CartLine> = Vec::with_capacity(cart.cart_items.len());

    for item in &cart.cart_items {
        let Ok(quantity) = Quantity::new(item.quantity) else {
            warn!(item_id = %item.id, quantity = item.quantity, "Dropping cart item with invalid quantity");
            continue;
        };

        let product = item.product.as_ref().ok_or_else(|| {
            CartError::MalformedResponse(format!("cart item {} has no product", item.id))
        })?;
        if product.id != item.product_id {
            return Err(CartError::MalformedResponse(format!(
                "cart item {} references product {} but embeds product {}",
                item.id, item.product_id, product.id
            )));
        }

        if let Some(existing) = lines.iter_mut().find(|l| l.product_id == item.product_id) {
            warn!(product_id = %item.product_id, "Folding duplicate cart items");
            existing.quantity = existing.quantity.checked_add(quantity).unwrap_or(existing.quantity);
            continue;
        }

        lines.push(CartLine {
            line_id: LineId::Server(item.id),
            product_id: item.product_id,
            quantity,
            unit_price: product.price,
            product: ProductSnapshot::from(product),
        });
    }

    Ok(lines)
}

/// Whether every product appears in the cart.
pub(crate) fn contains_all(cart: &RemoteCart, products: &[ProductId]) -> bool {
    products
        .iter()
        .all(|id| cart.cart_items.iter().any(|item| item.product_id == *id))
}

/// Result of resolving a guest record against the catalog.
pub(crate) struct GuestHydration {
    pub lines: Vec<CartLine>,
    /// Products the catalog no longer knows about.
    pub missing: Vec<ProductId>,
}

/// Resolve every record entry to a display-ready line.
///
/// Products are fetched concurrently; lines keep record order. Line ids
/// already present in `current` are reused so observers see stable ids.
///
/// # Errors
///
/// Returns the first lookup failure other than "not found".
pub(crate) async fn hydrate_guest<C: ProductCatalog>(
    catalog: &C,
    record: &GuestCartRecord,
    current: &CartState,
) -> Result<GuestHydration, CartError> {
    let lookups = join_all(
        record
            .entries()
            .iter()
            .map(|entry| catalog.get_product(entry.product_id)),
    )
    .await;

    let mut hydration = GuestHydration {
        lines: Vec::with_capacity(lookups.len()),
        missing: Vec::new(),
    };

    for (entry, lookup) in record.entries().iter().zip(lookups) {
        match lookup {
            Ok(product) => hydration
                .lines
                .push(guest_line(current, &product, entry.quantity)),
            Err(GatewayError::NotFound(_)) => {
                warn!(product_id = %entry.product_id, "Guest cart product no longer exists");
                hydration.missing.push(entry.product_id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(hydration)
}

/// Line for a guest product, reusing the current line id if any.
pub(crate) fn guest_line(current: &CartState, product: &Product, quantity: Quantity) -> CartLine {
    let line_id = current
        .line(product.id)
        .map_or_else(LineId::local, |line| line.line_id);

    CartLine {
        line_id,
        product_id: product.id,
        quantity,
        unit_price: product.price,
        product: ProductSnapshot::from(product),
    }
}
