//! Order summary projection: subtotal, tax, shipping and total.
//!
//! These are fixed, simple formulas for display; the backend recomputes
//! everything at checkout.

use rust_decimal::Decimal;
use shopfront_core::{CurrencyCode, Price};

use crate::state::CartState;

/// Tax and shipping formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingRules {
    /// Store currency.
    pub currency: CurrencyCode,
    /// Fraction of the subtotal charged as tax.
    pub tax_rate: Decimal,
    /// Shipping fee for orders at or below the threshold.
    pub flat_shipping: Decimal,
    /// Orders with a subtotal strictly above this ship free.
    pub free_shipping_threshold: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::IDR,
            tax_rate: Decimal::new(10, 2),
            flat_shipping: Decimal::from(15_000),
            free_shipping_threshold: Decimal::from(500_000),
        }
    }
}

/// Totals shown next to the cart and on the checkout page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartSummary {
    pub subtotal: Price,
    pub tax: Price,
    pub shipping: Price,
    pub total: Price,
    pub total_items: u64,
}

impl CartSummary {
    /// Compute the summary for a cart state.
    #[must_use]
    pub fn compute(state: &CartState, rules: &PricingRules) -> Self {
        let currency = rules.currency;
        let subtotal = state.total_price();

        let tax = Price::new(subtotal * rules.tax_rate, currency).rounded();
        let shipping = if state.is_empty() || subtotal > rules.free_shipping_threshold {
            Price::zero(currency)
        } else {
            Price::new(rules.flat_shipping, currency)
        };

        Self {
            subtotal: Price::new(subtotal, currency),
            tax,
            shipping,
            total: Price::new(subtotal + tax.amount + shipping.amount, currency),
            total_items: state.total_items(),
        }
    }
}
