//! Engine errors and failure reporting.
//!
//! Every failed mutation is returned to the caller as a [`CartError`].
//! Failures the engine recovers from on its own (rollback, forced refresh,
//! best-effort clear) are also reported to Sentry via [`report`].

use shopfront_core::{ProductId, QuantityError};
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::guest::GuestStoreError;

/// Errors returned by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Requested quantity exceeds the product's known stock.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u64,
        available: i64,
    },

    /// Network failure, timeout or 5xx from the backend.
    #[error("Cart service unavailable: {0}")]
    GatewayUnavailable(String),

    /// Session missing or expired; switch to guest mode.
    #[error("Unauthorized")]
    Unauthorized,

    /// Backend answered with an unexpected payload.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Backend refused the mutation (4xx other than 401).
    #[error("Rejected by cart service: {0}")]
    Rejected(String),

    /// Quantity argument out of range.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),

    /// The line has no server id yet, so the backend cannot address it.
    #[error("Cart line for product {0} is not synced with the server")]
    UnsyncedLine(ProductId),

    /// Guest cart could not be persisted.
    #[error("Guest cart storage error: {0}")]
    Storage(#[from] GuestStoreError),
}

impl CartError {
    /// Whether retrying the same call may succeed.
    ///
    /// Malformed responses are treated like an unavailable backend.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::MalformedResponse(_))
    }

    /// Whether the caller should drop the session and fall back to guest mode.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<GatewayError> for CartError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unconfirmed(inner) => Self::from(*inner),
            GatewayError::Unauthorized => Self::Unauthorized,
            GatewayError::Malformed(message) => Self::MalformedResponse(message),
            GatewayError::NotFound(message) | GatewayError::Rejected { message, .. } => {
                Self::Rejected(message)
            }
            other @ (GatewayError::Transport(_)
            | GatewayError::Timeout
            | GatewayError::Unavailable { .. }
            | GatewayError::InvalidUrl(_)) => Self::GatewayUnavailable(other.to_string()),
        }
    }
}

/// Log a failure the engine handled and capture it to Sentry.
///
/// Capturing is a no-op when no Sentry client is bound.
pub(crate) fn report(err: &CartError, operation: &'static str) {
    if err.is_unauthorized() {
        tracing::warn!(operation, "Cart operation unauthorized");
        return;
    }

    let event_id = sentry::capture_error(err);
    tracing::error!(
        error = %err,
        operation,
        sentry_event_id = %event_id,
        "Cart operation failed"
    );
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;
