//! Guest → remote cart merge.
//!
//! The guest record is submitted entry by entry through the additive add
//! endpoint, then the authoritative cart is fetched until every merged
//! product shows up. Progress lives in [`MergeState`], so an interrupted
//! merge resumes where it stopped and never adds an entry twice.

use std::collections::HashMap;
use std::time::Duration;

use shopfront_core::ProductId;
use tracing::{debug, info, instrument, warn};

use super::hydrate::contains_all;
use crate::auth::AuthToken;
use crate::config::MergeConfig;
use crate::error::CartError;
use crate::gateway::{CartGateway, GatewayError, RemoteCart};
use crate::guest::GuestCartRecord;

/// Progress of the one-time merge for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MergeState {
    /// Entries still to submit.
    Submitting {
        remaining: GuestCartRecord,
        merged: Vec<ProductId>,
        /// Remote quantities before the first submission.
        baseline: Option<HashMap<ProductId, i64>>,
        /// Product whose last add failed without telling whether it landed.
        uncertain: Option<ProductId>,
    },
    /// Everything submitted; waiting for the authoritative cart to show it.
    Confirming { merged: Vec<ProductId> },
    /// Merge confirmed, or nothing to merge.
    Done,
}

impl MergeState {
    pub(crate) fn start(record: GuestCartRecord) -> Self {
        Self::Submitting {
            remaining: record,
            merged: Vec::new(),
            baseline: None,
            uncertain: None,
        }
    }

    pub(crate) const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Drive the merge to completion and return the confirmed cart.
///
/// On error, `state` keeps whatever progress was made. Entries the backend
/// answers with "not found" or a rejection are skipped. When an add timed
/// out, the resumed merge compares the remote quantity against the baseline
/// before submitting the entry again.
///
/// # Errors
///
/// Returns the first failure that stops the merge; `Unauthorized` aborts it.
#[instrument(skip_all)]
pub(crate) async fn drive<G: CartGateway>(
    gateway: &G,
    token: &AuthToken,
    state: &mut MergeState,
    config: &MergeConfig,
) -> Result<RemoteCart, CartError> {
    if let MergeState::Submitting {
        remaining,
        merged,
        baseline,
        uncertain,
    } = state
    {
        if baseline.is_none() && !remaining.is_empty() {
            let cart = gateway.get_cart(token).await?;
            *baseline = Some(quantities(&cart));
        }

        while let Some(entry) = remaining.entries().first().copied() {
            if uncertain.is_some() {
                let cart = gateway.get_cart(token).await?;
                *uncertain = None;

                let before = baseline
                    .as_ref()
                    .and_then(|b| b.get(&entry.product_id))
                    .copied()
                    .unwrap_or(0);
                let now = quantities(&cart).get(&entry.product_id).copied().unwrap_or(0);
                if now >= before + i64::from(entry.quantity) {
                    info!(product_id = %entry.product_id, "Timed-out guest entry was applied");
                    merged.push(entry.product_id);
                    remaining.remove(entry.product_id);
                    continue;
                }
            }

            match gateway.add_item(token, entry.product_id, entry.quantity).await {
                Ok(_) => {
                    debug!(product_id = %entry.product_id, quantity = %entry.quantity, "Merged guest entry");
                    merged.push(entry.product_id);
                }
                // applied; confirmation happens below
                Err(GatewayError::Unconfirmed(e)) => {
                    warn!(product_id = %entry.product_id, error = %e, "Merged guest entry without cart");
                    merged.push(entry.product_id);
                }
                Err(e @ (GatewayError::NotFound(_) | GatewayError::Rejected { .. })) => {
                    warn!(
                        product_id = %entry.product_id,
                        quantity = %entry.quantity,
                        error = %e,
                        "Skipping guest cart entry the backend refused"
                    );
                }
                Err(e @ (GatewayError::Timeout | GatewayError::Transport(_))) => {
                    *uncertain = Some(entry.product_id);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
            remaining.remove(entry.product_id);
        }

        *state = MergeState::Confirming {
            merged: std::mem::take(merged),
        };
    }

    let MergeState::Confirming { merged } = state else {
        // Already done: the current cart is the answer.
        return Ok(gateway.get_cart(token).await?);
    };

    let cart = confirm(gateway, token, merged, config).await?;
    info!(merged = merged.len(), "Guest cart merge confirmed");
    *state = MergeState::Done;
    Ok(cart)
}

fn quantities(cart: &RemoteCart) -> HashMap<ProductId, i64> {
    let mut map = HashMap::new();
    for item in &cart.cart_items {
        *map.entry(item.product_id).or_insert(0) += item.quantity;
    }
    map
}

/// Fetch the cart until every merged product appears.
///
/// Gives up after `confirm_attempts` fetches. If at least one fetch
/// succeeded, the last fetched cart is accepted.
async fn confirm<G: CartGateway>(
    gateway: &G,
    token: &AuthToken,
    merged: &[ProductId],
    config: &MergeConfig,
) -> Result<RemoteCart, GatewayError> {
    let attempts = config.confirm_attempts.max(1);
    let mut last_seen = None;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match gateway.get_cart(token).await {
            Ok(cart) if contains_all(&cart, merged) => return Ok(cart),
            Ok(cart) => {
                debug!(attempt, "Merged products not visible yet");
                last_seen = Some(cart);
            }
            Err(GatewayError::Unauthorized) => return Err(GatewayError::Unauthorized),
            Err(e) => {
                warn!(attempt, error = %e, "Merge confirmation fetch failed");
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            sleep(config.confirm_delay).await;
        }
    }

    match last_seen {
        Some(cart) => {
            warn!(attempts, "Accepting cart without every merged product");
            Ok(cart)
        }
        None => Err(last_error.unwrap_or(GatewayError::Timeout)),
    }
}

async fn sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
