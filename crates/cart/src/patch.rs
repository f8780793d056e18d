//! Optimistic updates as command/undo pairs.
//!
//! Applying a [`CartPatch`] yields the [`Undo`] that restores the touched
//! line exactly (value and position). [`PendingPatch`] holds that undo while
//! the backend confirms; it reverts on drop unless committed, so a cancelled
//! operation never leaves a half-applied state behind.

use shopfront_core::ProductId;

use crate::state::{CartLine, CartState};
use crate::subscription::Subscribers;

/// A single-line change to the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CartPatch {
    /// Replace the product's line in place, or append it when absent.
    Upsert(CartLine),
    /// Remove the product's line.
    Remove(ProductId),
}

impl CartPatch {
    const fn product_id(&self) -> ProductId {
        match self {
            Self::Upsert(line) => line.product_id,
            Self::Remove(product_id) => *product_id,
        }
    }

    /// Apply to the state and return the inverse.
    pub(crate) fn apply(self, state: &mut CartState) -> Undo {
        let product_id = self.product_id();
        let position = state.position(product_id);
        let previous = position.and_then(|i| state.lines.get(i).cloned().map(|line| (i, line)));

        match (self, position) {
            (Self::Upsert(line), Some(i)) => {
                if let Some(slot) = state.lines.get_mut(i) {
                    *slot = line;
                }
            }
            (Self::Upsert(line), None) => state.lines.push(line),
            (Self::Remove(_), Some(i)) => {
                state.lines.remove(i);
            }
            (Self::Remove(_), None) => {}
        }

        Undo {
            product_id,
            previous,
        }
    }
}

/// Inverse of an applied [`CartPatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Undo {
    product_id: ProductId,
    /// The line before the patch and its index, `None` if there was none.
    previous: Option<(usize, CartLine)>,
}

impl Undo {
    pub(crate) fn revert(self, state: &mut CartState) {
        let current = state.position(self.product_id);
        match (self.previous, current) {
            (Some((_, line)), Some(i)) => {
                if let Some(slot) = state.lines.get_mut(i) {
                    *slot = line;
                }
            }
            (Some((index, line)), None) => {
                let index = index.min(state.lines.len());
                state.lines.insert(index, line);
            }
            (None, Some(i)) => {
                state.lines.remove(i);
            }
            (None, None) => {}
        }
    }
}

/// An optimistic patch awaiting confirmation.
pub(crate) struct PendingPatch<'a> {
    state: &'a mut CartState,
    subscribers: &'a Subscribers,
    undo: Option<Undo>,
}

impl<'a> PendingPatch<'a> {
    /// Apply the patch and publish the tentative state.
    pub(crate) fn apply(
        state: &'a mut CartState,
        subscribers: &'a Subscribers,
        patch: CartPatch,
    ) -> Self {
        let undo = patch.apply(state);
        subscribers.publish(state);
        Self {
            state,
            subscribers,
            undo: Some(undo),
        }
    }

    /// Keep the change.
    pub(crate) fn commit(mut self) {
        self.undo = None;
    }

    /// Revert the change and publish the restored state.
    pub(crate) fn rollback(self) {
        drop(self);
    }

    /// Keep the change but hand back the undo for a later decision.
    pub(crate) fn detach(mut self) -> Option<Undo> {
        self.undo.take()
    }
}

impl Drop for PendingPatch<'_> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            tracing::debug!(product_id = %undo.product_id, "Reverting optimistic cart change");
            undo.revert(self.state);
            self.subscribers.publish(self.state);
        }
    }
}
