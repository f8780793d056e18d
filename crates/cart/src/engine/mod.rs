//! Cart reconciliation engine.
//!
//! # Architecture
//!
//! The engine owns the in-memory [`CartState`] and routes every operation to
//! one of two sources of truth:
//!
//! - **Guest**: the persisted [`GuestCartRecord`]. Mutations are saved
//!   before the state changes; lines are hydrated through the
//!   [`ProductCatalog`].
//! - **Remote**: the backend, reached through the [`CartGateway`] with the
//!   session's bearer token. Mutations are applied optimistically, then
//!   replaced by the authoritative cart or rolled back.
//!
//! Mutating operations take `&mut self`, so two operations on one engine can
//! never interleave and a late response can never overwrite newer intent.
//!
//! # Example
//!
//! ```rust,ignore
//! use shopfront_cart::{AuthSession, AuthStatus, CartConfig, CartEngine};
//!
//! let config = CartConfig::from_env()?;
//! let mut engine = CartEngine::from_config(&config)?;
//! engine.refresh_cart().await?;
//!
//! let _sub = engine.subscribe(|state| println!("{} items", state.total_items()));
//! engine.add_to_cart(&product, 2).await?;
//!
//! // Merges the guest cart into the user's cart.
//! engine.set_auth_status(AuthStatus::Authenticated(session)).await?;
//! ```

mod hydrate;
mod merge;


use rust_decimal::Decimal;
use shopfront_core::{ProductId, Quantity, QuantityError, UserId};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use self::hydrate::{guest_line, hydrate_guest, lines_from_remote};
use self::merge::MergeState;
use crate::auth::{AuthSession, AuthStatus, AuthToken};
use crate::config::{CartConfig, MergeConfig};
use crate::error::{CartError, Result, report};
use crate::gateway::{
    CartGateway, GatewayError, HttpCartGateway, Product, ProductCatalog, RemoteCart,
};
use crate::guest::{FileGuestCartStore, GuestCartRecord, GuestCartStore};
use crate::patch::{CartPatch, PendingPatch};
use crate::state::{CartLine, CartSource, CartState};
use crate::subscription::{Subscribers, Subscription};
use crate::summary::{CartSummary, PricingRules};

/// Where mutations go.
#[derive(Debug)]
enum CartMode {
    Guest(GuestCartRecord),
    Remote(RemoteSession),
}

#[derive(Debug)]
struct RemoteSession {
    token: AuthToken,
    user_id: Option<UserId>,
    merge: MergeState,
    /// The merged guest cart is still in the store.
    guest_clear_pending: bool,
}

/// The cart engine for one user session.
pub struct CartEngine<G, S> {
    gateway: G,
    store: S,
    merge_config: MergeConfig,
    pricing: PricingRules,
    mode: CartMode,
    state: CartState,
    subscribers: Subscribers,
}

impl<G, S> std::fmt::Debug for CartEngine<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("subscribers", &self.subscribers)
            .finish_non_exhaustive()
    }
}

impl CartEngine<HttpCartGateway, FileGuestCartStore> {
    /// Engine backed by the REST API and a guest cart file.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build or the guest cart
    /// cannot be read.
    pub fn from_config(config: &CartConfig) -> Result<Self> {
        let gateway = HttpCartGateway::new(&config.gateway)?;
        let store = FileGuestCartStore::new(&config.guest_cart_dir);
        Self::new(gateway, store, config.merge, config.pricing)
    }
}

impl<G, S> CartEngine<G, S>
where
    G: CartGateway + ProductCatalog,
    S: GuestCartStore,
{
    /// Create an engine in guest mode, loading any persisted guest cart.
    ///
    /// Lines are empty until the first [`refresh_cart`](Self::refresh_cart)
    /// hydrates them.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the guest cart cannot be read.
    pub fn new(gateway: G, store: S, merge_config: MergeConfig, pricing: PricingRules) -> Result<Self> {
        let record = store.load()?.unwrap_or_default();

        Ok(Self {
            gateway,
            store,
            merge_config,
            pricing,
            mode: CartMode::Guest(record),
            state: CartState::new(CartSource::Guest),
            subscribers: Subscribers::default(),
        })
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &CartState {
        &self.state
    }

    #[must_use]
    pub const fn source(&self) -> CartSource {
        self.state.source
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.state.total_items()
    }

    /// Sum of `unit_price × quantity` over all lines.
    #[must_use]
    pub fn total_price(&self) -> Decimal {
        self.state.total_price()
    }

    /// Subtotal, tax, shipping and total for display.
    #[must_use]
    pub fn summary(&self) -> CartSummary {
        CartSummary::compute(&self.state, &self.pricing)
    }

    /// The in-memory guest record; `None` while authenticated.
    #[must_use]
    pub const fn guest_record(&self) -> Option<&GuestCartRecord> {
        match &self.mode {
            CartMode::Guest(record) => Some(record),
            CartMode::Remote(_) => None,
        }
    }

    /// Whether a guest merge still awaits submission or confirmation.
    #[must_use]
    pub const fn is_merge_pending(&self) -> bool {
        match &self.mode {
            CartMode::Remote(session) => !session.merge.is_done(),
            CartMode::Guest(_) => false,
        }
    }

    /// Register a callback invoked after every state change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CartState) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity` if `quantity < 1`
    /// - `InsufficientStock` if the cart would hold more than `product.stock`
    /// - `Storage` if the guest cart cannot be saved
    /// - Gateway errors in remote mode, after rolling back
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add_to_cart(&mut self, product: &Product, quantity: i64) -> Result<()> {
        let quantity = Quantity::new(quantity)?;

        match &mut self.mode {
            CartMode::Guest(record) => {
                let existing = record.get(product.id).map_or(0, Quantity::get);
                check_stock(product, existing, quantity)?;

                let mut next = record.clone();
                next.add(product.id, quantity);
                self.store.save(&next)?;
                let total = next.get(product.id).unwrap_or(quantity);
                *record = next;

                CartPatch::Upsert(guest_line(&self.state, product, total)).apply(&mut self.state);
                self.subscribers.publish(&mut self.state);
                Ok(())
            }
            CartMode::Remote(session) => {
                let (token, user_id) = (session.token.clone(), session.user_id);
                check_stock(product, self.state.quantity_of(product.id), quantity)?;
                self.remote_add(&token, user_id, product, quantity).await
            }
        }
    }

    /// Remove a product's line. Absent products are a no-op.
    ///
    /// # Errors
    ///
    /// - `UnsyncedLine` if the remote line has no server id
    /// - `Storage` if the guest cart cannot be saved
    /// - Gateway errors in remote mode, after re-syncing with the backend
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_from_cart(&mut self, product_id: ProductId) -> Result<()> {
        match &mut self.mode {
            CartMode::Guest(record) => {
                if record.get(product_id).is_none() {
                    return Ok(());
                }

                let mut next = record.clone();
                next.remove(product_id);
                self.store.save(&next)?;
                *record = next;

                CartPatch::Remove(product_id).apply(&mut self.state);
                self.subscribers.publish(&mut self.state);
                Ok(())
            }
            CartMode::Remote(session) => {
                let (token, user_id) = (session.token.clone(), session.user_id);
                self.remote_remove(&token, user_id, product_id).await
            }
        }
    }

    /// Set a product's quantity. A quantity of zero or less removes the line;
    /// absent products are a no-op.
    ///
    /// Exceeding the known stock is only logged; the backend decides.
    ///
    /// # Errors
    ///
    /// Same as [`add_to_cart`](Self::add_to_cart) and
    /// [`remove_from_cart`](Self::remove_from_cart).
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn update_quantity(&mut self, product_id: ProductId, quantity: i64) -> Result<()> {
        if quantity <= 0 {
            return self.remove_from_cart(product_id).await;
        }
        let quantity = Quantity::new(quantity)?;

        if let Some(line) = self.state.line(product_id)
            && i64::from(quantity.get()) > line.product.stock
        {
            warn!(
                product_id = %product_id,
                requested = %quantity,
                stock = line.product.stock,
                "Requested quantity exceeds known stock"
            );
        }

        match &mut self.mode {
            CartMode::Guest(record) => {
                if record.get(product_id).is_none() {
                    return Ok(());
                }

                let mut next = record.clone();
                next.set(product_id, quantity);
                self.store.save(&next)?;
                *record = next;

                if let Some(mut line) = self.state.line(product_id).cloned() {
                    line.quantity = quantity;
                    CartPatch::Upsert(line).apply(&mut self.state);
                }
                self.subscribers.publish(&mut self.state);
                Ok(())
            }
            CartMode::Remote(session) => {
                let (token, user_id) = (session.token.clone(), session.user_id);
                self.remote_update(&token, user_id, product_id, quantity)
                    .await
            }
        }
    }

    /// Empty the cart.
    ///
    /// In remote mode the local state is cleared even if the backend call
    /// fails.
    ///
    /// # Errors
    ///
    /// - `Storage` if the guest cart cannot be deleted (state unchanged)
    /// - Gateway errors in remote mode
    #[instrument(skip(self))]
    pub async fn clear_cart(&mut self) -> Result<()> {
        match &mut self.mode {
            CartMode::Guest(record) => {
                self.store.clear()?;
                *record = GuestCartRecord::default();
                self.state.lines.clear();
                self.subscribers.publish(&mut self.state);
                Ok(())
            }
            CartMode::Remote(session) => {
                let token = session.token.clone();
                self.set_loading(true);
                let result = self.gateway.clear(&token).await;

                self.state.is_loading = false;
                self.state.lines.clear();
                self.subscribers.publish(&mut self.state);

                result.map_err(|e| {
                    let err = CartError::from(e);
                    report(&err, "clear_cart");
                    err
                })
            }
        }
    }

    /// Re-sync the lines with their source of truth.
    ///
    /// In remote mode a pending guest merge is resumed first. On failure the
    /// previous lines are kept.
    ///
    /// # Errors
    ///
    /// Returns the gateway or storage failure that stopped the refresh.
    #[instrument(skip(self))]
    pub async fn refresh_cart(&mut self) -> Result<()> {
        self.set_loading(true);

        let result = match &mut self.mode {
            CartMode::Guest(record) => {
                refresh_guest(&self.gateway, &self.store, record, &self.state).await
            }
            CartMode::Remote(session) => {
                refresh_remote(&self.gateway, &self.store, session, &self.merge_config).await
            }
        };

        self.state.is_loading = false;
        let outcome = match result {
            Ok(lines) => {
                self.state.lines = lines;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Cart refresh failed, keeping last known state");
                Err(e)
            }
        };
        self.subscribers.publish(&mut self.state);
        outcome
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Apply an authentication status.
    ///
    /// Logging in from guest mode merges the guest cart into the user's cart,
    /// once per login. A new token for the same session is swapped in
    /// without merging again. Logging out discards the remote lines and
    /// restores the guest cart.
    ///
    /// # Errors
    ///
    /// Returns the failure of the refresh that follows a transition. The
    /// transition itself always happens.
    #[instrument(skip_all, fields(authenticated = status.is_authenticated()))]
    pub async fn set_auth_status(&mut self, status: AuthStatus) -> Result<()> {
        let remote = matches!(self.mode, CartMode::Remote(_));

        match status {
            AuthStatus::Anonymous if remote => self.logout().await,
            AuthStatus::Anonymous => Ok(()),
            AuthStatus::Authenticated(auth) => {
                if let CartMode::Remote(session) = &mut self.mode {
                    let user_changed = auth.user_id.is_some() && session.user_id != auth.user_id;
                    session.token = auth.token;
                    if user_changed {
                        info!(user_id = ?auth.user_id, "Session switched user, reloading cart");
                        session.user_id = auth.user_id;
                        if !session.merge.is_done() {
                            // the guest cart belongs to whoever logged in from it
                            warn!("Dropping pending guest merge after user switch");
                            session.merge = MergeState::Done;
                        }
                        return self.refresh_cart().await;
                    }
                    Ok(())
                } else {
                    self.login(auth).await
                }
            }
        }
    }

    /// Apply the receiver's latest status.
    ///
    /// Call after `changed()` resolves; applying an unchanged status is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Same as [`set_auth_status`](Self::set_auth_status).
    pub async fn follow_auth(&mut self, receiver: &mut watch::Receiver<AuthStatus>) -> Result<()> {
        let status = receiver.borrow_and_update().clone();
        self.set_auth_status(status).await
    }

    async fn login(&mut self, auth: AuthSession) -> Result<()> {
        let record = match &mut self.mode {
            CartMode::Guest(record) => std::mem::take(record),
            CartMode::Remote(_) => GuestCartRecord::default(),
        };
        info!(
            user_id = ?auth.user_id,
            guest_entries = record.entries().len(),
            "Switching cart to remote"
        );

        self.mode = CartMode::Remote(RemoteSession {
            token: auth.token,
            user_id: auth.user_id,
            merge: MergeState::start(record),
            guest_clear_pending: false,
        });
        self.state.source = CartSource::Remote;
        self.state.lines.clear();

        self.refresh_cart().await
    }

    async fn logout(&mut self) -> Result<()> {
        let merged_guest = matches!(&self.mode, CartMode::Remote(s) if s.guest_clear_pending);
        let record = if merged_guest {
            // already merged into the remote cart; never restore it
            if let Err(e) = self.store.clear() {
                report(&CartError::from(e), "logout");
            }
            GuestCartRecord::default()
        } else {
            match self.store.load() {
                Ok(record) => record.unwrap_or_default(),
                Err(e) => {
                    report(&CartError::from(e), "logout");
                    GuestCartRecord::default()
                }
            }
        };
        info!(guest_entries = record.entries().len(), "Switching cart to guest");

        self.mode = CartMode::Guest(record);
        self.state.source = CartSource::Guest;
        self.state.lines.clear();

        self.refresh_cart().await
    }

    // =========================================================================
    // Remote mutations
    // =========================================================================

    async fn remote_add(
        &mut self,
        token: &AuthToken,
        user_id: Option<UserId>,
        product: &Product,
        quantity: Quantity,
    ) -> Result<()> {
        let line = match self.state.line(product.id) {
            Some(existing) => {
                let mut line = existing.clone();
                line.quantity = existing.quantity.checked_add(quantity).ok_or_else(|| {
                    QuantityError::TooLarge(i64::from(existing.quantity) + i64::from(quantity))
                })?;
                line
            }
            None => CartLine::local(product, quantity),
        };

        self.state.is_loading = true;
        let pending = PendingPatch::apply(&mut self.state, &self.subscribers, CartPatch::Upsert(line));
        let result = self.gateway.add_item(token, product.id, quantity).await;
        let outcome = settle(pending, result, user_id);
        self.finish("add_to_cart", outcome)
    }

    async fn remote_update(
        &mut self,
        token: &AuthToken,
        user_id: Option<UserId>,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<()> {
        let Some(line) = self.state.line(product_id) else {
            return Ok(());
        };
        let item_id = line
            .line_id
            .server_id()
            .ok_or(CartError::UnsyncedLine(product_id))?;
        let mut line = line.clone();
        line.quantity = quantity;

        self.state.is_loading = true;
        let pending = PendingPatch::apply(&mut self.state, &self.subscribers, CartPatch::Upsert(line));
        let result = self.gateway.update_item(token, item_id, quantity).await;
        let outcome = settle(pending, result, user_id);
        self.finish("update_quantity", outcome)
    }

    async fn remote_remove(
        &mut self,
        token: &AuthToken,
        user_id: Option<UserId>,
        product_id: ProductId,
    ) -> Result<()> {
        let Some(line) = self.state.line(product_id) else {
            return Ok(());
        };
        let item_id = line
            .line_id
            .server_id()
            .ok_or(CartError::UnsyncedLine(product_id))?;

        self.state.is_loading = true;
        let pending = PendingPatch::apply(&mut self.state, &self.subscribers, CartPatch::Remove(product_id));
        let result = self
            .gateway
            .remove_item(token, item_id)
            .await
            .map_err(CartError::from)
            .and_then(|cart| lines_from_remote(&cart, user_id));

        let err = match result {
            Ok(lines) => {
                pending.commit();
                return self.finish("remove_from_cart", Ok(lines));
            }
            Err(err) => err,
        };

        // Keep the removal until the backend tells us what it holds.
        let undo = pending.detach();
        report(&err, "remove_from_cart");

        let refreshed = self
            .gateway
            .get_cart(token)
            .await
            .map_err(CartError::from)
            .and_then(|cart| lines_from_remote(&cart, user_id));

        self.state.is_loading = false;
        match refreshed {
            Ok(lines) => self.state.lines = lines,
            Err(refresh_err) => {
                warn!(error = %refresh_err, "Re-sync after failed remove failed, restoring line");
                if let Some(undo) = undo {
                    undo.revert(&mut self.state);
                }
            }
        }
        self.subscribers.publish(&mut self.state);
        Err(err)
    }

    /// Apply the outcome of a remote mutation and publish.
    fn finish(&mut self, operation: &'static str, outcome: Result<Vec<CartLine>>) -> Result<()> {
        self.state.is_loading = false;
        let result = match outcome {
            Ok(lines) => {
                self.state.lines = lines;
                Ok(())
            }
            Err(err) => {
                report(&err, operation);
                Err(err)
            }
        };
        self.subscribers.publish(&mut self.state);
        result
    }

    fn set_loading(&mut self, loading: bool) {
        if self.state.is_loading != loading {
            self.state.is_loading = loading;
            self.subscribers.publish(&mut self.state);
        }
    }
}

/// Commit the optimistic patch if the backend confirmed, roll back otherwise.
fn settle(
    pending: PendingPatch<'_>,
    result: std::result::Result<RemoteCart, GatewayError>,
    user_id: Option<UserId>,
) -> Result<Vec<CartLine>> {
    match result
        .map_err(CartError::from)
        .and_then(|cart| lines_from_remote(&cart, user_id))
    {
        Ok(lines) => {
            pending.commit();
            Ok(lines)
        }
        Err(err) => {
            pending.rollback();
            Err(err)
        }
    }
}

fn check_stock(product: &Product, existing: u32, quantity: Quantity) -> Result<()> {
    let requested = u64::from(existing) + u64::from(quantity.get());
    if i128::from(requested) > i128::from(product.stock) {
        return Err(CartError::InsufficientStock {
            product_id: product.id,
            requested,
            available: product.stock,
        });
    }
    Ok(())
}

/// Hydrate guest lines, pruning products that no longer exist.
async fn refresh_guest<C: ProductCatalog, S: GuestCartStore>(
    catalog: &C,
    store: &S,
    record: &mut GuestCartRecord,
    current: &CartState,
) -> Result<Vec<CartLine>> {
    let hydration = hydrate_guest(catalog, record, current).await?;

    if !hydration.missing.is_empty() {
        let mut pruned = record.clone();
        for product_id in &hydration.missing {
            pruned.remove(*product_id);
        }
        store.save(&pruned)?;
        *record = pruned;
    }

    Ok(hydration.lines)
}

/// Resume a pending merge, or fetch the authoritative cart.
async fn refresh_remote<G: CartGateway, S: GuestCartStore>(
    gateway: &G,
    store: &S,
    session: &mut RemoteSession,
    config: &MergeConfig,
) -> Result<Vec<CartLine>> {
    if session.merge.is_done() {
        clear_merged_guest(store, session);
        let cart = gateway.get_cart(&session.token).await?;
        return lines_from_remote(&cart, session.user_id);
    }

    let cart = match merge::drive(gateway, &session.token, &mut session.merge, config).await {
        Ok(cart) => cart,
        Err(err) => {
            report(&err, "merge_guest_cart");
            return Err(err);
        }
    };

    // Only a confirmed merge may discard the guest cart.
    session.guest_clear_pending = true;
    clear_merged_guest(store, session);

    lines_from_remote(&cart, session.user_id)
}

/// Delete the merged guest cart from the store, retrying on later refreshes.
fn clear_merged_guest<S: GuestCartStore>(store: &S, session: &mut RemoteSession) {
    if !session.guest_clear_pending {
        return;
    }
    match store.clear() {
        Ok(()) => session.guest_clear_pending = false,
        Err(e) => report(&CartError::from(e), "merge_guest_cart"),
    }
}
