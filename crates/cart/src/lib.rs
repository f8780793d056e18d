//! Shopfront cart reconciliation engine.
//!
//! Keeps a shopping cart consistent across guest and authenticated sessions:
//! guest carts persist locally and are merged into the user's remote cart on
//! login; authenticated carts are updated optimistically and reconciled with
//! the backend's authoritative state.
//!
//! # Modules
//!
//! - [`engine`] - [`CartEngine`], the owner of the cart state
//! - [`gateway`] - REST client for carts and products
//! - [`guest`] - Guest cart persistence
//! - [`auth`] - Authentication status consumed by the engine
//! - [`state`] - Observable cart state
//! - [`summary`] - Subtotal, tax, shipping and total
//! - [`config`] - Environment configuration

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guest;
mod patch;
pub mod state;
mod subscription;
pub mod summary;

pub use auth::{AuthSession, AuthStateProvider, AuthStatus, AuthToken};
pub use config::{CartConfig, ConfigError, GatewayConfig, MergeConfig};
pub use engine::CartEngine;
pub use error::{CartError, Result};
pub use gateway::{CartGateway, GatewayError, HttpCartGateway, Product, ProductCatalog};
pub use guest::{FileGuestCartStore, GuestCartRecord, GuestCartStore, MemoryGuestCartStore};
pub use state::{CartLine, CartSource, CartState, LineId};
pub use subscription::Subscription;
pub use summary::{CartSummary, PricingRules};
