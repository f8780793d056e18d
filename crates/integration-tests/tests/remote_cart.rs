//! Authenticated cart operations against the backend over HTTP.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use rust_decimal::Decimal;
use shopfront_cart::{
    AuthSession, AuthStatus, CartEngine, CartError, FileGuestCartStore, HttpCartGateway, LineId,
};
use shopfront_core::UserId;
use shopfront_integration_tests::{
    Fault, MockBackend, Route, StatusCode, TempDir, init_tracing, product,
};

const USER: UserId = UserId::new(42);

async fn logged_in(
    backend: &MockBackend,
    dir: &TempDir,
) -> CartEngine<HttpCartGateway, FileGuestCartStore> {
    let token = backend.issue_token(USER);
    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token, Some(USER))))
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn test_add_follows_item_response_with_cart_fetch() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 25_000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    let fetches = backend.hits(Route::GetCart);

    engine.add_to_cart(&a, 2).await.unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();

    assert_eq!(backend.hits(Route::GetCart), fetches + 2);
    assert_eq!(backend.quantity(USER, a.id), 3);
    assert_eq!(engine.state().quantity_of(a.id), 3);
    assert!(matches!(engine.state().lines[0].line_id, LineId::Server(_)));

    let summary = engine.summary();
    assert_eq!(summary.subtotal.amount, Decimal::from(75_000));
    assert_eq!(summary.tax.amount, Decimal::from(7_500));
    assert_eq!(summary.shipping.amount, Decimal::from(15_000));
    assert_eq!(summary.total.amount, Decimal::from(97_500));
    assert_eq!(summary.total.to_string(), "Rp97500");
}

#[tokio::test]
async fn test_add_accepts_whole_cart_response() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    backend.set_add_returns_cart(true);
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    let fetches = backend.hits(Route::GetCart);

    engine.add_to_cart(&a, 2).await.unwrap();

    assert_eq!(backend.hits(Route::GetCart), fetches);
    assert_eq!(engine.state().quantity_of(a.id), 2);
}

#[tokio::test]
async fn test_server_error_on_add_rolls_back() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    engine.add_to_cart(&a, 1).await.unwrap();

    backend.inject(Route::AddItem, Fault::Status(StatusCode::INTERNAL_SERVER_ERROR), 1);
    let err = engine.add_to_cart(&a, 2).await.unwrap_err();

    assert!(matches!(err, CartError::GatewayUnavailable(_)));
    assert_eq!(engine.state().quantity_of(a.id), 1);
    assert_eq!(backend.quantity(USER, a.id), 1);
}

#[tokio::test]
async fn test_backend_stock_rejection_on_update_rolls_back() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 3);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    engine.add_to_cart(&a, 2).await.unwrap();

    let err = engine.update_quantity(a.id, 5).await.unwrap_err();

    assert!(matches!(err, CartError::Rejected(ref m) if m == "Insufficient stock"));
    assert_eq!(engine.state().quantity_of(a.id), 2);
}

#[tokio::test]
async fn test_update_and_remove() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    let b = product(2, 2000, 10);
    backend.add_product(a.clone());
    backend.add_product(b.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;

    engine.add_to_cart(&a, 1).await.unwrap();
    engine.add_to_cart(&b, 1).await.unwrap();
    engine.update_quantity(a.id, 4).await.unwrap();
    assert_eq!(backend.quantity(USER, a.id), 4);

    engine.update_quantity(b.id, 0).await.unwrap();
    assert_eq!(backend.item_count(USER), 1);
    assert!(engine.state().line(b.id).is_none());

    engine.remove_from_cart(a.id).await.unwrap();
    assert!(engine.state().is_empty());
    assert_eq!(backend.item_count(USER), 0);
}

#[tokio::test]
async fn test_revoked_token_is_unauthorized() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let token = backend.issue_token(USER);
    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token.clone(), Some(USER))))
        .await
        .unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();

    backend.revoke_token(&token);
    let err = engine.add_to_cart(&a, 1).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(engine.state().quantity_of(a.id), 1);

    // a fresh token for the same session is swapped in without a merge
    let fresh = backend.issue_token(USER);
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(fresh, Some(USER))))
        .await
        .unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();
    assert_eq!(backend.quantity(USER, a.id), 2);
}

#[tokio::test]
async fn test_request_timeout_is_unavailable() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;

    backend.inject(Route::AddItem, Fault::Stall(Duration::from_secs(2)), 1);
    let err = engine.add_to_cart(&a, 1).await.unwrap_err();

    assert!(err.is_transient());
    assert!(engine.state().is_empty());
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    engine.add_to_cart(&a, 1).await.unwrap();

    backend.inject(Route::GetCart, Fault::Garbage, 1);
    let err = engine.refresh_cart().await.unwrap_err();

    assert!(matches!(err, CartError::MalformedResponse(_)));
    assert!(err.is_transient());
    assert_eq!(engine.state().quantity_of(a.id), 1);
}

#[tokio::test]
async fn test_failed_remove_resyncs_with_backend() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    let b = product(2, 1000, 10);
    backend.add_product(a.clone());
    backend.add_product(b.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    engine.add_to_cart(&a, 1).await.unwrap();

    // another device adds a product behind our back
    backend.seed_item(USER, b.id, 2);
    backend.inject(Route::RemoveItem, Fault::Status(StatusCode::BAD_GATEWAY), 1);
    assert!(engine.remove_from_cart(a.id).await.is_err());

    assert_eq!(engine.state().quantity_of(a.id), 1);
    assert_eq!(engine.state().quantity_of(b.id), 2);
}

#[tokio::test]
async fn test_clear_cart() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let mut engine = logged_in(&backend, &dir).await;
    engine.add_to_cart(&a, 3).await.unwrap();

    engine.clear_cart().await.unwrap();

    assert!(engine.state().is_empty());
    assert_eq!(backend.item_count(USER), 0);
    assert!(engine.summary().total.is_zero());
}
