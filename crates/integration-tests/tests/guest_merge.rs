//! Guest → authenticated cart merge over HTTP.

#![allow(clippy::unwrap_used)]

use shopfront_cart::{AuthSession, AuthStateProvider, AuthStatus, CartEngine, CartSource};
use shopfront_core::UserId;
use shopfront_integration_tests::{
    Fault, MockBackend, Route, StatusCode, TempDir, init_tracing, product,
};

const USER: UserId = UserId::new(7);

#[tokio::test]
async fn test_login_merges_guest_cart_and_deletes_file() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 10_000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let guest_file = dir.path().join("guest_cart.json");

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 3).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&guest_file).unwrap(),
        r#"[{"product_id":1,"quantity":3}]"#
    );
    assert_eq!(engine.total_items(), 3);

    let token = backend.issue_token(USER);
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token, Some(USER))))
        .await
        .unwrap();

    assert_eq!(engine.source(), CartSource::Remote);
    assert_eq!(backend.quantity(USER, a.id), 3);
    assert_eq!(engine.state().quantity_of(a.id), 3);
    assert!(!guest_file.exists());
    assert!(!engine.is_merge_pending());
}

#[tokio::test]
async fn test_merge_is_additive_and_skips_unknown_products() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(5, 10_000, 10);
    let b = product(6, 20_000, 10);
    let gone = product(9, 1_000, 10);
    backend.add_product(a.clone());
    backend.add_product(b.clone());
    backend.add_product(gone.clone());
    backend.seed_item(USER, a.id, 1);
    let dir = TempDir::new();

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 2).await.unwrap();
    engine.add_to_cart(&gone, 1).await.unwrap();
    engine.add_to_cart(&b, 1).await.unwrap();
    backend.remove_product(gone.id);

    let token = backend.issue_token(USER);
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token, Some(USER))))
        .await
        .unwrap();

    assert_eq!(backend.quantity(USER, a.id), 3);
    assert_eq!(backend.quantity(USER, b.id), 1);
    assert_eq!(backend.quantity(USER, gone.id), 0);
    assert_eq!(engine.total_items(), 4);
    assert_eq!(backend.hits(Route::AddItem), 3);
}

#[tokio::test]
async fn test_unconfirmed_merge_keeps_file_until_refresh() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 10_000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let guest_file = dir.path().join("guest_cart.json");

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 2).await.unwrap();

    // baseline fetch passes; the add's follow-up fetch and every
    // confirmation fetch fail
    backend.inject_after(
        Route::GetCart,
        1,
        Fault::Status(StatusCode::SERVICE_UNAVAILABLE),
        4,
    );
    let token = backend.issue_token(USER);
    let err = engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token, Some(USER))))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(engine.is_merge_pending());
    assert!(guest_file.exists());

    engine.refresh_cart().await.unwrap();

    assert!(!engine.is_merge_pending());
    assert!(!guest_file.exists());
    assert_eq!(backend.hits(Route::AddItem), 1);
    assert_eq!(backend.quantity(USER, a.id), 2);
    assert_eq!(engine.state().quantity_of(a.id), 2);
}

#[tokio::test]
async fn test_add_applied_with_unreadable_body_is_merged_once() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(5, 10_000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();
    let guest_file = dir.path().join("guest_cart.json");

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 2).await.unwrap();

    backend.inject(Route::AddItem, Fault::ApplyThenGarbage, 1);
    let token = backend.issue_token(USER);
    engine
        .set_auth_status(AuthStatus::Authenticated(AuthSession::new(token, Some(USER))))
        .await
        .unwrap();
    engine.refresh_cart().await.unwrap();

    assert_eq!(backend.hits(Route::AddItem), 1);
    assert_eq!(backend.quantity(USER, a.id), 2);
    assert_eq!(engine.state().quantity_of(a.id), 2);
    assert!(!engine.is_merge_pending());
    assert!(!guest_file.exists());
}

#[tokio::test]
async fn test_provider_driven_login_and_logout() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 10_000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();

    let provider = AuthStateProvider::default();
    let mut rx = provider.subscribe();
    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();

    provider.login(AuthSession::new(backend.issue_token(USER), Some(USER)));
    rx.changed().await.unwrap();
    engine.follow_auth(&mut rx).await.unwrap();
    assert_eq!(engine.source(), CartSource::Remote);
    assert_eq!(backend.quantity(USER, a.id), 1);

    engine.add_to_cart(&a, 1).await.unwrap();

    provider.logout();
    rx.changed().await.unwrap();
    engine.follow_auth(&mut rx).await.unwrap();
    assert_eq!(engine.source(), CartSource::Guest);
    assert!(engine.state().is_empty());
    // the remote cart is untouched by logout
    assert_eq!(backend.quantity(USER, a.id), 2);
}
