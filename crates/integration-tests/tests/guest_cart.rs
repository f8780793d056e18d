//! Guest cart persistence and hydration over HTTP.

#![allow(clippy::unwrap_used)]

use shopfront_cart::{CartEngine, CartSource, FileGuestCartStore, GuestCartStore};
use shopfront_core::ProductId;
use shopfront_integration_tests::{MockBackend, Route, TempDir, init_tracing, product};

#[tokio::test]
async fn test_guest_cart_survives_restart() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 25_000, 10);
    let b = product(2, 10_000, 5);
    backend.add_product(a.clone());
    backend.add_product(b.clone());
    let dir = TempDir::new();

    {
        let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
        engine.add_to_cart(&a, 2).await.unwrap();
        engine.add_to_cart(&b, 1).await.unwrap();
        engine.add_to_cart(&a, 1).await.unwrap();
    }

    let raw = std::fs::read_to_string(dir.path().join("guest_cart.json")).unwrap();
    assert_eq!(
        raw,
        r#"[{"product_id":1,"quantity":3},{"product_id":2,"quantity":1}]"#
    );

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    assert!(engine.state().is_empty());
    engine.refresh_cart().await.unwrap();

    assert_eq!(engine.source(), CartSource::Guest);
    assert_eq!(engine.total_items(), 4);
    let line = engine.state().line(a.id).unwrap();
    assert_eq!(line.product.name, "Product 1");
    assert_eq!(line.product.image.as_deref(), Some("/images/products/1.jpg"));
    assert_eq!(engine.total_price(), a.price * rust_decimal::Decimal::from(3) + b.price);
}

#[tokio::test]
async fn test_guest_hydration_uses_product_cache() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();
    engine.refresh_cart().await.unwrap();
    engine.refresh_cart().await.unwrap();

    assert_eq!(backend.hits(Route::GetProduct), 1);
    assert_eq!(backend.hits(Route::AddItem), 0);
}

#[tokio::test]
async fn test_guest_hydration_prunes_deleted_products() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    let b = product(2, 2000, 10);
    backend.add_product(a.clone());
    backend.add_product(b.clone());
    let dir = TempDir::new();

    {
        let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
        engine.add_to_cart(&a, 1).await.unwrap();
        engine.add_to_cart(&b, 2).await.unwrap();
    }
    backend.remove_product(a.id);

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.refresh_cart().await.unwrap();

    assert!(engine.state().line(a.id).is_none());
    assert_eq!(engine.state().quantity_of(b.id), 2);
    let stored = FileGuestCartStore::new(dir.path()).load().unwrap().unwrap();
    assert_eq!(stored.entries().len(), 1);
    assert_eq!(stored.entries()[0].product_id, ProductId::new(2));
}

#[tokio::test]
async fn test_corrupt_guest_file_starts_empty() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let dir = TempDir::new();
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("guest_cart.json"), "{definitely not a cart").unwrap();

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.refresh_cart().await.unwrap();

    assert!(engine.state().is_empty());
    assert!(engine.guest_record().unwrap().is_empty());
}

#[tokio::test]
async fn test_guest_clear_removes_file() {
    init_tracing();
    let backend = MockBackend::start().await.unwrap();
    let a = product(1, 1000, 10);
    backend.add_product(a.clone());
    let dir = TempDir::new();

    let mut engine = CartEngine::from_config(&backend.cart_config(dir.path())).unwrap();
    engine.add_to_cart(&a, 1).await.unwrap();
    assert!(dir.path().join("guest_cart.json").exists());

    engine.clear_cart().await.unwrap();
    assert!(!dir.path().join("guest_cart.json").exists());
    assert!(engine.state().is_empty());
}
