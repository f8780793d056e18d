//! Guest cart persistence.
//!
//! A guest cart is only `{ product_id, quantity }` pairs; prices and display
//! data are re-fetched on hydration. The record is stored as a JSON array
//! under the `guest_cart` key:
//!
//! ```json
//! [{"product_id": 5, "quantity": 2}]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use shopfront_core::{ProductId, Quantity};
use thiserror::Error;
use tracing::warn;

/// Storage key of the guest cart.
pub const GUEST_CART_KEY: &str = "guest_cart";

/// Errors raised by a [`GuestCartStore`].
#[derive(Debug, Error)]
pub enum GuestStoreError {
    /// Reading or writing the backing medium failed.
    #[error("Guest cart I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("Guest cart serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One guest cart entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCartEntry {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// The persisted guest cart: ordered, at most one entry per product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestCartRecord {
    entries: Vec<GuestCartEntry>,
}

impl GuestCartRecord {
    /// Build a record, folding duplicate products into one entry.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = GuestCartEntry>) -> Self {
        let mut record = Self::default();
        for entry in entries {
            record.add(entry.product_id, entry.quantity);
        }
        record
    }

    #[must_use]
    pub fn entries(&self) -> &[GuestCartEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, product_id: ProductId) -> Option<Quantity> {
        self.entries
            .iter()
            .find(|e| e.product_id == product_id)
            .map(|e| e.quantity)
    }

    /// Increment the product's entry, or append a new one. Saturates at
    /// `u32::MAX`.
    pub fn add(&mut self, product_id: ProductId, quantity: Quantity) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.product_id == product_id) {
            entry.quantity = entry.quantity.checked_add(quantity).unwrap_or(entry.quantity);
        } else {
            self.entries.push(GuestCartEntry {
                product_id,
                quantity,
            });
        }
    }

    /// Set the product's quantity. Returns `false` if the product is absent.
    pub fn set(&mut self, product_id: ProductId, quantity: Quantity) -> bool {
        match self.entries.iter_mut().find(|e| e.product_id == product_id) {
            Some(entry) => {
                entry.quantity = quantity;
                true
            }
            None => false,
        }
    }

    /// Remove the product's entry. Returns `false` if it was absent.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.product_id != product_id);
        self.entries.len() != before
    }
}

/// Parse a persisted record. Entries with a non-positive quantity are
/// dropped; anything else unparseable yields an empty record.
fn parse_record(raw: &str) -> GuestCartRecord {
    #[derive(Deserialize)]
    struct RawEntry {
        product_id: ProductId,
        quantity: i64,
    }

    match serde_json::from_str::<Vec<RawEntry>>(raw) {
        Ok(entries) => GuestCartRecord::from_entries(entries.into_iter().filter_map(|e| {
            Quantity::new(e.quantity).ok().map(|quantity| GuestCartEntry {
                product_id: e.product_id,
                quantity,
            })
        })),
        Err(e) => {
            warn!(error = %e, "Failed to parse guest cart, starting empty");
            GuestCartRecord::default()
        }
    }
}

/// Durable storage for the guest cart.
///
/// Calls are synchronous: a guest mutation is persisted before the engine
/// returns.
pub trait GuestCartStore: Send + Sync {
    /// Load the record, `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn load(&self) -> Result<Option<GuestCartRecord>, GuestStoreError>;

    /// Replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, record: &GuestCartRecord) -> Result<(), GuestStoreError>;

    /// Delete the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be removed.
    fn clear(&self) -> Result<(), GuestStoreError>;
}

/// Guest cart stored as `guest_cart.json` in a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a crash
/// never leaves a truncated record.
#[derive(Debug, Clone)]
pub struct FileGuestCartStore {
    path: PathBuf,
}

impl FileGuestCartStore {
    /// Store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{GUEST_CART_KEY}.json")),
        }
    }

    /// Path of the record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GuestCartStore for FileGuestCartStore {
    fn load(&self) -> Result<Option<GuestCartRecord>, GuestStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(parse_record(&raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &GuestCartRecord) -> Result<(), GuestStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(record)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), GuestStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process key-value store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryGuestCartStore {
    values: Mutex<HashMap<&'static str, String>>,
}

impl MemoryGuestCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored JSON, if any.
    #[must_use]
    pub fn raw(&self) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(GUEST_CART_KEY)
            .cloned()
    }

    /// Overwrite the raw stored JSON.
    pub fn set_raw(&self, raw: impl Into<String>) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(GUEST_CART_KEY, raw.into());
    }
}

impl GuestCartStore for MemoryGuestCartStore {
    fn load(&self) -> Result<Option<GuestCartRecord>, GuestStoreError> {
        Ok(self.raw().map(|raw| parse_record(&raw)))
    }

    fn save(&self, record: &GuestCartRecord) -> Result<(), GuestStoreError> {
        self.set_raw(serde_json::to_string(record)?);
        Ok(())
    }

    fn clear(&self) -> Result<(), GuestStoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(GUEST_CART_KEY);
        Ok(())
    }
}

impl<T: GuestCartStore + ?Sized> GuestCartStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<GuestCartRecord>, GuestStoreError> {
        (**self).load()
    }

    fn save(&self, record: &GuestCartRecord) -> Result<(), GuestStoreError> {
        (**self).save(record)
    }

    fn clear(&self) -> Result<(), GuestStoreError> {
        (**self).clear()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn q(n: i64) -> Quantity {
        Quantity::new(n).unwrap()
    }

    #[test]
    fn test_record_add_sums_existing() {
        let mut record = GuestCartRecord::default();
        record.add(ProductId::new(5), q(2));
        record.add(ProductId::new(6), q(1));
        record.add(ProductId::new(5), q(3));

        assert_eq!(record.entries().len(), 2);
        assert_eq!(record.get(ProductId::new(5)), Some(q(5)));
        assert_eq!(record.entries()[0].product_id, ProductId::new(5));
    }

    #[test]
    fn test_record_set_and_remove() {
        let mut record = GuestCartRecord::from_entries([GuestCartEntry {
            product_id: ProductId::new(1),
            quantity: q(1),
        }]);
        assert!(record.set(ProductId::new(1), q(4)));
        assert!(!record.set(ProductId::new(2), q(4)));
        assert_eq!(record.get(ProductId::new(1)), Some(q(4)));

        assert!(record.remove(ProductId::new(1)));
        assert!(!record.remove(ProductId::new(1)));
        assert!(record.is_empty());
    }

    #[test]
    fn test_wire_format() {
        let record = GuestCartRecord::from_entries([GuestCartEntry {
            product_id: ProductId::new(5),
            quantity: q(2),
        }]);
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"[{"product_id":5,"quantity":2}]"#
        );
    }

    #[test]
    fn test_parse_drops_invalid_quantities_and_folds_duplicates() {
        let record = parse_record(
            r#"[{"product_id":1,"quantity":2},{"product_id":2,"quantity":0},{"product_id":1,"quantity":1}]"#,
        );
        assert_eq!(record.entries().len(), 1);
        assert_eq!(record.get(ProductId::new(1)), Some(q(3)));
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_record("{not json").is_empty());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryGuestCartStore::new();
        assert!(store.load().unwrap().is_none());

        let mut record = GuestCartRecord::default();
        record.add(ProductId::new(3), q(1));
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("shopfront-guest-{}", uuid::Uuid::new_v4()));
        let store = FileGuestCartStore::new(&dir);
        assert!(store.load().unwrap().is_none());

        let mut record = GuestCartRecord::default();
        record.add(ProductId::new(8), q(2));
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // clearing twice is fine
        store.clear().unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }
}
