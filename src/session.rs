use crate::models::{CatalogItem, LibraryEntry, Receipt, TitleStatus};
use crate::storage::Storage;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const FAVORITES_KEY: &str = "favorites";
const LIBRARY_KEY: &str = "library";
pub const DEFAULT_UNIT_PRICE_CENTS: u64 = 299;
pub const DEFAULT_RENTAL_DAYS: i64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub unit_price_cents: u64,
    pub rental_duration: Duration,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            unit_price_cents: DEFAULT_UNIT_PRICE_CENTS,
            rental_duration: Duration::days(DEFAULT_RENTAL_DAYS),
        }
    }
}

// Favorites and library are written through on every mutation; the cart is memory-only.
pub struct Session {
    storage: Arc<dyn Storage>,
    pricing: Pricing,
    favorites: BTreeMap<String, CatalogItem>,
    cart: BTreeMap<String, CatalogItem>,
    library: Vec<LibraryEntry>,
}

impl Session {
    pub fn load(storage: Arc<dyn Storage>, pricing: Pricing) -> Self {
        let favorites: Vec<CatalogItem> = load_or_default(storage.as_ref(), FAVORITES_KEY);
        let library: Vec<LibraryEntry> = load_or_default(storage.as_ref(), LIBRARY_KEY);
        info!(
            "Session loaded: {} favorites, {} library entries",
            favorites.len(),
            library.len()
        );
        Self {
            storage,
            pricing,
            favorites: favorites
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect(),
            cart: BTreeMap::new(),
            library,
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    pub fn add_favorite(&mut self, item: CatalogItem) {
        self.favorites.insert(item.id.clone(), item);
        self.persist_favorites();
    }

    pub fn remove_favorite(&mut self, id: &str) {
        if self.favorites.remove(id).is_some() {
            self.persist_favorites();
        }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites.contains_key(id)
    }

    pub fn favorites(&self) -> Vec<CatalogItem> {
        self.favorites.values().cloned().collect()
    }

    pub fn add_to_cart(&mut self, item: CatalogItem) -> bool {
        if self.cart.contains_key(&item.id) {
            return false;
        }
        self.cart.insert(item.id.clone(), item);
        true
    }

    pub fn remove_from_cart(&mut self, id: &str) -> bool {
        self.cart.remove(id).is_some()
    }

    pub fn in_cart(&self, id: &str) -> bool {
        self.cart.contains_key(id)
    }

    pub fn cart(&self) -> Vec<CatalogItem> {
        let mut items: Vec<_> = self.cart.values().cloned().collect();
        items.sort_by(|a, b| b.title.cmp(&a.title));
        items
    }

    pub fn cart_total_cents(&self) -> u64 {
        self.pricing
            .unit_price_cents
            .saturating_mul(self.cart.len() as u64)
    }

    // Same id may be rented twice; both entries are kept.
    pub fn add_to_library(&mut self, item: CatalogItem) {
        self.add_to_library_at(item, Utc::now());
    }

    pub fn add_to_library_at(&mut self, item: CatalogItem, added_at: DateTime<Utc>) {
        self.library.push(LibraryEntry { item, added_at });
        self.persist_library();
    }

    pub fn remove_from_library(&mut self, id: &str) {
        if let Some(pos) = self.library.iter().position(|e| e.item.id == id) {
            self.library.remove(pos);
            self.persist_library();
        }
    }

    pub fn library(&mut self) -> Vec<LibraryEntry> {
        self.library_at(Utc::now())
    }

    pub fn library_at(&mut self, now: DateTime<Utc>) -> Vec<LibraryEntry> {
        let rental = self.pricing.rental_duration;
        let before = self.library.len();
        self.library.retain(|e| e.is_valid_at(now, rental));
        let dropped = before - self.library.len();
        if dropped > 0 {
            debug!("Dropped {} expired library entries", dropped);
            self.persist_library();
        }
        self.library.clone()
    }

    pub fn is_rented(&mut self, id: &str) -> bool {
        self.library().iter().any(|e| e.item.id == id)
    }

    pub fn status(&mut self, id: &str) -> TitleStatus {
        TitleStatus {
            favorite: self.is_favorite(id),
            in_cart: self.in_cart(id),
            rented: self.is_rented(id),
        }
    }

    pub fn checkout(&mut self) -> Option<Receipt> {
        if self.cart.is_empty() {
            return None;
        }
        let total_cents = self.cart_total_cents();
        let items: Vec<CatalogItem> = std::mem::take(&mut self.cart).into_values().collect();
        let now = Utc::now();
        self.library
            .extend(items.iter().cloned().map(|item| LibraryEntry { item, added_at: now }));
        self.persist_library();
        info!("Checked out {} titles for {} cents", items.len(), total_cents);
        Some(Receipt {
            items,
            unit_price_cents: self.pricing.unit_price_cents,
            total_cents,
        })
    }

    fn persist_favorites(&self) {
        let items: Vec<&CatalogItem> = self.favorites.values().collect();
        persist(self.storage.as_ref(), FAVORITES_KEY, &items);
    }

    fn persist_library(&self) {
        persist(self.storage.as_ref(), LIBRARY_KEY, &self.library);
    }
}

fn load_or_default<T: DeserializeOwned + Default>(storage: &dyn Storage, key: &str) -> T {
    let bytes = match storage.load(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return T::default(),
        Err(e) => {
            warn!("Failed to read persisted '{}', starting empty: {:#}", key, e);
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse persisted '{}', starting empty: {}", key, e);
            T::default()
        }
    }
}

// The in-memory set stays authoritative; the next successful write replaces the blob.
fn persist<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) {
    let bytes = match serde_json::to_vec(value) {
        Ok(b) => b,
        Err(e) => {
            error!("Failed to serialize '{}': {}", key, e);
            return;
        }
    };
    if let Err(e) = storage.store(key, &bytes) {
        error!("Failed to persist '{}': {:#}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PosterImageRef;
    use crate::storage::{FileStorage, MemoryStorage};

    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn load(&self, _key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Err(anyhow::anyhow!("disk on fire"))
        }
        fn store(&self, _key: &str, _bytes: &[u8]) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk on fire"))
        }
    }

    fn item(id: &str, title: &str) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            title: title.to_string(),
            year: Some("2020".to_string()),
            poster: PosterImageRef::new(format!("https://img/{id}._V1_.jpg")),
            thumbnail: PosterImageRef::new(format!(
                "https://img/{id}._V1_UX256_CR0,3,256,352_AL_.jpg"
            )),
            crew: None,
        }
    }

    fn session() -> (Session, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (Session::load(storage.clone(), Pricing::default()), storage)
    }

    #[test]
    fn adding_a_favorite_twice_keeps_one_entry() {
        let (mut s, _) = session();
        s.add_favorite(item("tt1", "A"));
        s.add_favorite(item("tt1", "A"));
        assert_eq!(s.favorites().len(), 1);
        assert!(s.is_favorite("tt1"));
    }

    #[test]
    fn removing_a_missing_favorite_is_a_noop() {
        let (mut s, storage) = session();
        s.remove_favorite("tt404");
        assert!(s.favorites().is_empty());
        assert_eq!(storage.load(FAVORITES_KEY).unwrap(), None);
    }

    #[test]
    fn favorites_are_persisted_sorted_by_id() {
        let (mut s, storage) = session();
        s.add_favorite(item("tt3", "C"));
        s.add_favorite(item("tt1", "A"));
        s.add_favorite(item("tt2", "B"));
        s.remove_favorite("tt2");
        let stored: Vec<CatalogItem> =
            serde_json::from_slice(&storage.load(FAVORITES_KEY).unwrap().unwrap()).unwrap();
        let ids: Vec<_> = stored.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["tt1", "tt3"]);
    }

    #[test]
    fn favorites_survive_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let mut s = Session::load(storage.clone(), Pricing::default());
        s.add_favorite(item("tt2", "B"));
        s.add_favorite(item("tt1", "A"));
        s.add_to_library(item("tt9", "Rented"));
        let expected = s.favorites();
        drop(s);

        let mut reloaded = Session::load(storage, Pricing::default());
        assert_eq!(reloaded.favorites(), expected);
        assert!(reloaded.is_rented("tt9"));
        assert!(reloaded.cart().is_empty());
    }

    #[test]
    fn unreadable_or_corrupt_state_loads_empty() {
        let s = Session::load(Arc::new(BrokenStorage), Pricing::default());
        assert!(s.favorites().is_empty());

        let storage = Arc::new(MemoryStorage::new());
        storage.store(FAVORITES_KEY, b"{not json").unwrap();
        storage.store(LIBRARY_KEY, b"[]").unwrap();
        let mut s = Session::load(storage, Pricing::default());
        assert!(s.favorites().is_empty());
        assert!(s.library().is_empty());
    }

    #[test]
    fn failed_writes_keep_the_in_memory_change() {
        let mut s = Session::load(Arc::new(BrokenStorage), Pricing::default());
        s.add_favorite(item("tt1", "A"));
        s.add_to_library(item("tt2", "B"));
        assert!(s.is_favorite("tt1"));
        assert_eq!(s.library().len(), 1);
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let (mut s, storage) = session();
        let now = Utc::now();
        let rental = s.pricing().rental_duration;
        s.add_to_library_at(item("old", "Old"), now - rental - Duration::seconds(1));
        s.add_to_library_at(item("new", "New"), now);

        let library = s.library_at(now);
        assert_eq!(library.len(), 1);
        assert_eq!(library[0].item.id, "new");

        let stored: Vec<LibraryEntry> =
            serde_json::from_slice(&storage.load(LIBRARY_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn entry_expires_exactly_at_window_end() {
        let (mut s, _) = session();
        let now = Utc::now();
        let rental = s.pricing().rental_duration;
        s.add_to_library_at(item("edge", "Edge"), now - rental);
        assert!(s.library_at(now).is_empty());
    }

    #[test]
    fn library_keeps_duplicate_rentals_and_removes_first_match() {
        let (mut s, _) = session();
        let now = Utc::now();
        s.add_to_library_at(item("tt1", "A"), now - Duration::hours(2));
        s.add_to_library_at(item("tt1", "A"), now - Duration::hours(1));
        assert_eq!(s.library_at(now).len(), 2);

        s.remove_from_library("tt1");
        let remaining = s.library_at(now);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].added_at, now - Duration::hours(1));

        s.remove_from_library("tt404");
        assert_eq!(s.library_at(now).len(), 1);
    }

    #[test]
    fn removed_rentals_stay_removed_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
        let mut s = Session::load(storage.clone(), Pricing::default());
        s.add_to_library(item("tt1", "A"));
        s.add_to_library(item("tt2", "B"));
        s.remove_from_library("tt1");
        drop(s);

        let mut reloaded = Session::load(storage, Pricing::default());
        let ids: Vec<_> = reloaded.library().into_iter().map(|e| e.item.id).collect();
        assert_eq!(ids, vec!["tt2"]);
    }

    #[test]
    fn oversized_rental_window_does_not_panic() {
        let storage = Arc::new(MemoryStorage::new());
        let pricing = Pricing {
            rental_duration: Duration::days(100_000_000),
            ..Pricing::default()
        };
        let mut s = Session::load(storage, pricing);
        s.add_to_library(item("tt1", "A"));
        assert!(s.is_rented("tt1"));
        assert_eq!(s.library().len(), 1);
    }

    #[test]
    fn cart_total_saturates_instead_of_overflowing() {
        let pricing = Pricing {
            unit_price_cents: u64::MAX,
            ..Pricing::default()
        };
        let mut s = Session::load(Arc::new(MemoryStorage::new()), pricing);
        s.add_to_cart(item("a", "Alpha"));
        s.add_to_cart(item("b", "Beta"));
        assert_eq!(s.cart_total_cents(), u64::MAX);
    }

    #[test]
    fn checkout_rents_cart_and_charges_per_item() {
        let (mut s, _) = session();
        assert!(s.add_to_cart(item("a", "Alpha")));
        assert!(s.add_to_cart(item("b", "Beta")));
        assert!(!s.add_to_cart(item("a", "Alpha")));
        assert_eq!(s.cart_total_cents(), 598);

        let receipt = s.checkout().expect("receipt");
        assert_eq!(receipt.total_cents, 598);
        assert_eq!(receipt.to_string(), "$5.98");
        assert!(s.cart().is_empty());
        let rented: Vec<_> = s.library().into_iter().map(|e| e.item.id).collect();
        assert!(rented.contains(&"a".to_string()));
        assert!(rented.contains(&"b".to_string()));
        assert!(s.checkout().is_none());
    }

    #[test]
    fn cart_is_listed_by_title_descending() {
        let (mut s, _) = session();
        s.add_to_cart(item("1", "Amelie"));
        s.add_to_cart(item("2", "Zodiac"));
        s.add_to_cart(item("3", "Memento"));
        let titles: Vec<_> = s.cart().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["Zodiac", "Memento", "Amelie"]);
        assert!(s.remove_from_cart("2"));
        assert!(!s.remove_from_cart("2"));
    }

    #[test]
    fn status_reflects_all_three_sets() {
        let (mut s, _) = session();
        s.add_favorite(item("f", "Fav"));
        s.add_to_cart(item("c", "Cart"));
        s.add_to_library(item("r", "Rented"));
        assert_eq!(
            s.status("f"),
            TitleStatus {
                favorite: true,
                in_cart: false,
                rented: false
            }
        );
        assert!(s.status("c").in_cart);
        assert!(s.status("r").rented);
    }
}
