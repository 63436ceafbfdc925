use crate::catalog::CatalogApi;
use crate::error::Result;
use image::ImageFormat;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

#[derive(Clone)]
pub struct Poster {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Poster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poster")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl Poster {
    pub fn decode(bytes: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&bytes)?;
        let decoded = image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            format,
            bytes,
        })
    }

    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }
}

type Slot = Arc<OnceCell<Arc<Poster>>>;

/// Concurrent lookups of the same uncached key share one fetch. A failed fetch leaves
/// nothing behind, so the next lookup tries again.
#[derive(Clone)]
pub struct PosterCache {
    catalog: Arc<dyn CatalogApi>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PosterCache {
    pub fn new(catalog: Arc<dyn CatalogApi>) -> Self {
        Self {
            catalog,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get_or_fetch(&self, id: &str, url: &str) -> Result<Arc<Poster>> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(id.to_string()).or_default().clone()
        };
        let result = slot
            .get_or_try_init(|| async {
                debug!("Fetching poster for {}", id);
                let bytes = self.catalog.fetch_image(url).await?;
                Ok::<_, crate::error::CatalogError>(Arc::new(Poster::decode(bytes)?))
            })
            .await
            .cloned();
        if result.is_err() {
            self.forget_empty_slot(id, &slot).await;
        }
        result
    }

    async fn forget_empty_slot(&self, id: &str, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        let stale = slots
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            slots.remove(id);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Poster>> {
        let slots = self.slots.lock().await;
        slots.get(id).and_then(|slot| slot.get().cloned())
    }

    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // Fetches already running finish for their callers only.
    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        info!("Clearing {} poster cache slots", slots.len());
        slots.clear();
    }
}
