use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Movie,
    TvShow,
}

impl FromStr for ContentType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" | "movies" => Ok(ContentType::Movie),
            "tv" | "tvshow" | "tvshows" | "tv_show" => Ok(ContentType::TvShow),
            _ => Err(anyhow::anyhow!("content type must be 'movies' or 'tv'")),
        }
    }
}

/// Two items are the same item when their `id` matches, whatever the other fields say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<String>,
    pub poster: PosterImageRef,
    pub thumbnail: PosterImageRef,
    #[serde(default)]
    pub crew: Option<String>,
}

impl PartialEq for CatalogItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CatalogItem {}

impl Hash for CatalogItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItemDetail {
    #[serde(flatten)]
    pub item: CatalogItem,
    pub plot: String,
    pub awards: String,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub stars: Vec<String>,
    pub genres: Vec<String>,
    pub companies: Vec<String>,
    pub content_rating: Option<String>,
    pub rating: Option<f32>,
    pub critic_score: Option<u8>,
    pub tagline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub description: String,
    pub poster: PosterImageRef,
    pub thumbnail: PosterImageRef,
}

impl SearchResult {
    pub fn to_partial_item(&self) -> CatalogItem {
        CatalogItem {
            id: self.id.clone(),
            title: self.title.clone(),
            year: None,
            poster: self.poster.clone(),
            thumbnail: self.thumbnail.clone(),
            crew: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PosterImageRef {
    pub url: String,
}

impl PosterImageRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TitleImages {
    pub posters: Vec<PosterImageRef>,
    pub backdrops: Vec<PosterImageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub item: CatalogItem,
    pub added_at: DateTime<Utc>,
}

impl LibraryEntry {
    pub fn is_valid_at(&self, now: DateTime<Utc>, rental: Duration) -> bool {
        self.added_at
            .checked_add_signed(rental)
            .map_or(true, |end| now < end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TitleStatus {
    pub favorite: bool,
    pub in_cart: bool,
    pub rented: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub items: Vec<CatalogItem>,
    pub unit_price_cents: u64,
    pub total_cents: u64,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_cents(self.total_cents))
    }
}

pub fn format_cents(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
