use crate::error::{CatalogError, Result};
use crate::models::{
    CatalogItem, CatalogItemDetail, ContentType, PosterImageRef, SearchResult, TitleImages,
};
use anyhow::Context;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://imdb-api.com/en/API";
const THUMBNAIL_SEPARATOR: &str = "._";
const THUMBNAIL_SUFFIX: &str = "._V1_UX256_CR0,3,256,352_AL_.jpg";

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn popular(&self, content_type: ContentType) -> Result<Vec<CatalogItem>>;
    async fn detail(&self, id: &str) -> Result<CatalogItemDetail>;
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
    async fn images(&self, id: &str) -> Result<TitleImages>;
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;

    async fn resolve(&self, result: &SearchResult) -> Result<CatalogItem> {
        Ok(self.detail(&result.id).await?.item)
    }
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let user_agent = format!("movietime/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build catalog HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, query: &str, argument: Option<&str>) -> String {
        match argument {
            Some(arg) => format!(
                "{}/{query}/{}/{}",
                self.base_url,
                self.api_key,
                urlencoding::encode(arg)
            ),
            None => format!("{}/{query}/{}", self.base_url, self.api_key),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        let text = res.text().await?;
        if status != reqwest::StatusCode::OK {
            debug!("Catalog request returned {}", status);
            return Err(CatalogError::Network(format!("HTTP {status}")));
        }
        parse_envelope(&text)
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn popular(&self, content_type: ContentType) -> Result<Vec<CatalogItem>> {
        let query = match content_type {
            ContentType::Movie => "MostPopularMovies",
            ContentType::TvShow => "MostPopularTVs",
        };
        let data: ItemsResponse = self.get_json(&self.url(query, None)).await?;
        Ok(map_popular(data))
    }

    async fn detail(&self, id: &str) -> Result<CatalogItemDetail> {
        let data: TitleResponse = self.get_json(&self.url("Title", Some(id))).await?;
        Ok(map_detail(data))
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let data: SearchResponse = self.get_json(&self.url("Search", Some(query))).await?;
        Ok(map_search(data))
    }

    async fn images(&self, id: &str) -> Result<TitleImages> {
        let data: PostersResponse = self.get_json(&self.url("Posters", Some(id))).await?;
        Ok(map_images(data))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let res = self.client.get(url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(CatalogError::Network(format!("HTTP {status} for image")));
        }
        Ok(res.bytes().await?.to_vec())
    }
}

// Success carries an empty, null or missing `errorMessage`.
pub fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<T> {
    let value: Value = serde_json::from_str(body)?;
    if let Some(message) = value.get("errorMessage").and_then(Value::as_str) {
        if !message.is_empty() {
            return Err(CatalogError::Api(message.to_string()));
        }
    }
    Ok(serde_json::from_value(value)?)
}

pub fn thumbnail_url(full: &str) -> String {
    match full.find(THUMBNAIL_SEPARATOR) {
        Some(idx) => format!("{}{THUMBNAIL_SUFFIX}", &full[..idx]),
        None => full.to_string(),
    }
}

fn poster_refs(image: Option<String>) -> (PosterImageRef, PosterImageRef) {
    let full = image.unwrap_or_default();
    let thumb = thumbnail_url(&full);
    (PosterImageRef::new(full), PosterImageRef::new(thumb))
}

pub fn filter_by_title(items: &[CatalogItem], term: &str) -> Vec<CatalogItem> {
    if term.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|i| i.title.contains(term))
        .cloned()
        .collect()
}

pub fn choose_header(images: Option<&TitleImages>, fallback: &PosterImageRef) -> PosterImageRef {
    images
        .and_then(|i| i.backdrops.choose(&mut rand::rng()))
        .unwrap_or(fallback)
        .clone()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ItemsResponse {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    title: String,
    year: Option<String>,
    image: Option<String>,
    crew: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TitleResponse {
    id: String,
    title: String,
    year: Option<String>,
    image: Option<String>,
    plot: Option<String>,
    awards: Option<String>,
    directors: Option<String>,
    writers: Option<String>,
    stars: Option<String>,
    genres: Option<String>,
    companies: Option<String>,
    content_rating: Option<String>,
    #[serde(rename = "imDbRating")]
    imdb_rating: Option<String>,
    metacritic_rating: Option<String>,
    tagline: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    #[serde(default)]
    results: Vec<RawSearchResult>,
}

#[derive(Debug, Deserialize)]
struct RawSearchResult {
    id: String,
    title: String,
    description: Option<String>,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostersResponse {
    #[serde(default)]
    posters: Vec<RawImage>,
    #[serde(default)]
    backdrops: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    link: Option<String>,
}

fn map_popular(data: ItemsResponse) -> Vec<CatalogItem> {
    data.items
        .into_iter()
        .map(|raw| {
            let (poster, thumbnail) = poster_refs(raw.image);
            CatalogItem {
                id: raw.id,
                title: raw.title,
                year: non_empty(raw.year),
                poster,
                thumbnail,
                crew: non_empty(raw.crew),
            }
        })
        .collect()
}

fn map_detail(data: TitleResponse) -> CatalogItemDetail {
    let (poster, thumbnail) = poster_refs(data.image);
    let crew = non_empty(data.stars.clone());
    CatalogItemDetail {
        item: CatalogItem {
            id: data.id,
            title: data.title,
            year: non_empty(data.year),
            poster,
            thumbnail,
            crew,
        },
        plot: data.plot.unwrap_or_default(),
        awards: data.awards.unwrap_or_default(),
        directors: split_list(data.directors.as_deref()),
        writers: split_list(data.writers.as_deref()),
        stars: split_list(data.stars.as_deref()),
        genres: split_list(data.genres.as_deref()),
        companies: split_list(data.companies.as_deref()),
        content_rating: non_empty(data.content_rating),
        rating: non_empty(data.imdb_rating).and_then(|r| r.trim().parse().ok()),
        critic_score: non_empty(data.metacritic_rating).and_then(|r| r.trim().parse().ok()),
        tagline: non_empty(data.tagline),
    }
}

fn map_search(data: SearchResponse) -> Vec<SearchResult> {
    data.results
        .into_iter()
        .map(|raw| {
            let (poster, thumbnail) = poster_refs(raw.image);
            SearchResult {
                id: raw.id,
                title: raw.title,
                description: raw.description.unwrap_or_default(),
                poster,
                thumbnail,
            }
        })
        .collect()
}

fn map_images(data: PostersResponse) -> TitleImages {
    let refs = |list: Vec<RawImage>| {
        list.into_iter()
            .filter_map(|i| non_empty(i.link))
            .map(PosterImageRef::new)
            .collect::<Vec<_>>()
    };
    TitleImages {
        posters: refs(data.posters),
        backdrops: refs(data.backdrops),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
