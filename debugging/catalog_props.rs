//! Fetch a title from the catalog API and print the mapped records.
//! Usage:
//!   cargo run --bin catalog_props -- popular <movies|tv>
//!   cargo run --bin catalog_props -- title <imdb_id>
//!   cargo run --bin catalog_props -- search <query>
//! Requires IMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use movietime::catalog::{CatalogApi, CatalogClient};
use movietime::config::Config;
use movietime::models::ContentType;
use serde_json::json;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let mut args = env::args().skip(1);
    let command = args.next().context("missing command (popular | title | search)")?;
    let argument = args.collect::<Vec<_>>().join(" ");

    let config = Config::from_env()?;
    let client = CatalogClient::new(&config.base_url, &config.api_key)?;

    let output = match command.as_str() {
        "popular" => {
            let kind: ContentType = argument.parse()?;
            let items = client.popular(kind).await?;
            json!({ "count": items.len(), "items": items })
        }
        "title" => {
            anyhow::ensure!(!argument.is_empty(), "missing imdb id");
            let (detail, images) =
                tokio::join!(client.detail(&argument), client.images(&argument));
            json!({
                "detail": detail?,
                "images": images.ok(),
            })
        }
        "search" => {
            anyhow::ensure!(!argument.is_empty(), "missing query");
            let results = client.search(&argument).await?;
            let partial = results.iter().map(|r| r.to_partial_item()).collect::<Vec<_>>();
            json!({ "results": results, "as_items": partial })
        }
        other => anyhow::bail!("unknown command '{}'", other),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
