use crate::catalog::DEFAULT_BASE_URL;
use crate::session::{Pricing, DEFAULT_RENTAL_DAYS, DEFAULT_UNIT_PRICE_CENTS};
use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3147;
const MAX_RENTAL_DAYS: i64 = 365;
const MAX_UNIT_PRICE_CENTS: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub data_dir: PathBuf,
    pub pricing: Pricing,
    pub api_token: Option<String>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("IMDB_API_KEY").context("IMDB_API_KEY not set")?;
        let base_url = get("IMDB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let data_dir = get("MOVIETIME_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let unit_price_cents = parse_or(
            "MOVIETIME_UNIT_PRICE_CENTS",
            get("MOVIETIME_UNIT_PRICE_CENTS"),
            DEFAULT_UNIT_PRICE_CENTS,
        )?;
        let rental_days = parse_or(
            "MOVIETIME_RENTAL_DAYS",
            get("MOVIETIME_RENTAL_DAYS"),
            DEFAULT_RENTAL_DAYS,
        )?;
        if !(1..=MAX_RENTAL_DAYS).contains(&rental_days) {
            return Err(anyhow!(
                "MOVIETIME_RENTAL_DAYS must be between 1 and {}",
                MAX_RENTAL_DAYS
            ));
        }
        if unit_price_cents > MAX_UNIT_PRICE_CENTS {
            return Err(anyhow!(
                "MOVIETIME_UNIT_PRICE_CENTS must be at most {}",
                MAX_UNIT_PRICE_CENTS
            ));
        }
        let port = parse_or("MOVIETIME_PORT", get("MOVIETIME_PORT"), DEFAULT_PORT)?;

        Ok(Self {
            api_key,
            base_url,
            data_dir,
            pricing: Pricing {
                unit_price_cents,
                rental_duration: Duration::days(rental_days),
            },
            api_token: get("MOVIETIME_API_TOKEN"),
            port,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} has an invalid value: '{}'", key, v)),
        None => Ok(default),
    }
}
