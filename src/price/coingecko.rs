use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::{PriceSnapshot, PriceSource, TokenIdentity};
use crate::rpc::{REQUEST_TIMEOUT, http_client};

const WEBSITE: &str = "https://www.coingecko.com";

#[derive(Deserialize)]
struct CoinListEntry {
    id: String,
    symbol: String,
    name: String,
}

#[derive(Deserialize)]
struct CoinData {
    #[serde(default)]
    market_cap_rank: Option<u32>,
    market_data: MarketData,
}

type CurrencyMap<T> = HashMap<String, Option<T>>;

#[derive(Deserialize, Default)]
#[serde(default)]
struct MarketData {
    current_price: CurrencyMap<f64>,
    high_24h: CurrencyMap<f64>,
    low_24h: CurrencyMap<f64>,
    market_cap: CurrencyMap<f64>,
    price_change_percentage_1h_in_currency: CurrencyMap<f64>,
    price_change_percentage_24h_in_currency: CurrencyMap<f64>,
    ath_change_percentage: CurrencyMap<f64>,
    total_volume: CurrencyMap<f64>,
    ath: CurrencyMap<f64>,
    ath_date: CurrencyMap<DateTime<Utc>>,
}

fn pick<T: Copy>(map: &CurrencyMap<T>, currency: &str) -> Option<T> {
    map.get(currency).copied().flatten()
}

fn pick_decimal(map: &CurrencyMap<f64>, currency: &str) -> Option<Decimal> {
    pick(map, currency).and_then(Decimal::from_f64)
}

/// Prices from the public CoinGecko REST API.
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(CoinGeckoSource {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("CoinGecko request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("CoinGecko rejected {url}"))?
            .json()
            .await
            .with_context(|| format!("Malformed CoinGecko response from {url}"))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn list_tokens(&self) -> Result<Vec<TokenIdentity>> {
        let coins: Vec<CoinListEntry> = self.get_json("/coins/list").await?;
        Ok(coins
            .into_iter()
            .map(|coin| TokenIdentity {
                id: coin.id,
                name: coin.name,
                symbol: coin.symbol,
                slug: None,
            })
            .collect())
    }

    async fn get_price(&self, token: &TokenIdentity, currency: &str) -> Result<PriceSnapshot> {
        let path = format!(
            "/coins/{}?localization=false&tickers=false&community_data=false&developer_data=false",
            token.id
        );
        let data: CoinData = self.get_json(&path).await?;
        let market = &data.market_data;
        let currency = currency.to_lowercase();

        Ok(PriceSnapshot {
            token: token.clone(),
            market_cap_rank: data.market_cap_rank,
            current_price: pick_decimal(&market.current_price, &currency),
            high_24h: pick_decimal(&market.high_24h, &currency),
            low_24h: pick_decimal(&market.low_24h, &currency),
            market_cap: pick_decimal(&market.market_cap, &currency),
            price_change_percentage_1h: pick(&market.price_change_percentage_1h_in_currency, &currency),
            price_change_percentage_24h: pick(
                &market.price_change_percentage_24h_in_currency,
                &currency,
            ),
            price_change_percentage_ath: pick(&market.ath_change_percentage, &currency),
            total_volume: pick_decimal(&market.total_volume, &currency),
            ath_price: pick_decimal(&market.ath, &currency),
            ath_date: pick(&market.ath_date, &currency),
            created_at: Utc::now(),
            currency,
        })
    }

    fn token_link(&self, token: &TokenIdentity) -> Option<String> {
        Some(format!("{WEBSITE}/en/coins/{}", token.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_tokens() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/coins/list")
            .with_body(
                r#"[{"id":"ethereum","symbol":"eth","name":"Ethereum"},
                    {"id":"usd-coin","symbol":"usdc","name":"USDC"}]"#,
            )
            .create_async()
            .await;

        let source = CoinGeckoSource::new(&server.url()).unwrap();
        let tokens = source.list_tokens().await.unwrap();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].id, "usd-coin");
        assert_eq!(tokens[1].symbol, "usdc");
    }

    #[tokio::test]
    async fn test_get_price_reads_requested_currency() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/coins/ethereum")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{
                    "id": "ethereum",
                    "market_cap_rank": 2,
                    "market_data": {
                        "current_price": {"usd": 2000.5, "eur": 1800.0},
                        "high_24h": {"usd": 2100.0},
                        "low_24h": {"usd": null},
                        "market_cap": {"usd": 240000000000.0},
                        "price_change_percentage_24h_in_currency": {"usd": -1.25},
                        "ath": {"usd": 4878.26},
                        "ath_date": {"usd": "2021-11-10T14:24:19.604Z"}
                    }
                }"#,
            )
            .create_async()
            .await;

        let source = CoinGeckoSource::new(&server.url()).unwrap();
        let token = TokenIdentity {
            id: "ethereum".to_string(),
            name: "Ethereum".to_string(),
            symbol: "eth".to_string(),
            slug: None,
        };

        let snapshot = source.get_price(&token, "USD").await.unwrap();

        assert_eq!(snapshot.currency, "usd");
        assert_eq!(snapshot.market_cap_rank, Some(2));
        assert_eq!(snapshot.current_price, Decimal::from_f64(2000.5));
        assert_eq!(snapshot.low_24h, None);
        assert_eq!(snapshot.price_change_percentage_24h, Some(-1.25));
        assert_eq!(snapshot.price_change_percentage_1h, None);
        assert!(snapshot.ath_date.is_some());
        assert_eq!(
            source.token_link(&token).as_deref(),
            Some("https://www.coingecko.com/en/coins/ethereum")
        );
    }

    #[tokio::test]
    async fn test_get_price_fails_on_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/coins/ethereum")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let source = CoinGeckoSource::new(&server.url()).unwrap();
        let token = TokenIdentity {
            id: "ethereum".to_string(),
            name: "Ethereum".to_string(),
            symbol: "eth".to_string(),
            slug: None,
        };
        assert!(source.get_price(&token, "usd").await.is_err());
    }

    #[tokio::test]
    async fn test_get_price_fails_when_api_stalls() {
        let url = crate::rpc::tests::stalled_server().await;
        let source = CoinGeckoSource::with_timeout(&url, Duration::from_millis(200)).unwrap();
        let token = TokenIdentity {
            id: "ethereum".to_string(),
            name: "Ethereum".to_string(),
            symbol: "eth".to_string(),
            slug: None,
        };

        let result = tokio::time::timeout(Duration::from_secs(5), source.get_price(&token, "usd"))
            .await
            .expect("stalled price request should fail rather than hang");
        assert!(result.is_err());
    }
}
