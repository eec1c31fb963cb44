//! USD pricing for notification values.
//!
//! [`PriceCache`] resolves a token key (id, symbol, name or slug) to a
//! [`TokenIdentity`] and serves price snapshots that are refreshed lazily once
//! they are older than [`PRICE_TTL`].

mod coingecko;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

pub use coingecko::CoinGeckoSource;

pub const PRICE_TTL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum PriceError {
    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub token: TokenIdentity,
    pub currency: String,
    pub market_cap_rank: Option<u32>,
    pub current_price: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub price_change_percentage_1h: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub price_change_percentage_ath: Option<f64>,
    pub total_volume: Option<Decimal>,
    pub ath_price: Option<Decimal>,
    pub ath_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The price-data collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn list_tokens(&self) -> anyhow::Result<Vec<TokenIdentity>>;

    async fn get_price(&self, token: &TokenIdentity, currency: &str) -> anyhow::Result<PriceSnapshot>;

    fn token_link(&self, token: &TokenIdentity) -> Option<String>;
}

/// A snapshot as handed to callers, with optional price ratios to other tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceView {
    pub snapshot: PriceSnapshot,
    pub token_link: Option<String>,
    /// Uppercase symbol of the other token → price of this token in that token.
    pub relations: HashMap<String, Option<Decimal>>,
}

impl PriceView {
    pub fn current_price(&self) -> Option<Decimal> {
        self.snapshot.current_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.snapshot.created_at
    }

    /// `None` when either side has no usable price.
    pub fn relation_to(&self, other: &PriceSnapshot) -> Option<Decimal> {
        let own = self.snapshot.current_price.unwrap_or_default();
        let other = other.current_price.unwrap_or_default();
        if own.is_zero() || other.is_zero() {
            return None;
        }
        own.checked_div(other)
    }
}

struct CachedPrice {
    snapshot: PriceSnapshot,
    fetched_at: Instant,
}

/// Token lookup plus a TTL price cache.
///
/// Every read-or-refresh runs inside one lock covering the whole cache, so at
/// most one upstream price request is in flight per cache, for any token.
pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    currency: String,
    lookup: HashMap<String, TokenIdentity>,
    prices: Mutex<HashMap<String, CachedPrice>>,
}

impl PriceCache {
    /// Loads the token list once and indexes it by id, then symbol, then name,
    /// then slug. The first token to claim a key keeps it.
    pub async fn load(source: Arc<dyn PriceSource>, currency: &str) -> Result<Self, PriceError> {
        let tokens = source.list_tokens().await?;
        let mut lookup = HashMap::new();

        let key_sets: [fn(&TokenIdentity) -> Option<&str>; 4] = [
            |t| Some(t.id.as_str()),
            |t| Some(t.symbol.as_str()),
            |t| Some(t.name.as_str()),
            |t| t.slug.as_deref(),
        ];
        for key_of in key_sets {
            for token in &tokens {
                if let Some(key) = key_of(token) {
                    lookup
                        .entry(key.to_lowercase())
                        .or_insert_with(|| token.clone());
                }
            }
        }

        info!(
            tokens = tokens.len(),
            keys = lookup.len(),
            "Loaded price token list"
        );

        Ok(PriceCache {
            source,
            currency: currency.to_lowercase(),
            lookup,
            prices: Mutex::new(HashMap::new()),
        })
    }

    /// Lowercase currency code every snapshot is priced in.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn token_exists(&self, key: &str) -> bool {
        self.lookup.contains_key(&key.to_lowercase())
    }

    pub fn token(&self, key: &str) -> Result<&TokenIdentity, PriceError> {
        self.lookup
            .get(&key.to_lowercase())
            .ok_or_else(|| PriceError::TokenNotFound(key.to_string()))
    }

    pub async fn get_price(&self, key: &str, relations: &[&str]) -> Result<PriceView, PriceError> {
        let mut prices = self.prices.lock().await;

        let token = self.token(key)?;
        let snapshot = self.cached_or_fetch(&mut prices, token).await?;

        let mut view = PriceView {
            token_link: self.source.token_link(token),
            snapshot,
            relations: HashMap::new(),
        };

        for relation in relations {
            let Ok(other) = self.token(relation) else {
                continue;
            };
            if other.id == token.id {
                continue;
            }
            let other_snapshot = self.cached_or_fetch(&mut prices, other).await?;
            let ratio = view.relation_to(&other_snapshot);
            view.relations
                .insert(other_snapshot.token.symbol.to_uppercase(), ratio);
        }

        Ok(view)
    }

    async fn cached_or_fetch(
        &self,
        prices: &mut HashMap<String, CachedPrice>,
        token: &TokenIdentity,
    ) -> Result<PriceSnapshot, PriceError> {
        if let Some(cached) = prices.get(&token.id) {
            if cached.fetched_at.elapsed() < PRICE_TTL {
                return Ok(cached.snapshot.clone());
            }
        }

        debug!(token = %token.id, "Refreshing price");
        let snapshot = self.source.get_price(token, &self.currency).await?;
        prices.insert(
            token.id.clone(),
            CachedPrice {
                snapshot: snapshot.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) fn token(id: &str, symbol: &str, name: &str) -> TokenIdentity {
        TokenIdentity {
            id: id.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            slug: None,
        }
    }

    pub(crate) fn snapshot(token: &TokenIdentity, price: &str) -> PriceSnapshot {
        PriceSnapshot {
            token: token.clone(),
            currency: "usd".to_string(),
            market_cap_rank: None,
            current_price: Some(Decimal::from_str(price).unwrap()),
            high_24h: None,
            low_24h: None,
            market_cap: None,
            price_change_percentage_1h: None,
            price_change_percentage_24h: None,
            price_change_percentage_ath: None,
            total_volume: None,
            ath_price: None,
            ath_date: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn default_tokens() -> Vec<TokenIdentity> {
        vec![
            token("ethereum", "eth", "Ethereum"),
            token("usd-coin", "usdc", "USDC"),
            token("bridged-usdc", "usdc", "Bridged USDC"),
        ]
    }

    pub(crate) fn source_with_prices() -> MockPriceSource {
        let mut source = MockPriceSource::new();
        source.expect_list_tokens().returning(|| Ok(default_tokens()));
        source.expect_get_price().returning(|token, _| {
            let price = match token.id.as_str() {
                "ethereum" => "2000",
                "usd-coin" => "1",
                _ => "0",
            };
            Ok(snapshot(token, price))
        });
        source.expect_token_link().returning(|_| None);
        source
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive_and_first_writer_wins() {
        let cache = PriceCache::load(Arc::new(source_with_prices()), "usd")
            .await
            .unwrap();

        assert!(cache.token_exists("ETH"));
        assert!(cache.token_exists("Ethereum"));
        assert!(cache.token_exists("bridged-usdc"));
        assert!(!cache.token_exists("doge"));
        assert_eq!(cache.token("USDC").unwrap().id, "usd-coin");
    }

    #[tokio::test]
    async fn test_id_keys_take_precedence_over_symbols() {
        let mut source = MockPriceSource::new();
        source.expect_list_tokens().returning(|| {
            Ok(vec![token("wrapped", "abc", "Wrapped ABC"), token("abc", "xyz", "ABC Token")])
        });

        let cache = PriceCache::load(Arc::new(source), "usd").await.unwrap();
        assert_eq!(cache.token("abc").unwrap().id, "abc");
        assert_eq!(cache.token("Wrapped ABC").unwrap().id, "wrapped");
    }

    #[tokio::test]
    async fn test_unknown_token_is_a_typed_error() {
        let cache = PriceCache::load(Arc::new(source_with_prices()), "usd")
            .await
            .unwrap();

        let err = cache.get_price("doge", &[]).await.unwrap_err();
        assert!(matches!(err, PriceError::TokenNotFound(key) if key == "doge"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_price_is_cached_for_sixty_seconds() {
        let mut source = MockPriceSource::new();
        source.expect_list_tokens().returning(|| Ok(default_tokens()));
        source
            .expect_get_price()
            .times(2)
            .returning(|token, _| Ok(snapshot(token, "2000")));
        source.expect_token_link().returning(|_| None);
        let cache = PriceCache::load(Arc::new(source), "usd").await.unwrap();

        let first = cache.get_price("eth", &[]).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.get_price("ethereum", &[]).await.unwrap();
        assert_eq!(first.created_at(), second.created_at());

        tokio::time::advance(Duration::from_secs(1)).await;
        let third = cache.get_price("eth", &[]).await.unwrap();
        assert_eq!(third.current_price(), Some(Decimal::from(2000)));
    }

    #[tokio::test]
    async fn test_relations_skip_unknown_and_self_keys() {
        let cache = PriceCache::load(Arc::new(source_with_prices()), "usd")
            .await
            .unwrap();

        let view = cache
            .get_price("eth", &["usdc", "ethereum", "doge"])
            .await
            .unwrap();

        assert_eq!(view.relations.len(), 1);
        assert_eq!(view.relations.get("USDC"), Some(&Some(Decimal::from(2000))));
    }

    #[tokio::test]
    async fn test_relation_to_zero_price_is_absent() {
        let cache = PriceCache::load(Arc::new(source_with_prices()), "usd")
            .await
            .unwrap();

        let view = cache.get_price("eth", &["bridged-usdc"]).await.unwrap();
        assert_eq!(view.relations.get("USDC"), Some(&None));
    }
}
