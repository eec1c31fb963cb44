//! Renders parsed transactions into webhook messages and sends them.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{EndpointConfig, WalletConfig};
use crate::format::{format_fiat, format_token, truncate};
use crate::rpc::{REQUEST_TIMEOUT, http_client};
use crate::parser::{TransactionDisplayBundle, TransactionRecord, TransactionType};
use crate::price::{PriceCache, PriceError};

const EMBED_COLOR: u32 = 0x2ecc71;
const DESCRIPTION_LIMIT: usize = 4096;
const FOOTER: &str = "wallet-watcher";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub color: u32,
    pub timestamp: String,
    pub footer: EmbedFooter,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

/// Where rendered messages go.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, webhook_url: &str, message: &WebhookMessage) -> Result<()>;
}

/// Posts messages to Discord webhooks.
pub struct DiscordWebhook {
    client: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(DiscordWebhook {
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn send(&self, webhook_url: &str, message: &WebhookMessage) -> Result<()> {
        self.client
            .post(webhook_url)
            .json(message)
            .send()
            .await
            .context("Webhook request failed")?
            .error_for_status()
            .context("Webhook rejected the message")?;
        Ok(())
    }
}

/// The legs of one bundle that share a direction and a token.
struct LegGroup<'a> {
    kind: TransactionType,
    symbol: &'a str,
    records: Vec<&'a TransactionRecord>,
}

impl LegGroup<'_> {
    /// Saturates instead of overflowing on absurd token amounts.
    fn total(&self) -> Decimal {
        self.records
            .iter()
            .fold(Decimal::ZERO, |total, r| total.saturating_add(r.amount))
    }

    fn by_counterparty(&self) -> BTreeMap<Address, Decimal> {
        let mut totals = BTreeMap::new();
        for record in &self.records {
            let total = totals.entry(record.counterparty).or_insert(Decimal::ZERO);
            *total = total.saturating_add(record.amount);
        }
        totals
    }

    fn new_balance(&self) -> Option<Decimal> {
        self.records.last().map(|r| r.new_balance)
    }
}

/// Groups records by (direction, symbol), keeping first-seen order.
fn group_records(records: &[TransactionRecord]) -> Vec<LegGroup<'_>> {
    let mut groups: Vec<LegGroup<'_>> = Vec::new();
    for record in records {
        match groups
            .iter_mut()
            .find(|g| g.kind == record.kind && g.symbol.eq_ignore_ascii_case(&record.symbol))
        {
            Some(group) => group.records.push(record),
            None => groups.push(LegGroup {
                kind: record.kind,
                symbol: &record.symbol,
                records: vec![record],
            }),
        }
    }
    groups
}

pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    prices: Arc<PriceCache>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, prices: Arc<PriceCache>) -> Self {
        Notifier { sink, prices }
    }

    /// Renders and sends one message for the bundle. Send failures are logged
    /// and dropped.
    pub async fn notify(
        &self,
        bundle: &TransactionDisplayBundle,
        wallet: &WalletConfig,
        endpoint: &EndpointConfig,
    ) {
        let message = self.render(bundle, endpoint).await;

        match self.sink.send(&wallet.webhook_url, &message).await {
            Ok(()) => info!(
                wallet = %wallet.name,
                endpoint = %endpoint.name,
                tx = %bundle.transaction_hash,
                legs = bundle.records.len(),
                "Sent notification"
            ),
            Err(e) => error!(
                wallet = %wallet.name,
                endpoint = %endpoint.name,
                tx = %bundle.transaction_hash,
                "Failed to send notification: {:#}",
                e
            ),
        }
    }

    /// Price of a symbol in the cache's currency, zero when the symbol has no price.
    async fn unit_price(&self, symbol: &str) -> Decimal {
        match self.prices.get_price(symbol, &[]).await {
            Ok(view) => view.current_price().unwrap_or_default(),
            Err(PriceError::TokenNotFound(_)) => {
                debug!(symbol, "No price data for token, valuing at zero");
                Decimal::ZERO
            }
            Err(e) => {
                warn!(symbol, "Price lookup failed, valuing at zero: {}", e);
                Decimal::ZERO
            }
        }
    }

    /// Formats `amount × price` in the price currency. A product too large to
    /// represent is shown as zero.
    fn value(&self, amount: Decimal, price: Decimal) -> String {
        let value = amount.checked_mul(price).unwrap_or_else(|| {
            debug!(%amount, %price, "Value overflows, showing zero");
            Decimal::ZERO
        });
        format_fiat(value, self.prices.currency())
    }

    pub async fn render(
        &self,
        bundle: &TransactionDisplayBundle,
        endpoint: &EndpointConfig,
    ) -> WebhookMessage {
        let mut description = String::new();

        for group in group_records(&bundle.records) {
            let total = group.total();
            let price = self.unit_price(group.symbol).await;
            let preposition = match group.kind {
                TransactionType::Send => "To",
                TransactionType::Receive => "From",
            };

            let _ = writeln!(
                description,
                "**{}:** {} {} ({})",
                group.kind,
                format_token(total),
                group.symbol,
                self.value(total, price)
            );
            for (counterparty, amount) in group.by_counterparty() {
                let _ = writeln!(
                    description,
                    "**{}:** {} · {} {} ({})",
                    preposition,
                    counterparty,
                    format_token(amount),
                    group.symbol,
                    self.value(amount, price)
                );
            }
            if let Some(balance) = group.new_balance() {
                let _ = writeln!(
                    description,
                    "**New total:** {} {} ({})",
                    format_token(balance),
                    group.symbol,
                    self.value(balance, price)
                );
            }
            description.push('\n');
        }

        let native_price = self.unit_price(&endpoint.native_token).await;
        let gas = EmbedField {
            name: "Gas Used".to_string(),
            value: format!(
                "{} {} (≈ {})",
                bundle.gas_cost.normalize(),
                endpoint.native_token,
                self.value(bundle.gas_cost, native_price)
            ),
            inline: true,
        };

        WebhookMessage {
            content: None,
            embeds: vec![Embed {
                title: bundle.title.clone(),
                description: truncate(description.trim_end(), DESCRIPTION_LIMIT),
                url: bundle.url.clone(),
                color: EMBED_COLOR,
                timestamp: Utc::now().to_rfc3339(),
                footer: EmbedFooter {
                    text: FOOTER.to_string(),
                },
                fields: vec![gas],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::{OTHER, endpoint, wallet};
    use crate::price::tests::source_with_prices;
    use alloy_primitives::TxHash;
    use std::str::FromStr;

    fn record(kind: TransactionType, counterparty: Address, amount: &str, symbol: &str) -> TransactionRecord {
        TransactionRecord {
            kind,
            counterparty,
            amount: Decimal::from_str(amount).unwrap(),
            symbol: symbol.to_string(),
            new_balance: Decimal::from(10),
            additional_data: None,
        }
    }

    fn bundle(records: Vec<TransactionRecord>) -> TransactionDisplayBundle {
        TransactionDisplayBundle {
            title: "New Treasury Transaction".to_string(),
            records,
            url: Some("https://etherscan.io/tx/0x01".to_string()),
            gas_cost: Decimal::from_str("0.000021").unwrap(),
            transaction_hash: TxHash::repeat_byte(1),
        }
    }

    async fn prices() -> Arc<PriceCache> {
        prices_in("usd").await
    }

    async fn prices_in(currency: &str) -> Arc<PriceCache> {
        Arc::new(
            PriceCache::load(Arc::new(source_with_prices()), currency)
                .await
                .unwrap(),
        )
    }

    #[test]
    fn test_group_records_by_kind_and_symbol() {
        let third = Address::repeat_byte(0xcc);
        let records = vec![
            record(TransactionType::Send, OTHER, "1", "USDC"),
            record(TransactionType::Send, third, "2", "ETH"),
            record(TransactionType::Send, OTHER, "3", "usdc"),
            record(TransactionType::Receive, OTHER, "4", "USDC"),
        ];

        let groups = group_records(&records);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].total(), Decimal::from(4));
        assert_eq!(groups[0].by_counterparty().len(), 1);
        assert_eq!(groups[1].symbol, "ETH");
        assert_eq!(groups[2].kind, TransactionType::Receive);
    }

    #[tokio::test]
    async fn test_render_values_legs_and_gas() {
        let notifier = Notifier::new(Arc::new(MockNotificationSink::new()), prices().await);
        let bundle = bundle(vec![
            record(TransactionType::Send, OTHER, "1.5", "ETH"),
            record(TransactionType::Send, Address::repeat_byte(0xcc), "0.5", "ETH"),
        ]);

        let message = notifier.render(&bundle, &endpoint()).await;
        let embed = &message.embeds[0];

        assert_eq!(embed.title, "New Treasury Transaction");
        assert_eq!(embed.url.as_deref(), Some("https://etherscan.io/tx/0x01"));
        assert_eq!(embed.color, 0x2ecc71);
        assert!(embed.description.contains("**Send:** 2.0000 ETH ($4,000.00)"));
        assert!(embed.description.contains("1.5000 ETH ($3,000.00)"));
        assert!(embed.description.contains("**New total:** 10.0000 ETH ($20,000.00)"));
        assert_eq!(embed.fields[0].name, "Gas Used");
        assert_eq!(embed.fields[0].value, "0.000021 ETH (≈ $0.04)");
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_valued_at_zero() {
        let mut sink = MockNotificationSink::new();
        sink.expect_send()
            .withf(|url, message| {
                url == "http://hooks.local"
                    && message.embeds[0]
                        .description
                        .contains("**Receive:** 12.0000 SHIB ($0.00)")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let notifier = Notifier::new(Arc::new(sink), prices().await);

        let bundle = bundle(vec![record(TransactionType::Receive, OTHER, "12", "SHIB")]);
        notifier.notify(&bundle, &wallet(), &endpoint()).await;
    }

    #[tokio::test]
    async fn test_huge_amounts_render_without_panicking() {
        let notifier = Notifier::new(Arc::new(MockNotificationSink::new()), prices().await);
        let mut huge = record(TransactionType::Receive, OTHER, "1000000000000000000000000000", "ETH");
        huge.new_balance = Decimal::MAX;

        let message = notifier.render(&bundle(vec![huge]), &endpoint()).await;
        let description = &message.embeds[0].description;

        assert!(description.contains(
            "**Receive:** 1,000,000,000,000,000,000,000,000,000.0000 ETH ($0.00)"
        ));
        assert!(description.contains(
            "**New total:** 79,228,162,514,264,337,593,543,950,335.0000 ETH ($0.00)"
        ));
    }

    #[tokio::test]
    async fn test_group_totals_saturate_instead_of_overflowing() {
        let notifier = Notifier::new(Arc::new(MockNotificationSink::new()), prices().await);
        let mut first = record(TransactionType::Receive, OTHER, "0", "SHIB");
        first.amount = Decimal::MAX;
        let records = vec![first.clone(), first];

        assert_eq!(group_records(&records)[0].total(), Decimal::MAX);

        let message = notifier.render(&bundle(records), &endpoint()).await;
        assert!(message.embeds[0].description.contains(
            "**Receive:** 79,228,162,514,264,337,593,543,950,335.0000 SHIB ($0.00)"
        ));
    }

    #[tokio::test]
    async fn test_values_use_the_configured_currency() {
        let notifier = Notifier::new(Arc::new(MockNotificationSink::new()), prices_in("eur").await);
        let bundle = bundle(vec![record(TransactionType::Send, OTHER, "1", "ETH")]);

        let message = notifier.render(&bundle, &endpoint()).await;
        let embed = &message.embeds[0];

        assert!(embed.description.contains("**Send:** 1.0000 ETH (2,000.00 EUR)"));
        assert_eq!(embed.fields[0].value, "0.000021 ETH (≈ 0.04 EUR)");
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let mut sink = MockNotificationSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("discord unavailable")));
        let notifier = Notifier::new(Arc::new(sink), prices().await);

        let bundle = bundle(vec![record(TransactionType::Send, OTHER, "1", "ETH")]);
        notifier.notify(&bundle, &wallet(), &endpoint()).await;
    }

    #[tokio::test]
    async fn test_discord_webhook_posts_embed_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/webhook")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Regex(
                r#""title":"New Treasury Transaction".*"color":3066993"#.to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let notifier = Notifier::new(Arc::new(DiscordWebhook::new().unwrap()), prices().await);
        let message = notifier
            .render(&bundle(vec![record(TransactionType::Send, OTHER, "1", "ETH")]), &endpoint())
            .await;

        DiscordWebhook::new()
            .unwrap()
            .send(&format!("{}/webhook", server.url()), &message)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_discord_webhook_reports_rejections() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/webhook")
            .with_status(400)
            .create_async()
            .await;

        let message = WebhookMessage {
            content: Some("hi".to_string()),
            embeds: vec![],
        };
        let result = DiscordWebhook::new()
            .unwrap()
            .send(&format!("{}/webhook", server.url()), &message)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discord_webhook_gives_up_on_stalled_server() {
        let url = crate::rpc::tests::stalled_server().await;
        let message = WebhookMessage {
            content: Some("hi".to_string()),
            embeds: vec![],
        };

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            DiscordWebhook::with_timeout(Duration::from_millis(200))
                .unwrap()
                .send(&url, &message),
        )
        .await
        .expect("stalled webhook should fail rather than hang");
        assert!(result.is_err());
    }
}
