//! Asset movements and their per-movement price enrichment.

use crate::domain::{AssetId, AssetSymbol, Decimal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a movement's fiat price came from.
///
/// Later inference passes may only replace a price with one of equal or
/// higher priority (Pass 2 of the pricing engine is the documented
/// exception).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceSource {
    /// Trade executed directly against USD; authoritative.
    ExchangeExecution,
    /// Trade executed against a non-USD fiat; awaits FX normalization.
    FiatExecutionTentative,
    /// Derived from the priced opposite leg of a simple trade.
    DerivedRatio,
    /// Copied across a confirmed transfer link.
    LinkPropagated,
    /// Fetched from historical market data by an external enricher.
    DerivedHistory,
}

impl PriceSource {
    /// Relative confidence used by overwrite rules. Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            PriceSource::ExchangeExecution => 3,
            PriceSource::DerivedRatio => 2,
            PriceSource::LinkPropagated => 2,
            PriceSource::DerivedHistory => 1,
            PriceSource::FiatExecutionTentative => 0,
        }
    }
}

/// Price granularity of the backing data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceGranularity {
    /// Exact execution data.
    Exact,
    /// Hourly candle.
    Hour,
    /// Daily candle.
    Day,
}

/// A fiat price attached to a single asset movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAtTxTime {
    /// Unit price amount.
    pub amount: Decimal,
    /// Currency the price is denominated in (e.g. "USD").
    pub currency: AssetSymbol,
    /// How the price was obtained.
    pub source: PriceSource,
    /// When the price was attached.
    pub fetched_at: DateTime<Utc>,
    /// Granularity of the backing data point.
    pub granularity: PriceGranularity,
}

impl PriceAtTxTime {
    /// Execution-exact price in the given currency.
    pub fn execution(amount: Decimal, currency: AssetSymbol, source: PriceSource) -> Self {
        PriceAtTxTime {
            amount,
            currency,
            source,
            fetched_at: Utc::now(),
            granularity: PriceGranularity::Exact,
        }
    }

    /// Identity price for a fiat movement: 1 unit of itself.
    pub fn fiat_identity(currency: AssetSymbol) -> Self {
        let source = if currency.is_usd() {
            PriceSource::ExchangeExecution
        } else {
            PriceSource::FiatExecutionTentative
        };
        PriceAtTxTime {
            amount: Decimal::one(),
            currency: currency.clone(),
            source,
            fetched_at: Utc::now(),
            granularity: PriceGranularity::Exact,
        }
    }

    /// Copy of this price with a different source tag.
    pub fn retagged(&self, source: PriceSource) -> Self {
        PriceAtTxTime {
            source,
            ..self.clone()
        }
    }
}

/// One directional quantity of one asset within a transaction.
///
/// `amount` is gross; `net_amount`, when present, is the amount after
/// on-chain/platform fees and is preferred for matching and lot math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMovement {
    pub asset_id: AssetId,
    pub asset_symbol: AssetSymbol,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_at_tx_time: Option<PriceAtTxTime>,
}

impl AssetMovement {
    /// Create a movement with just asset and gross amount.
    pub fn new(asset_id: AssetId, asset_symbol: AssetSymbol, amount: Decimal) -> Self {
        AssetMovement {
            asset_id,
            asset_symbol,
            amount,
            net_amount: None,
            from_address: None,
            to_address: None,
            price_at_tx_time: None,
        }
    }

    /// Net amount when present, else gross.
    pub fn effective_amount(&self) -> Decimal {
        self.net_amount.unwrap_or(self.amount)
    }

    /// True when no price is attached yet.
    pub fn is_unpriced(&self) -> bool {
        self.price_at_tx_time.is_none()
    }

    /// Attach a price, consuming self (builder style).
    pub fn with_price(mut self, price: PriceAtTxTime) -> Self {
        self.price_at_tx_time = Some(price);
        self
    }

    /// Attach a net amount, consuming self (builder style).
    pub fn with_net_amount(mut self, net: Decimal) -> Self {
        self.net_amount = Some(net);
        self
    }
}
