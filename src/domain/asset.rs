//! Asset identity and fiat/stablecoin classification.

use serde::{Deserialize, Serialize};

/// Fiat currency codes recognized for execution-price derivation.
const FIAT_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "CAD", "AUD", "JPY", "CHF", "NZD", "SEK", "NOK", "DKK", "PLN", "SGD",
    "HKD",
];

/// Assets treated as fiat-pegged for the crypto-crypto override pass.
const STABLECOINS: &[&str] = &[
    "USDT", "USDC", "DAI", "BUSD", "TUSD", "USDP", "GUSD", "FDUSD", "PYUSD", "EURT", "EURC",
];

/// Canonical asset identifier (e.g. "bitcoin", "eth:0xdac1...").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    /// Create an AssetId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        AssetId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display symbol for an asset (e.g. "BTC", "ETH", "USD").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetSymbol(pub String);

impl AssetSymbol {
    /// Create an AssetSymbol from a string.
    pub fn new(symbol: impl Into<String>) -> Self {
        AssetSymbol(symbol.into())
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this symbol is a recognized fiat currency.
    pub fn is_fiat(&self) -> bool {
        FIAT_CURRENCIES
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&self.0))
    }

    /// True when this symbol is a recognized fiat-pegged stablecoin.
    pub fn is_stablecoin(&self) -> bool {
        STABLECOINS.iter().any(|c| c.eq_ignore_ascii_case(&self.0))
    }

    /// True for fiat or stablecoin, the assets excluded from the
    /// crypto-crypto execution override.
    pub fn is_fiat_or_stablecoin(&self) -> bool {
        self.is_fiat() || self.is_stablecoin()
    }

    /// True when this symbol is USD.
    pub fn is_usd(&self) -> bool {
        self.0.eq_ignore_ascii_case("USD")
    }
}

impl std::fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
