//! Currency registry vocabulary shared by the router, the stores and the refresh job.

use std::fmt;

/// Symbols seeded into the crypto registry.
pub const DEFAULT_CRYPTOS: &[&str] = &[
    "BTC", "ETH", "USDT", "DOGE", "BNB", "USDC", "XRP", "ADA", "LTC", "SOL",
];

/// Symbols seeded into the fiat registry.
pub const DEFAULT_FIATS: &[&str] = &[
    "USD", "EUR", "JPY", "GBP", "CAD", "CNY", "HKD", "KRW", "INR", "BRL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CurrencyKind {
    Crypto,
    Fiat,
}

impl CurrencyKind {
    /// Registry table. Always a constant, never derived from request input.
    pub fn table(self) -> &'static str {
        match self {
            CurrencyKind::Crypto => "cryptocurrencies",
            CurrencyKind::Fiat => "fiat_currencies",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            CurrencyKind::Crypto => "cryptocurrency_id",
            CurrencyKind::Fiat => "fiat_currency_id",
        }
    }
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyKind::Crypto => write!(f, "crypto"),
            CurrencyKind::Fiat => write!(f, "fiat"),
        }
    }
}

/// Canonical form of a ticker: trimmed and upper case.
///
/// Every lookup and every insert goes through this, so `btc`, `Btc` and `BTC`
/// all address the same registry row.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
