//! Positional parsing of `/rates/...` request paths.

use crate::currency::normalize_symbol;
use crate::error::{AppError, Result};

pub const VALID_FORMATS: &str =
    "/rates, /rates/{crypto}, /rates/{crypto}/{fiat}, /rates/history/{crypto}/{fiat}";

const HISTORY_MARKER: &str = "history";
const MAX_SEGMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateRoute {
    All,
    ForCrypto { crypto: String },
    Pair { crypto: String, fiat: String },
    History { crypto: String, fiat: String },
}

impl RateRoute {
    /// Resolves a request path into one of the four query shapes.
    ///
    /// Symbols come back normalized. `/rates/history/BTC` is a pair lookup for
    /// the crypto `HISTORY`, which then fails validation like any other unknown
    /// symbol.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let segments: Vec<&str> = trimmed.split('/').collect();

        if segments.len() > MAX_SEGMENTS {
            return Err(AppError::BadPath("Too many parameters".to_string()));
        }
        if segments.first() != Some(&"rates") {
            return Err(AppError::BadPath(format!("Unknown resource {path}")));
        }
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(AppError::BadPath("Empty path segment".to_string()));
        }

        match &segments[1..] {
            [] => Ok(RateRoute::All),
            [crypto] => Ok(RateRoute::ForCrypto {
                crypto: normalize_symbol(crypto),
            }),
            [crypto, fiat] => Ok(RateRoute::Pair {
                crypto: normalize_symbol(crypto),
                fiat: normalize_symbol(fiat),
            }),
            [marker, crypto, fiat] if marker.eq_ignore_ascii_case(HISTORY_MARKER) => {
                Ok(RateRoute::History {
                    crypto: normalize_symbol(crypto),
                    fiat: normalize_symbol(fiat),
                })
            }
            _ => Err(AppError::BadPath("Invalid parameters".to_string())),
        }
    }

    /// Low-cardinality name of the shape, used as a metric label.
    pub fn shape(&self) -> &'static str {
        match self {
            RateRoute::All => "rates_all",
            RateRoute::ForCrypto { .. } => "rates_crypto",
            RateRoute::Pair { .. } => "rates_pair",
            RateRoute::History { .. } => "rates_history",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(path: &str) -> RateRoute {
        RateRoute::parse(path).unwrap_or_else(|e| panic!("{path} should parse: {e}"))
    }

    fn assert_bad(path: &str) {
        match RateRoute::parse(path) {
            Err(AppError::BadPath(_)) => {}
            other => panic!("{path} should be rejected, got {other:?}"),
        }
    }

    #[test]
    fn parses_the_four_shapes() {
        assert_eq!(parse_ok("/rates"), RateRoute::All);
        assert_eq!(
            parse_ok("/rates/btc"),
            RateRoute::ForCrypto {
                crypto: "BTC".into()
            }
        );
        assert_eq!(
            parse_ok("/rates/BTC/usd"),
            RateRoute::Pair {
                crypto: "BTC".into(),
                fiat: "USD".into()
            }
        );
        assert_eq!(
            parse_ok("/rates/history/eth/EUR"),
            RateRoute::History {
                crypto: "ETH".into(),
                fiat: "EUR".into()
            }
        );
    }

    #[test]
    fn history_marker_with_two_segments_is_a_pair() {
        assert_eq!(
            parse_ok("/rates/history/BTC"),
            RateRoute::Pair {
                crypto: "HISTORY".into(),
                fiat: "BTC".into()
            }
        );
    }

    #[test]
    fn shape_ignores_symbols() {
        assert_eq!(parse_ok("/rates/btc").shape(), "rates_crypto");
        assert_eq!(parse_ok("/rates/XYZ").shape(), "rates_crypto");
        assert_eq!(parse_ok("/rates/history/BTC/USD").shape(), "rates_history");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_bad("/");
        assert_bad("");
        assert_bad("/prices/BTC");
        assert_bad("/rates/");
        assert_bad("/rates//USD");
        assert_bad("/rates/BTC/USD/extra");
        assert_bad("/rates/history/BTC/USD/extra");
    }
}
