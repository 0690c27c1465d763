//! Injected instrument lookups: tradable asset symbols and timeframe
//! labels. The default tables cover the common OTC pairs; callers with a
//! fresher instrument list construct their own catalog and pass it in.

use std::collections::{BTreeMap, BTreeSet};

/// Default tradable symbols.
const DEFAULT_ASSETS: &[&str] = &[
    "EURUSD_otc",
    "GBPUSD_otc",
    "USDJPY_otc",
    "AUDUSD_otc",
    "USDCAD_otc",
    "USDCHF_otc",
    "NZDUSD_otc",
    "EURGBP_otc",
    "EURJPY_otc",
    "GBPJPY_otc",
    "AUDJPY_otc",
    "EURUSD",
    "GBPUSD",
    "USDJPY",
    "AUDUSD",
    "BTCUSD_otc",
    "ETHUSD_otc",
    "XAUUSD_otc",
    "XAGUSD_otc",
];

/// Timeframe label to seconds.
const DEFAULT_TIMEFRAMES: &[(&str, u32)] = &[
    ("5s", 5),
    ("15s", 15),
    ("30s", 30),
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1800),
    ("1h", 3600),
    ("4h", 14400),
    ("1d", 86400),
];

/// Validated set of tradable symbols.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    symbols: BTreeSet<String>,
}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AssetCatalog {
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_valid(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Timeframe label resolution.
#[derive(Debug, Clone)]
pub struct Timeframes {
    labels: BTreeMap<String, u32>,
}

impl Default for Timeframes {
    fn default() -> Self {
        Self {
            labels: DEFAULT_TIMEFRAMES
                .iter()
                .map(|(label, seconds)| (label.to_string(), *seconds))
                .collect(),
        }
    }
}

impl Timeframes {
    pub fn to_seconds(&self, label: &str) -> Option<u32> {
        self.labels.get(label).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_knows_common_otc_pairs() {
        let catalog = AssetCatalog::default();
        assert!(catalog.is_valid("EURUSD_otc"));
        assert!(catalog.is_valid("BTCUSD_otc"));
        assert!(!catalog.is_valid("DOGEMOON_otc"));
    }

    #[test]
    fn custom_catalog_replaces_defaults() {
        let catalog = AssetCatalog::from_symbols(["ONLYTHIS"]);
        assert!(catalog.is_valid("ONLYTHIS"));
        assert!(!catalog.is_valid("EURUSD_otc"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn timeframe_labels_resolve_to_seconds() {
        let timeframes = Timeframes::default();
        assert_eq!(timeframes.to_seconds("1m"), Some(60));
        assert_eq!(timeframes.to_seconds("1h"), Some(3600));
        assert_eq!(timeframes.to_seconds("7q"), None);
    }
}
