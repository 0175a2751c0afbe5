// src/transform/overrides.rs

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Fallback explorer URLs for assets the feed publishes without one.
static BUILTIN: Lazy<OverrideTable> = Lazy::new(|| {
    OverrideTable::new([
        ("gatetoken", "https://gatechain.io/"),
        ("dydx", "https://dydx.foundation/"),
    ])
});

/// Read-only asset id → URL lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideTable {
    urls: BTreeMap<String, String>,
}

impl OverrideTable {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            urls: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> &'static OverrideTable {
        &BUILTIN
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.urls.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
