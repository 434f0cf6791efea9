use std::collections::BTreeMap;
use std::sync::Arc;

/// Configuration map handed to a guest. Ordered, so identical inputs
/// always produce an identical map.
pub type ConfigMap = BTreeMap<String, String>;

/// Static configuration fixed at startup.
///
/// Immutable once built and cheap to clone into each invocation; merging
/// never touches the shared map.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    entries: Arc<ConfigMap>,
}

impl StaticConfig {
    pub fn new(entries: ConfigMap) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies the static map and overlays `overrides` in order. An override
    /// replaces a static entry with the same key; when an override key
    /// repeats, the last value wins.
    pub fn merge<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> ConfigMap
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut merged = (*self.entries).clone();
        for (key, value) in overrides {
            merged.insert(key.into(), value.into());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StaticConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Override pairs from a raw query string (`a=1&b=two`), percent-decoded.
pub fn query_overrides(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}
