//! Case-insensitive multi-valued string map.
//!
//! Used for HTTP headers, query parameters, form attributes and event bus
//! delivery headers. Keys compare ASCII case-insensitively and keep the
//! casing of their first insertion; values keep insertion order.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Multi-valued map keyed by case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiMap {
    entries: Vec<(String, String)>,
}

impl MultiMap {
    /// Creates an empty map.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the first value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns all values for `name`, in insertion order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Returns `true` if at least one value exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Adds a value, keeping existing values for the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Replaces all values for `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
        self
    }

    /// Removes all values for `name`.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns distinct names, in first-insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (key, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(key)) {
                names.push(key.as_str());
            }
        }
        names
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of `(name, value)` pairs.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses an `application/x-www-form-urlencoded` string.
    ///
    /// Pairs without `=` map to an empty value; `+` decodes to a space.
    /// Undecodable pairs are kept verbatim.
    #[must_use]
    pub fn from_urlencoded(input: &str) -> Self {
        let mut map = Self::new();
        for pair in input.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.add(decode_component(name), decode_component(value));
        }
        map
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(spaced)
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.add(k, v);
        }
        map
    }
}

/// Serializes as an object of name to value, repeated names collapsed to the last value.
impl Serialize for MultiMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let flat: BTreeMap<&str, &str> = self.iter().collect();
        flat.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MultiMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flat = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(flat.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut map = MultiMap::new();
        map.add("Content-Type", "text/plain");
        assert_eq!(map.get("content-type"), Some("text/plain"));
        assert!(map.contains("CONTENT-TYPE"));
    }

    #[test]
    fn test_multiple_values() {
        let mut map = MultiMap::new();
        map.add("Accept", "a").add("accept", "b");
        assert_eq!(map.get_all("ACCEPT"), vec!["a", "b"]);
        assert_eq!(map.names(), vec!["Accept"]);

        map.set("accept", "c");
        assert_eq!(map.get_all("Accept"), vec!["c"]);
    }

    #[test]
    fn test_from_urlencoded() {
        let map = MultiMap::from_urlencoded("a=1&b=hello+world&c&a=%C3%A9");
        assert_eq!(map.get_all("a"), vec!["1", "é"]);
        assert_eq!(map.get("b"), Some("hello world"));
        assert_eq!(map.get("c"), Some(""));
    }

    #[test]
    fn test_serde_round_trip() {
        let map: MultiMap = [("x", "1"), ("y", "2")].into_iter().collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"x":"1","y":"2"}"#);
        let back: MultiMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
