//! Header buffer codec (§4.3).
//!
//! `HeaderMap` is the in-memory representation of a proxy-wasm header map: an ordered mapping
//! from lowercase name to a single string value. The binary wire format is bit-exact with the
//! one the guest expects (and the one
//! `examples/other_examples/.../proxy-wasm-rust-sdk/src/hostcalls.rs` encodes/decodes from the
//! guest side via `serialize_map`/`deserialize_map`): a `u32` pair count, then `(key_len,
//! val_len)` pairs, then the NUL-terminated key/value bytes themselves.

use std::fmt;

/// An ordered, lowercase-keyed header map.
///
/// Insertion order is preserved so `serialize` round-trips deterministically, which the
/// testable properties in the spec rely on (`deserialize_binary(serialize(normalize(M))) ==
/// normalize(M)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    pairs: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from arbitrary key/value pairs, normalizing as it goes.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.pairs.push((k.into().to_lowercase(), v.into()));
        }
        map
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Adds a value under `key`. If the key already has a value, the new value is appended to
    /// the existing one separated by a comma (§6 header manipulation details) — this does not
    /// disambiguate from a value that already contains a comma, a known ambiguity the spec
    /// inherits from the wire protocol rather than resolves (Open Question (b)).
    pub fn add(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        if let Some((_, existing)) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            *existing = format!("{},{}", existing, value);
        } else {
            self.pairs.push((key, value.to_string()));
        }
    }

    /// Overwrites any existing value for `key`, or inserts it if absent.
    pub fn replace(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        if let Some((_, existing)) = self.pairs.iter_mut().find(|(k, _)| *k == key) {
            *existing = value.to_string();
        } else {
            self.pairs.push((key, value.to_string()));
        }
    }

    /// Removes every entry for `key`, if present.
    pub fn remove(&mut self, key: &str) {
        let key = key.to_lowercase();
        self.pairs.retain(|(k, _)| *k != key);
    }

    /// Lowercases every key in place; values are left as-is. Both guest-supplied and
    /// caller-supplied maps are normalized this way on ingress and egress.
    pub fn normalize(&mut self) {
        for (k, _) in self.pairs.iter_mut() {
            *k = k.to_lowercase();
        }
    }

    /// Serializes to the proxy-wasm binary header format described in §6.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.pairs.len() as u32).to_le_bytes());
        for (k, v) in &self.pairs {
            out.extend_from_slice(&(k.len() as u32).to_le_bytes());
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        }
        for (k, v) in &self.pairs {
            out.extend_from_slice(k.as_bytes());
            out.push(0);
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        out
    }

    /// Parses the binary header format, or `None` if `bytes` isn't well-formed as one (too
    /// short, a length overrun) — lets the caller fall back to the text payload instead of
    /// silently treating malformed binary input as an empty map.
    pub fn try_deserialize_binary(bytes: &[u8]) -> Option<Self> {
        let mut map = HeaderMap::new();
        if bytes.len() < 4 {
            return None;
        }
        let count = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let mut lens = Vec::with_capacity(count);
        let mut cursor = 4usize;
        for _ in 0..count {
            if cursor + 8 > bytes.len() {
                return None;
            }
            let key_len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            let val_len =
                u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            lens.push((key_len, val_len));
            cursor += 8;
        }
        for (key_len, val_len) in lens {
            if cursor + key_len + 1 + val_len + 1 > bytes.len() {
                return None;
            }
            let key = String::from_utf8_lossy(&bytes[cursor..cursor + key_len]).into_owned();
            cursor += key_len + 1; // skip NUL
            let val = String::from_utf8_lossy(&bytes[cursor..cursor + val_len]).into_owned();
            cursor += val_len + 1; // skip NUL
            map.pairs.push((key.to_lowercase(), val));
        }
        Some(map)
    }

    /// Parses the binary header format. Malformed input (too short, length overruns) yields an
    /// empty map rather than panicking — the marshaler never raises on bad guest input.
    pub fn deserialize_binary(bytes: &[u8]) -> Self {
        Self::try_deserialize_binary(bytes).unwrap_or_default()
    }

    /// Parses the NUL-separated alternating key/value text payload accepted as a fallback by
    /// `proxy_set_header_map_pairs`. A trailing lone key takes value `""`; empty tokens are
    /// skipped.
    pub fn deserialize_text(payload: &str) -> Self {
        let mut map = HeaderMap::new();
        let tokens: Vec<&str> = payload.split('\0').filter(|t| !t.is_empty()).collect();
        let mut iter = tokens.into_iter();
        while let Some(key) = iter.next() {
            let value = iter.next().unwrap_or("");
            map.pairs.push((key.to_lowercase(), value.to_string()));
        }
        map
    }

    /// Parses `bytes` as the binary header format, falling back to the NUL-separated text payload
    /// (`deserialize_text`) when it isn't well-formed binary — the dual-format input
    /// `proxy_set_header_map_pairs` accepts (§6).
    pub fn deserialize_binary_or_text(bytes: &[u8]) -> Self {
        match Self::try_deserialize_binary(bytes) {
            Some(map) => map,
            None => Self::deserialize_text(&String::from_utf8_lossy(bytes)),
        }
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.pairs {
            writeln!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = std::vec::IntoIter<(&'a str, &'a str)>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter().collect::<Vec<_>>().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_serializes_to_four_zero_bytes() {
        let map = HeaderMap::new();
        assert_eq!(map.serialize(), 0u32.to_le_bytes().to_vec());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn round_trips_through_binary_format() {
        let mut map = HeaderMap::new();
        map.add("Content-Type", "application/json");
        map.add("X-Empty", "");
        let bytes = map.serialize();
        let decoded = HeaderMap::deserialize_binary(&bytes);
        assert_eq!(decoded, map);
        assert_eq!(decoded.get("content-type"), Some("application/json"));
        assert_eq!(decoded.get("x-empty"), Some(""));
    }

    #[test]
    fn normalize_lowercases_keys_only() {
        let mut map = HeaderMap::from_pairs([("X-Foo", "Bar")]);
        map.normalize();
        assert_eq!(map.get("x-foo"), Some("Bar"));
    }

    #[test]
    fn add_concatenates_existing_value() {
        let mut map = HeaderMap::new();
        map.add("x-trace", "a");
        map.add("x-trace", "b");
        assert_eq!(map.get("x-trace"), Some("a,b"));
    }

    #[test]
    fn replace_overwrites() {
        let mut map = HeaderMap::new();
        map.add("x-trace", "a");
        map.replace("x-trace", "b");
        assert_eq!(map.get("x-trace"), Some("b"));
    }

    #[test]
    fn remove_deletes_entry() {
        let mut map = HeaderMap::from_pairs([("x-trace", "a")]);
        map.remove("x-trace");
        assert_eq!(map.get("x-trace"), None);
    }

    #[test]
    fn deserialize_text_handles_trailing_lone_key() {
        let map = HeaderMap::deserialize_text("a\0b\0c");
        assert_eq!(map.get("a"), Some("b"));
        assert_eq!(map.get("c"), Some(""));
    }

    #[test]
    fn deserialize_text_skips_empty_tokens() {
        let map = HeaderMap::deserialize_text("\0\0a\0b\0");
        assert_eq!(map.get("a"), Some("b"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn deserialize_binary_or_text_prefers_binary() {
        let mut map = HeaderMap::new();
        map.add("x-trace", "a");
        let bytes = map.serialize();
        assert_eq!(HeaderMap::deserialize_binary_or_text(&bytes), map);
    }

    #[test]
    fn deserialize_binary_or_text_falls_back_on_malformed_binary() {
        let map = HeaderMap::deserialize_binary_or_text(b"a\0b\0c");
        assert_eq!(map.get("a"), Some("b"));
        assert_eq!(map.get("c"), Some(""));
    }
}
