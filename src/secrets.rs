//! Secret and dictionary lookup (§4.6 FastEdge extensions, §6 wire schema).
//!
//! No teacher precedent for either type; both are simple runner-owned maps the host functions
//! only ever read, following the same ownership shape the teacher gives `ModuleState` in
//! `examples/tearust-wapc-rust/src/modreg.rs` (state built once outside the hot path, shared
//! read-only into host function closures).

use std::collections::HashMap;

use serde_json::Value;

/// One rotation record for a secret: the value in effect from `effective_at` onward.
#[derive(Debug, Clone)]
pub struct SecretVersion {
    pub value: String,
    pub effective_at: u64,
}

/// A single secret's rotation history, kept sorted by `effective_at` ascending.
#[derive(Debug, Clone, Default)]
struct SecretHistory {
    versions: Vec<SecretVersion>,
}

impl SecretHistory {
    fn push(&mut self, version: SecretVersion) {
        let pos = self
            .versions
            .binary_search_by_key(&version.effective_at, |v| v.effective_at)
            .unwrap_or_else(|i| i);
        self.versions.insert(pos, version);
    }

    /// The version with the largest `effective_at <= at`, or `None` if every version is still in
    /// the future.
    fn at(&self, at: u64) -> Option<&SecretVersion> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.effective_at <= at)
    }

    fn latest(&self) -> Option<&SecretVersion> {
        self.versions.last()
    }
}

/// Host-side secret store backing `proxy_get_secret`/`proxy_get_effective_at_secret`.
///
/// Built once at startup (or reloaded between runs) from a configured secrets source and shared
/// read-only across every hook invocation.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: HashMap<String, SecretHistory>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a flat name-to-value map with no rotation history — every secret takes effect at
    /// time 0. Used by the config loader for the common single-version case.
    pub fn from_flat(values: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut store = SecretStore::new();
        for (name, value) in values {
            store.add_version(&name, SecretVersion { value, effective_at: 0 });
        }
        store
    }

    pub fn add_version(&mut self, name: &str, version: SecretVersion) {
        self.secrets.entry(name.to_string()).or_default().push(version);
    }

    /// Parses the secret schema accepted at construction (§6): a JSON object mapping each key to
    /// either a bare string (takes effect at time 0) or an ordered list of `{value, effectiveAt}`
    /// records. Entries that don't match either shape are skipped and logged rather than
    /// rejecting the whole document — CONFIG_PARSE_FAILURE (§7) is per-entry, never fatal.
    pub fn from_json(document: &Value) -> Self {
        let mut store = SecretStore::new();
        let Some(object) = document.as_object() else {
            log::debug!("secrets document is not a JSON object, ignoring");
            return store;
        };
        for (key, value) in object {
            match value {
                Value::String(s) => store.add_version(key, SecretVersion { value: s.clone(), effective_at: 0 }),
                Value::Array(versions) => {
                    for entry in versions {
                        match (entry.get("value").and_then(Value::as_str), entry.get("effectiveAt").and_then(Value::as_u64)) {
                            (Some(v), Some(at)) => {
                                store.add_version(key, SecretVersion { value: v.to_string(), effective_at: at })
                            }
                            _ => log::debug!("ignoring malformed secret version for {:?}: {}", key, entry),
                        }
                    }
                }
                other => log::debug!("ignoring secret {:?} with unsupported shape: {}", key, other),
            }
        }
        store
    }

    /// Reads and parses a secrets document from `path`. A missing file, unreadable file, or
    /// malformed JSON yields an empty store — logged at debug level, never fatal (§7
    /// CONFIG_PARSE_FAILURE).
    pub fn load_from_path(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(document) => Self::from_json(&document),
                Err(e) => {
                    log::debug!("secrets file {:?} is not valid JSON, ignoring: {}", path, e);
                    SecretStore::new()
                }
            },
            Err(e) => {
                log::debug!("could not read secrets file {:?}, ignoring: {}", path, e);
                SecretStore::new()
            }
        }
    }

    /// Latest secret value as of `now`, matching `proxy_get_secret` (always "current time").
    pub fn get(&self, name: &str, now: u64) -> Option<&str> {
        self.secrets
            .get(name)
            .and_then(|history| history.at(now))
            .map(|v| v.value.as_str())
    }

    /// Value in effect at an arbitrary `at`, matching `proxy_get_effective_at_secret`.
    pub fn get_effective_at(&self, name: &str, at: u64) -> Option<&str> {
        self.secrets
            .get(name)
            .and_then(|history| history.at(at))
            .map(|v| v.value.as_str())
    }

    /// Unconditionally the newest version regardless of `at`, used by `proxy_secret_get`'s
    /// "latest, no time argument" variant (§6).
    pub fn get_latest(&self, name: &str) -> Option<&str> {
        self.secrets
            .get(name)
            .and_then(|history| history.latest())
            .map(|v| v.value.as_str())
    }
}

/// Plain key-value lookup backing `proxy_dictionary_get`. No rotation, no access control.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: HashMap<String, String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flat(values: impl IntoIterator<Item = (String, String)>) -> Self {
        Dictionary { entries: values.into_iter().collect() }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|v| v.as_str())
    }

    /// Parses a flat JSON object of string values. Non-string values and a non-object document
    /// are skipped/ignored rather than rejected outright, matching `SecretStore::from_json`'s
    /// tolerance.
    pub fn from_json(document: &Value) -> Self {
        let mut dict = Dictionary::new();
        let Some(object) = document.as_object() else {
            log::debug!("dictionary document is not a JSON object, ignoring");
            return dict;
        };
        for (key, value) in object {
            match value.as_str() {
                Some(s) => {
                    dict.entries.insert(key.clone(), s.to_string());
                }
                None => log::debug!("ignoring non-string dictionary entry {:?}", key),
            }
        }
        dict
    }

    /// Reads and parses a dictionary document from `path`, tolerating a missing file or
    /// malformed JSON the same way `SecretStore::load_from_path` does.
    pub fn load_from_path(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(document) => Self::from_json(&document),
                Err(e) => {
                    log::debug!("dictionary file {:?} is not valid JSON, ignoring: {}", path, e);
                    Dictionary::new()
                }
            },
            Err(e) => {
                log::debug!("could not read dictionary file {:?}, ignoring: {}", path, e);
                Dictionary::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_picks_the_largest_effective_at_not_exceeding_now() {
        let mut store = SecretStore::new();
        store.add_version("api_key", SecretVersion { value: "v1".into(), effective_at: 100 });
        store.add_version("api_key", SecretVersion { value: "v2".into(), effective_at: 200 });
        store.add_version("api_key", SecretVersion { value: "v3".into(), effective_at: 300 });

        assert_eq!(store.get("api_key", 250), Some("v2"));
        assert_eq!(store.get("api_key", 50), None);
        assert_eq!(store.get("api_key", 1000), Some("v3"));
    }

    #[test]
    fn versions_inserted_out_of_order_still_sort_correctly() {
        let mut store = SecretStore::new();
        store.add_version("k", SecretVersion { value: "late".into(), effective_at: 500 });
        store.add_version("k", SecretVersion { value: "early".into(), effective_at: 10 });
        assert_eq!(store.get_effective_at("k", 10), Some("early"));
        assert_eq!(store.get_latest("k"), Some("late"));
    }

    #[test]
    fn unknown_secret_returns_none() {
        let store = SecretStore::new();
        assert_eq!(store.get("missing", 0), None);
    }

    #[test]
    fn dictionary_is_a_plain_lookup() {
        let dict = Dictionary::from_flat([("region".to_string(), "eu-west".to_string())]);
        assert_eq!(dict.get("region"), Some("eu-west"));
        assert_eq!(dict.get("missing"), None);
    }

    #[test]
    fn parses_bare_string_and_rotation_list_from_json() {
        let document = serde_json::json!({
            "bare": "plain-value",
            "rotated": [
                {"value": "old", "effectiveAt": 1000},
                {"value": "new", "effectiveAt": 2000},
            ],
        });
        let store = SecretStore::from_json(&document);
        assert_eq!(store.get("bare", 0), Some("plain-value"));
        assert_eq!(store.get("rotated", 1500), Some("old"));
        assert_eq!(store.get("rotated", 2500), Some("new"));
        assert_eq!(store.get_effective_at("rotated", 500), None);
    }

    #[test]
    fn skips_malformed_secret_entries_without_failing_the_whole_document() {
        let document = serde_json::json!({
            "good": "ok",
            "bad": [{"value": "missing effectiveAt"}],
            "worse": 42,
        });
        let store = SecretStore::from_json(&document);
        assert_eq!(store.get("good", 0), Some("ok"));
        assert_eq!(store.get("bad", 0), None);
        assert_eq!(store.get("worse", 0), None);
    }

    #[test]
    fn dictionary_from_json_ignores_non_string_values() {
        let document = serde_json::json!({"region": "eu-west", "count": 3});
        let dict = Dictionary::from_json(&document);
        assert_eq!(dict.get("region"), Some("eu-west"));
        assert_eq!(dict.get("count"), None);
    }
}
