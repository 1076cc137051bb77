//! Property resolution and access control (§4.4, §4.5).
//!
//! No teacher file implements anything like this — waPC has no notion of typed, path-addressed
//! properties — so this module is built directly from the spec's resolution order and access
//! matrix, using `serde_json::Value` (already a teacher dependency) as the polymorphic value
//! representation per the "tagged variant" design note in §9.

use std::collections::HashMap;

use serde_json::Value;
use url::Url;

use crate::abi::HookKind;
use crate::headers::HeaderMap;

/// A property value: string, number, boolean, array, object, or null.
pub type PropertyValue = Value;

fn normalize_path(path: &str) -> String {
    path.replace('\0', ".")
}

/// Flat-keyed user property storage plus a nested tree assembled from every flat key's
/// dot-segments, so a path one level deeper than any flat key (e.g. reading `user.name` after
/// only `user` was ever set to a JSON object) still resolves (§4.4 resolution order, step 4).
#[derive(Debug, Default, Clone)]
pub struct PropertyStore {
    flat: HashMap<String, Value>,
    tree: Value,
}

impl PropertyStore {
    pub fn new() -> Self {
        PropertyStore {
            flat: HashMap::new(),
            tree: Value::Object(Default::default()),
        }
    }

    /// Records a user property. NULs in `path` are mapped to dots before storage, so
    /// `resolve(p) == resolve(p with NULs replaced by '.')` holds by construction.
    pub fn set(&mut self, path: &str, value: Value) {
        let normalized = normalize_path(path);
        self.flat.insert(normalized.clone(), value.clone());
        insert_nested(&mut self.tree, &normalized, value);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get_flat(path).is_some() || self.get_nested(path).is_some()
    }

    /// Step 1 of resolution: a direct flat key always wins over a nested path.
    pub fn get_flat(&self, path: &str) -> Option<&Value> {
        let normalized = normalize_path(path);
        self.flat.get(&normalized).or_else(|| self.flat.get(path))
    }

    /// Step 4 of resolution: split on NUL (preferred) or dot, skip empty segments, walk the
    /// assembled tree.
    pub fn get_nested(&self, path: &str) -> Option<&Value> {
        let segments = split_segments(path);
        if segments.is_empty() {
            return None;
        }
        let mut cur = &self.tree;
        for seg in segments {
            cur = cur.get(seg)?;
        }
        Some(cur)
    }

    /// The nested tree assembled from every flat key, for diagnostic/reporting snapshots.
    pub fn snapshot(&self) -> Value {
        self.tree.clone()
    }
}

fn split_segments(path: &str) -> Vec<&str> {
    let sep: char = if path.contains('\0') { '\0' } else { '.' };
    path.split(sep).filter(|s| !s.is_empty()).collect()
}

fn insert_nested(tree: &mut Value, normalized_path: &str, value: Value) {
    let segments: Vec<&str> = normalized_path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return;
    }
    let mut cur = tree;
    for seg in &segments[..segments.len() - 1] {
        if !cur.is_object() {
            *cur = Value::Object(Default::default());
        }
        cur = cur
            .as_object_mut()
            .unwrap()
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Default::default());
    }
    cur.as_object_mut()
        .unwrap()
        .insert(segments.last().unwrap().to_string(), value);
}

/// For every custom property path written by the guest, records which hook first created it.
///
/// Invariant enforced by the access-control layer: a property created in request-headers is
/// only visible within request-headers; one created in any later hook remains visible for the
/// rest of the run.
#[derive(Debug, Default, Clone)]
pub struct CustomPropertyRegistry {
    created_in: HashMap<String, HookKind>,
}

impl CustomPropertyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_if_new(&mut self, path: &str, hook: HookKind) {
        let normalized = normalize_path(path);
        self.created_in.entry(normalized).or_insert(hook);
    }

    pub fn created_in(&self, path: &str) -> Option<HookKind> {
        self.created_in.get(&normalize_path(path)).copied()
    }

    /// Request→response boundary purge (§4.5): drop every property first created in
    /// request-headers, from both the registry and the backing store.
    pub fn purge_request_headers_scoped(&mut self, store: &mut PropertyStore) {
        let doomed: Vec<String> = self
            .created_in
            .iter()
            .filter(|(_, hook)| **hook == HookKind::RequestHeaders)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.created_in.remove(&path);
            store.flat.remove(&path);
        }
    }
}

/// The components extracted from a request URL (§4.4).
#[derive(Debug, Clone, Default)]
pub struct UrlParts {
    pub url: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub scheme: String,
    pub extension: String,
}

impl UrlParts {
    /// Extracts url/host/path/query/scheme/extension per §4.4. On parse failure the url is kept
    /// as-is, host falls back to `localhost`, path to `/`, and the rest to empty.
    pub fn extract(raw_url: &str) -> Self {
        match Url::parse(raw_url) {
            Ok(parsed) => {
                let scheme = parsed.scheme().to_string();
                let default_port = default_port_for_scheme(&scheme);
                let host = match (parsed.host_str(), parsed.port()) {
                    (Some(h), Some(p)) if Some(p) != default_port => format!("{}:{}", h, p),
                    (Some(h), _) => h.to_string(),
                    (None, _) => "localhost".to_string(),
                };
                let path = if parsed.path().is_empty() {
                    "/".to_string()
                } else {
                    parsed.path().to_string()
                };
                let query = parsed.query().unwrap_or("").to_string();
                let extension = extract_extension(&path);
                UrlParts {
                    url: raw_url.to_string(),
                    host,
                    path,
                    query,
                    scheme,
                    extension,
                }
            }
            Err(_) => UrlParts {
                url: raw_url.to_string(),
                host: "localhost".to_string(),
                path: "/".to_string(),
                query: String::new(),
                scheme: String::new(),
                extension: String::new(),
            },
        }
    }
}

fn default_port_for_scheme(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Substring after the last `.` in the final path segment, only when that `.` is neither at the
/// start nor the end of the segment (hidden files and trailing dots yield empty).
fn extract_extension(path: &str) -> String {
    let last_segment = path.rsplit('/').next().unwrap_or("");
    match last_segment.rfind('.') {
        Some(idx) if idx > 0 && idx < last_segment.len() - 1 => last_segment[idx + 1..].to_string(),
        _ => String::new(),
    }
}

/// Per-hook access level for a built-in property path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    NotAccessible,
}

const GEO_PROPERTIES: &[&str] = &[
    "request.country",
    "request.city",
    "request.asn",
    "request.geo.lat",
    "request.geo.long",
    "request.region",
    "request.continent",
    "request.country.name",
];

const ROOT_ID_ALIASES: &[&str] = &[
    "root_id",
    "plugin_name",
    "plugin_root_id",
    "root_context",
    "root_context_id",
];

/// Looks up the built-in access level for `path` in `hook`, or `None` if `path` is a custom
/// property (not in the whitelist).
///
/// The computed-attribute names from §4.4's resolution order step 2/3 that aren't in the
/// explicit §4.5 matrix table (`request.content_type`, `request.headers.*`, `response.code`,
/// `response.status_code`, `response.code_details`, `response.content_type`,
/// `response.headers.*`, the root-id aliases) are treated as always-read-only built-ins rather
/// than custom properties: they are computed, never guest-authored, so routing them through the
/// custom-property registry would make them permanently unreadable (a custom property must
/// first be *written* to "exist"). This is an explicit Open Question resolution — see
/// DESIGN.md.
pub fn builtin_access(path: &str, hook: HookKind) -> Option<Access> {
    use HookKind::*;

    if matches!(
        path,
        "request.url" | "request.host" | "request.path" | "request.query"
    ) {
        return Some(if hook == RequestHeaders {
            Access::ReadWrite
        } else {
            Access::ReadOnly
        });
    }

    if matches!(path, "request.scheme" | "request.method" | "request.extension" | "request.protocol") {
        return Some(Access::ReadOnly);
    }

    if GEO_PROPERTIES.contains(&path) {
        return Some(Access::ReadOnly);
    }

    if path == "nginx.log_field1" {
        return Some(if hook == RequestHeaders {
            Access::WriteOnly
        } else {
            Access::NotAccessible
        });
    }

    if path == "response.status" {
        return Some(match hook {
            ResponseHeaders | ResponseBody => Access::ReadOnly,
            RequestHeaders | RequestBody => Access::NotAccessible,
        });
    }

    if matches!(
        path,
        "response.code" | "response.status_code" | "response.code_details" | "response.content_type"
    ) {
        return Some(Access::ReadOnly);
    }

    if path == "request.content_type" {
        return Some(Access::ReadOnly);
    }

    if path.starts_with("request.headers.") || path.starts_with("response.headers.") {
        return Some(Access::ReadOnly);
    }

    if ROOT_ID_ALIASES.contains(&path) {
        return Some(Access::ReadOnly);
    }

    None
}

/// A property access denial, ready to be logged and converted into an ABI status by the caller.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    pub path: String,
    pub reason: String,
}

impl AccessDenied {
    /// Message text always contains the exact substring `Property access denied` plus the path,
    /// as required by the testable properties in §8.
    pub fn log_message(&self) -> String {
        format!("Property access denied for \"{}\": {}", self.path, self.reason)
    }
}

/// Checks whether `path` may be read in `hook`, given the current custom-property registry.
pub fn check_read(
    path: &str,
    hook: HookKind,
    registry: &CustomPropertyRegistry,
    exists: bool,
) -> Result<(), AccessDenied> {
    if let Some(access) = builtin_access(path, hook) {
        return match access {
            Access::NotAccessible => Err(AccessDenied {
                path: path.to_string(),
                reason: "not accessible in this hook".to_string(),
            }),
            Access::WriteOnly => Err(AccessDenied {
                path: path.to_string(),
                reason: "write-only".to_string(),
            }),
            Access::ReadOnly | Access::ReadWrite => Ok(()),
        };
    }

    // Custom property.
    if let Some(created_hook) = registry.created_in(path) {
        if created_hook == HookKind::RequestHeaders && hook != HookKind::RequestHeaders {
            return Err(AccessDenied {
                path: path.to_string(),
                reason: format!("created in {}", HookKind::RequestHeaders.name()),
            });
        }
        Ok(())
    } else if exists {
        // Exists in the nested tree but was never individually registered (e.g. a nested
        // sub-path of a value written before any registry tracking existed for it).
        Ok(())
    } else {
        Err(AccessDenied {
            path: path.to_string(),
            reason: "does not exist".to_string(),
        })
    }
}

/// Checks whether `path` may be written in `hook`.
pub fn check_write(
    path: &str,
    hook: HookKind,
    registry: &CustomPropertyRegistry,
) -> Result<(), AccessDenied> {
    if let Some(access) = builtin_access(path, hook) {
        return match access {
            Access::NotAccessible => Err(AccessDenied {
                path: path.to_string(),
                reason: "not accessible in this hook".to_string(),
            }),
            Access::ReadOnly => Err(AccessDenied {
                path: path.to_string(),
                reason: "read-only".to_string(),
            }),
            Access::WriteOnly | Access::ReadWrite => Ok(()),
        };
    }

    if let Some(created_hook) = registry.created_in(path) {
        if created_hook == HookKind::RequestHeaders && hook != HookKind::RequestHeaders {
            return Err(AccessDenied {
                path: path.to_string(),
                reason: format!("created in {}", HookKind::RequestHeaders.name()),
            });
        }
    }
    Ok(())
}

/// Computed request/response metadata the resolver needs alongside user properties.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub status: Option<u16>,
    pub reason: String,
    pub code_details: String,
}

/// Ties together user properties, the custom-property registry, URL extraction, and computed
/// request/response attributes into the single `resolve`/`set` surface `get_property`/
/// `set_property` call into.
#[derive(Debug, Clone, Default)]
pub struct PropertyResolver {
    pub store: PropertyStore,
    pub registry: CustomPropertyRegistry,
    pub url: UrlParts,
    pub request_method: String,
    pub response: ResponseMeta,
}

impl PropertyResolver {
    pub fn new(url: UrlParts, request_method: String) -> Self {
        PropertyResolver {
            store: PropertyStore::new(),
            registry: CustomPropertyRegistry::new(),
            url,
            request_method,
            response: ResponseMeta::default(),
        }
    }

    /// Records a user-set value, registering the hook of first creation for non-built-in paths.
    ///
    /// Request-metadata paths (`request.path`/`scheme`/`host`/`query`) are URL-backed (§4.4):
    /// a write updates `self.url` directly rather than the flat store, so a later `resolve` keeps
    /// seeing the URL-extracted value rather than a stale flat copy that would otherwise shadow
    /// it forever. `request.path` additionally isn't overwritten by an explicit "/", preserving
    /// the original URL-extracted path.
    pub fn set(&mut self, path: &str, value: Value, hook: HookKind) {
        if builtin_access(path, hook).is_none() {
            self.registry.record_if_new(path, hook);
        }

        match path {
            "request.path" => {
                if let Some(s) = value_as_str(&value) {
                    if s != "/" {
                        self.url.path = s;
                    }
                }
            }
            "request.scheme" => {
                if let Some(s) = value_as_str(&value) {
                    self.url.scheme = s;
                }
            }
            "request.host" => {
                if let Some(s) = value_as_str(&value) {
                    self.url.host = s;
                }
            }
            "request.query" => {
                if let Some(s) = value_as_str(&value) {
                    self.url.query = s;
                }
            }
            _ => self.store.set(path, value),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.store.contains(path) || self.resolve_computed(path, &HeaderMap::new(), &HeaderMap::new()).is_some()
    }

    /// Resolves `path` against user properties, the standard computed attributes, the root-id
    /// aliases, then the nested tree, in that order (§4.4).
    pub fn resolve(
        &self,
        path: &str,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> Option<Value> {
        if let Some(v) = self.store.get_flat(path) {
            return Some(v.clone());
        }
        if let Some(v) = self.resolve_computed(path, request_headers, response_headers) {
            return Some(v);
        }
        if let Some(v) = self.resolve_root_id(path) {
            return Some(v);
        }
        self.store.get_nested(path).cloned()
    }

    fn resolve_computed(
        &self,
        path: &str,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
    ) -> Option<Value> {
        match path {
            "request.method" => Some(Value::String(self.request_method.clone())),
            "request.path" => Some(Value::String(self.url.path.clone())),
            "request.url" => Some(Value::String(self.url.url.clone())),
            "request.host" => Some(Value::String(self.url.host.clone())),
            "request.scheme" | "request.protocol" => Some(Value::String(self.url.scheme.clone())),
            "request.query" => Some(Value::String(self.url.query.clone())),
            "request.extension" => Some(Value::String(self.url.extension.clone())),
            "request.content_type" => Some(Value::String(
                request_headers.get("content-type").unwrap_or("").to_string(),
            )),
            "response.code" | "response.status" | "response.status_code" => {
                self.response.status.map(|s| Value::Number(s.into()))
            }
            "response.code_details" => Some(Value::String(self.response.code_details.clone())),
            "response.content_type" => Some(Value::String(
                response_headers.get("content-type").unwrap_or("").to_string(),
            )),
            _ => {
                if let Some(name) = path.strip_prefix("request.headers.") {
                    return Some(Value::String(
                        request_headers.get(name).unwrap_or("").to_string(),
                    ));
                }
                if let Some(name) = path.strip_prefix("response.headers.") {
                    return Some(Value::String(
                        response_headers.get(name).unwrap_or("").to_string(),
                    ));
                }
                None
            }
        }
    }

    fn resolve_root_id(&self, path: &str) -> Option<Value> {
        if !ROOT_ID_ALIASES.contains(&path) {
            return None;
        }
        const CANDIDATES: &[&str] = &["plugin_name", "name", "root_id"];
        for candidate in CANDIDATES {
            if let Some(Value::String(s)) = self.store.get_flat(candidate) {
                if !s.is_empty() {
                    return Some(Value::String(s.clone()));
                }
            }
        }
        Some(Value::String(String::new()))
    }
}

fn value_as_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_and_dot_paths_resolve_identically() {
        let mut resolver = PropertyResolver::new(UrlParts::default(), "GET".into());
        resolver.set("custom\0nested\0value", Value::String("hi".into()), HookKind::RequestBody);
        let headers = HeaderMap::new();
        assert_eq!(
            resolver.resolve("custom\0nested\0value", &headers, &headers),
            resolver.resolve("custom.nested.value", &headers, &headers)
        );
    }

    #[test]
    fn flat_key_beats_nested_path() {
        let mut store = PropertyStore::new();
        store.set("a", Value::Object(
            [("b".to_string(), Value::String("nested".into()))].into_iter().collect(),
        ));
        store.set("a.b", Value::String("flat".into()));
        assert_eq!(store.get_flat("a.b"), Some(&Value::String("flat".into())));
    }

    #[test]
    fn url_with_only_scheme_falls_back() {
        let parts = UrlParts::extract("https://");
        assert_eq!(parts.host, "localhost");
        assert_eq!(parts.path, "/");
        assert_eq!(parts.extension, "");
    }

    #[test]
    fn extension_ignores_hidden_files_and_trailing_dots() {
        assert_eq!(extract_extension("/a/.hidden"), "");
        assert_eq!(extract_extension("/a/trailing."), "");
        assert_eq!(extract_extension("/a/file.json"), "json");
        assert_eq!(extract_extension("/a/noext"), "");
    }

    #[test]
    fn explicit_slash_path_does_not_overwrite_extracted_path() {
        let mut resolver = PropertyResolver::new(UrlParts::extract("https://example.com/already/set"), "GET".into());
        resolver.set("request.path", Value::String("/".into()), HookKind::RequestHeaders);
        assert_eq!(resolver.url.path, "/already/set");
    }

    #[test]
    fn explicit_slash_path_write_is_reflected_through_resolve() {
        let mut resolver = PropertyResolver::new(UrlParts::extract("https://example.com/already/set"), "GET".into());
        resolver.set("request.path", Value::String("/".into()), HookKind::RequestHeaders);
        let headers = HeaderMap::new();
        assert_eq!(
            resolver.resolve("request.path", &headers, &headers),
            Some(Value::String("/already/set".into()))
        );
    }

    #[test]
    fn request_metadata_write_is_reflected_through_resolve() {
        let mut resolver = PropertyResolver::new(UrlParts::extract("https://example.com/orig"), "GET".into());
        resolver.set("request.path", Value::String("/new/path".into()), HookKind::RequestHeaders);
        let headers = HeaderMap::new();
        assert_eq!(
            resolver.resolve("request.path", &headers, &headers),
            Some(Value::String("/new/path".into()))
        );
    }

    #[test]
    fn custom_property_created_in_request_headers_is_scoped() {
        let mut registry = CustomPropertyRegistry::new();
        registry.record_if_new("custom.req", HookKind::RequestHeaders);
        assert!(check_read("custom.req", HookKind::RequestHeaders, &registry, true).is_ok());
        assert!(check_read("custom.req", HookKind::ResponseHeaders, &registry, true).is_err());
    }

    #[test]
    fn custom_property_created_later_stays_visible() {
        let mut registry = CustomPropertyRegistry::new();
        registry.record_if_new("custom.body", HookKind::RequestBody);
        assert!(check_read("custom.body", HookKind::ResponseHeaders, &registry, true).is_ok());
    }

    #[test]
    fn builtin_read_only_denies_write() {
        assert!(check_write("request.method", HookKind::RequestHeaders, &CustomPropertyRegistry::new()).is_err());
    }

    #[test]
    fn response_status_not_accessible_in_request_hooks() {
        assert_eq!(
            builtin_access("response.status", HookKind::RequestHeaders),
            Some(Access::NotAccessible)
        );
    }

    #[test]
    fn purge_removes_only_request_headers_scoped_properties() {
        let mut resolver = PropertyResolver::new(UrlParts::default(), "GET".into());
        resolver.set("custom.req", Value::String("1".into()), HookKind::RequestHeaders);
        resolver.set("custom.body", Value::String("2".into()), HookKind::RequestBody);
        resolver.registry.purge_request_headers_scoped(&mut resolver.store);
        assert!(resolver.store.get_flat("custom.req").is_none());
        assert_eq!(
            resolver.store.get_flat("custom.body"),
            Some(&Value::String("2".into()))
        );
    }
}
