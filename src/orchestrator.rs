//! Full-flow orchestrator (§4.7): sequences the four HTTP lifecycle hooks around a real
//! downstream HTTP fetch.
//!
//! No teacher equivalent exists — waPC has no notion of an HTTP request/response at all — so
//! this module is built the way `examples/Arend-Jan-chat-gpt-lib-rs/src/client/client.rs` builds
//! and sends requests (a `reqwest::Client` built once, a builder chain, async `.send()`/
//! `.await`), generalized from a single fixed-shape API call to an outbound request whose method,
//! URL, headers and body are all assembled from mutable guest state.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::abi::{HookKind, LogLevel};
use crate::error::{HostError, OrchestratorError};
use crate::headers::HeaderMap;
use crate::hook::{run_hook, HookInput, HookOutcome};
use crate::module::LoadedModule;
use crate::properties::{PropertyResolver, ResponseMeta, UrlParts};

/// The stream context id every hook of one full-flow run shares (§4.1 step 4, §4.7).
const STREAM_CONTEXT_ID: i32 = 1;

/// Content-type prefixes/substrings that mark a downstream response body as binary (§6, §4.7
/// step 7). Bodies matching one of these are base64-encoded in [`FinalResponse`] rather than
/// carried as raw UTF-8.
const BINARY_CONTENT_TYPES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
];

/// One end-to-end request to drive through the four hooks and a downstream fetch.
#[derive(Debug, Clone)]
pub struct FullFlowRequest {
    /// The target URL; also the source of the runtime properties extracted in step 1.
    pub url: String,
    pub method: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FullFlowRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        FullFlowRequest {
            url: url.into(),
            method: method.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

/// One captured log entry, as observed by the caller (§3 `HookResult`).
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: u8,
    pub message: String,
}

/// A point-in-time view of headers/body/properties, taken either before or after a hook runs.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_body: String,
    pub response_body: String,
    pub properties: Value,
}

fn snapshot_of(
    request_headers: &HeaderMap,
    response_headers: &HeaderMap,
    request_body: &[u8],
    response_body: &[u8],
    properties: &PropertyResolver,
) -> Snapshot {
    Snapshot {
        request_headers: request_headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        response_headers: response_headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        request_body: String::from_utf8_lossy(request_body).into_owned(),
        response_body: String::from_utf8_lossy(response_body).into_owned(),
        properties: properties_snapshot(properties),
    }
}

/// Serializes the user-writable property tree plus the URL-extracted fields into one JSON blob,
/// for the `FullFlowResult.properties` snapshot and each `HookResult`'s input/output snapshots.
fn properties_snapshot(properties: &PropertyResolver) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("request.method".to_string(), Value::String(properties.request_method.clone()));
    map.insert("request.url".to_string(), Value::String(properties.url.url.clone()));
    map.insert("request.host".to_string(), Value::String(properties.url.host.clone()));
    map.insert("request.path".to_string(), Value::String(properties.url.path.clone()));
    map.insert("request.query".to_string(), Value::String(properties.url.query.clone()));
    map.insert("request.scheme".to_string(), Value::String(properties.url.scheme.clone()));
    map.insert("request.extension".to_string(), Value::String(properties.url.extension.clone()));
    if let Some(status) = properties.response.status {
        map.insert("response.status".to_string(), Value::Number(status.into()));
    }
    map.insert("user".to_string(), properties.store.snapshot());
    Value::Object(map)
}

/// The observable output of one hook invocation (§3 `HookResult`).
#[derive(Debug, Clone, Serialize)]
pub struct HookResult {
    pub return_code: Option<i32>,
    pub logs: Vec<LogEntry>,
    pub input: Snapshot,
    pub output: Snapshot,
}

/// The final assembled response (§3 `FullFlowResult`).
#[derive(Debug, Clone, Serialize)]
pub struct FinalResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub content_type: String,
    pub is_base64: bool,
}

/// The result of one `run_full_flow` call (§3 `FullFlowResult`).
#[derive(Debug, Clone, Serialize)]
pub struct FullFlowResult {
    pub hook_results: HashMap<String, HookResult>,
    pub final_response: FinalResponse,
    pub properties: Value,
}

/// Drives `request` through the four lifecycle hooks and a real downstream HTTP fetch, per the
/// ten-step sequence in §4.7.
pub async fn run_full_flow(
    module: &LoadedModule,
    request: FullFlowRequest,
    http_client: &reqwest::Client,
    downstream_timeout_ms: u64,
    default_log_level: LogLevel,
) -> Result<FullFlowResult, OrchestratorError> {
    // Step 1: extract runtime properties from the target URL.
    let url_parts = UrlParts::extract(&request.url);
    let mut properties = PropertyResolver::new(url_parts, request.method.clone());

    // Step 2: synthesize a host header from the URL if the caller didn't supply one.
    let mut request_headers = request.headers.clone();
    request_headers.normalize();
    if request_headers.get("host").is_none() {
        request_headers.replace("host", &properties.url.host);
    }

    let mut hook_results = HashMap::new();

    // Step 3: request-headers hook.
    let rh_input_snapshot =
        snapshot_of(&request_headers, &HeaderMap::new(), &request.body, &[], &properties);
    let rh_input = HookInput { request_headers: request_headers.clone(), ..Default::default() };
    let rh = run_hook(
        module,
        HookKind::RequestHeaders,
        STREAM_CONTEXT_ID,
        default_log_level,
        properties,
        rh_input,
        http_client,
    )
    .await?;
    let rh_output_snapshot = snapshot_of(
        &rh.request_headers,
        &rh.response_headers,
        &rh.request_body,
        &rh.response_body,
        &rh.properties,
    );
    record_hook(&mut hook_results, HookKind::RequestHeaders, &rh, rh_input_snapshot, rh_output_snapshot);

    request_headers = rh.request_headers.clone();
    properties = rh.properties.clone();

    // Step 4: request-body hook, seeded with the mutated headers and the caller's original body.
    let rb_input_snapshot =
        snapshot_of(&request_headers, &HeaderMap::new(), &request.body, &[], &properties);
    let rb_input = HookInput {
        request_headers: request_headers.clone(),
        request_body: request.body.clone(),
        ..Default::default()
    };
    let rb = run_hook(
        module,
        HookKind::RequestBody,
        STREAM_CONTEXT_ID,
        default_log_level,
        properties,
        rb_input,
        http_client,
    )
    .await?;
    let rb_output_snapshot = snapshot_of(
        &rb.request_headers,
        &rb.response_headers,
        &rb.request_body,
        &rb.response_body,
        &rb.properties,
    );
    record_hook(&mut hook_results, HookKind::RequestBody, &rb, rb_input_snapshot, rb_output_snapshot);

    request_headers = rb.request_headers.clone();
    let request_body = rb.request_body.clone();
    properties = rb.properties.clone();

    // Step 5: reconstruct the outbound URL from the (possibly mutated) request properties and
    // inject the forwarded-for family of headers.
    let outbound_url = rebuild_outbound_url(&properties);
    inject_forwarded_headers(&mut request_headers, &properties);

    // Step 6/7: the downstream fetch plus binary content-type classification.
    let downstream = fetch_downstream(
        http_client,
        &properties.request_method,
        &outbound_url,
        &request_headers,
        &request_body,
        downstream_timeout_ms,
    )
    .await;

    let (response_headers, response_body, final_status, final_reason, fetch_failed_body) = match downstream {
        Ok(resp) => {
            properties.response = ResponseMeta {
                status: Some(resp.status),
                reason: resp.reason.clone(),
                code_details: String::new(),
            };
            (resp.headers, resp.body, resp.status, resp.reason, None)
        }
        Err(e) => {
            // DOWNSTREAM_FETCH_FAILURE (§7): both response hooks still run, against the last
            // known request state, but the final response reports status 0 and the error as
            // body.
            let message = format!("{}", e);
            properties.response = ResponseMeta { status: Some(0), reason: "Fetch Failed".to_string(), code_details: String::new() };
            (HeaderMap::new(), Vec::new(), 0, "Fetch Failed".to_string(), Some(message))
        }
    };

    // Step 8: purge request-headers-scoped custom properties at the request→response boundary.
    properties.registry.purge_request_headers_scoped(&mut properties.store);

    // Step 9: response-headers then response-body hooks, driven by the real downstream
    // response.
    let resh_input_snapshot =
        snapshot_of(&request_headers, &response_headers, &request_body, &response_body, &properties);
    let resh_input = HookInput {
        request_headers: request_headers.clone(),
        response_headers: response_headers.clone(),
        ..Default::default()
    };
    let resh = run_hook(
        module,
        HookKind::ResponseHeaders,
        STREAM_CONTEXT_ID,
        default_log_level,
        properties,
        resh_input,
        http_client,
    )
    .await?;
    let resh_output_snapshot = snapshot_of(
        &resh.request_headers,
        &resh.response_headers,
        &resh.request_body,
        &resh.response_body,
        &resh.properties,
    );
    record_hook(&mut hook_results, HookKind::ResponseHeaders, &resh, resh_input_snapshot, resh_output_snapshot);

    let response_headers = resh.response_headers.clone();
    properties = resh.properties.clone();

    let resb_input_snapshot =
        snapshot_of(&request_headers, &response_headers, &request_body, &response_body, &properties);
    let resb_input = HookInput {
        request_headers: request_headers.clone(),
        response_headers: response_headers.clone(),
        response_body: response_body.clone(),
        ..Default::default()
    };
    let resb = run_hook(
        module,
        HookKind::ResponseBody,
        STREAM_CONTEXT_ID,
        default_log_level,
        properties,
        resb_input,
        http_client,
    )
    .await?;
    let resb_output_snapshot = snapshot_of(
        &resb.request_headers,
        &resb.response_headers,
        &resb.request_body,
        &resb.response_body,
        &resb.properties,
    );
    record_hook(&mut hook_results, HookKind::ResponseBody, &resb, resb_input_snapshot, resb_output_snapshot);

    // Step 10: assemble the final response from the last output snapshot.
    let content_type = resb.response_headers.get("content-type").unwrap_or("").to_string();
    let final_body_bytes = fetch_failed_body.map(String::into_bytes).unwrap_or(resb.response_body.clone());
    let is_binary = is_binary_content_type(&content_type);
    let (body, is_base64) = if is_binary {
        (base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &final_body_bytes), true)
    } else {
        (String::from_utf8_lossy(&final_body_bytes).into_owned(), false)
    };

    let properties_snapshot_value = properties_snapshot(&resb.properties);

    Ok(FullFlowResult {
        hook_results,
        final_response: FinalResponse {
            status: final_status,
            reason: final_reason,
            headers: resb.response_headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body,
            content_type,
            is_base64,
        },
        properties: properties_snapshot_value,
    })
}

fn record_hook(
    results: &mut HashMap<String, HookResult>,
    hook: HookKind,
    outcome: &HookOutcome,
    input: Snapshot,
    output: Snapshot,
) {
    results.insert(
        hook.name().to_string(),
        HookResult {
            return_code: outcome.return_code,
            logs: outcome.logs.iter().map(|(level, message)| LogEntry { level: *level, message: message.clone() }).collect(),
            input,
            output,
        },
    );
}

/// Rebuilds the outbound URL from the (possibly guest-mutated) `request.scheme`/`request.host`/
/// `request.path`/`request.query` properties, per §4.7 step 5.
fn rebuild_outbound_url(properties: &PropertyResolver) -> String {
    let scheme = if properties.url.scheme.is_empty() { "http" } else { &properties.url.scheme };
    let path = if properties.url.path.is_empty() { "/" } else { &properties.url.path };
    let mut url = format!("{}://{}{}", scheme, properties.url.host, path);
    if !properties.url.query.is_empty() {
        url.push('?');
        url.push_str(&properties.url.query);
    }
    url
}

/// Injects `x-forwarded-host`/`x-forwarded-proto`/`x-forwarded-port` from the current host
/// header and scheme, and, when `request.x_real_ip` is set, `x-real-ip`/`x-forwarded-for` (§4.7
/// step 5, §6 downstream fetch conventions).
fn inject_forwarded_headers(headers: &mut HeaderMap, properties: &PropertyResolver) {
    let host = headers.get("host").map(str::to_string).unwrap_or_else(|| properties.url.host.clone());
    headers.replace("x-forwarded-host", &host);

    let scheme = if properties.url.scheme.is_empty() { "http" } else { &properties.url.scheme };
    headers.replace("x-forwarded-proto", scheme);
    let default_port = if scheme == "https" { "443" } else { "80" };
    headers.replace("x-forwarded-port", default_port);

    if let Some(Value::String(real_ip)) = properties.store.get_flat("request.x_real_ip") {
        if !real_ip.is_empty() {
            headers.replace("x-real-ip", real_ip);
            headers.replace("x-forwarded-for", real_ip);
        }
    }
}

struct DownstreamResponse {
    status: u16,
    reason: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Performs the downstream HTTP fetch with the mutated method/headers/body (§4.7 step 6). Body
/// is only sent for POST/PUT/PATCH, matching the methods that conventionally carry one.
async fn fetch_downstream(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: &HeaderMap,
    body: &[u8],
    timeout_ms: u64,
) -> Result<DownstreamResponse, OrchestratorError> {
    let method = method.parse::<reqwest::Method>().unwrap_or(reqwest::Method::GET);
    let send_body = matches!(method, reqwest::Method::POST | reqwest::Method::PUT | reqwest::Method::PATCH);

    let mut builder = client
        .request(method, url)
        .timeout(Duration::from_millis(timeout_ms));
    for (k, v) in headers {
        if !k.starts_with(':') {
            builder = builder.header(k, v);
        }
    }
    if send_body {
        builder = builder.body(body.to_vec());
    }

    let response = builder.send().await.map_err(HostError::DownstreamFetch)?;
    let status = response.status().as_u16();
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("")
        .to_string();
    let response_headers = HeaderMap::from_pairs(
        response.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string())),
    );
    let body = response.bytes().await.map_err(HostError::DownstreamFetch)?.to_vec();
    Ok(DownstreamResponse { status, reason, headers: response_headers, body })
}

/// §4.7 step 7 / §6: a response is binary when its content-type begins with or contains one of
/// [`BINARY_CONTENT_TYPES`].
fn is_binary_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    BINARY_CONTENT_TYPES.iter().any(|prefix| lower.contains(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_classification_matches_known_prefixes() {
        assert!(is_binary_content_type("image/png"));
        assert!(is_binary_content_type("application/pdf; charset=binary"));
        assert!(!is_binary_content_type("application/json"));
        assert!(!is_binary_content_type("text/plain"));
    }

    #[test]
    fn outbound_url_rebuilds_from_mutated_properties() {
        let mut properties = PropertyResolver::new(UrlParts::extract("https://example.com/orig?x=1"), "GET".into());
        properties.set("request.host", Value::String("new-host.example".into()), HookKind::RequestHeaders);
        let url = rebuild_outbound_url(&properties);
        assert_eq!(url, "https://new-host.example/orig?x=1");
    }

    #[test]
    fn forwarded_headers_carry_scheme_and_host() {
        let properties = PropertyResolver::new(UrlParts::extract("https://example.com/"), "GET".into());
        let mut headers = HeaderMap::new();
        headers.replace("host", "example.com");
        inject_forwarded_headers(&mut headers, &properties);
        assert_eq!(headers.get("x-forwarded-host"), Some("example.com"));
        assert_eq!(headers.get("x-forwarded-proto"), Some("https"));
        assert_eq!(headers.get("x-forwarded-port"), Some("443"));
    }

    #[test]
    fn forwarded_headers_carry_real_ip_when_set() {
        let mut properties = PropertyResolver::new(UrlParts::extract("http://example.com/"), "GET".into());
        properties.set("request.x_real_ip", Value::String("203.0.113.9".into()), HookKind::RequestHeaders);
        let mut headers = HeaderMap::new();
        inject_forwarded_headers(&mut headers, &properties);
        assert_eq!(headers.get("x-real-ip"), Some("203.0.113.9"));
        assert_eq!(headers.get("x-forwarded-for"), Some("203.0.113.9"));
    }
}
