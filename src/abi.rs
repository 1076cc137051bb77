//! Shared ABI vocabulary: status codes, log levels, hook identity, and the names of every
//! import the host registers under the `env` namespace.
//!
//! The naming style (a `mod abi` of `&str` constants for import names) mirrors
//! `examples/other_examples/.../proxy-wasm-rust-sdk/src/hostcalls.rs`'s own `mod abi` block,
//! read from the guest side; here it is the host side of the same contract.

/// The wasm import namespace every proxy-wasm host function lives under.
pub const ENV_NAMESPACE: &str = "env";

/// Proxy-wasm ABI status codes, returned by every host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    NotFound = 1,
    BadArgument = 2,
    SerializationFailure = 7,
    InternalFailure = 10,
    InvalidMemoryAccess = 11,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Log levels captured by `proxy_log` and the standard-I/O shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    }

    /// Parses the `[TRACE|DEBUG|INFO|WARN|ERROR|CRITICAL] <rest>` prefix form used by the
    /// standard-I/O shim. Returns the level and the remaining message with the prefix stripped,
    /// or `Debug` (level 1) and the original line unchanged if no prefix matches.
    pub fn parse_prefixed(line: &str) -> (Self, &str) {
        const PREFIXES: &[(&str, LogLevel)] = &[
            ("[TRACE] ", LogLevel::Trace),
            ("[DEBUG] ", LogLevel::Debug),
            ("[INFO] ", LogLevel::Info),
            ("[WARN] ", LogLevel::Warn),
            ("[ERROR] ", LogLevel::Error),
            ("[CRITICAL] ", LogLevel::Critical),
        ];
        for (prefix, level) in PREFIXES {
            if let Some(rest) = line.strip_prefix(prefix) {
                return (*level, rest);
            }
        }
        (LogLevel::Debug, line)
    }
}

/// The guest's return value from a hook entry point: whether it wants the host to keep going or
/// suspend the hook pending an outbound `proxy_http_call` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Pause,
}

impl Action {
    pub fn from_i32(v: i32) -> Self {
        if v == 1 { Action::Pause } else { Action::Continue }
    }
}

/// One of the four HTTP lifecycle hooks the guest is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl HookKind {
    /// The exported guest function this hook calls into.
    pub fn entry_point(self) -> &'static str {
        match self {
            HookKind::RequestHeaders => "proxy_on_request_headers",
            HookKind::RequestBody => "proxy_on_request_body",
            HookKind::ResponseHeaders => "proxy_on_response_headers",
            HookKind::ResponseBody => "proxy_on_response_body",
        }
    }

    /// The name used as a key in `FullFlowResult.hookResults` and in test fixtures.
    pub fn name(self) -> &'static str {
        match self {
            HookKind::RequestHeaders => "onRequestHeaders",
            HookKind::RequestBody => "onRequestBody",
            HookKind::ResponseHeaders => "onResponseHeaders",
            HookKind::ResponseBody => "onResponseBody",
        }
    }

    pub fn all() -> [HookKind; 4] {
        [
            HookKind::RequestHeaders,
            HookKind::RequestBody,
            HookKind::ResponseHeaders,
            HookKind::ResponseBody,
        ]
    }

    /// Whether this hook is a "headers" hook (arg2 = pair count) vs. a "body" hook
    /// (arg2 = byte length), per the hook call-argument contract.
    pub fn is_headers_hook(self) -> bool {
        matches!(self, HookKind::RequestHeaders | HookKind::ResponseHeaders)
    }
}

/// Identifies which header map a `map`-typed ABI call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MapType {
    HttpRequestHeaders = 0,
    HttpRequestTrailers = 1,
    HttpResponseHeaders = 2,
    HttpResponseTrailers = 3,
    HttpCallResponseHeaders = 4,
    HttpCallResponseTrailers = 5,
}

impl MapType {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => MapType::HttpRequestHeaders,
            1 => MapType::HttpRequestTrailers,
            2 => MapType::HttpResponseHeaders,
            3 => MapType::HttpResponseTrailers,
            4 => MapType::HttpCallResponseHeaders,
            5 => MapType::HttpCallResponseTrailers,
            _ => return None,
        })
    }
}

/// Identifies which byte buffer a `buffer`-typed ABI call addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BufferType {
    HttpRequestBody = 0,
    HttpResponseBody = 1,
    HttpCallResponseBody = 2,
    VmConfiguration = 3,
    PluginConfiguration = 4,
}

impl BufferType {
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            0 => BufferType::HttpRequestBody,
            1 => BufferType::HttpResponseBody,
            2 => BufferType::HttpCallResponseBody,
            3 => BufferType::VmConfiguration,
            4 => BufferType::PluginConfiguration,
            _ => return None,
        })
    }
}

/// Names of every function the host imports into the guest's `env` namespace.
pub mod import_names {
    pub const PROXY_LOG: &str = "proxy_log";
    pub const PROXY_GET_LOG_LEVEL: &str = "proxy_get_log_level";
    pub const PROXY_SET_LOG_LEVEL: &str = "proxy_set_log_level";

    pub const PROXY_GET_PROPERTY: &str = "proxy_get_property";
    pub const PROXY_SET_PROPERTY: &str = "proxy_set_property";

    pub const PROXY_GET_HEADER_MAP_VALUE: &str = "proxy_get_header_map_value";
    pub const PROXY_GET_HEADER_MAP_PAIRS: &str = "proxy_get_header_map_pairs";
    pub const PROXY_GET_HEADER_MAP_SIZE: &str = "proxy_get_header_map_size";
    pub const PROXY_ADD_HEADER_MAP_VALUE: &str = "proxy_add_header_map_value";
    pub const PROXY_REPLACE_HEADER_MAP_VALUE: &str = "proxy_replace_header_map_value";
    pub const PROXY_REMOVE_HEADER_MAP_VALUE: &str = "proxy_remove_header_map_value";
    pub const PROXY_SET_HEADER_MAP_PAIRS: &str = "proxy_set_header_map_pairs";

    pub const PROXY_GET_BUFFER_BYTES: &str = "proxy_get_buffer_bytes";
    pub const PROXY_GET_BUFFER_STATUS: &str = "proxy_get_buffer_status";
    pub const PROXY_SET_BUFFER_BYTES: &str = "proxy_set_buffer_bytes";

    pub const PROXY_SEND_LOCAL_RESPONSE: &str = "proxy_send_local_response";
    pub const PROXY_SET_EFFECTIVE_CONTEXT: &str = "proxy_set_effective_context";

    pub const PROXY_HTTP_CALL: &str = "proxy_http_call";
    pub const PROXY_CONTINUE_STREAM: &str = "proxy_continue_stream";
    pub const PROXY_CLOSE_STREAM: &str = "proxy_close_stream";

    pub const PROXY_GET_CURRENT_TIME_NANOSECONDS: &str = "proxy_get_current_time_nanoseconds";
    pub const PROXY_SET_TICK_PERIOD_MILLISECONDS: &str = "proxy_set_tick_period_milliseconds";
    pub const PROXY_GET_STATUS: &str = "proxy_get_status";
    pub const PROXY_DONE: &str = "proxy_done";
    pub const PROXY_REGISTER_SHARED_QUEUE: &str = "proxy_register_shared_queue";
    pub const PROXY_RESOLVE_SHARED_QUEUE: &str = "proxy_resolve_shared_queue";
    pub const PROXY_DEQUEUE_SHARED_QUEUE: &str = "proxy_dequeue_shared_queue";
    pub const PROXY_ENQUEUE_SHARED_QUEUE: &str = "proxy_enqueue_shared_queue";
    pub const PROXY_GET_SHARED_DATA: &str = "proxy_get_shared_data";
    pub const PROXY_SET_SHARED_DATA: &str = "proxy_set_shared_data";
    pub const PROXY_DEFINE_METRIC: &str = "proxy_define_metric";
    pub const PROXY_GET_METRIC: &str = "proxy_get_metric";
    pub const PROXY_RECORD_METRIC: &str = "proxy_record_metric";
    pub const PROXY_INCREMENT_METRIC: &str = "proxy_increment_metric";

    pub const PROXY_GET_SECRET: &str = "proxy_get_secret";
    pub const PROXY_GET_EFFECTIVE_AT_SECRET: &str = "proxy_get_effective_at_secret";
    pub const PROXY_SECRET_GET: &str = "proxy_secret_get";
    pub const PROXY_DICTIONARY_GET: &str = "proxy_dictionary_get";

    pub const ABORT: &str = "abort";
    pub const TRACE: &str = "trace";

    pub const ON_HTTP_CALL_RESPONSE: &str = "proxy_on_http_call_response";
    pub const ON_CONTEXT_CREATE: &str = "proxy_on_context_create";
    pub const ON_VM_START: &str = "proxy_on_vm_start";
    pub const ON_PLUGIN_START: &str = "proxy_on_plugin_start";
    pub const ON_CONFIGURE: &str = "proxy_on_configure";
    pub const ON_DONE: &str = "proxy_on_done";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_level_prefixes() {
        assert_eq!(LogLevel::parse_prefixed("[WARN] disk nearly full"), (LogLevel::Warn, "disk nearly full"));
        assert_eq!(LogLevel::parse_prefixed("[CRITICAL] out of memory"), (LogLevel::Critical, "out of memory"));
    }

    #[test]
    fn unprefixed_line_defaults_to_debug() {
        assert_eq!(LogLevel::parse_prefixed("plain stdout write"), (LogLevel::Debug, "plain stdout write"));
    }

    #[test]
    fn plugin_start_and_configure_are_distinct_import_names() {
        assert_ne!(import_names::ON_PLUGIN_START, import_names::ON_CONFIGURE);
    }
}
