//! Per-instance state threaded through every host function call.
//!
//! `HostState` is the `Store<T>` data type, following the teacher's own `ModuleRegistry` shape
//! (`examples/tearust-wapc-rust/src/modreg.rs`): a `WasiCtx` plus a shared, `RefCell`-guarded
//! blob of mutable state the host functions close over. Single-threaded cooperative scheduling
//! (§5) means `Rc<RefCell<_>>` is sufficient — no instance's state is ever touched from more
//! than one hook call at a time.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use wasmtime_wasi::WasiCtx;

use crate::abi::{HookKind, LogLevel};
use crate::headers::HeaderMap;
use crate::properties::PropertyResolver;
use crate::secrets::{Dictionary, SecretStore};

/// One pending outbound HTTP call recorded by `proxy_http_call`, awaiting the orchestrator's
/// PAUSE-loop resume (§4.7, §4.6).
#[derive(Debug, Clone)]
pub struct PendingHttpCall {
    pub token: u32,
    pub upstream: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u32,
}

/// State shared by every host function registered for a single instance. Lives exactly as long
/// as the `Instance` that owns it — discarded when the hook (and any PAUSE/resume chain on the
/// same instance) finishes.
pub struct SharedState {
    pub hook: HookKind,
    pub context_id: i32,

    pub min_log_level: LogLevel,
    pub logs: Vec<(u8, String)>,
    /// Suppresses log capture during the init sequence (§4.1 step 1) so noisy guests that print
    /// during start-up don't pollute the hook's log output; specifically any init-time line
    /// containing `abort:` is dropped (§6).
    pub suppress_init_aborts: bool,

    pub request_headers: HeaderMap,
    pub request_trailers: HeaderMap,
    pub response_headers: HeaderMap,
    pub response_trailers: HeaderMap,

    pub request_body: Vec<u8>,
    pub response_body: Vec<u8>,
    pub vm_config: Vec<u8>,
    pub plugin_config: Vec<u8>,

    pub http_call_response_headers: HeaderMap,
    pub http_call_response_trailers: HeaderMap,
    pub http_call_response_body: Vec<u8>,

    pub properties: PropertyResolver,

    pub pending_http_call: Option<PendingHttpCall>,
    pub next_token: u32,
    pub stream_closed: bool,
    pub effective_context: i32,

    /// High-water mark for the bump allocator fallback (§4.2). `None` until the first fallback
    /// allocation, at which point it is seeded from the guest's memory size at that moment (so
    /// the bump region starts past whatever static data/globals/stack the module's own initial
    /// memory already holds, instead of at address 0) — resets on every new instance.
    pub bump_high_water: Option<u32>,

    pub secrets: Arc<SecretStore>,
    pub dictionary: Arc<Dictionary>,

    /// Backing buffer for the guest's fd 1/2, shared with the `WasiCtx`'s stdout/stderr pipes
    /// (§4.1 step 1, §6 standard-I/O shim).
    pub stdio_buffer: Arc<RwLock<Vec<u8>>>,
    /// Byte offset into `stdio_buffer` already turned into log entries.
    pub stdio_drained: usize,
}

impl SharedState {
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if level >= self.min_log_level {
            log::log!(
                target: "fastedge_wasm_host::guest",
                to_log_crate_level(level),
                "{}",
                message
            );
            self.logs.push((level as u8, message));
        }
    }

    /// Turns any bytes written to fd 1/2 since the last drain into log entries (§6 standard-I/O
    /// shim). A line matching `[TRACE|DEBUG|INFO|WARN|ERROR|CRITICAL] <rest>` uses the named
    /// level with the prefix stripped; otherwise it is logged at `Debug`. While
    /// `suppress_init_aborts` is set, a line containing `abort:` is dropped instead of logged, so
    /// a noisy guest's own startup chatter about a tolerated init-step failure doesn't show up
    /// twice (once from the guest's own message, once from `run_init_sequence`'s trap log).
    pub fn drain_stdio(&mut self) {
        let new_bytes = {
            let buf = self.stdio_buffer.read().expect("stdio buffer lock poisoned");
            if self.stdio_drained >= buf.len() {
                return;
            }
            buf[self.stdio_drained..].to_vec()
        };
        self.stdio_drained += new_bytes.len();

        let text = String::from_utf8_lossy(&new_bytes);
        let suppress = self.suppress_init_aborts;
        for line in text.split('\n') {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            if suppress && line.contains("abort:") {
                continue;
            }
            let (level, rest) = LogLevel::parse_prefixed(line);
            self.log(level, rest.to_string());
        }
    }
}

fn to_log_crate_level(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Trace => log::Level::Trace,
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Info => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error | LogLevel::Critical => log::Level::Error,
    }
}

/// The `wasmtime::Store<T>` payload: WASI context plus the shared instance state.
pub struct HostState {
    pub wasi: WasiCtx,
    pub shared: Rc<RefCell<SharedState>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyResolver;

    fn fixture() -> SharedState {
        SharedState {
            hook: HookKind::RequestHeaders,
            context_id: 1,
            min_log_level: LogLevel::Trace,
            logs: Vec::new(),
            suppress_init_aborts: false,
            request_headers: HeaderMap::new(),
            request_trailers: HeaderMap::new(),
            response_headers: HeaderMap::new(),
            response_trailers: HeaderMap::new(),
            request_body: Vec::new(),
            response_body: Vec::new(),
            vm_config: Vec::new(),
            plugin_config: Vec::new(),
            http_call_response_headers: HeaderMap::new(),
            http_call_response_trailers: HeaderMap::new(),
            http_call_response_body: Vec::new(),
            properties: PropertyResolver::default(),
            pending_http_call: None,
            next_token: 0,
            stream_closed: false,
            effective_context: 1,
            bump_high_water: None,
            secrets: Arc::new(SecretStore::new()),
            dictionary: Arc::new(Dictionary::new()),
            stdio_buffer: Arc::new(RwLock::new(Vec::new())),
            stdio_drained: 0,
        }
    }

    #[test]
    fn drain_stdio_turns_lines_into_log_entries() {
        let mut state = fixture();
        state.stdio_buffer.write().unwrap().extend_from_slice(b"[WARN] low memory\nplain line\n");
        state.drain_stdio();
        assert_eq!(state.logs, vec![
            (LogLevel::Warn as u8, "low memory".to_string()),
            (LogLevel::Debug as u8, "plain line".to_string()),
        ]);
    }

    #[test]
    fn drain_stdio_only_consumes_new_bytes_on_repeated_calls() {
        let mut state = fixture();
        state.stdio_buffer.write().unwrap().extend_from_slice(b"first\n");
        state.drain_stdio();
        state.stdio_buffer.write().unwrap().extend_from_slice(b"second\n");
        state.drain_stdio();
        assert_eq!(state.logs, vec![
            (LogLevel::Debug as u8, "first".to_string()),
            (LogLevel::Debug as u8, "second".to_string()),
        ]);
    }

    #[test]
    fn drain_stdio_suppresses_abort_lines_during_init() {
        let mut state = fixture();
        state.suppress_init_aborts = true;
        state.stdio_buffer.write().unwrap().extend_from_slice(b"abort: missing export\nnormal\n");
        state.drain_stdio();
        assert_eq!(state.logs, vec![(LogLevel::Debug as u8, "normal".to_string())]);
    }
}
