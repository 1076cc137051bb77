//! Single-hook execution: instantiate, run the guest's entry point, and drive the PAUSE/resume
//! loop for any outbound `proxy_http_call` the guest issues while inside it (§4.6, §4.7).
//!
//! The PAUSE/resume chain stays entirely within one `Instance`: the same hook entry point is
//! re-invoked on it after the host delivers the outbound call's response via
//! `proxy_on_http_call_response`, mirroring how the teacher's `WapcHost::call` drives one
//! `Instance` through a single synchronous round trip
//! (`examples/tearust-wapc-rust/src/lib.rs`) — generalized here to a call that can suspend
//! multiple times before it settles.

use wasmtime::{AsContextMut, Instance, Store, Val};

use crate::abi::{HookKind, LogLevel};
use crate::error::{HostError, Result};
use crate::headers::HeaderMap;
use crate::module::LoadedModule;
use crate::properties::PropertyResolver;
use crate::state::HostState;

/// What the orchestrator seeds into a fresh instance before calling its hook entry point.
#[derive(Debug, Clone, Default)]
pub struct HookInput {
    pub request_headers: HeaderMap,
    pub request_trailers: HeaderMap,
    pub response_headers: HeaderMap,
    pub response_trailers: HeaderMap,
    pub request_body: Vec<u8>,
    pub response_body: Vec<u8>,
}

/// Everything the orchestrator reads back out after a hook settles.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    /// The guest's raw return code from its last entry-point call (`None` if the guest traps
    /// without returning — reported as `null` per §3 `HookResult`).
    pub return_code: Option<i32>,
    pub request_headers: HeaderMap,
    pub request_trailers: HeaderMap,
    pub response_headers: HeaderMap,
    pub response_trailers: HeaderMap,
    pub request_body: Vec<u8>,
    pub response_body: Vec<u8>,
    pub properties: PropertyResolver,
    pub logs: Vec<(u8, String)>,
    pub stream_closed: bool,
}

/// One outbound call a hook is waiting on, handed back to the orchestrator's fetch logic (hook.rs
/// has no other HTTP concern — keeping networking entirely behind one seam, per §4.7).
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub token: u32,
    pub upstream: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u32,
}

/// The response to one outbound call, fed back into the paused instance.
#[derive(Debug, Clone, Default)]
pub struct OutboundResponse {
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub body: Vec<u8>,
}

/// Performs one outbound call and maps the result into an [`OutboundResponse`].
///
/// Honors the `:method`/`:path`/`:scheme`/`:authority` pseudo-headers the guest supplied in the
/// pending call, falling back to a plain `host` header and then the upstream hint for the
/// authority, and to `GET` for the method (§4.7 PAUSE loop). Pseudo-headers are filtered out
/// before the real request is sent, since they carry no meaning on the wire past this point
/// (§6 glossary). A failure or timeout resumes the guest with an empty response rather than
/// aborting the hook, mirroring the request-building idiom in
/// `examples/Arend-Jan-chat-gpt-lib-rs/src/client/client.rs`.
pub async fn fetch_outbound(client: &reqwest::Client, call: OutboundCall) -> Option<OutboundResponse> {
    let method = call
        .headers
        .get(":method")
        .unwrap_or("GET")
        .to_string();
    let scheme = call.headers.get(":scheme").unwrap_or("http").to_string();
    let authority = call
        .headers
        .get(":authority")
        .or_else(|| call.headers.get("host"))
        .unwrap_or(&call.upstream)
        .to_string();
    let path = call.headers.get(":path").unwrap_or("/").to_string();

    let url = if call.upstream.starts_with("http://") || call.upstream.starts_with("https://") {
        format!("{}{}", call.upstream.trim_end_matches('/'), path)
    } else {
        format!("{}://{}{}", scheme, authority, path)
    };

    let method = method.parse::<reqwest::Method>().unwrap_or(reqwest::Method::GET);
    let mut builder = client
        .request(method, &url)
        .timeout(std::time::Duration::from_millis(call.timeout_ms.max(1) as u64));
    for (k, v) in &call.headers {
        if !k.starts_with(':') {
            builder = builder.header(k, v);
        }
    }
    if let Some(body) = call.body {
        builder = builder.body(body);
    }
    let response = builder.send().await.ok()?;
    let headers = HeaderMap::from_pairs(
        response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string())),
    );
    let body = response.bytes().await.ok()?.to_vec();
    Some(OutboundResponse { headers, trailers: HeaderMap::new(), body })
}

/// Runs `hook` to completion, including any PAUSE/resume cycles, against a freshly instantiated
/// copy of `module`.
pub async fn run_hook(
    module: &LoadedModule,
    hook: HookKind,
    context_id: i32,
    min_log_level: LogLevel,
    properties: PropertyResolver,
    input: HookInput,
    http_client: &reqwest::Client,
) -> Result<HookOutcome> {
    let (mut store, instance, shared) = module.instantiate(hook, context_id, properties, min_log_level)?;

    {
        let mut s = shared.borrow_mut();
        s.request_headers = input.request_headers;
        s.request_trailers = input.request_trailers;
        s.response_headers = input.response_headers;
        s.response_trailers = input.response_trailers;
        s.request_body = input.request_body;
        s.response_body = input.response_body;
    }

    // INSTANCE_TRAP (§7): a trap inside the hook entry point does not propagate as an error out
    // of `run_hook` — it settles the hook with a `None` return code and whatever logs were
    // captured before the trap, per the error handling design's propagation policy.
    let mut return_code = match call_entry_point(&mut store, &instance, hook, context_id, &shared) {
        Ok(code) => code,
        Err(e) => {
            shared.borrow_mut().log(LogLevel::Error, format!("{}", e));
            None
        }
    };
    shared.borrow_mut().drain_stdio();

    loop {
        if return_code != Some(1) {
            break;
        }
        if shared.borrow().stream_closed {
            break;
        }
        let pending = shared.borrow_mut().pending_http_call.take();
        let Some(pending) = pending else {
            // Guest paused without scheduling an outbound call: nothing will ever resume it, so
            // the hook settles here rather than spinning forever.
            break;
        };

        let call = OutboundCall {
            token: pending.token,
            upstream: pending.upstream,
            headers: pending.headers,
            body: pending.body,
            timeout_ms: pending.timeout_ms,
        };
        let response = fetch_outbound(http_client, call).await.unwrap_or_default();

        let (num_headers, body_size, num_trailers) = {
            let mut s = shared.borrow_mut();
            s.http_call_response_headers = response.headers;
            s.http_call_response_trailers = response.trailers;
            s.http_call_response_body = response.body;
            (
                s.http_call_response_headers.len() as i32,
                s.http_call_response_body.len() as i32,
                s.http_call_response_trailers.len() as i32,
            )
        };

        if let Err(e) = call_http_call_response(
            &mut store,
            &instance,
            context_id,
            pending.token as i32,
            num_headers,
            body_size,
            num_trailers,
        ) {
            shared.borrow_mut().log(LogLevel::Error, format!("{}", e));
            return_code = None;
            break;
        }
        shared.borrow_mut().drain_stdio();

        return_code = match call_entry_point(&mut store, &instance, hook, context_id, &shared) {
            Ok(code) => code,
            Err(e) => {
                shared.borrow_mut().log(LogLevel::Error, format!("{}", e));
                None
            }
        };
        shared.borrow_mut().drain_stdio();
    }

    let s = shared.borrow();
    Ok(HookOutcome {
        return_code,
        request_headers: s.request_headers.clone(),
        request_trailers: s.request_trailers.clone(),
        response_headers: s.response_headers.clone(),
        response_trailers: s.response_trailers.clone(),
        request_body: s.request_body.clone(),
        response_body: s.response_body.clone(),
        properties: s.properties.clone(),
        logs: s.logs.clone(),
        stream_closed: s.stream_closed,
    })
}

/// Invokes `hook`'s entry point with the hook call-argument contract from §4.7: the stream
/// context id, then either the current pair count (headers hooks) or byte length (body hooks)
/// of the hook's own buffer, then the literal end-of-stream flag the spec fixes per hook kind
/// (0 for headers hooks, 1 for body hooks). Returns `None` if the guest doesn't export this
/// hook's entry point (treated as a no-op `Continue`) — `Some(code)` otherwise, verbatim.
fn call_entry_point(
    store: &mut Store<HostState>,
    instance: &Instance,
    hook: HookKind,
    context_id: i32,
    shared: &std::rc::Rc<std::cell::RefCell<crate::state::SharedState>>,
) -> Result<Option<i32>> {
    let entry_point = hook.entry_point();
    let Some(func) = instance.get_func(store.as_context_mut(), entry_point) else {
        // Missing entry point is a no-op Continue (ABI action code 0), not a trap.
        return Ok(Some(0));
    };

    let (arg2, arg3) = {
        let s = shared.borrow();
        match hook {
            HookKind::RequestHeaders => (s.request_headers.len() as i32, 0),
            HookKind::ResponseHeaders => (s.response_headers.len() as i32, 0),
            HookKind::RequestBody => (s.request_body.len() as i32, 1),
            HookKind::ResponseBody => (s.response_body.len() as i32, 1),
        }
    };

    let mut results = [Val::I32(0)];
    if let Err(e) = func.call(
        store.as_context_mut(),
        &[Val::I32(context_id), Val::I32(arg2), Val::I32(arg3)],
        &mut results,
    ) {
        return Err(HostError::Trap { entry_point: entry_point.to_string(), source: e });
    }

    Ok(Some(results[0].i32().unwrap_or(0)))
}

fn call_http_call_response(
    store: &mut Store<HostState>,
    instance: &Instance,
    context_id: i32,
    token: i32,
    num_headers: i32,
    body_size: i32,
    num_trailers: i32,
) -> Result<()> {
    let entry_point = "proxy_on_http_call_response";
    let Some(func) = instance.get_func(store.as_context_mut(), entry_point) else {
        return Err(HostError::Trap {
            entry_point: entry_point.to_string(),
            source: anyhow::anyhow!("guest issued proxy_http_call but does not export {}", entry_point),
        });
    };
    func.call(
        store.as_context_mut(),
        &[
            Val::I32(context_id),
            Val::I32(token),
            Val::I32(num_headers),
            Val::I32(body_size),
            Val::I32(num_trailers),
        ],
        &mut [],
    )
    .map_err(|e| HostError::Trap { entry_point: entry_point.to_string(), source: e })?;
    Ok(())
}
