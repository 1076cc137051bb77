//! The full proxy-wasm host-function table (§4.6), registered into a `wasmtime::Linker<HostState>`
//! under the `env` namespace.
//!
//! Registration style — one free function per import, each calling `linker.func_new` with an
//! explicit `FuncType` and a closure that reads its arguments out of guest memory before doing
//! anything — is lifted straight from the teacher's `callbacks.rs` (`console_log_func`,
//! `host_call_func`, etc., `examples/tearust-wapc-rust/src/callbacks.rs`). What's new is the size
//! of the import table: waPC fixes eight host functions: proxy-wasm's is the much larger set
//! named in `crate::abi::import_names`, with signatures grounded on
//! `examples/other_examples/.../proxy-wasm-rust-sdk/src/hostcalls.rs`'s guest-side `extern "C"`
//! declarations.

use std::time::{SystemTime, UNIX_EPOCH};

use wasmtime::{Caller, FuncType, Linker, Val, ValType};

use crate::abi::{import_names, BufferType, LogLevel, MapType, Status};
use crate::error::HostError;
use crate::headers::HeaderMap;
use crate::memory::{
    read_bytes, read_nul_terminated_string, read_string, write_to_guest_with_out_params, write_u32,
    write_u64,
};
use crate::properties::{check_read, check_write};
use crate::state::{HostState, PendingHttpCall};

type WResult<T> = anyhow::Result<T>;

fn status(results: &mut [Val], s: Status) {
    results[0] = Val::I32(s.code());
}

fn i32_arg(params: &[Val], idx: usize) -> i32 {
    params[idx].i32().unwrap_or(0)
}

/// Registers every host function named in [`crate::abi::import_names`] into `linker`.
pub fn register_all(linker: &mut Linker<HostState>) -> WResult<()> {
    proxy_log(linker)?;
    proxy_get_log_level(linker)?;
    proxy_set_log_level(linker)?;

    proxy_get_property(linker)?;
    proxy_set_property(linker)?;

    proxy_get_header_map_value(linker)?;
    proxy_get_header_map_pairs(linker)?;
    proxy_get_header_map_size(linker)?;
    proxy_add_header_map_value(linker)?;
    proxy_replace_header_map_value(linker)?;
    proxy_remove_header_map_value(linker)?;
    proxy_set_header_map_pairs(linker)?;

    proxy_get_buffer_bytes(linker)?;
    proxy_get_buffer_status(linker)?;
    proxy_set_buffer_bytes(linker)?;

    proxy_send_local_response(linker)?;
    proxy_set_effective_context(linker)?;

    proxy_http_call(linker)?;
    proxy_continue_stream(linker)?;
    proxy_close_stream(linker)?;

    proxy_get_current_time_nanoseconds(linker)?;
    proxy_set_tick_period_milliseconds(linker)?;
    proxy_done(linker)?;

    unsupported_stub(linker, import_names::PROXY_GET_STATUS, 1, 1)?;
    unsupported_stub(linker, import_names::PROXY_REGISTER_SHARED_QUEUE, 2, 1)?;
    unsupported_stub(linker, import_names::PROXY_RESOLVE_SHARED_QUEUE, 3, 1)?;
    unsupported_stub(linker, import_names::PROXY_DEQUEUE_SHARED_QUEUE, 2, 1)?;
    unsupported_stub(linker, import_names::PROXY_ENQUEUE_SHARED_QUEUE, 3, 0)?;
    unsupported_stub(linker, import_names::PROXY_GET_SHARED_DATA, 3, 1)?;
    unsupported_stub(linker, import_names::PROXY_SET_SHARED_DATA, 4, 1)?;
    unsupported_stub(linker, import_names::PROXY_DEFINE_METRIC, 4, 1)?;
    unsupported_stub(linker, import_names::PROXY_GET_METRIC, 2, 1)?;
    unsupported_stub(linker, import_names::PROXY_RECORD_METRIC, 2, 0)?;
    unsupported_stub(linker, import_names::PROXY_INCREMENT_METRIC, 2, 0)?;

    proxy_get_secret(linker)?;
    proxy_get_effective_at_secret(linker)?;
    proxy_secret_get(linker)?;
    proxy_dictionary_get(linker)?;

    abort(linker)?;
    trace(linker)?;

    Ok(())
}

/// Registers `name` as a function of `n_params` i32 parameters and `n_results` i32 results that
/// always returns `Status::NotFound`. Covers the Non-goal surface (shared queues, shared data,
/// metrics) — present in the ABI so guests that probe for it don't trap on a missing import, but
/// never functional.
fn unsupported_stub(
    linker: &mut Linker<HostState>,
    name: &'static str,
    n_params: usize,
    n_results: usize,
) -> WResult<()> {
    linker.func_new(
        "env",
        name,
        FuncType::new(
            std::iter::repeat(ValType::I32).take(n_params),
            std::iter::repeat(ValType::I32).take(n_results),
        ),
        move |_caller: Caller<'_, HostState>, _params: &[Val], results: &mut [Val]| {
            if !results.is_empty() {
                results[0] = Val::I32(Status::NotFound.code());
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_log(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_LOG,
        FuncType::new([ValType::I32; 3], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let level = LogLevel::from_u32(i32_arg(params, 0) as u32);
            let message = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            caller.data().shared.borrow_mut().log(level, message);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_log_level(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_LOG_LEVEL,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let level = caller.data().shared.borrow().min_log_level;
            write_u32(&mut caller, i32_arg(params, 0), level as u32)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_log_level(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_LOG_LEVEL,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let level = LogLevel::from_u32(i32_arg(params, 0) as u32);
            caller.data().shared.borrow_mut().min_log_level = level;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_property(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_PROPERTY,
        FuncType::new([ValType::I32; 4], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let path = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 2), i32_arg(params, 3));

            let shared = caller.data().shared.clone();
            let hook = shared.borrow().hook;
            let exists = shared.borrow().properties.store.contains(&path);
            if let Err(denied) = check_read(&path, hook, &shared.borrow().properties.registry, exists) {
                shared.borrow_mut().log(LogLevel::Warn, denied.log_message());
                status(results, Status::NotFound);
                return Ok(());
            }
            let resolved = {
                let s = shared.borrow();
                s.properties.resolve(&path, &s.request_headers, &s.response_headers)
            };
            match resolved {
                Some(value) => {
                    let bytes = match &value {
                        serde_json::Value::String(s) => s.clone().into_bytes(),
                        other => other.to_string().into_bytes(),
                    };
                    write_to_guest_with_out_params(&mut caller, &bytes, ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_property(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_PROPERTY,
        FuncType::new([ValType::I32; 4], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let path = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let value = read_string(&mut caller, i32_arg(params, 2), i32_arg(params, 3))?;

            let shared = caller.data().shared.clone();
            let hook = shared.borrow().hook;
            if let Err(denied) = check_write(&path, hook, &shared.borrow().properties.registry) {
                shared.borrow_mut().log(LogLevel::Warn, denied.log_message());
                status(results, Status::BadArgument);
                return Ok(());
            }
            shared
                .borrow_mut()
                .properties
                .set(&path, serde_json::Value::String(value), hook);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn map_for(shared: &crate::state::SharedState, map_type: MapType) -> HeaderMap {
    match map_type {
        MapType::HttpRequestHeaders => shared.request_headers.clone(),
        MapType::HttpRequestTrailers => shared.request_trailers.clone(),
        MapType::HttpResponseHeaders => shared.response_headers.clone(),
        MapType::HttpResponseTrailers => shared.response_trailers.clone(),
        MapType::HttpCallResponseHeaders => shared.http_call_response_headers.clone(),
        MapType::HttpCallResponseTrailers => shared.http_call_response_trailers.clone(),
    }
}

fn map_mut_for(shared: &mut crate::state::SharedState, map_type: MapType) -> &mut HeaderMap {
    match map_type {
        MapType::HttpRequestHeaders => &mut shared.request_headers,
        MapType::HttpRequestTrailers => &mut shared.request_trailers,
        MapType::HttpResponseHeaders => &mut shared.response_headers,
        MapType::HttpResponseTrailers => &mut shared.response_trailers,
        MapType::HttpCallResponseHeaders => &mut shared.http_call_response_headers,
        MapType::HttpCallResponseTrailers => &mut shared.http_call_response_trailers,
    }
}

fn proxy_get_header_map_value(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_HEADER_MAP_VALUE,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let key = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 3), i32_arg(params, 4));

            let shared = caller.data().shared.clone();
            let value = map_for(&shared.borrow(), map_type).get(&key).map(str::to_string);
            match value {
                Some(v) => {
                    write_to_guest_with_out_params(&mut caller, v.as_bytes(), ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_header_map_pairs(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_HEADER_MAP_PAIRS,
        FuncType::new([ValType::I32; 3], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 1), i32_arg(params, 2));
            let shared = caller.data().shared.clone();
            let bytes = map_for(&shared.borrow(), map_type).serialize();
            write_to_guest_with_out_params(&mut caller, &bytes, ret_ptr_out, ret_len_out)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_header_map_size(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_HEADER_MAP_SIZE,
        FuncType::new([ValType::I32; 2], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let size_out = i32_arg(params, 1);
            let shared = caller.data().shared.clone();
            let size = map_for(&shared.borrow(), map_type).len() as u32;
            write_u32(&mut caller, size_out, size)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_add_header_map_value(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_ADD_HEADER_MAP_VALUE,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let key = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            let value = read_string(&mut caller, i32_arg(params, 3), i32_arg(params, 4))?;
            let shared = caller.data().shared.clone();
            map_mut_for(&mut shared.borrow_mut(), map_type).add(&key, &value);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_replace_header_map_value(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_REPLACE_HEADER_MAP_VALUE,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let key = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            let value = read_string(&mut caller, i32_arg(params, 3), i32_arg(params, 4))?;
            let shared = caller.data().shared.clone();
            map_mut_for(&mut shared.borrow_mut(), map_type).replace(&key, &value);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_remove_header_map_value(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_REMOVE_HEADER_MAP_VALUE,
        FuncType::new([ValType::I32; 3], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let key = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            let shared = caller.data().shared.clone();
            map_mut_for(&mut shared.borrow_mut(), map_type).remove(&key);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_header_map_pairs(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_HEADER_MAP_PAIRS,
        FuncType::new([ValType::I32; 3], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(map_type) = MapType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let bytes = read_bytes(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            let mut map = HeaderMap::deserialize_binary_or_text(&bytes);
            map.normalize();
            let shared = caller.data().shared.clone();
            *map_mut_for(&mut shared.borrow_mut(), map_type) = map;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn buffer_for(shared: &crate::state::SharedState, buffer_type: BufferType) -> Vec<u8> {
    match buffer_type {
        BufferType::HttpRequestBody => shared.request_body.clone(),
        BufferType::HttpResponseBody => shared.response_body.clone(),
        BufferType::HttpCallResponseBody => shared.http_call_response_body.clone(),
        BufferType::VmConfiguration => shared.vm_config.clone(),
        BufferType::PluginConfiguration => shared.plugin_config.clone(),
    }
}

fn buffer_mut_for(shared: &mut crate::state::SharedState, buffer_type: BufferType) -> &mut Vec<u8> {
    match buffer_type {
        BufferType::HttpRequestBody => &mut shared.request_body,
        BufferType::HttpResponseBody => &mut shared.response_body,
        BufferType::HttpCallResponseBody => &mut shared.http_call_response_body,
        BufferType::VmConfiguration => &mut shared.vm_config,
        BufferType::PluginConfiguration => &mut shared.plugin_config,
    }
}

fn proxy_get_buffer_bytes(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_BUFFER_BYTES,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(buffer_type) = BufferType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let offset = i32_arg(params, 1).max(0) as usize;
            let max_size = i32_arg(params, 2).max(0) as usize;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 3), i32_arg(params, 4));

            let shared = caller.data().shared.clone();
            let buf = buffer_for(&shared.borrow(), buffer_type);
            let end = (offset + max_size).min(buf.len());
            let slice = if offset < buf.len() { &buf[offset..end] } else { &[] };
            write_to_guest_with_out_params(&mut caller, slice, ret_ptr_out, ret_len_out)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

/// `proxy_get_buffer_status(type, len_out, flags_out)`: writes the addressed buffer's byte
/// length and an end-of-stream flag. This host always reports end-of-stream (every buffer handed
/// to a hook is already complete — there is no streaming), so `flags_out` is always 1.
fn proxy_get_buffer_status(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_BUFFER_STATUS,
        FuncType::new([ValType::I32; 3], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(buffer_type) = BufferType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let (len_out, flags_out) = (i32_arg(params, 1), i32_arg(params, 2));
            let shared = caller.data().shared.clone();
            let len = buffer_for(&shared.borrow(), buffer_type).len() as u32;
            write_u32(&mut caller, len_out, len)?;
            write_u32(&mut caller, flags_out, 1)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_buffer_bytes(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_BUFFER_BYTES,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let Some(buffer_type) = BufferType::from_i32(i32_arg(params, 0)) else {
                status(results, Status::BadArgument);
                return Ok(());
            };
            let offset = i32_arg(params, 1).max(0) as usize;
            let size = i32_arg(params, 2).max(0) as usize;
            let new_bytes = read_bytes(&mut caller, i32_arg(params, 3), i32_arg(params, 4))?;

            let shared = caller.data().shared.clone();
            {
                let mut s = shared.borrow_mut();
                let buf = buffer_mut_for(&mut s, buffer_type);
                if offset > buf.len() {
                    buf.resize(offset, 0);
                }
                let end = (offset + size).min(buf.len());
                buf.splice(offset..end, new_bytes);
            }
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_send_local_response(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SEND_LOCAL_RESPONSE,
        FuncType::new([ValType::I32; 7], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let response_code = i32_arg(params, 0);
            let detail = read_string(&mut caller, i32_arg(params, 1), i32_arg(params, 2))?;
            // Open Question (a): logged only, never reflected into the final response.
            caller.data().shared.borrow_mut().log(
                LogLevel::Info,
                format!(
                    "proxy_send_local_response called with code {} ({}); local responses are not \
                     reflected in the final response",
                    response_code, detail
                ),
            );
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_effective_context(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_EFFECTIVE_CONTEXT,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            caller.data().shared.borrow_mut().effective_context = i32_arg(params, 0);
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_http_call(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_HTTP_CALL,
        // upstream(ptr,len), headers(ptr,len), body(ptr,len), trailers(ptr,len), timeout_ms,
        // token_out. Trailers are accepted (so the signature matches what guests expect) but not
        // threaded through to the outbound request — `PendingHttpCall` carries no trailers field.
        FuncType::new([ValType::I32; 8].into_iter().chain([ValType::I32, ValType::I32]), [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let upstream = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let header_bytes = read_bytes(&mut caller, i32_arg(params, 2), i32_arg(params, 3))?;
            let body = {
                let (ptr, len) = (i32_arg(params, 4), i32_arg(params, 5));
                if len > 0 { Some(read_bytes(&mut caller, ptr, len)?) } else { None }
            };
            let timeout_ms = i32_arg(params, 8).max(0) as u32;
            let token_out = i32_arg(params, 9);

            let mut headers = HeaderMap::deserialize_binary(&header_bytes);
            headers.normalize();

            let shared = caller.data().shared.clone();
            let token = {
                let mut s = shared.borrow_mut();
                if s.pending_http_call.is_some() {
                    status(results, Status::InternalFailure);
                    return Ok(());
                }
                let token = s.next_token;
                s.next_token += 1;
                s.pending_http_call = Some(PendingHttpCall { token, upstream, headers, body, timeout_ms });
                token
            };
            write_u32(&mut caller, token_out, token)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_continue_stream(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_CONTINUE_STREAM,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |_caller: Caller<'_, HostState>, _params: &[Val], results: &mut [Val]| {
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_close_stream(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_CLOSE_STREAM,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |caller: Caller<'_, HostState>, _params: &[Val], results: &mut [Val]| {
            caller.data().shared.borrow_mut().stream_closed = true;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_current_time_nanoseconds(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_CURRENT_TIME_NANOSECONDS,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            write_u64(&mut caller, i32_arg(params, 0), nanos)?;
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_set_tick_period_milliseconds(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_SET_TICK_PERIOD_MILLISECONDS,
        FuncType::new([ValType::I32], [ValType::I32]),
        move |_caller: Caller<'_, HostState>, _params: &[Val], results: &mut [Val]| {
            // Periodic ticking has no meaning for a request/response-scoped hook call, so this
            // is accepted and ignored rather than rejected outright.
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_done(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_DONE,
        FuncType::new([], [ValType::I32]),
        move |_caller: Caller<'_, HostState>, _params: &[Val], results: &mut [Val]| {
            status(results, Status::Ok);
            Ok(())
        },
    )?;
    Ok(())
}

fn now_unix_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn proxy_get_secret(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_SECRET,
        FuncType::new([ValType::I32; 4], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let name = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 2), i32_arg(params, 3));
            let shared = caller.data().shared.clone();
            let value = shared.borrow().secrets.get(&name, now_unix_seconds()).map(str::to_string);
            match value {
                Some(v) => {
                    write_to_guest_with_out_params(&mut caller, v.as_bytes(), ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_get_effective_at_secret(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_GET_EFFECTIVE_AT_SECRET,
        FuncType::new([ValType::I32; 5], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let name = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let at = i32_arg(params, 2).max(0) as u64;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 3), i32_arg(params, 4));
            let shared = caller.data().shared.clone();
            let value = shared.borrow().secrets.get_effective_at(&name, at).map(str::to_string);
            match value {
                Some(v) => {
                    write_to_guest_with_out_params(&mut caller, v.as_bytes(), ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_secret_get(linker: &mut Linker<HostState>) -> WResult<()> {
    // Alias of `proxy_get_secret` (§4.6): must resolve the same way (current-time-effective
    // version), not the latest-ever version, so the two names never diverge for a secret with a
    // future-dated rotation record.
    linker.func_new(
        "env",
        import_names::PROXY_SECRET_GET,
        FuncType::new([ValType::I32; 4], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let name = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 2), i32_arg(params, 3));
            let shared = caller.data().shared.clone();
            let value = shared.borrow().secrets.get(&name, now_unix_seconds()).map(str::to_string);
            match value {
                Some(v) => {
                    write_to_guest_with_out_params(&mut caller, v.as_bytes(), ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn proxy_dictionary_get(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::PROXY_DICTIONARY_GET,
        FuncType::new([ValType::I32; 4], [ValType::I32]),
        move |mut caller: Caller<'_, HostState>, params: &[Val], results: &mut [Val]| {
            let name = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            let (ret_ptr_out, ret_len_out) = (i32_arg(params, 2), i32_arg(params, 3));
            let shared = caller.data().shared.clone();
            let value = shared.borrow().dictionary.get(&name).map(str::to_string);
            match value {
                Some(v) => {
                    write_to_guest_with_out_params(&mut caller, v.as_bytes(), ret_ptr_out, ret_len_out)?;
                    status(results, Status::Ok);
                }
                None => status(results, Status::NotFound),
            }
            Ok(())
        },
    )?;
    Ok(())
}

/// `abort(message_ptr, filename_ptr, line, col)`: the guest's panic/abort hook. Always traps,
/// after recording the site into the shared log so the orchestrator can surface it per
/// `HostError::GuestAbort`.
fn abort(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::ABORT,
        FuncType::new([ValType::I32; 4], []),
        move |mut caller: Caller<'_, HostState>, params: &[Val], _results: &mut [Val]| {
            let message = read_nul_terminated_string(&mut caller, i32_arg(params, 0), 256).unwrap_or_default();
            let file = read_nul_terminated_string(&mut caller, i32_arg(params, 1), 256).unwrap_or_default();
            let (line, col) = (i32_arg(params, 2), i32_arg(params, 3));
            let suppress = caller.data().shared.borrow().suppress_init_aborts;
            if suppress {
                caller.data().shared.borrow_mut().log(
                    LogLevel::Warn,
                    format!("guest abort during init at {}:{}:{}: {}", file, line, col, message),
                );
                return Ok(());
            }
            Err(HostError::GuestAbort { message, file, line: line as u32, col: col as u32 }.into())
        },
    )?;
    Ok(())
}

fn trace(linker: &mut Linker<HostState>) -> WResult<()> {
    linker.func_new(
        "env",
        import_names::TRACE,
        FuncType::new([ValType::I32; 2], []),
        move |mut caller: Caller<'_, HostState>, params: &[Val], _results: &mut [Val]| {
            let message = read_string(&mut caller, i32_arg(params, 0), i32_arg(params, 1))?;
            caller.data().shared.borrow_mut().log(LogLevel::Trace, message);
            Ok(())
        },
    )?;
    Ok(())
}
