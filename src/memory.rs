//! Linear-memory marshaler (§4.2).
//!
//! Every host function reads its string/byte arguments out of the guest's exported `memory` and,
//! for "out" parameters, writes results back into guest-allocated space. The raw slicing here is
//! lifted directly from the teacher's `get_vec_from_memory`/`write_bytes_to_memory`
//! (`examples/tearust-wapc-rust/src/callbacks.rs`); what's new is the guest-allocation strategy
//! (§4.2) needed because, unlike waPC's fixed request/response buffers, proxy-wasm host calls
//! allocate memory of a size the guest doesn't know ahead of time.

use wasmtime::{AsContext, AsContextMut, Caller, Memory};

use crate::error::{HostError, Result};
use crate::state::HostState;

pub fn get_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| HostError::MemoryOutOfBounds("no exported \"memory\"".to_string()))
}

/// Copies `len` bytes starting at `ptr` out of guest memory.
pub fn read_bytes(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<Vec<u8>> {
    if ptr < 0 || len < 0 {
        return Err(HostError::MemoryOutOfBounds(format!(
            "negative ptr/len ({}, {})",
            ptr, len
        )));
    }
    let memory = get_memory(caller)?;
    let (start, end) = (ptr as usize, ptr as usize + len as usize);
    let data = memory.data(caller.as_context());
    data.get(start..end)
        .map(|slice| slice.to_vec())
        .ok_or_else(|| {
            HostError::MemoryOutOfBounds(format!(
                "range {}..{} exceeds memory of size {}",
                start,
                end,
                data.len()
            ))
        })
}

/// Reads `len` bytes at `ptr` and interprets them as UTF-8, replacing invalid sequences.
pub fn read_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reads a NUL-terminated string starting at `ptr`, scanning up to `max_len` bytes.
pub fn read_nul_terminated_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    max_len: i32,
) -> Result<String> {
    let bytes = read_bytes(caller, ptr, max_len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Writes `bytes` into guest memory starting at `ptr`. Caller must have already ensured the
/// region is allocated (via `allocate_in_guest` or an equivalent guest-side reservation).
pub fn write_bytes(caller: &mut Caller<'_, HostState>, ptr: i32, bytes: &[u8]) -> Result<()> {
    if ptr < 0 {
        return Err(HostError::MemoryOutOfBounds(format!("negative ptr ({})", ptr)));
    }
    let memory = get_memory(caller)?;
    let start = ptr as usize;
    let end = start + bytes.len();
    let data = memory.data_mut(caller.as_context_mut());
    let dest = data.get_mut(start..end).ok_or_else(|| {
        HostError::MemoryOutOfBounds(format!(
            "range {}..{} exceeds memory of size {}",
            start,
            end,
            data.len()
        ))
    })?;
    dest.copy_from_slice(bytes);
    Ok(())
}

/// Writes a little-endian `u32` at `ptr`.
pub fn write_u32(caller: &mut Caller<'_, HostState>, ptr: i32, value: u32) -> Result<()> {
    write_bytes(caller, ptr, &value.to_le_bytes())
}

/// Writes a little-endian `u64` at `ptr` (low word at `ptr`, high word at `ptr + 4`), e.g. for
/// `proxy_get_current_time_nanoseconds`'s 8-byte result.
pub fn write_u64(caller: &mut Caller<'_, HostState>, ptr: i32, value: u64) -> Result<()> {
    write_bytes(caller, ptr, &value.to_le_bytes())
}

const WASM_PAGE_SIZE: u32 = 65536;

/// Allocates `len` bytes of guest-owned memory and returns a pointer to it.
///
/// Tries, in order: the guest's `proxy_on_memory_allocate` export, then a `malloc` export (§4.2
/// step 1). If neither export exists, falls back to a host-side bump allocator that grows the
/// guest's memory by whole 64 KiB pages as needed — this is the path exercised by guests that
/// never opted into an allocator-callback convention.
pub fn allocate_in_guest(caller: &mut Caller<'_, HostState>, len: i32) -> Result<i32> {
    if len == 0 {
        return Ok(0);
    }

    if let Some(allocate) = caller
        .get_export("proxy_on_memory_allocate")
        .and_then(|e| e.into_func())
    {
        return call_allocator(caller, allocate, len);
    }
    if let Some(malloc) = caller.get_export("malloc").and_then(|e| e.into_func()) {
        return call_allocator(caller, malloc, len);
    }

    bump_allocate(caller, len)
}

fn call_allocator(
    caller: &mut Caller<'_, HostState>,
    func: wasmtime::Func,
    len: i32,
) -> Result<i32> {
    let mut results = [wasmtime::Val::I32(0)];
    func.call(&mut *caller, &[wasmtime::Val::I32(len)], &mut results)
        .map_err(|e| HostError::Trap { entry_point: "guest allocator".to_string(), source: e })?;
    Ok(results[0].i32().unwrap_or(0))
}

fn bump_allocate(caller: &mut Caller<'_, HostState>, len: i32) -> Result<i32> {
    let memory = get_memory(caller)?;
    let shared = caller.data().shared.clone();
    let ptr = match shared.borrow().bump_high_water {
        Some(ptr) => ptr,
        // First fallback allocation in this instance: start past whatever the guest's own
        // initial memory already holds (static data, globals, stack) rather than at address 0.
        None => memory.data_size(caller.as_context()) as u32,
    };
    let needed_end = ptr as u64 + len as u64;
    let current_bytes = memory.data_size(caller.as_context()) as u64;

    if needed_end > current_bytes {
        let additional_pages =
            ((needed_end - current_bytes) + (WASM_PAGE_SIZE as u64 - 1)) / WASM_PAGE_SIZE as u64;
        memory
            .grow(caller.as_context_mut(), additional_pages)
            .map_err(|e| HostError::MemoryOutOfBounds(format!("grow failed: {}", e)))?;
    }

    shared.borrow_mut().bump_high_water = Some(ptr + len as u32);
    Ok(ptr as i32)
}

/// Writes `bytes` into a freshly allocated guest region, then writes the resulting pointer and
/// length into the two "out" locations the ABI call supplied (the ubiquitous `ptr_out`/`len_out`
/// convention seen throughout the proxy-wasm import set, e.g. `proxy_get_property`).
pub fn write_to_guest_with_out_params(
    caller: &mut Caller<'_, HostState>,
    bytes: &[u8],
    ptr_out: i32,
    len_out: i32,
) -> Result<()> {
    let ptr = allocate_in_guest(caller, bytes.len() as i32)?;
    if !bytes.is_empty() {
        write_bytes(caller, ptr, bytes)?;
    }
    write_u32(caller, ptr_out, ptr as u32)?;
    write_u32(caller, len_out, bytes.len() as u32)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // Exercised indirectly through `hostcalls` integration tests, which drive real `Instance`s
    // and so give `Caller<'_, HostState>` a genuine memory export to operate on; the raw
    // byte-slicing helpers here have no meaningful behavior to test without one.
}
