//! Crate-wide error taxonomy.
//!
//! Each variant here corresponds to one failure kind from the error handling design: module
//! compilation, guest traps, memory faults, and downstream fetch/config failures. Failures that
//! happen *inside* a hook (property violations, init step failures, stubbed host functions,
//! outbound-call timeouts) are not represented here — they are logged and folded into a
//! [`crate::hook::HookResult`] instead, per the propagation policy in the spec's error handling
//! design.

use thiserror::Error;

/// A result alias for errors raised by the outer module/orchestrator layer.
pub type Result<T> = std::result::Result<T, HostError>;

/// The full-flow orchestrator's error type. Kept as a plain alias of [`HostError`] rather than a
/// distinct enum: every failure the orchestrator can raise outright (module instantiation,
/// downstream fetch, I/O) already has a `HostError` variant, and a hook-internal failure never
/// propagates past `run_hook` as an error (see its module docs).
pub type OrchestratorError = HostError;

/// Errors that can escape the host runtime to its caller.
///
/// Failures that occur strictly inside a single hook invocation (a guest trap inside a hook
/// entry point is the one exception — see [`HostError::Trap`]) do not produce one of these on
/// their own; they are captured into the `HookResult` for that hook and returned to the caller
/// as data. Only failures of the outer machinery (nothing to call, compilation rejected,
/// malformed config when strict parsing is requested) propagate here.
#[derive(Debug, Error)]
pub enum HostError {
    /// MODULE_LOAD_FAILURE: the WASM compiler rejected the supplied bytes.
    #[error("failed to load wasm module: {0}")]
    ModuleLoad(String),

    /// The instance could not be built from a compiled module (missing exports, bad imports).
    #[error("failed to instantiate wasm module: {0}")]
    Instantiate(String),

    /// MEMORY_OUT_OF_BOUNDS: an address range would read/write past the guest's linear memory.
    #[error("guest memory access out of bounds: {0}")]
    MemoryOutOfBounds(String),

    /// HOST_ABORT: the guest invoked `abort`; re-thrown with site information after logging.
    #[error("guest aborted at {file}:{line}:{col}: {message}")]
    GuestAbort {
        message: String,
        file: String,
        line: u32,
        col: u32,
    },

    /// INSTANCE_TRAP: the guest's hook entry point trapped, or is required and missing.
    #[error("wasm trap in {entry_point}: {source}")]
    Trap {
        entry_point: String,
        #[source]
        source: anyhow::Error,
    },

    /// DOWNSTREAM_FETCH_FAILURE: the orchestrator's downstream fetch failed outright.
    #[error("downstream fetch failed: {0}")]
    DownstreamFetch(#[from] reqwest::Error),

    /// CONFIG_PARSE_FAILURE surfaced where a caller explicitly asked for strict parsing;
    /// ordinarily this kind is logged and ignored instead (see [`crate::config`]).
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure reading a module from a filesystem path, a secrets file, or a dictionary file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
