//! A proxy-wasm host runtime: loads a compiled guest module, drives it through the four HTTP
//! lifecycle hooks, and composes those hooks with a real downstream HTTP fetch into one filtered
//! end-to-end response.
//!
//! Built around `wasmtime`, following the engine/module/store/linker/instance shape of
//! `examples/tearust-wapc-rust`'s own host, generalized from one long-lived instance per guest to
//! a fresh instance per hook call (see [`module`] and [`hook`] for why). The ABI contract itself
//! — host function names, the header wire format, the property resolution order — is grounded on
//! the guest-side `proxy-wasm-rust-sdk` reference in `examples/other_examples/`.
//!
//! ```ignore
//! use fastedge_wasm_host::{Config, LoadedModule};
//! use fastedge_wasm_host::orchestrator::{run_full_flow, FullFlowRequest};
//!
//! let config = Config::load();
//! let module = LoadedModule::from_path("guest.wasm")?;
//! let client = reqwest::Client::new();
//! let request = FullFlowRequest::new("https://example.com/", "GET");
//! let result = run_full_flow(&module, request, &client, config.fetch_timeout_ms, config.default_log_level).await?;
//! # Ok::<(), fastedge_wasm_host::HostError>(())
//! ```

pub mod abi;
pub mod component_runner;
pub mod config;
pub mod error;
pub mod headers;
pub mod hook;
mod hostcalls;
pub mod memory;
pub mod module;
pub mod orchestrator;
pub mod properties;
pub mod secrets;
mod state;

pub use abi::{Action, BufferType, HookKind, LogLevel, MapType, Status};
pub use component_runner::{is_component_model, ComponentRunner};
pub use config::Config;
pub use error::{HostError, OrchestratorError, Result};
pub use headers::HeaderMap;
pub use hook::{run_hook, HookInput, HookOutcome, OutboundCall, OutboundResponse};
pub use module::{detect_binary_format, BinaryFormat, LoadedModule};
pub use orchestrator::{run_full_flow, FinalResponse, FullFlowRequest, FullFlowResult, HookResult, LogEntry};
pub use properties::{PropertyResolver, PropertyValue, UrlParts};
pub use secrets::{Dictionary, SecretStore, SecretVersion};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_surface_is_reachable_from_the_crate_root() {
        let _ = LogLevel::Info;
        let _ = HeaderMap::new();
        let _ = Config::default();
    }
}
