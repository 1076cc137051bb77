//! Component-model HTTP runner (§6c) — interface only, per the Non-goals in §1/SPEC_FULL.md §1.
//!
//! This crate's actual job is the proxy-wasm host in the rest of the module tree. A
//! self-contained component-model guest is a different contract entirely (no `env`-namespace
//! imports, no per-hook instance lifecycle, no property resolver) and is handled by spawning an
//! external CLI process and forwarding one request/response pair to it. Only the detection rule
//! and the trait shape live here; the concrete process-spawning implementation is a deployment
//! detail left out of scope.

use bytes::Bytes;
use http::{Request, Response};

use crate::error::HostError;
use crate::module::{detect_binary_format, BinaryFormat};

/// Whether `bytes` should be routed to this crate's proxy-wasm host or to a component-model
/// runner, per the magic/layer detection rule in §6.
pub fn is_component_model(bytes: &[u8]) -> bool {
    detect_binary_format(bytes) == BinaryFormat::Component
}

/// Executes a self-contained component-model HTTP guest against one request.
///
/// Implementations spawn an external CLI pointed at the module and forward `request` to it over
/// the process's own transport (stdio or a loopback port), returning the guest's response.
/// Out of scope for this crate beyond the trait boundary — see §6c.
pub trait ComponentRunner {
    fn run(&self, module_path: &str, request: Request<Bytes>) -> Result<Response<Bytes>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_magic_is_routed_away_from_the_core_module_path() {
        let component = [0x00, 0x61, 0x73, 0x6d, 0x0a, 0x00, 0x01, 0x00];
        let core = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        assert!(is_component_model(&component));
        assert!(!is_component_model(&core));
    }
}
