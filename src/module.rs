//! Module loading and instance lifecycle (§4.1).
//!
//! `LoadedModule::load` is the `Engine`+`Module` compile-once step; `instantiate` builds a fresh
//! `Linker`/`Store`/`Instance` per hook call, following the shape of
//! `examples/tearust-wapc-rust/src/lib.rs`'s `WapcHost::instance_from_buffer` (engine, WASI
//! context, linker, module, instantiate) and its tolerant `_start` invocation in `initialize`.
//! What's new relative to the teacher is the rest of the proxy-wasm init sequence (root context,
//! VM start, configure) and the fact that every hook gets its own `Instance` rather than one
//! long-lived one — per §5, an `Instance` is scoped to a single hook call (plus any PAUSE/resume
//! re-entries on it).

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use wasmtime::{AsContextMut, Engine, Instance, Linker, Module, Store, Val};
use wasmtime_wasi::sync::pipe::WritePipe;
use wasmtime_wasi::sync::WasiCtxBuilder;

use crate::abi::{HookKind, LogLevel};
use crate::error::{HostError, Result};
use crate::headers::HeaderMap;
use crate::hostcalls;
use crate::properties::{PropertyResolver, UrlParts};
use crate::secrets::{Dictionary, SecretStore};
use crate::state::{HostState, SharedState};

/// Which binary layout a module's bytes use, detected from the leading magic/version/layer
/// bytes (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    CoreModule,
    Component,
    Unknown,
}

/// Inspects the WebAssembly magic number and the binary's `layer` field to tell a core module
/// from a component without fully parsing it. Both start with `\0asm`; core modules carry
/// `layer == 0`, components carry `layer == 1`.
pub fn detect_binary_format(bytes: &[u8]) -> BinaryFormat {
    const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
    if bytes.len() < 8 || bytes[0..4] != MAGIC {
        return BinaryFormat::Unknown;
    }
    let layer = u16::from_le_bytes([bytes[6], bytes[7]]);
    match layer {
        0 => BinaryFormat::CoreModule,
        1 => BinaryFormat::Component,
        _ => BinaryFormat::Unknown,
    }
}

/// Compile-once handle to a guest module. Cheap to instantiate many times, since `Engine` and
/// `Module` hold the compiled code; only `Store`/`Linker`/`Instance` are rebuilt per hook.
pub struct LoadedModule {
    engine: Engine,
    module: Module,
    pub vm_config: Vec<u8>,
    pub plugin_config: Vec<u8>,
    pub secrets: Arc<SecretStore>,
    pub dictionary: Arc<Dictionary>,
}

impl LoadedModule {
    /// Compiles `bytes` as a core wasm module. Returns [`HostError::ModuleLoad`] if the bytes
    /// aren't a core module (including genuine component-model binaries, out of scope here — see
    /// [`crate::component_runner`]) or fail validation.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        if detect_binary_format(bytes) != BinaryFormat::CoreModule {
            return Err(HostError::ModuleLoad(
                "not a core wasm module (wrong magic/layer bytes)".to_string(),
            ));
        }
        let engine = Engine::default();
        let module = Module::new(&engine, bytes)
            .map_err(|e| HostError::ModuleLoad(format!("{:?}", e)))?;
        Ok(LoadedModule {
            engine,
            module,
            vm_config: Vec::new(),
            plugin_config: Vec::new(),
            secrets: Arc::new(SecretStore::new()),
            dictionary: Arc::new(Dictionary::new()),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::load(&bytes)
    }

    /// Replaces the secret store every hook of this module sees, e.g. with one loaded from the
    /// path in [`crate::Config::secrets_path`].
    pub fn with_secrets(mut self, secrets: SecretStore) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    /// Replaces the dictionary every hook of this module sees.
    pub fn with_dictionary(mut self, dictionary: Dictionary) -> Self {
        self.dictionary = Arc::new(dictionary);
        self
    }

    /// Sets the VM-level configuration bytes a guest reads back via
    /// `proxy_get_buffer_bytes(VmConfiguration, ...)`.
    pub fn with_vm_config(mut self, bytes: Vec<u8>) -> Self {
        self.vm_config = bytes;
        self
    }

    /// Sets the plugin-level configuration bytes a guest reads back via
    /// `proxy_get_buffer_bytes(PluginConfiguration, ...)`.
    pub fn with_plugin_config(mut self, bytes: Vec<u8>) -> Self {
        self.plugin_config = bytes;
        self
    }

    /// Builds a fresh `Store`/`Linker`/`Instance` for one hook call, runs the init sequence, and
    /// hands back the instance plus the `Store` it lives in and the shared state the host
    /// functions will mutate.
    pub fn instantiate(
        &self,
        hook: HookKind,
        context_id: i32,
        properties: PropertyResolver,
        min_log_level: LogLevel,
    ) -> Result<(Store<HostState>, Instance, Rc<RefCell<SharedState>>)> {
        let shared = Rc::new(RefCell::new(SharedState {
            hook,
            context_id,
            min_log_level,
            logs: Vec::new(),
            suppress_init_aborts: true,
            request_headers: HeaderMap::new(),
            request_trailers: HeaderMap::new(),
            response_headers: HeaderMap::new(),
            response_trailers: HeaderMap::new(),
            request_body: Vec::new(),
            response_body: Vec::new(),
            vm_config: self.vm_config.clone(),
            plugin_config: self.plugin_config.clone(),
            http_call_response_headers: HeaderMap::new(),
            http_call_response_trailers: HeaderMap::new(),
            http_call_response_body: Vec::new(),
            properties,
            pending_http_call: None,
            next_token: 0,
            stream_closed: false,
            effective_context: context_id,
            bump_high_water: None,
            secrets: self.secrets.clone(),
            dictionary: self.dictionary.clone(),
            stdio_buffer: Arc::new(RwLock::new(Vec::new())),
            stdio_drained: 0,
        }));

        // Standard-I/O shim (§4.1 step 1, §6): fd 1 and fd 2 both feed the same buffer, which
        // `SharedState::drain_stdio` turns into log entries after each guest call.
        let stdio_buffer = shared.borrow().stdio_buffer.clone();
        let wasi = WasiCtxBuilder::new()
            .inherit_env()
            .map_err(|e| HostError::Instantiate(format!("wasi env setup failed: {}", e)))?
            .stdout(Box::new(WritePipe::from_shared(stdio_buffer.clone())))
            .stderr(Box::new(WritePipe::from_shared(stdio_buffer)))
            .build();
        let host_state = HostState { wasi, shared: shared.clone() };
        let mut store = Store::new(&self.engine, host_state);

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        wasmtime_wasi::sync::add_to_linker(&mut linker, |s: &mut HostState| &mut s.wasi)
            .map_err(|e| HostError::Instantiate(format!("wasi linker setup failed: {}", e)))?;
        hostcalls::register_all(&mut linker)
            .map_err(|e| HostError::Instantiate(format!("host function registration failed: {}", e)))?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| HostError::Instantiate(format!("{:?}", e)))?;

        let vm_config_len = self.vm_config.len() as i32;
        let plugin_config_len = self.plugin_config.len() as i32;
        run_init_sequence(&mut store, &instance, context_id, vm_config_len, plugin_config_len)?;
        shared.borrow_mut().drain_stdio();
        shared.borrow_mut().suppress_init_aborts = false;

        Ok((store, instance, shared))
    }
}

/// The four best-effort init steps run once per fresh instance (§4.1 step 1):
/// standard-I/O shim is already wired in via WASI at `instantiate` time above, so this function
/// covers the remaining three: a tolerant `_start` call, the root-context/VM-start/plugin-start/
/// configure sequence (each call's second argument carries the byte length of the config buffer
/// it corresponds to, since that's the length a guest typically turns around and requests via
/// `proxy_get_buffer_bytes` against the matching buffer type), and `proxy_on_context_create` for
/// the stream context. A missing export at any step is not an error; a trap during one of these
/// steps is logged and otherwise ignored, since guests built against different proxy-wasm SDK
/// versions export different subsets of this sequence.
fn run_init_sequence(
    store: &mut Store<HostState>,
    instance: &Instance,
    context_id: i32,
    vm_config_len: i32,
    plugin_config_len: i32,
) -> Result<()> {
    call_if_exported(store, instance, "_start", &[])?;
    call_if_exported(store, instance, "proxy_on_context_create", &[Val::I32(0), Val::I32(0)])?;
    call_if_exported(store, instance, "proxy_on_vm_start", &[Val::I32(0), Val::I32(vm_config_len)])?;
    call_if_exported(
        store,
        instance,
        "proxy_on_plugin_start",
        &[Val::I32(0), Val::I32(plugin_config_len)],
    )?;
    call_if_exported(
        store,
        instance,
        "proxy_on_configure",
        &[Val::I32(0), Val::I32(plugin_config_len)],
    )?;
    call_if_exported(store, instance, "proxy_on_context_create", &[Val::I32(context_id), Val::I32(0)])?;
    Ok(())
}

fn call_if_exported(
    store: &mut Store<HostState>,
    instance: &Instance,
    name: &str,
    args: &[Val],
) -> Result<()> {
    let Some(func) = instance.get_func(store.as_context_mut(), name) else {
        return Ok(());
    };
    let mut results = vec![Val::I32(0); func.ty(&store).results().len()];
    if let Err(e) = func.call(store.as_context_mut(), args, &mut results) {
        log::warn!("init step \"{}\" trapped, continuing: {}", name, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_core_module_magic() {
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(detect_binary_format(&bytes), BinaryFormat::CoreModule);
    }

    #[test]
    fn detects_component_layer() {
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x0d, 0x00, 0x01, 0x00];
        assert_eq!(detect_binary_format(&bytes), BinaryFormat::Component);
    }

    #[test]
    fn rejects_bytes_without_wasm_magic() {
        assert_eq!(detect_binary_format(b"not wasm"), BinaryFormat::Unknown);
        assert!(LoadedModule::load(b"not wasm").is_err());
    }
}
