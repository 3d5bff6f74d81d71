//! A [Runtime] hosting a WebAssembly module with [wasmtime].

use std::sync::LazyLock;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use tracing::debug;
use wasmtime::{Engine, Func, Instance, Linker, Memory, Module, Store, TypedFunc, Val, ValType};

use crate::heap::to_uint32;
use crate::runtime::Runtime;
use crate::signature::TypeTag;

/// The [Engine] used by all the instances of [`WasmRuntime`].
static ENGINE: LazyLock<Engine> = LazyLock::new(Engine::default);

/// The names of the exports a module must provide to be used by a
/// [`WasmRuntime`].
#[serde_inline_default]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Exports {
    /// The linear memory.
    #[serde_inline_default("memory".to_owned())]
    pub memory: String,

    /// The allocator, taking a size in bytes and returning an offset.
    #[serde_inline_default("malloc".to_owned())]
    pub malloc: String,

    /// The deallocator, taking an offset returned by the allocator.
    #[serde_inline_default("free".to_owned())]
    pub free: String,
}

impl Default for Exports {
    #[inline]
    fn default() -> Self {
        Self {
            memory: "memory".to_owned(),
            malloc: "malloc".to_owned(),
            free: "free".to_owned(),
        }
    }
}

/// A WebAssembly module instance.
pub struct WasmRuntime {
    /// The [Store] used by the module in the [wasmtime] runtime.
    store: Store<()>,

    /// The [Instance] of the module in the [wasmtime] runtime.
    instance: Instance,

    /// The linear memory of the module.
    memory: Memory,

    /// The module function that allocates a buffer of a given size.
    malloc: TypedFunc<u32, u32>,

    /// The module function that frees a buffer allocated by [`Self::malloc`].
    free: TypedFunc<u32, ()>,
}

impl WasmRuntime {
    /// Loads a module from the given WebAssembly bytes, using the default
    /// [Exports].
    ///
    /// # Errors
    ///
    /// See [`WasmRuntime::load_with`].
    #[inline]
    pub fn load<B: AsRef<[u8]>>(bytes: B) -> anyhow::Result<Self> {
        Self::load_with(bytes, &Exports::default())
    }

    /// Loads a module from the given WebAssembly bytes.
    ///
    /// Both the binary and the text format are accepted.
    ///
    /// # Errors
    ///
    /// This function can fail in multiple ways:
    /// * The given bytes are not valid WebAssembly (see [`Module::new`]).
    /// * The module can't be instantiated by the [wasmtime] runtime, for
    ///   example because it has imports (see [`Linker::instantiate`]).
    /// * The module does not have the given [Exports].
    #[inline]
    pub fn load_with<B: AsRef<[u8]>>(bytes: B, exports: &Exports) -> anyhow::Result<Self> {
        let module = Module::new(&ENGINE, bytes)?;
        let mut store = Store::new(&ENGINE, ());

        // Instantiate the module.
        let linker = Linker::new(&ENGINE);
        let instance = linker.instantiate(&mut store, &module)?;

        // Get the memory and the allocator from the module.
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .with_context(|| format!("no `{}` memory export", exports.memory))?;
        let malloc = instance
            .get_typed_func(&mut store, &exports.malloc)
            .with_context(|| format!("no `{}` allocator export", exports.malloc))?;
        let free = instance
            .get_typed_func(&mut store, &exports.free)
            .with_context(|| format!("no `{}` deallocator export", exports.free))?;

        Ok(Self {
            store,
            instance,
            memory,
            malloc,
            free,
        })
    }

    /// Returns the size in bytes of the linear memory.
    #[must_use]
    #[inline]
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Finds an exported function by name, with or without the leading
    /// underscore C symbols get in some toolchains.
    fn function(&mut self, name: &str) -> anyhow::Result<Func> {
        if let Some(function) = self.instance.get_func(&mut self.store, name) {
            return Ok(function);
        }
        self.instance
            .get_func(&mut self.store, &format!("_{name}"))
            .with_context(|| format!("unknown function `{name}`"))
    }
}

impl Runtime for WasmRuntime {
    /// Calls the exported function with the given name.
    ///
    /// Each argument is converted to the type of the matching parameter of the
    /// export: `i32` parameters wrap the number the way a C cast does, `i64`
    /// parameters truncate it. An `i32` result is read as unsigned when the
    /// return tag is unsigned. A function without results returns `0`.
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        _arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64> {
        let func = self.function(function)?;
        let ty = func.ty(&self.store);
        if ty.params().len() != args.len() {
            bail!(
                "`{function}` takes {} arguments but {} were given",
                ty.params().len(),
                args.len()
            );
        }
        let params = ty
            .params()
            .zip(args)
            .map(|(param, &arg)| lower(&param, arg))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut results = vec![Val::I32(0); ty.results().len()];
        debug!(function, ?params, "calling wasm export");
        func.call(&mut self.store, &params, &mut results)?;
        results.first().map_or(Ok(0.0), |result| lift(result, returns))
    }

    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        let ptr = self.malloc.call(&mut self.store, size)?;
        if ptr == 0 && size != 0 {
            bail!("out of memory while allocating {size} bytes");
        }
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> anyhow::Result<()> {
        self.free.call(&mut self.store, ptr)
    }

    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()> {
        self.memory
            .read(&self.store, usize::try_from(offset)?, buffer)
            .with_context(|| format!("cannot read {} bytes at {offset}", buffer.len()))
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        self.memory
            .write(&mut self.store, usize::try_from(offset)?, data)
            .with_context(|| format!("cannot write {} bytes at {offset}", data.len()))
    }
}

/// Converts a number to a value of the given WebAssembly type.
fn lower(ty: &ValType, value: f64) -> anyhow::Result<Val> {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        reason = "numbers are narrowed to the parameter type on purpose"
    )]
    let lowered = match *ty {
        ValType::I32 => Val::I32(to_uint32(value) as i32),
        ValType::I64 => Val::I64(value as i64),
        ValType::F32 => Val::F32((value as f32).to_bits()),
        ValType::F64 => Val::F64(value.to_bits()),
        _ => bail!("unsupported parameter type `{ty}`"),
    };
    Ok(lowered)
}

/// Converts a WebAssembly value to a number.
fn lift(value: &Val, returns: TypeTag) -> anyhow::Result<f64> {
    #[expect(
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        reason = "results are widened to a number on purpose"
    )]
    let lifted = match *value {
        Val::I32(result) if returns.is_unsigned() => f64::from(result as u32),
        Val::I32(result) => f64::from(result),
        Val::I64(result) => result as f64,
        Val::F32(bits) => f64::from(f32::from_bits(bits)),
        Val::F64(bits) => f64::from_bits(bits),
        _ => bail!("unsupported result type"),
    };
    Ok(lifted)
}
