//! Typed call wrappers for the functions of a compiled WebAssembly module.
//!
//! A native function only understands flat numbers and pointers into its
//! linear memory. A [`Function`] made by a [`CallWrapper`] takes care of the
//! rest: array arguments are copied into scratch memory allocated in the
//! module and passed as a pointer followed by a length, the function is called
//! by name, array results are read back from the linear memory, and the
//! scratch memory is freed whatever the outcome of the call.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use cwrap::host::WasmRuntime;
//! use cwrap::{CallWrapper, Heap, TypeTag, Value};
//!
//! let runtime = WasmRuntime::load(std::fs::read("module.wasm")?)?;
//! let mut sum = CallWrapper::of(runtime, "sum")
//!     .returns(TypeTag::Float32)
//!     .params_with_heaps(&[TypeTag::Array], &[Some(Heap::HeapF32)])
//!     .make()?;
//! assert_eq!(sum.call(&[[1.0, 2.0, 3.0].into()])?, Value::Number(6.0));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod heap;
#[cfg(feature = "host")]
pub mod host;
pub mod runtime;
pub mod scratch;
pub mod signature;
#[cfg(any(test, feature = "tests"))]
pub mod testing;
pub mod value;
pub mod wrapper;

pub use error::CallError;
pub use heap::{Heap, HeapView, TypedArray};
pub use runtime::Runtime;
pub use signature::{Param, Return, Signature, TypeTag};
pub use value::Value;
pub use wrapper::{CallWrapper, Function};
