//! Builds callable wrappers around the native functions of a runtime.
//!
//! A [`CallWrapper`] collects the declaration of a function: its name, its
//! return shape and the shape of each parameter. [`CallWrapper::make`] turns
//! it into a [`Function`] which marshals the arguments of every call into the
//! flat numeric convention of the runtime, calls the native function, frees
//! the scratch memory and decodes the result.

use tracing::{debug, warn};

use crate::error::CallError;
use crate::heap::{Heap, TypedArray};
use crate::runtime::Runtime;
use crate::scratch::Scratch;
use crate::signature::{Param, Return, Signature, TypeTag};
use crate::value::Value;

/// A function declaration in progress.
pub struct CallWrapper<R> {
    /// The runtime the function lives in.
    runtime: R,

    /// The name of the native function.
    function: String,

    /// The return shape, once declared.
    returns: Option<Return>,

    /// The parameter shapes, once declared.
    params: Option<Vec<Param>>,
}

impl<R: Runtime> CallWrapper<R> {
    /// Starts the declaration of the native function with the given name.
    #[inline]
    pub fn of<N: Into<String>>(runtime: R, function: N) -> Self {
        Self {
            runtime,
            function: function.into(),
            returns: None,
            params: None,
        }
    }

    /// Declares a return value passed as is.
    ///
    /// Declaring [`TypeTag::Array`] here reads a single element of the
    /// default heap.
    #[must_use]
    #[inline]
    pub fn returns(self, tag: TypeTag) -> Self {
        self.returns_with(tag, Heap::default(), 1)
    }

    /// Declares a return value that is a pointer to `len` elements of the
    /// heap.
    #[must_use]
    #[inline]
    pub fn returns_array(self, heap: Heap, len: usize) -> Self {
        self.returns_with(TypeTag::Array, heap, len)
    }

    /// Declares the return value. The heap and the number of elements are
    /// only used when the tag is [`TypeTag::Array`].
    #[must_use]
    #[inline]
    pub fn returns_with(mut self, tag: TypeTag, heap: Heap, len: usize) -> Self {
        self.returns = Some(Return::new(tag, heap, len));
        self
    }

    /// Declares the parameters. Array parameters use the default heap.
    #[must_use]
    #[inline]
    pub fn params(self, tags: &[TypeTag]) -> Self {
        self.params_with_heaps(tags, &[])
    }

    /// Declares the parameters, each array parameter being copied into the
    /// heap at the same position in `heaps`.
    #[must_use]
    #[inline]
    pub fn params_with_heaps(mut self, tags: &[TypeTag], heaps: &[Option<Heap>]) -> Self {
        self.params = Some(Param::resolve(tags, heaps));
        self
    }

    /// Declares both the parameters and the return value.
    #[must_use]
    #[inline]
    pub fn signature(mut self, signature: &Signature) -> Self {
        self.params = Some(signature.params());
        self.returns = Some(signature.returns());
        self
    }

    /// Makes the callable [`Function`].
    ///
    /// # Errors
    ///
    /// An error is returned if the return value or the parameters were not
    /// declared.
    #[inline]
    pub fn make(self) -> Result<Function<R>, CallError> {
        let Some(returns) = self.returns else {
            return Err(CallError::MissingReturnType(self.function));
        };
        let Some(params) = self.params else {
            return Err(CallError::MissingParamTypes(self.function));
        };
        Ok(Function {
            runtime: self.runtime,
            name: self.function,
            returns,
            params,
        })
    }
}

/// A native function ready to be called with [Value] arguments.
pub struct Function<R> {
    /// The runtime the function lives in.
    runtime: R,

    /// The name of the native function.
    name: String,

    /// The return shape.
    returns: Return,

    /// The parameter shapes.
    params: Vec<Param>,
}

impl<R: Runtime> Function<R> {
    /// Returns the name of the native function.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared return shape.
    #[must_use]
    #[inline]
    pub const fn returns(&self) -> Return {
        self.returns
    }

    /// Returns the declared parameter shapes.
    #[must_use]
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Returns the runtime the function lives in.
    #[inline]
    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Gives back the runtime the function lives in.
    #[inline]
    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Calls the native function.
    ///
    /// Arguments are matched with the declared parameters by position.
    /// Arguments past the declared parameters are passed as plain numbers.
    /// The scratch memory holding the array arguments is freed before this
    /// function returns, whatever the outcome of the call.
    ///
    /// # Errors
    ///
    /// An error is returned if an argument does not have its declared shape,
    /// if the runtime fails to allocate or free scratch memory, if the native
    /// function fails, or if the array it returns cannot be read.
    pub fn call(&mut self, args: &[Value]) -> Result<Value, CallError> {
        let mut scratch = Scratch::new(&mut self.runtime);
        let mut arg_types = Vec::with_capacity(args.len());
        let mut arg_values = Vec::with_capacity(args.len());
        for (position, arg) in args.iter().enumerate() {
            let param = self
                .params
                .get(position)
                .copied()
                .unwrap_or(Param::Value(TypeTag::Number));
            match (param, arg) {
                (Param::Value(tag), &Value::Number(number)) => {
                    arg_types.push(tag);
                    arg_values.push(number);
                }
                (Param::Array(heap), &Value::Array(ref values)) => {
                    let (ptr, len) = copy_array(&mut scratch, heap, position, values)?;
                    arg_types.extend([TypeTag::Number, TypeTag::Number]);
                    arg_values.extend([f64::from(ptr), f64::from(len)]);
                }
                (Param::Value(_), &Value::Array(_)) => {
                    return Err(CallError::ArgumentMismatch {
                        position,
                        expected: "a number",
                    });
                }
                (Param::Array(_), &Value::Number(_)) => {
                    return Err(CallError::ArgumentMismatch {
                        position,
                        expected: "an array",
                    });
                }
            }
        }

        debug!(function = %self.name, args = ?arg_values, "calling native function");
        let response = scratch
            .runtime()
            .ccall(&self.name, self.returns.native_type(), &arg_types, &arg_values)
            .map_err(CallError::Native);
        let released = scratch.release();
        let response = match (response, released) {
            (Ok(response), Ok(())) => response,
            (Err(error), Ok(())) | (Ok(_), Err(error)) => return Err(error),
            (Err(error), Err(release_error)) => {
                warn!(function = %self.name, %release_error, "failed to release scratch memory after a failed call");
                return Err(error);
            }
        };

        decode(&mut self.runtime, self.returns, response)
    }
}

/// Copies an array argument into freshly allocated scratch memory and returns
/// the pointer and the length passed to the native function.
fn copy_array<R: Runtime + ?Sized>(
    scratch: &mut Scratch<'_, R>,
    heap: Heap,
    position: usize,
    values: &[f64],
) -> Result<(u32, u32), CallError> {
    let too_large = CallError::ArrayTooLarge { position, heap };
    let Ok(len) = u32::try_from(values.len()) else {
        return Err(too_large);
    };
    let Some(size) = len.checked_mul(heap.bytes_per_element()) else {
        return Err(too_large);
    };
    let array = TypedArray::from_values(heap, values);
    let ptr = scratch.allocate(size)?;
    heap.view(scratch.runtime())
        .set(&array, heap.element_offset(ptr))?;
    Ok((ptr, len))
}

/// Turns the raw result of the native function into the declared return
/// value.
fn decode<R: Runtime + ?Sized>(
    runtime: &mut R,
    returns: Return,
    response: f64,
) -> Result<Value, CallError> {
    match returns {
        Return::Value(_) => Ok(Value::Number(response)),
        Return::Array { heap, len } => {
            let ptr = pointer(response)
                .filter(|ptr| ptr.trailing_zeros() >= heap.bytes_per_element().trailing_zeros())
                .ok_or(CallError::InvalidPointer(response))?;
            heap.view(runtime)
                .read(heap.element_offset(ptr), len)
                .map(Value::Array)
        }
    }
}

/// Converts a raw result into a byte offset, if it is one.
///
/// Negative 32-bit integers are offsets at or above 2^31 read as signed.
fn pointer(value: f64) -> Option<u32> {
    if value.fract() != 0.0 || !(f64::from(i32::MIN)..=f64::from(u32::MAX)).contains(&value) {
        return None;
    }
    let value = if value < 0.0 { value + 4_294_967_296.0 } else { value };
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "the value is an integer in the range of u32"
    )]
    let ptr = value as u32;
    Some(ptr)
}
