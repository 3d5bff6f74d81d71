//! The errors returned while declaring and calling a wrapped function.

use crate::heap::Heap;

/// An error returned by a [`CallWrapper`](crate::wrapper::CallWrapper) or by
/// the [`Function`](crate::wrapper::Function) it makes.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// [`CallWrapper::make`](crate::wrapper::CallWrapper::make) was called
    /// before the return type was declared.
    #[error("the return type of `{0}` was not declared")]
    MissingReturnType(String),

    /// [`CallWrapper::make`](crate::wrapper::CallWrapper::make) was called
    /// before the parameter types were declared.
    #[error("the parameter types of `{0}` were not declared")]
    MissingParamTypes(String),

    /// The string is not one of the known type tags.
    #[error("unknown type tag `{0}`")]
    UnknownTypeTag(String),

    /// The string is not one of the known heap names.
    #[error("unknown heap `{0}`")]
    UnknownHeap(String),

    /// The argument at the given position does not have the declared shape.
    #[error("argument {position} should be {expected}")]
    ArgumentMismatch {
        /// The position of the argument in the call.
        position: usize,

        /// A description of the declared shape.
        expected: &'static str,
    },

    /// The array argument at the given position does not fit in a 32-bit
    /// address space once copied into its heap.
    #[error("argument {position} is too large to be copied into {heap}")]
    ArrayTooLarge {
        /// The position of the argument in the call.
        position: usize,

        /// The heap the argument was declared to be copied into.
        heap: Heap,
    },

    /// The element index cannot be turned into a byte offset of the linear
    /// memory.
    #[error("element {index} is outside of {heap}")]
    OutOfBounds {
        /// The heap being accessed.
        heap: Heap,

        /// The element index that was requested.
        index: u32,
    },

    /// A [`TypedArray`](crate::heap::TypedArray) was written through a view of
    /// another heap.
    #[error("cannot write an array of {found} into {expected}")]
    HeapMismatch {
        /// The heap of the view.
        expected: Heap,

        /// The heap the array was encoded for.
        found: Heap,
    },

    /// The native function returned a value that is not a valid pointer into
    /// the declared return heap.
    #[error("{0} is not a valid pointer")]
    InvalidPointer(f64),

    /// The runtime failed to allocate, free, access memory or run the native
    /// function.
    #[error(transparent)]
    Native(#[from] anyhow::Error),
}
