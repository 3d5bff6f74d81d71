//! The boundary between the call wrappers and the runtime hosting the native
//! module.

use core::cell::RefCell;
use std::rc::Rc;

use crate::signature::TypeTag;

/// A runtime hosting a native module.
///
/// The runtime owns the module, its linear memory and its allocator. A call
/// wrapper only borrows them for the duration of a call, so several wrappers
/// can share one runtime through `&mut R` or `Rc<RefCell<R>>`.
pub trait Runtime {
    /// Calls the function of the module with the given name.
    ///
    /// `returns` and `arg_types` are the type tags of the return value and of
    /// each argument. They are never [`TypeTag::Array`]: arrays are lowered
    /// to a pointer and a length before reaching the runtime.
    ///
    /// # Errors
    ///
    /// An error is returned if the function does not exist, if the arguments
    /// do not match its signature or if it fails.
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64>;

    /// Allocates `size` bytes in the linear memory and returns their offset.
    ///
    /// # Errors
    ///
    /// An error is returned if the allocator fails.
    fn malloc(&mut self, size: u32) -> anyhow::Result<u32>;

    /// Frees memory allocated by [`Self::malloc`].
    ///
    /// # Errors
    ///
    /// An error is returned if the allocator fails.
    fn free(&mut self, ptr: u32) -> anyhow::Result<()>;

    /// Reads bytes from the linear memory starting at the given byte offset.
    ///
    /// # Errors
    ///
    /// An error is returned if the range is outside of the linear memory.
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()>;

    /// Writes bytes into the linear memory starting at the given byte offset.
    ///
    /// # Errors
    ///
    /// An error is returned if the range is outside of the linear memory.
    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()>;
}

impl<R: Runtime + ?Sized> Runtime for &mut R {
    #[inline]
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64> {
        (**self).ccall(function, returns, arg_types, args)
    }

    #[inline]
    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        (**self).malloc(size)
    }

    #[inline]
    fn free(&mut self, ptr: u32) -> anyhow::Result<()> {
        (**self).free(ptr)
    }

    #[inline]
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()> {
        (**self).read(offset, buffer)
    }

    #[inline]
    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        (**self).write(offset, data)
    }
}

impl<R: Runtime + ?Sized> Runtime for Box<R> {
    #[inline]
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64> {
        (**self).ccall(function, returns, arg_types, args)
    }

    #[inline]
    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        (**self).malloc(size)
    }

    #[inline]
    fn free(&mut self, ptr: u32) -> anyhow::Result<()> {
        (**self).free(ptr)
    }

    #[inline]
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()> {
        (**self).read(offset, buffer)
    }

    #[inline]
    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        (**self).write(offset, data)
    }
}

/// Each method borrows the runtime for its own duration only.
impl<R: Runtime + ?Sized> Runtime for Rc<RefCell<R>> {
    #[inline]
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64> {
        self.borrow_mut().ccall(function, returns, arg_types, args)
    }

    #[inline]
    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        self.borrow_mut().malloc(size)
    }

    #[inline]
    fn free(&mut self, ptr: u32) -> anyhow::Result<()> {
        self.borrow_mut().free(ptr)
    }

    #[inline]
    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()> {
        self.borrow_mut().read(offset, buffer)
    }

    #[inline]
    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        self.borrow_mut().write(offset, data)
    }
}
