//! Scratch memory allocated for the array arguments of one call.

use core::mem;

use anyhow::Context;
use tracing::{trace, warn};

use crate::error::CallError;
use crate::runtime::Runtime;

/// The scratch allocations of one call.
///
/// Every allocation is freed exactly once: by [`Scratch::release`] on the
/// normal path, or when the [Scratch] is dropped on any other path.
pub struct Scratch<'rt, R: Runtime + ?Sized> {
    /// The runtime owning the allocator.
    runtime: &'rt mut R,

    /// The offsets of the allocations that are not freed yet.
    allocations: Vec<u32>,
}

impl<'rt, R: Runtime + ?Sized> Scratch<'rt, R> {
    /// Creates an empty list of allocations over the given runtime.
    #[inline]
    pub fn new(runtime: &'rt mut R) -> Self {
        Self {
            runtime,
            allocations: Vec::new(),
        }
    }

    /// Returns the runtime the memory is allocated in.
    #[inline]
    pub fn runtime(&mut self) -> &mut R {
        &mut *self.runtime
    }

    /// Returns the offsets of the allocations that are not freed yet.
    #[must_use]
    #[inline]
    pub fn allocations(&self) -> &[u32] {
        &self.allocations
    }

    /// Allocates `size` bytes and records the allocation.
    ///
    /// # Errors
    ///
    /// An error is returned if the allocator of the runtime fails.
    #[inline]
    pub fn allocate(&mut self, size: u32) -> Result<u32, CallError> {
        let ptr = self
            .runtime
            .malloc(size)
            .with_context(|| format!("failed to allocate {size} bytes of scratch memory"))?;
        trace!(ptr, size, "allocated scratch memory");
        self.allocations.push(ptr);
        Ok(ptr)
    }

    /// Frees every recorded allocation.
    ///
    /// Every allocation is freed even if freeing one of them fails.
    ///
    /// # Errors
    ///
    /// The first error returned by the allocator of the runtime is returned.
    #[inline]
    pub fn release(mut self) -> Result<(), CallError> {
        let mut result = Ok(());
        for ptr in mem::take(&mut self.allocations) {
            trace!(ptr, "releasing scratch memory");
            if let Err(error) = self.runtime.free(ptr) {
                if result.is_ok() {
                    result = Err(CallError::Native(error));
                } else {
                    warn!(ptr, %error, "failed to release scratch memory");
                }
            }
        }
        result
    }
}

impl<R: Runtime + ?Sized> Drop for Scratch<'_, R> {
    fn drop(&mut self) {
        for ptr in self.allocations.drain(..) {
            trace!(ptr, "releasing scratch memory");
            if let Err(error) = self.runtime.free(ptr) {
                warn!(ptr, %error, "failed to release scratch memory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRuntime;

    #[test]
    fn release_frees_every_allocation_once() {
        let mut runtime = TestRuntime::new(256);
        let mut scratch = Scratch::new(&mut runtime);
        let first = scratch.allocate(12).unwrap();
        let second = scratch.allocate(3).unwrap();
        assert_eq!(scratch.allocations(), &[first, second]);
        scratch.release().unwrap();
        assert_eq!(runtime.released(), &[first, second]);
        assert_eq!(runtime.live_allocations(), 0);
    }

    #[test]
    fn drop_frees_the_remaining_allocations() {
        let mut runtime = TestRuntime::new(256);
        {
            let mut scratch = Scratch::new(&mut runtime);
            scratch.allocate(8).unwrap();
            scratch.allocate(8).unwrap();
        }
        assert_eq!(runtime.released().len(), 2);
        assert_eq!(runtime.live_allocations(), 0);
    }

    #[test]
    fn release_keeps_going_after_a_failed_free() {
        let mut runtime = TestRuntime::new(256);
        let mut scratch = Scratch::new(&mut runtime);
        let first = scratch.allocate(4).unwrap();
        let second = scratch.allocate(4).unwrap();
        scratch.runtime().fail_free(first);
        assert!(matches!(scratch.release(), Err(CallError::Native(_))));
        assert_eq!(runtime.released(), &[second]);
    }

    #[test]
    fn allocation_failures_are_native_errors() {
        let mut runtime = TestRuntime::new(16);
        let mut scratch = Scratch::new(&mut runtime);
        let error = scratch.allocate(64).unwrap_err();
        assert!(matches!(error, CallError::Native(_)));
        assert!(scratch.allocations().is_empty());
    }
}
