//! An in-memory [Runtime] used to test call wrappers without a real module.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, bail};

use crate::runtime::Runtime;
use crate::signature::TypeTag;

/// The alignment of every allocation, large enough for any heap.
const ALIGNMENT: u32 = 8;

/// A native function of a [`TestRuntime`].
///
/// The function receives the linear memory and the flat list of arguments.
type TestFunction = Box<dyn FnMut(&mut [u8], &[f64]) -> anyhow::Result<f64>>;

/// A call received by a [`TestRuntime`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// The name of the called function.
    pub function: String,

    /// The type tag of the return value.
    pub returns: TypeTag,

    /// The type tag of each argument.
    pub arg_types: Vec<TypeTag>,

    /// The arguments.
    pub args: Vec<f64>,

    /// The allocations that were live when the function was called.
    pub live: Vec<u32>,
}

/// A [Runtime] backed by a byte vector and a bump allocator.
///
/// Allocations are never reused, so every pointer identifies exactly one
/// allocation and double frees are detected.
pub struct TestRuntime {
    /// The linear memory.
    memory: Vec<u8>,

    /// The offset of the next allocation.
    next: u32,

    /// The size of every live allocation by offset.
    live: BTreeMap<u32, u32>,

    /// The size of every allocation, in allocation order.
    allocated: Vec<u32>,

    /// The offset of every freed allocation, in release order.
    released: Vec<u32>,

    /// The number of allocations that succeed before the allocator fails.
    allocations_left: Option<usize>,

    /// The offsets for which [`Runtime::free`] fails.
    failing_frees: HashSet<u32>,

    /// The functions of the module.
    functions: HashMap<String, TestFunction>,

    /// Every call received, in order.
    calls: Vec<RecordedCall>,
}

impl TestRuntime {
    /// Creates a runtime with `size` bytes of zeroed linear memory.
    ///
    /// The first [ALIGNMENT] bytes are never allocated, so no allocation
    /// starts at offset zero.
    #[must_use]
    #[inline]
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            next: ALIGNMENT,
            live: BTreeMap::new(),
            allocated: Vec::new(),
            released: Vec::new(),
            allocations_left: None,
            failing_frees: HashSet::new(),
            functions: HashMap::new(),
            calls: Vec::new(),
        }
    }

    /// Defines a function of the module.
    #[inline]
    pub fn define<N, F>(&mut self, name: N, function: F)
    where
        N: Into<String>,
        F: FnMut(&mut [u8], &[f64]) -> anyhow::Result<f64> + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
    }

    /// Makes the allocator fail once `count` more allocations succeeded.
    #[inline]
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.allocations_left = Some(count);
    }

    /// Makes [`Runtime::free`] fail for the given offset.
    #[inline]
    pub fn fail_free(&mut self, ptr: u32) {
        self.failing_frees.insert(ptr);
    }

    /// Returns the linear memory.
    #[must_use]
    #[inline]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Returns every call received, in order.
    #[must_use]
    #[inline]
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    /// Returns the size of every allocation, in allocation order.
    #[must_use]
    #[inline]
    pub fn allocated(&self) -> &[u32] {
        &self.allocated
    }

    /// Returns the offset of every freed allocation, in release order.
    #[must_use]
    #[inline]
    pub fn released(&self) -> &[u32] {
        &self.released
    }

    /// Returns the number of allocations that are not freed.
    #[must_use]
    #[inline]
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Returns the memory range `offset..offset + len`.
    fn range(&self, offset: u32, len: usize) -> anyhow::Result<core::ops::Range<usize>> {
        let start = usize::try_from(offset)?;
        let end = start.checked_add(len).context("range overflows")?;
        if end > self.memory.len() {
            bail!("{start}..{end} is outside of the linear memory");
        }
        Ok(start..end)
    }
}

impl Runtime for TestRuntime {
    fn ccall(
        &mut self,
        function: &str,
        returns: TypeTag,
        arg_types: &[TypeTag],
        args: &[f64],
    ) -> anyhow::Result<f64> {
        self.calls.push(RecordedCall {
            function: function.to_owned(),
            returns,
            arg_types: arg_types.to_vec(),
            args: args.to_vec(),
            live: self.live.keys().copied().collect(),
        });
        let native = self
            .functions
            .get_mut(function)
            .with_context(|| format!("unknown function `{function}`"))?;
        native(self.memory.as_mut_slice(), args)
    }

    fn malloc(&mut self, size: u32) -> anyhow::Result<u32> {
        if let Some(left) = self.allocations_left.as_mut() {
            if *left == 0 {
                bail!("allocator exhausted");
            }
            *left = left.saturating_sub(1);
        }
        let ptr = self.next;
        // Empty allocations still take a byte so that offsets stay unique.
        let end = ptr.checked_add(size.max(1)).context("out of memory")?;
        self.range(ptr, size as usize).context("out of memory")?;
        self.next = end
            .checked_next_multiple_of(ALIGNMENT)
            .context("out of memory")?;
        self.live.insert(ptr, size);
        self.allocated.push(size);
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32) -> anyhow::Result<()> {
        if self.failing_frees.contains(&ptr) {
            bail!("free of {ptr} failed");
        }
        if self.live.remove(&ptr).is_none() {
            bail!("{ptr} is not a live allocation");
        }
        self.released.push(ptr);
        Ok(())
    }

    fn read(&mut self, offset: u32, buffer: &mut [u8]) -> anyhow::Result<()> {
        let range = self.range(offset, buffer.len())?;
        buffer.copy_from_slice(self.memory.get(range).context("outside of the linear memory")?);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> anyhow::Result<()> {
        let range = self.range(offset, data.len())?;
        self.memory
            .get_mut(range)
            .context("outside of the linear memory")?
            .copy_from_slice(data);
        Ok(())
    }
}
