//! The typed views over the linear memory of a runtime.
//!
//! A [Heap] names one way of looking at the linear memory: a width, a
//! signedness and whether the elements are floats. Data is copied into a heap
//! with a [`TypedArray`] and read back element by element with a [`HeapView`].

use core::fmt;
use core::str::FromStr;

use serde::Deserialize;

use crate::error::CallError;
use crate::runtime::Runtime;

/// A typed view over the linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Heap {
    /// Signed 8-bit integers.
    Heap8,

    /// Unsigned 8-bit integers.
    HeapU8,

    /// Signed 16-bit integers.
    Heap16,

    /// Unsigned 16-bit integers.
    HeapU16,

    /// Signed 32-bit integers.
    Heap32,

    /// Unsigned 32-bit integers.
    HeapU32,

    /// 32-bit floats.
    #[default]
    HeapF32,

    /// 64-bit floats.
    HeapF64,
}

impl Heap {
    /// Every heap, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Heap8,
        Self::HeapU8,
        Self::Heap16,
        Self::HeapU16,
        Self::Heap32,
        Self::HeapU32,
        Self::HeapF32,
        Self::HeapF64,
    ];

    /// Returns the name of the heap, as used in configuration files.
    #[must_use]
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Heap8 => "HEAP8",
            Self::HeapU8 => "HEAPU8",
            Self::Heap16 => "HEAP16",
            Self::HeapU16 => "HEAPU16",
            Self::Heap32 => "HEAP32",
            Self::HeapU32 => "HEAPU32",
            Self::HeapF32 => "HEAPF32",
            Self::HeapF64 => "HEAPF64",
        }
    }

    /// Returns the size in bytes of one element of the heap.
    #[must_use]
    #[inline]
    pub const fn bytes_per_element(self) -> u32 {
        1 << self.shift()
    }

    /// Returns the base-2 logarithm of [`Self::bytes_per_element`].
    const fn shift(self) -> u32 {
        match self {
            Self::Heap8 | Self::HeapU8 => 0,
            Self::Heap16 | Self::HeapU16 => 1,
            Self::Heap32 | Self::HeapU32 | Self::HeapF32 => 2,
            Self::HeapF64 => 3,
        }
    }

    /// Converts a byte offset in the linear memory into the index of the
    /// element of this heap that starts at or before it.
    #[must_use]
    #[inline]
    pub const fn element_offset(self, byte_offset: u32) -> u32 {
        byte_offset >> self.shift()
    }

    /// Converts an element index of this heap into a byte offset in the
    /// linear memory.
    ///
    /// Returns `None` if the offset does not fit in 32 bits.
    #[must_use]
    #[inline]
    pub const fn byte_offset(self, index: u32) -> Option<u32> {
        index.checked_mul(self.bytes_per_element())
    }

    /// Returns a [`HeapView`] of this heap over the memory of the runtime.
    #[inline]
    pub fn view<R: Runtime + ?Sized>(self, runtime: &mut R) -> HeapView<'_, R> {
        HeapView::new(runtime, self)
    }

    /// Appends the encoding of `value` as one element of this heap.
    ///
    /// Integers are truncated toward zero and wrapped around the width of the
    /// heap, non-finite values become zero.
    fn encode(self, value: f64, out: &mut Vec<u8>) {
        match self {
            Self::Heap8 | Self::HeapU8 | Self::Heap16 | Self::HeapU16 | Self::Heap32 | Self::HeapU32 => {
                let width = self.bytes_per_element() as usize;
                #[expect(clippy::little_endian_bytes, reason = "linear memory is little-endian")]
                let bytes = to_uint32(value).to_le_bytes();
                out.extend(bytes.iter().take(width));
            }
            Self::HeapF32 => {
                #[expect(clippy::cast_possible_truncation, reason = "rounding to f32 is the point")]
                let value = value as f32;
                #[expect(clippy::little_endian_bytes, reason = "linear memory is little-endian")]
                let bytes = value.to_le_bytes();
                out.extend_from_slice(&bytes);
            }
            Self::HeapF64 => {
                #[expect(clippy::little_endian_bytes, reason = "linear memory is little-endian")]
                let bytes = value.to_le_bytes();
                out.extend_from_slice(&bytes);
            }
        }
    }

    /// Decodes one element of this heap.
    ///
    /// Returns `None` if `bytes` is not exactly one element long.
    #[expect(clippy::little_endian_bytes, reason = "linear memory is little-endian")]
    fn decode(self, bytes: &[u8]) -> Option<f64> {
        Some(match self {
            Self::Heap8 => f64::from(i8::from_le_bytes(bytes.try_into().ok()?)),
            Self::HeapU8 => f64::from(u8::from_le_bytes(bytes.try_into().ok()?)),
            Self::Heap16 => f64::from(i16::from_le_bytes(bytes.try_into().ok()?)),
            Self::HeapU16 => f64::from(u16::from_le_bytes(bytes.try_into().ok()?)),
            Self::Heap32 => f64::from(i32::from_le_bytes(bytes.try_into().ok()?)),
            Self::HeapU32 => f64::from(u32::from_le_bytes(bytes.try_into().ok()?)),
            Self::HeapF32 => f64::from(f32::from_le_bytes(bytes.try_into().ok()?)),
            Self::HeapF64 => f64::from_le_bytes(bytes.try_into().ok()?),
        })
    }
}

impl fmt::Display for Heap {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Heap {
    type Err = CallError;

    #[inline]
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|heap| heap.name() == name)
            .ok_or_else(|| CallError::UnknownHeap(name.to_owned()))
    }
}

impl TryFrom<String> for Heap {
    type Error = CallError;

    #[inline]
    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Converts a number to an unsigned 32-bit integer by truncating it toward
/// zero and wrapping it modulo 2^32. Non-finite numbers become zero.
pub(crate) fn to_uint32(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "the value is already reduced to the range of u32"
    )]
    let wrapped = value.trunc().rem_euclid(4_294_967_296.0_f64) as u32;
    wrapped
}

/// A buffer holding numbers encoded as the elements of a [Heap], ready to be
/// written into the linear memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedArray {
    /// The heap the elements are encoded for.
    heap: Heap,

    /// The encoded elements.
    bytes: Vec<u8>,
}

impl TypedArray {
    /// Copies the numbers one by one into a new buffer of elements of the
    /// given heap.
    #[must_use]
    #[inline]
    pub fn from_values(heap: Heap, values: &[f64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len().saturating_mul(heap.bytes_per_element() as usize));
        for &value in values {
            heap.encode(value, &mut bytes);
        }
        Self { heap, bytes }
    }

    /// Returns the heap the elements are encoded for.
    #[must_use]
    #[inline]
    pub const fn heap(&self) -> Heap {
        self.heap
    }

    /// Returns the number of elements in the buffer.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.heap.bytes_per_element() as usize
    }

    /// Returns `true` if the buffer holds no element.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the encoded elements.
    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the elements back into numbers.
    #[must_use]
    #[inline]
    pub fn to_values(&self) -> Vec<f64> {
        self.bytes
            .chunks_exact(self.heap.bytes_per_element() as usize)
            .filter_map(|chunk| self.heap.decode(chunk))
            .collect()
    }
}

/// One [Heap] over the linear memory of a [Runtime].
pub struct HeapView<'rt, R: ?Sized> {
    /// The runtime owning the linear memory.
    runtime: &'rt mut R,

    /// The heap used to interpret the memory.
    heap: Heap,
}

impl<'rt, R: Runtime + ?Sized> HeapView<'rt, R> {
    /// Creates a view of the given heap over the memory of the runtime.
    #[inline]
    pub fn new(runtime: &'rt mut R, heap: Heap) -> Self {
        Self { runtime, heap }
    }

    /// Returns the heap of this view.
    #[must_use]
    #[inline]
    pub const fn heap(&self) -> Heap {
        self.heap
    }

    /// Writes every element of the array starting at the given element index.
    ///
    /// # Errors
    ///
    /// An error is returned if the array was encoded for another heap or if
    /// it does not fit in the linear memory.
    #[inline]
    pub fn set(&mut self, array: &TypedArray, element_offset: u32) -> Result<(), CallError> {
        if array.heap() != self.heap {
            return Err(CallError::HeapMismatch {
                expected: self.heap,
                found: array.heap(),
            });
        }
        let byte_offset = self.byte_offset(element_offset)?;
        self.runtime.write(byte_offset, array.as_bytes())?;
        Ok(())
    }

    /// Reads the element at the given index.
    ///
    /// # Errors
    ///
    /// An error is returned if the element is outside of the linear memory.
    #[inline]
    pub fn get(&mut self, index: u32) -> Result<f64, CallError> {
        let values = self.read(index, 1)?;
        values
            .first()
            .copied()
            .ok_or(CallError::OutOfBounds { heap: self.heap, index })
    }

    /// Reads `len` contiguous elements starting at the given index.
    ///
    /// # Errors
    ///
    /// An error is returned if one of the elements is outside of the linear
    /// memory. Reads running past the 32-bit address space fail before
    /// anything is read.
    #[inline]
    pub fn read(&mut self, index: u32, len: usize) -> Result<Vec<f64>, CallError> {
        let byte_offset = self.byte_offset(index)?;
        let size = u32::try_from(len)
            .ok()
            .and_then(|len| len.checked_mul(self.heap.bytes_per_element()))
            .filter(|&size| byte_offset.checked_add(size).is_some())
            .ok_or(CallError::OutOfBounds { heap: self.heap, index })?;
        let mut buffer = vec![0; size as usize];
        self.runtime.read(byte_offset, &mut buffer)?;
        Ok(buffer
            .chunks_exact(self.heap.bytes_per_element() as usize)
            .filter_map(|chunk| self.heap.decode(chunk))
            .collect())
    }

    /// Converts an element index of this view into a byte offset.
    fn byte_offset(&self, index: u32) -> Result<u32, CallError> {
        self.heap
            .byte_offset(index)
            .ok_or(CallError::OutOfBounds { heap: self.heap, index })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testing::TestRuntime;

    #[test]
    fn byte_offsets_become_width_aware_element_offsets() {
        assert_eq!(Heap::Heap32.element_offset(16), 4, "32-bit heaps divide by 4");
        assert_eq!(Heap::HeapU32.element_offset(16), 4, "32-bit heaps divide by 4");
        assert_eq!(Heap::HeapF32.element_offset(16), 4, "32-bit heaps divide by 4");
        assert_eq!(Heap::HeapF64.element_offset(16), 2, "64-bit heaps divide by 8");
        assert_eq!(Heap::Heap16.element_offset(16), 8, "16-bit heaps divide by 2");
        assert_eq!(Heap::HeapU16.element_offset(16), 8, "16-bit heaps divide by 2");
        assert_eq!(Heap::Heap8.element_offset(16), 16, "8-bit heaps divide by 1");
        assert_eq!(Heap::HeapU8.element_offset(16), 16, "8-bit heaps divide by 1");
    }

    #[test]
    fn element_offsets_convert_back_to_byte_offsets() {
        for heap in Heap::ALL {
            assert_eq!(
                heap.byte_offset(heap.element_offset(64)),
                Some(64),
                "{heap} should map aligned offsets both ways"
            );
        }
        assert_eq!(Heap::HeapF64.byte_offset(u32::MAX), None, "the offset overflows");
    }

    #[test]
    fn heap_names_parse() {
        for heap in Heap::ALL {
            assert_eq!(heap.name().parse::<Heap>().unwrap(), heap, "names should round-trip");
        }
        assert!(matches!(
            "HEAP64".parse::<Heap>(),
            Err(CallError::UnknownHeap(name)) if name == "HEAP64"
        ));
        assert_eq!(Heap::default(), Heap::HeapF32, "the default heap holds f32");
    }

    #[test]
    fn integer_heaps_truncate_and_wrap() {
        let array = TypedArray::from_values(Heap::HeapU8, &[256.0, -1.0, 3.7, f64::NAN]);
        assert_eq!(array.as_bytes(), &[0, 255, 3, 0]);

        let array = TypedArray::from_values(Heap::Heap8, &[128.0, -3.9]);
        assert_eq!(array.to_values(), vec![-128.0, -3.0]);

        let array = TypedArray::from_values(Heap::HeapU16, &[65_537.0, f64::INFINITY]);
        assert_eq!(array.to_values(), vec![1.0, 0.0]);

        let array = TypedArray::from_values(Heap::Heap32, &[4_294_967_295.0]);
        assert_eq!(array.to_values(), vec![-1.0]);
    }

    #[test]
    fn float_heaps_round_to_their_precision() {
        let array = TypedArray::from_values(Heap::HeapF32, &[0.1]);
        assert_eq!(array.to_values(), vec![f64::from(0.1_f32)]);
        assert_eq!(array.len(), 1);
        assert_eq!(array.as_bytes().len(), 4);

        let array = TypedArray::from_values(Heap::HeapF64, &[0.1]);
        assert_eq!(array.to_values(), vec![0.1]);
    }

    #[test]
    fn view_writes_at_element_offsets() {
        let mut runtime = TestRuntime::new(64);
        let array = TypedArray::from_values(Heap::HeapF64, &[1.5, -2.5]);
        let mut view = Heap::HeapF64.view(&mut runtime);
        view.set(&array, Heap::HeapF64.element_offset(16)).unwrap();
        assert_eq!(view.get(2).unwrap(), 1.5);
        assert_eq!(view.get(3).unwrap(), -2.5);
        assert_eq!(&runtime.memory()[16..24], &1.5_f64.to_le_bytes());
    }

    #[test]
    fn view_rejects_arrays_of_other_heaps() {
        let mut runtime = TestRuntime::new(16);
        let array = TypedArray::from_values(Heap::HeapF32, &[1.0, 300.0]);
        let mut view = Heap::HeapU8.view(&mut runtime);
        assert!(matches!(
            view.set(&array, 0),
            Err(CallError::HeapMismatch { expected: Heap::HeapU8, found: Heap::HeapF32 })
        ));
        assert_eq!(runtime.memory(), &[0; 16], "nothing is written");
    }

    #[test]
    fn view_reports_out_of_bounds_accesses() {
        let mut runtime = TestRuntime::new(16);
        let mut view = Heap::Heap32.view(&mut runtime);
        assert!(matches!(view.get(4), Err(CallError::Native(_))));
        assert!(matches!(
            view.get(u32::MAX),
            Err(CallError::OutOfBounds { heap: Heap::Heap32, index: u32::MAX })
        ));
    }

    #[test]
    fn view_rejects_reads_past_the_address_space() {
        let mut runtime = TestRuntime::new(16);
        let mut view = Heap::HeapF64.view(&mut runtime);
        assert!(matches!(
            view.read(1, usize::MAX / 8),
            Err(CallError::OutOfBounds { heap: Heap::HeapF64, index: 1 })
        ));
        assert!(matches!(
            view.read(1, 536_870_911),
            Err(CallError::OutOfBounds { heap: Heap::HeapF64, index: 1 })
        ), "the read ends past 4 GiB");
        assert!(
            matches!(view.read(1, 2), Ok(values) if values == vec![0.0, 0.0]),
            "reads inside the memory still work"
        );
    }

    /// Returns a strategy producing values that every element of the heap can
    /// represent exactly.
    fn representable(heap: Heap) -> BoxedStrategy<f64> {
        match heap {
            Heap::Heap8 => any::<i8>().prop_map(f64::from).boxed(),
            Heap::HeapU8 => any::<u8>().prop_map(f64::from).boxed(),
            Heap::Heap16 => any::<i16>().prop_map(f64::from).boxed(),
            Heap::HeapU16 => any::<u16>().prop_map(f64::from).boxed(),
            Heap::Heap32 => any::<i32>().prop_map(f64::from).boxed(),
            Heap::HeapU32 => any::<u32>().prop_map(f64::from).boxed(),
            Heap::HeapF32 => any::<i16>().prop_map(|value| f64::from(value) / 4.0).boxed(),
            Heap::HeapF64 => any::<f64>().prop_filter("finite", |value| value.is_finite()).boxed(),
        }
    }

    fn arb_heap_values() -> impl Strategy<Value = (Heap, Vec<f64>, u32)> {
        proptest::sample::select(Heap::ALL.to_vec()).prop_flat_map(|heap| {
            (
                Just(heap),
                proptest::collection::vec(representable(heap), 0..32),
                0_u32..64,
            )
        })
    }

    proptest! {
        #[test]
        fn values_round_trip_through_every_heap((heap, values, offset) in arb_heap_values()) {
            let mut runtime = TestRuntime::new(1024);
            let array = TypedArray::from_values(heap, &values);
            let mut view = heap.view(&mut runtime);
            view.set(&array, offset).unwrap();
            prop_assert_eq!(view.read(offset, values.len()).unwrap(), values);
        }
    }
}
