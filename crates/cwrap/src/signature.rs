//! The vocabulary used to declare the parameters and the return value of a
//! native function.

use core::fmt;
use core::str::FromStr;

use serde::Deserialize;
use serde_inline_default::serde_inline_default;

use crate::error::CallError;
use crate::heap::Heap;

/// The declared kind of a parameter or of a return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum TypeTag {
    /// A signed 8-bit integer.
    Int8,

    /// An unsigned 8-bit integer.
    Uint8,

    /// A signed 16-bit integer.
    Int16,

    /// An unsigned 16-bit integer.
    Uint16,

    /// A signed 32-bit integer.
    Int32,

    /// An unsigned 32-bit integer.
    Uint32,

    /// A 32-bit float.
    Float32,

    /// Any number, carried as a 64-bit float.
    #[default]
    Number,

    /// A list of numbers passed as a pointer into a [Heap] and a length.
    Array,
}

impl TypeTag {
    /// Every type tag, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Int8,
        Self::Uint8,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Number,
        Self::Array,
    ];

    /// Returns the name of the type tag, as used in configuration files.
    #[must_use]
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::Number => "number",
            Self::Array => "array",
        }
    }

    /// Returns `true` for the [`TypeTag::Array`] sentinel.
    #[must_use]
    #[inline]
    pub const fn is_array(self) -> bool {
        matches!(self, Self::Array)
    }

    /// Returns `true` for the unsigned integer tags.
    #[must_use]
    #[inline]
    pub const fn is_unsigned(self) -> bool {
        matches!(self, Self::Uint8 | Self::Uint16 | Self::Uint32)
    }
}

impl fmt::Display for TypeTag {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TypeTag {
    type Err = CallError;

    #[inline]
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name == "float64" {
            return Ok(Self::Number);
        }
        Self::ALL
            .into_iter()
            .find(|tag| tag.name() == name)
            .ok_or_else(|| CallError::UnknownTypeTag(name.to_owned()))
    }
}

impl TryFrom<String> for TypeTag {
    type Error = CallError;

    #[inline]
    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// How one argument is passed to the native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// The number is passed as is.
    Value(TypeTag),

    /// The numbers are copied into scratch memory of the heap, and a pointer
    /// to them is passed followed by their count.
    Array(Heap),
}

impl Param {
    /// Pairs each tag with the heap at the same position.
    ///
    /// Array tags without a heap use the default heap. Heaps at the position
    /// of other tags are ignored.
    #[must_use]
    #[inline]
    pub fn resolve(tags: &[TypeTag], heaps: &[Option<Heap>]) -> Vec<Self> {
        tags.iter()
            .enumerate()
            .map(|(position, &tag)| {
                if tag.is_array() {
                    Self::Array(heaps.get(position).copied().flatten().unwrap_or_default())
                } else {
                    Self::Value(tag)
                }
            })
            .collect()
    }
}

/// How the raw result of the native function is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Return {
    /// The result is returned as is.
    Value(TypeTag),

    /// The result is a byte offset from which `len` elements of the heap are
    /// read.
    Array {
        /// The heap the elements are read from.
        heap: Heap,

        /// The number of elements to read.
        len: usize,
    },
}

impl Return {
    /// Declares the return shape from a tag, the heap and the number of
    /// elements read when the tag is [`TypeTag::Array`].
    #[must_use]
    #[inline]
    pub const fn new(tag: TypeTag, heap: Heap, len: usize) -> Self {
        if tag.is_array() {
            Self::Array { heap, len }
        } else {
            Self::Value(tag)
        }
    }

    /// Returns the type tag of the raw result of the native function.
    #[must_use]
    #[inline]
    pub const fn native_type(self) -> TypeTag {
        match self {
            Self::Value(tag) => tag,
            Self::Array { .. } => TypeTag::Number,
        }
    }
}

/// The declarative form of a call configuration, as found in configuration
/// files.
#[serde_inline_default]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Signature {
    /// The type tag of each parameter.
    #[serde(default)]
    pub params: Vec<TypeTag>,

    /// The heap of each array parameter, at the same position as its tag.
    ///
    /// Entries at the position of a plain parameter are ignored.
    #[serde(default)]
    pub heaps: Vec<Option<Heap>>,

    /// The type tag of the return value.
    #[serde_inline_default(TypeTag::Number)]
    pub returns: TypeTag,

    /// The heap an array return value is read from.
    #[serde_inline_default(Heap::HeapF32)]
    pub return_heap: Heap,

    /// The number of elements of an array return value.
    #[serde_inline_default(1)]
    pub return_size: usize,
}

impl Signature {
    /// Returns the parameter shapes of the signature.
    #[must_use]
    #[inline]
    pub fn params(&self) -> Vec<Param> {
        Param::resolve(&self.params, &self.heaps)
    }

    /// Returns the return shape of the signature.
    #[must_use]
    #[inline]
    pub const fn returns(&self) -> Return {
        Return::new(self.returns, self.return_heap, self.return_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_from_their_names() {
        for tag in TypeTag::ALL {
            assert_eq!(tag.name().parse::<TypeTag>().unwrap(), tag, "names should round-trip");
        }
        assert_eq!("float64".parse::<TypeTag>().unwrap(), TypeTag::Number);
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!(matches!(
            "string".parse::<TypeTag>(),
            Err(CallError::UnknownTypeTag(name)) if name == "string"
        ));
        assert!("Int8".parse::<TypeTag>().is_err(), "tags are case sensitive");
    }

    #[test]
    fn array_params_take_the_heap_at_their_position() {
        let params = Param::resolve(
            &[TypeTag::Uint32, TypeTag::Array, TypeTag::Array, TypeTag::Array],
            &[Some(Heap::HeapU8), Some(Heap::HeapF64), None],
        );
        assert_eq!(
            params,
            vec![
                Param::Value(TypeTag::Uint32),
                Param::Array(Heap::HeapF64),
                Param::Array(Heap::HeapF32),
                Param::Array(Heap::HeapF32),
            ]
        );
    }

    #[test]
    fn array_returns_are_raw_numbers_for_the_runtime() {
        let returns = Return::new(TypeTag::Array, Heap::Heap16, 3);
        assert_eq!(returns, Return::Array { heap: Heap::Heap16, len: 3 });
        assert_eq!(returns.native_type(), TypeTag::Number);

        let returns = Return::new(TypeTag::Uint8, Heap::Heap16, 3);
        assert_eq!(returns, Return::Value(TypeTag::Uint8));
        assert_eq!(returns.native_type(), TypeTag::Uint8);
    }
}
