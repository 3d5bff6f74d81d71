//! The values exchanged with a wrapped function.

/// An argument given to, or a value returned by, a wrapped function.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A single number.
    Number(f64),

    /// A list of numbers.
    Array(Vec<f64>),
}

impl Value {
    /// Returns the number, if this is a [`Value::Number`].
    #[must_use]
    #[inline]
    pub const fn as_number(&self) -> Option<f64> {
        match *self {
            Self::Number(number) => Some(number),
            Self::Array(_) => None,
        }
    }

    /// Returns the numbers, if this is a [`Value::Array`].
    #[must_use]
    #[inline]
    pub fn as_array(&self) -> Option<&[f64]> {
        match *self {
            Self::Number(_) => None,
            Self::Array(ref values) => Some(values),
        }
    }

    /// Converts the value into its numbers, if this is a [`Value::Array`].
    #[must_use]
    #[inline]
    pub fn into_array(self) -> Option<Vec<f64>> {
        match self {
            Self::Number(_) => None,
            Self::Array(values) => Some(values),
        }
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<Vec<f64>> for Value {
    #[inline]
    fn from(values: Vec<f64>) -> Self {
        Self::Array(values)
    }
}

impl From<&[f64]> for Value {
    #[inline]
    fn from(values: &[f64]) -> Self {
        Self::Array(values.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Value {
    #[inline]
    fn from(values: [f64; N]) -> Self {
        Self::Array(values.to_vec())
    }
}
