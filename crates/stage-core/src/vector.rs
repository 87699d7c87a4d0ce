//! Fixed-length numeric tuples used as stage positions and offsets.
//!
//! A [`Vector`] never changes length through arithmetic: every binary
//! operation checks that both operands have the same dimension and returns
//! [`StageError::DimensionMismatch`] otherwise. Scalar operations cannot fail
//! and are exposed through the standard `Mul<f64>` / `Div<f64>` operators.
//!
//! # Example
//!
//! ```rust
//! use stage_core::vector::Vector;
//!
//! let a = Vector::new([1.0, 2.0, 3.0]);
//! let b = Vector::with_dim([1.0, 1.0], 3)?;
//! assert_eq!(a.try_add(&b)?, [2.0, 3.0, 3.0]);
//! assert_eq!(&a * 2.0, [2.0, 4.0, 6.0]);
//! # Ok::<(), stage_core::error::StageError>(())
//! ```

use crate::error::{StageError, StageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Div, Index, IndexMut, Mul};

/// Ordered sequence of floating point components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vector {
    data: Vec<f64>,
}

impl Vector {
    /// Build a vector from explicit component values.
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            data: values.into_iter().collect(),
        }
    }

    /// Zero vector of the given dimension.
    pub fn zeros(dim: usize) -> Self {
        Self {
            data: vec![0.0; dim],
        }
    }

    /// Build a vector of dimension `dim` whose first components are `values`,
    /// zero padded.
    ///
    /// Fails when more values than `dim` are given.
    pub fn with_dim(values: impl IntoIterator<Item = f64>, dim: usize) -> StageResult<Self> {
        let mut data: Vec<f64> = values.into_iter().collect();
        if data.len() > dim {
            return Err(StageError::DimensionMismatch {
                expected: dim,
                actual: data.len(),
            });
        }
        data.resize(dim, 0.0);
        Ok(Self { data })
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for the zero-dimensional vector.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Component at `index`, if present.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.data.get(index).copied()
    }

    /// Overwrite the component at `index`.
    pub fn set(&mut self, index: usize, value: f64) -> StageResult<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(StageError::DimensionMismatch {
                expected: index + 1,
                actual: len,
            })?;
        *slot = value;
        Ok(())
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Iterate over the components.
    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.data.iter()
    }

    /// First component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 1 components; use
    /// [`get`](Self::get) when the length is not known.
    pub fn x(&self) -> f64 {
        self.data[0]
    }

    /// Second component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 2 components; use
    /// [`get`](Self::get) when the length is not known.
    pub fn y(&self) -> f64 {
        self.data[1]
    }

    /// Third component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 3 components; use
    /// [`get`](Self::get) when the length is not known.
    pub fn z(&self) -> f64 {
        self.data[2]
    }

    /// Fourth component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 4 components; use
    /// [`get`](Self::get) when the length is not known.
    pub fn w(&self) -> f64 {
        self.data[3]
    }

    /// Set the first component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 1 components; use
    /// [`set`](Self::set) when the length is not known.
    pub fn set_x(&mut self, value: f64) {
        self.data[0] = value;
    }

    /// Set the second component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 2 components; use
    /// [`set`](Self::set) when the length is not known.
    pub fn set_y(&mut self, value: f64) {
        self.data[1] = value;
    }

    /// Set the third component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 3 components; use
    /// [`set`](Self::set) when the length is not known.
    pub fn set_z(&mut self, value: f64) {
        self.data[2] = value;
    }

    /// Set the fourth component.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 4 components; use
    /// [`set`](Self::set) when the length is not known.
    pub fn set_w(&mut self, value: f64) {
        self.data[3] = value;
    }

    /// First two components as a 2D vector.
    ///
    /// # Panics
    ///
    /// Panics if the vector has fewer than 2 components.
    pub fn xy(&self) -> Vector {
        Vector::new([self.data[0], self.data[1]])
    }

    /// Overwrite the first two components from a 2D vector.
    ///
    /// Fails unless `value` has two components and `self` at least two.
    pub fn set_xy(&mut self, value: &Vector) -> StageResult<()> {
        Self::check_same_len(2, value.len())?;
        if self.len() < 2 {
            return Err(StageError::DimensionMismatch {
                expected: 2,
                actual: self.len(),
            });
        }
        self.data[0] = value.data[0];
        self.data[1] = value.data[1];
        Ok(())
    }

    fn check_same_len(expected: usize, actual: usize) -> StageResult<()> {
        if expected != actual {
            return Err(StageError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    fn zip_with(&self, other: &[f64], op: impl Fn(f64, f64) -> f64) -> StageResult<Vector> {
        Self::check_same_len(self.len(), other.len())?;
        Ok(self
            .data
            .iter()
            .zip(other)
            .map(|(a, b)| op(*a, *b))
            .collect())
    }

    /// Component-wise sum.
    pub fn try_add(&self, other: impl AsRef<[f64]>) -> StageResult<Vector> {
        self.zip_with(other.as_ref(), |a, b| a + b)
    }

    /// Component-wise difference.
    pub fn try_sub(&self, other: impl AsRef<[f64]>) -> StageResult<Vector> {
        self.zip_with(other.as_ref(), |a, b| a - b)
    }

    /// Component-wise product.
    pub fn try_mul(&self, other: impl AsRef<[f64]>) -> StageResult<Vector> {
        self.zip_with(other.as_ref(), |a, b| a * b)
    }

    /// Multiply every component by `factor`.
    pub fn scale(&self, factor: f64) -> Vector {
        self.data.iter().map(|v| v * factor).collect()
    }

    /// Element-wise comparison with a tolerance.
    pub fn approx_eq(&self, other: impl AsRef<[f64]>, tolerance: f64) -> bool {
        let other = other.as_ref();
        self.len() == other.len()
            && self
                .data
                .iter()
                .zip(other)
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl AsRef<[f64]> for Vector {
    fn as_ref(&self) -> &[f64] {
        &self.data
    }
}

impl From<Vec<f64>> for Vector {
    fn from(data: Vec<f64>) -> Self {
        Self { data }
    }
}

impl<const N: usize> From<[f64; N]> for Vector {
    fn from(values: [f64; N]) -> Self {
        Self::new(values)
    }
}

impl From<Vector> for Vec<f64> {
    fn from(v: Vector) -> Self {
        v.data
    }
}

impl FromIterator<f64> for Vector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a Vector {
    type Item = &'a f64;
    type IntoIter = std::slice::Iter<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.data[index]
    }
}

impl IndexMut<usize> for Vector {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.data[index]
    }
}

impl Mul<f64> for &Vector {
    type Output = Vector;

    fn mul(self, factor: f64) -> Vector {
        self.scale(factor)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, factor: f64) -> Vector {
        self.scale(factor)
    }
}

impl Div<f64> for &Vector {
    type Output = Vector;

    fn div(self, divisor: f64) -> Vector {
        self.scale(1.0 / divisor)
    }
}

impl Div<f64> for Vector {
    type Output = Vector;

    fn div(self, divisor: f64) -> Vector {
        self.scale(1.0 / divisor)
    }
}

impl PartialEq<[f64]> for Vector {
    fn eq(&self, other: &[f64]) -> bool {
        self.data.as_slice() == other
    }
}

impl PartialEq<Vec<f64>> for Vector {
    fn eq(&self, other: &Vec<f64>) -> bool {
        &self.data == other
    }
}

impl<const N: usize> PartialEq<[f64; N]> for Vector {
    fn eq(&self, other: &[f64; N]) -> bool {
        self.data.as_slice() == other.as_slice()
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_construction_pads_with_zeros() {
        assert_eq!(Vector::zeros(4), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(Vector::with_dim([1.0, 2.0], 4).unwrap(), [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(Vector::with_dim([1.0], 1).unwrap(), [1.0]);
        for dim in 0..5 {
            assert_eq!(Vector::zeros(dim).len(), dim);
        }
    }

    #[test]
    fn test_too_many_values_for_dimension() {
        let err = Vector::with_dim([1.0, 2.0, 3.0, 4.0, 5.0], 4).unwrap_err();
        assert!(matches!(
            err,
            StageError::DimensionMismatch {
                expected: 4,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_named_accessors() {
        let mut v = Vector::new([1.0, 2.0, 3.0, 4.0]);
        assert_eq!((v.x(), v.y(), v.z(), v.w()), (1.0, 2.0, 3.0, 4.0));
        assert_eq!(v.xy(), Vector::new([1.0, 2.0]));

        v.set_x(101.0);
        v.set_w(104.0);
        v[1] = 12.0;
        assert_eq!(v, [101.0, 12.0, 3.0, 104.0]);

        v.set_xy(&Vector::new([1001.0, 1002.0])).unwrap();
        assert_eq!(v, [1001.0, 1002.0, 3.0, 104.0]);
        assert!(v.set_xy(&Vector::new([1.0])).is_err());
        assert!(matches!(
            Vector::new([5.0]).set_xy(&Vector::new([1.0, 2.0])),
            Err(StageError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_set_out_of_bounds_index() {
        let mut v = Vector::zeros(2);
        assert!(v.set(1, 5.0).is_ok());
        assert!(v.set(2, 5.0).is_err());
        assert_eq!(v.get(1), Some(5.0));
        assert_eq!(v.get(2), None);
    }

    #[test]
    fn test_arithmetic() {
        let a = Vector::new([2.0, 3.0, 5.0]);
        let b = Vector::new([7.0, 11.0, 13.0]);
        assert_eq!(a.try_add(&b).unwrap(), [9.0, 14.0, 18.0]);
        assert_eq!(a.try_sub(&b).unwrap(), [-5.0, -8.0, -8.0]);
        assert_eq!(a.try_mul(&b).unwrap(), [14.0, 33.0, 65.0]);
        assert_eq!(&a * 10.0, [20.0, 30.0, 50.0]);
        assert_eq!(Vector::default() * 10.0, Vector::default());
    }

    #[test]
    fn test_mismatched_operands_fail() {
        let a = Vector::new([1.0, 2.0, 3.0]);
        let b = Vector::new([1.0, 2.0]);
        assert!(matches!(
            a.try_add(&b),
            Err(StageError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert!(a.try_sub([1.0]).is_err());
        assert!(a.try_mul(vec![1.0; 4]).is_err());
    }

    #[test]
    fn test_equality_against_sequences() {
        assert_eq!(Vector::default(), Vec::<f64>::new());
        assert_eq!(Vector::new([1.0, 2.0]), vec![1.0, 2.0]);
        assert_ne!(Vector::new([1.0, 2.0, 3.0]), [4.0, 2.0, 3.0]);
        assert_ne!(Vector::new([1.0, 2.0, 3.0]), Vector::new([1.0, 2.0]));
    }

    #[test]
    fn test_display() {
        assert_eq!(Vector::new([1.0, 2.5, -3.0]).to_string(), "(1,2.5,-3)");
    }

    proptest! {
        #[test]
        fn prop_add_then_sub_round_trips(
            pairs in prop::collection::vec((-1e6f64..1e6, -1e6f64..1e6), 0..6)
        ) {
            let a: Vector = pairs.iter().map(|p| p.0).collect();
            let b: Vector = pairs.iter().map(|p| p.1).collect();
            let back = a.try_add(&b).unwrap().try_sub(&b).unwrap();
            prop_assert!(back.approx_eq(&a, 1e-6));
        }

        #[test]
        fn prop_scale_then_divide_round_trips(
            values in prop::collection::vec(-1e6f64..1e6, 0..6),
            factor in prop::sample::select(vec![-1000.0, -2.5, -0.001, 0.001, 0.5, 3.0, 1000.0]),
        ) {
            let a = Vector::new(values);
            let back = &(&a * factor) / factor;
            prop_assert!(back.approx_eq(&a, 1e-6));
        }
    }
}
