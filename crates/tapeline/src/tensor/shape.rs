//! Tensor shapes with inline storage and the broadcasting rule.

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// Highest rank the engine stores inline.
pub const MAX_RANK: usize = 4;

/// Ordered list of positive dimensions, rank 1 through [`MAX_RANK`].
///
/// A scalar is represented as `{1}`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; MAX_RANK]>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    ///
    /// Panics if `dims` is empty, exceeds [`MAX_RANK`], or contains a zero
    /// extent; shapes are a constructor-validated invariant, not user data.
    pub fn new(dims: impl AsRef<[usize]>) -> Self {
        let dims = dims.as_ref();
        assert!(!dims.is_empty(), "shape must have at least one dimension");
        assert!(
            dims.len() <= MAX_RANK,
            "shape rank {} exceeds maximum {}",
            dims.len(),
            MAX_RANK
        );
        assert!(
            dims.iter().all(|&d| d > 0),
            "shape dimensions must be positive: {:?}",
            dims
        );
        Shape {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the extent of one axis.
    pub fn size(&self, dim: usize) -> usize {
        self.dims[dim]
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Row-major strides for the shape.
    pub fn strides(&self) -> SmallVec<[usize; MAX_RANK]> {
        let mut strides = SmallVec::from_elem(1usize, self.rank());
        for axis in (0..self.rank().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.dims[axis + 1];
        }
        strides
    }

    /// Applies the trailing-aligned broadcast rule to a shape pair.
    ///
    /// Dimensions are matched from the last axis backwards; each pair must be
    /// equal or contain a 1, and the output extent is the larger of the two.
    /// The shorter shape is padded with leading 1s.
    pub fn broadcast(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let rank = lhs.rank().max(rhs.rank());
        let mut dims = SmallVec::<[usize; MAX_RANK]>::from_elem(1usize, rank);
        for axis in 0..rank {
            let a = axis_from_end(lhs, rank - 1 - axis);
            let b = axis_from_end(rhs, rank - 1 - axis);
            if a != b && a != 1 && b != 1 {
                return Err(Error::BroadcastIncompatible {
                    lhs: lhs.dims.to_vec(),
                    rhs: rhs.dims.to_vec(),
                });
            }
            dims[axis] = a.max(b);
        }
        Ok(Shape { dims })
    }
}

/// Extent of the axis `offset` positions from the trailing end, padding with 1.
fn axis_from_end(shape: &Shape, offset: usize) -> usize {
    if offset < shape.rank() {
        shape.dims[shape.rank() - 1 - offset]
    } else {
        1
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", dims.join("x"))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}
