/*!
Row-major 2D sample matrix.

Images on the wire and on disk are laid out column by column (all rows of
column 0, then column 1, ...). [`ImageMatrix`] always stores them row-major
so that `get(row, col)` addresses row `row` of `height` and column `col` of
`width`; the conversion happens in [`ImageMatrix::from_column_major`] and
[`ImageMatrix::to_column_major`].
*/

use crate::error::{Result, SharedError};

/// A `height` x `width` matrix of samples stored row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMatrix<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Copy> ImageMatrix<T> {
    /// Create a matrix from row-major data
    pub fn new(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(SharedError::invalid_frame(format!(
                "Matrix data has {} samples, expected {}x{} = {}",
                data.len(),
                width,
                height,
                width * height
            )));
        }

        Ok(Self { width, height, data })
    }

    /// Create a matrix with every sample set to `value`
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Build a matrix from samples in column-major order.
    ///
    /// `samples[col * height + row]` becomes `get(row, col)`.
    pub fn from_column_major(width: usize, height: usize, samples: &[T]) -> Result<Self> {
        if samples.len() != width * height {
            return Err(SharedError::invalid_frame(format!(
                "Got {} samples for a {}x{} image",
                samples.len(),
                width,
                height
            )));
        }

        let mut data = Vec::with_capacity(samples.len());
        for row in 0..height {
            for col in 0..width {
                data.push(samples[col * height + row]);
            }
        }

        Ok(Self { width, height, data })
    }

    /// Flatten into column-major order (inverse of [`Self::from_column_major`])
    pub fn to_column_major(&self) -> Vec<T> {
        let mut samples = Vec::with_capacity(self.data.len());
        for col in 0..self.width {
            for row in 0..self.height {
                samples.push(self.data[row * self.width + col]);
            }
        }
        samples
    }

    /// Apply `f` to every sample
    pub fn map<U, F: FnMut(T) -> U>(&self, f: F) -> ImageMatrix<U> {
        ImageMatrix {
            width: self.width,
            height: self.height,
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    /// Sample at `(row, col)`, `None` when out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.height || col >= self.width {
            return None;
        }
        Some(self.data[row * self.width + col])
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        if row < self.height && col < self.width {
            self.data[row * self.width + col] = value;
        }
    }

    /// Iterate over rows as slices
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.data.chunks_exact(self.width.max(1))
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major samples
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Copy + PartialOrd> ImageMatrix<T> {
    /// Smallest and largest sample, `None` for an empty matrix
    pub fn min_max(&self) -> Option<(T, T)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| {
            (
                if v < lo { v } else { lo },
                if v > hi { v } else { hi },
            )
        }))
    }
}
