//! Dense 2D grids produced by transformer plugins.

use serde::{Deserialize, Serialize, Serializer};

use crate::error::GridError;

/// Rectangle of a grid occupied by one layer's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRegion {
    /// Layer name.
    pub layer: String,
    /// Top row.
    pub row: usize,
    /// Left column.
    pub col: usize,
    /// Height in cells.
    pub rows: usize,
    /// Width in cells.
    pub cols: usize,
}

impl GridRegion {
    /// Whether the cell at `(row, col)` lies inside this region.
    #[must_use]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row && row < self.row + self.rows && col >= self.col && col < self.col + self.cols
    }

    /// Number of cells covered.
    #[must_use]
    pub fn area(&self) -> usize {
        self.rows * self.cols
    }
}

/// A `rows × cols` array of `f64` in row-major order.
///
/// Layouts that keep layers apart record each layer's rectangle in
/// [`Grid::regions`], so consumers can tell layer data from padding or
/// borders by position rather than by value.
///
/// # Example
///
/// ```rust
/// use tensor_grid::Grid;
///
/// let mut grid = Grid::zeros(2, 3);
/// grid.set(1, 2, 7.0);
/// assert_eq!(grid.get(1, 2), Some(7.0));
/// assert_eq!(grid.as_slice()[5], 7.0);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "GridDocument")]
pub struct Grid {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
    regions: Vec<GridRegion>,
}

impl Grid {
    /// A grid of zeros.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// A grid with every cell set to `value`.
    #[must_use]
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
            regions: Vec::new(),
        }
    }

    /// The `0×0` grid.
    #[must_use]
    pub fn empty() -> Self {
        Self::zeros(0, 0)
    }

    /// Build a grid from row-major data, returning `None` if the length is wrong.
    #[must_use]
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self {
            rows,
            cols,
            data,
            regions: Vec::new(),
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Whether the grid has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cell value, or `None` out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        (row < self.rows && col < self.cols).then(|| self.data[row * self.cols + col])
    }

    /// Set a cell. Out-of-range writes are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        if row < self.rows && col < self.cols {
            self.data[row * self.cols + col] = value;
        }
    }

    /// Row-major cell values.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major cell values.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// One row as a slice.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        (row < self.rows).then(|| &self.data[row * self.cols..(row + 1) * self.cols])
    }

    /// Copy out as nested rows.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        if self.cols == 0 {
            return vec![Vec::new(); self.rows];
        }
        self.data.chunks(self.cols).map(<[f64]>::to_vec).collect()
    }

    /// Layer regions recorded by the layout, if any.
    #[must_use]
    pub fn regions(&self) -> &[GridRegion] {
        &self.regions
    }

    /// The region containing a cell, if any.
    #[must_use]
    pub fn region_at(&self, row: usize, col: usize) -> Option<&GridRegion> {
        self.regions.iter().find(|r| r.contains(row, col))
    }

    /// Record a layer region.
    pub fn push_region(&mut self, region: GridRegion) {
        self.regions.push(region);
    }

    /// Copy `values` into the rectangle starting at `(row, col)` of width
    /// `width`, row-major. Values past the grid edge are dropped.
    pub fn fill_block(&mut self, row: usize, col: usize, width: usize, values: &[f64]) {
        if width == 0 {
            return;
        }
        for (i, &v) in values.iter().enumerate() {
            self.set(row + i / width, col + i % width, v);
        }
    }

    /// Set every cell of the `rows × cols` rectangle at `(row, col)` to
    /// `value`, clipped to the grid.
    pub fn fill_rect(&mut self, row: usize, col: usize, rows: usize, cols: usize, value: f64) {
        let row_end = (row + rows).min(self.rows);
        let col_end = (col + cols).min(self.cols);
        if col >= col_end {
            return;
        }
        for r in row..row_end {
            self.data[r * self.cols + col..r * self.cols + col_end].fill(value);
        }
    }

    /// Swap rows and columns. Regions are transposed too.
    #[must_use]
    pub fn transposed(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        out.regions = self
            .regions
            .iter()
            .map(|g| GridRegion {
                layer: g.layer.clone(),
                row: g.col,
                col: g.row,
                rows: g.cols,
                cols: g.rows,
            })
            .collect();
        out
    }

    /// Mirror top to bottom.
    #[must_use]
    pub fn flipped_rows(&self) -> Self {
        let mut out = self.clone();
        for r in 0..self.rows {
            let src = self.rows - 1 - r;
            out.data[r * self.cols..(r + 1) * self.cols]
                .copy_from_slice(&self.data[src * self.cols..(src + 1) * self.cols]);
        }
        for g in &mut out.regions {
            g.row = self.rows - g.row - g.rows;
        }
        out
    }

    /// Mirror left to right.
    #[must_use]
    pub fn flipped_cols(&self) -> Self {
        let mut out = self.clone();
        for r in 0..self.rows {
            out.data[r * self.cols..(r + 1) * self.cols].reverse();
        }
        for g in &mut out.regions {
            g.col = self.cols - g.col - g.cols;
        }
        out
    }

    /// Finite minimum and maximum, ignoring NaN cells.
    #[must_use]
    pub fn finite_range(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Serialized form of a grid: nested rows plus regions. NaN cells are `null`.
#[derive(Serialize, Deserialize)]
struct GridDocument {
    rows: usize,
    cols: usize,
    data: Vec<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    regions: Vec<GridRegion>,
}

impl TryFrom<GridDocument> for Grid {
    type Error = GridError;

    fn try_from(doc: GridDocument) -> Result<Self, GridError> {
        if doc.data.len() != doc.rows || doc.data.iter().any(|row| row.len() != doc.cols) {
            return Err(GridError::Shape(format!(
                "grid document declares {}x{} but data does not match",
                doc.rows, doc.cols
            )));
        }
        let data = doc
            .data
            .into_iter()
            .flatten()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        Ok(Self {
            rows: doc.rows,
            cols: doc.cols,
            data,
            regions: doc.regions,
        })
    }
}

impl Serialize for Grid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        GridDocument {
            rows: self.rows,
            cols: self.cols,
            data: self
                .to_rows()
                .into_iter()
                .map(|row| row.into_iter().map(|v| (!v.is_nan()).then_some(v)).collect())
                .collect(),
            regions: self.regions.clone(),
        }
        .serialize(serializer)
    }
}
