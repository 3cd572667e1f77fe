//! Built-in layout algorithms.
//!
//! All layouts read every layer's values in collection order. An empty
//! collection, or one holding only zero-size tensors, always yields the `0×0`
//! grid.
//!
//! | name              | layout                                                |
//! |-------------------|-------------------------------------------------------|
//! | `flatten`         | `S×S` row-major, `S = ceil(sqrt(n))`, zero padded     |
//! | `layer_weighted`  | one full-width band per layer, height ∝ element count |
//! | `spiral`          | `S×S`, filled outward from the center                 |
//! | `normalized`      | global min-max scaling to `[0, 1]`, then `flatten`    |
//! | `layer_separated` | one square block per layer, sentinel borders between  |
//! | `conv_kernels`    | per-filter kernel tiles of each 3D/4D layer           |

use crate::error::Result;
use crate::grid::{Grid, GridRegion};
use crate::tensor::{Tensor, TensorCollection};

use super::TransformerPlugin;

/// Smallest `s` with `s * s >= n`.
pub(crate) fn square_side(n: usize) -> usize {
    let mut side = (n as f64).sqrt().ceil() as usize;
    while side * side < n {
        side += 1;
    }
    while side > 0 && (side - 1) * (side - 1) >= n {
        side -= 1;
    }
    side
}

/// Row-major fill of an `S×S` grid, zero padded.
pub(crate) fn flatten_layout(values: &[f64]) -> Grid {
    let side = square_side(values.len());
    let mut grid = Grid::zeros(side, side);
    grid.as_mut_slice()[..values.len()].copy_from_slice(values);
    grid
}

/// Row-major fill starting from the last cell and walking backwards.
pub(crate) fn reversed_layout(values: &[f64]) -> Grid {
    let side = square_side(values.len());
    let mut grid = Grid::zeros(side, side);
    let cells = grid.as_mut_slice();
    let last = cells.len().saturating_sub(1);
    for (i, &v) in values.iter().enumerate() {
        cells[last - i] = v;
    }
    grid
}

/// Column-major fill of an `S×S` grid.
pub(crate) fn column_major_layout(values: &[f64]) -> Grid {
    let side = square_side(values.len());
    let mut grid = Grid::zeros(side, side);
    for (i, &v) in values.iter().enumerate() {
        grid.set(i % side, i / side, v);
    }
    grid
}

/// Cell coordinates `(row, col)` of an `size×size` grid in spiral order.
///
/// The walk starts at `(size / 2, size / 2)` and turns clockwise (right,
/// down, left, up) with run lengths 1, 1, 2, 2, 3, 3, ... Steps that leave the
/// grid are skipped, so every cell appears exactly once.
///
/// ```rust
/// use tensor_grid::plugin::spiral_order;
///
/// assert_eq!(spiral_order(2), vec![(1, 1), (1, 0), (0, 0), (0, 1)]);
/// ```
#[must_use]
pub fn spiral_order(size: usize) -> Vec<(usize, usize)> {
    const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

    let total = size * size;
    let mut coords = Vec::with_capacity(total);
    if total == 0 {
        return coords;
    }

    let bound = size as isize;
    let (mut row, mut col) = ((size / 2) as isize, (size / 2) as isize);
    coords.push((row as usize, col as usize));

    let mut dir = 0;
    let mut run = 1;
    while coords.len() < total {
        for _ in 0..2 {
            let (dr, dc) = DIRECTIONS[dir];
            for _ in 0..run {
                row += dr;
                col += dc;
                if (0..bound).contains(&row) && (0..bound).contains(&col) {
                    coords.push((row as usize, col as usize));
                    if coords.len() == total {
                        return coords;
                    }
                }
            }
            dir = (dir + 1) % 4;
        }
        run += 1;
    }
    coords
}

/// Spiral fill of an `S×S` grid, zero padded.
pub(crate) fn spiral_layout(values: &[f64]) -> Grid {
    let side = square_side(values.len());
    let mut grid = Grid::zeros(side, side);
    for (&(row, col), &v) in spiral_order(side).iter().zip(values) {
        grid.set(row, col, v);
    }
    grid
}

/// Min-max scale finite values into `[0, 1]`. A constant input maps to zeros.
pub(crate) fn min_max_scale(values: &mut [f64]) {
    let (min, max) = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        return;
    }
    let range = max - min;
    for v in values.iter_mut().filter(|v| v.is_finite()) {
        *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
    }
}

/// One full-width band per non-empty layer, stacked in collection order.
pub(crate) fn layer_weighted_layout(tensors: &TensorCollection) -> Grid {
    let total = tensors.total_elements();
    if total == 0 {
        return Grid::empty();
    }

    let width = square_side(total);
    let bands: Vec<(usize, &Tensor)> = tensors
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| (t.len().div_ceil(width), t))
        .collect();
    let height: usize = bands.iter().map(|(rows, _)| rows).sum();

    let mut grid = Grid::zeros(height, width);
    let mut top = 0;
    for (rows, tensor) in bands {
        grid.fill_block(top, 0, width, tensor.values());
        grid.push_region(GridRegion {
            layer: tensor.name().to_string(),
            row: top,
            col: 0,
            rows,
            cols: width,
        });
        top += rows;
    }
    tracing::debug!("layer_weighted: {} bands in a {}x{} grid", grid.regions().len(), height, width);
    grid
}

/// Square blocks per layer, tiled with sentinel borders between them.
pub(crate) fn layer_separated_layout(tensors: &TensorCollection, border: usize, sentinel: f64) -> Grid {
    let blocks: Vec<(usize, &Tensor)> = tensors
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| (square_side(t.len()), t))
        .collect();
    if blocks.is_empty() {
        return Grid::empty();
    }

    let tile = blocks.iter().map(|(side, _)| *side).max().unwrap_or(0);
    let tiles_per_row = square_side(blocks.len());
    let tile_rows = blocks.len().div_ceil(tiles_per_row);
    let stride = tile + border;

    let mut grid = Grid::filled(
        tile_rows * stride - border,
        tiles_per_row * stride - border,
        sentinel,
    );
    for (idx, (side, tensor)) in blocks.into_iter().enumerate() {
        let top = (idx / tiles_per_row) * stride;
        let left = (idx % tiles_per_row) * stride;
        grid.fill_rect(top, left, side, side, 0.0);
        grid.fill_block(top, left, side, tensor.values());
        grid.push_region(GridRegion {
            layer: tensor.name().to_string(),
            row: top,
            col: left,
            rows: side,
            cols: side,
        });
    }
    grid
}

/// Whether a tensor is laid out like a convolution weight:
/// `[out, in, width]` or `[out, in, height, width]`.
#[must_use]
pub fn is_conv_kernel(tensor: &Tensor) -> bool {
    matches!(tensor.ndim(), 3 | 4)
}

/// Filters of one conv weight averaged over input channels, each min-max
/// scaled on its own. Returns the kernels and their `(height, width)`.
fn averaged_kernels(tensor: &Tensor, max_kernels: usize) -> (Vec<Vec<f64>>, (usize, usize)) {
    let shape = tensor.shape();
    let (out, inputs, kh, kw) = match *shape {
        [out, inputs, kw] => (out, inputs, 1, kw),
        [out, inputs, kh, kw] => (out, inputs, kh, kw),
        _ => return (Vec::new(), (0, 0)),
    };
    let area = kh * kw;
    if tensor.is_empty() {
        return (Vec::new(), (kh, kw));
    }

    let kernels = tensor
        .values()
        .chunks(inputs * area)
        .take(out.min(max_kernels))
        .map(|filter| {
            let mut kernel = vec![0.0; area];
            for channel in filter.chunks(area) {
                for (acc, v) in kernel.iter_mut().zip(channel) {
                    *acc += v;
                }
            }
            for v in &mut kernel {
                *v /= inputs as f64;
            }
            scale_kernel(&mut kernel);
            kernel
        })
        .collect();
    (kernels, (kh, kw))
}

/// Min-max scale one kernel, leaving near-constant kernels untouched.
fn scale_kernel(kernel: &mut [f64]) {
    let (min, max) = kernel
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max - min > KERNEL_FLAT_RANGE {
        for v in kernel.iter_mut() {
            *v = (*v - min) / (max - min);
        }
    }
}

/// Kernels whose value range is at most this are left unscaled.
const KERNEL_FLAT_RANGE: f64 = 1e-6;

/// One sheet of kernel tiles per conv layer, stacked top to bottom with
/// sentinel border rows between sheets.
pub(crate) fn conv_kernels_layout(
    tensors: &TensorCollection,
    max_kernels: usize,
    border: usize,
    sentinel: f64,
) -> Grid {
    struct Sheet<'a> {
        layer: &'a str,
        kernels: Vec<Vec<f64>>,
        kernel: (usize, usize),
        cols: usize,
        rows: usize,
    }

    let sheets: Vec<Sheet<'_>> = tensors
        .iter()
        .filter(|t| is_conv_kernel(t))
        .filter_map(|t| {
            let (kernels, kernel) = averaged_kernels(t, max_kernels);
            if kernels.is_empty() || kernel.0 * kernel.1 == 0 {
                return None;
            }
            let cols = square_side(kernels.len());
            let rows = kernels.len().div_ceil(cols);
            Some(Sheet {
                layer: t.name(),
                kernels,
                kernel,
                cols,
                rows,
            })
        })
        .collect();
    if sheets.is_empty() {
        return Grid::empty();
    }

    let width = sheets
        .iter()
        .map(|s| s.cols * s.kernel.1)
        .max()
        .unwrap_or(0);
    let height = sheets.iter().map(|s| s.rows * s.kernel.0).sum::<usize>()
        + border * (sheets.len() - 1);

    let mut grid = Grid::filled(height, width, sentinel);
    let mut top = 0;
    for sheet in &sheets {
        let (kh, kw) = sheet.kernel;
        grid.fill_rect(top, 0, sheet.rows * kh, sheet.cols * kw, 0.0);
        for (idx, kernel) in sheet.kernels.iter().enumerate() {
            let row = top + (idx / sheet.cols) * kh;
            let col = (idx % sheet.cols) * kw;
            grid.fill_block(row, col, kw, kernel);
            grid.push_region(GridRegion {
                layer: format!("{}[{idx}]", sheet.layer),
                row,
                col,
                rows: kh,
                cols: kw,
            });
        }
        top += sheet.rows * kh + border;
    }
    tracing::debug!("conv_kernels: {} layer(s) in a {}x{} grid", sheets.len(), height, width);
    grid
}

/// Flattens all tensors into a square grid. The default plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlattenTransformer;

impl TransformerPlugin for FlattenTransformer {
    fn name(&self) -> &str {
        "flatten"
    }

    fn description(&self) -> &str {
        "Flattens all tensors into a square grid (default behavior)"
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        Ok(flatten_layout(&tensors.concat_values()))
    }
}

/// Gives each layer a band whose area grows with its element count.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerWeightedTransformer;

impl TransformerPlugin for LayerWeightedTransformer {
    fn name(&self) -> &str {
        "layer_weighted"
    }

    fn description(&self) -> &str {
        "Arranges layers in blocks, larger layers get more space"
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        Ok(layer_weighted_layout(tensors))
    }
}

/// Places values along a spiral starting at the grid center.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiralTransformer;

impl TransformerPlugin for SpiralTransformer {
    fn name(&self) -> &str {
        "spiral"
    }

    fn description(&self) -> &str {
        "Arranges weights in a spiral pattern from center outward"
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        Ok(spiral_layout(&tensors.concat_values()))
    }
}

/// Min-max normalizes all values before a row-major layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedTransformer;

impl TransformerPlugin for NormalizedTransformer {
    fn name(&self) -> &str {
        "normalized"
    }

    fn description(&self) -> &str {
        "Normalizes all weights to [0, 1] range before visualization"
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        let mut values = tensors.concat_values();
        min_max_scale(&mut values);
        Ok(flatten_layout(&values))
    }
}

/// Lays out one block per layer with sentinel-valued borders between blocks.
#[derive(Debug, Clone, Copy)]
pub struct LayerSeparatedTransformer {
    border: usize,
    sentinel: f64,
}

impl Default for LayerSeparatedTransformer {
    fn default() -> Self {
        Self {
            border: 1,
            sentinel: f64::NAN,
        }
    }
}

impl LayerSeparatedTransformer {
    /// Set the border width in cells (at least 1).
    #[must_use]
    pub fn with_border(mut self, border: usize) -> Self {
        self.border = border.max(1);
        self
    }

    /// Set the value written to border cells.
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Border width in cells.
    #[must_use]
    pub fn border(&self) -> usize {
        self.border
    }

    /// Border cell value.
    #[must_use]
    pub fn sentinel(&self) -> f64 {
        self.sentinel
    }
}

impl TransformerPlugin for LayerSeparatedTransformer {
    fn name(&self) -> &str {
        "layer_separated"
    }

    fn description(&self) -> &str {
        "Separates layers with visible boundaries in the grid"
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        Ok(layer_separated_layout(tensors, self.border, self.sentinel))
    }
}

/// Tiles the filters of every convolution layer, one sheet per layer.
///
/// Each filter is averaged over its input channels and min-max scaled to
/// `[0, 1]` on its own; a 1D filter `[out, in, width]` becomes a `1 × width`
/// tile. A layer shows at most `max_kernels` filters, tiled in
/// `ceil(sqrt(k))` columns. Tiles carry regions named `layer[filter]`.
/// Collections with no 3D or 4D tensor are not handled.
#[derive(Debug, Clone, Copy)]
pub struct ConvKernelsTransformer {
    max_kernels: usize,
    sentinel: f64,
}

/// Default cap on filters shown per layer.
pub const DEFAULT_MAX_KERNELS: usize = 64;

impl Default for ConvKernelsTransformer {
    fn default() -> Self {
        Self {
            max_kernels: DEFAULT_MAX_KERNELS,
            sentinel: f64::NAN,
        }
    }
}

impl ConvKernelsTransformer {
    /// Set the per-layer filter cap (at least 1).
    #[must_use]
    pub fn with_max_kernels(mut self, max_kernels: usize) -> Self {
        self.max_kernels = max_kernels.max(1);
        self
    }

    /// Set the value of the border rows between layers.
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: f64) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Per-layer filter cap.
    #[must_use]
    pub fn max_kernels(&self) -> usize {
        self.max_kernels
    }
}

impl TransformerPlugin for ConvKernelsTransformer {
    fn name(&self) -> &str {
        "conv_kernels"
    }

    fn description(&self) -> &str {
        "Tiles convolution filters averaged across input channels"
    }

    fn can_handle(&self, tensors: &TensorCollection) -> bool {
        tensors.iter().any(is_conv_kernel)
    }

    fn transform(&self, tensors: &TensorCollection) -> Result<Grid> {
        Ok(conv_kernels_layout(tensors, self.max_kernels, 1, self.sentinel))
    }
}
