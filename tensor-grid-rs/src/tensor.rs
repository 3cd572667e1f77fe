//! Named tensors and ordered tensor collections.
//!
//! A [`TensorCollection`] is what a model loader hands to the engine: every
//! parameter of a model keyed by layer name, in the order the model declares
//! them. That order is observable. It drives the stats table order and the
//! block order of the layer-aware layouts.
//!
//! # Example
//!
//! ```rust
//! use tensor_grid::{Tensor, TensorCollection};
//!
//! # fn main() -> tensor_grid::Result<()> {
//! let mut tensors = TensorCollection::new();
//! tensors.insert(Tensor::new("fc.weight", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])?)?;
//! tensors.insert(Tensor::new("fc.bias", vec![2], vec![0.0, 0.0])?)?;
//!
//! assert_eq!(tensors.total_elements(), 6);
//! assert_eq!(tensors.names(), vec!["fc.weight", "fc.bias"]);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// A named N-dimensional array of `f64` stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct RawTensor {
    name: String,
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = GridError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Self::new(raw.name, raw.shape, raw.values)
    }
}

/// Product of the dimensions, or `None` on overflow.
///
/// A zero dimension anywhere makes the count zero, even when the other
/// dimensions alone would overflow.
fn element_count(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl Tensor {
    /// Create a tensor, checking that `values` matches `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Shape`] if `values.len()` differs from the
    /// product of `shape`, or if that product overflows `usize`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        let expected = element_count(&shape).ok_or_else(|| {
            GridError::Shape(format!("tensor '{name}' has shape {shape:?}, too many elements"))
        })?;
        if expected != values.len() {
            return Err(GridError::Shape(format!(
                "tensor '{name}' has shape {shape:?} ({expected} elements) but {} values",
                values.len()
            )));
        }
        Ok(Self {
            name,
            shape,
            values,
        })
    }

    /// Create a one-dimensional tensor from values.
    #[must_use]
    pub fn from_vec(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            shape: vec![values.len()],
            values,
        }
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape, outermost dimension first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Slices of values belonging to each index of the leading dimension.
    ///
    /// Scalars and vectors are a single unit. Zero-size tensors yield no units.
    pub fn units(&self) -> impl Iterator<Item = &[f64]> {
        let chunk = if self.ndim() >= 2 && self.shape[0] > 0 {
            self.len() / self.shape[0]
        } else {
            self.len()
        };
        // chunks(0) panics, so empty tensors go through an empty slice instead
        let values: &[f64] = if chunk == 0 { &[] } else { &self.values };
        values.chunks(chunk.max(1))
    }

    /// Return a copy with every value mapped through `f`.
    #[must_use]
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            name: self.name.clone(),
            shape: self.shape.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

/// Ordered mapping from unique layer name to [`Tensor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCollection")]
pub struct TensorCollection {
    tensors: Vec<Tensor>,
}

#[derive(Deserialize)]
struct RawCollection {
    tensors: Vec<Tensor>,
}

impl TryFrom<RawCollection> for TensorCollection {
    type Error = GridError;

    fn try_from(raw: RawCollection) -> Result<Self> {
        Self::from_tensors(raw.tensors)
    }
}

impl TensorCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from tensors in order.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateLayer`] if two tensors share a name.
    pub fn from_tensors(tensors: impl IntoIterator<Item = Tensor>) -> Result<Self> {
        let mut collection = Self::new();
        for tensor in tensors {
            collection.insert(tensor)?;
        }
        Ok(collection)
    }

    /// Append a tensor.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateLayer`] if the name is already present.
    pub fn insert(&mut self, tensor: Tensor) -> Result<()> {
        if self.contains(tensor.name()) {
            return Err(GridError::DuplicateLayer(tensor.name().to_string()));
        }
        self.tensors.push(tensor);
        Ok(())
    }

    /// Look up a tensor by layer name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|t| t.name() == name)
    }

    /// Whether a layer with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate tensors in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    /// Layer names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tensors.iter().map(Tensor::name).collect()
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the collection has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total element count across all layers.
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.tensors.iter().map(Tensor::len).sum()
    }

    /// Every value of every layer, concatenated in collection order.
    #[must_use]
    pub fn concat_values(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.total_elements());
        for tensor in &self.tensors {
            flat.extend_from_slice(tensor.values());
        }
        flat
    }

    /// Keep only the layers for which `keep` returns true, preserving order.
    #[must_use]
    pub fn filtered(&self, keep: impl Fn(&Tensor) -> bool) -> Self {
        Self {
            tensors: self.tensors.iter().filter(|t| keep(t)).cloned().collect(),
        }
    }

    /// Return a copy with every value of every layer mapped through `f`.
    #[must_use]
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            tensors: self.tensors.iter().map(|t| t.map_values(&f)).collect(),
        }
    }

    /// Parse a JSON tensor document: `{"tensors": [{"name", "shape", "values"}]}`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Json`] on malformed JSON or inconsistent shapes.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON tensor document from disk.
    ///
    /// # Errors
    ///
    /// Returns an IO or JSON error.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let collection = Self::from_json_str(&content)?;
        tracing::debug!(
            "Loaded {} tensors ({} elements) from {:?}",
            collection.len(),
            collection.total_elements(),
            path.as_ref()
        );
        Ok(collection)
    }

    /// Serialize to the JSON tensor document format.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<'a> IntoIterator for &'a TensorCollection {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

#[cfg(feature = "candle")]
mod candle_interop {
    use std::path::Path;

    use candle_core::{DType, Device};

    use super::{Tensor, TensorCollection};
    use crate::error::Result;

    impl Tensor {
        /// Copy a candle tensor into a named `f64` tensor.
        ///
        /// # Errors
        ///
        /// Returns a candle error if the dtype conversion fails.
        pub fn from_candle(name: impl Into<String>, tensor: &candle_core::Tensor) -> Result<Self> {
            let shape = tensor.dims().to_vec();
            let values = tensor
                .to_dtype(DType::F64)?
                .flatten_all()?
                .to_vec1::<f64>()?;
            Self::new(name, shape, values)
        }
    }

    impl TensorCollection {
        /// Load every tensor of a safetensors file.
        ///
        /// Safetensors files carry no ordering, so layers are sorted by name.
        ///
        /// # Errors
        ///
        /// Returns a candle error if the file cannot be read.
        pub fn from_safetensors<P: AsRef<Path>>(path: P) -> Result<Self> {
            let loaded = candle_core::safetensors::load(path.as_ref(), &Device::Cpu)?;
            let mut names: Vec<&String> = loaded.keys().collect();
            names.sort();

            let mut collection = Self::new();
            for name in names {
                collection.insert(Tensor::from_candle(name.clone(), &loaded[name])?)?;
            }
            tracing::info!("Loaded {} tensors from {:?}", collection.len(), path.as_ref());
            Ok(collection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_shape_mismatch() {
        let err = Tensor::new("w", vec![2, 3], vec![1.0; 5]).unwrap_err();
        assert!(matches!(err, GridError::Shape(_)));
    }

    #[test]
    fn test_zero_size_tensor_is_valid() {
        let tensor = Tensor::new("empty", vec![0, 4], vec![]).unwrap();
        assert!(tensor.is_empty());
        assert_eq!(tensor.units().count(), 0);
    }

    #[test]
    fn test_huge_zero_size_shape_is_valid() {
        let tensor = Tensor::new("empty", vec![1 << 40, 1 << 40, 0], vec![]).unwrap();
        assert!(tensor.is_empty());
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let err = Tensor::new("w", vec![1 << 63, 2], vec![]).unwrap_err();
        assert!(matches!(err, GridError::Shape(_)));

        let json = r#"{"tensors": [{"name": "w", "shape": [9223372036854775808, 2], "values": []}]}"#;
        let err = TensorCollection::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("too many elements"));
    }

    #[test]
    fn test_scalar_tensor() {
        let tensor = Tensor::new("scale", vec![], vec![0.5]).unwrap();
        assert_eq!(tensor.ndim(), 0);
        assert_eq!(tensor.units().count(), 1);
    }

    #[test]
    fn test_units_follow_leading_dimension() {
        let tensor = Tensor::new("conv", vec![3, 2, 1, 2], (0..12).map(f64::from).collect()).unwrap();
        let units: Vec<&[f64]> = tensor.units().collect();
        assert_eq!(units.len(), 3);
        assert_eq!(units[1], &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_vector_is_single_unit() {
        let tensor = Tensor::from_vec("bias", vec![1.0, 2.0, 3.0]);
        assert_eq!(tensor.units().count(), 1);
    }

    #[test]
    fn test_collection_rejects_duplicates() {
        let mut tensors = TensorCollection::new();
        tensors.insert(Tensor::from_vec("a", vec![1.0])).unwrap();
        let err = tensors.insert(Tensor::from_vec("a", vec![2.0])).unwrap_err();
        assert!(matches!(err, GridError::DuplicateLayer(name) if name == "a"));
    }

    #[test]
    fn test_concat_preserves_order() {
        let tensors = TensorCollection::from_tensors([
            Tensor::from_vec("b", vec![3.0]),
            Tensor::from_vec("a", vec![1.0, 2.0]),
        ])
        .unwrap();
        assert_eq!(tensors.concat_values(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_json_document_roundtrip() {
        let json = r#"{"tensors": [
            {"name": "fc.weight", "shape": [2, 2], "values": [1, 2, 3, 4]},
            {"name": "fc.bias", "shape": [2], "values": [0.5, -0.5]}
        ]}"#;
        let tensors = TensorCollection::from_json_str(json).unwrap();
        assert_eq!(tensors.names(), vec!["fc.weight", "fc.bias"]);

        let again = TensorCollection::from_json_str(&tensors.to_json().unwrap()).unwrap();
        assert_eq!(again, tensors);
    }

    #[test]
    fn test_json_document_validates_shapes() {
        let json = r#"{"tensors": [{"name": "w", "shape": [3], "values": [1, 2]}]}"#;
        assert!(TensorCollection::from_json_str(json).is_err());
    }

    #[test]
    fn test_json_document_rejects_duplicate_layers() {
        let json = r#"{"tensors": [
            {"name": "w", "shape": [1], "values": [1]},
            {"name": "w", "shape": [1], "values": [2]}
        ]}"#;
        let err = TensorCollection::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("duplicate layer name"));
    }
}
