//! Tensor descriptors: shape, element type and name of a set of tensors.

use serde::{Deserialize, Serialize};

use crate::dtype::TensorType;
use crate::error::{Result, TensorError};

/// Maximum number of tensors in one descriptor.
pub const MAX_TENSORS: usize = 16;

/// Maximum rank of a tensor in a legacy descriptor.
pub const RANK_LIMIT: usize = 4;

/// Maximum rank of a tensor in an extended descriptor.
pub const RANK_LIMIT_EXTENDED: usize = 16;

/// Rank class a descriptor was created with.
///
/// Descriptors of different classes never compare equal, even when their
/// effective shapes are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankLimit {
    #[default]
    Legacy,
    Extended,
}

impl RankLimit {
    pub fn max_rank(self) -> usize {
        match self {
            RankLimit::Legacy => RANK_LIMIT,
            RankLimit::Extended => RANK_LIMIT_EXTENDED,
        }
    }
}

/// Metadata of a single tensor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TensorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type")]
    dtype: TensorType,
    #[serde(default)]
    dims: Vec<u32>,
}

impl TensorInfo {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tensor_type(&self) -> TensorType {
        self.dtype
    }

    /// Dimension extents, innermost first.
    pub fn dimension(&self) -> &[u32] {
        &self.dims
    }

    /// Number of elements, 0 when the shape is unset or has a zero extent.
    /// `None` when the count does not fit in `usize`.
    pub fn element_count(&self) -> Option<usize> {
        if self.dims.is_empty() {
            return Some(0);
        }
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
    }

    /// Size of the tensor in bytes, `None` on overflow.
    pub fn byte_size(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.element_size())
    }

    // Trailing extents of 1 do not change the shape: `5` equals `5:1:1:1`.
    fn effective_dims(&self) -> &[u32] {
        let end = self
            .dims
            .iter()
            .rposition(|&d| d != 1)
            .map_or(self.dims.len().min(1), |i| i + 1);
        &self.dims[..end]
    }

    fn same_shape(&self, other: &TensorInfo) -> bool {
        self.dtype == other.dtype && self.effective_dims() == other.effective_dims()
    }

    fn dimension_string(&self) -> String {
        self.dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Descriptor of a set of tensors.
///
/// The tensor count and each element type must be set before a shape can
/// be assigned. A descriptor is valid when every declared tensor has a
/// known type and a non-zero byte size.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TensorsInfo {
    #[serde(default)]
    rank: RankLimit,
    tensors: Vec<TensorInfo>,
}

impl TensorsInfo {
    /// Creates an empty legacy-rank descriptor.
    pub fn new() -> Self {
        Self::with_rank(RankLimit::Legacy)
    }

    /// Creates an empty extended-rank descriptor.
    pub fn extended() -> Self {
        Self::with_rank(RankLimit::Extended)
    }

    pub fn with_rank(rank: RankLimit) -> Self {
        Self {
            rank,
            tensors: Vec::new(),
        }
    }

    /// Appends a tensor with the given type and shape.
    pub fn with_tensor(mut self, dtype: TensorType, dims: &[u32]) -> Result<Self> {
        let index = self.tensors.len();
        self.set_count(index + 1)?;
        self.set_tensor_type(index, dtype)?;
        self.set_dimension(index, dims)?;
        Ok(self)
    }

    pub fn rank_limit(&self) -> RankLimit {
        self.rank
    }

    pub fn is_extended(&self) -> bool {
        self.rank == RankLimit::Extended
    }

    pub fn count(&self) -> usize {
        self.tensors.len()
    }

    /// Sets the number of tensors. New slots start with an unknown type and
    /// no shape; shrinking drops the trailing tensors.
    pub fn set_count(&mut self, count: usize) -> Result<()> {
        if count == 0 || count > MAX_TENSORS {
            return Err(TensorError::invalid(format!(
                "tensor count {count} out of range 1..={MAX_TENSORS}"
            )));
        }
        self.tensors.resize_with(count, TensorInfo::default);
        Ok(())
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn tensor(&self, index: usize) -> Result<&TensorInfo> {
        self.tensors.get(index).ok_or_else(|| self.out_of_range(index))
    }

    fn tensor_mut(&mut self, index: usize) -> Result<&mut TensorInfo> {
        let count = self.tensors.len();
        self.tensors.get_mut(index).ok_or_else(|| {
            TensorError::invalid(format!("tensor index {index} out of range (count {count})"))
        })
    }

    fn out_of_range(&self, index: usize) -> TensorError {
        TensorError::invalid(format!(
            "tensor index {index} out of range (count {})",
            self.tensors.len()
        ))
    }

    pub fn tensor_type(&self, index: usize) -> Result<TensorType> {
        Ok(self.tensor(index)?.dtype)
    }

    pub fn set_tensor_type(&mut self, index: usize, dtype: TensorType) -> Result<()> {
        if !dtype.is_known() {
            return Err(TensorError::invalid("tensor type must not be unknown"));
        }
        let tensor = self.tensor_mut(index)?;
        if checked_bytes(dtype, &tensor.dims).is_none() {
            return Err(overflow(index));
        }
        tensor.dtype = dtype;
        Ok(())
    }

    pub fn dimension(&self, index: usize) -> Result<&[u32]> {
        Ok(self.tensor(index)?.dimension())
    }

    /// Sets the shape of tensor `index`. The element type must already be set.
    pub fn set_dimension(&mut self, index: usize, dims: &[u32]) -> Result<()> {
        let max_rank = self.rank.max_rank();
        if dims.is_empty() || dims.len() > max_rank {
            return Err(TensorError::invalid(format!(
                "rank {} out of range 1..={max_rank}",
                dims.len()
            )));
        }
        let tensor = self.tensor_mut(index)?;
        if !tensor.dtype.is_known() {
            return Err(TensorError::invalid(format!(
                "tensor {index}: type must be set before dimension"
            )));
        }
        if checked_bytes(tensor.dtype, dims).is_none() {
            return Err(overflow(index));
        }
        tensor.dims = dims.to_vec();
        Ok(())
    }

    pub fn name(&self, index: usize) -> Result<Option<&str>> {
        Ok(self.tensor(index)?.name())
    }

    pub fn set_name(&mut self, index: usize, name: Option<&str>) -> Result<()> {
        self.tensor_mut(index)?.name = name.map(str::to_string);
        Ok(())
    }

    /// Byte size of tensor `index` as implied by its type and shape.
    pub fn tensor_size(&self, index: usize) -> Result<usize> {
        self.tensor(index)?
            .byte_size()
            .ok_or_else(|| overflow(index))
    }

    /// Sum of all tensor byte sizes.
    pub fn total_size(&self) -> Result<usize> {
        (0..self.tensors.len()).try_fold(0usize, |total, i| {
            total
                .checked_add(self.tensor_size(i)?)
                .ok_or_else(|| TensorError::invalid("total size overflows usize"))
        })
    }

    /// Checks the descriptor as a whole. Deserialized descriptors bypass the
    /// setters, so every setter invariant is checked again here.
    pub fn validate(&self) -> Result<()> {
        if self.tensors.is_empty() {
            return Err(TensorError::invalid("descriptor has no tensors"));
        }
        if self.tensors.len() > MAX_TENSORS {
            return Err(TensorError::invalid(format!(
                "tensor count {} exceeds {MAX_TENSORS}",
                self.tensors.len()
            )));
        }
        let max_rank = self.rank.max_rank();
        for (i, t) in self.tensors.iter().enumerate() {
            if !t.dtype.is_known() {
                return Err(TensorError::invalid(format!("tensor {i}: type not set")));
            }
            if t.dims.len() > max_rank {
                return Err(TensorError::invalid(format!(
                    "tensor {i}: rank {} exceeds {max_rank}",
                    t.dims.len()
                )));
            }
            if self.tensor_size(i)? == 0 {
                return Err(TensorError::invalid(format!("tensor {i}: shape not set")));
            }
        }
        self.total_size()?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Deep-copies `src` into `self`, including rank class and names.
    pub fn copy_from(&mut self, src: &TensorsInfo) {
        self.clone_from(src);
    }

    /// Shapes as `d0:d1:...`, one entry per tensor, joined by `,`.
    pub fn dimension_string(&self) -> String {
        self.tensors
            .iter()
            .map(TensorInfo::dimension_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Element types joined by `,`.
    pub fn type_string(&self) -> String {
        self.tensors
            .iter()
            .map(|t| t.dtype.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Tensor names joined by `,`; unnamed tensors are empty entries.
    pub fn name_string(&self) -> String {
        self.tensors
            .iter()
            .map(|t| t.name().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Applies a `type,type,...` string, resizing the descriptor to match.
    pub fn parse_types(&mut self, s: &str) -> Result<()> {
        let types = s
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<TensorType>>>()?;
        self.set_count(types.len())?;
        for (i, t) in types.into_iter().enumerate() {
            self.set_tensor_type(i, t)?;
        }
        Ok(())
    }

    /// Applies a `d0:d1,...` string. The entry count must match the current
    /// tensor count, whose types must be set.
    pub fn parse_dimensions(&mut self, s: &str) -> Result<()> {
        let entries: Vec<&str> = s.split(',').collect();
        if entries.len() != self.tensors.len() {
            return Err(TensorError::invalid(format!(
                "dimension string has {} entries, descriptor has {} tensors",
                entries.len(),
                self.tensors.len()
            )));
        }
        for (i, entry) in entries.into_iter().enumerate() {
            let dims = entry
                .split(':')
                .map(|d| {
                    d.trim()
                        .parse::<u32>()
                        .map_err(|e| TensorError::invalid(format!("dimension {d:?}: {e}")))
                })
                .collect::<Result<Vec<u32>>>()?;
            self.set_dimension(i, &dims)?;
        }
        Ok(())
    }

    /// Applies a `name,name,...` string; empty entries clear the name.
    pub fn parse_names(&mut self, s: &str) -> Result<()> {
        let names: Vec<&str> = s.split(',').map(str::trim).collect();
        if names.len() != self.tensors.len() {
            return Err(TensorError::invalid(format!(
                "name string has {} entries, descriptor has {} tensors",
                names.len(),
                self.tensors.len()
            )));
        }
        for (i, name) in names.into_iter().enumerate() {
            self.set_name(i, (!name.is_empty()).then_some(name))?;
        }
        Ok(())
    }
}

fn checked_bytes(dtype: TensorType, dims: &[u32]) -> Option<usize> {
    dims.iter()
        .try_fold(dtype.element_size(), |acc, &d| acc.checked_mul(d as usize))
}

fn overflow(index: usize) -> TensorError {
    TensorError::invalid(format!("tensor {index}: byte size overflows usize"))
}

impl PartialEq for TensorsInfo {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
            && self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|(a, b)| a.same_shape(b))
    }
}
