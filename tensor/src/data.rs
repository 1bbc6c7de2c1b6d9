//! Tensor buffers: raw memory for a set of tensors plus its owner.

use std::fmt;
use std::sync::Arc;

use crate::dtype::Element;
use crate::error::{Result, TensorError};
use crate::info::TensorsInfo;

/// Returns backend-produced memory to the backend that produced it.
///
/// Called exactly once per buffer, when a buffer tagged
/// [`Ownership::Backend`] is dropped.
pub trait OutputRelease: Send + Sync {
    fn release(&self, regions: Vec<Vec<u8>>);
}

/// Who frees a buffer's regions.
#[derive(Clone, Default)]
pub enum Ownership {
    /// Regions are plain heap allocations owned by the buffer.
    #[default]
    Owned,
    /// Regions were produced by a backend and go back through its release
    /// routine.
    Backend(Arc<dyn OutputRelease>),
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Owned => f.write_str("Owned"),
            Ownership::Backend(_) => f.write_str("Backend"),
        }
    }
}

/// Memory for a set of tensors described by a [`TensorsInfo`].
///
/// Cloning deep-copies the regions; the clone is always [`Ownership::Owned`].
/// Dropping the buffer is its release path: backend-owned regions are handed
/// to the backend's [`OutputRelease`], owned regions are freed.
pub struct TensorsData {
    info: TensorsInfo,
    regions: Vec<Option<Vec<u8>>>,
    ownership: Ownership,
}

fn alloc_zeroed(size: usize) -> Result<Vec<u8>> {
    let mut region = Vec::new();
    region
        .try_reserve_exact(size)
        .map_err(|e| TensorError::OutOfMemory(format!("{size} bytes: {e}")))?;
    region.resize(size, 0);
    Ok(region)
}

impl TensorsData {
    /// Allocates one zeroed region per tensor, sized from `info`.
    pub fn allocate(info: &TensorsInfo) -> Result<Self> {
        info.validate()?;
        let regions = (0..info.count())
            .map(|i| alloc_zeroed(info.tensor_size(i)?).map(Some))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            info: info.clone(),
            regions,
            ownership: Ownership::Owned,
        })
    }

    /// Builds the buffer structure without memory; regions are filled in
    /// later with [`TensorsData::set_region`].
    pub fn unallocated(info: &TensorsInfo) -> Result<Self> {
        info.validate()?;
        Ok(Self {
            info: info.clone(),
            regions: vec![None; info.count()],
            ownership: Ownership::Owned,
        })
    }

    pub fn info(&self) -> &TensorsInfo {
        &self.info
    }

    pub fn count(&self) -> usize {
        self.regions.len()
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// Retags the buffer. Must happen before the buffer leaves the code that
    /// filled its regions.
    pub fn set_ownership(&mut self, ownership: Ownership) {
        self.ownership = ownership;
    }

    /// True when every region has memory.
    pub fn is_allocated(&self) -> bool {
        self.regions.iter().all(Option::is_some)
    }

    /// Sum of the sizes of all allocated regions.
    pub fn total_size(&self) -> usize {
        self.regions.iter().flatten().map(Vec::len).sum()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.regions.len() {
            return Err(TensorError::invalid(format!(
                "tensor index {index} out of range (count {})",
                self.regions.len()
            )));
        }
        Ok(())
    }

    pub fn tensor(&self, index: usize) -> Result<&[u8]> {
        self.check_index(index)?;
        self.regions[index]
            .as_deref()
            .ok_or_else(|| TensorError::invalid(format!("tensor {index} is not allocated")))
    }

    pub fn tensor_mut(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check_index(index)?;
        self.regions[index]
            .as_deref_mut()
            .ok_or_else(|| TensorError::invalid(format!("tensor {index} is not allocated")))
    }

    /// Installs `region` as the memory of tensor `index`, without copying.
    /// Its length must equal the size the descriptor implies.
    pub fn set_region(&mut self, index: usize, region: Vec<u8>) -> Result<()> {
        self.check_index(index)?;
        let expected = self.info.tensor_size(index)?;
        if region.len() != expected {
            return Err(TensorError::invalid(format!(
                "tensor {index}: region is {} bytes, expected {expected}",
                region.len()
            )));
        }
        self.regions[index] = Some(region);
        Ok(())
    }

    /// Copies `data` into the start of tensor `index`, allocating the region
    /// if needed.
    pub fn set_tensor_data(&mut self, index: usize, data: &[u8]) -> Result<()> {
        self.check_index(index)?;
        let size = self.info.tensor_size(index)?;
        if data.len() > size {
            return Err(TensorError::invalid(format!(
                "tensor {index}: {} bytes exceed tensor size {size}",
                data.len()
            )));
        }
        if self.regions[index].is_none() {
            self.regions[index] = Some(alloc_zeroed(size)?);
        }
        if let Some(region) = self.regions[index].as_mut() {
            region[..data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    /// Reads tensor `index` as elements of `T`, which must match its type.
    pub fn tensor_values<T: Element>(&self, index: usize) -> Result<Vec<T>> {
        let dtype = self.info.tensor_type(index)?;
        if dtype != T::TYPE {
            return Err(TensorError::invalid(format!(
                "tensor {index} is {dtype}, not {}",
                T::TYPE
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(self.tensor(index)?))
    }

    /// Writes `values` into tensor `index`, whose type must be `T`.
    pub fn set_tensor_values<T: Element>(&mut self, index: usize, values: &[T]) -> Result<()> {
        let dtype = self.info.tensor_type(index)?;
        if dtype != T::TYPE {
            return Err(TensorError::invalid(format!(
                "tensor {index} is {dtype}, not {}",
                T::TYPE
            )));
        }
        self.set_tensor_data(index, bytemuck::cast_slice(values))
    }

    /// Checks that this buffer can carry data for `info`: same tensor count
    /// and, per tensor, an allocated region of the implied byte size.
    pub fn check_layout(&self, info: &TensorsInfo) -> Result<()> {
        if self.regions.len() != info.count() {
            return Err(TensorError::invalid(format!(
                "buffer has {} tensors, expected {}",
                self.regions.len(),
                info.count()
            )));
        }
        for (i, region) in self.regions.iter().enumerate() {
            let expected = info.tensor_size(i)?;
            match region {
                Some(r) if r.len() == expected => {}
                Some(r) => {
                    return Err(TensorError::invalid(format!(
                        "tensor {i}: {} bytes, expected {expected}",
                        r.len()
                    )));
                }
                None => {
                    return Err(TensorError::invalid(format!("tensor {i} is not allocated")));
                }
            }
        }
        Ok(())
    }

    /// Deep copy that reports allocation failure instead of aborting.
    pub fn try_clone(&self) -> Result<Self> {
        let regions = self
            .regions
            .iter()
            .map(|region| {
                region
                    .as_deref()
                    .map(|src| {
                        let mut dst = alloc_zeroed(src.len())?;
                        dst.copy_from_slice(src);
                        Ok::<_, TensorError>(dst)
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            info: self.info.clone(),
            regions,
            ownership: Ownership::Owned,
        })
    }

    /// Copies every region of `src` into this buffer. Layouts must match.
    pub fn copy_from(&mut self, src: &TensorsData) -> Result<()> {
        src.check_layout(&self.info)?;
        self.check_layout(&self.info)?;
        for (dst, src) in self.regions.iter_mut().zip(&src.regions) {
            if let (Some(dst), Some(src)) = (dst, src) {
                dst.copy_from_slice(src);
            }
        }
        Ok(())
    }
}

impl Clone for TensorsData {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            regions: self.regions.clone(),
            ownership: Ownership::Owned,
        }
    }
}

impl Drop for TensorsData {
    fn drop(&mut self) {
        if let Ownership::Backend(release) = std::mem::take(&mut self.ownership) {
            let regions = std::mem::take(&mut self.regions).into_iter().flatten().collect();
            release.release(regions);
        }
    }
}

impl fmt::Debug for TensorsData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorsData")
            .field("count", &self.regions.len())
            .field("total_size", &self.total_size())
            .field("allocated", &self.is_allocated())
            .field("ownership", &self.ownership)
            .finish()
    }
}
