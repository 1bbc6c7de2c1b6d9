//! Tensor descriptors and buffers for single-shot model invocation.
//!
//! A [`TensorsInfo`] describes the element type, shape and optional name of
//! up to [`MAX_TENSORS`] tensors. A [`TensorsData`] holds the memory for
//! those tensors and knows how to give it back: plain allocations are freed,
//! memory produced by a model backend goes back through the backend's
//! [`OutputRelease`].
//!
//! # Usage
//!
//! ```
//! use mlsingle_tensor::{TensorType, TensorsData, TensorsInfo};
//!
//! let info = TensorsInfo::new()
//!     .with_tensor(TensorType::Float32, &[5])
//!     .unwrap();
//! let mut data = TensorsData::allocate(&info).unwrap();
//! data.set_tensor_values(0, &[1.0f32, 2.0, 3.0, 4.0, 5.0]).unwrap();
//! assert_eq!(data.total_size(), 20);
//! ```
//!
//! # Rank Limits
//!
//! Legacy descriptors accept up to [`RANK_LIMIT`] dimensions per tensor,
//! extended descriptors up to [`RANK_LIMIT_EXTENDED`]. The two classes never
//! compare equal.

mod data;
mod dtype;
mod error;
mod info;

pub use data::{Ownership, OutputRelease, TensorsData};
pub use dtype::{Element, TensorType};
pub use error::{Result, TensorError};
pub use info::{RankLimit, TensorInfo, TensorsInfo, MAX_TENSORS, RANK_LIMIT, RANK_LIMIT_EXTENDED};
