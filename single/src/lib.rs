//! Single-shot model invocation.
//!
//! Load one model and call it synchronously, with an optional timeout,
//! without building a streaming pipeline. Each [`Single`] handle owns a
//! dedicated worker thread that runs the model backend; callers hand input
//! over through a condition variable and wait for the output.
//!
//! ## Components
//!
//! - [`Single`]: the handle (open, invoke, dynamic reconfiguration,
//!   properties, close)
//! - [`Backend`] / [`BackendFactory`]: the model backend adapter and the
//!   process-wide registry of factories keyed by [`BackendKind`]
//! - [`CustomFilter`]: in-process models registered by name
//! - [`validate_model_files`]: model file checks and backend inference
//!
//! ## Example
//!
//! ```
//! use mlsingle::{register_custom_filter, CustomFilter, Single, SingleOptions};
//! use mlsingle_tensor::{TensorType, TensorsData, TensorsInfo};
//!
//! let info = TensorsInfo::new().with_tensor(TensorType::Float32, &[5])?;
//! let add2 = CustomFilter::new(info.clone(), info.clone(), |input, output| {
//!     let values: Vec<f32> = input.tensor_values::<f32>(0)?.iter().map(|v| v + 2.0).collect();
//!     output.set_tensor_values(0, &values)?;
//!     Ok(())
//! })?;
//! register_custom_filter("doc-add2", add2)?;
//!
//! let single = Single::open(&SingleOptions::custom_filter("doc-add2"))?;
//! let mut input = TensorsData::allocate(&info)?;
//! input.set_tensor_values(0, &[1.0f32, 2.0, 3.0, 4.0, 5.0])?;
//! let output = single.invoke(&input)?;
//! assert_eq!(output.tensor_values::<f32>(0)?, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
//! single.close()?;
//! # Ok::<(), mlsingle::Error>(())
//! ```
//!
//! ## Timeouts
//!
//! With a non-zero timeout the caller stops waiting once it elapses and gets
//! [`Error::TimedOut`]. The backend call is not cancelled: it finishes on the
//! worker thread and its output is released there, never handed to a later
//! caller. The handle reports [`Error::TryAgain`] until the worker is idle.

mod backend;
mod custom;
mod engine;
mod error;
mod options;
mod property;
mod single;
mod validate;

pub use backend::{
    Backend, BackendFactory, LoadRequest, is_backend_available, register_backend,
    unregister_backend,
};
pub use custom::{
    CustomFilter, find_custom_filter, is_custom_filter_registered, register_custom_filter,
    unregister_custom_filter,
};
pub use engine::EngineState;
pub use error::{Error, ErrorCode, Result};
pub use options::{Accelerator, BackendKind, Layout, SingleOptions};
pub use single::Single;
pub use validate::validate_model_files;

pub use mlsingle_tensor as tensor;
