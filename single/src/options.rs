//! Open options: model files, backend kind, accelerator and timeout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use mlsingle_tensor::TensorsInfo;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Model backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Infer from the model file extension.
    #[default]
    Any,
    /// In-process filter registered with [`crate::register_custom_filter`].
    CustomFilter,
    TensorflowLite,
    Onnx,
    Ncnn,
    Pytorch,
    Openvino,
    Snpe,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Any => "any",
            BackendKind::CustomFilter => "custom-filter",
            BackendKind::TensorflowLite => "tensorflow-lite",
            BackendKind::Onnx => "onnx",
            BackendKind::Ncnn => "ncnn",
            BackendKind::Pytorch => "pytorch",
            BackendKind::Openvino => "openvino",
            BackendKind::Snpe => "snpe",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "any" | "auto" => BackendKind::Any,
            "custom-filter" | "custom-easy" => BackendKind::CustomFilter,
            "tensorflow-lite" | "tflite" => BackendKind::TensorflowLite,
            "onnx" | "onnxruntime" => BackendKind::Onnx,
            "ncnn" => BackendKind::Ncnn,
            "pytorch" => BackendKind::Pytorch,
            "openvino" => BackendKind::Openvino,
            "snpe" => BackendKind::Snpe,
            other => return Err(Error::invalid(format!("unknown backend {other:?}"))),
        };
        Ok(kind)
    }
}

/// Hardware the backend should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
    /// Let the backend pick.
    #[default]
    Auto,
    /// The backend's own default device.
    Default,
    Cpu,
    Gpu,
    Npu,
}

impl Accelerator {
    /// True for requests any CPU-only backend can honor.
    pub fn is_cpu_compatible(self) -> bool {
        matches!(self, Accelerator::Auto | Accelerator::Default | Accelerator::Cpu)
    }
}

/// Memory layout hint of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Any,
    Nchw,
    Nhwc,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::Any => "any",
            Layout::Nchw => "nchw",
            Layout::Nhwc => "nhwc",
        }
    }
}

impl FromStr for Layout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "none" | "" => Ok(Layout::Any),
            "nchw" => Ok(Layout::Nchw),
            "nhwc" => Ok(Layout::Nhwc),
            other => Err(Error::invalid(format!("unknown layout {other:?}"))),
        }
    }
}

/// Options for [`crate::Single::open`].
///
/// # JSON Format
/// ```json
/// {
///   "models": ["model.tflite"],
///   "backend": "tensorflow-lite",
///   "accelerator": "cpu",
///   "timeout_ms": 500
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SingleOptions {
    /// Model file paths, or the name of a registered custom filter.
    pub models: Vec<PathBuf>,
    /// Requested input descriptor; renegotiated with the backend if it
    /// differs from what the model reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_info: Option<TensorsInfo>,
    /// Expected output descriptor; must match what the backend negotiates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_info: Option<TensorsInfo>,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub accelerator: Accelerator,
    /// Invoke timeout in milliseconds; 0 waits without a deadline.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Backend-specific option string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,
}

impl SingleOptions {
    /// Creates options for a single model path.
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            models: vec![model.into()],
            ..Default::default()
        }
    }

    /// Creates options for a registered custom filter.
    pub fn custom_filter(name: impl Into<PathBuf>) -> Self {
        Self::new(name).backend(BackendKind::CustomFilter)
    }

    /// Adds another model path (e.g. the weights file of a two-file model).
    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.models.push(path.into());
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn accelerator(mut self, accel: Accelerator) -> Self {
        self.accelerator = accel;
        self
    }

    pub fn input_info(mut self, info: TensorsInfo) -> Self {
        self.input_info = Some(info);
        self
    }

    pub fn output_info(mut self, info: TensorsInfo) -> Self {
        self.output_info = Some(info);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn custom(mut self, option: impl Into<String>) -> Self {
        self.custom = Some(option.into());
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Loads options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid(format!("cannot read options '{}': {e}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid(format!("options parse error: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::invalid(format!("options serialise error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlsingle_tensor::TensorType;

    #[test]
    fn defaults() {
        let opts = SingleOptions::new("model.onnx");
        assert_eq!(opts.backend, BackendKind::Any);
        assert_eq!(opts.accelerator, Accelerator::Auto);
        assert_eq!(opts.timeout_duration(), Duration::ZERO);
    }

    #[test]
    fn builder() {
        let opts = SingleOptions::new("model.param")
            .model("model.bin")
            .backend(BackendKind::Ncnn)
            .accelerator(Accelerator::Gpu)
            .timeout(Duration::from_millis(250))
            .custom("threads:2");
        assert_eq!(opts.models.len(), 2);
        assert_eq!(opts.timeout_ms, 250);
        assert_eq!(opts.custom.as_deref(), Some("threads:2"));
    }

    #[test]
    fn huge_timeout_saturates() {
        let opts = SingleOptions::new("model.onnx").timeout(Duration::MAX);
        assert_eq!(opts.timeout_ms, u64::MAX);
        assert_eq!(opts.timeout_duration(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn from_json() {
        let json = r#"{
            "models": ["/tmp/add.tflite"],
            "backend": "tensorflow-lite",
            "accelerator": "cpu",
            "timeout_ms": 100,
            "input_info": {"tensors": [{"type": "float32", "dims": [5]}]}
        }"#;
        let opts = SingleOptions::from_json(json).unwrap();
        assert_eq!(opts.backend, BackendKind::TensorflowLite);
        assert_eq!(opts.accelerator, Accelerator::Cpu);
        assert_eq!(opts.timeout_ms, 100);
        let info = opts.input_info.unwrap();
        assert_eq!(info.tensor_type(0).unwrap(), TensorType::Float32);
        assert_eq!(info.dimension(0).unwrap(), &[5]);
    }

    #[test]
    fn json_roundtrip() {
        let opts = SingleOptions::custom_filter("add2").timeout(Duration::from_millis(5));
        let back = SingleOptions::from_json(&opts.to_json().unwrap()).unwrap();
        assert_eq!(back.backend, BackendKind::CustomFilter);
        assert_eq!(back.timeout_ms, 5);
    }

    #[test]
    fn parse_names() {
        assert_eq!("tflite".parse::<BackendKind>().unwrap(), BackendKind::TensorflowLite);
        assert_eq!("custom-easy".parse::<BackendKind>().unwrap(), BackendKind::CustomFilter);
        assert!("caffe".parse::<BackendKind>().is_err());
        assert_eq!("NHWC".parse::<Layout>().unwrap(), Layout::Nhwc);
        assert!("hwc".parse::<Layout>().is_err());
    }
}
