//! Model file validation: confirms or infers the backend kind at open time.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::custom::is_custom_filter_registered;
use crate::error::{Error, Result};
use crate::options::BackendKind;

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Maps the extension of the first model file to a backend kind.
fn kind_from_extension(path: &Path) -> Result<BackendKind> {
    match extension(path).as_deref() {
        Some("tflite") => Ok(BackendKind::TensorflowLite),
        Some("onnx") => Ok(BackendKind::Onnx),
        Some("param") => Ok(BackendKind::Ncnn),
        Some("pt") => Ok(BackendKind::Pytorch),
        Some("xml") => Ok(BackendKind::Openvino),
        Some("dlc") => Ok(BackendKind::Snpe),
        Some(ext) => Err(Error::not_supported(format!(
            "cannot infer backend from extension {ext:?} of '{}'",
            path.display()
        ))),
        None => Err(Error::not_supported(format!(
            "cannot infer backend of '{}' without an extension",
            path.display()
        ))),
    }
}

/// Number of files a model of `kind` is made of.
fn file_count(kind: BackendKind) -> usize {
    match kind {
        BackendKind::Ncnn | BackendKind::Openvino => 2,
        _ => 1,
    }
}

/// Checks `models` against `kind` and returns the concrete backend kind.
///
/// A registered custom filter name is accepted for [`BackendKind::CustomFilter`]
/// and, when no such file exists, for [`BackendKind::Any`]. Every other kind
/// needs existing files whose extensions match the kind.
pub fn validate_model_files(models: &[PathBuf], kind: BackendKind) -> Result<BackendKind> {
    let first = models
        .first()
        .ok_or_else(|| Error::invalid("no model given"))?;

    let custom_name = first.to_str().filter(|_| models.len() == 1);
    match kind {
        BackendKind::CustomFilter => {
            let name = custom_name
                .ok_or_else(|| Error::invalid("a custom filter is opened by a single name"))?;
            if !is_custom_filter_registered(name) {
                return Err(Error::invalid(format!("custom filter {name:?} is not registered")));
            }
            return Ok(BackendKind::CustomFilter);
        }
        BackendKind::Any if !first.exists() => {
            if let Some(name) = custom_name.filter(|n| is_custom_filter_registered(n)) {
                debug!(name, "model resolved to custom filter");
                return Ok(BackendKind::CustomFilter);
            }
        }
        _ => {}
    }

    for path in models {
        if !path.is_file() {
            return Err(Error::invalid(format!("model file '{}' not found", path.display())));
        }
    }

    let inferred = kind_from_extension(first)?;
    if kind != BackendKind::Any && kind != inferred {
        return Err(Error::not_supported(format!(
            "'{}' is not a {kind} model",
            first.display()
        )));
    }

    let expected = file_count(inferred);
    if models.len() != expected {
        return Err(Error::invalid(format!(
            "{inferred} model needs {expected} file(s), got {}",
            models.len()
        )));
    }
    if expected == 2 && extension(&models[1]).as_deref() != Some("bin") {
        return Err(Error::invalid(format!(
            "{inferred} weights '{}' must be a .bin file",
            models[1].display()
        )));
    }

    debug!(backend = %inferred, files = models.len(), "model files validated");
    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::fs;

    fn temp_model(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mlsingle-validate-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"model").unwrap();
        path
    }

    #[test]
    fn empty_models() {
        let err = validate_model_files(&[], BackendKind::Any).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn missing_file() {
        let err = validate_model_files(&[PathBuf::from("/nonexistent/a.tflite")], BackendKind::Any)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn infer_single_file() {
        let tflite = temp_model("mobilenet.tflite");
        assert_eq!(
            validate_model_files(&[tflite.clone()], BackendKind::Any).unwrap(),
            BackendKind::TensorflowLite
        );
        assert_eq!(
            validate_model_files(&[tflite], BackendKind::TensorflowLite).unwrap(),
            BackendKind::TensorflowLite
        );
        let onnx = temp_model("speaker.onnx");
        assert_eq!(
            validate_model_files(&[onnx], BackendKind::Any).unwrap(),
            BackendKind::Onnx
        );
    }

    #[test]
    fn kind_mismatch() {
        let onnx = temp_model("mismatch.onnx");
        let err = validate_model_files(&[onnx], BackendKind::TensorflowLite).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotSupported);
    }

    #[test]
    fn unknown_extension() {
        let caffe = temp_model("net.caffemodel");
        let err = validate_model_files(&[caffe], BackendKind::Any).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotSupported);
    }

    #[test]
    fn two_file_models() {
        let param = temp_model("vad.param");
        let bin = temp_model("vad.bin");
        assert_eq!(
            validate_model_files(&[param.clone(), bin], BackendKind::Ncnn).unwrap(),
            BackendKind::Ncnn
        );
        let err = validate_model_files(&[param.clone()], BackendKind::Ncnn).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        let other = temp_model("vad.weights");
        let err = validate_model_files(&[param, other], BackendKind::Any).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn unregistered_custom_filter() {
        let err = validate_model_files(
            &[PathBuf::from("validate-unregistered")],
            BackendKind::CustomFilter,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
