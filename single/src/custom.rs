//! Custom filters: in-process models defined by a callback.
//!
//! A filter is registered once under a name and opened like any other model
//! with [`BackendKind::CustomFilter`](crate::BackendKind::CustomFilter). Every
//! open handle holds a reference to its filter; a referenced filter cannot be
//! unregistered or replaced.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mlsingle_tensor::{TensorsData, TensorsInfo};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::backend::{Backend, BackendFactory, LoadRequest};
use crate::error::{Error, Result};

type InvokeFn = dyn Fn(&TensorsData, &mut TensorsData) -> Result<()> + Send + Sync;
type ReshapeFn = dyn Fn(&TensorsInfo) -> Result<TensorsInfo> + Send + Sync;

/// An in-process model.
pub struct CustomFilter {
    input: TensorsInfo,
    output: TensorsInfo,
    invoke: Box<InvokeFn>,
    reshape: Option<Box<ReshapeFn>>,
}

impl CustomFilter {
    /// Creates a filter with fixed input and output descriptors.
    pub fn new(
        input: TensorsInfo,
        output: TensorsInfo,
        invoke: impl Fn(&TensorsData, &mut TensorsData) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Self> {
        input.validate()?;
        output.validate()?;
        Ok(Self {
            input,
            output,
            invoke: Box::new(invoke),
            reshape: None,
        })
    }

    /// Accepts new input shapes; `reshape` maps an input descriptor to the
    /// output descriptor it produces.
    pub fn with_reshape(
        mut self,
        reshape: impl Fn(&TensorsInfo) -> Result<TensorsInfo> + Send + Sync + 'static,
    ) -> Self {
        self.reshape = Some(Box::new(reshape));
        self
    }

    pub fn input_info(&self) -> &TensorsInfo {
        &self.input
    }

    pub fn output_info(&self) -> &TensorsInfo {
        &self.output
    }
}

impl fmt::Debug for CustomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomFilter")
            .field("input", &self.input.dimension_string())
            .field("output", &self.output.dimension_string())
            .field("dynamic", &self.reshape.is_some())
            .finish()
    }
}

struct Entry {
    filter: Arc<CustomFilter>,
    refs: usize,
}

static FILTERS: Lazy<Mutex<HashMap<String, Entry>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers `filter` under `name`. Re-registering replaces an unused filter.
pub fn register_custom_filter(name: &str, filter: CustomFilter) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("custom filter name is empty"));
    }
    let mut filters = FILTERS.lock();
    if let Some(entry) = filters.get(name) {
        if entry.refs > 0 {
            return Err(Error::invalid(format!(
                "custom filter {name:?} is in use by {} handle(s)",
                entry.refs
            )));
        }
    }
    filters.insert(
        name.to_string(),
        Entry {
            filter: Arc::new(filter),
            refs: 0,
        },
    );
    info!(name, "custom filter registered");
    Ok(())
}

/// Removes the filter registered under `name`.
///
/// Fails with InvalidArgument when no such filter exists or a handle still
/// uses it.
pub fn unregister_custom_filter(name: &str) -> Result<()> {
    let mut filters = FILTERS.lock();
    let entry = filters
        .get(name)
        .ok_or_else(|| Error::invalid(format!("custom filter {name:?} is not registered")))?;
    if entry.refs > 0 {
        return Err(Error::invalid(format!(
            "custom filter {name:?} is in use by {} handle(s)",
            entry.refs
        )));
    }
    filters.remove(name);
    info!(name, "custom filter unregistered");
    Ok(())
}

/// Returns true if a filter is registered under `name`.
pub fn is_custom_filter_registered(name: &str) -> bool {
    FILTERS.lock().contains_key(name)
}

/// Returns the filter registered under `name` without taking a reference.
pub fn find_custom_filter(name: &str) -> Option<Arc<CustomFilter>> {
    FILTERS.lock().get(name).map(|e| Arc::clone(&e.filter))
}

/// A counted reference to a registered filter, released on drop.
struct FilterRef {
    name: String,
    filter: Arc<CustomFilter>,
}

impl FilterRef {
    fn acquire(name: &str) -> Result<Self> {
        let mut filters = FILTERS.lock();
        let entry = filters
            .get_mut(name)
            .ok_or_else(|| Error::invalid(format!("custom filter {name:?} is not registered")))?;
        entry.refs += 1;
        Ok(Self {
            name: name.to_string(),
            filter: Arc::clone(&entry.filter),
        })
    }
}

impl Drop for FilterRef {
    fn drop(&mut self) {
        if let Some(entry) = FILTERS.lock().get_mut(&self.name) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }
}

/// Backend adapter over a registered filter.
struct CustomFilterBackend {
    filter: FilterRef,
    input: TensorsInfo,
    output: TensorsInfo,
}

impl Backend for CustomFilterBackend {
    fn name(&self) -> &str {
        &self.filter.name
    }

    fn negotiate(&mut self) -> Result<(TensorsInfo, TensorsInfo)> {
        Ok((self.input.clone(), self.output.clone()))
    }

    fn set_input_info(&mut self, info: &TensorsInfo) -> Result<TensorsInfo> {
        let reshape = self.filter.filter.reshape.as_ref().ok_or_else(|| {
            Error::not_supported(format!(
                "custom filter {:?} has a fixed input shape",
                self.filter.name
            ))
        })?;
        let output = reshape(info)?;
        output.validate()?;
        debug!(
            name = %self.filter.name,
            input = %info.dimension_string(),
            output = %output.dimension_string(),
            "custom filter reshaped"
        );
        self.input = info.clone();
        self.output = output.clone();
        Ok(output)
    }

    fn invoke(&mut self, input: &TensorsData, output: &mut TensorsData) -> Result<()> {
        (self.filter.filter.invoke)(input, output)
    }
}

/// Factory for [`BackendKind::CustomFilter`](crate::BackendKind::CustomFilter).
pub(crate) struct CustomFilterFactory;

impl BackendFactory for CustomFilterFactory {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn Backend>> {
        let name = match request.models.as_slice() {
            [one] => one
                .to_str()
                .ok_or_else(|| Error::invalid("custom filter name is not UTF-8"))?,
            _ => return Err(Error::invalid("a custom filter is opened by a single name")),
        };
        let filter = FilterRef::acquire(name)?;
        let input = filter.filter.input.clone();
        let output = filter.filter.output.clone();
        Ok(Box::new(CustomFilterBackend {
            filter,
            input,
            output,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::options::Accelerator;
    use mlsingle_tensor::TensorType;
    use std::path::PathBuf;

    fn info(n: u32) -> TensorsInfo {
        TensorsInfo::new()
            .with_tensor(TensorType::Float32, &[n])
            .unwrap()
    }

    fn identity() -> CustomFilter {
        CustomFilter::new(info(4), info(4), |input, output| {
            output.copy_from(input)?;
            Ok(())
        })
        .unwrap()
    }

    fn load(name: &str) -> Result<Box<dyn Backend>> {
        CustomFilterFactory.load(&LoadRequest {
            models: vec![PathBuf::from(name)],
            accelerator: Accelerator::Auto,
            custom: None,
        })
    }

    #[test]
    fn invalid_descriptors_rejected() {
        let err = CustomFilter::new(TensorsInfo::new(), info(1), |_, _| Ok(())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn register_find_unregister() {
        register_custom_filter("custom-test-basic", identity()).unwrap();
        assert!(is_custom_filter_registered("custom-test-basic"));
        let found = find_custom_filter("custom-test-basic").unwrap();
        assert_eq!(found.input_info(), &info(4));
        unregister_custom_filter("custom-test-basic").unwrap();
        assert!(!is_custom_filter_registered("custom-test-basic"));
        assert!(unregister_custom_filter("custom-test-basic").is_err());
    }

    #[test]
    fn empty_name_rejected() {
        assert!(register_custom_filter("", identity()).is_err());
    }

    #[test]
    fn busy_filter_cannot_be_removed() {
        register_custom_filter("custom-test-busy", identity()).unwrap();
        let backend = load("custom-test-busy").unwrap();

        let err = unregister_custom_filter("custom-test-busy").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        let err = register_custom_filter("custom-test-busy", identity()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        drop(backend);
        unregister_custom_filter("custom-test-busy").unwrap();
    }

    #[test]
    fn backend_invoke_and_reshape() {
        let filter = identity().with_reshape(|input| Ok(input.clone()));
        register_custom_filter("custom-test-reshape", filter).unwrap();
        let mut backend = load("custom-test-reshape").unwrap();

        let (input, output) = backend.negotiate().unwrap();
        assert_eq!(input, info(4));
        assert_eq!(output, info(4));

        let mut data = TensorsData::allocate(&input).unwrap();
        data.set_tensor_values(0, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mut out = TensorsData::allocate(&output).unwrap();
        backend.invoke(&data, &mut out).unwrap();
        assert_eq!(out.tensor_values::<f32>(0).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let reshaped = backend.set_input_info(&info(2)).unwrap();
        assert_eq!(reshaped, info(2));
        assert_eq!(backend.negotiate().unwrap().0, info(2));

        drop(backend);
        unregister_custom_filter("custom-test-reshape").unwrap();
    }

    #[test]
    fn fixed_filter_rejects_reshape() {
        register_custom_filter("custom-test-fixed", identity()).unwrap();
        let mut backend = load("custom-test-fixed").unwrap();
        let err = backend.set_input_info(&info(2)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotSupported);
        drop(backend);
        unregister_custom_filter("custom-test-fixed").unwrap();
    }

    #[test]
    fn unknown_name() {
        let err = load("custom-test-missing").err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
