//! Model backend adapter: the trait a loaded model implements, and the
//! process-wide registry of backend factories keyed by [`BackendKind`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use mlsingle_tensor::{OutputRelease, TensorsData, TensorsInfo};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::custom::CustomFilterFactory;
use crate::error::{Error, Result};
use crate::options::{Accelerator, BackendKind};

/// A loaded model.
///
/// The engine calls [`Backend::invoke`] on its worker thread without holding
/// the handle lock; every other method runs on a caller thread while the
/// handle is idle. Dropping the backend unloads the model.
pub trait Backend: Send {
    fn name(&self) -> &str;

    /// Reports the input and output descriptors the model was loaded with.
    fn negotiate(&mut self) -> Result<(TensorsInfo, TensorsInfo)>;

    /// Reconfigures the model for a new input shape and returns the
    /// resulting output descriptor.
    fn set_input_info(&mut self, info: &TensorsInfo) -> Result<TensorsInfo> {
        let _ = info;
        Err(Error::not_supported(format!(
            "{}: dynamic input is not supported",
            self.name()
        )))
    }

    /// True when the backend supplies output memory itself through
    /// [`TensorsData::set_region`] instead of writing into allocated regions.
    fn allocates_output(&self) -> bool {
        false
    }

    /// Release routine for output memory the backend allocates.
    fn output_release(&self) -> Option<Arc<dyn OutputRelease>> {
        None
    }

    /// Runs one inference pass.
    ///
    /// `output` is fully allocated unless [`Backend::allocates_output`] is
    /// true, in which case its regions are empty and must all be set.
    fn invoke(&mut self, input: &TensorsData, output: &mut TensorsData) -> Result<()>;

    fn get_property(&self, name: &str) -> Result<String> {
        Err(Error::not_supported(format!("{}: unknown property {name:?}", self.name())))
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let _ = value;
        Err(Error::not_supported(format!("{}: unknown property {name:?}", self.name())))
    }
}

/// What a factory needs to load a model.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub models: Vec<PathBuf>,
    pub accelerator: Accelerator,
    pub custom: Option<String>,
}

/// Loads models for one backend kind.
pub trait BackendFactory: Send + Sync {
    fn supports_accelerator(&self, accel: Accelerator) -> bool {
        accel.is_cpu_compatible()
    }

    fn load(&self, request: &LoadRequest) -> Result<Box<dyn Backend>>;
}

static FACTORIES: Lazy<Mutex<HashMap<BackendKind, Arc<dyn BackendFactory>>>> = Lazy::new(|| {
    let mut map: HashMap<BackendKind, Arc<dyn BackendFactory>> = HashMap::new();
    map.insert(BackendKind::CustomFilter, Arc::new(CustomFilterFactory));
    Mutex::new(map)
});

/// Registers the factory for `kind`, replacing any previous one.
pub fn register_backend(kind: BackendKind, factory: Arc<dyn BackendFactory>) -> Result<()> {
    if kind == BackendKind::Any {
        return Err(Error::invalid("cannot register a factory for backend 'any'"));
    }
    FACTORIES.lock().insert(kind, factory);
    info!(backend = %kind, "backend registered");
    Ok(())
}

/// Removes the factory for `kind`. Returns true if one was registered.
pub fn unregister_backend(kind: BackendKind) -> bool {
    FACTORIES.lock().remove(&kind).is_some()
}

/// Returns true if models of `kind` can be loaded.
pub fn is_backend_available(kind: BackendKind) -> bool {
    FACTORIES.lock().contains_key(&kind)
}

/// Loads a model with the factory registered for `kind`.
pub(crate) fn load_backend(kind: BackendKind, request: &LoadRequest) -> Result<Box<dyn Backend>> {
    let factory = FACTORIES
        .lock()
        .get(&kind)
        .cloned()
        .ok_or_else(|| Error::not_supported(format!("backend {kind} is not available")))?;

    if !factory.supports_accelerator(request.accelerator) {
        return Err(Error::not_supported(format!(
            "backend {kind} does not support accelerator {:?}",
            request.accelerator
        )));
    }

    let backend = factory.load(request)?;
    debug!(backend = %kind, name = backend.name(), "backend loaded");
    Ok(backend)
}
