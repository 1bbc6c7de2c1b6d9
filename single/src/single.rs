//! The single-shot handle: open a model, invoke it, close it.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mlsingle_tensor::{TensorsData, TensorsInfo};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{load_backend, Backend, LoadRequest};
use crate::engine::{Engine, EngineState};
use crate::error::{Error, Result};
use crate::options::SingleOptions;
use crate::validate::validate_model_files;

/// A loaded model with its own worker thread.
///
/// `Single` is a cheap, cloneable reference; clones share one model and one
/// worker. At most one invocation runs at a time; a concurrent caller gets
/// [`Error::TryAgain`] instead of queuing. After [`Single::close`] every clone
/// reports [`Error::InvalidArgument`]. Dropping the last clone closes the
/// handle if nobody did.
///
/// # Example
///
/// ```no_run
/// use mlsingle::{Single, SingleOptions};
/// use mlsingle_tensor::TensorsData;
///
/// let single = Single::open(&SingleOptions::new("add.tflite")).unwrap();
/// let input = TensorsData::allocate(&single.input_info().unwrap()).unwrap();
/// let output = single.invoke(&input).unwrap();
/// single.close().unwrap();
/// ```
#[derive(Clone)]
pub struct Single {
    inner: Arc<Inner>,
}

struct Inner {
    /// Validity tag, checked before the handle lock is taken.
    alive: Mutex<bool>,
    engine: Arc<Engine>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn check_alive(&self) -> Result<()> {
        if *self.alive.lock() {
            Ok(())
        } else {
            Err(Error::invalid("handle is closed"))
        }
    }

    fn shutdown(&self) -> Result<()> {
        {
            let mut alive = self.alive.lock();
            if !*alive {
                return Err(Error::invalid("handle is already closed"));
            }
            *alive = false;
        }

        self.engine.request_join();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(name = %self.engine.name(), "worker thread panicked");
            }
        }
        self.engine.unload();
        info!(name = %self.engine.name(), "single handle closed");
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl Single {
    /// Validates the model files, loads the backend for them and starts the
    /// worker thread.
    pub fn open(options: &SingleOptions) -> Result<Self> {
        let kind = validate_model_files(&options.models, options.backend)?;
        let request = LoadRequest {
            models: options.models.clone(),
            accelerator: options.accelerator,
            custom: options.custom.clone(),
        };
        let backend = load_backend(kind, &request)?;
        Self::open_with_backend(backend, options)
    }

    /// Opens a handle around an already-loaded backend. Model paths, kind and
    /// accelerator in `options` are ignored.
    pub fn open_with_backend(
        mut backend: Box<dyn Backend>,
        options: &SingleOptions,
    ) -> Result<Self> {
        let (mut input_info, mut output_info) = backend.negotiate()?;

        if let Some(requested) = &options.input_info {
            requested.validate()?;
            if *requested != input_info {
                output_info = backend.set_input_info(requested).map_err(|e| {
                    Error::invalid(format!(
                        "model cannot take input {}: {e}",
                        requested.dimension_string()
                    ))
                })?;
            }
            input_info = requested.clone();
        }
        input_info.validate()?;
        output_info.validate()?;

        if let Some(expected) = &options.output_info {
            expected.validate()?;
            if *expected != output_info {
                return Err(Error::invalid(format!(
                    "model produces {} ({}), not {} ({})",
                    output_info.dimension_string(),
                    output_info.type_string(),
                    expected.dimension_string(),
                    expected.type_string()
                )));
            }
            output_info = expected.clone();
        }

        let name = backend.name().to_string();
        info!(
            name = %name,
            input = %input_info.dimension_string(),
            output = %output_info.dimension_string(),
            "opening single handle"
        );

        let engine = Arc::new(Engine::new(
            backend,
            input_info,
            output_info,
            options.timeout_duration(),
        ));
        let worker_engine = Arc::clone(&engine);
        let worker = thread::Builder::new()
            .name(format!("mlsingle-{name}"))
            .spawn(move || worker_engine.run())
            .map_err(|e| Error::OutOfMemory(format!("cannot start worker thread: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                alive: Mutex::new(true),
                engine,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Stops the worker after any in-flight invocation, releases pending
    /// outputs and unloads the model. A second close is InvalidArgument.
    pub fn close(&self) -> Result<()> {
        self.inner.shutdown()
    }

    pub(crate) fn engine(&self) -> Result<&Engine> {
        self.inner.check_alive()?;
        Ok(&self.inner.engine)
    }

    /// Runs the model on `input` and returns a newly allocated output.
    ///
    /// The input is copied, so `input` stays owned by the caller. On
    /// [`Error::TimedOut`] the eventual output is released internally and is
    /// never returned by a later call.
    pub fn invoke(&self, input: &TensorsData) -> Result<TensorsData> {
        self.engine()?.invoke(input, None)
    }

    /// Runs the model on `input` and writes the result into the
    /// caller-allocated `output`, which must match the output descriptor.
    pub fn invoke_into(&self, input: &TensorsData, output: &mut TensorsData) -> Result<()> {
        let result = self.engine()?.invoke(input, Some(&*output))?;
        output.copy_from(&result)?;
        Ok(())
    }

    /// Reconfigures the input to `info`, then invokes.
    ///
    /// Returns the output with its descriptor. When reconfiguration or the
    /// invocation fails the previous input descriptor is restored; on success
    /// the new descriptor stays in effect. After a timeout the restore
    /// happens on the worker once the backend call finishes, and the handle
    /// reports TryAgain until then.
    pub fn invoke_dynamic(
        &self,
        input: &TensorsData,
        info: &TensorsInfo,
    ) -> Result<(TensorsData, TensorsInfo)> {
        self.engine()?.invoke_dynamic(input, info)
    }

    /// Sets the invoke timeout; zero waits without a deadline.
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let engine = self.engine()?;
        engine.lock().timeout = timeout;
        debug!(name = %engine.name(), ?timeout, "timeout set");
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        Ok(self.engine()?.lock().timeout)
    }

    pub fn input_info(&self) -> Result<TensorsInfo> {
        Ok(self.engine()?.lock().input_info.clone())
    }

    pub fn output_info(&self) -> Result<TensorsInfo> {
        Ok(self.engine()?.lock().output_info.clone())
    }

    /// Asks the backend to accept `info` as input and re-derives the output
    /// descriptor. Only valid while no invocation is running.
    pub fn set_input_info(&self, info: &TensorsInfo) -> Result<()> {
        self.engine()?.set_input_info(info)?;
        Ok(())
    }

    /// Current worker state.
    pub fn state(&self) -> Result<EngineState> {
        Ok(self.engine()?.state())
    }

    /// Name of the loaded backend.
    pub fn backend_name(&self) -> Result<String> {
        Ok(self.engine()?.name().to_string())
    }
}

impl std::fmt::Debug for Single {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Single")
            .field("name", &self.inner.engine.name())
            .field("alive", &*self.inner.alive.lock())
            .finish()
    }
}
