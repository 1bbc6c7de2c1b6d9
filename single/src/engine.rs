//! Invocation engine: the worker thread, its state machine, and the
//! caller-side handoff with timeout.
//!
//! # State Machine
//! ```text
//! Idle ──invoke──▶ Running ──result settled──▶ Idle
//!   │                 │
//!   └──────close──────┴──▶ JoinRequested (terminal)
//! ```
//!
//! The caller installs a job and flips `Idle → Running`; the worker takes the
//! job and runs the backend with the handle lock released. The waiting caller
//! collects the result and flips back to `Idle` in the same critical section,
//! so no other caller can slip in between. A caller that gives up waiting
//! marks its job abandoned; the worker then routes the late output to the
//! deferred-release list instead of the completion slot, applies any pending
//! descriptor restore, and returns the handle to `Idle` itself.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use mlsingle_tensor::{Ownership, TensorsData, TensorsInfo};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::options::Layout;

/// Lifecycle state of a handle's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting new work.
    Idle,
    /// One invocation is executing, or its result has not been settled yet.
    Running,
    /// The handle is closing; never left once entered.
    JoinRequested,
}

struct Job {
    id: u64,
    input: TensorsData,
}

struct Completion {
    id: u64,
    result: Result<TensorsData>,
}

/// Everything guarded by the handle lock.
pub(crate) struct Slots {
    pub(crate) state: EngineState,
    job: Option<Job>,
    completed: Option<Completion>,
    abandoned: Option<u64>,
    /// Input descriptor to reinstate once an abandoned dynamic job finishes.
    restore_input: Option<TensorsInfo>,
    invoking: bool,
    next_id: u64,
    deferred: Vec<TensorsData>,
    pub(crate) input_info: TensorsInfo,
    pub(crate) output_info: TensorsInfo,
    pub(crate) input_layout: Vec<Layout>,
    pub(crate) output_layout: Vec<Layout>,
    pub(crate) timeout: Duration,
}

impl Slots {
    /// Fails unless the handle can accept work right now.
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        match self.state {
            EngineState::Idle => Ok(()),
            EngineState::Running => Err(Error::TryAgain),
            EngineState::JoinRequested => Err(Error::invalid("handle is closing")),
        }
    }

    fn is_completed(&self, id: u64) -> bool {
        self.completed.as_ref().is_some_and(|c| c.id == id)
    }
}

pub(crate) struct Engine {
    name: String,
    slots: Mutex<Slots>,
    cond: Condvar,
    backend: Mutex<Option<Box<dyn Backend>>>,
}

impl Engine {
    pub(crate) fn new(
        backend: Box<dyn Backend>,
        input_info: TensorsInfo,
        output_info: TensorsInfo,
        timeout: Duration,
    ) -> Self {
        let input_layout = vec![Layout::Any; input_info.count()];
        let output_layout = vec![Layout::Any; output_info.count()];
        Self {
            name: backend.name().to_string(),
            slots: Mutex::new(Slots {
                state: EngineState::Idle,
                job: None,
                completed: None,
                abandoned: None,
                restore_input: None,
                invoking: false,
                next_id: 0,
                deferred: Vec::new(),
                input_info,
                output_info,
                input_layout,
                output_layout,
                timeout,
            }),
            cond: Condvar::new(),
            backend: Mutex::new(Some(backend)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock()
    }

    pub(crate) fn state(&self) -> EngineState {
        self.slots.lock().state
    }

    /// Runs `f` with the handle locked, idle, and its backend loaded.
    pub(crate) fn with_idle_backend<R>(
        &self,
        f: impl FnOnce(&mut Slots, &mut dyn Backend) -> Result<R>,
    ) -> Result<R> {
        let mut slots = self.slots.lock();
        slots.ensure_idle()?;
        let mut backend = self.backend.lock();
        let backend = backend
            .as_deref_mut()
            .ok_or_else(|| Error::invalid("backend is unloaded"))?;
        f(&mut slots, backend)
    }

    /// Renegotiates the model for `info` and stores the new descriptors.
    /// Fails with TryAgain while an invocation is running.
    pub(crate) fn set_input_info(&self, info: &TensorsInfo) -> Result<TensorsInfo> {
        info.validate()?;
        let mut slots = self.slots.lock();
        slots.ensure_idle()?;
        self.reconfigure(&mut slots, info)
    }

    // Caller holds the handle lock and has checked the state.
    fn reconfigure(&self, slots: &mut Slots, info: &TensorsInfo) -> Result<TensorsInfo> {
        if *info == slots.input_info {
            slots.input_info.copy_from(info);
            return Ok(slots.output_info.clone());
        }

        let output_info = {
            let mut backend = self.backend.lock();
            let backend = backend
                .as_deref_mut()
                .ok_or_else(|| Error::invalid("backend is unloaded"))?;
            backend.set_input_info(info)?
        };
        output_info.validate()?;

        debug!(
            name = %self.name,
            input = %info.dimension_string(),
            output = %output_info.dimension_string(),
            "descriptors renegotiated"
        );
        slots.input_layout.resize(info.count(), Layout::Any);
        slots.output_layout.resize(output_info.count(), Layout::Any);
        slots.input_info = info.clone();
        slots.output_info = output_info.clone();
        Ok(output_info)
    }

    fn restore(&self, slots: &mut Slots, previous: &TensorsInfo) {
        if let Err(e) = self.reconfigure(slots, previous) {
            warn!(name = %self.name, error = %e, "cannot restore input descriptor");
        }
    }

    /// Hands `input` to the worker and waits for the result.
    ///
    /// `output`, when given, is only validated against the output descriptor
    /// so that a caller-allocated buffer is rejected before any state change.
    pub(crate) fn invoke(
        &self,
        input: &TensorsData,
        output: Option<&TensorsData>,
    ) -> Result<TensorsData> {
        let mut slots = self.slots.lock();
        input.check_layout(&slots.input_info)?;
        if let Some(output) = output {
            output.check_layout(&slots.output_info)?;
        }
        slots.ensure_idle()?;

        let timeout = slots.timeout;
        let id = self.submit(&mut slots, input)?;
        match self.wait(&mut slots, id, timeout) {
            Some(result) => {
                self.settle(&mut slots);
                result
            }
            None => Err(Error::TimedOut(timeout)),
        }
    }

    /// Reconfigures the input to `info`, invokes, and restores the previous
    /// input descriptor if the invocation fails.
    ///
    /// The handle stays locked or `Running` from reconfiguration to
    /// settlement, so another caller cannot reconfigure in between. After a
    /// timeout the restore is left to the worker and the caller returns at
    /// once.
    pub(crate) fn invoke_dynamic(
        &self,
        input: &TensorsData,
        info: &TensorsInfo,
    ) -> Result<(TensorsData, TensorsInfo)> {
        info.validate()?;
        input.check_layout(info)?;
        let mut slots = self.slots.lock();
        slots.ensure_idle()?;

        let previous = slots.input_info.clone();
        let output_info = self.reconfigure(&mut slots, info)?;
        let timeout = slots.timeout;
        let id = match self.submit(&mut slots, input) {
            Ok(id) => id,
            Err(e) => {
                self.restore(&mut slots, &previous);
                return Err(e);
            }
        };

        match self.wait(&mut slots, id, timeout) {
            Some(Ok(output)) => {
                self.settle(&mut slots);
                Ok((output, output_info))
            }
            Some(Err(e)) => {
                self.restore(&mut slots, &previous);
                self.settle(&mut slots);
                Err(e)
            }
            None => {
                slots.restore_input = Some(previous);
                Err(Error::TimedOut(timeout))
            }
        }
    }

    fn submit(&self, slots: &mut Slots, input: &TensorsData) -> Result<u64> {
        let job_input = input.try_clone()?;
        let id = slots.next_id;
        slots.next_id += 1;
        slots.completed = None;
        slots.job = Some(Job {
            id,
            input: job_input,
        });
        slots.invoking = true;
        slots.state = EngineState::Running;
        self.cond.notify_all();
        trace!(name = %self.name, id, "invocation submitted");
        Ok(id)
    }

    /// Waits for job `id`. Returns `None` when the deadline passed first; the
    /// job is then abandoned and the worker settles the handle.
    fn wait(
        &self,
        slots: &mut MutexGuard<'_, Slots>,
        id: u64,
        timeout: Duration,
    ) -> Option<Result<TensorsData>> {
        // A deadline past what `Instant` can represent is no deadline.
        let deadline = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        loop {
            if slots.is_completed(id) {
                if let Some(done) = slots.completed.take() {
                    return Some(done.result);
                }
            }
            match deadline {
                None => self.cond.wait(slots),
                Some(deadline) => {
                    let timed_out = self.cond.wait_until(slots, deadline).timed_out();
                    if timed_out && !slots.is_completed(id) {
                        slots.abandoned = Some(id);
                        warn!(name = %self.name, id, ?timeout, "invocation timed out");
                        return None;
                    }
                }
            }
        }
    }

    /// Returns a handle whose result was collected to `Idle`.
    fn settle(&self, slots: &mut Slots) {
        if slots.state == EngineState::Running {
            slots.state = EngineState::Idle;
        }
        self.cond.notify_all();
    }

    /// Moves to `JoinRequested` and waits until no invocation is in flight
    /// and its caller has collected the result.
    pub(crate) fn request_join(&self) {
        let mut slots = self.slots.lock();
        slots.state = EngineState::JoinRequested;
        self.cond.notify_all();
        while slots.invoking || slots.completed.is_some() {
            self.cond.wait(&mut slots);
        }
    }

    /// Releases leftover outputs and unloads the backend. Call after the
    /// worker has been joined.
    pub(crate) fn unload(&self) {
        let (deferred, completed) = {
            let mut slots = self.slots.lock();
            slots.restore_input = None;
            (std::mem::take(&mut slots.deferred), slots.completed.take())
        };
        if !deferred.is_empty() {
            debug!(name = %self.name, count = deferred.len(), "releasing deferred outputs");
        }
        drop(deferred);
        drop(completed);

        let backend = self.backend.lock().take();
        if backend.is_some() {
            drop(backend);
            debug!(name = %self.name, "backend unloaded");
        }
    }

    /// Worker loop. Returns once `JoinRequested` is observed with no job
    /// pending.
    pub(crate) fn run(&self) {
        debug!(name = %self.name, "worker started");
        let mut slots = self.slots.lock();
        loop {
            let Some(job) = slots.job.take() else {
                if slots.state == EngineState::JoinRequested {
                    break;
                }
                self.cond.wait(&mut slots);
                continue;
            };

            let id = job.id;
            let output_info = slots.output_info.clone();
            let result = MutexGuard::unlocked(&mut slots, || {
                let result = self.run_backend(&job.input, &output_info);
                drop(job);
                result
            });

            slots.invoking = false;
            if slots.abandoned == Some(id) {
                slots.abandoned = None;
                let restore = slots.restore_input.take();
                if slots.state == EngineState::Running {
                    if let Some(previous) = restore {
                        self.restore(&mut slots, &previous);
                    }
                    slots.state = EngineState::Idle;
                }
                match result {
                    Ok(output) => {
                        debug!(name = %self.name, id, "late output queued for release");
                        slots.deferred.push(output);
                    }
                    Err(e) => {
                        debug!(name = %self.name, id, error = %e, "abandoned invocation failed");
                    }
                }
            } else {
                if let Err(e) = &result {
                    warn!(name = %self.name, id, error = %e, "invocation failed");
                }
                slots.completed = Some(Completion { id, result });
            }
            trace!(name = %self.name, id, state = ?slots.state, "invocation finished");
            self.cond.notify_all();

            let orphans = std::mem::take(&mut slots.deferred);
            if !orphans.is_empty() {
                MutexGuard::unlocked(&mut slots, || drop(orphans));
            }
        }
        drop(slots);
        debug!(name = %self.name, "worker exiting");
    }

    fn run_backend(&self, input: &TensorsData, output_info: &TensorsInfo) -> Result<TensorsData> {
        let mut guard = self.backend.lock();
        let backend = guard
            .as_deref_mut()
            .ok_or_else(|| Error::StreamError(format!("{}: backend is unloaded", self.name)))?;

        let mut output = if backend.allocates_output() {
            let mut output = TensorsData::unallocated(output_info)?;
            if let Some(release) = backend.output_release() {
                output.set_ownership(Ownership::Backend(release));
            }
            output
        } else {
            TensorsData::allocate(output_info)?
        };

        match panic::catch_unwind(AssertUnwindSafe(|| backend.invoke(input, &mut output))) {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::StreamError(format!("{}: backend panicked", self.name)));
            }
        }

        output.check_layout(output_info).map_err(|e| {
            Error::StreamError(format!("{}: output does not match descriptor: {e}", self.name))
        })?;
        Ok(output)
    }
}
