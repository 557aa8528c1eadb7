// MirrorToggleManager: background enable/disable of one engine context
//
// Single Responsibility: move the slow part of a toggle off the frame thread
//
// Enabling allocates an engine and loads every bank, which takes long
// enough to stall a frame. The worker only builds or tears down a detached
// engine; the frame thread snapshots the primary before the job and
// installs the result in poll(), so the instance mapping is only ever
// touched from the frame thread.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::context::{EngineContext, PreparedContext};
use crate::error::{log_mirror_error, MirrorError};
use crate::mirror::PrimaryView;
use crate::telemetry::{self, LifecyclePhase};

/// Mirroring state as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Job handed to the worker; the receiver half stays with the manager
enum ToggleJob {
    Enabling(oneshot::Receiver<Result<PreparedContext, MirrorError>>),
    Disabling(oneshot::Receiver<()>),
}

/// Runs enable/disable of an [`EngineContext`] on a worker thread
///
/// One job at a time. A second request while a job is pending fails with
/// [`MirrorError::ToggleInProgress`].
///
/// # Example
/// ```ignore
/// let toggle = MirrorToggleManager::new(context);
/// toggle.enable(audio.view())?;
/// // every frame:
/// toggle.poll(audio.view())?;
/// ```
pub struct MirrorToggleManager {
    context: Arc<EngineContext>,
    job: Mutex<Option<ToggleJob>>,
}

impl MirrorToggleManager {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            job: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Safely acquire lock on the pending job
    fn lock_job(&self) -> Result<MutexGuard<'_, Option<ToggleJob>>, MirrorError> {
        self.job.lock().map_err(|_| {
            log::error!("[ToggleManager] Job lock poisoned");
            MirrorError::LockPoisoned {
                component: "toggle_manager".to_string(),
            }
        })
    }

    pub fn state(&self) -> MirrorState {
        let pending = match self.lock_job() {
            Ok(job) => match job.as_ref() {
                Some(ToggleJob::Enabling(_)) => Some(MirrorState::Enabling),
                Some(ToggleJob::Disabling(_)) => Some(MirrorState::Disabling),
                None => None,
            },
            Err(_) => None,
        };
        pending.unwrap_or_else(|| self.idle_state())
    }

    fn idle_state(&self) -> MirrorState {
        if self.context.is_ready() {
            MirrorState::Enabled
        } else {
            MirrorState::Disabled
        }
    }

    /// Start enabling in the background. No-op when already enabled.
    pub fn enable(&self, primary: PrimaryView<'_>) -> Result<(), MirrorError> {
        let mut job = self.lock_job()?;
        if job.is_some() {
            return Err(MirrorError::ToggleInProgress);
        }
        if self.context.is_ready() {
            return Ok(());
        }

        let snapshot = primary.snapshot();
        telemetry::hub().record_lifecycle(self.context.name(), LifecyclePhase::Enabling);
        log::info!(
            "[ToggleManager] Enabling {} ({} banks, {} descriptions)",
            self.context.name(),
            snapshot.banks.len(),
            snapshot.descriptions.len()
        );

        let (tx, rx) = oneshot::channel();
        let context = Arc::clone(&self.context);
        self.spawn("enable", move || {
            // Nobody is waiting anymore; release the engine here.
            if let Err(Ok(prepared)) = tx.send(context.prepare(&snapshot)) {
                prepared.discard();
            }
        })?;
        *job = Some(ToggleJob::Enabling(rx));
        Ok(())
    }

    /// Start disabling. The context stops mirroring immediately; engine
    /// teardown finishes in the background.
    pub fn disable(&self) -> Result<(), MirrorError> {
        let mut job = self.lock_job()?;
        if job.is_some() {
            return Err(MirrorError::ToggleInProgress);
        }
        let Some(detached) = self.context.detach()? else {
            return Ok(());
        };

        log::info!("[ToggleManager] Disabling {}", self.context.name());
        let (tx, rx) = oneshot::channel();
        self.spawn("disable", move || {
            detached.shutdown();
            let _ = tx.send(());
        })?;
        *job = Some(ToggleJob::Disabling(rx));
        Ok(())
    }

    /// Enable when disabled, disable when enabled.
    pub fn toggle(&self, primary: PrimaryView<'_>) -> Result<MirrorState, MirrorError> {
        if self.context.is_ready() {
            self.disable()?;
        } else {
            self.enable(primary)?;
        }
        Ok(self.state())
    }

    fn spawn(&self, what: &str, work: impl FnOnce() + Send + 'static) -> Result<(), MirrorError> {
        thread::Builder::new()
            .name(format!("mirror-{}-{}", what, self.context.name()))
            .spawn(work)
            .map(|_| ())
            .map_err(|err| {
                let err = MirrorError::WorkerFailed {
                    reason: err.to_string(),
                };
                log_mirror_error(&err, "ToggleManager::spawn");
                err
            })
    }

    /// Frame-thread handshake: install a finished enable, acknowledge a
    /// finished disable. Never blocks.
    pub fn poll(&self, primary: PrimaryView<'_>) -> Result<MirrorState, MirrorError> {
        let mut job = self.lock_job()?;
        match job.take() {
            None => Ok(self.idle_state()),
            Some(ToggleJob::Enabling(mut rx)) => match rx.try_recv() {
                Ok(prepared) => {
                    drop(job);
                    self.finish_enable(prepared, primary)
                }
                Err(TryRecvError::Empty) => {
                    *job = Some(ToggleJob::Enabling(rx));
                    Ok(MirrorState::Enabling)
                }
                Err(TryRecvError::Closed) => Err(self.worker_gone()),
            },
            Some(ToggleJob::Disabling(mut rx)) => match rx.try_recv() {
                Ok(()) => Ok(self.idle_state()),
                Err(TryRecvError::Empty) => {
                    *job = Some(ToggleJob::Disabling(rx));
                    Ok(MirrorState::Disabling)
                }
                Err(TryRecvError::Closed) => Err(self.worker_gone()),
            },
        }
    }

    /// Block until the pending job finishes, then complete it like `poll`.
    pub fn wait(&self, primary: PrimaryView<'_>) -> Result<MirrorState, MirrorError> {
        let job = self.lock_job()?.take();
        match job {
            None => Ok(self.idle_state()),
            Some(ToggleJob::Enabling(rx)) => match rx.blocking_recv() {
                Ok(prepared) => self.finish_enable(prepared, primary),
                Err(_) => Err(self.worker_gone()),
            },
            Some(ToggleJob::Disabling(rx)) => match rx.blocking_recv() {
                Ok(()) => Ok(self.idle_state()),
                Err(_) => Err(self.worker_gone()),
            },
        }
    }

    fn finish_enable(
        &self,
        prepared: Result<PreparedContext, MirrorError>,
        primary: PrimaryView<'_>,
    ) -> Result<MirrorState, MirrorError> {
        // prepare() has already logged its own failure
        self.context.install(prepared?, primary)?;
        Ok(self.idle_state())
    }

    fn worker_gone(&self) -> MirrorError {
        let err = MirrorError::WorkerFailed {
            reason: format!("{} worker exited without replying", self.context.name()),
        };
        log_mirror_error(&err, "ToggleManager::poll");
        telemetry::hub().record_error(&err, self.context.name());
        err
    }

    /// Enable on the calling thread, for startup.
    pub fn enable_blocking(&self, primary: PrimaryView<'_>) -> Result<(), MirrorError> {
        if self.lock_job()?.is_some() {
            return Err(MirrorError::ToggleInProgress);
        }
        self.context.initialize(primary)
    }

    /// Disable on the calling thread, for shutdown. Waits for a pending job
    /// first.
    pub fn disable_blocking(&self, primary: PrimaryView<'_>) -> Result<(), MirrorError> {
        if let Err(err) = self.wait(primary) {
            log_mirror_error(&err, "ToggleManager::disable_blocking");
        }
        self.context.terminate()
    }
}
