//! Recording thread that drives every registered capture engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::CaptureEngine;
use crate::pipeline::{EngineThread, Worker};
use crate::{EngineError, EngineEvent};

const THREAD_NAME: &str = "audio-recording";

type Registry = Arc<Mutex<Vec<Arc<CaptureEngine>>>>;

/// Polls capture engines on a fixed-delay cadence.
///
/// Each cycle drains every engine: `process_recorded_part` is called with
/// `first_in_cycle = true`, then again with `false` while it keeps
/// delivering chunks. The thread is spawned lazily by
/// [`start`](Self::start) and joined by [`stop`](Self::stop).
pub struct CapturePoller {
    period: Duration,
    engines: Registry,
    thread: Mutex<Option<EngineThread<RecordingWorker>>>,
}

impl CapturePoller {
    /// Creates a stopped poller ticking every `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            engines: Arc::new(Mutex::new(Vec::new())),
            thread: Mutex::new(None),
        }
    }

    /// Adds an engine to the polling set. Registering twice is a no-op.
    pub fn register(&self, engine: Arc<CaptureEngine>) {
        let mut engines = self.engines.lock();
        if !engines.iter().any(|e| Arc::ptr_eq(e, &engine)) {
            engines.push(engine);
        }
    }

    /// Removes an engine from the polling set, returning whether it was there.
    pub fn unregister(&self, engine: &Arc<CaptureEngine>) -> bool {
        let mut engines = self.engines.lock();
        let before = engines.len();
        engines.retain(|e| !Arc::ptr_eq(e, engine));
        engines.len() != before
    }

    /// Number of registered engines.
    pub fn engine_count(&self) -> usize {
        self.engines.lock().len()
    }

    /// Spawns the recording thread and starts the timer. Idempotent.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        let engines = Arc::clone(&self.engines);
        let spawned = EngineThread::spawn(THREAD_NAME, move || RecordingWorker { engines })?;
        spawned.start_timer(self.period)?;
        *thread = Some(spawned);
        tracing::info!(period_ms = self.period.as_millis() as u64, "Recording thread started");
        Ok(())
    }

    /// Stops every registered engine and joins the recording thread.
    ///
    /// Engines stay registered. Idempotent. Called from a sink or event
    /// callback on the recording thread, the engines stop at once and the
    /// thread exits after the current cycle.
    pub fn stop(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if let Err(e) = thread.stop_timer() {
            tracing::warn!(error = %e, "Recording thread gone before timer stop");
        }
        if thread.is_current() {
            let engines = self.engines.lock().clone();
            stop_all(&engines);
        } else {
            let stopped = thread.invoke(|worker: &mut RecordingWorker| {
                stop_all(&worker.snapshot());
            });
            if let Err(e) = stopped {
                tracing::warn!(error = %e, "Recording thread gone before stop");
            }
        }
        thread.shutdown();
        tracing::info!("Recording thread stopped");
    }

    /// Returns `true` while the recording thread runs.
    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }
}

impl Drop for CapturePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CapturePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePoller")
            .field("period", &self.period)
            .field("engines", &self.engine_count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn stop_all(engines: &[Arc<CaptureEngine>]) {
    for engine in engines {
        engine.stop_capture();
    }
}

struct RecordingWorker {
    engines: Registry,
}

impl RecordingWorker {
    // Engines are polled outside the registry lock so sinks may dispose of
    // sources from their callbacks.
    fn snapshot(&self) -> Vec<Arc<CaptureEngine>> {
        self.engines.lock().clone()
    }
}

// Capture engines emit their own events once their state lock is released.
impl Worker for RecordingWorker {
    fn on_tick(&mut self) -> Vec<EngineEvent> {
        for engine in self.snapshot() {
            let mut first = true;
            while engine.process_recorded_part(first) {
                first = false;
            }
        }
        Vec::new()
    }
}
