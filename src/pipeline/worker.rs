//! Owned engine thread with a task queue and a fixed-delay timer.
//!
//! ```text
//! caller ──post/invoke──► command channel ──► [engine thread] worker
//!                                              ▲
//!                               interval tick ─┘
//! ```
//!
//! The worker is created on the engine thread and never leaves it, so it may
//! own thread-affine native handles. Everything else reaches it through
//! posted tasks.
//!
//! Event callbacks run on the engine thread. They may call straight back into
//! the engine: `invoke` from the engine thread runs the task inline, and a
//! shutdown requested there detaches instead of joining.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::event::EventEmitter;
use crate::{EngineError, EngineEvent};

thread_local! {
    // The worker owned by the engine thread this code runs on, if any.
    static CURRENT_WORKER: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// State living on an engine thread.
pub(crate) trait Worker: 'static {
    /// Runs one timer period and returns the events it produced.
    ///
    /// The events are emitted after the worker is released, so a callback
    /// may invoke tasks on this same worker.
    fn on_tick(&mut self) -> Vec<EngineEvent>;

    /// Destination of the events returned by [`on_tick`](Self::on_tick).
    fn emitter(&self) -> EventEmitter {
        EventEmitter::default()
    }
}

type Task<W> = Box<dyn FnOnce(&mut W) + Send>;

enum Command<W> {
    Run(Task<W>),
    StartTimer(Duration),
    StopTimer,
}

/// Handle to a dedicated thread that owns a [`Worker`].
///
/// Dropping the handle closes the task queue and joins the thread. Tasks that
/// were already posted still run, then the worker is dropped on its own
/// thread.
pub(crate) struct EngineThread<W: Worker> {
    name: &'static str,
    thread_id: ThreadId,
    commands: Option<mpsc::UnboundedSender<Command<W>>>,
    handle: Option<JoinHandle<()>>,
}

impl<W: Worker> EngineThread<W> {
    /// Spawns the thread and builds the worker on it with `init`.
    pub(crate) fn spawn<F>(name: &'static str, init: F) -> Result<Self, EngineError>
    where
        F: FnOnce() -> W + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let worker = Rc::new(RefCell::new(init()));
                CURRENT_WORKER.with(|slot| {
                    *slot.borrow_mut() = Some(Rc::clone(&worker) as Rc<dyn Any>);
                });
                runtime.block_on(run(&worker, rx));
                CURRENT_WORKER.with(|slot| slot.borrow_mut().take());
                drop(worker);
                tracing::debug!(thread = name, "Engine thread exited");
            })
            .map_err(|source| EngineError::ThreadSpawn { name, source })?;

        Ok(Self {
            name,
            thread_id: handle.thread().id(),
            commands: Some(tx),
            handle: Some(handle),
        })
    }

    fn send(&self, command: Command<W>) -> Result<(), EngineError> {
        self.commands
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or(EngineError::ThreadGone { name: self.name })
    }

    /// Queues a task without waiting for it.
    pub(crate) fn post<F>(&self, task: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut W) + Send + 'static,
    {
        self.send(Command::Run(Box::new(task)))
    }

    /// Id of the engine thread.
    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Returns `true` when called from the engine thread itself.
    pub(crate) fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Runs a task on the engine thread and waits for its result.
    ///
    /// Called from the engine thread, the task runs inline. That fails with
    /// [`EngineError::ThreadBusy`] if the worker is already borrowed by the
    /// task or tick that led here.
    pub(crate) fn invoke<R, F>(&self, task: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut W) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return self.invoke_inline(task);
        }
        let (reply_tx, reply_rx) = std::sync::mpsc::sync_channel(1);
        self.post(move |worker| {
            let _ = reply_tx.send(task(worker));
        })?;
        reply_rx
            .recv()
            .map_err(|_| EngineError::ThreadGone { name: self.name })
    }

    fn invoke_inline<R, F>(&self, task: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut W) -> R,
    {
        let worker = CURRENT_WORKER
            .with(|slot| slot.borrow().clone())
            .and_then(|worker| worker.downcast::<RefCell<W>>().ok())
            .ok_or(EngineError::ThreadGone { name: self.name })?;
        let mut worker = worker
            .try_borrow_mut()
            .map_err(|_| EngineError::ThreadBusy { name: self.name })?;
        Ok(task(&mut *worker))
    }

    /// Starts (or restarts) the repeating timer.
    ///
    /// Ticks are spaced at least `period` apart; a late tick delays the
    /// following ones instead of bursting.
    pub(crate) fn start_timer(&self, period: Duration) -> Result<(), EngineError> {
        self.send(Command::StartTimer(period))
    }

    /// Cancels the repeating timer. Posted tasks keep running.
    pub(crate) fn stop_timer(&self) -> Result<(), EngineError> {
        self.send(Command::StopTimer)
    }

    /// Closes the task queue and waits for the thread to exit.
    ///
    /// From the engine thread itself the thread is detached instead; it
    /// exits once the current task or tick returns.
    pub(crate) fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if self.is_current() {
                tracing::debug!(thread = self.name, "Engine thread detached from itself");
                return;
            }
            if handle.join().is_err() {
                tracing::error!(thread = self.name, "Engine thread panicked");
            }
        }
    }
}

impl<W: Worker> Drop for EngineThread<W> {
    fn drop(&mut self) {
        self.join();
    }
}

impl<W: Worker> std::fmt::Debug for EngineThread<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineThread")
            .field("name", &self.name)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

async fn run<W: Worker>(worker: &RefCell<W>, mut commands: mpsc::UnboundedReceiver<Command<W>>) {
    let mut timer: Option<Interval> = None;
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Run(task)) => task(&mut *worker.borrow_mut()),
                Some(Command::StartTimer(period)) => {
                    let mut interval = time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    timer = Some(interval);
                }
                Some(Command::StopTimer) => timer = None,
                None => break,
            },
            () = next_tick(&mut timer) => {
                let (events, emitter) = {
                    let mut worker = worker.borrow_mut();
                    (worker.on_tick(), worker.emitter())
                };
                for event in events {
                    emitter.emit(event);
                }
            }
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_callback;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock};

    use parking_lot::Mutex;

    struct Counter {
        ticks: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
        value: u32,
    }

    impl Worker for Counter {
        fn on_tick(&mut self) -> Vec<EngineEvent> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
    }

    impl Drop for Counter {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn spawn_counter() -> (EngineThread<Counter>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let (t, d) = (ticks.clone(), dropped.clone());
        let thread = EngineThread::spawn("test-engine", move || Counter {
            ticks: t,
            dropped: d,
            value: 0,
        })
        .unwrap();
        (thread, ticks, dropped)
    }

    #[test]
    fn test_invoke_returns_result() {
        let (thread, _, _) = spawn_counter();
        thread.post(|w| w.value = 41).unwrap();
        let value = thread
            .invoke(|w| {
                w.value += 1;
                w.value
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_invoke_runs_on_engine_thread() {
        let (thread, _, _) = spawn_counter();
        let name = thread
            .invoke(|_| std::thread::current().name().map(ToString::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-engine"));
    }

    #[test]
    fn test_timer_ticks_until_stopped() {
        let (thread, ticks, _) = spawn_counter();
        thread.start_timer(Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        thread.stop_timer().unwrap();
        // Synchronize with the thread so the stop has been applied.
        thread.invoke(|_| ()).unwrap();

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "only {after_stop} ticks");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_no_ticks_without_timer() {
        let (thread, ticks, _) = spawn_counter();
        std::thread::sleep(Duration::from_millis(30));
        thread.invoke(|_| ()).unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_drops_worker() {
        let (thread, _, dropped) = spawn_counter();
        thread.start_timer(Duration::from_millis(5)).unwrap();
        thread.shutdown();
        assert!(dropped.load(Ordering::SeqCst));
    }

    struct Echo {
        emitter: EventEmitter,
        value: u32,
    }

    impl Worker for Echo {
        fn on_tick(&mut self) -> Vec<EngineEvent> {
            vec![EngineEvent::PlayoutUnderrun { queued: 0 }]
        }

        fn emitter(&self) -> EventEmitter {
            self.emitter.clone()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_tick_callback_invokes_inline() {
        let cell: Arc<OnceLock<EngineThread<Echo>>> = Arc::new(OnceLock::new());
        let weak = Arc::downgrade(&cell);
        let values = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&values);

        let emitter = EventEmitter::new(Some(event_callback(move |_| {
            let Some(cell) = weak.upgrade() else {
                return;
            };
            if let Some(thread) = cell.get() {
                let value = thread.invoke(|w: &mut Echo| {
                    w.value += 1;
                    w.value
                });
                seen.lock().push(value.ok());
            }
        })));
        let thread = EngineThread::spawn("test-echo", move || Echo { emitter, value: 0 }).unwrap();
        assert!(cell.set(thread).is_ok());
        cell.get().unwrap().start_timer(Duration::from_millis(5)).unwrap();

        assert!(wait_for(|| values.lock().len() >= 2));
        assert_eq!(values.lock()[..2], [Some(1), Some(2)]);
        cell.get().unwrap().stop_timer().unwrap();
    }

    #[test]
    fn test_invoke_inside_task_reports_busy() {
        let (thread, _, _) = spawn_counter();
        let cell = Arc::new(OnceLock::new());
        assert!(cell.set(thread).is_ok());
        let weak = Arc::downgrade(&cell);

        let nested = cell
            .get()
            .unwrap()
            .invoke(move |_| {
                weak.upgrade()
                    .and_then(|c| c.get().map(|t| t.invoke(|w: &mut Counter| w.value)))
            })
            .unwrap();
        assert!(matches!(nested, Some(Err(EngineError::ThreadBusy { .. }))));
    }

    #[test]
    fn test_shutdown_from_engine_thread_detaches() {
        let (thread, _, dropped) = spawn_counter();
        let slot = Arc::new(Mutex::new(Some(thread)));
        let owner = Arc::clone(&slot);

        let posted = slot.lock().as_ref().map(|t| {
            t.post(move |_| {
                if let Some(thread) = owner.lock().take() {
                    assert!(thread.is_current());
                    thread.shutdown();
                }
            })
        });
        assert!(matches!(posted, Some(Ok(()))));

        assert!(wait_for(|| dropped.load(Ordering::SeqCst)));
        assert!(slot.lock().is_none());
    }
}
