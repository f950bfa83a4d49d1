//! Audio source: processing and fan-out of captured frames.
//!
//! ```text
//! RawFrame ──► working AudioFrame ──► AudioProcessor ──► sink 1, sink 2, ...
//!                   └─► level meter (every 100ms) ──► level observer
//! ```

mod level;

use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;

use crate::format::rms_level;
use crate::processing::{AudioLevelCallback, AudioProcessor, PassthroughProcessor};
use crate::{AudioFrame, AudioOptions, AudioSink, RawFrame};
use level::LevelMeter;

struct LevelObserver {
    callback: AudioLevelCallback,
    meter: LevelMeter,
}

struct SourceState {
    sinks: RefCell<Vec<Weak<dyn AudioSink>>>,
    processor: RefCell<Box<dyn AudioProcessor>>,
    observer: RefCell<Option<LevelObserver>>,
    frame: RefCell<AudioFrame>,
    delivery: RefCell<Vec<Arc<dyn AudioSink>>>,
}

/// Receives raw capture frames, processes them, and fans them out to sinks.
///
/// Sinks are tracked weakly: the source never keeps a sink alive, and a
/// dropped sink silently stops receiving frames. Frames are delivered in
/// arrival order to every sink in registration order.
///
/// All state sits behind one recursive lock, so sinks and the level observer
/// may call back into the source (for example to remove themselves) from
/// within a delivery.
///
/// # Example
///
/// ```
/// use audio_device_engine::{AudioOptions, AudioSink, AudioSource, ChannelSink};
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// let source = AudioSource::new(AudioOptions::default());
/// let (tx, _rx) = mpsc::channel(100);
/// let sink: Arc<dyn AudioSink> = Arc::new(ChannelSink::new(tx));
///
/// source.add_sink(&sink);
/// assert_eq!(source.sink_count(), 1);
/// source.remove_sink(&sink);
/// assert_eq!(source.sink_count(), 0);
/// ```
pub struct AudioSource {
    options: AudioOptions,
    level_interval: Duration,
    state: ReentrantMutex<SourceState>,
}

impl AudioSource {
    /// Creates a source without processing and with a 100ms level interval.
    pub fn new(options: AudioOptions) -> Self {
        Self::with_processor(
            options,
            Box::new(PassthroughProcessor),
            Duration::from_millis(100),
        )
    }

    /// Creates a source with a processing stage.
    ///
    /// The processor receives `options` before the first frame.
    pub fn with_processor(
        options: AudioOptions,
        mut processor: Box<dyn AudioProcessor>,
        level_interval: Duration,
    ) -> Self {
        processor.apply_options(&options);
        Self {
            options,
            level_interval,
            state: ReentrantMutex::new(SourceState {
                sinks: RefCell::new(Vec::new()),
                processor: RefCell::new(processor),
                observer: RefCell::new(None),
                frame: RefCell::new(AudioFrame::default()),
                delivery: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Audio options the source was created with.
    pub fn options(&self) -> &AudioOptions {
        &self.options
    }

    /// Registers a sink. Adding the same sink twice has no effect.
    pub fn add_sink(&self, sink: &Arc<dyn AudioSink>) {
        let state = self.state.lock();
        let mut sinks = state.sinks.borrow_mut();
        if sinks.iter().any(|s| same_sink(s, sink)) {
            return;
        }
        tracing::debug!(sink = sink.name(), "Sink added");
        sinks.push(Arc::downgrade(sink));
    }

    /// Unregisters a sink. Removing an unknown sink has no effect.
    pub fn remove_sink(&self, sink: &Arc<dyn AudioSink>) {
        let state = self.state.lock();
        state.sinks.borrow_mut().retain(|s| !same_sink(s, sink));
    }

    /// Number of registered sinks that are still alive.
    pub fn sink_count(&self) -> usize {
        let state = self.state.lock();
        let count = state
            .sinks
            .borrow()
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count();
        count
    }

    /// Replaces the processing stage.
    pub fn set_processor(&self, mut processor: Box<dyn AudioProcessor>) {
        processor.apply_options(&self.options);
        let state = self.state.lock();
        *state.processor.borrow_mut() = processor;
    }

    /// Installs the level observer, replacing any previous one.
    ///
    /// The observer is called at most once per level interval with the RMS
    /// level of the captured frame, normalized to `[0.0, 1.0]`.
    pub fn register_audio_level_observer(&self, callback: AudioLevelCallback) {
        let state = self.state.lock();
        *state.observer.borrow_mut() = Some(LevelObserver {
            callback,
            meter: LevelMeter::new(self.level_interval, Instant::now()),
        });
    }

    /// Removes the level observer.
    pub fn unregister_audio_level_observer(&self) {
        let state = self.state.lock();
        state.observer.borrow_mut().take();
    }

    /// Processes one raw capture frame and delivers it to every sink.
    pub fn on_data(&self, raw: &RawFrame<'_>) {
        self.on_data_at(raw, Instant::now());
    }

    pub(crate) fn on_data_at(&self, raw: &RawFrame<'_>, now: Instant) {
        let state = self.state.lock();

        // Reuse the working frame's allocation. A nested delivery from a sink
        // gets a fresh frame.
        let mut frame = std::mem::take(&mut *state.frame.borrow_mut());
        frame.update_from_raw(raw);

        let level_callback = state
            .observer
            .borrow_mut()
            .as_mut()
            .and_then(|observer| {
                observer
                    .meter
                    .due(now)
                    .then(|| Arc::clone(&observer.callback))
            });
        if let Some(callback) = level_callback {
            callback(rms_level(&frame.samples));
        }

        if let Err(e) = state.processor.borrow_mut().process(&mut frame) {
            tracing::warn!(error = %e, "Audio processing failed, delivering unprocessed frame");
        }

        let mut delivery = std::mem::take(&mut *state.delivery.borrow_mut());
        {
            let mut sinks = state.sinks.borrow_mut();
            sinks.retain(|s| s.strong_count() > 0);
            delivery.extend(sinks.iter().filter_map(Weak::upgrade));
        }
        for sink in &delivery {
            sink.on_data(&frame);
        }
        delivery.clear();

        *state.delivery.borrow_mut() = delivery;
        *state.frame.borrow_mut() = frame;
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("options", &self.options)
            .field("sinks", &self.sink_count())
            .finish_non_exhaustive()
    }
}

fn same_sink(registered: &Weak<dyn AudioSink>, sink: &Arc<dyn AudioSink>) -> bool {
    std::ptr::addr_eq(registered.as_ptr(), Arc::as_ptr(sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessingError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSink {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, Vec<i16>)>>>,
    }

    impl AudioSink for RecordingSink {
        fn name(&self) -> &str {
            self.name
        }

        fn on_data(&self, frame: &AudioFrame) {
            self.log.lock().push((self.name, frame.samples.clone()));
        }
    }

    struct Doubler;

    impl AudioProcessor for Doubler {
        fn process(&mut self, frame: &mut AudioFrame) -> Result<(), ProcessingError> {
            for s in &mut frame.samples {
                *s = s.saturating_mul(2);
            }
            Ok(())
        }
    }

    struct HalfFailing;

    impl AudioProcessor for HalfFailing {
        fn process(&mut self, frame: &mut AudioFrame) -> Result<(), ProcessingError> {
            frame.samples[0] = 99;
            Err(ProcessingError::Status(-1))
        }
    }

    fn bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn raw(data: &[u8]) -> RawFrame<'_> {
        RawFrame {
            data,
            bits_per_sample: 16,
            sample_rate: 48000,
            channels: 1,
            frames: data.len() / 2,
            timestamp: Duration::ZERO,
        }
    }

    fn recording(
        name: &'static str,
        log: &Arc<Mutex<Vec<(&'static str, Vec<i16>)>>>,
    ) -> Arc<dyn AudioSink> {
        Arc::new(RecordingSink {
            name,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let source = AudioSource::new(AudioOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        let b = recording("b", &log);
        let c = recording("c", &log);
        source.add_sink(&a);
        source.add_sink(&b);
        source.add_sink(&c);

        let data = bytes(&[1, 2, 3]);
        source.on_data(&raw(&data));

        let log = log.lock();
        let names: Vec<_> = log.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(log.iter().all(|(_, s)| s == &vec![1, 2, 3]));
    }

    #[test]
    fn test_duplicate_add_delivers_once() {
        let source = AudioSource::new(AudioOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        source.add_sink(&a);
        source.add_sink(&a);

        let data = bytes(&[1]);
        source.on_data(&raw(&data));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_remove_absent_sink_is_noop() {
        let source = AudioSource::new(AudioOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        let b = recording("b", &log);
        source.add_sink(&a);
        source.remove_sink(&b);
        assert_eq!(source.sink_count(), 1);
    }

    #[test]
    fn test_dropped_sink_is_pruned() {
        let source = AudioSource::new(AudioOptions::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        source.add_sink(&a);
        drop(a);

        let data = bytes(&[1]);
        source.on_data(&raw(&data));
        assert!(log.lock().is_empty());
        assert_eq!(source.sink_count(), 0);
    }

    #[test]
    fn test_processing_applies_before_delivery() {
        let source = AudioSource::with_processor(
            AudioOptions::default(),
            Box::new(Doubler),
            Duration::from_millis(100),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        source.add_sink(&a);

        let data = bytes(&[1, -2]);
        source.on_data(&raw(&data));
        assert_eq!(log.lock()[0].1, vec![2, -4]);
    }

    #[test]
    fn test_processing_error_still_delivers() {
        let source = AudioSource::with_processor(
            AudioOptions::default(),
            Box::new(HalfFailing),
            Duration::from_millis(100),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recording("a", &log);
        source.add_sink(&a);

        let data = bytes(&[1, 2]);
        source.on_data(&raw(&data));
        assert_eq!(log.lock()[0].1, vec![99, 2]);
    }

    #[test]
    fn test_level_observer_rate_limited() {
        let source = AudioSource::new(AudioOptions::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = Arc::clone(&calls);
        source.register_audio_level_observer(Arc::new(move |level| {
            calls_clone.lock().push(level);
        }));

        let data = bytes(&[16384, -16384]);
        let start = Instant::now();
        for ms in [0u64, 50, 99, 101, 150, 200, 202] {
            source.on_data_at(&raw(&data), start + Duration::from_millis(ms));
        }

        let calls = calls.lock();
        assert_eq!(calls.len(), 2);
        assert!((calls[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_level_observer_last_wins_and_unregister() {
        let source = AudioSource::new(AudioOptions::default());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);
        source.register_audio_level_observer(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        source.register_audio_level_observer(Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        let data = bytes(&[100]);
        let later = Instant::now() + Duration::from_secs(1);
        source.on_data_at(&raw(&data), later);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        source.unregister_audio_level_observer();
        source.on_data_at(&raw(&data), later + Duration::from_secs(1));
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    struct SelfRemovingSink {
        source: Arc<AudioSource>,
        me: Mutex<Option<Arc<dyn AudioSink>>>,
        calls: AtomicUsize,
    }

    impl AudioSink for SelfRemovingSink {
        fn on_data(&self, _frame: &AudioFrame) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = self.me.lock().take() {
                self.source.remove_sink(&me);
            }
        }
    }

    #[test]
    fn test_sink_can_remove_itself_during_delivery() {
        let source = Arc::new(AudioSource::new(AudioOptions::default()));
        let sink = Arc::new(SelfRemovingSink {
            source: Arc::clone(&source),
            me: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        let dyn_sink: Arc<dyn AudioSink> = sink.clone();
        *sink.me.lock() = Some(Arc::clone(&dyn_sink));
        source.add_sink(&dyn_sink);

        let data = bytes(&[1]);
        source.on_data(&raw(&data));
        source.on_data(&raw(&data));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.sink_count(), 0);
    }
}
