//! One period of the playout refill cycle.

use super::pool::{slots_in, BufferPool};
use super::pull::PlayoutSource;
use crate::backend::PlayoutDevice;
use crate::BackendError;

/// Outcome of one [`PlayoutScheduler::process`] call.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct CycleReport {
    /// Buffers queued on the source after the cycle.
    pub queued: usize,
    /// Buffers filled during this cycle.
    pub fresh: usize,
    /// The pull buffer had no full chunk.
    pub underrun: bool,
    /// Playback was (re)started.
    pub started: bool,
    /// Error reported by the device at the end of the cycle.
    pub error: Option<BackendError>,
}

/// Keeps the device's streaming source topped up from a [`PlayoutSource`].
///
/// Runs on the playout thread once per chunk period:
///
/// 1. Reclaim buffers the device finished playing, or release all of them if
///    the source stopped.
/// 2. Refill up to the low-water mark, one chunk per free slot, stopping at
///    the first unavailable chunk.
/// 3. Restart playback if the source is not consuming.
/// 4. Poll the device error state.
#[derive(Debug)]
pub(crate) struct PlayoutScheduler {
    pool: BufferPool,
    low_water: usize,
    part: usize,
    channels: u16,
    scratch: Vec<i16>,
}

impl PlayoutScheduler {
    pub(crate) fn new(pool_size: usize, low_water: usize, part: usize, channels: u16) -> Self {
        let pool = BufferPool::new(pool_size);
        let low_water = low_water.min(pool.size());
        Self {
            pool,
            low_water,
            part,
            channels: channels.max(1),
            scratch: vec![0; part * channels.max(1) as usize],
        }
    }

    pub(crate) fn pool_size(&self) -> usize {
        self.pool.size()
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.pool.queued_count()
    }

    /// Frees every slot. The device must have been stopped or dropped.
    pub(crate) fn reset(&mut self) {
        self.pool.release_all();
    }

    /// Runs one refill cycle.
    pub(crate) fn process(
        &mut self,
        device: &mut dyn PlayoutDevice,
        mut source: Option<&mut (dyn PlayoutSource + 'static)>,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        let was_playing = device.is_playing();
        if was_playing {
            while let Some(slot) = device.unqueue_processed() {
                self.pool.release(slot);
            }
        } else {
            device.unqueue_all();
            self.pool.release_all();
        }

        let chunk_samples = self.part * self.channels as usize;
        self.scratch.resize(chunk_samples, 0);
        let were_queued = self.pool.mask();

        while self.pool.queued_count() < self.low_water {
            let available = source
                .as_deref_mut()
                .map_or(0, |s| s.request_playout_data(self.part));
            if available < self.part {
                self.scratch.fill(0);
                report.underrun = true;
                break;
            }
            if let Some(s) = source.as_deref_mut() {
                let copied = s.get_playout_data(&mut self.scratch);
                self.scratch[copied.min(chunk_samples)..].fill(0);
            }

            let Some(slot) = self.pool.acquire() else {
                break;
            };
            device.buffer_data(slot, &self.scratch);
            report.fresh += 1;
            if was_playing {
                device.queue(&[slot]);
            }
        }

        report.queued = self.pool.queued_count();
        if report.queued == 0 {
            report.error = device.take_error();
            return report;
        }

        if !device.is_playing() {
            if was_playing {
                // The source ran dry while refilling. Old buffers cannot be
                // told apart from fresh ones on the source, so detach all and
                // queue only what was filled this cycle.
                device.unqueue_all();
                let fresh = self.pool.mask() & !were_queued;
                self.pool.retain(fresh);
                device.queue(&slots_in(fresh));
            } else {
                device.queue(&self.pool.queued_slots());
            }
            device.play();
            report.started = true;
            report.queued = self.pool.queued_count();
        }

        report.error = device.take_error();
        report
    }

    /// Changes the channel count of subsequent chunks.
    pub(crate) fn set_channels(&mut self, channels: u16) {
        self.channels = channels.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AudioBackend, StreamFormat};
    use crate::playout::pull::playout_buffer;
    use crate::{DeviceId, MockBackend};
    use std::time::Duration;

    const PART: usize = 480;

    fn open(backend: &MockBackend) -> Box<dyn PlayoutDevice> {
        let format = StreamFormat {
            sample_rate: 48000,
            channels: 2,
        };
        backend
            .open_playout(&DeviceId::default_device(), format, 7)
            .unwrap()
    }

    fn scheduler() -> PlayoutScheduler {
        PlayoutScheduler::new(7, 5, PART, 2)
    }

    #[test]
    fn test_empty_source_is_idle() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (_producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 2);

        let report = scheduler().process(device.as_mut(), Some(&mut source));
        assert!(report.underrun);
        assert_eq!(report.queued, 0);
        assert!(!report.started);
        assert_eq!(backend.playout_snapshot().play_calls, 0);
    }

    #[test]
    fn test_starts_once_data_arrives_after_silence() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 2);
        let mut scheduler = scheduler();

        for _ in 0..6 {
            let report = scheduler.process(device.as_mut(), Some(&mut source));
            assert!(report.error.is_none());
            assert_eq!(report.queued, 0);
            assert!(!report.started);
        }
        assert_eq!(backend.playout_snapshot().play_calls, 0);

        producer.push(&[5i16; PART * 2 * 10]);
        let mut started = false;
        let mut queued = 0;
        for _ in 0..5 {
            let report = scheduler.process(device.as_mut(), Some(&mut source));
            assert!(report.error.is_none());
            started |= report.started;
            queued = report.queued;
            if queued == 5 && started {
                break;
            }
        }
        assert_eq!(queued, 5);
        assert!(started);
        assert!(backend.playout_snapshot().playing);
    }

    #[test]
    fn test_no_source_is_idle() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let report = scheduler().process(device.as_mut(), None);
        assert!(report.underrun);
        assert_eq!(report.queued, 0);
    }

    #[test]
    fn test_fills_to_low_water_and_starts() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 2);
        producer.push(&[3i16; PART * 2 * 10]);

        let mut scheduler = scheduler();
        let report = scheduler.process(device.as_mut(), Some(&mut source));
        assert_eq!(report.queued, 5);
        assert_eq!(report.fresh, 5);
        assert!(report.started);
        assert!(!report.underrun);

        let snapshot = backend.playout_snapshot();
        assert!(snapshot.playing);
        assert_eq!(snapshot.attached, 5);
    }

    #[test]
    fn test_reclaims_played_buffers() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 2);
        producer.push(&[1i16; PART * 2 * 10]);

        let mut scheduler = scheduler();
        scheduler.process(device.as_mut(), Some(&mut source));
        backend.consume_playout(2);

        let report = scheduler.process(device.as_mut(), Some(&mut source));
        assert_eq!(report.fresh, 2);
        assert_eq!(report.queued, 5);
        assert!(!report.started);
        assert_eq!(backend.playout_snapshot().attached, 5);
    }

    #[test]
    fn test_stopped_source_releases_everything() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 2);
        producer.push(&[1i16; PART * 2 * 5]);

        let mut scheduler = scheduler();
        scheduler.process(device.as_mut(), Some(&mut source));
        // Starve the source.
        backend.consume_playout(5);
        assert!(!backend.playout_snapshot().playing);

        let report = scheduler.process(device.as_mut(), Some(&mut source));
        assert_eq!(report.queued, 0);
        assert!(report.underrun);
        assert_eq!(backend.playout_snapshot().attached, 0);
    }

    #[test]
    fn test_queued_never_exceeds_pool() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_secs(1), 48000, 2);
        producer.push(&[1i16; PART * 2 * 50]);

        let mut scheduler = PlayoutScheduler::new(7, 9, PART, 2);
        for _ in 0..10 {
            let report = scheduler.process(device.as_mut(), Some(&mut source));
            assert!(report.queued <= 7);
            backend.consume_playout(1);
        }
    }

    #[test]
    fn test_reports_device_error() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 2);
        producer.push(&[1i16; PART * 2 * 5]);
        backend.inject_playout_error(BackendError::device_lost("Mock Speakers", "gone"));

        let report = scheduler().process(device.as_mut(), Some(&mut source));
        assert!(matches!(report.error, Some(BackendError::DeviceLost { .. })));
    }

    #[test]
    fn test_mono_chunks_are_half_size() {
        let backend = MockBackend::new();
        let mut device = open(&backend);
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(200), 48000, 1);
        producer.push(&[1i16; PART * 5]);

        let mut scheduler = scheduler();
        scheduler.set_channels(1);
        scheduler.process(device.as_mut(), Some(&mut source));
        backend.consume_playout(1);

        assert_eq!(backend.played_buffers()[0].len(), PART);
    }
}
