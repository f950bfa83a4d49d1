//! Pull-side audio supply for the playout engine.

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Supplier of playout audio, polled once per chunk by the playout thread.
///
/// The engine first asks how much data is ready with
/// [`request_playout_data`](Self::request_playout_data), and only when a full
/// chunk is ready copies it out with
/// [`get_playout_data`](Self::get_playout_data). Both calls run on the
/// real-time playout thread and must not block.
pub trait PlayoutSource: Send {
    /// Informs the source of the format the engine will pull.
    fn set_playout_format(&mut self, _sample_rate: u32, _channels: u16) {}

    /// Called when playout starts.
    fn start_playout(&mut self) {}

    /// Called when playout stops.
    fn stop_playout(&mut self) {}

    /// Prepares up to `samples_per_channel` samples per channel and returns
    /// how many are ready.
    ///
    /// Returning less than requested means the chunk is unavailable.
    fn request_playout_data(&mut self, samples_per_channel: usize) -> usize;

    /// Copies the prepared interleaved samples into `out`, returning the
    /// number written.
    fn get_playout_data(&mut self, out: &mut [i16]) -> usize;
}

/// Write end of a [`RingPlayoutSource`].
///
/// Push interleaved samples in the engine's current playout format.
pub struct PlayoutProducer {
    producer: HeapProd<i16>,
}

impl PlayoutProducer {
    /// Pushes as many samples as fit, returning how many were accepted.
    ///
    /// Never blocks.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Number of samples that can be pushed without dropping.
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }
}

impl std::fmt::Debug for PlayoutProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayoutProducer")
            .field("vacant", &self.vacant())
            .finish()
    }
}

/// A [`PlayoutSource`] backed by a lock-free ring buffer.
///
/// Created together with its [`PlayoutProducer`] by [`playout_buffer`].
pub struct RingPlayoutSource {
    consumer: HeapCons<i16>,
    channels: u16,
    prepared: usize,
}

impl RingPlayoutSource {
    /// Interleaved samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.consumer.occupied_len()
    }
}

impl PlayoutSource for RingPlayoutSource {
    fn set_playout_format(&mut self, _sample_rate: u32, channels: u16) {
        self.channels = channels.max(1);
    }

    fn stop_playout(&mut self) {
        self.prepared = 0;
    }

    fn request_playout_data(&mut self, samples_per_channel: usize) -> usize {
        let available = self.consumer.occupied_len() / self.channels as usize;
        let ready = available.min(samples_per_channel);
        self.prepared = ready * self.channels as usize;
        ready
    }

    fn get_playout_data(&mut self, out: &mut [i16]) -> usize {
        let wanted = self.prepared.min(out.len());
        self.prepared = 0;
        self.consumer.pop_slice(&mut out[..wanted])
    }
}

impl std::fmt::Debug for RingPlayoutSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingPlayoutSource")
            .field("channels", &self.channels)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Creates a ring-backed pull buffer holding `capacity` of audio.
///
/// # Example
///
/// ```
/// use audio_device_engine::{playout_buffer, PlayoutSource};
/// use std::time::Duration;
///
/// let (mut producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 2);
/// producer.push(&[0i16; 960]);
/// assert_eq!(source.request_playout_data(480), 480);
/// ```
pub fn playout_buffer(
    capacity: Duration,
    sample_rate: u32,
    channels: u16,
) -> (PlayoutProducer, RingPlayoutSource) {
    let channels = channels.max(1);
    let samples =
        (sample_rate as f64 * capacity.as_secs_f64()) as usize * channels as usize;
    let (producer, consumer) = HeapRb::<i16>::new(samples.max(1)).split();
    (
        PlayoutProducer { producer },
        RingPlayoutSource {
            consumer,
            channels,
            prepared: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_chunk_is_unavailable() {
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 2);
        producer.push(&[1i16; 500]);
        assert_eq!(source.request_playout_data(480), 250);
    }

    #[test]
    fn test_full_chunk_is_copied() {
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 2);
        let samples: Vec<i16> = (0..1000).collect();
        producer.push(&samples);

        assert_eq!(source.request_playout_data(480), 480);
        let mut out = vec![0i16; 960];
        assert_eq!(source.get_playout_data(&mut out), 960);
        assert_eq!(out[..3], [0, 1, 2]);
        assert_eq!(source.buffered(), 40);
    }

    #[test]
    fn test_get_without_request_copies_nothing() {
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 1);
        producer.push(&[7i16; 480]);
        let mut out = vec![0i16; 480];
        assert_eq!(source.get_playout_data(&mut out), 0);
    }

    #[test]
    fn test_format_change_reinterprets_channels() {
        let (mut producer, mut source) = playout_buffer(Duration::from_millis(100), 48000, 2);
        producer.push(&[0i16; 480]);
        source.set_playout_format(48000, 1);
        assert_eq!(source.request_playout_data(480), 480);
    }

    #[test]
    fn test_producer_never_overfills() {
        let (mut producer, _source) = playout_buffer(Duration::from_millis(10), 48000, 1);
        assert_eq!(producer.push(&[0i16; 1000]), 480);
        assert_eq!(producer.vacant(), 0);
    }
}
