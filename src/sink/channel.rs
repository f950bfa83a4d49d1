//! Tokio mpsc channel sink implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::sink::AudioSink;
use crate::AudioFrame;

/// A sink that forwards processed frames to a tokio mpsc channel.
///
/// Frames are sent with `try_send` so the capture thread never waits on a
/// slow consumer. When the channel is full the frame is dropped and counted.
///
/// # Example
///
/// ```
/// use audio_device_engine::{AudioFrame, ChannelSink};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<AudioFrame>(100);
/// let sink = ChannelSink::new(tx);
///
/// // Register with an AudioSource, then receive frames:
/// // while let Some(frame) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<AudioFrame>,
    dropped: AtomicU64,
    overflowing: AtomicBool,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// A frame is 10ms of audio, so a capacity of 100 buffers one second.
    pub fn new(sender: mpsc::Sender<AudioFrame>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<AudioFrame>) -> Self {
        Self {
            name: name.into(),
            sender,
            dropped: AtomicU64::new(0),
            overflowing: AtomicBool::new(false),
        }
    }

    /// Number of frames dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AudioSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_data(&self, frame: &AudioFrame) {
        match self.sender.try_send(frame.clone()) {
            Ok(()) => {
                if self.overflowing.swap(false, Ordering::Relaxed) {
                    tracing::debug!(sink = %self.name, "Channel sink recovered");
                }
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.overflowing.swap(true, Ordering::Relaxed) {
                    tracing::warn!(sink = %self.name, dropped, "Channel full, dropping frames");
                }
            }
            Err(TrySendError::Closed(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed);
                if dropped == 0 {
                    tracing::debug!(sink = %self.name, "Channel closed, dropping frames");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(samples: Vec<i16>) -> AudioFrame {
        AudioFrame::new(samples, Duration::ZERO, 48000, 1)
    }

    #[tokio::test]
    async fn test_channel_sink_sends_frames() {
        let (tx, mut rx) = mpsc::channel::<AudioFrame>(10);
        let sink = ChannelSink::new(tx);

        sink.on_data(&frame(vec![1, 2, 3]));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (tx, _rx) = mpsc::channel::<AudioFrame>(1);
        let sink = ChannelSink::new(tx);

        sink.on_data(&frame(vec![1]));
        sink.on_data(&frame(vec![2]));
        sink.on_data(&frame(vec![3]));

        assert_eq!(sink.dropped(), 2);
    }

    #[test]
    fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<AudioFrame>(10);
        let sink = ChannelSink::new(tx);
        drop(rx);

        sink.on_data(&frame(vec![1, 2, 3]));
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<AudioFrame>(10);
        let sink = ChannelSink::with_name("encoder", tx);
        assert_eq!(sink.name(), "encoder");
    }
}
