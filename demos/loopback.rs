//! Microphone loopback example.
//!
//! Captures the first input device and plays it back on the default output
//! device, printing the input level.
//!
//! Run with: RUST_LOG=audio_device_engine=debug cargo run --example loopback

use std::sync::Arc;
use std::time::Duration;

use audio_device_engine::format::level_to_percent;
use audio_device_engine::{
    playout_buffer, AudioDeviceModule, AudioSink, ChannelSink, CpalBackend,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let module = AudioDeviceModule::builder(Arc::new(CpalBackend::new()))
        .on_event(|e| tracing::warn!(?e, "device event"))
        .build();
    module.init()?;

    for index in 0..module.recording_devices() {
        println!("input  {index}: {}", module.recording_device_name(index)?.name);
    }
    for index in 0..module.playout_devices() {
        println!("output {index}: {}", module.playout_device_name(index)?.name);
    }

    // Playout side: stereo pull buffer with 200ms of headroom
    let (mut producer, source) = playout_buffer(Duration::from_millis(200), 48000, 2);
    let playout = module.playout();
    playout.register_playout_source(Some(Box::new(source)));
    playout.init_playout()?;
    playout.start_playout()?;

    // Capture side: mono frames into a channel
    let (tx, mut rx) = mpsc::channel(16);
    let sink: Arc<dyn AudioSink> = Arc::new(ChannelSink::with_name("loopback", tx));
    let capture = module.create_audio_source(0)?;
    capture.add_sink(&sink);
    capture.register_audio_level_observer(Arc::new(|level| {
        println!("level {:>3}%", level_to_percent(level));
    }));

    println!("Looping back for 10 seconds...");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut stereo = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        stereo.clear();
        stereo.extend(frame.samples.iter().flat_map(|&s| [s, s]));
        producer.push(&stereo);
    }

    println!("Playout: {:?}", playout.stats());
    module.terminate()?;
    Ok(())
}
