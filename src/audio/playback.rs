//! Speaker playback via rodio.
//!
//! One `AudioPlayer` is opened per turn and owns the output device for its
//! lifetime. PCM blocks are appended to a shared sink; the first append on
//! an empty sink is the moment audio becomes audible.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tracing::{info, warn};

use crate::error::{Result, VoiceError};

/// Resolve and open the output stream. A configured device name that no
/// longer exists degrades to the system default with a warning; only an
/// unopenable device is fatal.
fn open_output(device_name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle)> {
    if let Some(name) = device_name {
        let found = cpal::default_host()
            .output_devices()
            .map_err(|e| VoiceError::Device(format!("cannot enumerate output devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        if let Some(device) = found {
            info!(device = name, "Opening configured output device");
            return OutputStream::try_from_device(&device).map_err(|e| {
                VoiceError::Device(format!("cannot open output device {name:?}: {e}"))
            });
        }
        warn!(requested = name, "Configured output device is missing, using the system default");
    }
    OutputStream::try_default()
        .map_err(|e| VoiceError::Device(format!("cannot open default audio output: {e}")))
}

pub struct AudioPlayer {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Arc<Sink>,
    first_append_done: AtomicBool,
}

impl AudioPlayer {
    pub fn open(device_name: Option<&str>, volume: f32) -> Result<Self> {
        let (stream, stream_handle) = open_output(device_name)?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| VoiceError::Device(format!("failed to create audio sink: {e}")))?;
        sink.set_volume(volume.clamp(0.0, 2.0));

        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink: Arc::new(sink),
            first_append_done: AtomicBool::new(false),
        })
    }

    /// Queue a block of mono PCM. Returns `true` when this was the first
    /// audible block (time-to-first-audio reference point).
    pub fn append_pcm(&self, samples: Vec<f32>, sample_rate: u32) -> bool {
        if samples.is_empty() {
            return false;
        }
        self.sink.append(SamplesBuffer::new(1, sample_rate, samples));
        !self.first_append_done.swap(true, Ordering::SeqCst)
    }

    /// Block until the sink drains, polling with cancellation support.
    /// Returns `false` on timeout.
    pub fn drain_blocking(&self, timeout: Duration, cancelled: &dyn Fn() -> bool) -> bool {
        let start = Instant::now();
        while !self.sink.empty() {
            if cancelled() {
                self.sink.stop();
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        true
    }

    /// Async drain with cancellation; used from the streaming path.
    /// Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration, cancel: &tokio_util::sync::CancellationToken) -> bool {
        let start = Instant::now();
        while !self.sink.empty() {
            if cancel.is_cancelled() {
                self.sink.stop();
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    pub fn stop(&self) {
        self.sink.stop();
    }

    pub fn is_idle(&self) -> bool {
        self.sink.empty()
    }
}

// SAFETY: cpal keeps OutputStream !Send (raw platform handles behind a
// PhantomData marker), which would bar the player from the engine's Send
// futures and the recording worker. In this crate a player belongs to
// exactly one turn: `Engine::converse` creates it while holding the turn
// mutex, the TTS leg finishes with the sink drained before the chime code
// touches it from the blocking recorder, and nothing outside that turn
// ever sees the handle. Access is therefore strictly sequential even
// though the struct crosses threads, which is what these impls assert.
unsafe impl Send for AudioPlayer {}
unsafe impl Sync for AudioPlayer {}
