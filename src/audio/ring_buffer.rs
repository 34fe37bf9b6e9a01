//! Sample hand-off between the capture callback and the recorder loop.
//!
//! cpal delivers input on a realtime thread it owns, while the turn
//! recorder drains samples from a blocking worker. A heap-allocated SPSC
//! ring from the `ringbuf` crate connects the two; the callback side never
//! takes a lock, and a lagging recorder costs the newest samples rather
//! than stalling the device.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

/// Callback half: appends captured samples.
pub struct CaptureWriter(ringbuf::HeapProd<f32>);

/// Recorder half: drains buffered samples.
pub struct CaptureReader(ringbuf::HeapCons<f32>);

/// Allocate a writer/reader pair holding `capacity_secs` of mono audio at
/// `sample_rate`.
pub fn capture_channel(sample_rate: u32, capacity_secs: u32) -> (CaptureWriter, CaptureReader) {
    let capacity = (sample_rate as usize)
        .saturating_mul(capacity_secs as usize)
        .max(1024);
    let (writer, reader) = HeapRb::<f32>::new(capacity).split();
    (CaptureWriter(writer), CaptureReader(reader))
}

impl CaptureWriter {
    /// Append samples from the capture callback. Whatever does not fit is
    /// discarded; returns how many samples landed.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        self.0.push_slice(samples)
    }
}

impl CaptureReader {
    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.0.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Move everything buffered so far out of the ring.
    pub fn take_all(&mut self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.0.occupied_len()];
        let read = self.0.pop_slice(&mut out);
        out.truncate(read);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_come_out_in_write_order() {
        let (mut writer, mut reader) = capture_channel(1024, 1);
        assert!(reader.is_empty());
        assert_eq!(writer.write(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.take_all(), vec![0.1, 0.2, 0.3]);
        assert!(reader.is_empty());
    }

    #[test]
    fn overflow_drops_the_tail_instead_of_blocking() {
        // Minimum capacity is 1024 samples regardless of the requested size.
        let (mut writer, mut reader) = capture_channel(1, 1);
        let big = vec![0.5f32; 2000];
        let written = writer.write(&big);
        assert_eq!(written, 1024);
        assert_eq!(reader.take_all().len(), 1024);
    }
}
