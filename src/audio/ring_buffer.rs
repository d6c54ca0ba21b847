//! Sample queue between the cpal callback and the chunk pump.
//!
//! Lock-free SPSC. The writer never blocks the audio thread: when the pump
//! falls behind, new samples are dropped and counted so the pump can report
//! the gap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Seconds of audio held before the writer starts dropping.
const DEFAULT_SECONDS: usize = 10;

pub struct SampleWriter {
    inner: HeapProd<f32>,
    dropped: Arc<AtomicUsize>,
}

pub struct SampleReader {
    inner: HeapCons<f32>,
    dropped: Arc<AtomicUsize>,
}

/// Queue sized for `seconds` of mono audio at `sample_rate` (10 s if `None`).
pub fn sample_queue(sample_rate: u32, seconds: Option<usize>) -> (SampleWriter, SampleReader) {
    let capacity = (sample_rate as usize * seconds.unwrap_or(DEFAULT_SECONDS)).max(1);
    let (prod, cons) = HeapRb::<f32>::new(capacity).split();
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        SampleWriter {
            inner: prod,
            dropped: dropped.clone(),
        },
        SampleReader {
            inner: cons,
            dropped,
        },
    )
}

impl SampleWriter {
    pub fn write(&mut self, samples: &[f32]) {
        let written = self.inner.push_slice(samples);
        if written < samples.len() {
            self.dropped
                .fetch_add(samples.len() - written, Ordering::Relaxed);
        }
    }
}

impl SampleReader {
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Everything queued so far.
    pub fn drain(&mut self) -> Vec<f32> {
        let mut buf = vec![0.0f32; self.available()];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        buf
    }

    /// Samples dropped on overflow since the last call.
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_drain() {
        let (mut writer, mut reader) = sample_queue(8, Some(1));
        writer.write(&[0.1, 0.2, 0.3]);
        assert_eq!(reader.available(), 3);
        assert_eq!(reader.drain(), vec![0.1, 0.2, 0.3]);
        assert!(reader.drain().is_empty());
    }

    #[test]
    fn test_overflow_is_counted() {
        let (mut writer, reader) = sample_queue(4, Some(1));
        writer.write(&[0.0; 6]);
        assert_eq!(reader.available(), 4);
        assert_eq!(reader.take_dropped(), 2);
        assert_eq!(reader.take_dropped(), 0);
    }
}
