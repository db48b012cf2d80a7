//! Sample blocks and the bounded playback queue
//!
//! A [`SampleBlock`] is one driver period of interleaved 16-bit PCM. The
//! [`PlaybackQueue`] carries blocks from any number of producers to the
//! single playback callback and drops (never blocks) when full.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::AudioError;

/// Interleaved signed 16-bit PCM block
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Interleaved samples, `frame_count * channels` long
    samples: Vec<i16>,
    /// Sample rate in Hz
    sample_rate: u32,
    /// Number of interleaved channels
    channels: u16,
}

impl SampleBlock {
    /// Wrap interleaved samples.
    ///
    /// Fails when `channels` is zero or the sample count is not a whole
    /// number of frames.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::InvalidParameter("channel count must be non-zero".into()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AudioError::InvalidParameter(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Block of `frame_count` frames of digital silence
    pub fn silence(frame_count: usize, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        Self {
            samples: vec![0; frame_count * channels as usize],
            sample_rate,
            channels,
        }
    }

    /// Decode little-endian 16-bit PCM bytes. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let samples = bytes
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate, channels)
    }

    /// Encode as little-endian 16-bit PCM bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_len()];
        self.write_le_bytes(&mut bytes);
        bytes
    }

    /// Copy as many samples as fit into `out` as little-endian bytes.
    ///
    /// Returns the number of bytes written.
    pub fn write_le_bytes(&self, out: &mut [u8]) -> usize {
        let mut written = 0;
        for (dst, sample) in out.chunks_exact_mut(BYTES_PER_SAMPLE).zip(&self.samples) {
            dst.copy_from_slice(&sample.to_le_bytes());
            written += BYTES_PER_SAMPLE;
        }
        written
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Total number of samples across all channels
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Size of the block once encoded as 16-bit PCM
    pub fn byte_len(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE
    }

    /// Block duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frame_count() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Bounded FIFO of blocks between `play_audio` callers and the playback
/// callback.
///
/// Multiple producers, one consumer. A push into a full queue fails
/// immediately and the block is handed back to the caller.
pub struct PlaybackQueue {
    queue: ArrayQueue<SampleBlock>,
    overflow_count: AtomicUsize,
}

impl PlaybackQueue {
    /// Create a queue holding at most `capacity` blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Enqueue a block without blocking.
    ///
    /// Returns the block back when the queue is at capacity.
    pub fn push(&self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.queue.push(block).map_err(|rejected| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            rejected
        })
    }

    /// Dequeue the oldest block, if any
    pub fn pop(&self) -> Option<SampleBlock> {
        self.queue.pop()
    }

    /// Drop every queued block without processing it.
    ///
    /// Returns the number of blocks discarded.
    pub fn clear(&self) -> usize {
        let mut drained = 0;
        while self.queue.pop().is_some() {
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of blocks rejected because the queue was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: i16) -> SampleBlock {
        SampleBlock::new(vec![value; 8], 8000, 1).unwrap()
    }

    #[test]
    fn test_block_shape() {
        let block = SampleBlock::new(vec![0; 512], 8000, 2).unwrap();
        assert_eq!(block.frame_count(), 256);
        assert_eq!(block.len(), 512);
        assert_eq!(block.byte_len(), 1024);
        assert_eq!(block.duration_us(), 32_000);
    }

    #[test]
    fn test_block_rejects_partial_frames() {
        assert!(SampleBlock::new(vec![0; 3], 8000, 2).is_err());
        assert!(SampleBlock::new(vec![0; 4], 8000, 0).is_err());
    }

    #[test]
    fn test_le_bytes() {
        let block = SampleBlock::new(vec![1, -2, i16::MAX, i16::MIN], 8000, 1).unwrap();
        let bytes = block.to_le_bytes();
        assert_eq!(&bytes[..4], &[0x01, 0x00, 0xFE, 0xFF]);

        let decoded = SampleBlock::from_le_bytes(&bytes, 8000, 1).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_write_le_bytes_truncates_to_output() {
        let block = SampleBlock::new(vec![7; 4], 8000, 1).unwrap();
        let mut out = [0u8; 5];
        assert_eq!(block.write_le_bytes(&mut out), 4);
        assert_eq!(out, [7, 0, 7, 0, 0]);
    }

    #[test]
    fn test_queue_fifo() {
        let queue = PlaybackQueue::new(4);
        queue.push(block(1)).unwrap();
        queue.push(block(2)).unwrap();
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().samples()[0], 1);
        assert_eq!(queue.pop().unwrap().samples()[0], 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_queue_drops_on_full() {
        let queue = PlaybackQueue::new(2);
        queue.push(block(1)).unwrap();
        queue.push(block(2)).unwrap();

        let rejected = queue.push(block(3)).unwrap_err();
        assert_eq!(rejected.samples()[0], 3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.overflow_count(), 1);
    }

    #[test]
    fn test_queue_clear() {
        let queue = PlaybackQueue::new(4);
        for i in 0..3 {
            queue.push(block(i)).unwrap();
        }
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }
}
