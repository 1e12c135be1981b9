//! Audio ingestion
//!
//! A dedicated capture thread reads a [`CaptureDevice`], cuts the samples into
//! fixed-size [`AudioFrame`]s and pushes them into a bounded [`FrameQueue`].
//! Live capture never sees backpressure: when the queue is full the oldest
//! frame is dropped and counted. Sources that run faster than real time wait
//! for the consumer instead and stamp frames from their sample position.

mod backoff;
mod capture;
mod queue;
mod source;
mod wav;

use std::time::{Duration, Instant};

pub use backoff::{RetryPolicy, delay_for_attempt};
pub use capture::{CpalOpener, samples_to_wav};
pub use queue::{FrameQueue, Wait};
pub use source::{AudioSource, CaptureDevice, DeviceOpener};
pub use wav::WavOpener;

/// A fixed-length block of captured samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Monotonic sequence number, starting at 0
    pub seq: u64,

    /// When the last sample of the frame was captured
    pub captured_at: Instant,

    /// Signed 16-bit mono samples
    pub samples: Box<[i16]>,
}

/// Stamps frames by sample position instead of arrival time
#[derive(Debug, Clone, Copy)]
pub(crate) struct MediaClock {
    origin: Instant,
    sample_rate: u32,
    samples: u64,
}

impl MediaClock {
    pub(crate) const fn new(origin: Instant, sample_rate: u32) -> Self {
        Self {
            origin,
            sample_rate,
            samples: 0,
        }
    }

    /// Advance by `samples` and return the time of the last one
    fn advance(&mut self, samples: usize) -> Instant {
        self.samples += samples as u64;
        let nanos = u128::from(self.samples) * 1_000_000_000 / u128::from(self.sample_rate.max(1));
        self.origin + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Cuts a continuous sample stream into frames
#[derive(Debug)]
pub(crate) struct Framer {
    frame_size: usize,
    next_seq: u64,
    pending: Vec<i16>,
    clock: Option<MediaClock>,
}

impl Framer {
    pub(crate) fn new(frame_size: usize, next_seq: u64) -> Self {
        Self {
            frame_size,
            next_seq,
            pending: Vec::with_capacity(frame_size),
            clock: None,
        }
    }

    /// Stamp frames from `clock` rather than the wall clock
    pub(crate) fn with_clock(mut self, clock: MediaClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Append samples, returning every frame they complete
    pub(crate) fn push(&mut self, mut samples: &[i16]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        while !samples.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                let captured_at = match self.clock.as_mut() {
                    Some(clock) => clock.advance(self.frame_size),
                    None => Instant::now(),
                };
                frames.push(AudioFrame {
                    seq: self.next_seq,
                    captured_at,
                    samples: full.into_boxed_slice(),
                });
                self.next_seq += 1;
            }
        }

        frames
    }

    /// Sequence number the next frame will carry
    pub(crate) const fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_fixed_frames_in_order() {
        let mut framer = Framer::new(4, 0);

        assert!(framer.push(&[1, 2, 3]).is_empty());

        let frames = framer.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(&*frames[0].samples, &[1, 2, 3, 4]);
        assert_eq!(&*frames[1].samples, &[5, 6, 7, 8]);
        assert_eq!(frames[0].seq, 0);
        assert_eq!(frames[1].seq, 1);
        assert_eq!(framer.next_seq(), 2);
    }

    #[test]
    fn framer_continues_sequence_after_reconnect() {
        let mut framer = Framer::new(2, 41);
        let frames = framer.push(&[0, 0]);
        assert_eq!(frames[0].seq, 41);
    }

    #[test]
    fn media_clock_stamps_by_sample_position() {
        let origin = Instant::now();
        let mut framer = Framer::new(1024, 0).with_clock(MediaClock::new(origin, 16_000));

        let frames = framer.push(&[0; 3 * 1024]);
        let offsets: Vec<_> = frames.iter().map(|f| f.captured_at - origin).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_millis(64),
                Duration::from_millis(128),
                Duration::from_millis(192)
            ]
        );
    }
}
