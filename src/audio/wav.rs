//! WAV file playback as a capture device, for simulation mode

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::capture::{downmix_f32, downmix_i16};
use super::{CaptureDevice, DeviceOpener};
use crate::{Error, Result};

/// Opens a WAV file as a finite capture source
///
/// The file is decoded eagerly, downmixed to mono i16 and must match the
/// configured sample rate.
#[derive(Debug, Clone)]
pub struct WavOpener {
    path: PathBuf,
    samples: Arc<[i16]>,
    sample_rate: u32,
    realtime: bool,
}

impl WavOpener {
    /// Decode `path`, expecting `sample_rate`
    ///
    /// With `realtime`, samples are released at the file's sample rate and
    /// treated like live capture; otherwise as fast as the pipeline consumes
    /// frames, without losing any.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or its sample rate differs
    pub fn new(path: impl AsRef<Path>, sample_rate: u32, realtime: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = hound::WavReader::open(&path)?;
        let spec = reader.spec();

        if spec.sample_rate != sample_rate {
            return Err(Error::Capture(format!(
                "{} is {} Hz, expected {sample_rate} Hz",
                path.display(),
                spec.sample_rate
            )));
        }

        let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => {
                reader.samples::<i16>().collect::<std::result::Result<_, _>>()?
            }
            (hound::SampleFormat::Int, bits) => {
                let shift = i32::from(bits).saturating_sub(16);
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| scale_int(v, shift)))
                    .collect::<std::result::Result<_, _>>()?
            }
            (hound::SampleFormat::Float, _) => reader
                .samples::<f32>()
                .map(|s| s.map(float_to_i16))
                .collect::<std::result::Result<_, _>>()?,
        };

        let channels = usize::from(spec.channels.max(1));
        let samples: Arc<[i16]> = interleaved
            .chunks(channels)
            .map(downmix_i16)
            .collect();

        tracing::debug!(
            path = %path.display(),
            samples = samples.len(),
            channels,
            "decoded wav file"
        );

        Ok(Self {
            path,
            samples,
            sample_rate,
            realtime,
        })
    }

    /// Decoded mono samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl DeviceOpener for WavOpener {
    fn open(&mut self) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(WavDevice {
            samples: Arc::clone(&self.samples),
            position: 0,
            sample_rate: self.sample_rate,
            started: Instant::now(),
            realtime: self.realtime,
        }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct WavDevice {
    samples: Arc<[i16]>,
    position: usize,
    sample_rate: u32,
    started: Instant,
    realtime: bool,
}

impl WavDevice {
    /// Samples the wall clock allows to be released by now
    fn released(&self) -> usize {
        if !self.realtime {
            return self.samples.len();
        }
        let elapsed = self.started.elapsed().as_nanos();
        let due = elapsed * u128::from(self.sample_rate) / 1_000_000_000;
        usize::try_from(due).unwrap_or(usize::MAX).min(self.samples.len())
    }
}

impl CaptureDevice for WavDevice {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let mut available = self.released().saturating_sub(self.position);

        if available == 0 && !self.is_finished() {
            std::thread::sleep(timeout);
            available = self.released().saturating_sub(self.position);
        }

        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }

    fn waits_for_consumer(&self) -> bool {
        !self.realtime
    }
}

#[allow(clippy::cast_possible_truncation)]
fn scale_int(value: i32, shift: i32) -> i16 {
    let scaled = if shift >= 0 {
        value >> shift
    } else {
        value << -shift
    };
    scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

fn float_to_i16(value: f32) -> i16 {
    downmix_f32(&[value])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 16_000, &[100, 300, -100, -300]);

        let opener = WavOpener::new(&path, 16_000, false).unwrap();
        assert_eq!(opener.samples(), &[200, -200]);
    }

    #[test]
    fn sample_rate_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast.wav");
        write_wav(&path, 1, 44_100, &[0; 16]);

        let err = WavOpener::new(&path, 16_000, false).unwrap_err();
        assert!(err.to_string().contains("44100 Hz"));
    }

    #[test]
    fn device_reads_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 16_000, &[1, 2, 3, 4, 5]);

        let mut opener = WavOpener::new(&path, 16_000, false).unwrap();
        let mut device = opener.open().unwrap();
        let mut buf = [0i16; 4];

        assert_eq!(device.read(&mut buf, Duration::ZERO).unwrap(), 4);
        assert_eq!(device.read(&mut buf, Duration::ZERO).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert!(device.is_finished());
        assert_eq!(device.read(&mut buf, Duration::ZERO).unwrap(), 0);
    }

    #[test]
    fn scaling_wider_ints() {
        assert_eq!(scale_int(1 << 23, 8), i16::MAX);
        assert_eq!(scale_int(256, 8), 1);
        assert_eq!(float_to_i16(-1.5), i16::MIN);
    }
}
