//! Microphone capture through cpal

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::{CaptureDevice, DeviceOpener};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Opens the configured (or default) input device
#[derive(Debug, Clone)]
pub struct CpalOpener {
    device_name: Option<String>,
    sample_rate: u32,
}

impl CpalOpener {
    /// Opener for the device named in `config`, or the default input
    #[must_use]
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            device_name: config.device.clone(),
            sample_rate: config.sample_rate,
        }
    }

    fn find_device(&self) -> Result<Device> {
        let host = cpal::default_host();

        match &self.device_name {
            None => host
                .default_input_device()
                .ok_or_else(|| Error::Capture("no input device available".to_string())),
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::Capture(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| &n == name))
                .ok_or_else(|| Error::Capture(format!("input device `{name}` not found"))),
        }
    }
}

impl DeviceOpener for CpalOpener {
    fn open(&mut self) -> Result<Box<dyn CaptureDevice>> {
        let device = self.find_device()?;
        let rate = SampleRate(self.sample_rate);

        // fewest channels first, so mono is picked when offered
        let mut candidates: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::Capture(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
                    && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            })
            .collect();
        candidates.sort_by_key(cpal::SupportedStreamConfigRange::channels);

        let supported = candidates
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Capture(format!("no input config supports {} Hz", self.sample_rate))
            })?
            .with_sample_rate(rate);

        let format = supported.sample_format();
        let config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels = config.channels,
            format = ?format,
            "audio capture initialized"
        );

        CpalDevice::start(&device, &config, format, self.sample_rate as usize)
            .map(|d| Box::new(d) as Box<dyn CaptureDevice>)
    }

    fn describe(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }
}

#[derive(Debug, Default)]
struct Shared {
    samples: VecDeque<i16>,
    error: Option<String>,
}

/// Samples handed from the cpal callback to the capture thread
#[derive(Debug)]
struct SampleBuffer {
    shared: Mutex<Shared>,
    ready: Condvar,
    limit: usize,
}

impl SampleBuffer {
    fn extend(&self, samples: impl Iterator<Item = i16>) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        shared.samples.extend(samples);
        let excess = shared.samples.len().saturating_sub(self.limit);
        shared.samples.drain(..excess);
        drop(shared);
        self.ready.notify_one();
    }

    fn fail(&self, reason: String) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .error
            .get_or_insert(reason);
        self.ready.notify_all();
    }
}

/// A running cpal input stream
pub struct CpalDevice {
    buffer: Arc<SampleBuffer>,
    _stream: Stream,
}

impl CpalDevice {
    fn start(
        device: &Device,
        config: &StreamConfig,
        format: SampleFormat,
        limit: usize,
    ) -> Result<Self> {
        let buffer = Arc::new(SampleBuffer {
            shared: Mutex::new(Shared::default()),
            ready: Condvar::new(),
            limit: limit.max(1),
        });
        let channels = usize::from(config.channels.max(1));

        let on_error = {
            let buffer = Arc::clone(&buffer);
            move |err: cpal::StreamError| {
                tracing::error!(error = %err, "audio capture error");
                buffer.fail(err.to_string());
            }
        };

        let stream = match format {
            SampleFormat::I16 => {
                let buffer = Arc::clone(&buffer);
                device.build_input_stream(
                    config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        buffer.extend(data.chunks(channels).map(downmix_i16));
                    },
                    on_error,
                    None,
                )
            }
            _ => {
                let buffer = Arc::clone(&buffer);
                device.build_input_stream(
                    config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        buffer.extend(data.chunks(channels).map(downmix_f32));
                    },
                    on_error,
                    None,
                )
            }
        }
        .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            buffer,
            _stream: stream,
        })
    }
}

impl CaptureDevice for CpalDevice {
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize> {
        let guard = self
            .buffer
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (mut shared, _) = self
            .buffer
            .ready
            .wait_timeout_while(guard, timeout, |s| s.samples.is_empty() && s.error.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(reason) = shared.error.take() {
            return Err(Error::Capture(reason));
        }

        let n = buf.len().min(shared.samples.len());
        for (slot, sample) in buf.iter_mut().zip(shared.samples.drain(..n)) {
            *slot = sample;
        }
        Ok(n)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(super) fn downmix_i16(frame: &[i16]) -> i16 {
    let sum: i32 = frame.iter().copied().map(i32::from).sum();
    (sum / frame.len().max(1) as i32) as i16
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub(super) fn downmix_f32(frame: &[f32]) -> i16 {
    let mean = frame.iter().sum::<f32>() / frame.len().max(1) as f32;
    (mean * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Encode mono i16 samples as WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}
