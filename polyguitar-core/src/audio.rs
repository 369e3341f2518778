//! # Audio Capture Module
//!
//! This module connects the default CPAL (Cross-Platform Audio Library) input
//! device to the ring buffer.
//!
//! ## Features
//! - Automatic input device selection
//! - Mono, 32-bit float, 48 kHz only (no resampling)
//! - Requests 128-sample driver buffers where the device allows it
//! - Re-blocks arbitrary callback sizes into exact 128-sample frames on the stack
//!
//! The callback never allocates, locks, or logs. It only copies samples and
//! pushes frames.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SupportedBufferSize, SupportedStreamConfigRange};

use crate::config::{FRAME_SIZE, PipelineConfig};
use crate::error::AudioError;
use crate::ring_buffer::RingProducer;

/// Starts audio capture from the default input device.
///
/// This function:
/// 1. Selects the default audio input device
/// 2. Picks a mono f32 configuration that supports the session's sample rate
/// 3. Installs a callback that re-blocks audio into frames for `producer`
///
/// # Arguments
/// * `producer` - Write end of the session's ring buffer
/// * `config` - The validated pipeline configuration
///
/// # Returns
/// * `Ok(stream)` - The running stream; dropping it stops capture
/// * `Err(e)` - Error if no device or no compatible configuration exists
pub fn start_audio_capture(
    mut producer: RingProducer,
    config: &PipelineConfig,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("[AUDIO] Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, config.sample_rate)
        .ok_or(AudioError::NoSuitableConfig(config.sample_rate))?;

    let frame = FRAME_SIZE as cpal::FrameCount;
    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frame) => {
            cpal::BufferSize::Fixed(frame)
        }
        _ => cpal::BufferSize::Default,
    };
    let mut stream_config: cpal::StreamConfig = supported
        .with_sample_rate(cpal::SampleRate(config.sample_rate))
        .into();
    stream_config.buffer_size = buffer_size;

    log::info!(
        "[AUDIO] Capturing {} Hz mono, driver buffer {:?}",
        config.sample_rate,
        stream_config.buffer_size
    );

    let err_fn = |err| log::error!("[AUDIO] An error occurred on the audio stream: {}", err);

    let mut assembler = FrameAssembler::new();
    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            assembler.feed(data, |frame| {
                // Rejections are counted inside the ring.
                let _ = producer.push(frame);
            });
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// Finds a supported mono f32 configuration whose rate range contains `target_rate`.
///
/// # Arguments
/// * `configs` - List of supported audio configurations from the device
/// * `target_rate` - Required sample rate in Hz
///
/// # Returns
/// * `Some(config)` - First matching configuration
/// * `None` - No suitable configuration found
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs.into_iter().find(|c| {
        c.channels() == 1
            && c.sample_format() == cpal::SampleFormat::F32
            && c.min_sample_rate().0 <= target_rate
            && c.max_sample_rate().0 >= target_rate
    })
}

/// Collects driver callbacks of any size into exact `FRAME_SIZE` frames.
pub struct FrameAssembler {
    staged: [f32; FRAME_SIZE],
    filled: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            staged: [0.0; FRAME_SIZE],
            filled: 0,
        }
    }

    /// Samples held back waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Splits `data` into frames and passes each complete one to `emit`.
    ///
    /// Whole frames are forwarded straight from `data` when nothing is staged.
    pub fn feed(&mut self, mut data: &[f32], mut emit: impl FnMut(&[f32])) {
        while !data.is_empty() {
            if self.filled == 0 && data.len() >= FRAME_SIZE {
                emit(&data[..FRAME_SIZE]);
                data = &data[FRAME_SIZE..];
                continue;
            }

            let take = (FRAME_SIZE - self.filled).min(data.len());
            self.staged[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == FRAME_SIZE {
                emit(&self.staged);
                self.filled = 0;
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}
