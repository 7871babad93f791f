//! # Audio Capture Module
//!
//! Real-time microphone capture using CPAL (Cross-Platform Audio
//! Library). Handles device selection, stream configuration and the
//! accumulation of callback data into fixed-size analysis windows.
//!
//! ## Audio Configuration
//! - Sample rate: 44.1 kHz preferred, clamped to what the device offers
//! - Format: 32-bit float, mono
//! - Window: 4096 samples (~93 ms at 44.1 kHz)

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::analyzer::WINDOW_SIZE;

/// Starts audio capture from the default input device.
///
/// Selects the default input device, configures a mono f32 stream as
/// close to 44.1 kHz as the device allows, and forwards full analysis
/// windows to `sender`. Capture failure (no device, no permission, no
/// suitable format) surfaces as an error; nothing here retries.
///
/// # Arguments
/// * `sender` - Channel sender streaming windows to the analysis thread
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Live stream handle and its rate
/// * `Err(e)` - Device, permission or format failure
pub fn start_audio_capture(sender: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config =
        find_supported_config(configs, 44_100).ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    // Clamp the target rate into the range the device actually offers.
    let target_rate = 44_100.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(target_rate));

    let sample_rate_val = config.sample_rate().0;
    let config: cpal::StreamConfig = config.into();

    info!("selected sample rate: {} Hz", sample_rate_val);

    let err_fn = |err| warn!("an error occurred on the audio stream: {err}");

    // This buffer accumulates audio data from the callback.
    let mut audio_buffer = Vec::with_capacity(WINDOW_SIZE * 2);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            audio_buffer.extend_from_slice(data);

            // While we have enough data for a full window, forward it.
            while audio_buffer.len() >= WINDOW_SIZE {
                let frame_to_send = audio_buffer[..WINDOW_SIZE].to_vec();

                // Send the window, ignoring errors if the channel is full.
                let _ = sender.try_send(frame_to_send);

                audio_buffer.drain(..WINDOW_SIZE);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate_val))
}

/// Finds the best supported audio configuration for the target rate.
///
/// Filters for mono 32-bit float input and picks the configuration whose
/// supported rate range lies closest to the target.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min_diff = (c.min_sample_rate().0 as i32 - target_rate as i32).abs();
            let max_diff = (c.max_sample_rate().0 as i32 - target_rate as i32).abs();
            min_diff.min(max_diff)
        })
}
