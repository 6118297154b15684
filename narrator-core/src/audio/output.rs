//! Output stream backends driven by the [`FrameSplicer`].
//!
//! Both backends live on the engine's dedicated output thread:
//!
//! - cpal: the stream is built and played here, kept alive until the stop
//!   channel disconnects, then dropped on this same thread.
//! - null: a software clock calls the splicer once per buffer period.

use std::sync::mpsc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use super::{splicer::CallbackStatus, AudioFormat, FrameSplicer, OutputTarget};
use crate::error::Result;

/// What the output thread actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedOutput {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Body of the engine's output thread.
///
/// Reports open success/failure on `ready_tx` exactly once, then blocks
/// until `stop_rx` disconnects.
pub(crate) fn run_output_thread(
    target: OutputTarget,
    format: AudioFormat,
    splicer: FrameSplicer,
    ready_tx: mpsc::Sender<Result<OpenedOutput>>,
    stop_rx: Receiver<()>,
) {
    match target {
        OutputTarget::Null => {
            let _ = ready_tx.send(Ok(OpenedOutput {
                device: "null".into(),
                sample_rate: format.sample_rate,
                channels: format.channels,
            }));
            run_null_clock(&format, &splicer, &stop_rx);
        }
        OutputTarget::Default | OutputTarget::Named(_) => {
            let preferred = match &target {
                OutputTarget::Named(name) => Some(name.as_str()),
                _ => None,
            };
            match cpal_output::open(preferred, &format, splicer) {
                Ok((stream, opened)) => {
                    let _ = ready_tx.send(Ok(opened));
                    // Disconnect (engine stop) is the only message.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("output stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        }
    }
}

fn run_null_clock(format: &AudioFormat, splicer: &FrameSplicer, stop_rx: &Receiver<()>) {
    let period =
        Duration::from_secs_f64(format.frames_per_buffer as f64 / format.sample_rate as f64);
    let mut frame = vec![0u8; format.bytes_for_frames(format.frames_per_buffer as usize)];
    info!(period_ms = period.as_millis() as u64, "null output clock running");

    loop {
        match stop_rx.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if splicer.fill(&mut frame) == CallbackStatus::Stop {
            break;
        }
    }
}

#[cfg(feature = "audio-cpal")]
mod cpal_output {
    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        BufferSize, SampleFormat, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    };
    use tracing::{error, info, warn};

    use super::OpenedOutput;
    use crate::audio::splicer::{pcm16_to_f32, pcm16_to_i16, CallbackStatus};
    use crate::audio::{AudioFormat, FrameSplicer};
    use crate::error::{NarratorError, Result};

    pub(super) fn open(
        preferred: Option<&str>,
        format: &AudioFormat,
        splicer: FrameSplicer,
    ) -> Result<(Stream, OpenedOutput)> {
        let host = cpal::default_host();
        let mut selected = None;

        if let Some(preferred_name) = preferred {
            match host.output_devices() {
                Ok(mut devices) => {
                    selected = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected.is_none() {
                        warn!(
                            "preferred output device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => warn!("failed to list output devices while resolving preference: {e}"),
            }
        }

        let device = match selected {
            Some(device) => device,
            None => host
                .default_output_device()
                .ok_or(NarratorError::NoDefaultOutputDevice)?,
        };
        let device_name = device.name().unwrap_or_default();

        // Pick a config that plays our rate natively, preferring i16 and the
        // source channel count.
        let ranges = device
            .supported_output_configs()
            .map_err(|e| NarratorError::AudioDevice(e.to_string()))?;
        let rate = SampleRate(format.sample_rate);
        let candidate = ranges
            .filter(|r| {
                matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32)
                    && r.min_sample_rate().0 <= format.sample_rate
                    && format.sample_rate <= r.max_sample_rate().0
            })
            .min_by_key(|r| {
                (
                    r.channels() != format.channels,
                    r.channels(),
                    r.sample_format() != SampleFormat::I16,
                )
            })
            .ok_or_else(|| {
                NarratorError::AudioDevice(format!(
                    "device '{device_name}' cannot play {} Hz as i16/f32",
                    format.sample_rate
                ))
            })?;

        let buffer_size = match candidate.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&format.frames_per_buffer) =>
            {
                BufferSize::Fixed(format.frames_per_buffer)
            }
            _ => BufferSize::Default,
        };
        let sample_format = candidate.sample_format();
        let device_channels = candidate.channels();
        let config = StreamConfig {
            channels: device_channels,
            sample_rate: rate,
            buffer_size,
        };

        info!(
            device = device_name.as_str(),
            sample_rate = format.sample_rate,
            device_channels,
            ?sample_format,
            ?buffer_size,
            "opening output device"
        );

        let src_channels = format.channels as usize;
        let dst_channels = device_channels as usize;
        let src_format = *format;
        let mut scratch = vec![0u8; format.bytes_for_frames(format.frames_per_buffer as usize)];

        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / dst_channels;
                    let needed = src_format.bytes_for_frames(frames);
                    if scratch.len() < needed {
                        scratch.resize(needed, 0);
                    }
                    let frame = &mut scratch[..needed];
                    if splicer.fill(frame) == CallbackStatus::Stop {
                        data.fill(0);
                        return;
                    }
                    pcm16_to_i16(frame, src_channels, data, dst_channels);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            ),
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / dst_channels;
                    let needed = src_format.bytes_for_frames(frames);
                    if scratch.len() < needed {
                        scratch.resize(needed, 0);
                    }
                    let frame = &mut scratch[..needed];
                    if splicer.fill(frame) == CallbackStatus::Stop {
                        data.fill(0.0);
                        return;
                    }
                    pcm16_to_f32(frame, src_channels, data, dst_channels);
                },
                |err| error!("audio output stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(NarratorError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| NarratorError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| NarratorError::AudioStream(e.to_string()))?;

        Ok((
            stream,
            OpenedOutput {
                device: device_name,
                sample_rate: format.sample_rate,
                channels: device_channels,
            },
        ))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
mod cpal_output {
    use super::OpenedOutput;
    use crate::audio::{AudioFormat, FrameSplicer};
    use crate::error::{NarratorError, Result};

    pub(super) struct Stream;

    pub(super) fn open(
        _preferred: Option<&str>,
        _format: &AudioFormat,
        _splicer: FrameSplicer,
    ) -> Result<(Stream, OpenedOutput)> {
        Err(NarratorError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
