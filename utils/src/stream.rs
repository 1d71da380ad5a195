//! Device streams run on dedicated threads.
//!
//! A cpal stream must stay on the thread that built it, so each stream lives
//! on its own thread until the returned handle is stopped or dropped. Dropping
//! the handle releases the device.

use crate::audio::downmix;
use crate::device::{get_or_default_input, get_or_default_output};
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on how long opening a device may take.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running device stream.
pub struct DeviceStream {
    sample_rate: u32,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stops the stream and waits for its thread to release the device.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Device stream thread panicked");
            }
        }
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_stream<B>(name: &str, build: B) -> anyhow::Result<DeviceStream>
where
    B: FnOnce() -> anyhow::Result<(cpal::Stream, u32)> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<anyhow::Result<u32>>(1);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until a stop is requested or the handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })?;

    let sample_rate = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(rate)) => rate,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            drop(stop_tx);
            return Err(anyhow::anyhow!("Timed out opening {}", name));
        }
    };

    Ok(DeviceStream {
        sample_rate,
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

/// Opens the microphone and forwards mono f32 buffers to `samples_tx`.
///
/// Stream errors are reported on `error_tx`.
pub fn open_input(
    device_name: Option<String>,
    buffer_frames: usize,
    samples_tx: tokio::sync::mpsc::Sender<Vec<f32>>,
    error_tx: tokio::sync::mpsc::UnboundedSender<String>,
) -> anyhow::Result<DeviceStream> {
    spawn_stream("audio-input", move || {
        let input = get_or_default_input(device_name).context("Failed to get audio input device")?;
        tracing::info!("Using input device: {:?}", input.name()?);

        let default_config = input
            .default_input_config()
            .context("Failed to get default input config")?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(buffer_frames as u32)),
        };
        let channels = config.channels as usize;
        tracing::info!("Input stream config: {:?}", &config);

        let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Err(e) = samples_tx.try_send(downmix(data, channels)) {
                tracing::warn!("Failed to send audio data to buffer: {:?}", e);
            }
        };
        let stream = input
            .build_input_stream(
                &config,
                input_data_fn,
                move |err| {
                    tracing::error!("An error occurred on input stream: {}", err);
                    let _ = error_tx.send(err.to_string());
                },
                None,
            )
            .context("Failed to build input stream")?;
        stream.play().context("Failed to start input stream")?;
        Ok((stream, config.sample_rate.0))
    })
}

/// Opens the speaker. `render` fills a mono buffer which is copied to every channel.
pub fn open_output<F>(
    device_name: Option<String>,
    buffer_frames: usize,
    mut render: F,
    error_tx: tokio::sync::mpsc::UnboundedSender<String>,
) -> anyhow::Result<DeviceStream>
where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    spawn_stream("audio-output", move || {
        let output =
            get_or_default_output(device_name).context("Failed to get audio output device")?;
        tracing::info!("Using output device: {:?}", output.name()?);

        let default_config = output
            .default_output_config()
            .context("Failed to get default output config")?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(buffer_frames as u32)),
        };
        let channels = config.channels as usize;
        tracing::info!("Output stream config: {:?}", &config);

        let mut mono: Vec<f32> = Vec::with_capacity(buffer_frames);
        let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels.max(1);
            mono.resize(frames, 0.0);
            render(&mut mono);
            for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                frame.fill(*sample);
            }
        };
        let stream = output
            .build_output_stream(
                &config,
                output_data_fn,
                move |err| {
                    tracing::error!("An error occurred on output stream: {}", err);
                    let _ = error_tx.send(err.to_string());
                },
                None,
            )
            .context("Failed to build output stream")?;
        stream.play().context("Failed to start output stream")?;
        Ok((stream, config.sample_rate.0))
    })
}
