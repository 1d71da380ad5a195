mod config;
mod frames;

use crate::config::Config;
use crate::frames::FrameDirectory;
use anyhow::{Context, Result};
use clap::Parser;
use formflux_live::capture::CaptureConfig;
use formflux_live::playback::PlaybackConfig;
use formflux_live::types::ServerEvent;
use formflux_live::visual::{FrameSource, VisualConfig};
use formflux_live::{coach_session_config, Client, WorkoutConfig, WorkoutSession};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Live workout coach with voice feedback and rep counting")]
struct Cli {
    /// Directory of images replayed as camera frames
    #[arg(long)]
    frames: Option<PathBuf>,
    /// Microphone name, defaults to the system input
    #[arg(long)]
    input_device: Option<String>,
    /// Speaker name, defaults to the system output
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();

    if args.list_devices {
        let inputs = formflux_live::utils::device::get_available_inputs()
            .context("Failed to list input devices")?;
        let outputs = formflux_live::utils::device::get_available_outputs()
            .context("Failed to list output devices")?;
        println!("Input devices:\n{}\n\nOutput devices:\n{}", inputs, outputs);
        return Ok(());
    }

    let camera = match &args.frames {
        Some(dir) => {
            let source = FrameDirectory::open(dir).context("Failed to open frame directory")?;
            Some(Arc::new(source) as Arc<dyn FrameSource>)
        }
        None => None,
    };

    let session = coach_session_config()
        .to_builder()
        .with_model(&config.model)
        .with_voice(config.voice.clone())
        .with_response_modality(config.response_modality)
        .build();
    let visual = VisualConfig::new(config.pose_interval, config.image_interval)
        .context("Invalid visual sampling intervals")?;
    let workout_config = WorkoutConfig {
        session,
        capture: CaptureConfig::default().with_device(args.input_device.clone()),
        playback: PlaybackConfig::default().with_device(args.output_device.clone()),
        visual,
        tool_response_delay: config.tool_response_delay,
    };

    let client_config = formflux_live::Config::builder()
        .with_api_key(&config.gemini_api_key)
        .build();
    let client = Arc::new(Client::new(client_config));

    // No landmark model ships with the binary, so frames are sent as images only.
    let workout = WorkoutSession::new(client.clone(), workout_config, camera, None);
    let mut events = client.server_events();
    let mut reps = workout.reps();

    workout.start().await.context("Failed to start workout session")?;
    tracing::info!("Coach is listening. Press Ctrl-C to finish.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
            Ok(()) = reps.changed() => {
                tracing::info!("Reps: {}", *reps.borrow_and_update());
            }
            event = events.recv() => match event {
                Ok(ServerEvent::Text(text)) => tracing::info!("Coach: {}", text),
                Ok(ServerEvent::OutputTranscription(text)) => tracing::info!("Coach said: {}", text),
                Ok(ServerEvent::InputTranscription(text)) => tracing::info!("You said: {}", text),
                Ok(ServerEvent::GoAway { time_left }) => {
                    tracing::warn!("Server is closing the session soon: {:?}", time_left);
                }
                Ok(ServerEvent::Close { reason }) => {
                    tracing::info!("Session closed: {:?}", reason);
                    break;
                }
                Ok(ServerEvent::Error { detail }) => {
                    tracing::error!("Session failed: {}", detail);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Missed {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    workout.stop().await;
    let stats = client.stats();
    tracing::info!(
        "Workout finished: {} reps, {} total tokens",
        workout.rep_count(),
        stats.total_tokens()
    );
    Ok(())
}
