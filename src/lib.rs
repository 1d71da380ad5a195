mod client;
mod error;
mod realtime_api;
mod state;

pub mod capture;
pub mod meter;
pub mod orchestrator;
pub mod playback;
pub mod pose;
pub mod tools;
pub mod visual;

pub use formflux_live_types as types;
pub use formflux_live_utils as utils;

pub use client::{
    connect, connect_with_config, Client, Config, ConfigBuilder, Connector, ServerRx, Stats,
    WebSocketConnector,
};
pub use error::{LiveError, Result};
pub use orchestrator::{
    coach_session_config, AudioSink, AudioSource, WorkoutConfig, WorkoutSession,
};
pub use realtime_api::RealtimeApi;
pub use state::SessionState;
