use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Latest raw level written from an audio callback.
///
/// Stored as f32 bits so the realtime thread never takes a lock.
#[derive(Debug, Clone, Default)]
pub struct LevelProbe(Arc<AtomicU32>);

impl LevelProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Peak-hold smoothing: rises instantly, falls by `decay` per sample period.
pub fn smooth(previous: f32, level: f32, decay: f32) -> f32 {
    level.max(previous * decay).clamp(0.0, 1.0)
}

/// Samples a [`LevelProbe`] on a fixed period and publishes the smoothed volume.
pub struct VolumeMeter {
    handle: JoinHandle<()>,
    volume_tx: watch::Sender<f32>,
}

impl VolumeMeter {
    #[cfg(test)]
    fn spawn(probe: LevelProbe, period: Duration, decay: f32) -> Self {
        let (volume_tx, _) = watch::channel(0.0f32);
        Self::spawn_into(probe, period, decay, volume_tx)
    }

    /// Publishes into an existing channel so subscribers outlive the meter.
    pub fn spawn_into(
        probe: LevelProbe,
        period: Duration,
        decay: f32,
        volume_tx: watch::Sender<f32>,
    ) -> Self {
        let publisher = volume_tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut volume = 0.0f32;
            loop {
                ticker.tick().await;
                volume = smooth(volume, probe.get(), decay);
                publisher.send_if_modified(|current| {
                    let changed = *current != volume;
                    *current = volume;
                    changed
                });
            }
        });
        Self { handle, volume_tx }
    }

    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<f32> {
        self.volume_tx.subscribe()
    }

    #[cfg(test)]
    fn volume(&self) -> f32 {
        *self.volume_tx.borrow()
    }

    /// Stops sampling and resets the published volume to silence.
    pub fn stop(&self) {
        self.handle.abort();
        self.volume_tx.send_replace(0.0);
    }
}

impl Drop for VolumeMeter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
