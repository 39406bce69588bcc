use async_trait::async_trait;
use log::info;

use crate::messages::PresenceEvent;

/// Receives one event per round describing how the device's location changed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &PresenceEvent) -> anyhow::Result<()>;
}

/// Receives a single "device is away" flag every round, e.g. to drive a lamp.
#[async_trait]
pub trait Indicator: Send + Sync {
    async fn set_away(&self, away: bool) -> anyhow::Result<()>;
}

/// Logs events instead of delivering them anywhere.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &PresenceEvent) -> anyhow::Result<()> {
        info!("{}: {}", event.device, event.message());
        Ok(())
    }
}

#[async_trait]
impl Indicator for LogNotifier {
    async fn set_away(&self, away: bool) -> anyhow::Result<()> {
        info!("Away: {away}");
        Ok(())
    }
}
