use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::time::{Instant, sleep_until};

use crate::coordinator::Coordinator;
use crate::messages::{LocationDecision, PresenceEvent, ScanRequest};
use crate::config::MAX_DURATION;
use crate::notify::{Indicator, Notifier};

/// Minimum gap between the start of a round and a round triggered by a scan request.
const SCAN_REQUEST_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug)]
pub struct RoundTiming {
    pub started_at: Instant,
    pub duration: Duration,
}

/// Runs locating rounds forever and reports how the device moves between them.
pub struct Presence {
    device: String,
    home_locations: Option<Vec<String>>,
    coordinator: Coordinator,
    period: Duration,
    notifier: Arc<dyn Notifier>,
    indicator: Option<Arc<dyn Indicator>>,
    scan_requests: Option<broadcast::Receiver<ScanRequest>>,
    current: Option<LocationDecision>,
}

impl Presence {
    pub fn new(
        device: &str,
        coordinator: Coordinator,
        period: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Presence {
            device: device.to_string(),
            home_locations: None,
            coordinator,
            period: period.min(MAX_DURATION),
            notifier,
            indicator: None,
            scan_requests: None,
            current: None,
        }
    }

    pub fn with_home_locations(mut self, home_locations: Option<Vec<String>>) -> Self {
        self.home_locations = home_locations;
        self
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn Indicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn with_scan_requests(mut self, rx: broadcast::Receiver<ScanRequest>) -> Self {
        self.scan_requests = Some(rx);
        self
    }

    /// Never returns; the caller stops it by dropping the future.
    /// The first round only sets the starting location, so the first event
    /// reaches the notifier after the second round.
    pub async fn run(mut self) {
        loop {
            let timing = self.round().await;
            self.throttle(&timing).await;
        }
    }

    /// Runs one round. The first round only establishes where the device is;
    /// every later round reports a transition to the notifier.
    pub async fn round(&mut self) -> RoundTiming {
        let started_at = Instant::now();
        let decision = self.coordinator.locate().await;
        let timing = RoundTiming {
            started_at,
            duration: started_at.elapsed(),
        };

        match self.current.replace(decision.clone()) {
            None => info!("{} starting out: {}", self.device, decision),
            Some(previous) => {
                let event = PresenceEvent::new(&self.device, previous, decision.clone());
                if event.transition.is_change() {
                    info!("{} {}", self.device, event.message());
                } else {
                    debug!("{} {}", self.device, event.message());
                }

                if let Err(err) = self.notifier.notify(&event).await {
                    error!("Error delivering presence notification: {:?}", err);
                }
            }
        }

        if let Some(indicator) = &self.indicator {
            let away = is_away(&decision, self.home_locations.as_deref());
            if let Err(err) = indicator.set_away(away).await {
                error!("Error updating away indicator: {:?}", err);
            }
        }

        timing
    }

    /// Holds off the next round until a full period has passed since this one
    /// started. Rounds that already took a full period are not delayed.
    pub async fn throttle(&mut self, timing: &RoundTiming) {
        if timing.duration >= self.period {
            debug!("Round took {:?}, starting the next one now", timing.duration);
            return;
        }

        let deadline = timing.started_at + self.period;
        let Some(rx) = self.scan_requests.as_mut() else {
            sleep_until(deadline).await;
            return;
        };

        // requests made while the round ran were answered by it
        let mut closed = drain_scan_requests(rx);
        if !closed {
            let woken = tokio::select! {
                _ = sleep_until(deadline) => None,
                request = rx.recv() => Some(request),
            };
            match woken {
                None => {}
                Some(Ok(ScanRequest)) | Some(Err(RecvError::Lagged(_))) => {
                    info!("Received scan request");
                    if drain_scan_requests(rx) {
                        debug!("Scan request channel closed");
                        self.scan_requests = None;
                    }
                    let earliest = timing.started_at + SCAN_REQUEST_COOLDOWN;
                    sleep_until(earliest.min(deadline)).await;
                    return;
                }
                Some(Err(RecvError::Closed)) => closed = true,
            }
        }

        if closed {
            debug!("Scan request channel closed");
            self.scan_requests = None;
            sleep_until(deadline).await;
        }
    }
}

/// Empties the queue of pending scan requests. Returns true once the channel
/// has closed.
fn drain_scan_requests(rx: &mut broadcast::Receiver<ScanRequest>) -> bool {
    loop {
        match rx.try_recv() {
            Ok(ScanRequest) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Closed) => return true,
        }
    }
}

fn is_away(decision: &LocationDecision, home_locations: Option<&[String]>) -> bool {
    match (decision.label(), home_locations) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(label), Some(home)) => !home.iter().any(|h| h == label),
    }
}
