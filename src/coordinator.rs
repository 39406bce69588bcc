use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};

use crate::config::{MAX_DURATION, ResolutionPolicy};
use crate::messages::LocationDecision;
use crate::prober::{ProbeResult, ProbeTarget, Prober};

/// Fans a round of probes out across the configured targets and settles on
/// one location.
///
/// Every round spawns one task per target. Tasks report through a channel
/// that only the coordinator reads, so nothing is shared between them. A
/// round never outlasts `round_budget`: probes still running when the round
/// is decided are left to finish on their own, each bounded by the same
/// budget.
pub struct Coordinator {
    prober: Arc<dyn Prober>,
    targets: Vec<ProbeTarget>,
    policy: ResolutionPolicy,
    round_budget: Duration,
}

impl Coordinator {
    pub fn new(
        prober: Arc<dyn Prober>,
        targets: Vec<ProbeTarget>,
        policy: ResolutionPolicy,
        round_budget: Duration,
    ) -> Self {
        Coordinator {
            prober,
            targets,
            policy,
            round_budget: round_budget.min(MAX_DURATION),
        }
    }

    pub async fn locate(&self) -> LocationDecision {
        let deadline = Instant::now() + self.round_budget;
        let mut results = self.spawn_probes();
        let mut reachable = Vec::new();

        loop {
            match timeout_at(deadline, results.recv()).await {
                Ok(Some(result)) if result.reachable => {
                    debug!("{} is reachable", result.target_label);
                    if self.policy == ResolutionPolicy::FirstPositive {
                        return LocationDecision::Located(result.target_label);
                    }
                    reachable.push(result.target_label);
                }
                Ok(Some(result)) => debug!("{} is not reachable", result.target_label),
                // every probe has reported
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Round exceeded its {:?} budget, deciding on what has reported",
                        self.round_budget
                    );
                    break;
                }
            }
        }

        if reachable.len() > 1 {
            debug!("Several locations reachable: {:?}", reachable);
        }
        match reachable.into_iter().min() {
            Some(label) => LocationDecision::Located(label),
            None => LocationDecision::NotFound,
        }
    }

    fn spawn_probes(&self) -> mpsc::Receiver<ProbeResult> {
        let (tx, rx) = mpsc::channel(self.targets.len().max(1));

        for target in &self.targets {
            let tx = tx.clone();
            let prober = Arc::clone(&self.prober);
            let target = target.clone();
            let budget = self.round_budget;

            tokio::spawn(async move {
                let result = match timeout(budget, prober.probe(&target)).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("Probe of {} ({}) abandoned", target.label, target.address);
                        ProbeResult::unreachable(&target)
                    }
                };
                if tx.send(result).await.is_err() {
                    debug!("Round already decided, dropping result for {}", target.label);
                }
            });
        }

        rx
    }
}
