//! Bounded wait for a remote server to accept connections

use crate::adapters::RemoteDatabase;
use crate::core::{config::Credentials, context::CancelFlag, error::ActionError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Polling policy: a fixed interval inside a wall-clock limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Poll `server` until it answers, the wall-clock limit passes, or the run is cancelled.
///
/// Returns the number of probes made.
pub async fn wait_until_reachable(
    database: &dyn RemoteDatabase,
    server: &str,
    credentials: &Credentials,
    policy: ProbePolicy,
    cancel: &CancelFlag,
) -> Result<u32, ActionError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut probes = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() && probes > 0 {
            return Err(ActionError::Unreachable {
                server: server.to_string(),
                waited_secs: started.elapsed().as_secs(),
            });
        }

        probes += 1;
        let attempt_deadline = policy.interval.min(remaining).max(Duration::from_secs(1));
        if database.probe_reachable(server, credentials, attempt_deadline).await {
            info!("{} reachable after {} probe(s)", server, probes);
            return Ok(probes);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ActionError::Unreachable {
                server: server.to_string(),
                waited_secs: started.elapsed().as_secs(),
            });
        }

        debug!("{} not reachable yet (probe {}), retrying", server, probes);
        tokio::time::sleep(policy.interval.min(remaining)).await;
    }
}
