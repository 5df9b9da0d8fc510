use super::Instance;
use std::time::{Duration, Instant};

/// Outcome of a single probe. `latency_ms` is meaningless when `ok` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub latency_ms: u64,
    pub ok: bool,
}

impl ProbeResult {
    fn failed() -> Self {
        Self {
            latency_ms: 0,
            ok: false,
        }
    }
}

/// Issues lightweight liveness requests against instance base URLs.
///
/// There are no retries here: the registry's periodic loop is the retry.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Sends one GET to the instance's base URL and times the round trip.
    ///
    /// Any HTTP response counts as reachable. Transport errors and timeouts
    /// yield `ok = false`.
    pub async fn probe(&self, instance: &Instance) -> ProbeResult {
        let start = Instant::now();
        let response =
            tokio::time::timeout(self.timeout, self.client.get(instance.url().as_str()).send())
                .await;

        match response {
            Ok(Ok(response)) => {
                let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(
                    instance = %instance,
                    status = %response.status(),
                    latency_ms = latency_ms,
                    "Probe succeeded"
                );
                ProbeResult {
                    latency_ms,
                    ok: true,
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(instance = %instance, error = %e, "Probe failed");
                ProbeResult::failed()
            }
            Err(_) => {
                tracing::debug!(instance = %instance, timeout = ?self.timeout, "Probe timed out");
                ProbeResult::failed()
            }
        }
    }
}
