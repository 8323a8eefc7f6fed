//! State Poller: retrying snapshot fetch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::config::PollerConfig;
use crate::error::{GatewayError, PollError};
use crate::gateway::RpcGateway;
use crate::snapshot::ProtocolSnapshot;

/// Fetches snapshots, retrying network failures with bounded exponential
/// backoff. Protocol errors surface immediately.
pub struct StatePoller {
    gateway: Arc<dyn RpcGateway>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

impl StatePoller {
    pub fn new(gateway: Arc<dyn RpcGateway>, clock: Arc<dyn Clock>, config: PollerConfig) -> Self {
        Self {
            gateway,
            clock,
            config,
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        let max = self.config.max_backoff();
        self.config
            .initial_backoff()
            .checked_mul(factor)
            .map_or(max, |delay| delay.min(max))
    }

    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<ProtocolSnapshot, PollError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                info!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying snapshot after delay"
                );
                self.clock.sleep(delay).await;
            }

            match self.gateway.fetch_snapshot(self.clock.now()).await {
                Ok(snapshot) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Snapshot succeeded on retry");
                    }
                    return Ok(snapshot);
                }
                Err(GatewayError::Protocol(message)) => {
                    warn!(error = %message, "Snapshot rejected, not retrying");
                    return Err(PollError::Protocol(message));
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Snapshot attempt failed");
                    last = Some(e);
                }
            }
        }

        Err(PollError::Exhausted {
            attempts: max_attempts,
            last: last.unwrap_or_else(|| GatewayError::Network("no attempt made".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{snapshot_with, ScriptedGateway};

    fn config() -> PollerConfig {
        PollerConfig {
            max_attempts: 4,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 3_000,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let poller = StatePoller::new(
            Arc::new(ScriptedGateway::default()),
            Arc::new(ManualClock::new(0)),
            config(),
        );
        assert_eq!(poller.backoff(1), Duration::from_secs(1));
        assert_eq!(poller.backoff(2), Duration::from_secs(2));
        assert_eq!(poller.backoff(3), Duration::from_secs(3));
        assert_eq!(poller.backoff(30), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_saturates_on_huge_initial_delay() {
        let poller = StatePoller::new(
            Arc::new(ScriptedGateway::default()),
            Arc::new(ManualClock::new(0)),
            PollerConfig {
                max_attempts: 20,
                initial_backoff_ms: u64::MAX,
                max_backoff_ms: 60_000,
            },
        );
        assert_eq!(poller.backoff(1), Duration::from_secs(60));
        assert_eq!(poller.backoff(17), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retries_network_errors_then_succeeds() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_snapshot(Err(GatewayError::Network("reset".into())));
        gateway.push_snapshot(Err(GatewayError::Network("reset".into())));
        gateway.push_snapshot(Ok(snapshot_with(vec![], 5.0)));
        let clock = Arc::new(ManualClock::new(0));

        let poller = StatePoller::new(gateway.clone(), clock.clone(), config());
        let snapshot = poller.poll().await.unwrap();
        assert_eq!(snapshot.oracle_price, 5.0);
        assert_eq!(gateway.snapshot_calls(), 3);
        // 1s + 2s of backoff on the manual clock
        assert_eq!(clock.now(), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_attempts() {
        let gateway = Arc::new(ScriptedGateway::default());
        for _ in 0..10 {
            gateway.push_snapshot(Err(GatewayError::Network("down".into())));
        }
        let poller = StatePoller::new(gateway.clone(), Arc::new(ManualClock::new(0)), config());
        let err = poller.poll().await.unwrap_err();
        assert!(matches!(err, PollError::Exhausted { attempts: 4, .. }));
        assert_eq!(gateway.snapshot_calls(), 4);
    }

    #[tokio::test]
    async fn test_protocol_error_is_not_retried() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_snapshot(Err(GatewayError::Protocol("bad statutes".into())));
        gateway.push_snapshot(Ok(snapshot_with(vec![], 5.0)));
        let poller = StatePoller::new(gateway.clone(), Arc::new(ManualClock::new(0)), config());
        let err = poller.poll().await.unwrap_err();
        assert!(matches!(err, PollError::Protocol(_)));
        assert_eq!(gateway.snapshot_calls(), 1);
    }
}
