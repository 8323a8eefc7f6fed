//! Transaction Pipeline: build, fee, sign, broadcast, confirm.
//!
//! One intent at a time. Each stage reports progress and fails independently.

use std::sync::Arc;
use std::time::Duration;

use keeper_chain::{FeeEstimator, FeePolicy, KeyMaterial, SignedTransaction, Signer};
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{GatewayError, PipelineError};
use crate::gateway::{ChainStatus, RpcGateway};
use crate::intent::ActionIntent;
use crate::progress::{EventStatus, ProgressReporter, Stage};

/// Base delay between broadcast attempts.
const BROADCAST_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Outcome of a submission that reached the broadcast stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Broadcast, confirmation not awaited.
    Pending,
    Confirmed,
    /// Refused by the service or failed on chain. Never retried automatically.
    Rejected { reason: String },
    /// Not confirmed within the wait window. May still confirm; re-check.
    TimedOut,
}

/// One submission, owned by the pipeline and returned to the caller.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub intent: ActionIntent,
    pub transaction: SignedTransaction,
    pub fee_per_cost: u64,
    pub tx_id: Option<String>,
    pub submitted_at: i64,
    pub status: TxStatus,
}

pub struct TransactionPipeline {
    gateway: Arc<dyn RpcGateway>,
    signer: Arc<dyn Signer>,
    fee_estimator: Arc<dyn FeeEstimator>,
    clock: Arc<dyn Clock>,
    progress: Arc<ProgressReporter>,
    key: KeyMaterial,
    public_key: String,
    config: PipelineConfig,
}

/// Builder for [`TransactionPipeline`].
pub struct TransactionPipelineBuilder {
    gateway: Arc<dyn RpcGateway>,
    signer: Arc<dyn Signer>,
    fee_estimator: Arc<dyn FeeEstimator>,
    clock: Arc<dyn Clock>,
    progress: Arc<ProgressReporter>,
    config: PipelineConfig,
}

impl TransactionPipelineBuilder {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        signer: Arc<dyn Signer>,
        fee_estimator: Arc<dyn FeeEstimator>,
        clock: Arc<dyn Clock>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            gateway,
            signer,
            fee_estimator,
            clock,
            progress,
            config: PipelineConfig::default(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the wallet's public key through the signer and build.
    pub async fn build(self, key: KeyMaterial) -> Result<TransactionPipeline, keeper_chain::SigningError> {
        let public_key = self.signer.public_key(&key).await?;
        info!(
            signer = self.signer.signer_name(),
            fee_estimator = self.fee_estimator.estimator_name(),
            no_wait = self.config.no_wait,
            "Transaction pipeline initialized"
        );
        Ok(TransactionPipeline {
            gateway: self.gateway,
            signer: self.signer,
            fee_estimator: self.fee_estimator,
            clock: self.clock,
            progress: self.progress,
            key,
            public_key,
            config: self.config,
        })
    }
}

impl TransactionPipeline {
    /// Submit one intent.
    ///
    /// `Err` means the transaction never reached the network, or every
    /// broadcast attempt failed in transit. Rejections and timeouts are
    /// returned as records.
    #[instrument(skip(self, intent), fields(kind = %intent.kind(), target = %intent.target()))]
    pub async fn submit(
        &self,
        intent: &ActionIntent,
        fee_policy: FeePolicy,
    ) -> Result<TxRecord, PipelineError> {
        let progress = &self.progress;

        // build
        progress.emit_for(intent, Stage::Build, EventStatus::Started, "");
        let built = self.build(intent, fee_policy).await;
        let (unsigned, fee_per_cost) = match built {
            Ok(built) => built,
            Err(e) => {
                progress.emit_for(intent, Stage::Build, EventStatus::Failed, e.to_string());
                return Err(e);
            }
        };
        progress.emit_for(
            intent,
            Stage::Build,
            EventStatus::Succeeded,
            format!("cost {} at {fee_per_cost} per cost", unsigned.cost),
        );

        // sign
        progress.emit_for(intent, Stage::Sign, EventStatus::Started, "");
        let signed = match self.signer.sign(&unsigned, &self.key).await {
            Ok(signed) => signed,
            Err(e) => {
                let e = PipelineError::from(e);
                progress.emit_for(intent, Stage::Sign, EventStatus::Failed, e.to_string());
                return Err(e);
            }
        };
        progress.emit_for(intent, Stage::Sign, EventStatus::Succeeded, "");

        // broadcast
        progress.emit_for(intent, Stage::Broadcast, EventStatus::Started, "");
        let submitted_at = self.clock.now();
        let mut record = TxRecord {
            intent: intent.clone(),
            transaction: signed,
            fee_per_cost,
            tx_id: None,
            submitted_at,
            status: TxStatus::Pending,
        };
        match self.broadcast(&record.transaction).await {
            Ok(tx_id) => {
                info!(tx_id = %tx_id, "Transaction broadcast");
                progress.emit_for(intent, Stage::Broadcast, EventStatus::Succeeded, tx_id.clone());
                record.tx_id = Some(tx_id);
            }
            Err(BroadcastFailure::Rejected(reason)) => {
                warn!(reason = %reason, "Transaction rejected");
                progress.emit_for(intent, Stage::Broadcast, EventStatus::Failed, reason.clone());
                record.status = TxStatus::Rejected { reason };
                return Ok(record);
            }
            Err(BroadcastFailure::Exhausted(e)) => {
                progress.emit_for(intent, Stage::Broadcast, EventStatus::Failed, e.to_string());
                return Err(e);
            }
        }

        // confirm
        if self.config.no_wait {
            progress.emit_for(intent, Stage::Confirm, EventStatus::Skipped, "no-wait mode");
            return Ok(record);
        }
        let tx_id = record.tx_id.clone().unwrap_or_default();
        progress.emit_for(intent, Stage::Confirm, EventStatus::Started, tx_id.clone());
        record.status = self.confirm(&tx_id, submitted_at).await;
        match &record.status {
            TxStatus::Confirmed => {
                progress.emit_for(intent, Stage::Confirm, EventStatus::Succeeded, tx_id)
            }
            TxStatus::Rejected { reason } => {
                progress.emit_for(intent, Stage::Confirm, EventStatus::Failed, reason.clone())
            }
            TxStatus::TimedOut => progress.emit_for(
                intent,
                Stage::Confirm,
                EventStatus::Failed,
                format!("{tx_id} not confirmed after {}s; check again later", self.config.confirm_timeout_secs),
            ),
            TxStatus::Pending => {}
        }
        Ok(record)
    }

    async fn build(
        &self,
        intent: &ActionIntent,
        fee_policy: FeePolicy,
    ) -> Result<(keeper_chain::UnsignedTransaction, u64), PipelineError> {
        // The snapshot may be stale: the coin could have been spent since.
        let coin = self
            .gateway
            .fetch_coin(intent.target())
            .await
            .map_err(PipelineError::Build)?;
        match coin {
            Some(coin) if !coin.spent => {}
            _ => {
                return Err(PipelineError::StaleCoin {
                    coin: intent.target().to_string(),
                })
            }
        }

        let fee_per_cost = fee_policy.resolve(self.fee_estimator.as_ref()).await?;
        let unsigned = self
            .gateway
            .build_transaction(intent, fee_per_cost, &self.public_key)
            .await
            .map_err(PipelineError::Build)?;
        Ok((unsigned, fee_per_cost))
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, BroadcastFailure> {
        let attempts = self.config.broadcast_attempts.max(1);
        let mut last = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = BROADCAST_RETRY_DELAY * (1 << (attempt - 1).min(3));
                info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Retrying broadcast after delay");
                self.clock.sleep(delay).await;
            }
            match self.gateway.push_transaction(tx).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(GatewayError::Protocol(reason)) => return Err(BroadcastFailure::Rejected(reason)),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Broadcast attempt failed");
                    last = Some(e);
                }
            }
        }

        Err(BroadcastFailure::Exhausted(PipelineError::Broadcast {
            attempts,
            last: last.unwrap_or_else(|| GatewayError::Network("no attempt made".to_string())),
        }))
    }

    async fn confirm(&self, tx_id: &str, submitted_at: i64) -> TxStatus {
        let deadline = submitted_at.saturating_add(self.config.confirm_timeout_secs as i64);
        loop {
            if self.clock.now() >= deadline {
                return TxStatus::TimedOut;
            }
            self.clock.sleep(self.config.confirm_poll()).await;
            match self.gateway.transaction_status(tx_id).await {
                Ok(ChainStatus::Confirmed) => return TxStatus::Confirmed,
                Ok(ChainStatus::Failed(reason)) => return TxStatus::Rejected { reason },
                Ok(ChainStatus::Pending) => {}
                Err(e) => warn!(tx_id, error = %e, "Status lookup failed, still waiting"),
            }
        }
    }
}

enum BroadcastFailure {
    Rejected(String),
    Exhausted(PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::progress::ProgressMode;
    use crate::test_support::{RecordingSigner, ScriptedGateway, SharedBuffer, NOW};
    use keeper_chain::{FeeTier, FixedFeeEstimator};

    struct Harness {
        gateway: Arc<ScriptedGateway>,
        signer: Arc<RecordingSigner>,
        clock: Arc<ManualClock>,
        events: SharedBuffer,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                gateway: Arc::new(ScriptedGateway::default()),
                signer: Arc::new(RecordingSigner::default()),
                clock: Arc::new(ManualClock::new(NOW)),
                events: SharedBuffer::default(),
            }
        }

        async fn pipeline(&self, config: PipelineConfig) -> TransactionPipeline {
            let progress = Arc::new(ProgressReporter::with_sink(
                ProgressMode::Json,
                Box::new(self.events.clone()),
                self.clock.clone(),
            ));
            TransactionPipelineBuilder::new(
                self.gateway.clone(),
                self.signer.clone(),
                Arc::new(FixedFeeEstimator::new(7, 3)),
                self.clock.clone(),
                progress,
            )
            .config(config)
            .build(crate::test_support::key())
            .await
            .unwrap()
        }
    }

    fn intent() -> ActionIntent {
        ActionIntent::Liquidate {
            target: "vault1".into(),
            amount: 100,
            reason: "ratio 0.5".into(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_confirms() {
        let h = Harness::new();
        h.gateway.push_status(Ok(ChainStatus::Pending));
        h.gateway.push_status(Ok(ChainStatus::Confirmed));
        let pipeline = h.pipeline(PipelineConfig::default()).await;

        let record = pipeline.submit(&intent(), FeePolicy::Tier(FeeTier::Fast)).await.unwrap();
        assert_eq!(record.status, TxStatus::Confirmed);
        assert_eq!(record.fee_per_cost, 7);
        assert_eq!(record.tx_id.as_deref(), Some("tx-1"));
        assert_eq!(h.gateway.built(), vec![(intent(), 7)]);
        assert_eq!(h.signer.signed_count(), 1);
        // two status polls, 30s apart
        assert_eq!(h.clock.now(), NOW + 60);

        let stages: Vec<_> = h
            .events
            .events()
            .iter()
            .map(|e| (e.stage, e.status))
            .collect();
        assert_eq!(
            stages,
            [
                (Stage::Build, EventStatus::Started),
                (Stage::Build, EventStatus::Succeeded),
                (Stage::Sign, EventStatus::Started),
                (Stage::Sign, EventStatus::Succeeded),
                (Stage::Broadcast, EventStatus::Started),
                (Stage::Broadcast, EventStatus::Succeeded),
                (Stage::Confirm, EventStatus::Started),
                (Stage::Confirm, EventStatus::Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_explicit_fee_is_used_verbatim() {
        let h = Harness::new();
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let record = pipeline.submit(&intent(), FeePolicy::Explicit(42)).await.unwrap();
        assert_eq!(record.fee_per_cost, 42);
    }

    #[tokio::test]
    async fn test_spent_coin_is_stale() {
        let h = Harness::new();
        h.gateway.mark_spent("vault1");
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let err = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::StaleCoin { .. }));
        assert!(h.gateway.built().is_empty());
        assert_eq!(h.signer.signed_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_coin_is_stale() {
        let h = Harness::new();
        h.gateway.mark_missing("vault1");
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let err = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::StaleCoin { .. }));
    }

    #[tokio::test]
    async fn test_signing_failure_stops_before_broadcast() {
        let h = Harness::new();
        h.signer.fail_next();
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let err = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Signing(_)));
        assert_eq!(h.gateway.push_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let h = Harness::new();
        h.gateway.push_broadcast(Err(GatewayError::Protocol("double spend".into())));
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let record = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap();
        assert_eq!(
            record.status,
            TxStatus::Rejected {
                reason: "double spend".into()
            }
        );
        assert_eq!(h.gateway.push_calls(), 1);
    }

    #[tokio::test]
    async fn test_network_broadcast_errors_are_retried() {
        let h = Harness::new();
        h.gateway.push_broadcast(Err(GatewayError::Network("reset".into())));
        h.gateway.push_broadcast(Ok("tx-retry".into()));
        let pipeline = h
            .pipeline(PipelineConfig {
                no_wait: true,
                ..Default::default()
            })
            .await;
        let record = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.tx_id.as_deref(), Some("tx-retry"));
        assert_eq!(h.gateway.push_calls(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_exhaustion_is_error() {
        let h = Harness::new();
        for _ in 0..3 {
            h.gateway.push_broadcast(Err(GatewayError::Network("down".into())));
        }
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let err = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Broadcast { attempts: 3, .. }));
        assert!(!err.before_broadcast());
    }

    #[tokio::test]
    async fn test_confirmation_times_out() {
        let h = Harness::new();
        h.gateway.set_default_status(ChainStatus::Pending);
        // a lookup failure in the middle does not end the wait
        h.gateway.push_status(Err(GatewayError::Network("blip".into())));
        let pipeline = h
            .pipeline(PipelineConfig {
                confirm_timeout_secs: 90,
                confirm_poll_secs: 30,
                ..Default::default()
            })
            .await;
        let record = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap();
        assert_eq!(record.status, TxStatus::TimedOut);
        assert_eq!(h.gateway.status_calls(), 3);
    }

    #[tokio::test]
    async fn test_failed_on_chain_is_rejected() {
        let h = Harness::new();
        h.gateway.push_status(Ok(ChainStatus::Failed("expired offer".into())));
        let pipeline = h.pipeline(PipelineConfig::default()).await;
        let record = pipeline.submit(&intent(), FeePolicy::default()).await.unwrap();
        assert!(matches!(record.status, TxStatus::Rejected { .. }));
    }
}
