//! Keeper Loop: Poller → Decision Engines → Transaction Pipeline.
//!
//! States: `Idle → Locked → Polling → Deciding → Acting → Reporting`, then back
//! to `Polling` after the inter-iteration delay, or `Done`. Shutdown is
//! observed only between iterations; an Acting stage always runs to the end.
//!
//! An iteration either bids on collateral auctions or starts new ones, never
//! both, so one pass does not flood a block with auction spends.

use std::sync::Arc;
use std::time::Duration;

use keeper_chain::{FeeEstimator, KeyMaterial, Signer};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::config::KeeperConfig;
use crate::engines::{default_engines, DecisionEngine};
use crate::error::{KeeperError, PipelineError, PollError};
use crate::gateway::RpcGateway;
use crate::intent::{ActionIntent, IntentKind};
use crate::lock;
use crate::pipeline::{TransactionPipeline, TransactionPipelineBuilder, TxStatus};
use crate::poller::StatePoller;
use crate::progress::{EventStatus, ProgressReporter, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperState {
    Idle,
    Locked,
    Polling,
    Deciding,
    Acting,
    Reporting,
    Done,
}

/// Outcome counts of one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub intents: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub timed_out: usize,
    pub rejected: usize,
    /// Failed before or during broadcast.
    pub failed: usize,
    /// Dropped because the target coin was already spent.
    pub skipped: usize,
    /// Liquidations held back because collateral auctions were bid on.
    pub deferred: usize,
}

impl IterationReport {
    fn record(&mut self, status: &TxStatus) {
        match status {
            TxStatus::Confirmed => self.confirmed += 1,
            TxStatus::Pending => self.pending += 1,
            TxStatus::TimedOut => self.timed_out += 1,
            TxStatus::Rejected { .. } => self.rejected += 1,
        }
    }

    fn summary(&self) -> String {
        format!(
            "{} intents: {} confirmed, {} pending, {} timed out, {} rejected, {} failed, {} skipped, {} deferred",
            self.intents,
            self.confirmed,
            self.pending,
            self.timed_out,
            self.rejected,
            self.failed,
            self.skipped,
            self.deferred
        )
    }
}

/// Drop `Liquidate` intents when the same pass bids on collateral auctions.
/// Returns the kept intents and the number deferred.
fn defer_liquidations(intents: Vec<(usize, ActionIntent)>) -> (Vec<(usize, ActionIntent)>, usize) {
    let bidding = intents
        .iter()
        .any(|(_, intent)| intent.kind() == IntentKind::BidLiquidation);
    if !bidding {
        return (intents, 0);
    }
    let before = intents.len();
    let kept: Vec<_> = intents
        .into_iter()
        .filter(|(_, intent)| intent.kind() != IntentKind::Liquidate)
        .collect();
    let deferred = before - kept.len();
    (kept, deferred)
}

/// Wait out `interval`. Returns `true` as soon as `shutdown` reads true.
async fn wait_or_shutdown(
    clock: &dyn Clock,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow_and_update() {
        return true;
    }
    let sleep = clock.sleep(interval);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow_and_update() => return true,
                Ok(()) => continue,
                // No shutdown source left; just wait out the delay.
                Err(_) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub iterations: u64,
    pub failed_polls: u64,
    pub reports: Vec<IterationReport>,
}

pub struct Keeper {
    config: KeeperConfig,
    poller: StatePoller,
    engines: Vec<Box<dyn DecisionEngine>>,
    pipeline: TransactionPipeline,
    clock: Arc<dyn Clock>,
    progress: Arc<ProgressReporter>,
    state: KeeperState,
}

impl Keeper {
    pub fn new(
        config: KeeperConfig,
        poller: StatePoller,
        engines: Vec<Box<dyn DecisionEngine>>,
        pipeline: TransactionPipeline,
        clock: Arc<dyn Clock>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            config,
            poller,
            engines,
            pipeline,
            clock,
            progress,
            state: KeeperState::Idle,
        }
    }

    /// Wire a keeper with the standard engines from its collaborators.
    pub async fn assemble(
        config: KeeperConfig,
        gateway: Arc<dyn RpcGateway>,
        signer: Arc<dyn Signer>,
        fee_estimator: Arc<dyn FeeEstimator>,
        clock: Arc<dyn Clock>,
        progress: Arc<ProgressReporter>,
        key: KeyMaterial,
    ) -> Result<Self, KeeperError> {
        let poller = StatePoller::new(gateway.clone(), clock.clone(), config.poller.clone());
        let pipeline = TransactionPipelineBuilder::new(
            gateway,
            signer,
            fee_estimator,
            clock.clone(),
            progress.clone(),
        )
        .config(config.pipeline.clone())
        .build(key)
        .await?;
        let engines = default_engines(&config);
        Ok(Self::new(config, poller, engines, pipeline, clock, progress))
    }

    pub fn state(&self) -> KeeperState {
        self.state
    }

    fn enter(&mut self, next: KeeperState) {
        debug!(from = ?self.state, to = ?next, "Keeper state");
        self.state = next;
    }

    /// Run until done (run-once) or until `shutdown` turns true.
    ///
    /// The instance lock is held for the whole run and released on every
    /// exit path.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary, KeeperError> {
        let dir = self.config.keeper.data_dir.clone();
        self.progress
            .emit(Stage::Lock, EventStatus::Started, dir.display().to_string());
        let _lock = match lock::acquire(&dir) {
            Ok(handle) => handle,
            Err(e) => {
                self.progress.emit(Stage::Lock, EventStatus::Failed, e.to_string());
                self.enter(KeeperState::Done);
                return Err(e.into());
            }
        };
        self.progress.emit(Stage::Lock, EventStatus::Succeeded, "");
        self.enter(KeeperState::Locked);

        let bounds = &self.config.bounds;
        info!(
            run_once = self.config.keeper.run_once,
            interval_secs = self.config.keeper.interval_secs,
            max_bid_amount = bounds.max_bid_amount,
            min_discount = bounds.min_discount,
            max_offer_amount = bounds.max_offer_amount,
            offer_expiry_secs = bounds.offer_expiry_secs,
            "Keeper started"
        );
        self.progress.emit(
            Stage::Iteration,
            EventStatus::Info,
            format!(
                "liquidator started: max_bid_amount={} min_discount={} max_offer_amount={} offer_expiry_secs={}",
                bounds.max_bid_amount, bounds.min_discount, bounds.max_offer_amount, bounds.offer_expiry_secs
            ),
        );

        let mut summary = RunSummary::default();
        let result = loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, stopping");
                break Ok(());
            }

            summary.iterations += 1;
            match self.iterate(summary.iterations).await {
                Ok(report) => summary.reports.push(report),
                Err(e) if self.config.keeper.run_once => break Err(KeeperError::from(e)),
                Err(e) => {
                    summary.failed_polls += 1;
                    error!(iteration = summary.iterations, error = %e, "Iteration aborted, will retry after delay");
                }
            }

            if self.config.keeper.run_once {
                break Ok(());
            }

            self.enter(KeeperState::Polling);
            let interval = self.config.keeper.interval();
            debug!(delay_secs = interval.as_secs(), "Waiting for next iteration");
            if wait_or_shutdown(self.clock.as_ref(), interval, &mut shutdown).await {
                info!("Shutdown requested during delay, stopping");
                break Ok(());
            }
        };

        self.enter(KeeperState::Done);
        info!(
            iterations = summary.iterations,
            failed_polls = summary.failed_polls,
            "Keeper stopped"
        );
        result.map(|()| summary)
    }

    /// One Polling → Deciding → Acting → Reporting cycle.
    #[instrument(skip(self))]
    pub(crate) async fn iterate(&mut self, iteration: u64) -> Result<IterationReport, PollError> {
        self.enter(KeeperState::Polling);
        self.progress.emit(Stage::Poll, EventStatus::Started, "");
        let snapshot = match self.poller.poll().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.progress.emit(Stage::Poll, EventStatus::Failed, e.to_string());
                self.progress
                    .emit(Stage::Iteration, EventStatus::Failed, format!("iteration {iteration}: {e}"));
                return Err(e);
            }
        };
        self.progress.emit(
            Stage::Poll,
            EventStatus::Succeeded,
            format!(
                "{} vaults, {} auctions, oracle {}",
                snapshot.vaults.len(),
                snapshot.auctions.len(),
                snapshot.oracle_price
            ),
        );

        self.enter(KeeperState::Deciding);
        let now = self.clock.now();
        let intents: Vec<(usize, ActionIntent)> = self
            .engines
            .iter()
            .enumerate()
            .flat_map(|(index, engine)| {
                let produced = engine.evaluate(&snapshot, now);
                debug!(engine = engine.name(), intents = produced.len(), "Engine evaluated");
                produced.into_iter().map(move |intent| (index, intent))
            })
            .collect();
        let (intents, deferred) = defer_liquidations(intents);
        if deferred > 0 {
            info!(deferred, "Bidding this iteration, new auctions wait for the next");
        }
        self.progress.emit(
            Stage::Decide,
            EventStatus::Info,
            format!("{} intents, {deferred} deferred", intents.len()),
        );

        self.enter(KeeperState::Acting);
        let mut report = IterationReport {
            iteration,
            intents: intents.len(),
            deferred,
            ..Default::default()
        };
        let fee_policy = self.config.pipeline.fee_policy;
        for (index, intent) in &intents {
            info!(intent = %intent, "Submitting");
            match self.pipeline.submit(intent, fee_policy).await {
                Ok(record) => {
                    if let TxStatus::Rejected { reason } = &record.status {
                        warn!(kind = %intent.kind(), target = %intent.target(), reason = %reason, "Transaction rejected");
                    }
                    report.record(&record.status);
                }
                Err(e) => {
                    match &e {
                        PipelineError::StaleCoin { .. } => report.skipped += 1,
                        _ => report.failed += 1,
                    }
                    warn!(
                        kind = %intent.kind(),
                        target = %intent.target(),
                        stage = e.stage(),
                        error = %e,
                        "Intent failed, continuing"
                    );
                    self.engines[*index].on_failure(intent, &e);
                }
            }
        }

        self.enter(KeeperState::Reporting);
        info!(
            iteration,
            intents = report.intents,
            confirmed = report.confirmed,
            pending = report.pending,
            timed_out = report.timed_out,
            rejected = report.rejected,
            failed = report.failed,
            skipped = report.skipped,
            deferred = report.deferred,
            "Iteration complete"
        );
        self.progress.emit(
            Stage::Iteration,
            EventStatus::Succeeded,
            format!("iteration {iteration}: {}", report.summary()),
        );
        Ok(report)
    }
}
