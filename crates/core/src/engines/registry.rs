//! Registry Rewarder.

use dashmap::DashSet;
use tracing::{debug, info};

use super::{DecisionEngine, Intents};
use crate::error::PipelineError;
use crate::intent::ActionIntent;
use crate::snapshot::ProtocolSnapshot;

/// Distributes registry rewards once per ended epoch.
///
/// Epochs handed to the pipeline are remembered for the life of the process,
/// so repeated passes never emit the same epoch twice. An epoch whose
/// submission failed before broadcast is forgotten and retried.
#[derive(Debug, Default)]
pub struct RegistryRewarder {
    distributed: DashSet<u64>,
}

impl RegistryRewarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_distributed(&self, epoch: u64) -> bool {
        self.distributed.contains(&epoch)
    }

    pub fn forget(&self, epoch: u64) {
        if self.distributed.remove(&epoch).is_some() {
            info!(epoch, "Reward epoch will be retried");
        }
    }
}

impl DecisionEngine for RegistryRewarder {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, now: i64) -> Intents {
        let mut out = Intents::new();
        let Some(registry) = &snapshot.registry else {
            return out;
        };

        if now < registry.epoch_ends_at {
            debug!(epoch = registry.epoch, ends_at = registry.epoch_ends_at, "Reward epoch still running");
            return out;
        }
        if registry.pending_rewards == 0 {
            return out;
        }
        if !self.distributed.insert(registry.epoch) {
            debug!(epoch = registry.epoch, "Reward epoch already distributed");
            return out;
        }

        out.push(ActionIntent::DistributeReward {
            target: registry.id.clone(),
            amount: registry.pending_rewards,
            epoch: registry.epoch,
            reason: format!("epoch {} ended at {}", registry.epoch, registry.epoch_ends_at),
        });
        out
    }

    fn on_failure(&self, intent: &ActionIntent, error: &PipelineError) {
        if let Some(epoch) = intent.epoch() {
            if error.before_broadcast() {
                self.forget(epoch);
            }
        }
    }
}
