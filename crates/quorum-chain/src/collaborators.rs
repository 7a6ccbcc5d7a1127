//! Interfaces to the subsystems that feed the ceremony store
//!
//! Participant selection and incentive accounting live outside this crate;
//! the keeper only talks to them through these traits.

use std::collections::BTreeMap;

use quorum_core::{AccAddress, Participant, Snapshot, Threshold, ValAddress};

use crate::context::BlockContext;
use crate::error::{ChainError, Result};

/// Decides who takes part in a ceremony and maps proxies to validators
pub trait Snapshotter: Send + Sync {
    /// Capture the current eligible validator set
    ///
    /// `filter` removes candidates that must not participate. The snapshot is
    /// rejected unless the remaining weight passes `threshold`.
    fn create_snapshot(
        &self,
        ctx: &BlockContext,
        filter: &dyn Fn(&ValAddress) -> bool,
        threshold: &Threshold,
    ) -> Result<Snapshot>;

    /// Validator operator a proxy account submits for
    fn operator(&self, proxy: &AccAddress) -> Option<ValAddress>;

    /// Active proxy account of a validator operator
    fn proxy(&self, operator: &ValAddress) -> Option<AccAddress>;
}

/// Incentive accounting for ceremony participation
pub trait Rewarder: Send + Sync {
    /// Forfeit locked rewards of a participant that failed to contribute
    fn clear_rewards(&self, ctx: &mut BlockContext, participant: &ValAddress);

    /// Release locked rewards of a participant that contributed
    fn release_rewards(&self, ctx: &mut BlockContext, participant: &ValAddress);
}

/// A registered validator known to [`StaticSnapshotter`]
#[derive(Debug, Clone)]
pub struct RegisteredValidator {
    pub operator: ValAddress,
    pub proxy: AccAddress,
    pub weight: u64,
}

/// Snapshotter over a fixed validator set
#[derive(Debug, Clone)]
pub struct StaticSnapshotter {
    validators: BTreeMap<ValAddress, RegisteredValidator>,
    bonded_weight: u64,
}

impl StaticSnapshotter {
    pub fn new(validators: Vec<RegisteredValidator>, bonded_weight: u64) -> Self {
        Self {
            validators: validators
                .into_iter()
                .map(|v| (v.operator.clone(), v))
                .collect(),
            bonded_weight,
        }
    }
}

impl Snapshotter for StaticSnapshotter {
    fn create_snapshot(
        &self,
        ctx: &BlockContext,
        filter: &dyn Fn(&ValAddress) -> bool,
        threshold: &Threshold,
    ) -> Result<Snapshot> {
        let participants: Vec<Participant> = self
            .validators
            .values()
            .filter(|v| v.weight > 0 && filter(&v.operator))
            .map(|v| Participant::new(v.operator.clone(), v.weight))
            .collect();

        let snapshot = Snapshot::new(ctx.time, ctx.height, participants, self.bonded_weight);
        snapshot.validate_basic()?;

        let weight = u64::try_from(snapshot.participants_weight()).unwrap_or(u64::MAX);
        if !threshold.is_met(weight, snapshot.bonded_weight) {
            return Err(ChainError::Precondition(format!(
                "participants weight {} does not pass threshold {} of bonded weight {}",
                weight, threshold, snapshot.bonded_weight
            )));
        }

        Ok(snapshot)
    }

    fn operator(&self, proxy: &AccAddress) -> Option<ValAddress> {
        self.validators
            .values()
            .find(|v| &v.proxy == proxy)
            .map(|v| v.operator.clone())
    }

    fn proxy(&self, operator: &ValAddress) -> Option<AccAddress> {
        self.validators.get(operator).map(|v| v.proxy.clone())
    }
}
