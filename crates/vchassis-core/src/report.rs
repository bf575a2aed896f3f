use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vchassis_runtime::ResourceHandle;

/// Tagged result of one provisioning step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Created,
    /// A configuration step (link state, attachment, move, rename) took effect.
    Applied,
    Removed,
    AlreadyPresent,
    AlreadyAbsent,
    Failed { reason: String },
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Created => write!(f, "created"),
            StepOutcome::Applied => write!(f, "applied"),
            StepOutcome::Removed => write!(f, "removed"),
            StepOutcome::AlreadyPresent => write!(f, "already present"),
            StepOutcome::AlreadyAbsent => write!(f, "already absent"),
            StepOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub step: String,
    /// The resource the step creates or destroys, with the state it was
    /// left in. Configuration steps carry none.
    pub resource: Option<ResourceHandle>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// An instance started by `create`, with the interfaces wired into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningInstance {
    pub instance_id: String,
    /// Container name.
    pub process_handle: String,
    /// Interface name inside the instance -> bridge it is attached to, or
    /// `None` for a reserved port not yet assigned to an edge.
    pub ready_interfaces: BTreeMap<String, Option<String>>,
}

impl RunningInstance {
    pub fn unassigned(&self) -> impl Iterator<Item = &str> {
        self.ready_interfaces
            .iter()
            .filter(|(_, bridge)| bridge.is_none())
            .map(|(ifname, _)| ifname.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StepTally {
    pub created: usize,
    pub applied: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Ordered record of every step a `create` or `delete` ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionReport {
    pub topology: String,
    pub steps: Vec<StepRecord>,
    pub instances: BTreeMap<String, RunningInstance>,
    /// Set when a shutdown request stopped the run early.
    pub interrupted: bool,
}

impl ProvisionReport {
    pub fn new(topology: &str) -> Self {
        Self {
            topology: topology.to_owned(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, step: String, resource: Option<ResourceHandle>, outcome: StepOutcome) {
        self.steps.push(StepRecord {
            step,
            resource,
            outcome,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.outcome.is_failed())
    }

    /// No step failed and the run was not interrupted. This says nothing
    /// about whether the instances have converged.
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.failures().next().is_none()
    }

    pub fn tally(&self) -> StepTally {
        let mut tally = StepTally::default();
        for s in &self.steps {
            match s.outcome {
                StepOutcome::Created => tally.created += 1,
                StepOutcome::Applied => tally.applied += 1,
                StepOutcome::Removed => tally.removed += 1,
                StepOutcome::AlreadyPresent | StepOutcome::AlreadyAbsent => tally.unchanged += 1,
                StepOutcome::Failed { .. } => tally.failed += 1,
            }
        }
        tally
    }
}
