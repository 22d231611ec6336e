pub mod controller;
pub mod cooldown;
pub mod error;
pub mod harvest;
pub mod operator;
pub mod persist;
pub mod run_log;
pub mod selector_policy;
pub mod snapshot;
pub mod state;

pub use controller::{
    ContentSource, ControllerSettings, RecoveryController, RecoveryOutcome, RunMode, RunReason,
    Screenshot,
};
pub use cooldown::{
    Clock, CooldownKind, CooldownStore, FileCooldownStore, ManualClock, MemoryCooldownStore,
    SystemClock,
};
pub use error::{RecoveryError, StoreError};
pub use harvest::{Harvest, HarvestSettings, Harvester, ItemCounts, WalkStop};
pub use operator::{FileSignalUnlock, OperatorUnlock};
pub use persist::SiteLocks;
pub use run_log::{RunLog, RunRecord};
pub use selector_policy::{
    apply_round, EvalMetrics, Explanation, FilePolicyStore, MemoryPolicyStore, PolicyDocument,
    PolicyState, PolicyStore, QualityGates, Round, SelectorCandidate, SelectorPolicy,
};
pub use snapshot::{FileSnapshotStore, ListingSnapshot, MemorySnapshotStore, SnapshotStore};
pub use state::{RecoveryState, Transition, TransitionLog};
