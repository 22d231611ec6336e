pub mod cdx;
pub mod error;
pub mod ladder;
pub mod providers;
pub mod rescue;
pub mod stability;
pub mod types;

pub use cdx::{parse_cdx_rows, ArquivoCdx, CdxIndex, CdxRow, WaybackCdx};
pub use error::ArchiveError;
pub use ladder::{ArchiveLadder, LadderConfig};
pub use providers::{build_providers, ArchiveProvider, ProviderEndpoints};
pub use rescue::{PdpRescue, RescueConfig};
pub use stability::{IndexSample, StabilitySample, StabilitySampler};
pub use types::{Attempt, FetchResult, LadderOutcome};
