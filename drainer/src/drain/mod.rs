//! The drain engine: finds the Pods a drain targets, evicts them in bounded batches, and watches the
//! node until they are gone, the session times out, or it is cancelled.
mod batch;
mod coordinator;
pub mod error;
mod evict;
pub mod filter;
pub mod jitter;
mod session;

#[cfg(test)]
mod fake;

pub use self::batch::{BatchEvictor, EvictionSummary};
pub use self::coordinator::{DrainConfig, DrainCoordinator, DrainVariant};
pub use self::error::{DrainError, EvictionError};
pub use self::evict::{EvictionOutcome, PodEvictor};
pub use self::filter::OwnerFilterPolicy;
pub use self::session::{DrainOutcome, DrainSession};
