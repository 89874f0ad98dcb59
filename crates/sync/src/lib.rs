//! Change feed driven cache synchronization.
//!
//! The moving parts, leaves first:
//! - [`pool`]: bounded-concurrency workers that apply one [`WorkItem`] to the
//!   cache store and report one [`Completion`] for it.
//! - [`cursor`]: decides which completed feed sequence is safe to checkpoint.
//! - [`reconcile`]: one-shot startup pass over what's already cached.
//! - [`tuning`]: scoped override of the cache staleness threshold.
//! - [`pipeline`]: wires all of the above to a change feed.

pub mod cursor;
pub mod error;
mod item;
pub mod pipeline;
pub mod pool;
pub mod reconcile;
pub mod tuning;

pub use crate::cursor::{CommitPolicy, CursorTracker};
pub use crate::item::{Completion, Origin, Outcome, WorkItem};
pub use crate::pipeline::{ACTIVITY_TARGET, Pipeline, PipelineOptions, PipelineState, Summary};
pub use crate::reconcile::{OriginFilter, ReconcileReport, RegistryOrigin};
pub use crate::tuning::StalenessGuard;
