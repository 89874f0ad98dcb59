use derive_more::Display;

/// Lifecycle of a [`Pipeline`](super::Pipeline) run.
///
/// Transitions only ever move forward through this list, skipping
/// `Reconciling` when reconciliation is disabled.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    #[display("idle")]
    Idle,
    #[display("reconciling")]
    Reconciling,
    #[display("following")]
    Following,
    #[display("shutting down")]
    ShuttingDown,
    #[display("stopped")]
    Stopped,
}
