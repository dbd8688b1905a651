//! Mirror pipeline.
//!
//! A [`MirrorController`] owns at most one active run. The run's loop pulls
//! batches from the [`ItemSource`](crate::source::ItemSource), skips names
//! already present at the destination, and pushes each remaining item through
//! the transfer stage one at a time. Every decision is published as an
//! immutable snapshot; stop requests are honoured between items only.

mod control;
mod pipeline;
mod progress;
mod resume;
mod state;
mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{ControlError, MirrorController, MirrorRequest, RunHandle};
pub use progress::{BarRenderer, ProgressKind, ProgressSink};
pub use state::{RunSnapshot, RunStatus};
pub use transfer::TransferOutcome;
