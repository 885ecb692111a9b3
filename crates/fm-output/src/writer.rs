//! The `OutputWriter` trait implemented by backend writers.

use crate::{AgentSnapshotRow, OutputResult, StepSummaryRow};

/// A sink for per-step rows.
///
/// Errors are returned to the caller; [`WorldOutputObserver`] stores the
/// first one for [`take_error`].
///
/// [`WorldOutputObserver`]: crate::WorldOutputObserver
/// [`take_error`]: crate::WorldOutputObserver::take_error
pub trait OutputWriter {
    /// Write a batch of agent snapshots.
    fn write_snapshots(&mut self, rows: &[AgentSnapshotRow]) -> OutputResult<()>;

    /// Write one formation's step summary.
    fn write_step_summary(&mut self, row: &StepSummaryRow) -> OutputResult<()>;

    /// Flush and close all underlying file handles.
    ///
    /// Calling it again after success does nothing.
    fn finish(&mut self) -> OutputResult<()>;
}
