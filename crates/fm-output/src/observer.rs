//! `WorldOutputObserver<W>` — bridges `WorldObserver` to an `OutputWriter`.

use fm_core::Timestep;
use fm_formation::AnyFormation;
use fm_world::{StepSummary, WorldObserver};
use log::warn;

use crate::row::{AgentSnapshotRow, StepSummaryRow};
use crate::writer::OutputWriter;
use crate::{OutputError, OutputResult};

/// A [`WorldObserver`] that writes per-formation summaries every step and
/// structural snapshots every `snapshot_interval` steps.
///
/// Errors from the writer are stored internally because `WorldObserver`
/// methods have no return value.  After `world.run()` returns, check for
/// errors with [`take_error`][Self::take_error].
pub struct WorldOutputObserver<W: OutputWriter> {
    writer:            W,
    snapshot_interval: u64,
    last_error:        Option<OutputError>,
}

impl<W: OutputWriter> WorldOutputObserver<W> {
    /// Snapshot every `snapshot_interval` steps; `0` writes summaries only.
    pub fn new(writer: W, snapshot_interval: u64) -> Self {
        Self { writer, snapshot_interval, last_error: None }
    }

    /// Take the stored write error (if any) after `world.run()` returns.
    pub fn take_error(&mut self) -> Option<OutputError> {
        self.last_error.take()
    }

    /// Unwrap the inner writer (e.g. to inspect files after the run).
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Write the rows for one completed step.
    pub fn record(&mut self, timestep: Timestep, formations: &[Box<dyn AnyFormation>]) -> OutputResult<()> {
        for f in formations {
            self.writer.write_step_summary(&StepSummaryRow {
                timestep:  timestep.0,
                formation: f.name().to_owned(),
                agents:    f.len() as u64,
            })?;
        }

        if self.snapshot_interval == 0 || !timestep.0.is_multiple_of(self.snapshot_interval) {
            return Ok(());
        }
        for f in formations {
            let rows: Vec<AgentSnapshotRow> = f
                .snapshot_rows()
                .into_iter()
                .map(|r| AgentSnapshotRow {
                    timestep:  timestep.0,
                    formation: f.name().to_owned(),
                    index:     r.index,
                    parent:    r.parent,
                    depth:     r.depth,
                    children:  r.children,
                })
                .collect();
            if !rows.is_empty() {
                self.writer.write_snapshots(&rows)?;
            }
        }
        Ok(())
    }

    fn store_err(&mut self, result: OutputResult<()>) {
        if let Err(e) = result {
            // Keep only the first error.
            if self.last_error.is_none() {
                warn!("output writer failed: {e}");
                self.last_error = Some(e);
            }
        }
    }
}

impl<W: OutputWriter> WorldObserver for WorldOutputObserver<W> {
    fn on_step_end(&mut self, summary: &StepSummary, formations: &[Box<dyn AnyFormation>]) {
        let result = self.record(summary.timestep, formations);
        self.store_err(result);
    }

    fn on_run_end(&mut self, _next: Timestep) {
        let result = self.writer.finish();
        self.store_err(result);
    }
}
