//! `fm-output` — simulation output writers for the formation simulation
//! engine.
//!
//! | Backend | Files created                                     |
//! |---------|---------------------------------------------------|
//! | CSV     | `agent_snapshots.csv`, `step_summaries.csv`       |
//!
//! Backends implement [`OutputWriter`] and are driven by
//! [`WorldOutputObserver`], which implements `fm_world::WorldObserver`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fm_output::{CsvWriter, WorldOutputObserver};
//!
//! let writer = CsvWriter::new(Path::new("./output"))?;
//! let mut obs = WorldOutputObserver::new(writer, 10);
//! world.run(100, &mut obs)?;
//! if let Some(e) = obs.take_error() { eprintln!("output error: {e}"); }
//! ```

pub mod csv;
pub mod error;
pub mod observer;
pub mod row;
pub mod writer;


pub use crate::csv::CsvWriter;
pub use error::{OutputError, OutputResult};
pub use observer::WorldOutputObserver;
pub use row::{AgentSnapshotRow, StepSummaryRow};
pub use writer::OutputWriter;
