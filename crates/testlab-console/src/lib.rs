//! Async engine for the TestLab console: API client, step poller, and the
//! test case view that coordinates runs, reorders, and exports.

pub mod api;
pub mod client;
pub mod export;
pub mod poller;
pub mod reorder;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{CreateTestStepRequest, ResultsDownload, TestLabApi};
pub use client::{Client, ClientError};
pub use export::{ExportError, ExportOutcome, ExportSource, ResultsExporter};
pub use poller::{PollEvent, StepPoller};
pub use reorder::{ReorderCoordinator, ReorderReport};
pub use view::{TestCaseView, ViewError};
