pub mod config;
pub mod events;
pub mod reorder;
pub mod report;
pub mod sequencer;
pub mod session;
pub mod status;
pub mod types;

pub use config::Config;
pub use events::ConsoleEvent;
pub use report::{ResultRow, ResultsTable};
pub use sequencer::{ExecutionSequencer, Progress, SequencerState, Transition};
pub use session::ExecutionSession;
pub use types::*;
