//! Batch processing
//!
//! [`scheduler::BatchScheduler`] drives per-track pipelines;
//! [`state::BatchState`] carries the run's counters and the single-flight
//! guard.

pub mod scheduler;
pub mod state;

pub use scheduler::{AudioSource, BatchScheduler, SchedulerConfig, SchedulerError, TrackAnalysis};
pub use state::{BatchSnapshot, BatchState, SubmitQueue};
