//! Ingestion Loop, Submission Loop, TTL Reaper, and the supervisor that ties
//! config swaps to atomic loop restarts.

pub mod ingestion;
pub mod submission;
pub mod supervisor;
pub mod ttl;

pub use submission::SubmissionConfig;
pub use supervisor::LoopSupervisor;
