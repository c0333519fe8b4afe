pub mod orchestrator;
pub mod sweeper;

pub use orchestrator::Orchestrator;
pub use sweeper::JobSweeper;
