//! Resumable job execution: resume cursor, orchestrator state machine, and
//! the runner that gives each job its own task.

pub mod dispatch;
pub mod orchestrator;
pub mod resume;
pub mod retry;
pub mod runner;
