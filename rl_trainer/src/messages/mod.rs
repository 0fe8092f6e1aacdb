//! Messages exchanged between the sample coordinator and its workers.
//!
//! # Architecture
//!
//! ```text
//!                   +---------------------+
//!                   |   SampleCollector   |
//!                   +---------------------+
//!                     |  WorkerMsg    ^
//!                     v               |  WorkerReport
//!          +----------+----------+    |
//!          |          |          |    |
//!          v          v          v    |
//!     +--------+ +--------+ +--------+
//!     |Worker 0| |Worker 1| |Worker N|
//!     +--------+ +--------+ +--------+
//! ```
//!
//! Each worker has its own command channel; all workers share one report
//! channel back to the coordinator.

mod worker_msg;
mod worker_stats;

pub use worker_msg::{RoundStats, WorkerMsg, WorkerReport};
pub use worker_stats::WorkerStats;
