//! Training metrics logging.
//!
//! ## Loggers
//!
//! - [`ConsoleLogger`]: Table rows on stdout every N updates
//! - [`CSVLogger`]: CSV file logging for analysis
//! - [`MultiLogger`]: Combine multiple loggers

pub mod logger;

pub use logger::{CSVLogger, ConsoleLogger, MetricsLogger, MultiLogger, TrainingSnapshot};
