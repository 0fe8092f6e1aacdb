//! Training loggers.
//!
//! The trainer builds one [`TrainingSnapshot`] per update round and hands it
//! to every registered [`MetricsLogger`].

use crate::algorithms::ppo::UpdateReport;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Training snapshot for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    /// Update rounds completed.
    pub update: usize,
    /// Total agent steps.
    pub timesteps: usize,
    /// Number of completed episodes.
    pub episodes: usize,
    /// Mean return over recent episodes.
    pub mean_reward: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    /// Mean pre-clipping gradient norm; absent when nothing was applied.
    pub gradient_norm: Option<f32>,
    pub learning_rate: f64,
    pub policy_version: u64,
    pub minibatches_skipped: usize,
}

impl TrainingSnapshot {
    /// Create a new training snapshot.
    pub fn new(update: usize, timesteps: usize, episodes: usize, mean_reward: f32) -> Self {
        Self {
            update,
            timesteps,
            episodes,
            mean_reward,
            ..Default::default()
        }
    }

    /// Copy losses and diagnostics from an update round.
    pub fn with_report(mut self, report: &UpdateReport) -> Self {
        self.policy_loss = report.policy_loss;
        self.value_loss = report.value_loss;
        self.entropy = report.entropy;
        self.approx_kl = report.approx_kl;
        self.clip_fraction = report.clip_fraction;
        self.gradient_norm = (report.minibatches_applied > 0).then_some(report.grad_norm);
        self.policy_version = report.version;
        self.minibatches_skipped = report.minibatches_skipped;
        self
    }

    /// Set learning rate.
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }
}

/// Logger trait for different logging backends.
pub trait MetricsLogger: Send {
    /// Log a training snapshot.
    fn log(&mut self, snapshot: &TrainingSnapshot);

    /// Flush any buffered output.
    fn flush(&mut self);
}

/// Console logger printing a table row every `log_interval` updates.
pub struct ConsoleLogger {
    log_interval: usize,
    last_logged: Option<usize>,
    start_time: Instant,
    show_header: bool,
}

impl ConsoleLogger {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
            last_logged: None,
            start_time: Instant::now(),
            show_header: true,
        }
    }

    /// Reset the start time.
    pub fn reset_timer(&mut self) {
        self.start_time = Instant::now();
    }

    fn due(&self, update: usize) -> bool {
        match self.last_logged {
            None => true,
            Some(last) => update >= last + self.log_interval,
        }
    }

    fn print_header(&self) {
        println!(
            "{:>7} {:>10} {:>8} {:>10} {:>10} {:>10} {:>9} {:>8} {:>8}",
            "Update", "Steps", "Episodes", "Reward", "Policy", "Value", "Entropy", "KL", "SPS"
        );
        println!("{}", "-".repeat(88));
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        if !self.due(snapshot.update) {
            return;
        }

        if self.show_header {
            self.print_header();
            self.show_header = false;
        }

        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sps = if elapsed > 0.0 {
            snapshot.timesteps as f32 / elapsed
        } else {
            0.0
        };

        println!(
            "{:>7} {:>10} {:>8} {:>10.2} {:>10.4} {:>10.4} {:>9.4} {:>8.5} {:>8.0}",
            snapshot.update,
            snapshot.timesteps,
            snapshot.episodes,
            snapshot.mean_reward,
            snapshot.policy_loss,
            snapshot.value_loss,
            snapshot.entropy,
            snapshot.approx_kl,
            sps
        );

        self.last_logged = Some(snapshot.update);
    }

    fn flush(&mut self) {
        // stdout is line-buffered
    }
}

const CSV_HEADER: &str = "update,timesteps,episodes,mean_reward,policy_loss,value_loss,entropy,approx_kl,clip_fraction,gradient_norm,learning_rate,policy_version,minibatches_skipped,elapsed_secs";

/// CSV file logger for analysis. The header is written once, on creation.
pub struct CSVLogger {
    writer: BufWriter<File>,
    start_time: Instant,
}

impl CSVLogger {
    /// Create (or truncate) the CSV file at `path`.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADER)?;

        Ok(Self {
            writer,
            start_time: Instant::now(),
        })
    }
}

impl MetricsLogger for CSVLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let grad_norm_str = snapshot
            .gradient_norm
            .map(|n| n.to_string())
            .unwrap_or_default();

        let result = writeln!(
            self.writer,
            "{},{},{},{:.4},{:.6},{:.6},{:.6},{:.6},{:.4},{},{:.8},{},{},{:.2}",
            snapshot.update,
            snapshot.timesteps,
            snapshot.episodes,
            snapshot.mean_reward,
            snapshot.policy_loss,
            snapshot.value_loss,
            snapshot.entropy,
            snapshot.approx_kl,
            snapshot.clip_fraction,
            grad_norm_str,
            snapshot.learning_rate,
            snapshot.policy_version,
            snapshot.minibatches_skipped,
            elapsed
        );
        if let Err(e) = result {
            log::warn!("Failed to write metrics row: {}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush metrics file: {}", e);
        }
    }
}

impl Drop for CSVLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Multi-logger that writes to multiple backends.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a logger.
    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &TrainingSnapshot) {
        for logger in &mut self.loggers {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}
