//! A durable job spooler that uses a directory tree as its queue.
//!
//! Producers drop job files into `todo`, workers claim them with an atomic
//! rename into `working`, run the job's command line as a child process and
//! write the captured result into `finished`. No lock, database or server is
//! involved, so producers and workers can live in different processes or on
//! different machines sharing the spool directory.

use std::time::Duration;
use typed_builder::TypedBuilder;

pub mod config;
pub mod error;
pub mod executor;
pub mod inspect;
pub mod job;
pub mod queue;
pub mod storage;
pub mod worker;
pub mod worker_pool;

pub use config::SpoolConfig;
pub use error::{SpoolError, WorkerError};
pub use executor::{Execution, Executor};
pub use inspect::{orphans, status_report};
pub use job::{JobId, JobMeta, JobRecord, JobSummary};
pub use queue::{ClaimedJob, Queue, Queueable};
pub use storage::{Section, SpoolEntry, SpoolStorage};
pub use worker::{SharedState, Worker, WorkerState};
pub use worker_pool::{WorkerPool, WorkerPoolHandle};

/// Configuration parameters for putting workers to sleep
/// while they don't have any jobs to execute
#[derive(Clone, Debug, TypedBuilder)]
pub struct SleepParams {
    /// the current sleep period
    pub sleep_period: Duration,
    /// the maximum period a worker is allowed to sleep.
    /// After this value is reached, `sleep_period` is not increased anymore
    pub max_sleep_period: Duration,
    /// the initial value of the `sleep_period`
    pub min_sleep_period: Duration,
    /// the step that `sleep_period` is increased by on every iteration
    pub sleep_step: Duration,
}

impl SleepParams {
    pub fn new(min_sleep_period: Duration, max_sleep_period: Duration, sleep_step: Duration) -> Self {
        Self {
            sleep_period: min_sleep_period,
            max_sleep_period,
            min_sleep_period,
            sleep_step,
        }
    }

    /// Reset the `sleep_period` if `sleep_period` > `min_sleep_period`
    pub fn maybe_reset_sleep_period(&mut self) {
        if self.sleep_period != self.min_sleep_period {
            self.sleep_period = self.min_sleep_period;
        }
    }

    /// Increase the `sleep_period` by the `sleep_step` if the `max_sleep_period` is not reached
    pub fn maybe_increase_sleep_period(&mut self) {
        if self.sleep_period < self.max_sleep_period {
            self.sleep_period = (self.sleep_period + self.sleep_step).min(self.max_sleep_period);
        }
    }
}

impl Default for SleepParams {
    fn default() -> Self {
        SleepParams::new(
            Duration::from_millis(500),
            Duration::from_secs(15),
            Duration::from_millis(500),
        )
    }
}

#[cfg(test)]
mod sleep_params_tests {
    use super::SleepParams;
    use std::time::Duration;

    #[test]
    fn backs_off_up_to_max_and_resets() {
        let mut params = SleepParams::new(
            Duration::from_millis(100),
            Duration::from_millis(250),
            Duration::from_millis(100),
        );

        params.maybe_increase_sleep_period();
        assert_eq!(Duration::from_millis(200), params.sleep_period);

        params.maybe_increase_sleep_period();
        params.maybe_increase_sleep_period();
        assert_eq!(Duration::from_millis(250), params.sleep_period);

        params.maybe_reset_sleep_period();
        assert_eq!(Duration::from_millis(100), params.sleep_period);
    }
}
