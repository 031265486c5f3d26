use crate::error::SpoolError;
use crate::error::WorkerError;
use crate::executor::Executor;
use crate::queue::Queueable;
use crate::SleepParams;
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::RwLock;
use std::thread;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WorkerState {
    Running,
    Shutdown,
}

/// Lets the owner of a worker ask it to stop polling.
pub type SharedState = Arc<RwLock<WorkerState>>;

/// Claims jobs from a queue and executes them one at a time.
///
/// Any number of workers, in any number of processes, may poll the same
/// spool.
#[derive(TypedBuilder)]
pub struct Worker<BQueue>
where
    BQueue: Queueable,
{
    pub queue: BQueue,
    #[builder(default, setter(into))]
    pub executor: Executor,
    #[builder(default, setter(into))]
    pub sleep_params: SleepParams,
    #[builder(default, setter(strip_option))]
    pub shared_state: Option<SharedState>,
    #[builder(default = "worker".to_string(), setter(into))]
    pub name: String,
}

impl<BQueue> Worker<BQueue>
where
    BQueue: Queueable,
{
    /// Claims the oldest job, runs it and records the outcome in `finished`.
    ///
    /// Returns `Ok(false)` if there was no job to run. A job file that can't
    /// be parsed stays in `working` and is returned as
    /// [`SpoolError::MalformedJob`].
    pub fn try_run_one(&self) -> Result<bool, SpoolError> {
        let job = match self.queue.fetch_and_claim_job()? {
            Some(job) => job,
            None => return Ok(false),
        };

        info!(
            "{} running job {} '{}': {}",
            self.name,
            job.id,
            job.record.name,
            job.record.command_line()
        );

        let execution = self.executor.execute(&job.record.arguments);

        match execution.exit_code {
            _ if execution.success() => info!("{} finished job {}", self.name, job.id),
            Some(code) => warn!("{} finished job {} with exit code {code}", self.name, job.id),
            None => error!(
                "{} finished job {} without exit code: {}",
                self.name,
                job.id,
                execution.error.as_deref().unwrap_or("unknown error")
            ),
        }

        let mut record = job.record.clone();
        execution.record_into(&mut record);

        self.queue.finish_job(&job, &record)?;

        Ok(true)
    }

    /// Runs jobs until `todo` is empty and returns how many were executed.
    ///
    /// Malformed job files are logged and skipped, every other error stops
    /// the drain.
    pub fn run_until_idle(&self) -> Result<usize, SpoolError> {
        let mut executed = 0;

        loop {
            match self.try_run_one() {
                Ok(true) => executed += 1,
                Ok(false) => return Ok(executed),
                Err(SpoolError::MalformedJob { path, source }) => {
                    error!(
                        "{} left malformed job {} in place: {}",
                        self.name,
                        path.display(),
                        source
                    );
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Polls the queue until the shared state is set to
    /// [`WorkerState::Shutdown`], sleeping longer each time the queue is
    /// found empty.
    pub fn run_tasks(&mut self) -> Result<(), WorkerError> {
        loop {
            if self.shutdown_requested()? {
                info!("{} is shutting down", self.name);
                return Ok(());
            }

            match self.try_run_one() {
                Ok(true) => {
                    self.maybe_reset_sleep_period();
                }
                Ok(false) => {
                    self.sleep();
                }
                Err(SpoolError::MalformedJob { path, source }) => {
                    error!(
                        "{} left malformed job {} in place: {}",
                        self.name,
                        path.display(),
                        source
                    );
                }
                Err(error) => {
                    error!("{} failed to fetch a job {:?}", self.name, error);

                    self.sleep();
                }
            };
        }
    }

    pub fn maybe_reset_sleep_period(&mut self) {
        self.sleep_params.maybe_reset_sleep_period();
    }

    pub fn sleep(&mut self) {
        thread::sleep(self.sleep_params.sleep_period);

        self.sleep_params.maybe_increase_sleep_period();
    }

    fn shutdown_requested(&self) -> Result<bool, WorkerError> {
        match self.shared_state {
            Some(ref shared_state) => Ok(*shared_state.read()? == WorkerState::Shutdown),
            None => Ok(false),
        }
    }
}
