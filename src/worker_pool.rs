use crate::error::SpoolError;
use crate::error::WorkerError;
use crate::executor::Executor;
use crate::queue::Queueable;
use crate::worker::SharedState;
use crate::worker::Worker;
use crate::worker::WorkerState;
use crate::SleepParams;
use log::{error, info};
use std::sync::Arc;
use std::sync::RwLock;
use std::thread;
use std::thread::JoinHandle;
use typed_builder::TypedBuilder;

/// Several execution slots in one process.
///
/// Every slot is an independent [`Worker`] doing its own claim, execute and
/// finish cycle against the shared spool.
#[derive(Clone, TypedBuilder)]
pub struct WorkerPool<BQueue>
where
    BQueue: Queueable + Clone + Sync + Send + 'static,
{
    /// the queue every worker of the pool claims jobs from.
    pub queue: BQueue,
    /// sleep_params controls how much time a worker will sleep while waiting for jobs
    #[builder(setter(into), default)]
    pub sleep_params: SleepParams,
    #[builder(setter(into), default)]
    pub executor: Executor,
    /// the number of workers of the pool.
    #[builder(setter(into))]
    pub number_of_workers: u32,
}

/// Running workers started by [`WorkerPool::start`].
pub struct WorkerPoolHandle {
    shared_state: SharedState,
    threads: Vec<(String, JoinHandle<Result<(), WorkerError>>)>,
}

impl<BQueue> WorkerPool<BQueue>
where
    BQueue: Queueable + Clone + Sync + Send + 'static,
{
    /// Starts the configured number of polling workers.
    pub fn start(&self) -> Result<WorkerPoolHandle, WorkerError> {
        let shared_state: SharedState = Arc::new(RwLock::new(WorkerState::Running));
        let mut threads = Vec::new();

        for name in self.worker_names() {
            let mut worker = self.worker(&name);
            worker.shared_state = Some(shared_state.clone());

            info!("starting a worker thread {name}");

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run_tasks())?;

            threads.push((name, handle));
        }

        Ok(WorkerPoolHandle {
            shared_state,
            threads,
        })
    }

    /// Runs the workers until `todo` is empty and returns how many jobs they
    /// executed in total.
    pub fn drain(&self) -> Result<usize, WorkerError> {
        let mut threads: Vec<(String, JoinHandle<Result<usize, SpoolError>>)> = Vec::new();

        for name in self.worker_names() {
            let worker = self.worker(&name);

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run_until_idle())?;

            threads.push((name, handle));
        }

        let mut executed = 0;
        let mut first_error = None;

        for (name, handle) in threads {
            match handle.join() {
                Ok(Ok(count)) => executed += count,
                Ok(Err(error)) => {
                    error!("Error executing jobs in worker '{name}': {error:?}");
                    first_error.get_or_insert(WorkerError::from(error));
                }
                Err(_) => {
                    first_error.get_or_insert(WorkerError::WorkerPanicked { name });
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(executed),
        }
    }

    fn worker_names(&self) -> Vec<String> {
        (1..self.number_of_workers + 1)
            .map(|idx| format!("jobspool_worker_{idx}"))
            .collect()
    }

    fn worker(&self, name: &str) -> Worker<BQueue> {
        Worker::builder()
            .queue(self.queue.clone())
            .executor(self.executor.clone())
            .sleep_params(self.sleep_params.clone())
            .name(name)
            .build()
    }
}

impl WorkerPoolHandle {
    pub fn shared_state(&self) -> SharedState {
        self.shared_state.clone()
    }

    /// Asks every worker to stop after its current job and waits for them.
    pub fn shutdown(self) -> Result<(), WorkerError> {
        *self.shared_state.write()? = WorkerState::Shutdown;

        self.wait()
    }

    /// Waits for every worker to stop, which only happens once the shared
    /// state is set to [`WorkerState::Shutdown`].
    pub fn wait(self) -> Result<(), WorkerError> {
        let mut result = Ok(());

        for (name, handle) in self.threads {
            match handle.join() {
                Ok(Ok(())) => info!("worker thread {name} stopped"),
                Ok(Err(error)) => {
                    error!("Error executing jobs in worker '{name}': {error:?}");
                    if result.is_ok() {
                        result = Err(error);
                    }
                }
                Err(_) => {
                    error!("worker thread {name} panicked");
                    if result.is_ok() {
                        result = Err(WorkerError::WorkerPanicked { name });
                    }
                }
            }
        }

        result
    }
}
