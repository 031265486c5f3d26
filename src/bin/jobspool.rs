use clap::{Parser, Subcommand};
use jobspool::{
    orphans, status_report, JobId, JobMeta, Queue, Queueable, Section, SpoolConfig, SpoolError, Worker,
    WorkerPool,
};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "jobspool")]
#[command(version)]
#[command(about = "A job spooler that uses a directory as its queue")]
#[command(propagate_version = true)]
struct Cli {
    /// Spool root, containing the todo, working and finished directories
    #[arg(long, global = true, env = "SPOOL_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a job to the spool and print its id
    Submit {
        #[arg(long, default_value = "")]
        name: String,
        /// Extra data stored with the job, as KEY=VALUE
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
        /// The program to run followed by its arguments
        #[arg(last = true, required = true)]
        arguments: Vec<String>,
    },
    /// Run jobs until the spool is empty, then exit
    Work {
        /// Number of jobs run at the same time
        #[arg(long)]
        workers: Option<u32>,
    },
    /// Keep polling the spool for jobs
    Serve {
        #[arg(long)]
        workers: Option<u32>,
    },
    /// Show every job of the spool
    Status,
    /// List the jobs of one section
    List {
        #[arg(value_parser = parse_section)]
        section: Section,
    },
    /// Print a job record
    Show { id: String },
    /// List jobs stuck in the working directory
    Orphans {
        #[arg(long, default_value_t = 0)]
        min_age_secs: i64,
    },
    /// Move a job from working back to todo
    Requeue { id: String },
    /// Delete a job file
    Remove {
        #[arg(value_parser = parse_section)]
        section: Section,
        id: String,
    },
}

fn parse_meta(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {value:?}"))
}

fn parse_section(value: &str) -> Result<Section, String> {
    value.parse().map_err(|err: SpoolError| err.to_string())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SpoolConfig::from_env()?;

    if let Some(root) = cli.root {
        config.root = root;
    }

    let queue = config.queue();

    match cli.command {
        Command::Submit {
            name,
            meta,
            arguments,
        } => {
            let meta = if meta.is_empty() {
                None
            } else {
                Some(
                    meta.into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect::<JobMeta>(),
                )
            };

            let id = queue.submit(&name, arguments, meta)?;
            println!("{id}");
        }
        Command::Work { workers } => {
            let number_of_workers = workers.unwrap_or(config.number_of_workers);

            let executed = if number_of_workers <= 1 {
                Worker::<Queue>::builder().queue(queue).build().run_until_idle()?
            } else {
                WorkerPool::<Queue>::builder()
                    .queue(queue)
                    .number_of_workers(number_of_workers)
                    .build()
                    .drain()?
            };

            println!("executed {executed} jobs");
        }
        Command::Serve { workers } => {
            let pool = WorkerPool::<Queue>::builder()
                .queue(queue)
                .sleep_params(config.sleep_params.clone())
                .number_of_workers(workers.unwrap_or(config.number_of_workers).max(1))
                .build();

            // runs until the process is killed
            pool.start()?.wait()?;
        }
        Command::Status => print!("{}", status_report(&queue)?),
        Command::List { section } => {
            for summary in queue.list_jobs(section)? {
                println!("{summary}");
            }
        }
        Command::Show { id } => {
            let id = JobId::from(id);

            match queue.find_job(&id)? {
                Some((section, record)) => {
                    println!("# {section}");
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                None => return Err(format!("job {id} not found").into()),
            }
        }
        Command::Orphans { min_age_secs } => {
            let min_age =
                chrono::Duration::try_seconds(min_age_secs).ok_or_else(|| SpoolError::Config {
                    var: "min-age-secs".to_string(),
                    value: min_age_secs.to_string(),
                })?;

            for summary in orphans(&queue, min_age)? {
                println!("{}  {summary}", summary.timestamp.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Command::Requeue { id } => {
            let path = queue.requeue_job(&JobId::from(id))?;
            println!("{}", path.display());
        }
        Command::Remove { section, id } => {
            let id = JobId::from(id);

            if !queue.remove_job(section, &id)? {
                return Err(format!("job {id} not found in {section}").into());
            }
        }
    }

    Ok(())
}
