use crate::error::SpoolError;
use crate::queue::Queue;
use crate::SleepParams;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_ROOT: &str = "spool/jobs";

/// Where the spool lives and how its workers behave.
///
/// Nothing is read from global state once this is built, so several spools
/// can be used side by side.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SpoolConfig {
    #[builder(default = PathBuf::from(DEFAULT_ROOT), setter(into))]
    pub root: PathBuf,
    #[builder(default, setter(into))]
    pub sleep_params: SleepParams,
    #[builder(default = 1, setter(into))]
    pub number_of_workers: u32,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SpoolConfig {
    /// Reads the configuration from the environment, after loading a `.env`
    /// file if there is one.
    ///
    /// | variable | default |
    /// |---|---|
    /// | `SPOOL_ROOT` | `spool/jobs` |
    /// | `SPOOL_WORKERS` | `1` |
    /// | `SPOOL_MIN_SLEEP_MS` | `500` |
    /// | `SPOOL_MAX_SLEEP_MS` | `15000` |
    /// | `SPOOL_SLEEP_STEP_MS` | `500` |
    pub fn from_env() -> Result<Self, SpoolError> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SpoolError> {
        let root = lookup("SPOOL_ROOT")
            .filter(|root| !root.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));

        let number_of_workers = parse_var(&lookup, "SPOOL_WORKERS", 1_u32)?;

        let sleep_params = SleepParams::new(
            Duration::from_millis(parse_var(&lookup, "SPOOL_MIN_SLEEP_MS", 500_u64)?),
            Duration::from_millis(parse_var(&lookup, "SPOOL_MAX_SLEEP_MS", 15_000_u64)?),
            Duration::from_millis(parse_var(&lookup, "SPOOL_SLEEP_STEP_MS", 500_u64)?),
        );

        Ok(Self {
            root,
            sleep_params,
            number_of_workers,
        })
    }

    pub fn queue(&self) -> Queue {
        Queue::new(&self.root)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, SpoolError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| SpoolError::Config {
            var: var.to_string(),
            value,
        }),
    }
}
