use crate::error::SpoolError;
use crate::job::JobId;
use crate::job::JobMeta;
use crate::job::JobRecord;
use crate::job::JobSummary;
use crate::storage::Section;
use crate::storage::SpoolEntry;
use crate::storage::SpoolStorage;
use chrono::Utc;
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use typed_builder::TypedBuilder;

#[cfg(test)]
mod queue_tests;

/// A job moved into `working` by this process.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClaimedJob {
    pub id: JobId,
    /// Location of the job file inside `working`.
    pub path: PathBuf,
    pub record: JobRecord,
}

impl ClaimedJob {
    /// The name the job file had in `todo`, kept in every section.
    pub fn file_name(&self) -> Result<&str, SpoolError> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SpoolError::io(&self.path, ErrorKind::InvalidInput.into()))
    }
}

/// Operations on a job spool.
///
/// The only mutual exclusion between concurrent workers is the atomic
/// rename done when claiming a job, so every implementation must keep
/// "claim" a single rename.
pub trait Queueable {
    /// Creates a new job in `todo` and returns its id.
    ///
    /// Submitting the same command line twice creates two jobs.
    fn submit(
        &self,
        name: &str,
        arguments: Vec<String>,
        meta: Option<JobMeta>,
    ) -> Result<JobId, SpoolError>;

    /// Publishes a prepared record into `todo`.
    fn insert_job(&self, record: &JobRecord) -> Result<JobId, SpoolError>;

    /// Claims the oldest job in `todo`.
    ///
    /// Returns `Ok(None)` when there's nothing left to claim. Losing a claim
    /// race against another worker is not an error.
    fn fetch_and_claim_job(&self) -> Result<Option<ClaimedJob>, SpoolError>;

    /// Writes the executed record to `finished` and drops the `working` entry.
    fn finish_job(&self, job: &ClaimedJob, record: &JobRecord) -> Result<PathBuf, SpoolError>;

    /// Summaries of the jobs of a section, oldest first. Never changes the spool.
    fn list_jobs(&self, section: Section) -> Result<Vec<JobSummary>, SpoolError>;

    fn find_job(&self, id: &JobId) -> Result<Option<(Section, JobRecord)>, SpoolError>;

    /// Moves an orphan from `working` back to `todo`.
    fn requeue_job(&self, id: &JobId) -> Result<PathBuf, SpoolError>;

    /// Deletes a job file. Returns `false` if it wasn't there.
    ///
    /// Removing a `todo` job races with workers claiming it.
    fn remove_job(&self, section: Section, id: &JobId) -> Result<bool, SpoolError>;
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct Queue {
    #[builder(setter(into))]
    pub storage: SpoolStorage,
}

impl Queueable for Queue {
    fn submit(
        &self,
        name: &str,
        arguments: Vec<String>,
        meta: Option<JobMeta>,
    ) -> Result<JobId, SpoolError> {
        let record = JobRecord::builder()
            .name(name)
            .arguments(arguments)
            .meta(meta)
            .submitted_at(Utc::now())
            .build();

        self.insert_job(&record)
    }

    fn insert_job(&self, record: &JobRecord) -> Result<JobId, SpoolError> {
        if record.arguments.is_empty() {
            return Err(SpoolError::EmptyArguments);
        }

        let id = JobId::generate();

        self.storage.ensure_section(Section::Todo)?;
        self.storage
            .publish(Section::Todo, &id.file_name(), &record.to_json()?)?;

        info!("submitted job {} '{}'", id, record.name);

        Ok(id)
    }

    fn fetch_and_claim_job(&self) -> Result<Option<ClaimedJob>, SpoolError> {
        loop {
            let todo = self.storage.list_section(Section::Todo)?;

            let oldest = match todo.first() {
                Some(entry) => entry,
                None => return Ok(None),
            };

            match self.storage.claim(&oldest.path)? {
                Some(path) => {
                    let id = oldest.id();
                    let record = Self::read_record(&path)?;

                    return Ok(Some(ClaimedJob { id, path, record }));
                }
                None => {
                    debug!("job {} was claimed by another worker", oldest.id());
                }
            }
        }
    }

    fn finish_job(&self, job: &ClaimedJob, record: &JobRecord) -> Result<PathBuf, SpoolError> {
        let finished = self
            .storage
            .publish(Section::Finished, job.file_name()?, &record.to_json()?)?;

        self.storage.remove(&job.path)?;

        Ok(finished)
    }

    fn list_jobs(&self, section: Section) -> Result<Vec<JobSummary>, SpoolError> {
        let entries = self.storage.list_section(section)?;
        let mut summaries = Vec::with_capacity(entries.len());

        for entry in entries {
            if let Some(summary) = Self::summarize(&entry)? {
                summaries.push(summary);
            }
        }

        Ok(summaries)
    }

    fn find_job(&self, id: &JobId) -> Result<Option<(Section, JobRecord)>, SpoolError> {
        for section in Section::ALL {
            let path = match self.storage.locate(section, id)? {
                Some(path) => path,
                None => continue,
            };

            // the job may move on between locating and reading it
            if let Some(record) = Self::try_read_record(&path)? {
                return Ok(Some((section, record)));
            }
        }

        Ok(None)
    }

    fn requeue_job(&self, id: &JobId) -> Result<PathBuf, SpoolError> {
        let not_found = || SpoolError::JobNotFound {
            id: id.clone(),
            section: Section::Working,
        };

        let working = self
            .storage
            .locate(Section::Working, id)?
            .ok_or_else(not_found)?;

        match self.storage.move_to(&working, Section::Todo)? {
            Some(path) => {
                info!("requeued job {id}");
                Ok(path)
            }
            None => Err(not_found()),
        }
    }

    fn remove_job(&self, section: Section, id: &JobId) -> Result<bool, SpoolError> {
        let removed = match self.storage.locate(section, id)? {
            Some(path) => self.storage.remove(&path)?,
            None => false,
        };

        if removed {
            info!("removed job {id} from {section}");
        }

        Ok(removed)
    }
}

impl Queue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::builder().storage(SpoolStorage::new(root)).build()
    }

    pub fn read_record(path: &Path) -> Result<JobRecord, SpoolError> {
        Self::try_read_record(path)?
            .ok_or_else(|| SpoolError::io(path, ErrorKind::NotFound.into()))
    }

    /// Reads and parses a job file, `Ok(None)` if the file doesn't exist.
    fn try_read_record(path: &Path) -> Result<Option<JobRecord>, SpoolError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SpoolError::io(path, err)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SpoolError::MalformedJob {
                path: path.to_path_buf(),
                source,
            })
    }

    fn summarize(entry: &SpoolEntry) -> Result<Option<JobSummary>, SpoolError> {
        match Self::try_read_record(&entry.path) {
            Ok(Some(record)) => Ok(Some(JobSummary::new(
                entry.id(),
                entry.section,
                &record,
                entry.timestamp,
            ))),
            // moved on since the listing was taken
            Ok(None) => Ok(None),
            Err(SpoolError::MalformedJob { path, source }) => {
                warn!("malformed job file {}: {}", path.display(), source);

                Ok(Some(JobSummary {
                    id: entry.id(),
                    section: entry.section,
                    name: String::new(),
                    exit_code: None,
                    error: Some(format!("malformed job file: {source}")),
                    timestamp: entry.timestamp.into(),
                }))
            }
            Err(err) => Err(err),
        }
    }
}
