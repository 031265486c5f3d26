use crate::storage::Section;
use crate::storage::JOB_EXTENSION;
use chrono::DateTime;
use chrono::Utc;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Free-form data a producer wants kept alongside a job.
pub type JobMeta = BTreeMap<String, serde_json::Value>;

/// Identifier of a job, which is also the stem of its spool file name.
///
/// Generated ids start with the UTC submission time, so they sort in
/// submission order.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
        let suffix = Uuid::new_v4().simple().to_string();

        Self(format!("{timestamp}-{}", &suffix[..8]))
    }

    /// Derives the id from a spool file path by stripping the extension.
    pub fn from_path(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self(stem)
    }

    pub fn file_name(&self) -> String {
        format!("{}.{JOB_EXTENSION}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.strip_suffix(".job").unwrap_or(value).to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// One unit of work: the command line of an external program plus
/// what was captured when it ran.
///
/// The output fields stay empty until a worker executed the job. After
/// that the record is written once to `finished` and never changes.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct JobRecord {
    #[serde(default)]
    #[builder(default, setter(into))]
    pub name: String,
    /// `arguments[0]` is the program to run.
    #[builder(setter(into))]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub meta: Option<JobMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "out", skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub stdout: Option<String>,
    #[serde(default, alias = "err", skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub stderr: Option<String>,
    #[serde(default, alias = "returncode", skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub exit_code: Option<i32>,
    /// Set when the program couldn't be started or was killed by a signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn is_executed(&self) -> bool {
        self.finished_at.is_some() || self.exit_code.is_some() || self.error.is_some()
    }

    /// The command line joined by spaces, for logs.
    pub fn command_line(&self) -> String {
        self.arguments.join(" ")
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

/// What the inspection calls report about one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub id: JobId,
    pub section: Section,
    pub name: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// When the file entered its current section.
    pub timestamp: DateTime<Utc>,
}

impl JobSummary {
    pub fn new(
        id: JobId,
        section: Section,
        record: &JobRecord,
        timestamp: impl Into<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            section,
            name: record.name.clone(),
            exit_code: record.exit_code,
            error: record.error.clone(),
            timestamp: timestamp.into(),
        }
    }
}

/// One line per job: id, name and the exit code if there is one.
impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match (self.exit_code, &self.error) {
            (Some(code), _) => code.to_string(),
            (None, Some(_)) => "error".to_string(),
            (None, None) => String::new(),
        };

        write!(f, "{:>24}  {:>30}  {:>30}", self.id, self.name, code)
    }
}
