use crate::error::SpoolError;
use crate::job::JobId;
use std::fmt;
use std::fs;
use std::fs::Metadata;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;
use typed_builder::TypedBuilder;

/// Extension of job files inside the spool.
pub const JOB_EXTENSION: &str = "job";

/// The three states a job file can be in.
///
/// A job file lives in exactly one section directory at a time and only
/// changes section through an atomic rename.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Section {
    /// The job is waiting to be claimed
    Todo,
    /// The job was claimed by a worker.
    ///
    /// The job stays here forever if the worker crashed while running it
    Working,
    /// The job was executed and its results are recorded
    Finished,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Todo, Section::Working, Section::Finished];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Section::Todo => "todo",
            Section::Working => "working",
            Section::Finished => "finished",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Section {
    type Err = SpoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "todo" => Ok(Section::Todo),
            "working" => Ok(Section::Working),
            "finished" | "done" => Ok(Section::Finished),
            other => Err(SpoolError::InvalidSection(other.to_string())),
        }
    }
}

/// A point-in-time view of one job file in a section.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SpoolEntry {
    pub path: PathBuf,
    pub section: Section,
    /// The change time of the file, which is updated by every rename.
    pub timestamp: SystemTime,
}

impl SpoolEntry {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub fn id(&self) -> JobId {
        JobId::from_path(&self.path)
    }
}

/// Directory-per-state storage rooted at a configured path.
///
/// ```text
/// <root>/todo/       pending jobs
/// <root>/working/    claimed jobs
/// <root>/finished/   completed jobs
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct SpoolStorage {
    #[builder(setter(into))]
    root: PathBuf,
}

impl SpoolStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn section_path(&self, section: Section) -> PathBuf {
        self.root.join(section.dir_name())
    }

    pub fn job_path(&self, section: Section, id: &JobId) -> PathBuf {
        self.section_path(section).join(id.file_name())
    }

    /// Returns the directory of a section, creating it and the spool root if
    /// they don't exist yet.
    ///
    /// Only producers create the root. Everything else requires it to exist.
    pub fn ensure_section(&self, section: Section) -> Result<PathBuf, SpoolError> {
        let path = self.section_path(section);

        fs::create_dir_all(&path).map_err(|err| SpoolError::io(&path, err))?;

        Ok(path)
    }

    /// Fails if the spool root is missing, e.g. when shared storage isn't
    /// mounted.
    pub fn check_root(&self) -> Result<(), SpoolError> {
        match fs::metadata(&self.root) {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => Err(SpoolError::io(
                &self.root,
                IoError::new(ErrorKind::InvalidInput, "spool root is not a directory"),
            )),
            Err(err) => Err(SpoolError::io(&self.root, err)),
        }
    }

    /// Returns the directory of a section inside an existing root, creating
    /// only the section directory.
    fn section_dir(&self, section: Section) -> Result<PathBuf, SpoolError> {
        self.check_root()?;

        let path = self.section_path(section);

        match fs::create_dir(&path) {
            Ok(()) => Ok(path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(path),
            Err(err) => Err(SpoolError::io(&path, err)),
        }
    }

    /// Lists the regular, non hidden files of a section, oldest first.
    ///
    /// Never creates anything: a missing section is empty, a missing root is
    /// an error. Entries may disappear before the caller acts on them.
    pub fn list_section(&self, section: Section) -> Result<Vec<SpoolEntry>, SpoolError> {
        self.check_root()?;

        let dir = self.section_path(section);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SpoolError::io(&dir, err)),
        };

        let mut entries = Vec::new();

        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|err| SpoolError::io(&dir, err))?;
            let path = dir_entry.path();

            if is_hidden(&path) {
                continue;
            }

            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                // claimed or removed by someone else in the meantime
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(SpoolError::io(&path, err)),
            };

            if !metadata.is_file() {
                continue;
            }

            entries.push(SpoolEntry {
                path,
                section,
                timestamp: change_time(&metadata),
            });
        }

        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(entries)
    }

    /// Atomically moves a job file into `working`, keeping its file name.
    ///
    /// Returns `Ok(None)` if the file is already gone, which means another
    /// worker claimed it first.
    pub fn claim(&self, path: &Path) -> Result<Option<PathBuf>, SpoolError> {
        self.move_to(path, Section::Working)
    }

    /// Atomically moves a job file into another section, keeping its file name.
    ///
    /// Returns `Ok(None)` if the source doesn't exist anymore.
    pub fn move_to(&self, path: &Path, section: Section) -> Result<Option<PathBuf>, SpoolError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| SpoolError::io(path, ErrorKind::InvalidInput.into()))?;

        let target = self.section_dir(section)?.join(file_name);

        match fs::rename(path, &target) {
            Ok(()) => Ok(Some(target)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SpoolError::io(path, err)),
        }
    }

    /// Writes `contents` to a hidden temp file inside the section and then
    /// renames it to its final name, so readers never see a partial file.
    ///
    /// An existing file with the same name is never replaced. The spool root
    /// must already exist.
    pub fn publish(
        &self,
        section: Section,
        file_name: &str,
        contents: &[u8],
    ) -> Result<PathBuf, SpoolError> {
        let dir = self.section_dir(section)?;
        let target = dir.join(file_name);

        let mut temp_file = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|err| SpoolError::io(&dir, err))?;

        temp_file
            .write_all(contents)
            .and_then(|()| temp_file.as_file().sync_all())
            .map_err(|err| SpoolError::io(temp_file.path(), err))?;

        temp_file
            .persist_noclobber(&target)
            .map_err(|err| SpoolError::Persist {
                path: target.clone(),
                source: err.error,
            })?;

        Ok(target)
    }

    /// Finds the file of a job in a section, whatever its extension.
    ///
    /// `id` matches either the file stem or the whole file name.
    pub fn locate(&self, section: Section, id: &JobId) -> Result<Option<PathBuf>, SpoolError> {
        let default_path = self.job_path(section, id);

        if default_path.is_file() {
            return Ok(Some(default_path));
        }

        Ok(self
            .list_section(section)?
            .into_iter()
            .find(|entry| entry.id() == *id || entry.file_name() == Some(id.as_str()))
            .map(|entry| entry.path))
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, SpoolError> {
        fs::read(path).map_err(|err| SpoolError::io(path, err))
    }

    /// Removes a job file. Returns `false` if it was already gone.
    pub fn remove(&self, path: &Path) -> Result<bool, SpoolError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SpoolError::io(path, err)),
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(true, |name| name.starts_with('.'))
}

#[cfg(unix)]
fn change_time(metadata: &Metadata) -> SystemTime {
    use std::os::unix::fs::MetadataExt;
    use std::time::Duration;
    use std::time::UNIX_EPOCH;

    let nanos = Duration::from_nanos(metadata.ctime_nsec().max(0) as u64);
    let secs = metadata.ctime();

    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

#[cfg(not(unix))]
fn change_time(metadata: &Metadata) -> SystemTime {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(std::time::UNIX_EPOCH)
}
