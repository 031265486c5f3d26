use crate::error::SpoolError;
use crate::job::JobSummary;
use crate::queue::Queueable;
use crate::storage::Section;
use chrono::Duration;
use chrono::Utc;
use std::fmt::Write;

fn label(section: Section) -> &'static str {
    match section {
        Section::Todo => "TODO   ",
        Section::Working => "WORKING",
        Section::Finished => "DONE   ",
    }
}

/// Renders every job of the spool, one line each, grouped by section.
pub fn status_report(queue: &dyn Queueable) -> Result<String, SpoolError> {
    let mut report = String::new();

    for section in Section::ALL {
        for summary in queue.list_jobs(section)? {
            // writing into a String can't fail
            let _ = writeln!(report, "{} {}", label(section), summary);
        }
    }

    Ok(report)
}

/// Jobs that have been sitting in `working` for at least `min_age`.
///
/// A worker that crashed leaves its job here forever; nothing moves it out
/// except an operator. An age reaching past the representable dates matches
/// nothing, a negative one that far matches everything.
pub fn orphans(queue: &dyn Queueable, min_age: Duration) -> Result<Vec<JobSummary>, SpoolError> {
    let working = queue.list_jobs(Section::Working)?;

    let cutoff = match Utc::now().checked_sub_signed(min_age) {
        Some(cutoff) => cutoff,
        None if min_age > Duration::zero() => return Ok(Vec::new()),
        None => return Ok(working),
    };

    Ok(working
        .into_iter()
        .filter(|summary| summary.timestamp <= cutoff)
        .collect())
}
