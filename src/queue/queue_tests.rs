use super::ClaimedJob;
use super::Queue;
use super::Queueable;
use crate::error::SpoolError;
use crate::job::JobId;
use crate::job::JobMeta;
use crate::job::JobRecord;
use crate::storage::Section;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

fn arguments(program: &str) -> Vec<String> {
    vec![program.to_string(), "--flag".to_string()]
}

fn queue() -> (tempfile::TempDir, Queue) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("jobs");
    fs::create_dir(&root).unwrap();

    let queue = Queue::new(root);

    (dir, queue)
}

fn finish(queue: &Queue, job: &ClaimedJob, exit_code: i32) {
    let mut record = job.record.clone();
    record.exit_code = Some(exit_code);
    record.stdout = Some(String::new());
    record.stderr = Some(String::new());

    queue.finish_job(job, &record).unwrap();
}

#[test]
fn submit_creates_spool_and_publishes_job() {
    let (_dir, queue) = queue();

    let id = queue.submit("render", arguments("maya"), None).unwrap();

    let path = queue.storage.job_path(Section::Todo, &id);
    assert!(path.is_file());

    let record: JobRecord = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    assert_eq!("render", record.name);
    assert_eq!(arguments("maya"), record.arguments);
    assert_eq!(None, record.meta);
    assert!(record.submitted_at.is_some());
    assert!(!record.is_executed());
}

#[test]
fn submit_creates_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("spool").join("jobs");
    let queue = Queue::new(&root);

    let id = queue.submit("first", arguments("solve"), None).unwrap();

    assert!(queue.storage.job_path(Section::Todo, &id).is_file());
}

#[test]
fn missing_root_is_reported_and_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Queue::new(dir.path().join("unmounted").join("jobs"));

    assert!(matches!(
        queue.list_jobs(Section::Todo),
        Err(SpoolError::Io { .. })
    ));
    assert!(matches!(
        queue.fetch_and_claim_job(),
        Err(SpoolError::Io { .. })
    ));
    assert!(queue.find_job(&JobId::from("missing")).is_err());
    assert!(queue.requeue_job(&JobId::from("missing")).is_err());

    assert!(!dir.path().join("unmounted").exists());
}

#[test]
fn job_file_keeps_its_name_in_every_section() {
    let (_dir, queue) = queue();
    let todo = queue.storage.ensure_section(Section::Todo).unwrap();

    fs::write(todo.join("tmpab12cd.json"), br#"{"arguments": ["true"]}"#).unwrap();

    let claimed = queue.fetch_and_claim_job().unwrap().unwrap();
    let id = JobId::from("tmpab12cd");

    assert_eq!(id, claimed.id);
    assert_eq!(
        queue.storage.section_path(Section::Working).join("tmpab12cd.json"),
        claimed.path
    );

    queue.requeue_job(&id).unwrap();
    assert!(todo.join("tmpab12cd.json").is_file());

    let claimed = queue.fetch_and_claim_job().unwrap().unwrap();
    finish(&queue, &claimed, 0);

    let finished: Vec<String> = fs::read_dir(queue.storage.section_path(Section::Finished))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();

    assert_eq!(vec!["tmpab12cd.json".to_string()], finished);

    let (section, record) = queue.find_job(&id).unwrap().unwrap();
    assert_eq!(Section::Finished, section);
    assert_eq!(Some(0), record.exit_code);

    assert!(queue.remove_job(Section::Finished, &id).unwrap());
    assert_eq!(None, queue.find_job(&id).unwrap());
}

#[test]
fn jobs_differing_only_by_extension_finish_separately() {
    let (_dir, queue) = queue();
    let todo = queue.storage.ensure_section(Section::Todo).unwrap();

    fs::write(todo.join("shot.job"), br#"{"arguments": ["true"]}"#).unwrap();
    thread::sleep(Duration::from_millis(20));
    fs::write(todo.join("shot.json"), br#"{"arguments": ["true"]}"#).unwrap();

    for exit_code in [1, 2] {
        let claimed = queue.fetch_and_claim_job().unwrap().unwrap();
        finish(&queue, &claimed, exit_code);
    }

    let finished = queue.storage.section_path(Section::Finished);
    assert!(finished.join("shot.job").is_file());
    assert!(finished.join("shot.json").is_file());
    assert!(queue.list_jobs(Section::Working).unwrap().is_empty());
}

#[test]
fn submit_twice_creates_two_jobs() {
    let (_dir, queue) = queue();

    let first = queue.submit("same", arguments("solve"), None).unwrap();
    let second = queue.submit("same", arguments("solve"), None).unwrap();

    assert_ne!(first, second);
    assert_eq!(2, queue.list_jobs(Section::Todo).unwrap().len());
}

#[test]
fn submit_rejects_empty_arguments() {
    let (_dir, queue) = queue();

    let result = queue.submit("nothing", vec![], None);

    assert!(matches!(result, Err(SpoolError::EmptyArguments)));
    assert!(queue.list_jobs(Section::Todo).unwrap().is_empty());
}

#[test]
fn claims_oldest_job_first() {
    let (_dir, queue) = queue();

    let first = queue.submit("first", arguments("a"), None).unwrap();
    thread::sleep(Duration::from_millis(20));
    let second = queue.submit("second", arguments("b"), None).unwrap();

    let claimed = queue.fetch_and_claim_job().unwrap().unwrap();

    assert_eq!(first, claimed.id);
    assert_eq!("first", claimed.record.name);
    assert_eq!(queue.storage.job_path(Section::Working, &first), claimed.path);
    assert!(claimed.path.is_file());

    let todo = queue.list_jobs(Section::Todo).unwrap();
    assert_eq!(1, todo.len());
    assert_eq!(second, todo[0].id);
}

#[test]
fn fetch_returns_none_on_empty_spool() {
    let (_dir, queue) = queue();

    assert_eq!(None, queue.fetch_and_claim_job().unwrap());
    assert_eq!(None, queue.fetch_and_claim_job().unwrap());
}

#[test]
fn finish_moves_record_to_finished() {
    let (_dir, queue) = queue();

    let mut meta = JobMeta::new();
    meta.insert("c3d".to_string(), serde_json::json!("take.c3d"));

    let id = queue
        .submit("solve", arguments("peelsolve"), Some(meta.clone()))
        .unwrap();
    let claimed = queue.fetch_and_claim_job().unwrap().unwrap();

    finish(&queue, &claimed, 3);

    assert!(!claimed.path.exists());

    let (section, record) = queue.find_job(&id).unwrap().unwrap();
    assert_eq!(Section::Finished, section);
    assert_eq!(Some(3), record.exit_code);
    assert_eq!(Some(meta), record.meta);
    assert_eq!(arguments("peelsolve"), record.arguments);

    let finished = queue.list_jobs(Section::Finished).unwrap();
    assert_eq!(1, finished.len());
    assert_eq!(Some(3), finished[0].exit_code);
}

#[test]
fn malformed_job_is_claimed_and_reported() {
    let (_dir, queue) = queue();
    let todo = queue.storage.ensure_section(Section::Todo).unwrap();

    fs::write(todo.join("garbage.job"), b"not json at all").unwrap();

    match queue.fetch_and_claim_job() {
        Err(SpoolError::MalformedJob { path, .. }) => {
            assert_eq!(
                queue.storage.job_path(Section::Working, &JobId::from("garbage")),
                path
            );
            assert!(path.is_file());
        }
        other => panic!("expected a malformed job error, got {other:?}"),
    }

    assert_eq!(None, queue.fetch_and_claim_job().unwrap());
}

#[test]
fn find_job_returns_none_for_unknown_id() {
    let (_dir, queue) = queue();

    assert_eq!(None, queue.find_job(&JobId::from("missing")).unwrap());
}

#[test]
fn requeue_moves_orphan_back_to_todo() {
    let (_dir, queue) = queue();

    let id = queue.submit("crashed", arguments("solve"), None).unwrap();
    queue.fetch_and_claim_job().unwrap().unwrap();

    assert_eq!(1, queue.list_jobs(Section::Working).unwrap().len());

    let path = queue.requeue_job(&id).unwrap();

    assert_eq!(queue.storage.job_path(Section::Todo, &id), path);
    assert!(queue.list_jobs(Section::Working).unwrap().is_empty());

    let claimed = queue.fetch_and_claim_job().unwrap().unwrap();
    assert_eq!(id, claimed.id);
}

#[test]
fn requeue_of_unknown_job_fails() {
    let (_dir, queue) = queue();

    let result = queue.requeue_job(&JobId::from("missing"));

    assert!(matches!(
        result,
        Err(SpoolError::JobNotFound {
            section: Section::Working,
            ..
        })
    ));
}

#[test]
fn remove_cancels_pending_job() {
    let (_dir, queue) = queue();

    let id = queue.submit("cancel me", arguments("solve"), None).unwrap();

    assert!(queue.remove_job(Section::Todo, &id).unwrap());
    assert!(!queue.remove_job(Section::Todo, &id).unwrap());
    assert_eq!(None, queue.fetch_and_claim_job().unwrap());
}

#[test]
fn list_jobs_does_not_change_the_spool() {
    let (_dir, queue) = queue();

    queue.submit("a", arguments("a"), None).unwrap();
    queue.submit("b", arguments("b"), None).unwrap();

    let before = queue.list_jobs(Section::Todo).unwrap();
    let after = queue.list_jobs(Section::Todo).unwrap();

    assert_eq!(before, after);
    assert!(queue.list_jobs(Section::Working).unwrap().is_empty());
    assert!(queue.list_jobs(Section::Finished).unwrap().is_empty());
}

#[test]
fn concurrent_claims_never_hand_out_a_job_twice() {
    let (_dir, queue) = queue();
    let number_of_jobs = 60;
    let number_of_claimers = 6;

    let submitted: HashSet<JobId> = (0..number_of_jobs)
        .map(|number| {
            queue
                .submit(&format!("job {number}"), arguments("x"), None)
                .unwrap()
        })
        .collect();

    let barrier = Arc::new(Barrier::new(number_of_claimers));

    let handles: Vec<_> = (0..number_of_claimers)
        .map(|_| {
            let queue = queue.clone();
            let barrier = barrier.clone();

            thread::spawn(move || {
                barrier.wait();

                let mut claimed = Vec::new();
                while let Some(job) = queue.fetch_and_claim_job().unwrap() {
                    finish(&queue, &job, 0);
                    claimed.push(job.id);
                }
                claimed
            })
        })
        .collect();

    let mut all_claims = Vec::new();
    for handle in handles {
        all_claims.extend(handle.join().unwrap());
    }

    let unique: HashSet<JobId> = all_claims.iter().cloned().collect();

    assert_eq!(number_of_jobs, all_claims.len());
    assert_eq!(submitted, unique);
    assert_eq!(
        number_of_jobs,
        queue.list_jobs(Section::Finished).unwrap().len()
    );
}
