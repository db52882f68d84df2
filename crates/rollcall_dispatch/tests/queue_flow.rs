//! Intake-to-completion flow through the dispatcher.

use rollcall_db::RollcallDb;
use rollcall_dispatch::{enqueue_file, Dispatcher};
use rollcall_protocol::types::JobStatus;
use rollcall_protocol::EngineConfig;
use std::path::PathBuf;
use tempfile::TempDir;

const HEADER: &str =
    "employee_number,first_name,last_name,email,department,salary,currency,country_code,start_date";

fn write_csv(dir: &TempDir, name: &str, data_rows: &[&str]) -> PathBuf {
    let mut contents = String::from(HEADER);
    contents.push('\n');
    for row in data_rows {
        contents.push_str(row);
        contents.push('\n');
    }
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn enqueued_file_imports_to_completion() {
    let dir = TempDir::new().unwrap();
    let db = RollcallDb::open_memory().await.unwrap();
    let config = EngineConfig {
        upload_dir: dir.path().join("uploads"),
        ..EngineConfig::default()
    };

    let path = write_csv(
        &dir,
        "staff.csv",
        &[
            "E1,Ann,Lee,a@x.co,Eng,1000,USD,KE,2024-01-01",
            "E2,Bo,Ng,b@x.co,,,,,",
        ],
    );
    let job = enqueue_file(&db, &config, &path).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let dispatcher = Dispatcher::new(db.clone(), config);
    let finished = dispatcher.drain_job(&job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.processed_rows, 2);
    assert_eq!(finished.successful_rows, 2);
    assert_eq!(finished.attempts, 1);
    assert_eq!(db.count_employees().await.unwrap(), 2);

    // Progress is served through the dispatcher's cache after completion.
    let snapshot = dispatcher
        .cache()
        .get(&db, &job.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.percentage(), 100.0);
}

#[tokio::test]
async fn vanished_file_fails_without_retries() {
    let dir = TempDir::new().unwrap();
    let db = RollcallDb::open_memory().await.unwrap();
    let config = EngineConfig {
        upload_dir: dir.path().join("uploads"),
        ..EngineConfig::default()
    };

    let path = write_csv(&dir, "staff.csv", &["E1,Ann,Lee,a@x.co,,,,,"]);
    let job = enqueue_file(&db, &config, &path).await.unwrap();
    std::fs::remove_file(&job.file_path).unwrap();

    let dispatcher = Dispatcher::new(db.clone(), config);
    let finished = dispatcher.drain_job(&job.id).await.unwrap();

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.attempts, 1);
    assert!(finished
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("missing")));
}

#[tokio::test]
async fn queue_claims_are_fifo_within_a_class() {
    let dir = TempDir::new().unwrap();
    let db = RollcallDb::open_memory().await.unwrap();
    let config = EngineConfig {
        upload_dir: dir.path().join("uploads"),
        ..EngineConfig::default()
    };

    let first_path = write_csv(&dir, "first.csv", &["E1,Ann,Lee,a@x.co,,,,,"]);
    let second_path = write_csv(&dir, "second.csv", &["E2,Bo,Ng,b@x.co,,,,,"]);
    let first = enqueue_file(&db, &config, &first_path).await.unwrap();
    // Keep creation timestamps distinct for deterministic FIFO order.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = enqueue_file(&db, &config, &second_path).await.unwrap();

    let now = chrono::Utc::now().timestamp();
    let claimed = db
        .claim_due_job(first.queue_class, now, 3_600, 7_200)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first.id);

    let claimed_next = db
        .claim_due_job(second.queue_class, now, 3_600, 7_200)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed_next.id, second.id);
}
