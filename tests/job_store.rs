use osf_archiver::core::{
    AggregateStatResult, ArchiveStatus, JobStatus, NewArchiveJob, User,
};
use osf_archiver::db;
use osf_archiver::error::ArchiverError;
use serde_json::json;

fn new_job(dst: &str, addons: &[&str]) -> NewArchiveJob {
    NewArchiveJob {
        src_node: "proj1".to_string(),
        dst_node: dst.to_string(),
        initiator: User {
            id: "user1".to_string(),
            cookie: "cookie1".to_string(),
        },
        addons: addons.iter().map(|a| a.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_create_starts_every_target_pending() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage", "github"]))
        .await
        .unwrap();

    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Initiated);
    assert!(!job.done);
    assert_eq!(job.initiator_cookie, "cookie1");
    assert_eq!(
        db::jobs::target_addons(&conn, &job_id).await.unwrap(),
        vec!["osfstorage", "github"]
    );
    assert!(
        job.targets
            .iter()
            .all(|t| t.status == ArchiveStatus::Pending && t.errors.is_empty())
    );

    let found = db::jobs::find_by_destination(&conn, "reg1").await.unwrap();
    assert_eq!(found.map(|j| j.id), Some(job_id));
}

#[tokio::test]
async fn test_missing_job_is_not_found() {
    let conn = db::init_in_memory().await.unwrap();
    assert!(db::jobs::get(&conn, "nope").await.unwrap().is_none());
    assert!(matches!(
        db::jobs::load(&conn, "nope").await,
        Err(ArchiverError::JobNotFound(_))
    ));
    assert!(matches!(
        db::jobs::reset(&conn, "nope").await,
        Err(ArchiverError::JobNotFound(_))
    ));
}

#[tokio::test]
async fn test_failure_is_sticky() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();

    let failed = db::jobs::update_target(
        &conn,
        &job_id,
        "osfstorage",
        ArchiveStatus::NetworkError,
        Some(vec![json!({"error": "timeout"})]),
        None,
    )
    .await
    .unwrap();
    assert!(failed);

    let applied = db::jobs::update_target(
        &conn,
        &job_id,
        "osfstorage",
        ArchiveStatus::Success,
        None,
        None,
    )
    .await
    .unwrap();
    assert!(!applied);

    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    assert_eq!(
        job.target("osfstorage").unwrap().status,
        ArchiveStatus::NetworkError
    );
}

#[tokio::test]
async fn test_errors_append_without_duplicates() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["dropbox"]))
        .await
        .unwrap();

    for error in [json!({"error": "a"}), json!({"error": "b"}), json!({"error": "a"})] {
        db::jobs::update_target(
            &conn,
            &job_id,
            "dropbox",
            ArchiveStatus::Checking,
            Some(vec![error]),
            None,
        )
        .await
        .unwrap();
    }

    let targets = db::jobs::target_info(&conn, &job_id).await.unwrap();
    assert_eq!(
        targets[0].errors,
        vec![json!({"error": "a"}), json!({"error": "b"})]
    );

    // Repeating a status does not add a transition.
    let history = db::jobs::target_history(&conn, &job_id, "dropbox")
        .await
        .unwrap();
    assert_eq!(
        history,
        vec![ArchiveStatus::Pending, ArchiveStatus::Checking]
    );
}

#[tokio::test]
async fn test_stat_result_is_kept_across_updates() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();
    let stat = AggregateStatResult::new(
        "proj1:osfstorage",
        "osfstorage",
        vec![AggregateStatResult::file("/f1", "a.txt", 42)],
    );

    db::jobs::update_target(
        &conn,
        &job_id,
        "osfstorage",
        ArchiveStatus::Pending,
        None,
        Some(&stat),
    )
    .await
    .unwrap();
    db::jobs::update_target(&conn, &job_id, "osfstorage", ArchiveStatus::Sending, None, None)
        .await
        .unwrap();

    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    let target = job.target("osfstorage").unwrap();
    assert_eq!(target.status, ArchiveStatus::Sending);
    assert_eq!(target.stat_result.as_ref(), Some(&stat));
}

#[tokio::test]
async fn test_unknown_target_is_an_error() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();

    let res = db::jobs::update_target(
        &conn,
        &job_id,
        "github",
        ArchiveStatus::Checking,
        None,
        None,
    )
    .await;
    assert!(res.is_err());
}

#[tokio::test]
async fn test_job_finishes_once() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();

    assert!(db::jobs::mark_failed(&conn, &job_id).await.unwrap());
    assert!(!db::jobs::mark_failed(&conn, &job_id).await.unwrap());
    assert!(!db::jobs::mark_succeeded(&conn, &job_id).await.unwrap());

    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failure);
    assert!(job.done);
}

#[tokio::test]
async fn test_reset_restores_pending() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();
    db::jobs::update_target(
        &conn,
        &job_id,
        "osfstorage",
        ArchiveStatus::UncaughtError,
        Some(vec![json!({"error": "boom"})]),
        None,
    )
    .await
    .unwrap();
    db::jobs::mark_failed(&conn, &job_id).await.unwrap();

    db::jobs::reset(&conn, &job_id).await.unwrap();

    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Initiated);
    let target = job.target("osfstorage").unwrap();
    assert_eq!(target.status, ArchiveStatus::Pending);
    assert!(target.errors.is_empty());
    assert!(target.stat_result.is_none());

    let history = db::jobs::target_history(&conn, &job_id, "osfstorage")
        .await
        .unwrap();
    assert_eq!(
        history,
        vec![
            ArchiveStatus::Pending,
            ArchiveStatus::UncaughtError,
            ArchiveStatus::Pending,
        ]
    );
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let conn = db::init_in_memory().await.unwrap();
    let first = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();
    let second = db::jobs::create(&conn, new_job("reg2", &["osfstorage"]))
        .await
        .unwrap();
    db::jobs::mark_succeeded(&conn, &first).await.unwrap();

    let all = db::jobs::list(&conn, 10, 0, None).await.unwrap();
    assert_eq!(all.len(), 2);

    let running = db::jobs::list(&conn, 10, 0, Some(JobStatus::Initiated))
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, second);
}

#[tokio::test]
async fn test_one_job_per_registration() {
    let conn = db::init_in_memory().await.unwrap();
    db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();
    assert!(
        db::jobs::create(&conn, new_job("reg1", &["github"]))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archiver.db");

    let job_id = {
        let conn = db::init(&path).await.unwrap();
        let id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
            .await
            .unwrap();
        db::jobs::update_target(&conn, &id, "osfstorage", ArchiveStatus::Sent, None, None)
            .await
            .unwrap();
        id
    };

    let conn = db::init(&path).await.unwrap();
    let job = db::jobs::load(&conn, &job_id).await.unwrap();
    assert_eq!(job.target("osfstorage").unwrap().status, ArchiveStatus::Sent);
}

#[tokio::test]
async fn test_transition_claims_once() {
    let conn = db::init_in_memory().await.unwrap();
    let job_id = db::jobs::create(&conn, new_job("reg1", &["osfstorage"]))
        .await
        .unwrap();
    let from = [ArchiveStatus::Pending];

    assert!(
        db::jobs::transition_target(&conn, &job_id, "osfstorage", &from, ArchiveStatus::Checking, None)
            .await
            .unwrap()
    );
    assert!(
        !db::jobs::transition_target(&conn, &job_id, "osfstorage", &from, ArchiveStatus::Checking, None)
            .await
            .unwrap()
    );
    assert!(
        db::jobs::transition_target(&conn, &job_id, "nope", &from, ArchiveStatus::Checking, None)
            .await
            .is_err()
    );

    let history = db::jobs::target_history(&conn, &job_id, "osfstorage")
        .await
        .unwrap();
    assert_eq!(history, vec![ArchiveStatus::Pending, ArchiveStatus::Checking]);
}
