//! End-to-end batch runs against a real SQLite database and mocked HTTP collaborators

mod common;

use common::*;
use gemini_caption::{
    BatchRequest, BatchRunner, Config, Database, Error, ErrorKind, GeminiCaptioner,
    HttpImageSource, PostId,
};
use std::sync::Arc;
use wiremock::MockServer;

fn runner(config: Config, db: &Arc<Database>) -> BatchRunner {
    BatchRunner::new(
        config.clone(),
        db.clone(),
        Arc::new(HttpImageSource::new(&config.images).expect("image source")),
        Arc::new(GeminiCaptioner::new(&config.gemini).expect("captioner")),
        db.clone(),
    )
    .expect("runner")
}

#[tokio::test]
async fn range_run_stores_captions_and_reports_failures() {
    let images = MockServer::start().await;
    let gemini = MockServer::start().await;
    let (db, _dir) = create_db().await;
    let db = Arc::new(db);

    // 1, 2: fine; 3: image gone; 4: rejected by the model; 5: no URL; 6: unknown
    seed_posts(&db, &images, &[(1, true), (2, true), (3, true), (4, true), (5, false)]).await;
    mount_images(&images, &[1, 2, 4]).await;
    mount_caption_status_for(&gemini, 4, 400, None).await;
    mount_caption_ok(&gemini).await;

    let report = runner(test_config(&gemini, 2), &db)
        .run(&BatchRequest::Range {
            start_id: 1,
            end_id: 6,
        })
        .await
        .expect("run");

    assert_eq!(report.total, 6);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.skipped_breakdown.unresolvable, 2);
    assert_eq!(report.failed_ids(), vec![PostId(3), PostId(4)]);
    assert_eq!(report.failures[0].kind, ErrorKind::FetchError);
    assert_eq!(report.failures[1].kind, ErrorKind::PermanentServiceError);

    let stored = db.get_caption(PostId(1)).await.unwrap().expect("caption row");
    assert!(stored.success);
    assert_eq!(stored.bucket, 0);
    assert_eq!(stored.model_id.as_deref(), Some(MODEL_ID));
    let caption: serde_json::Value = serde_json::from_str(stored.caption.as_deref().unwrap()).unwrap();
    assert_eq!(caption["short_summary"], "a girl under cherry blossoms");
    assert!(stored.prompt.unwrap().contains("some_artist"));

    let failed = db.get_caption(PostId(4)).await.unwrap().expect("failure row");
    assert!(!failed.success);
    assert_eq!(failed.error_kind.as_deref(), Some("permanent_service_error"));
}

#[tokio::test]
async fn rerun_only_captions_what_is_missing() {
    let images = MockServer::start().await;
    let gemini = MockServer::start().await;
    let (db, _dir) = create_db().await;
    let db = Arc::new(db);

    seed_posts(&db, &images, &[(10, true), (11, true), (12, true)]).await;
    mount_images(&images, &[10, 11, 12]).await;
    mount_caption_status_for(&gemini, 12, 403, Some(1)).await;
    mount_caption_ok(&gemini).await;

    let runner = runner(test_config(&gemini, 3), &db);
    let first = runner
        .run(&BatchRequest::Range {
            start_id: 10,
            end_id: 12,
        })
        .await
        .unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(first.failed_ids(), vec![PostId(12)]);

    let retry = runner
        .run(&BatchRequest::Ids(first.failed_ids()))
        .await
        .unwrap();
    assert_eq!(retry.succeeded, 1);

    let third = runner
        .run(&BatchRequest::Range {
            start_id: 10,
            end_id: 12,
        })
        .await
        .unwrap();
    assert_eq!(third.succeeded, 0);
    assert_eq!(third.skipped_breakdown.already_processed, 3);

    let requests = gemini.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4, "three captions plus one rejected call");
    assert_eq!(db.count_captions().await.unwrap(), 3);
}

#[tokio::test]
async fn rate_limited_calls_are_retried() {
    let images = MockServer::start().await;
    let gemini = MockServer::start().await;
    let (db, _dir) = create_db().await;
    let db = Arc::new(db);

    seed_posts(&db, &images, &[(7, true)]).await;
    mount_images(&images, &[7]).await;
    mount_caption_status_for(&gemini, 7, 429, Some(2)).await;
    mount_caption_ok(&gemini).await;

    let report = runner(test_config(&gemini, 1), &db)
        .run(&BatchRequest::Key(0))
        .await
        .unwrap();

    assert_eq!(report.total, 100_000);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.skipped_breakdown.unresolvable, 99_999);
    assert_eq!(gemini.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn invalid_range_is_a_run_level_error() {
    let gemini = MockServer::start().await;
    let (db, _dir) = create_db().await;
    let db = Arc::new(db);

    let err = runner(test_config(&gemini, 1), &db)
        .run(&BatchRequest::Range {
            start_id: 20,
            end_id: 10,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidRange { start: 20, end: 10 }));
    assert!(err.is_configuration_error());
}
