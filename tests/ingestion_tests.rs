mod common;

use common::{FlakyRepo, FlakyStore, Harness, file, pdf};
use script_intake::{
    config::{ExamNumberPattern, KeyStrategy, PipelineConfig},
    models::{AnswerScriptUpdate, ProcessingStatus},
    services::{
        answer_script_repo::AnswerScriptRepository,
        content_store::ContentStore,
        ingestion_service::{
            ExtractionMode, FailureKind, IngestError, IngestionService, UploadOptions,
            UploadedFile,
        },
    },
};
use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};
use tokio::time::Instant;
use uuid::Uuid;

fn inline() -> UploadOptions {
    UploadOptions {
        mode: Some(ExtractionMode::Inline),
        ..Default::default()
    }
}

fn deferred() -> UploadOptions {
    UploadOptions {
        mode: Some(ExtractionMode::Deferred),
        ..Default::default()
    }
}

#[tokio::test]
async fn exact_exam_number_is_matched_inline() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let record = service
        .upload_one(
            file("john.pdf", &["Exam Number: JOH5196", "Question 1: mitochondria"]),
            inline(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Uploaded);
    assert_eq!(record.scanned_exam_number.as_deref(), Some("JOH5196"));
    assert_eq!(record.student_id, Some(h.john.id));
    assert_eq!(record.matching_confidence, Some(1.0));
    assert!(record.matched_at.is_some());
    assert!(record.is_consistent());
    assert_eq!(record.object_key, "john.pdf");
    assert_eq!(record.file_url.as_deref(), Some("/answer-scripts/john.pdf"));

    assert_eq!(h.stored_keys().await, vec!["john.pdf".to_string()]);
    assert_eq!(h.rasterizer.open_count(), 0);
}

#[tokio::test]
async fn document_without_exam_number_is_uploaded_unmatched() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let record = service
        .upload_one(file("blank.pdf", &["Question 1: photosynthesis"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Uploaded);
    assert_eq!(record.scanned_exam_number, None);
    assert_eq!(record.student_id, None);
    assert_eq!(record.matching_confidence, None);
    assert_eq!(record.matched_at, None);
}

#[tokio::test]
async fn near_miss_below_threshold_keeps_confidence_only() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig {
        match_threshold: 0.95,
        ..Default::default()
    });

    let record = service
        .upload_one(file("smudged.pdf", &["JOH5197"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Uploaded);
    assert_eq!(record.scanned_exam_number.as_deref(), Some("JOH5197"));
    assert_eq!(record.student_id, None);
    assert!(record.matching_confidence.unwrap() < 0.95);
    assert!(record.is_consistent());
}

#[tokio::test]
async fn store_failure_is_isolated_to_its_file() {
    let h = Harness::new().await;
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    store.fail_put("b.pdf");
    let service = h.service_with(PipelineConfig::default(), store, h.repo.clone());

    let result = service
        .upload_batch(
            vec![
                file("a.pdf", &["JOH5196"]),
                file("b.pdf", &["JAN5196"]),
                file("c.pdf", &["ALI5196"]),
            ],
            deferred(),
        )
        .await;

    let names: Vec<_> = result
        .successful_uploads
        .iter()
        .map(|r| r.file_name.as_str())
        .collect();
    assert_eq!(names, vec!["a.pdf", "c.pdf"]);
    assert_eq!(result.failed_uploads.len(), 1);
    assert_eq!(result.failed_uploads[0].filename, "b.pdf");
    assert_eq!(result.failed_uploads[0].kind, FailureKind::Storage);

    assert_eq!(h.stored_keys().await, vec!["a.pdf".to_string(), "c.pdf".to_string()]);
    service.wait_for_background().await;

    let records = h.repo.get_all().await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, ProcessingStatus::Uploaded);
        assert!(record.student_id.is_some());
        assert!(record.is_consistent());
    }
}

#[tokio::test]
async fn metadata_failure_removes_the_stored_object() {
    let h = Harness::new().await;
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    repo.fail_create.store(true, Ordering::SeqCst);
    let service = h.service_with(PipelineConfig::default(), h.store.clone(), repo);

    let failed = service
        .upload_one(file("a.pdf", &["JOH5196"]), inline())
        .await
        .unwrap_err();

    assert_eq!(failed.kind, FailureKind::Metadata);
    assert!(failed.error.contains("failed to save to database"));
    assert!(h.stored_keys().await.is_empty());
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_and_unreadable_files_touch_no_store() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let result = service
        .upload_batch(
            vec![
                UploadedFile::new("empty.pdf", None, bytes::Bytes::new()),
                UploadedFile::unreadable("broken.pdf", "connection reset"),
            ],
            deferred(),
        )
        .await;

    assert!(result.all_failed());
    assert!(
        result
            .failed_uploads
            .iter()
            .all(|f| f.kind == FailureKind::Input)
    );
    assert!(h.stored_keys().await.is_empty());
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn write_deadline_leaves_nothing_behind() {
    let h = Harness::new().await;
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    *store.put_delay.lock().unwrap() = Some(Duration::from_millis(500));
    let service = h.service_with(PipelineConfig::default(), store, h.repo.clone());

    let failed = service
        .upload_one(
            file("slow.pdf", &["JOH5196"]),
            UploadOptions {
                mode: Some(ExtractionMode::Inline),
                deadline: Some(Instant::now() + Duration::from_millis(20)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(failed.kind, FailureKind::Deadline);
    assert!(h.stored_keys().await.is_empty());
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_document_is_marked_failed_but_kept() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let record = service
        .upload_one(
            UploadedFile::new("corrupt.pdf", None, bytes::Bytes::from_static(b"CORRUPT")),
            inline(),
        )
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Failed);
    assert_eq!(record.scanned_exam_number, None);
    assert_eq!(record.student_id, None);
    assert_eq!(h.stored_keys().await, vec!["corrupt.pdf".to_string()]);
}

#[tokio::test]
async fn render_error_fails_the_document_and_releases_it() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let record = service
        .upload_one(file("torn.pdf", &["JOH5196", "!render", "page 3"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Failed);
    assert_eq!(record.student_id, None);
    assert_eq!(h.rasterizer.open_count(), 0);
}

#[tokio::test]
async fn unrecognized_page_contributes_nothing() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let record = service
        .upload_one(file("partial.pdf", &["!ocr garbage", "JAN5196"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Uploaded);
    assert_eq!(record.student_id, Some(h.jane.id));
}

#[tokio::test]
async fn extraction_deadline_marks_record_failed() {
    let h = Harness::new().await;
    h.rasterizer.set_render_delay(Duration::from_millis(500));
    let service = h.service(PipelineConfig {
        extraction_timeout: Duration::from_millis(50),
        ..Default::default()
    });

    let record = service
        .upload_one(file("slow.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Failed);
    assert_eq!(record.student_id, None);
    assert_eq!(h.rasterizer.open_count(), 0);
    assert_eq!(h.stored_keys().await, vec!["slow.pdf".to_string()]);
}

#[tokio::test]
async fn retrying_a_file_resumes_its_record() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let first = service
        .upload_one(file("retry.pdf", &["no number here"]), inline())
        .await
        .unwrap();
    let second = service
        .upload_one(file("retry.pdf", &["ALI5196"]), inline())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.student_id, Some(h.alice.id));
    assert_eq!(h.repo.get_all().await.unwrap().len(), 1);
    assert_eq!(h.stored_keys().await, vec!["retry.pdf".to_string()]);
}

#[tokio::test]
async fn failed_retry_keeps_the_committed_record_and_its_object() {
    let h = Harness::new().await;
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    let service = h.service_with(PipelineConfig::default(), h.store.clone(), repo.clone());
    let committed = service
        .upload_one(file("x.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();
    assert_eq!(committed.status, ProcessingStatus::Uploaded);

    repo.fail_update.store(true, Ordering::SeqCst);
    let failed = service
        .upload_one(file("x.pdf", &["JOH5196"]), inline())
        .await
        .unwrap_err();
    assert_eq!(failed.kind, FailureKind::Metadata);

    let kept = h.repo.get_by_id(committed.id).await.unwrap();
    assert_eq!(kept.status, ProcessingStatus::Uploaded);
    assert_eq!(kept.object_key, "x.pdf");
    assert_eq!(kept.student_id, Some(h.john.id));
    assert_eq!(h.repo.get_all().await.unwrap().len(), 1);
    assert_eq!(h.stored_keys().await, vec!["x.pdf".to_string()]);
}

#[tokio::test]
async fn write_deadline_on_a_retry_keeps_the_existing_object() {
    let h = Harness::new().await;
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    let service = h.service_with(PipelineConfig::default(), store.clone(), h.repo.clone());
    let committed = service
        .upload_one(file("x.pdf", &["JAN5196"]), inline())
        .await
        .unwrap();

    *store.put_delay.lock().unwrap() = Some(Duration::from_secs(1));
    let failed = service
        .upload_one(
            file("x.pdf", &["JAN5196"]),
            UploadOptions {
                mode: Some(ExtractionMode::Inline),
                deadline: Some(Instant::now() + Duration::from_millis(100)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(failed.kind, FailureKind::Deadline);

    let kept = h.repo.get_by_id(committed.id).await.unwrap();
    assert_eq!(kept.status, ProcessingStatus::Uploaded);
    assert_eq!(h.stored_keys().await, vec!["x.pdf".to_string()]);

    let (_, stream) = service.open_script_file(committed.id).await.unwrap();
    assert_eq!(stream.size, pdf(&["JAN5196"]).len() as u64);
}

#[tokio::test]
async fn deadline_during_record_creation_removes_record_and_object() {
    let h = Harness::new().await;
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    *repo.create_delay.lock().unwrap() = Some(Duration::from_secs(2));
    let service = h.service_with(PipelineConfig::default(), h.store.clone(), repo);

    let failed = service
        .upload_one(
            file("late.pdf", &["JOH5196"]),
            UploadOptions {
                mode: Some(ExtractionMode::Inline),
                deadline: Some(Instant::now() + Duration::from_millis(500)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(failed.kind, FailureKind::Deadline);
    assert!(failed.error.contains("saving to database"));
    assert!(h.stored_keys().await.is_empty());
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_rollback_is_reported_per_file_and_leaves_no_record() {
    let h = Harness::new().await;
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    store.fail_deletes.store(true, Ordering::SeqCst);
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    repo.fail_create.store(true, Ordering::SeqCst);
    let service = h.service_with(PipelineConfig::default(), store, repo);

    let result = service
        .upload_batch(
            vec![file("a.pdf", &["JOH5196"]), file("b.pdf", &["JAN5196"])],
            deferred(),
        )
        .await;

    assert!(result.successful_uploads.is_empty());
    let failed: Vec<_> = result
        .failed_uploads
        .iter()
        .map(|f| (f.filename.as_str(), f.kind))
        .collect();
    assert_eq!(
        failed,
        vec![("a.pdf", FailureKind::Metadata), ("b.pdf", FailureKind::Metadata)]
    );
    // The objects could not be rolled back; no record refers to them.
    assert_eq!(
        h.stored_keys().await,
        vec!["a.pdf".to_string(), "b.pdf".to_string()]
    );
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn retry_after_failed_writes_commits_exactly_once() {
    let h = Harness::new().await;
    let store = Arc::new(FlakyStore::new(h.store.clone()));
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    let service = h.service_with(PipelineConfig::default(), store.clone(), repo.clone());

    store.fail_put("again.pdf");
    let failed = service
        .upload_one(file("again.pdf", &["ALI5196"]), inline())
        .await
        .unwrap_err();
    assert_eq!(failed.kind, FailureKind::Storage);
    assert!(h.stored_keys().await.is_empty());

    store.fail_put_keys.lock().unwrap().clear();
    repo.fail_create.store(true, Ordering::SeqCst);
    let failed = service
        .upload_one(file("again.pdf", &["ALI5196"]), inline())
        .await
        .unwrap_err();
    assert_eq!(failed.kind, FailureKind::Metadata);
    assert!(h.stored_keys().await.is_empty());
    assert!(h.repo.get_all().await.unwrap().is_empty());

    repo.fail_create.store(false, Ordering::SeqCst);
    let committed = service
        .upload_one(file("again.pdf", &["ALI5196"]), inline())
        .await
        .unwrap();
    let repeated = service
        .upload_one(file("again.pdf", &["ALI5196"]), inline())
        .await
        .unwrap();

    assert_eq!(committed.id, repeated.id);
    assert_eq!(repeated.status, ProcessingStatus::Uploaded);
    assert_eq!(repeated.student_id, Some(h.alice.id));
    assert_eq!(h.repo.get_all().await.unwrap().len(), 1);
    assert_eq!(h.stored_keys().await, vec!["again.pdf".to_string()]);
}

#[tokio::test]
async fn long_exam_numbers_allowed_by_the_pattern_are_matched() {
    let h = Harness::new().await;
    let student = h
        .roster
        .add_student("Lerato", "Mokoena", "STU2024000000000000001234")
        .await
        .unwrap();
    let service = h.service(PipelineConfig {
        exam_number: ExamNumberPattern {
            max_length: 30,
            ..Default::default()
        },
        ..Default::default()
    });

    let record = service
        .upload_one(file("long.pdf", &["STU2024000000000000001234"]), inline())
        .await
        .unwrap();

    assert_eq!(record.status, ProcessingStatus::Uploaded);
    assert_eq!(
        record.scanned_exam_number.as_deref(),
        Some("STU2024000000000000001234")
    );
    assert_eq!(record.student_id, Some(student.id));
    assert_eq!(record.matching_confidence, Some(1.0));
}

#[tokio::test]
async fn pattern_wider_than_a_record_can_hold_is_rejected() {
    let h = Harness::new().await;
    let config = PipelineConfig {
        exam_number: ExamNumberPattern {
            max_length: 200,
            ..Default::default()
        },
        ..Default::default()
    };

    let built = IngestionService::new(
        h.store.clone(),
        h.repo.clone(),
        h.roster.clone(),
        h.extractor(),
        Arc::new(config),
    );
    assert!(built.is_err());
}

#[tokio::test]
async fn record_id_keys_keep_same_named_files_apart() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig {
        key_strategy: KeyStrategy::RecordId,
        ..Default::default()
    });

    let first = service
        .upload_one(file("scan.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();
    let second = service
        .upload_one(file("scan.pdf", &["JAN5196"]), inline())
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.object_key, format!("{}/scan.pdf", first.id));
    assert_eq!(h.stored_keys().await.len(), 2);

    service.delete_script(first.id).await.unwrap();
    assert_eq!(h.stored_keys().await, vec![second.object_key.clone()]);
}

#[tokio::test]
async fn records_stay_consistent_across_a_mixed_batch() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());

    let files = vec![
        file("m1.pdf", &["JOH5196"]),
        file("m2.pdf", &["nothing"]),
        file("m3.pdf", &["JAN5199"]),
        file("m4.pdf", &["!render"]),
        file("m5.pdf", &["ZZZ0000"]),
        UploadedFile::new("m6.pdf", None, bytes::Bytes::from_static(b"CORRUPT")),
    ];
    let result = service.upload_batch(files, deferred()).await;
    assert!(result.all_succeeded());
    service.wait_for_background().await;

    for record in h.repo.get_all().await.unwrap() {
        assert!(record.status.is_terminal(), "{} not finalized", record.file_name);
        assert!(record.is_consistent(), "{} inconsistent", record.file_name);
    }
    assert_eq!(h.rasterizer.open_count(), 0);
}

#[tokio::test]
async fn delete_removes_object_and_record() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());
    let record = service
        .upload_one(file("gone.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();

    service.delete_script(record.id).await.unwrap();

    assert!(h.stored_keys().await.is_empty());
    assert!(matches!(
        service.get_script(record.id).await,
        Err(IngestError::NotFound(id)) if id == record.id
    ));
    assert!(matches!(
        service.delete_script(record.id).await,
        Err(IngestError::NotFound(_))
    ));
}

#[tokio::test]
async fn delete_tolerates_an_already_missing_object() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());
    let record = service
        .upload_one(file("orphan.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();
    h.store.delete(&record.object_key).await.unwrap();

    service.delete_script(record.id).await.unwrap();
    assert!(h.repo.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_record_delete_marks_record_failed() {
    let h = Harness::new().await;
    let repo = Arc::new(FlakyRepo::new(h.repo.clone()));
    let service = h.service_with(PipelineConfig::default(), h.store.clone(), repo.clone());
    let record = service
        .upload_one(file("stuck.pdf", &["JOH5196"]), inline())
        .await
        .unwrap();

    repo.fail_delete.store(true, Ordering::SeqCst);
    let err = service.delete_script(record.id).await.unwrap_err();

    assert!(matches!(err, IngestError::Metadata(_)));
    assert!(h.stored_keys().await.is_empty());
    let stuck = h.repo.get_by_id(record.id).await.unwrap();
    assert_eq!(stuck.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn manual_student_assignment_stamps_matched_at_once() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());
    let record = service
        .upload_one(file("manual.pdf", &["illegible"]), inline())
        .await
        .unwrap();
    assert_eq!(record.matched_at, None);

    let assigned = service
        .update_script(
            record.id,
            AnswerScriptUpdate {
                student_id: Some(h.jane.id),
                total_marks: Some(42),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let stamped = assigned.matched_at.unwrap();
    assert_eq!(assigned.student_id, Some(h.jane.id));
    assert_eq!(assigned.total_marks, Some(42));

    let reassigned = service
        .update_script(
            record.id,
            AnswerScriptUpdate {
                student_id: Some(h.john.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reassigned.student_id, Some(h.john.id));
    assert_eq!(reassigned.matched_at, Some(stamped));
    assert_eq!(reassigned.total_marks, Some(42));

    assert!(matches!(
        service
            .update_script(record.id, AnswerScriptUpdate::default())
            .await,
        Err(IngestError::Input(_))
    ));
}

#[tokio::test]
async fn reprocess_picks_up_roster_changes() {
    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());
    let record = service
        .upload_one(file("bob.pdf", &["Candidate BOB7781"]), inline())
        .await
        .unwrap();
    assert_eq!(record.scanned_exam_number.as_deref(), Some("BOB7781"));
    assert_eq!(record.student_id, None);

    let bob = h.roster.add_student("Bob", "Stone", "BOB7781").await.unwrap();
    let reprocessed = service.reprocess_script(record.id).await.unwrap();

    assert_eq!(reprocessed.status, ProcessingStatus::Uploaded);
    assert_eq!(reprocessed.student_id, Some(bob.id));
    assert_eq!(reprocessed.matching_confidence, Some(1.0));
}

#[tokio::test]
async fn open_script_file_streams_stored_bytes() {
    use tokio::io::AsyncReadExt;

    let h = Harness::new().await;
    let service = h.service(PipelineConfig::default());
    let record = service
        .upload_one(file("read.pdf", &["JOH5196", "answers"]), inline())
        .await
        .unwrap();

    let (_, mut stream) = service.open_script_file(record.id).await.unwrap();
    let mut body = Vec::new();
    stream.reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body, pdf(&["JOH5196", "answers"]).to_vec());
    assert_eq!(stream.size, body.len() as u64);

    assert!(matches!(
        service.open_script_file(Uuid::new_v4()).await,
        Err(IngestError::NotFound(_))
    ));
}
