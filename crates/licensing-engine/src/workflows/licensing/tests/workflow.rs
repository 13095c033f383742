use super::common::*;
use std::sync::Arc;

use crate::workflows::licensing::domain::{ApplicantId, RegistrationType, ReviewGroup};
use crate::workflows::licensing::ledger::{ApplicantRepository, Ledger};
use crate::workflows::licensing::service::{LicensingError, LicensingService};
use crate::workflows::licensing::workflow::{AssignmentRequest, GroupFilter};

#[tokio::test]
async fn assign_to_tl_marks_application_in_process() {
    let (service, ledger) = build_service().await;

    let record = service
        .workflow()
        .assign(AssignmentRequest {
            remarks: Some("needs rework".to_string()),
            ..request(PRODUCER, "TL")
        })
        .await
        .expect("assignment succeeds");

    assert_eq!(record.assigned_group, ReviewGroup::Tl);
    assert_eq!(record.remarks.as_deref(), Some("needs rework"));
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Tl);
    assert_eq!(applicant.application_status, "In Process");
    assert_eq!(ledger.assignments_for(PRODUCER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn assign_back_to_applicant_keeps_status() {
    let (service, ledger) = build_service().await;

    walk(&service, PRODUCER, &["APPLICANT"]).await;

    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Applicant);
    assert_eq!(applicant.application_status, "Created");
}

#[tokio::test]
async fn unknown_group_is_rejected_without_mutation() {
    let (service, ledger) = build_service().await;

    let error = service
        .workflow()
        .assign(request(PRODUCER, "REGISTRAR"))
        .await
        .expect_err("unknown group rejected");

    assert!(matches!(error, LicensingError::Validation(_)));
    assert!(ledger.assignments_for(PRODUCER).await.unwrap().is_empty());
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Applicant);
}

#[tokio::test]
async fn unknown_applicant_is_not_found() {
    let (service, _) = build_service().await;

    let error = service
        .workflow()
        .assign(request(ApplicantId(404), "LSO"))
        .await
        .expect_err("missing applicant");

    assert!(matches!(error, LicensingError::NotFound { entity: "applicant", .. }));
}

#[tokio::test]
async fn returning_to_lso_flags_sent_back() {
    let (service, _) = build_service().await;

    walk(&service, PRODUCER, &["APPLICANT", "LSO", "LSM", "DO"]).await;
    assert!(!service.workflow().is_sent_back(PRODUCER).await.unwrap());

    walk(&service, PRODUCER, &["LSO"]).await;
    assert!(service.workflow().is_sent_back(PRODUCER).await.unwrap());

    walk(&service, PRODUCER, &["LSM"]).await;
    assert!(!service.workflow().is_sent_back(PRODUCER).await.unwrap());
}

#[tokio::test]
async fn view_invalidation_failure_keeps_assignment() {
    let ledger = seeded_ledger().await;
    let service = LicensingService::builder(Ledger::from_store(Arc::new(ledger.clone())))
        .invalidator(Arc::new(UnavailableInvalidator))
        .build();

    let record = service
        .workflow()
        .assign(request(PRODUCER, "LSO"))
        .await
        .expect("invalidation failures are not fatal");

    assert_eq!(record.assigned_group, ReviewGroup::Lso);
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Lso);
}

#[tokio::test]
async fn update_assignment_rewrites_record_only() {
    let (service, ledger) = build_service().await;
    walk(&service, PRODUCER, &["LSO"]).await;
    let original = ledger.assignments_for(PRODUCER).await.unwrap()[0].clone();

    let updated = service
        .workflow()
        .update_assignment(
            original.id,
            AssignmentRequest {
                remarks: Some("corrected remarks".to_string()),
                ..request(PRODUCER, "LSM")
            },
        )
        .await
        .expect("update succeeds");

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.assigned_group, ReviewGroup::Lsm);
    assert_eq!(updated.remarks.as_deref(), Some("corrected remarks"));
    let history = ledger.assignments_for(PRODUCER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], updated);
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Lso);
}

#[tokio::test]
async fn update_assignment_rejects_foreign_applicant() {
    let (service, ledger) = build_service().await;
    walk(&service, PRODUCER, &["LSO"]).await;
    let original = ledger.assignments_for(PRODUCER).await.unwrap()[0].clone();

    let error = service
        .workflow()
        .update_assignment(original.id, request(COLLECTOR, "LSM"))
        .await
        .expect_err("foreign applicant rejected");

    assert!(matches!(error, LicensingError::Validation(_)));
    assert_eq!(ledger.assignments_for(PRODUCER).await.unwrap()[0], original);
}

#[tokio::test]
async fn reporting_groups_partition_lso_by_id() {
    let (service, ledger) = build_service().await;
    for id in 3..=8 {
        ledger
            .save_applicant(applicant(
                ApplicantId(id),
                RegistrationType::Consumer,
                ReviewGroup::Applicant,
            ))
            .await
            .unwrap();
    }
    for id in 3..=5 {
        walk(&service, ApplicantId(id), &["LSO"]).await;
    }
    walk(&service, ApplicantId(6), &["LSM2"]).await;
    walk(&service, ApplicantId(7), &["DEO"]).await;

    let ids = |entries: Vec<crate::workflows::licensing::workflow::ApplicantListEntry>| {
        entries
            .into_iter()
            .map(|entry| entry.applicant.id.0)
            .collect::<Vec<_>>()
    };
    let list = |filter| {
        let service = service.clone();
        async move { service.workflow().applicant_list(filter).await.unwrap() }
    };

    assert_eq!(ids(list(GroupFilter::Lso1).await), vec![4]);
    assert_eq!(ids(list(GroupFilter::Lso2).await), vec![5]);
    assert_eq!(ids(list(GroupFilter::Lso3).await), vec![3]);
    assert_eq!(ids(list(GroupFilter::Pmc).await), vec![3, 4, 5, 6]);
    assert_eq!(
        ids(list(GroupFilter::Workflow(ReviewGroup::Deo)).await),
        vec![7]
    );
}

#[tokio::test]
async fn submitted_bucket_reads_submission_marker() {
    let (service, _) = build_service().await;

    service
        .workflow()
        .submit_application(COLLECTOR)
        .await
        .expect("submission recorded");

    let entries = service
        .workflow()
        .applicant_list(GroupFilter::Submitted)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].applicant.id, COLLECTOR);

    let error = service
        .workflow()
        .submit_application(ApplicantId(99))
        .await
        .expect_err("unknown applicant");
    assert!(matches!(error, LicensingError::NotFound { .. }));
}

#[tokio::test]
async fn applicant_list_carries_sent_back_flag() {
    let (service, _) = build_service().await;
    walk(&service, PRODUCER, &["LSO", "LSM", "LSO"]).await;
    walk(&service, COLLECTOR, &["LSO"]).await;

    let entries = service
        .workflow()
        .applicant_list(GroupFilter::Workflow(ReviewGroup::Lso))
        .await
        .unwrap();

    let flags: Vec<(u64, bool)> = entries
        .iter()
        .map(|entry| (entry.applicant.id.0, entry.is_sent_back))
        .collect();
    assert_eq!(flags, vec![(1, true), (2, false)]);

    let encoded = serde_json::to_value(&entries[0]).unwrap();
    assert_eq!(encoded["isSentBack"], true);
    assert_eq!(encoded["assignedGroup"], "LSO");
    assert_eq!(encoded["trackingNumber"], "LHR-001");
}

#[tokio::test]
async fn group_summary_counts_every_group() {
    let (service, _) = build_service().await;
    walk(&service, PRODUCER, &["LSO", "LSM", "LSO"]).await;
    walk(&service, COLLECTOR, &["TL"]).await;
    service.workflow().submit_application(COLLECTOR).await.unwrap();

    let summary = service.workflow().group_summary().await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.pmc, 2);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.groups.len(), ReviewGroup::SEQUENCE.len());
    let lso = &summary.groups[ReviewGroup::Lso.index()];
    assert_eq!((lso.count, lso.sent_back), (1, 1));
    let tl = &summary.groups[ReviewGroup::Tl.index()];
    assert_eq!((tl.count, tl.sent_back), (1, 0));
}

#[tokio::test]
async fn concurrent_assignments_for_one_applicant_are_serialized() {
    let (service, ledger) = build_service().await;
    let groups = ["LSO", "LSM", "DO", "LSM2", "TL", "DEO", "DG", "LSO"];

    let mut handles = Vec::new();
    for group in groups {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.workflow().assign(request(PRODUCER, group)).await
        }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("assignment succeeds");
    }

    let history = ledger.assignments_for(PRODUCER).await.unwrap();
    assert_eq!(history.len(), groups.len());
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    let last = history.last().expect("history is not empty");
    assert_eq!(applicant.assigned_group, last.assigned_group);
}
