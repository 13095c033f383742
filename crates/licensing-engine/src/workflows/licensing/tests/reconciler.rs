use super::common::*;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::workflows::licensing::domain::{AlertType, PaymentRecordStatus, ReviewGroup};
use crate::workflows::licensing::ledger::{
    AlertRepository, ApplicantRepository, Ledger, PaymentLedger,
};
use crate::workflows::licensing::reconciler::{
    GatewayPayment, PaymentConfirmed, PaymentFailed, PsidState,
};
use crate::workflows::licensing::service::{LicensingError, LicensingService};

fn confirmed(reference: &str, transaction_id: &str, amount: Decimal) -> PaymentConfirmed {
    PaymentConfirmed {
        reference: reference.to_string(),
        transaction_id: Some(transaction_id.to_string()),
        status: "PAID".to_string(),
        amount,
        paid_at: Some(Utc.with_ymd_and_hms(2025, 5, 2, 9, 30, 0).unwrap()),
    }
}

fn failed(reference: &str, reason: &str) -> PaymentFailed {
    PaymentFailed {
        reference: reference.to_string(),
        transaction_id: Some("TXN-FAIL".to_string()),
        reason: Some(reason.to_string()),
    }
}

#[tokio::test]
async fn confirmation_settles_registered_invoice() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-5000", dec!(5000))
        .await
        .unwrap();

    let outcome = service
        .reconciler()
        .payment_confirmed(confirmed("PSID-5000", "TXN-1", dec!(5000)))
        .await
        .expect("confirmation applied");

    assert_eq!(outcome.applicant_id, Some(PRODUCER));
    assert_eq!(outcome.payment_status, PaymentRecordStatus::Paid);
    assert!(outcome.replayed, "invoice existed before the callback");
    let payment = outcome.applicant_payment.expect("linked applicant status");
    assert!(payment.is_paid);

    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::DownloadLicense);
    assert_eq!(applicant.application_status, "Submitted");
}

#[tokio::test]
async fn replayed_confirmation_keeps_one_record_with_latest_values() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-R", dec!(2000))
        .await
        .unwrap();

    let reconciler = service.reconciler();
    reconciler
        .payment_confirmed(confirmed("PSID-R", "TXN-1", dec!(2000)))
        .await
        .unwrap();
    let replay = reconciler
        .payment_confirmed(PaymentConfirmed {
            paid_at: Some(Utc.with_ymd_and_hms(2025, 5, 3, 10, 0, 0).unwrap()),
            ..confirmed("PSID-R", "TXN-2", dec!(2000))
        })
        .await
        .unwrap();

    assert!(replay.replayed);
    assert_eq!(ledger.payments_for(PRODUCER).await.unwrap().len(), 1);
    let record = ledger
        .payment_by_reference("PSID-R")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.external_transaction_id.as_deref(), Some("TXN-2"));
    assert_eq!(
        record.paid_at,
        Some(Utc.with_ymd_and_hms(2025, 5, 3, 10, 0, 0).unwrap())
    );

    let status = service.payments().payment_status(PRODUCER).await.unwrap();
    assert_eq!(status.total_paid, dec!(2000), "replay is not double counted");
}

#[tokio::test]
async fn replayed_confirmation_raises_one_payment_alert() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-R", dec!(2000))
        .await
        .unwrap();

    for _ in 0..3 {
        service
            .reconciler()
            .payment_confirmed(confirmed("PSID-R", "TXN-1", dec!(2000)))
            .await
            .unwrap();
    }

    let received = ledger
        .alerts_for(PRODUCER)
        .await
        .unwrap()
        .into_iter()
        .filter(|alert| alert.alert_type == AlertType::PaymentReceived)
        .count();
    assert_eq!(received, 1);
}

#[tokio::test]
async fn replay_with_higher_amount_is_announced() {
    let (service, ledger) = build_service().await;
    let reconciler = service.reconciler();
    reconciler
        .payment_confirmed(confirmed("PSID-UP", "TXN-1", dec!(1000)))
        .await
        .unwrap();
    service
        .payments()
        .record_payment(PRODUCER, dec!(1000), "PSID-UP")
        .await
        .unwrap();
    service
        .payments()
        .record_payment(PRODUCER, dec!(1500), "PSID-UP")
        .await
        .unwrap();

    let received: Vec<String> = ledger
        .alerts_for(PRODUCER)
        .await
        .unwrap()
        .into_iter()
        .filter(|alert| alert.alert_type == AlertType::PaymentReceived)
        .map(|alert| alert.message)
        .collect();
    assert_eq!(received.len(), 2);
    assert!(received[0].contains("PKR 1500"));
}

#[tokio::test]
async fn replay_with_lower_amount_never_reduces_total_paid() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .register_invoice(COLLECTOR, "PSID-L", dec!(2500))
        .await
        .unwrap();

    let reconciler = service.reconciler();
    reconciler
        .payment_confirmed(confirmed("PSID-L", "TXN-1", dec!(1500)))
        .await
        .unwrap();
    let before = service.payments().payment_status(COLLECTOR).await.unwrap();
    reconciler
        .payment_confirmed(confirmed("PSID-L", "TXN-1", dec!(500)))
        .await
        .unwrap();
    let after = service.payments().payment_status(COLLECTOR).await.unwrap();

    assert_eq!(before.total_paid, dec!(1500));
    assert!(after.total_paid >= before.total_paid);
    let record = ledger
        .payment_by_reference("PSID-L")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.amount_paid, Some(dec!(1500)));
}

#[tokio::test]
async fn unknown_reference_creates_unlinked_settled_record() {
    let (service, ledger) = build_service().await;

    let outcome = service
        .reconciler()
        .payment_confirmed(confirmed("PSID-ORPHAN", "TXN-9", dec!(700)))
        .await
        .unwrap();

    assert!(!outcome.replayed);
    assert_eq!(outcome.applicant_id, None);
    assert!(outcome.applicant_payment.is_none());
    let record = ledger
        .payment_by_reference("PSID-ORPHAN")
        .await
        .unwrap()
        .unwrap();
    assert!(record.payment_status.is_settled());
    assert_eq!(record.amount_paid, Some(dec!(700)));
    for applicant in ledger.applicants().await.unwrap() {
        assert_eq!(applicant.assigned_group, ReviewGroup::Applicant);
    }
}

#[tokio::test]
async fn concurrent_confirmations_converge_on_one_record() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-C", dec!(5000))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for attempt in 0..6 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .reconciler()
                .payment_confirmed(confirmed(
                    "PSID-C",
                    &format!("TXN-{attempt}"),
                    dec!(5000),
                ))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task joins").expect("confirmation applied");
    }

    assert_eq!(ledger.payments_for(PRODUCER).await.unwrap().len(), 1);
    let status = service.payments().payment_status(PRODUCER).await.unwrap();
    assert_eq!(status.total_paid, dec!(5000));
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::DownloadLicense);
}

#[tokio::test]
async fn failure_marks_record_without_touching_applicant() {
    let (service, ledger) = build_service().await;
    walk(&service, PRODUCER, &["DG"]).await;
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-F", dec!(5000))
        .await
        .unwrap();

    let outcome = service
        .reconciler()
        .payment_failed(failed("PSID-F", "insufficient funds"))
        .await
        .unwrap();

    assert_eq!(outcome.payment_status, PaymentRecordStatus::Failed);
    assert!(!outcome.ignored);
    let record = ledger
        .payment_by_reference("PSID-F")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.failure_reason.as_deref(), Some("insufficient funds"));
    let applicant = ledger.applicant(PRODUCER).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::Dg);

    let alerts = ledger.alerts_for(PRODUCER).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::PaymentFailed);
}

#[tokio::test]
async fn failure_for_unknown_reference_is_recorded() {
    let (service, ledger) = build_service().await;

    service
        .reconciler()
        .payment_failed(failed("PSID-NEW", "expired"))
        .await
        .unwrap();

    let record = ledger
        .payment_by_reference("PSID-NEW")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.payment_status, PaymentRecordStatus::Failed);
    assert_eq!(record.applicant_id, None);
}

#[tokio::test]
async fn late_failure_does_not_downgrade_settled_payment() {
    let (service, ledger) = build_service().await;
    service
        .payments()
        .record_payment(COLLECTOR, dec!(2500), "PSID-S")
        .await
        .unwrap();

    let outcome = service
        .reconciler()
        .payment_failed(failed("PSID-S", "reversal"))
        .await
        .unwrap();

    assert!(outcome.ignored);
    let record = ledger
        .payment_by_reference("PSID-S")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.payment_status, PaymentRecordStatus::Paid);
    let status = service.payments().payment_status(COLLECTOR).await.unwrap();
    assert!(status.is_paid);
}

#[tokio::test]
async fn blank_reference_is_rejected() {
    let (service, _) = build_service().await;

    let confirmed_error = service
        .reconciler()
        .payment_confirmed(confirmed(" ", "TXN", dec!(10)))
        .await
        .expect_err("blank reference");
    let failed_error = service
        .reconciler()
        .payment_failed(failed("", "n/a"))
        .await
        .expect_err("blank reference");

    assert!(matches!(confirmed_error, LicensingError::Validation(_)));
    assert!(matches!(failed_error, LicensingError::Validation(_)));
}

#[tokio::test]
async fn psid_check_reads_local_record_first() {
    let (service, _) = build_service().await;
    service
        .payments()
        .record_payment(COLLECTOR, dec!(2500), "PSID-LOCAL")
        .await
        .unwrap();
    service
        .payments()
        .register_invoice(PRODUCER, "PSID-OPEN", dec!(5000))
        .await
        .unwrap();

    let settled = service
        .reconciler()
        .check_psid_payment_status("PSID-LOCAL")
        .await
        .unwrap();
    let open = service
        .reconciler()
        .check_psid_payment_status("PSID-OPEN")
        .await
        .unwrap();

    assert!(settled.payment_confirmed);
    assert_eq!(settled.status, PsidState::Confirmed);
    assert!(!open.payment_confirmed);
    assert_eq!(open.status, PsidState::Pending);
}

#[tokio::test]
async fn psid_check_reconciles_settled_gateway_status() {
    let ledger = seeded_ledger().await;
    let service = LicensingService::builder(Ledger::from_store(Arc::new(ledger.clone())))
        .gateway(Arc::new(StubGateway {
            answer: Ok(Some(GatewayPayment {
                reference: "PSID-REMOTE".to_string(),
                transaction_id: Some("TXN-REMOTE".to_string()),
                status: PaymentRecordStatus::from_label("Completed"),
                amount: None,
                paid_at: None,
            })),
        }))
        .build();
    service
        .payments()
        .register_invoice(COLLECTOR, "PSID-REMOTE", dec!(2500))
        .await
        .unwrap();

    let check = service
        .reconciler()
        .check_psid_payment_status("PSID-REMOTE")
        .await
        .unwrap();

    assert!(check.payment_confirmed);
    let record = ledger
        .payment_by_reference("PSID-REMOTE")
        .await
        .unwrap()
        .unwrap();
    assert!(record.payment_status.is_settled());
    assert_eq!(record.amount_paid, Some(dec!(2500)));
    let applicant = ledger.applicant(COLLECTOR).await.unwrap().unwrap();
    assert_eq!(applicant.assigned_group, ReviewGroup::DownloadLicense);
}

#[tokio::test]
async fn gateway_outage_reports_pending() {
    let ledger = seeded_ledger().await;
    let service = LicensingService::builder(Ledger::from_store(Arc::new(ledger.clone())))
        .gateway(Arc::new(StubGateway {
            answer: Err("connection reset".to_string()),
        }))
        .build();

    let check = service
        .reconciler()
        .check_psid_payment_status("PSID-ANY")
        .await
        .expect("outage is not an error for callers");

    assert!(!check.payment_confirmed);
    assert_eq!(check.status, PsidState::Pending);
    assert!(ledger
        .payment_by_reference("PSID-ANY")
        .await
        .unwrap()
        .is_none());
}
