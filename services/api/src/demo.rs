use crate::infra::{load_ledger, parse_snapshot, LoggingSender};
use chrono::Utc;
use clap::Args;
use licensing_engine::error::AppError;
use licensing_engine::workflows::licensing::{
    AlertChannel, ApplicantId, ApplicantRepository, AssignmentRequest, InMemoryLedger, Ledger,
    LicensingError, LicensingService, PaymentConfirmed, PaymentStatus,
};
use std::path::PathBuf;
use std::sync::Arc;

const SAMPLE_SNAPSHOT: &str = r#"{
    "applicants": [{
        "id": 1,
        "firstName": "Ayesha",
        "lastName": "Khan",
        "registrationType": "Producer",
        "assignedGroup": "APPLICANT",
        "applicationStatus": "Created",
        "trackingNumber": "LHR-PRO-001"
    }],
    "businessProfiles": [{
        "applicantId": 1,
        "businessName": "Green Polymers",
        "entityType": "Sole Proprietorship",
        "address": "Plot 14, Sundar Industrial Estate",
        "district": "Lahore",
        "tehsil": "Raiwind"
    }],
    "registrations": [{
        "applicantId": 1,
        "registrationType": "Producer",
        "numberOfMachines": 3,
        "registrationRequiredFor": ["Carry bags", "Food packaging"]
    }],
    "fees": [
        { "id": 1, "applicantId": 1, "amount": "5000", "reason": "registration" },
        { "id": 2, "applicantId": 1, "amount": "1500", "reason": "inspection" }
    ],
    "recipients": [{
        "applicantId": 1,
        "email": "ayesha@greenpolymers.example",
        "preferredChannels": ["IN_APP", "EMAIL"],
        "emailVerified": true
    }]
}"#;

const REVIEW_PATH: [&str; 6] = ["LSO", "LSM", "DO", "LSO", "TL", "DG"];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Ledger snapshot (JSON) to run the demo against. Defaults to a built-in sample.
    #[arg(long)]
    pub(crate) snapshot: Option<PathBuf>,
    /// Applicant to walk through the workflow. Defaults to the first applicant.
    #[arg(long)]
    pub(crate) applicant: Option<u64>,
    /// PSID used for the simulated gateway callback.
    #[arg(long, default_value = "PSID-DEMO-0001")]
    pub(crate) psid: String,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        snapshot,
        applicant,
        psid,
    } = args;

    let ledger = match snapshot {
        Some(path) => load_ledger(Some(path.as_path())).await?,
        None => InMemoryLedger::from_snapshot(parse_snapshot(SAMPLE_SNAPSHOT)?).await,
    };
    let applicant_id = match applicant {
        Some(id) => ApplicantId(id),
        None => {
            let applicants = ledger.applicants().await.map_err(LicensingError::from)?;
            match applicants.first() {
                Some(first) => first.id,
                None => {
                    println!("Ledger has no applicants; nothing to demonstrate.");
                    return Ok(());
                }
            }
        }
    };

    let service = LicensingService::builder(Ledger::from_store(Arc::new(ledger)))
        .sender(
            AlertChannel::Email,
            Arc::new(LoggingSender::new(AlertChannel::Email)),
        )
        .build();

    println!("Licensing workflow demo");
    println!("  Applicant: {}", applicant_id.0);
    service.workflow().submit_application(applicant_id).await?;

    println!("\nReview");
    for group in REVIEW_PATH {
        let record = service
            .workflow()
            .assign(AssignmentRequest {
                applicant_id,
                assigned_group: group.to_string(),
                remarks: Some(format!("forwarded to {group}")),
                actor: Some("demo".to_string()),
            })
            .await?;
        let sent_back = service.workflow().is_sent_back(applicant_id).await?;
        println!(
            "  -> {:<16} sent back: {}",
            record.assigned_group.label(),
            if sent_back { "yes" } else { "no" }
        );
    }

    let status = service.payments().payment_status(applicant_id).await?;
    println!("\nBefore payment");
    render_payment_status(&status);

    service
        .payments()
        .register_invoice(applicant_id, &psid, status.total_due)
        .await?;
    let outcome = service
        .reconciler()
        .payment_confirmed(PaymentConfirmed {
            reference: psid.clone(),
            transaction_id: Some(format!("TXN-{}", Utc::now().timestamp())),
            status: "PAID".to_string(),
            amount: status.total_due,
            paid_at: None,
        })
        .await?;
    println!(
        "\nGateway callback for {}: {}",
        outcome.reference,
        outcome.payment_status.label()
    );
    if let Some(status) = &outcome.applicant_payment {
        render_payment_status(status);
    }

    println!("\nLicense");
    match service.licenses().license_for(applicant_id).await? {
        Some(view) => {
            println!("  Number:     {}", view.license_number);
            println!("  Owner:      {}", view.owner_name);
            println!("  Business:   {}", view.business_name);
            println!("  Plastics:   {}", view.types_of_plastics);
            println!("  Particulars: {}", view.particulars);
            println!("  Duration:   {}", view.license_duration);
            println!("  Issued:     {}", view.date_of_issue);
        }
        None => println!("  Not issued (missing registration data)"),
    }

    let alerts = service.alerts().applicant_alerts(applicant_id, false).await?;
    println!("\nAlerts ({} unread)", service.alerts().unread_count(applicant_id).await?);
    for alert in alerts.iter().rev() {
        println!("  [{:?}] {}", alert.status, alert.title);
    }

    Ok(())
}

fn render_payment_status(status: &PaymentStatus) {
    println!(
        "  Due {} | Paid {} | Remaining {} | {}% | {:?}",
        status.total_due,
        status.total_paid,
        status.remaining_balance,
        status.payment_percentage,
        status.status
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_snapshot_is_complete() {
        let snapshot = parse_snapshot(SAMPLE_SNAPSHOT).expect("sample parses");
        assert_eq!(snapshot.applicants.len(), 1);
        assert_eq!(snapshot.registrations.len(), 1);
        assert_eq!(snapshot.fees.len(), 2);
        assert_eq!(snapshot.recipients.len(), 1);
    }

    #[tokio::test]
    async fn demo_runs_against_sample_ledger() {
        run_demo(DemoArgs {
            psid: "PSID-TEST-0001".to_string(),
            ..DemoArgs::default()
        })
        .await
        .expect("demo completes");
    }
}
