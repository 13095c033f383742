use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;

use crate::config::{AlertDeliveryMode, LicensingConfig};
use crate::workflows::licensing::alerts::{ChannelError, NotificationSender};
use crate::workflows::licensing::domain::{
    Alert, AlertChannel, AlertId, AlertRecipient, Applicant, ApplicantId, BusinessProfile,
    NewFee, RegistrationDetails, RegistrationType, ReviewGroup,
};
use crate::workflows::licensing::ledger::{
    ApplicantRepository, Ledger, LedgerError, PaymentLedger, ViewInvalidator,
};
use crate::workflows::licensing::memory::InMemoryLedger;
use crate::workflows::licensing::reconciler::{GatewayError, GatewayPayment, PaymentGateway};
use crate::workflows::licensing::service::LicensingService;
use crate::workflows::licensing::workflow::AssignmentRequest;

pub(super) const PRODUCER: ApplicantId = ApplicantId(1);
pub(super) const COLLECTOR: ApplicantId = ApplicantId(2);

pub(super) fn applicant(
    id: ApplicantId,
    registration_type: RegistrationType,
    group: ReviewGroup,
) -> Applicant {
    Applicant {
        id,
        first_name: "Ayesha".to_string(),
        last_name: format!("Khan {}", id.0),
        mobile_no: Some("03001234567".to_string()),
        email: Some(format!("applicant{}@example.com", id.0)),
        registration_type,
        assigned_group: group,
        application_status: "Created".to_string(),
        tracking_number: format!("LHR-{:03}", id.0),
    }
}

pub(super) fn business_profile(id: ApplicantId) -> BusinessProfile {
    BusinessProfile {
        applicant_id: id,
        business_name: format!("Green Polymers {}", id.0),
        entity_type: "Sole Proprietorship".to_string(),
        address: "Plot 14, Sundar Industrial Estate, Lahore".to_string(),
        district: Some("Lahore".to_string()),
        tehsil: Some("Raiwind".to_string()),
    }
}

pub(super) fn producer_details() -> RegistrationDetails {
    RegistrationDetails::Producer {
        number_of_machines: 4,
        registration_required_for: vec!["Carry bags".to_string(), "PET bottles".to_string()],
    }
}

pub(super) fn collector_details() -> RegistrationDetails {
    RegistrationDetails::Collector {
        selected_categories: vec!["HDPE".to_string(), "LDPE".to_string()],
    }
}

/// Ledger with a producer (fees 3000 + 2000) and a collector (fee 2500), both in
/// `APPLICANT` with complete registration data.
pub(super) async fn seeded_ledger() -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    ledger
        .save_applicant(applicant(
            PRODUCER,
            RegistrationType::Producer,
            ReviewGroup::Applicant,
        ))
        .await
        .expect("seed producer");
    ledger
        .save_applicant(applicant(
            COLLECTOR,
            RegistrationType::Collector,
            ReviewGroup::Applicant,
        ))
        .await
        .expect("seed collector");
    ledger.insert_business_profile(business_profile(PRODUCER)).await;
    ledger.insert_business_profile(business_profile(COLLECTOR)).await;
    ledger.insert_registration(PRODUCER, producer_details()).await;
    ledger.insert_registration(COLLECTOR, collector_details()).await;

    for (applicant_id, amount) in [
        (PRODUCER, dec!(3000)),
        (PRODUCER, dec!(2000)),
        (COLLECTOR, dec!(2500)),
    ] {
        ledger
            .add_fee(NewFee {
                applicant_id,
                amount,
                reason: "registration".to_string(),
            })
            .await
            .expect("seed fee");
    }
    ledger
}

pub(super) fn service_for(ledger: &InMemoryLedger) -> Arc<LicensingService> {
    Arc::new(LicensingService::builder(Ledger::from_store(Arc::new(ledger.clone()))).build())
}

pub(super) async fn build_service() -> (Arc<LicensingService>, InMemoryLedger) {
    let ledger = seeded_ledger().await;
    (service_for(&ledger), ledger)
}

pub(super) fn config_with(mode: AlertDeliveryMode) -> LicensingConfig {
    LicensingConfig {
        alert_delivery: mode,
        ..LicensingConfig::default()
    }
}

pub(super) fn request(applicant_id: ApplicantId, group: &str) -> AssignmentRequest {
    AssignmentRequest {
        applicant_id,
        assigned_group: group.to_string(),
        remarks: None,
        actor: Some("reviewer@epa".to_string()),
    }
}

pub(super) async fn walk(
    service: &LicensingService,
    applicant_id: ApplicantId,
    groups: &[&str],
) {
    for group in groups {
        service
            .workflow()
            .assign(request(applicant_id, group))
            .await
            .expect("assignment succeeds");
    }
}

pub(super) fn recipient(applicant_id: ApplicantId, channels: &[AlertChannel]) -> AlertRecipient {
    AlertRecipient {
        applicant_id,
        email: Some("owner@example.com".to_string()),
        phone: Some("03001234567".to_string()),
        whatsapp: None,
        preferred_channels: channels.to_vec(),
        email_verified: true,
        phone_verified: true,
        whatsapp_verified: false,
    }
}

pub(super) fn amount(value: &Value) -> Decimal {
    match value {
        Value::String(raw) => raw.parse().expect("decimal string"),
        Value::Number(number) => number.to_string().parse().expect("decimal number"),
        other => panic!("not an amount: {other}"),
    }
}

/// Sender capturing every delivery.
#[derive(Default)]
pub(super) struct RecordingSender {
    pub(super) sent: Mutex<Vec<(String, AlertId)>>,
}

impl RecordingSender {
    pub(super) fn deliveries(&self) -> Vec<(String, AlertId)> {
        self.sent.lock().expect("sender mutex poisoned").clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, address: &str, alert: &Alert) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .expect("sender mutex poisoned")
            .push((address.to_string(), alert.id));
        Ok(())
    }
}

/// Sender whose transport always fails.
pub(super) struct FailingSender;

#[async_trait]
impl NotificationSender for FailingSender {
    async fn send(&self, _address: &str, _alert: &Alert) -> Result<(), ChannelError> {
        Err(ChannelError::Transport("smtp relay refused connection".to_string()))
    }
}

/// Invalidator standing in for an unreachable cache.
pub(super) struct UnavailableInvalidator;

#[async_trait]
impl ViewInvalidator for UnavailableInvalidator {
    async fn invalidate(&self, _applicant_id: ApplicantId) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable("cache offline".to_string()))
    }
}

/// Gateway returning a fixed answer for every reference.
pub(super) struct StubGateway {
    pub(super) answer: Result<Option<GatewayPayment>, String>,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn payment_status(
        &self,
        _reference: &str,
    ) -> Result<Option<GatewayPayment>, GatewayError> {
        self.answer.clone().map_err(GatewayError::Request)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) fn json_request(
    method: &str,
    uri: &str,
    body: Value,
) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(&body).expect("serialize body"),
        ))
        .expect("build request")
}

pub(super) fn get_request(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .expect("build request")
}
