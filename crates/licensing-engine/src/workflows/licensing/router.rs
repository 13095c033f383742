use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::domain::{AlertChannel, AlertId, AlertRecipient, ApplicantId, AssignmentId, NewAlert};
use super::ledger::LedgerError;
use super::reconciler::{PaymentConfirmed, PaymentFailed, ReconciliationOutcome};
use super::service::{LicensingError, LicensingService};
use super::workflow::{AssignmentRequest, GroupFilter};

type SharedService = Arc<LicensingService>;

/// Router builder exposing the workflow, payment, license and alert endpoints.
pub fn licensing_router(service: SharedService) -> Router {
    Router::new()
        .route("/api/v1/assignments", post(create_assignment_handler))
        .route(
            "/api/v1/assignments/:assignment_id",
            put(update_assignment_handler),
        )
        .route("/api/v1/workflow/summary", get(group_summary_handler))
        .route("/api/v1/workflow/groups/:group", get(group_list_handler))
        .route(
            "/api/v1/applicants/:applicant_id/assignments",
            get(history_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/submit",
            post(submit_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/payment-status",
            get(payment_status_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/payments",
            post(record_payment_handler),
        )
        .route("/api/v1/applicants/:applicant_id/fees", post(add_fee_handler))
        .route(
            "/api/v1/applicants/:applicant_id/invoices",
            post(register_invoice_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/license",
            get(license_handler).post(issue_license_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/alerts",
            get(applicant_alerts_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/alerts/unread",
            get(unread_alerts_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/alerts/unread-count",
            get(unread_count_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/alerts/read",
            post(mark_many_read_handler),
        )
        .route(
            "/api/v1/applicants/:applicant_id/alert-recipient",
            get(recipient_handler).put(save_recipient_handler),
        )
        .route("/api/v1/alerts", post(create_alert_handler))
        .route("/api/v1/alerts/:alert_id/send", post(send_alert_handler))
        .route("/api/v1/alerts/:alert_id/read", post(mark_read_handler))
        .route(
            "/api/v1/payments/psid/:reference",
            get(check_psid_handler),
        )
        .route(
            "/api/v1/payments/webhook/confirmed",
            post(webhook_confirmed_handler),
        )
        .route(
            "/api/v1/payments/webhook/failed",
            post(webhook_failed_handler),
        )
        .with_state(service)
}

impl IntoResponse for LicensingError {
    fn into_response(self) -> Response {
        let status = match &self {
            LicensingError::Validation(_) => StatusCode::BAD_REQUEST,
            LicensingError::NotFound { .. } | LicensingError::Ledger(LedgerError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            LicensingError::NoValidChannels(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LicensingError::Upstream(_) => StatusCode::BAD_GATEWAY,
            LicensingError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let payload = json!({
            "error": self.to_string(),
        });
        (status, axum::Json(payload)).into_response()
    }
}

fn respond<T>(status: StatusCode, result: Result<T, LicensingError>) -> Response
where
    T: serde::Serialize,
{
    match result {
        Ok(body) => (status, axum::Json(body)).into_response(),
        Err(error) => error.into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    let payload = json!({
        "error": message,
    });
    (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
}

pub(crate) async fn create_assignment_handler(
    State(service): State<SharedService>,
    axum::Json(request): axum::Json<AssignmentRequest>,
) -> Response {
    respond(StatusCode::CREATED, service.workflow().assign(request).await)
}

pub(crate) async fn update_assignment_handler(
    State(service): State<SharedService>,
    Path(assignment_id): Path<u64>,
    axum::Json(request): axum::Json<AssignmentRequest>,
) -> Response {
    let result = service
        .workflow()
        .update_assignment(AssignmentId(assignment_id), request)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn history_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let applicant_id = ApplicantId(applicant_id);
    let history = match service.workflow().history(applicant_id).await {
        Ok(history) => history,
        Err(error) => return error.into_response(),
    };
    match service.workflow().is_sent_back(applicant_id).await {
        Ok(is_sent_back) => {
            let payload = json!({
                "applicantId": applicant_id,
                "isSentBack": is_sent_back,
                "history": history,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn group_summary_handler(State(service): State<SharedService>) -> Response {
    respond(StatusCode::OK, service.workflow().group_summary().await)
}

pub(crate) async fn group_list_handler(
    State(service): State<SharedService>,
    Path(group): Path<String>,
) -> Response {
    let Some(filter) = GroupFilter::parse(&group) else {
        return bad_request(&format!("unknown group '{group}'"));
    };
    respond(StatusCode::OK, service.workflow().applicant_list(filter).await)
}

pub(crate) async fn submit_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let result = service
        .workflow()
        .submit_application(ApplicantId(applicant_id))
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn payment_status_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let result = service
        .payments()
        .payment_status(ApplicantId(applicant_id))
        .await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordPaymentRequest {
    amount: Decimal,
    #[serde(default, alias = "reference_number", alias = "reference")]
    reference_number: String,
}

pub(crate) async fn record_payment_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
    axum::Json(request): axum::Json<RecordPaymentRequest>,
) -> Response {
    let result = service
        .payments()
        .record_payment(
            ApplicantId(applicant_id),
            request.amount,
            &request.reference_number,
        )
        .await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeeRequest {
    amount: Decimal,
    #[serde(default)]
    reason: String,
}

pub(crate) async fn add_fee_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
    axum::Json(request): axum::Json<FeeRequest>,
) -> Response {
    let result = service
        .payments()
        .add_fee(ApplicantId(applicant_id), request.amount, &request.reason)
        .await;
    respond(StatusCode::CREATED, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InvoiceRequest {
    #[serde(alias = "psid_number", alias = "consumerNumber")]
    psid_number: String,
    #[serde(alias = "amount_within_due_date")]
    amount_within_due_date: Decimal,
}

pub(crate) async fn register_invoice_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
    axum::Json(request): axum::Json<InvoiceRequest>,
) -> Response {
    let result = service
        .payments()
        .register_invoice(
            ApplicantId(applicant_id),
            &request.psid_number,
            request.amount_within_due_date,
        )
        .await;
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn check_psid_handler(
    State(service): State<SharedService>,
    Path(reference): Path<String>,
) -> Response {
    let result = service
        .reconciler()
        .check_psid_payment_status(&reference)
        .await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfirmedWebhook {
    #[serde(default, alias = "psid_number", alias = "consumerNumber")]
    psid_number: Option<String>,
    #[serde(default, alias = "transaction_id")]
    transaction_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default, alias = "payment_date")]
    payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FailedWebhook {
    #[serde(default, alias = "psid_number", alias = "consumerNumber")]
    psid_number: Option<String>,
    #[serde(default, alias = "transaction_id")]
    transaction_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn webhook_response(
    result: Result<ReconciliationOutcome, LicensingError>,
    message: &str,
) -> Response {
    match result {
        Ok(outcome) => {
            let payload = json!({
                "success": true,
                "message": message,
                "outcome": outcome,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(LicensingError::Validation(error)) => {
            let payload = json!({
                "success": false,
                "error": error,
            });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        // 5xx lets the gateway retry; handlers are idempotent per reference.
        Err(other) => {
            let payload = json!({
                "success": false,
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

fn missing_fields() -> Response {
    let payload = json!({
        "success": false,
        "error": "Missing required fields",
    });
    (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
}

pub(crate) async fn webhook_confirmed_handler(
    State(service): State<SharedService>,
    axum::Json(payload): axum::Json<ConfirmedWebhook>,
) -> Response {
    let ConfirmedWebhook {
        psid_number,
        transaction_id,
        status,
        amount,
        payment_date,
    } = payload;
    let (Some(reference), Some(transaction_id), Some(status), Some(amount)) = (
        present(psid_number),
        present(transaction_id),
        present(status),
        amount,
    ) else {
        return missing_fields();
    };

    let result = service
        .reconciler()
        .payment_confirmed(PaymentConfirmed {
            reference,
            transaction_id: Some(transaction_id),
            status,
            amount,
            paid_at: payment_date,
        })
        .await;
    webhook_response(result, "Payment confirmation processed")
}

pub(crate) async fn webhook_failed_handler(
    State(service): State<SharedService>,
    axum::Json(payload): axum::Json<FailedWebhook>,
) -> Response {
    let FailedWebhook {
        psid_number,
        transaction_id,
        reason,
    } = payload;
    let (Some(reference), Some(transaction_id)) = (present(psid_number), present(transaction_id))
    else {
        return missing_fields();
    };

    let result = service
        .reconciler()
        .payment_failed(PaymentFailed {
            reference,
            transaction_id: Some(transaction_id),
            reason,
        })
        .await;
    webhook_response(result, "Payment failure processed")
}

pub(crate) async fn license_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let applicant_id = ApplicantId(applicant_id);
    match service.licenses().license_for(applicant_id).await {
        Ok(Some(view)) => (StatusCode::OK, axum::Json(view)).into_response(),
        Ok(None) => {
            LicensingError::not_found("license for applicant", applicant_id).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn issue_license_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    match service
        .licenses()
        .create_or_update_license(ApplicantId(applicant_id))
        .await
    {
        Ok(Some(license)) => (StatusCode::OK, axum::Json(license)).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": "application has not reached Download License",
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn create_alert_handler(
    State(service): State<SharedService>,
    axum::Json(event): axum::Json<NewAlert>,
) -> Response {
    respond(StatusCode::CREATED, service.alerts().create_alert(event).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendAlertRequest {
    #[serde(default)]
    channels: Vec<AlertChannel>,
}

pub(crate) async fn send_alert_handler(
    State(service): State<SharedService>,
    Path(alert_id): Path<u64>,
    axum::Json(request): axum::Json<SendAlertRequest>,
) -> Response {
    let result = service
        .alerts()
        .send_alert(AlertId(alert_id), &request.channels)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn applicant_alerts_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let result = service
        .alerts()
        .applicant_alerts(ApplicantId(applicant_id), false)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn unread_alerts_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let result = service
        .alerts()
        .applicant_alerts(ApplicantId(applicant_id), true)
        .await;
    respond(StatusCode::OK, result)
}

pub(crate) async fn unread_count_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let result = service
        .alerts()
        .unread_count(ApplicantId(applicant_id))
        .await
        .map(|count| json!({ "unreadCount": count }));
    respond(StatusCode::OK, result)
}

pub(crate) async fn mark_read_handler(
    State(service): State<SharedService>,
    Path(alert_id): Path<u64>,
) -> Response {
    respond(
        StatusCode::OK,
        service.alerts().mark_as_read(AlertId(alert_id)).await,
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkReadRequest {
    #[serde(default, alias = "alert_ids")]
    alert_ids: Vec<AlertId>,
}

pub(crate) async fn mark_many_read_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
    axum::Json(request): axum::Json<MarkReadRequest>,
) -> Response {
    let result = service
        .alerts()
        .mark_many_as_read(ApplicantId(applicant_id), &request.alert_ids)
        .await
        .map(|count| json!({ "updated": count }));
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecipientPreferences {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    whatsapp: Option<String>,
    #[serde(default, alias = "preferred_channels")]
    preferred_channels: Vec<AlertChannel>,
    #[serde(default, alias = "email_verified")]
    email_verified: bool,
    #[serde(default, alias = "phone_verified")]
    phone_verified: bool,
    #[serde(default, alias = "whatsapp_verified")]
    whatsapp_verified: bool,
}

pub(crate) async fn recipient_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
) -> Response {
    let applicant_id = ApplicantId(applicant_id);
    match service.alerts().recipient(applicant_id).await {
        Ok(Some(recipient)) => (StatusCode::OK, axum::Json(recipient)).into_response(),
        Ok(None) => LicensingError::not_found("alert recipient", applicant_id).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn save_recipient_handler(
    State(service): State<SharedService>,
    Path(applicant_id): Path<u64>,
    axum::Json(preferences): axum::Json<RecipientPreferences>,
) -> Response {
    let recipient = AlertRecipient {
        applicant_id: ApplicantId(applicant_id),
        email: preferences.email,
        phone: preferences.phone,
        whatsapp: preferences.whatsapp,
        preferred_channels: preferences.preferred_channels,
        email_verified: preferences.email_verified,
        phone_verified: preferences.phone_verified,
        whatsapp_verified: preferences.whatsapp_verified,
    };
    let result = service
        .alerts()
        .save_recipient(recipient.clone())
        .await
        .map(|_| recipient);
    respond(StatusCode::OK, result)
}
