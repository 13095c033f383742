use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier wrapper for registered applicants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicantId(pub u64);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration category chosen by the applicant at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationType {
    #[serde(alias = "producer", alias = "PRODUCER")]
    Producer,
    #[serde(alias = "consumer", alias = "CONSUMER")]
    Consumer,
    #[serde(alias = "collector", alias = "COLLECTOR")]
    Collector,
    #[serde(alias = "recycler", alias = "RECYCLER")]
    Recycler,
}

/// Review role currently owning an application.
///
/// Declaration order is the workflow order and drives sent-back detection. `Lsm2` is a
/// separate slot from `Lsm` even though both are staffed by the same role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReviewGroup {
    Applicant,
    Lso,
    Lsm,
    Do,
    Lsm2,
    Tl,
    Deo,
    Dg,
    DownloadLicense,
}

impl ReviewGroup {
    pub const SEQUENCE: [ReviewGroup; 9] = [
        ReviewGroup::Applicant,
        ReviewGroup::Lso,
        ReviewGroup::Lsm,
        ReviewGroup::Do,
        ReviewGroup::Lsm2,
        ReviewGroup::Tl,
        ReviewGroup::Deo,
        ReviewGroup::Dg,
        ReviewGroup::DownloadLicense,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ReviewGroup::Applicant => "APPLICANT",
            ReviewGroup::Lso => "LSO",
            ReviewGroup::Lsm => "LSM",
            ReviewGroup::Do => "DO",
            ReviewGroup::Lsm2 => "LSM2",
            ReviewGroup::Tl => "TL",
            ReviewGroup::Deo => "DEO",
            ReviewGroup::Dg => "DG",
            ReviewGroup::DownloadLicense => "Download License",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Parses stored or requested labels, tolerating the legacy spellings of the
    /// terminal group (`DOWNLOAD_LICENSE`, `download-license`).
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace(['_', '-'], " ");
        Self::SEQUENCE
            .into_iter()
            .find(|group| group.label().eq_ignore_ascii_case(&normalized))
    }

    /// Whether assigning this group moves the application into review.
    pub const fn marks_in_process(self) -> bool {
        !matches!(self, ReviewGroup::Applicant | ReviewGroup::DownloadLicense)
    }

    /// Groups counted under the `PMC` reporting bucket.
    pub const fn is_pmc(self) -> bool {
        matches!(
            self,
            ReviewGroup::Lso | ReviewGroup::Lsm | ReviewGroup::Lsm2 | ReviewGroup::Tl
        )
    }
}

impl fmt::Display for ReviewGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<String> for ReviewGroup {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ReviewGroup::from_label(&value).ok_or_else(|| format!("unknown review group '{value}'"))
    }
}

impl From<ReviewGroup> for String {
    fn from(value: ReviewGroup) -> Self {
        value.label().to_string()
    }
}

/// Registered applicant as seen by the workflow core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Applicant {
    pub id: ApplicantId,
    #[serde(alias = "first_name")]
    pub first_name: String,
    #[serde(default, alias = "last_name")]
    pub last_name: String,
    #[serde(default, alias = "mobile_no")]
    pub mobile_no: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(alias = "registration_for", alias = "registration_type")]
    pub registration_type: RegistrationType,
    #[serde(alias = "assigned_group")]
    pub assigned_group: ReviewGroup,
    #[serde(default, alias = "application_status")]
    pub application_status: String,
    #[serde(alias = "tracking_number")]
    pub tracking_number: String,
}

impl Applicant {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// Append-only workflow history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub id: AssignmentId,
    pub applicant_id: ApplicantId,
    pub assigned_group: ReviewGroup,
    pub remarks: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Assignment awaiting an identifier from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub applicant_id: ApplicantId,
    pub assigned_group: ReviewGroup,
    pub remarks: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fee obligation raised against an applicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: FeeId,
    #[serde(alias = "applicant_id")]
    pub applicant_id: ApplicantId,
    pub amount: Decimal,
    #[serde(default, alias = "is_settled")]
    pub is_settled: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFee {
    pub applicant_id: ApplicantId,
    pub amount: Decimal,
    pub reason: String,
}

/// Gateway-facing status of a payment record. Labels are compared case-insensitively;
/// anything unrecognized is retained verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentRecordStatus {
    Pending,
    Paid,
    Confirmed,
    Success,
    Completed,
    Failed,
    Other(String),
}

impl PaymentRecordStatus {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "" => Self::Pending,
            "PAID" => Self::Paid,
            "CONFIRMED" => Self::Confirmed,
            "SUCCESS" => Self::Success,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Confirmed => "CONFIRMED",
            Self::Success => "SUCCESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Other(label) => label.as_str(),
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Confirmed | Self::Success | Self::Completed
        )
    }
}

impl From<String> for PaymentRecordStatus {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<PaymentRecordStatus> for String {
    fn from(value: PaymentRecordStatus) -> Self {
        value.label().to_string()
    }
}

/// Ledger entry tracking one gateway obligation (PSID) and its settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    #[serde(default, alias = "applicant_id")]
    pub applicant_id: Option<ApplicantId>,
    #[serde(alias = "consumer_number", alias = "psid_number", alias = "psidNumber")]
    pub external_reference: String,
    #[serde(default, alias = "external_transaction_id")]
    pub external_transaction_id: Option<String>,
    #[serde(default, alias = "amount_within_due_date")]
    pub amount_within_due_date: Decimal,
    #[serde(default, alias = "amount_paid")]
    pub amount_paid: Option<Decimal>,
    #[serde(alias = "payment_status")]
    pub payment_status: PaymentRecordStatus,
    #[serde(default, alias = "failure_reason")]
    pub failure_reason: Option<String>,
    #[serde(default, alias = "paid_at", alias = "paid_date")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Amount credited towards the applicant's dues when the record is settled.
    pub fn credited_amount(&self) -> Decimal {
        self.amount_paid.unwrap_or(self.amount_within_due_date)
    }
}

/// Business details captured during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    #[serde(alias = "applicant_id")]
    pub applicant_id: ApplicantId,
    #[serde(alias = "business_name", alias = "name")]
    pub business_name: String,
    #[serde(default, alias = "entity_type")]
    pub entity_type: String,
    #[serde(default, alias = "postal_address")]
    pub address: String,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub tehsil: Option<String>,
}

/// Registration-type specific details. Each category keeps its plastics list under a
/// different field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "registrationType")]
pub enum RegistrationDetails {
    #[serde(rename_all = "camelCase")]
    Producer {
        #[serde(alias = "number_of_machines")]
        number_of_machines: u32,
        #[serde(alias = "registration_required_for")]
        registration_required_for: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Consumer {
        #[serde(alias = "consumption_plastics")]
        consumption_plastics: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Collector {
        #[serde(alias = "selected_categories")]
        selected_categories: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Recycler {
        #[serde(alias = "plastic_waste_acquired_through")]
        plastic_waste_acquired_through: Vec<String>,
    },
}

impl RegistrationDetails {
    pub fn registration_type(&self) -> RegistrationType {
        match self {
            RegistrationDetails::Producer { .. } => RegistrationType::Producer,
            RegistrationDetails::Consumer { .. } => RegistrationType::Consumer,
            RegistrationDetails::Collector { .. } => RegistrationType::Collector,
            RegistrationDetails::Recycler { .. } => RegistrationType::Recycler,
        }
    }

    pub fn plastic_types(&self) -> &[String] {
        match self {
            RegistrationDetails::Producer {
                registration_required_for,
                ..
            } => registration_required_for,
            RegistrationDetails::Consumer {
                consumption_plastics,
            } => consumption_plastics,
            RegistrationDetails::Collector {
                selected_categories,
            } => selected_categories,
            RegistrationDetails::Recycler {
                plastic_waste_acquired_through,
            } => plastic_waste_acquired_through,
        }
    }
}

/// Issued license. At most one per applicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub applicant_id: ApplicantId,
    pub license_number: String,
    pub owner_name: String,
    pub business_name: String,
    pub types_of_plastics: String,
    pub particulars: String,
    pub fee_amount: Decimal,
    pub address: String,
    pub license_duration: String,
    pub date_of_issue: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertChannel {
    InApp,
    Email,
    Sms,
    #[serde(rename = "WHATSAPP", alias = "WHATS_APP")]
    WhatsApp,
}

impl AlertChannel {
    pub const fn label(self) -> &'static str {
        match self {
            AlertChannel::InApp => "IN_APP",
            AlertChannel::Email => "EMAIL",
            AlertChannel::Sms => "SMS",
            AlertChannel::WhatsApp => "WHATSAPP",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    ApplicationStatus,
    PaymentDue,
    PaymentReceived,
    PaymentFailed,
    LicenseIssued,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Pending,
    Sent,
    Failed,
    Read,
}

/// Outcome of one channel attempt during a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDelivery {
    pub channel: AlertChannel,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub applicant_id: ApplicantId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub channels: Vec<AlertChannel>,
    pub status: AlertStatus,
    pub is_read: bool,
    pub retry_count: u32,
    pub deliveries: Vec<ChannelDelivery>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Domain event payload accepted by `create_alert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub applicant_id: ApplicantId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    #[serde(default)]
    pub priority: AlertPriority,
    #[serde(default)]
    pub channels: Vec<AlertChannel>,
}

/// Per-applicant channel preferences and verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecipient {
    #[serde(alias = "applicant_id")]
    pub applicant_id: ApplicantId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, alias = "whatsapp_number")]
    pub whatsapp: Option<String>,
    #[serde(default, alias = "preferred_channels")]
    pub preferred_channels: Vec<AlertChannel>,
    #[serde(default, alias = "email_verified")]
    pub email_verified: bool,
    #[serde(default, alias = "phone_verified")]
    pub phone_verified: bool,
    #[serde(default, alias = "whatsapp_verified")]
    pub whatsapp_verified: bool,
}

impl AlertRecipient {
    /// A channel is usable when preferred and, for external transports, verified.
    pub fn accepts(&self, channel: AlertChannel) -> bool {
        if !self.preferred_channels.contains(&channel) {
            return false;
        }
        match channel {
            AlertChannel::InApp => true,
            AlertChannel::Email => self.email_verified,
            AlertChannel::Sms => self.phone_verified,
            AlertChannel::WhatsApp => self.whatsapp_verified,
        }
    }
}
