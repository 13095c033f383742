use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::alerts::AlertDispatcher;
use super::domain::{
    AlertPriority, AlertType, Applicant, ApplicantId, AssignmentId, AssignmentRecord, NewAlert,
    NewAssignment, ReviewGroup,
};
use super::ledger::{Ledger, ViewInvalidator};
use super::license::LicenseIssuer;
use super::locks::KeyedLocks;
use super::service::{report_side_effect_failure, LicensingError};

const IN_PROCESS: &str = "In Process";

/// Reviewer request to move an application to another group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    #[serde(alias = "applicant_id")]
    pub applicant_id: ApplicantId,
    #[serde(alias = "assigned_group")]
    pub assigned_group: String,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// True when the application came back from a later review group.
///
/// Only the second-to-last history entry is compared against the current group; older
/// entries never influence the flag.
pub fn detect_sent_back(current: ReviewGroup, history: &[AssignmentRecord]) -> bool {
    match history.len().checked_sub(2).and_then(|index| history.get(index)) {
        Some(previous) => previous.assigned_group.index() > current.index(),
        None => false,
    }
}

/// Selector for applicant listings: a workflow group or a reporting bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter {
    Workflow(ReviewGroup),
    Pmc,
    Submitted,
    Lso1,
    Lso2,
    Lso3,
}

impl GroupFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PMC" => Some(Self::Pmc),
            "SUBMITTED" => Some(Self::Submitted),
            "LSO1" => Some(Self::Lso1),
            "LSO2" => Some(Self::Lso2),
            "LSO3" => Some(Self::Lso3),
            _ => ReviewGroup::from_label(raw).map(Self::Workflow),
        }
    }

    fn matches(self, applicant: &Applicant, submitted: bool) -> bool {
        let in_lso = applicant.assigned_group == ReviewGroup::Lso;
        match self {
            Self::Workflow(group) => applicant.assigned_group == group,
            Self::Pmc => applicant.assigned_group.is_pmc(),
            Self::Submitted => submitted,
            Self::Lso1 => in_lso && applicant.id.0 % 3 == 1,
            Self::Lso2 => in_lso && applicant.id.0 % 3 == 2,
            Self::Lso3 => in_lso && applicant.id.0 % 3 == 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantListEntry {
    #[serde(flatten)]
    pub applicant: Applicant,
    pub is_sent_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub group: ReviewGroup,
    pub count: usize,
    pub sent_back: usize,
}

/// Applicant counts per workflow group plus the reporting buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub groups: Vec<GroupCount>,
    pub pmc: usize,
    pub submitted: usize,
    pub total: usize,
}

/// Validates and applies review-group transitions.
pub struct WorkflowService {
    ledger: Ledger,
    applicant_locks: Arc<KeyedLocks<ApplicantId>>,
    licenses: Arc<LicenseIssuer>,
    invalidator: Arc<dyn ViewInvalidator>,
    alerts: Arc<AlertDispatcher>,
}

impl WorkflowService {
    pub fn new(
        ledger: Ledger,
        applicant_locks: Arc<KeyedLocks<ApplicantId>>,
        licenses: Arc<LicenseIssuer>,
        invalidator: Arc<dyn ViewInvalidator>,
        alerts: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            ledger,
            applicant_locks,
            licenses,
            invalidator,
            alerts,
        }
    }

    /// Moves an applicant to `request.assigned_group`, appending one history record.
    ///
    /// The applicant write completes before license issuance, view invalidation and the
    /// status alert run; none of those can fail the assignment.
    pub async fn assign(
        &self,
        request: AssignmentRequest,
    ) -> Result<AssignmentRecord, LicensingError> {
        let group = parse_group(&request.assigned_group)?;
        let applicant_id = request.applicant_id;

        let guard = self.applicant_locks.acquire(&applicant_id).await;
        let mut applicant = self
            .ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))?;

        let record = self
            .ledger
            .applicants
            .append_assignment(NewAssignment {
                applicant_id,
                assigned_group: group,
                remarks: normalize(request.remarks),
                actor: normalize(request.actor),
                created_at: Utc::now(),
            })
            .await?;

        let previous = applicant.assigned_group;
        applicant.assigned_group = group;
        if group.marks_in_process() {
            applicant.application_status = IN_PROCESS.to_string();
        }
        let tracking_number = applicant.tracking_number.clone();
        self.ledger.applicants.save_applicant(applicant).await?;
        drop(guard);

        info!(
            applicant_id = applicant_id.0,
            from = %previous,
            to = %group,
            assignment_id = record.id.0,
            "applicant assigned"
        );

        if previous == ReviewGroup::DownloadLicense && group != ReviewGroup::DownloadLicense {
            self.licenses.withdraw_best_effort(applicant_id).await;
        } else {
            self.licenses.issue_best_effort(applicant_id).await;
        }
        self.invalidate(applicant_id).await;
        self.alerts
            .notify(NewAlert {
                applicant_id,
                title: "Application status updated".to_string(),
                message: format!("Application {tracking_number} has been moved to {group}."),
                alert_type: AlertType::ApplicationStatus,
                priority: AlertPriority::Medium,
                channels: Vec::new(),
            })
            .await;

        Ok(record)
    }

    /// Corrects an existing history record in place. The applicant's current group is
    /// left alone; only derived views are refreshed.
    pub async fn update_assignment(
        &self,
        assignment_id: AssignmentId,
        request: AssignmentRequest,
    ) -> Result<AssignmentRecord, LicensingError> {
        let group = parse_group(&request.assigned_group)?;

        let guard = self.applicant_locks.acquire(&request.applicant_id).await;
        let mut record = self
            .ledger
            .applicants
            .assignment(assignment_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("assignment", assignment_id.0))?;
        if record.applicant_id != request.applicant_id {
            return Err(LicensingError::validation(format!(
                "assignment {} does not belong to applicant {}",
                assignment_id.0, request.applicant_id
            )));
        }

        record.assigned_group = group;
        record.remarks = normalize(request.remarks);
        if let Some(actor) = normalize(request.actor) {
            record.actor = Some(actor);
        }
        self.ledger
            .applicants
            .update_assignment(record.clone())
            .await?;
        drop(guard);

        info!(
            applicant_id = record.applicant_id.0,
            assignment_id = assignment_id.0,
            group = %group,
            "assignment updated"
        );
        self.invalidate(record.applicant_id).await;
        Ok(record)
    }

    pub async fn history(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Vec<AssignmentRecord>, LicensingError> {
        self.require_applicant(applicant_id).await?;
        Ok(self.ledger.applicants.assignments_for(applicant_id).await?)
    }

    pub async fn is_sent_back(&self, applicant_id: ApplicantId) -> Result<bool, LicensingError> {
        let applicant = self.require_applicant(applicant_id).await?;
        let history = self.ledger.applicants.assignments_for(applicant_id).await?;
        Ok(detect_sent_back(applicant.assigned_group, &history))
    }

    pub async fn applicant_list(
        &self,
        filter: GroupFilter,
    ) -> Result<Vec<ApplicantListEntry>, LicensingError> {
        let submitted = self.ledger.applicants.submitted_applicants().await?;
        let mut entries = Vec::new();
        for applicant in self.ledger.applicants.applicants().await? {
            if !filter.matches(&applicant, submitted.contains(&applicant.id)) {
                continue;
            }
            let history = self.ledger.applicants.assignments_for(applicant.id).await?;
            let is_sent_back = detect_sent_back(applicant.assigned_group, &history);
            entries.push(ApplicantListEntry {
                applicant,
                is_sent_back,
            });
        }
        Ok(entries)
    }

    pub async fn group_summary(&self) -> Result<GroupSummary, LicensingError> {
        let applicants = self.ledger.applicants.applicants().await?;
        let submitted = self.ledger.applicants.submitted_applicants().await?;

        let mut groups: Vec<GroupCount> = ReviewGroup::SEQUENCE
            .into_iter()
            .map(|group| GroupCount {
                group,
                count: 0,
                sent_back: 0,
            })
            .collect();
        let mut pmc = 0;
        for applicant in &applicants {
            let history = self.ledger.applicants.assignments_for(applicant.id).await?;
            let slot = &mut groups[applicant.assigned_group.index()];
            slot.count += 1;
            if detect_sent_back(applicant.assigned_group, &history) {
                slot.sent_back += 1;
            }
            if applicant.assigned_group.is_pmc() {
                pmc += 1;
            }
        }

        Ok(GroupSummary {
            groups,
            pmc,
            submitted: applicants
                .iter()
                .filter(|applicant| submitted.contains(&applicant.id))
                .count(),
            total: applicants.len(),
        })
    }

    /// Records the submission marker read by the `Submitted` reporting bucket.
    pub async fn submit_application(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Applicant, LicensingError> {
        let guard = self.applicant_locks.acquire(&applicant_id).await;
        let applicant = self.require_applicant(applicant_id).await?;
        self.ledger
            .applicants
            .record_submission(applicant_id)
            .await?;
        drop(guard);

        info!(applicant_id = applicant_id.0, "application submitted");
        self.invalidate(applicant_id).await;
        Ok(applicant)
    }

    async fn require_applicant(
        &self,
        applicant_id: ApplicantId,
    ) -> Result<Applicant, LicensingError> {
        self.ledger
            .applicants
            .applicant(applicant_id)
            .await?
            .ok_or_else(|| LicensingError::not_found("applicant", applicant_id))
    }

    async fn invalidate(&self, applicant_id: ApplicantId) {
        if let Err(error) = self.invalidator.invalidate(applicant_id).await {
            report_side_effect_failure("view_invalidation", Some(applicant_id), &error);
        }
    }
}

fn parse_group(raw: &str) -> Result<ReviewGroup, LicensingError> {
    ReviewGroup::from_label(raw).ok_or_else(|| {
        LicensingError::validation(format!("unknown review group '{}'", raw.trim()))
    })
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
