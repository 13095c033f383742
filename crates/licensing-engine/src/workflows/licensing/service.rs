use std::fmt::Display;
use std::sync::Arc;

use tracing::warn;

use super::alerts::{AlertDispatcher, NotificationSender};
use super::domain::{AlertChannel, AlertId, ApplicantId};
use super::ledger::{Ledger, LedgerError, NoopInvalidator, ViewInvalidator};
use super::license::LicenseIssuer;
use super::locks::KeyedLocks;
use super::payments::PaymentService;
use super::reconciler::{GatewayReconciler, OfflineGateway, PaymentGateway};
use super::workflow::WorkflowService;
use crate::config::LicensingConfig;

/// Error raised by the licensing services.
#[derive(Debug, thiserror::Error)]
pub enum LicensingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("no valid channels for alert {0}")]
    NoValidChannels(AlertId),
    #[error("upstream dependency failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl LicensingError {
    pub(crate) fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Records a side effect that failed after its triggering operation committed. The
/// failure is logged and counted, never propagated.
pub(crate) fn report_side_effect_failure(
    effect: &'static str,
    applicant_id: Option<ApplicantId>,
    error: &dyn Display,
) {
    warn!(
        effect,
        applicant_id = applicant_id.map(|id| id.0),
        error = %error,
        "side effect failed; triggering operation kept"
    );
    metrics::counter!("licensing_side_effect_failures_total", "effect" => effect).increment(1);
}

/// Facade composing the workflow, payment, license, reconciliation and alert services
/// over one ledger.
pub struct LicensingService {
    ledger: Ledger,
    workflow: WorkflowService,
    payments: Arc<PaymentService>,
    licenses: Arc<LicenseIssuer>,
    reconciler: GatewayReconciler,
    alerts: Arc<AlertDispatcher>,
}

impl LicensingService {
    pub fn builder(ledger: Ledger) -> LicensingServiceBuilder {
        LicensingServiceBuilder {
            ledger,
            config: LicensingConfig::default(),
            senders: Vec::new(),
            gateway: None,
            invalidator: None,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn workflow(&self) -> &WorkflowService {
        &self.workflow
    }

    pub fn payments(&self) -> &PaymentService {
        &self.payments
    }

    pub fn licenses(&self) -> &LicenseIssuer {
        &self.licenses
    }

    pub fn reconciler(&self) -> &GatewayReconciler {
        &self.reconciler
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }
}

pub struct LicensingServiceBuilder {
    ledger: Ledger,
    config: LicensingConfig,
    senders: Vec<(AlertChannel, Arc<dyn NotificationSender>)>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    invalidator: Option<Arc<dyn ViewInvalidator>>,
}

impl LicensingServiceBuilder {
    pub fn config(mut self, config: LicensingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sender(mut self, channel: AlertChannel, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.push((channel, sender));
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn invalidator(mut self, invalidator: Arc<dyn ViewInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn build(self) -> LicensingService {
        let LicensingServiceBuilder {
            ledger,
            config,
            senders,
            gateway,
            invalidator,
        } = self;

        let mut dispatcher = AlertDispatcher::new(
            ledger.alerts.clone(),
            ledger.applicants.clone(),
            config.alert_delivery,
        );
        for (channel, sender) in senders {
            dispatcher = dispatcher.with_sender(channel, sender);
        }
        let alerts = Arc::new(dispatcher);

        let applicant_locks = Arc::new(KeyedLocks::new());
        let licenses = Arc::new(LicenseIssuer::new(
            ledger.clone(),
            config.clone(),
            alerts.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            ledger.clone(),
            config,
            applicant_locks.clone(),
            licenses.clone(),
            alerts.clone(),
        ));
        let workflow = WorkflowService::new(
            ledger.clone(),
            applicant_locks,
            licenses.clone(),
            invalidator.unwrap_or_else(|| Arc::new(NoopInvalidator)),
            alerts.clone(),
        );
        let reconciler = GatewayReconciler::new(
            payments.clone(),
            gateway.unwrap_or_else(|| Arc::new(OfflineGateway)),
        );

        LicensingService {
            ledger,
            workflow,
            payments,
            licenses,
            reconciler,
            alerts,
        }
    }
}
