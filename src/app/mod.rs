pub mod certificates;
pub mod dto;
pub mod error;
pub mod institutions;
pub mod reconcile;

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use certificates::{CertificateService, MAX_BATCH_SIZE};
pub use error::{IssuanceStage, ServiceError, ServiceResult};
pub use institutions::{AuthenticatedInstitution, InstitutionService};
pub use reconcile::{ReconcileReport, Reconciler};

/// Source of "now" for the services, replaceable in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
