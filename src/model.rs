use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Immutable participant row as supplied by the storage layer.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    pub name: String,
    pub registration_number: String,
    pub division: String,
}

/// Per-participant result of one compose attempt, consumed immediately by the
/// archive packager.
#[derive(Debug)]
pub enum ProcessingOutcome {
    Success { filename: String, image_bytes: Vec<u8> },
    Fallback { filename: String, image_bytes: Vec<u8> },
    Failed { participant_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct NamedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub fallback: bool,
}

/// Images for one division, in the order the division appeared in the request
/// filter. Item order inside a division is completion order, not input order.
#[derive(Debug, Clone)]
pub struct DivisionImages {
    pub division: String,
    pub images: Vec<NamedImage>,
}

/// Aggregate accounting for one batch run.
///
/// `processed_count` counts every participant that produced an image (success
/// or fallback); `processed_count + error_count` always equals the number of
/// participants submitted.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub images_by_division: Vec<DivisionImages>,
    pub processed_count: usize,
    pub success_count: usize,
    pub fallback_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub skipped_participant_ids: Vec<String>,
}

impl BatchResult {
    pub fn division(&self, name: &str) -> Option<&DivisionImages> {
        self.images_by_division.iter().find(|d| d.division == name)
    }
}

/// Progress event emitted at batch boundaries. Delivery is fire-and-forget;
/// a slow or dropped consumer never blocks processing.
#[derive(Debug, Clone)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub stage: String,
    pub division: String,
}
