use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::ParticipantRecord;
use crate::util;

pub const PAYLOAD_VERSION: u32 = 1;

/// The structured document encoded into every QR code.
///
/// Regenerated fresh for each output; the timestamp makes consecutive runs
/// distinct by design, so these are never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub registration_number: String,
    pub division: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub checksum: String,
}

impl QrPayload {
    pub fn for_participant(p: &ParticipantRecord) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            id: p.id.clone(),
            name: p.name.clone(),
            registration_number: p.registration_number.clone(),
            division: p.division.clone(),
            timestamp: Utc::now().timestamp_millis(),
            checksum: checksum(&p.id, &p.registration_number),
        }
    }

    /// Serialized form fed to the QR encoder.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Tamper-evidence check used at scan time.
    pub fn checksum_matches(&self) -> bool {
        self.checksum == checksum(&self.id, &self.registration_number)
    }
}

/// Deterministic non-cryptographic checksum (FNV-1a, 64-bit) over
/// `id + registration_number`. Tamper evidence only, not security.
pub fn checksum(id: &str, registration_number: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for b in id.bytes().chain(registration_number.bytes()) {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

/// Deterministic filename for the plain single-QR path.
pub fn single_qr_filename(p: &ParticipantRecord) -> String {
    format!(
        "{}_{}.png",
        util::sanitize_for_filename(&p.registration_number),
        util::sanitize_for_filename(&p.name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant() -> ParticipantRecord {
        ParticipantRecord {
            id: "a1b2c3d4e5f6".into(),
            name: "Jordan Reyes".into(),
            registration_number: "REG-0042".into(),
            division: "Logistics".into(),
        }
    }

    #[test]
    fn payload_has_exactly_the_wire_fields() {
        let payload = QrPayload::for_participant(&participant());
        let value: serde_json::Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["checksum", "division", "id", "name", "registrationNumber", "timestamp", "version"]
        );
    }

    #[test]
    fn checksum_is_deterministic_and_verifiable() {
        let a = checksum("a1b2", "REG-1");
        let b = checksum("a1b2", "REG-1");
        assert_eq!(a, b);
        assert_ne!(a, checksum("a1b2", "REG-2"));

        let payload = QrPayload::for_participant(&participant());
        assert!(payload.checksum_matches());

        let mut tampered = payload;
        tampered.registration_number = "REG-9999".into();
        assert!(!tampered.checksum_matches());
    }

    #[test]
    fn payload_roundtrips_through_json() {
        let payload = QrPayload::for_participant(&participant());
        let bytes = payload.to_bytes().unwrap();
        let decoded: QrPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn single_qr_filename_is_deterministic() {
        assert_eq!(single_qr_filename(&participant()), "REG-0042_Jordan_Reyes.png");
    }
}
