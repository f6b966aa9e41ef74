use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One row of the `alpha` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key. Uniqueness is enforced by the remote store.
    pub id: String,
    pub plate_number: Option<String>,
    pub call_sign: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, plate_number: Option<&str>, call_sign: Option<&str>) -> Self {
        Self {
            id: id.into(),
            plate_number: plate_number.map(str::to_string),
            call_sign: call_sign.map(str::to_string),
        }
    }
}

/// All rows read at one poll tick. Never mutated; the next tick replaces it.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    records: Vec<Record>,
    captured_at: DateTime<Utc>,
    /// Computed on first use and kept for the snapshot's lifetime.
    #[serde(skip)]
    signature: OnceLock<String>,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records && self.captured_at == other.captured_at
    }
}

impl Snapshot {
    /// Captures `records` with the current time.
    pub fn new(records: Vec<Record>) -> Self {
        Self::captured(records, Utc::now())
    }

    pub fn captured(records: Vec<Record>, captured_at: DateTime<Utc>) -> Self {
        Self {
            records,
            captured_at,
            signature: OnceLock::new(),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Hex SHA-256 over the rows sorted by `id`, so server order does not
    /// affect the result. Null and empty fields hash differently. Hashed
    /// once per snapshot.
    pub fn signature(&self) -> &str {
        self.signature.get_or_init(|| self.compute_signature())
    }

    fn compute_signature(&self) -> String {
        let mut rows: Vec<&Record> = self.records.iter().collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        for row in rows {
            hasher.update(row.id.as_bytes());
            for field in [&row.plate_number, &row.call_sign] {
                match field {
                    Some(value) => {
                        hasher.update([0x1f]);
                        hasher.update(value.as_bytes());
                    }
                    None => hasher.update([0x00]),
                }
            }
            hasher.update([0x1e]);
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_row_order() {
        let a = Snapshot::new(vec![Record::new("1", Some("AB-1"), Some("K9")), Record::new("2", None, Some("K9"))]);
        let b = Snapshot::new(vec![Record::new("2", None, Some("K9")), Record::new("1", Some("AB-1"), Some("K9"))]);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_sees_field_edits() {
        let a = Snapshot::new(vec![Record::new("1", Some("AB-1"), Some("K9"))]);
        let b = Snapshot::new(vec![Record::new("1", Some("AB-2"), Some("K9"))]);
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn signature_is_hashed_once() {
        let snap = Snapshot::new(vec![Record::new("1", Some("AB-1"), Some("K9"))]);
        assert!(snap.signature.get().is_none());

        let first = snap.signature();
        let second = snap.signature();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.len(), 64);

        // The cache does not take part in equality.
        let twin = Snapshot::captured(snap.records().to_vec(), snap.captured_at());
        assert_eq!(snap, twin);
    }

    #[test]
    fn null_and_empty_differ() {
        let a = Snapshot::new(vec![Record::new("1", None, None)]);
        let b = Snapshot::new(vec![Record::new("1", Some(""), None)]);
        assert_ne!(a.signature(), b.signature());
    }
}
