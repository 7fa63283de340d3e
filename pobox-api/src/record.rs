use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{base64_blob, types::PlayerId};

/// The on-disk record of a fetched and persisted invoice artifact.
///
/// One JSON file per invoice; the PN lives in the filename
/// (`invoice_<PN>.json`), not in the record. The artifact bytes are stored
/// inline, base64-encoded, and `file_size` always equals the decoded
/// length. Records are immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    /// The player the invoice was registered to. Absent on records written
    /// by older deployments, in which case the registry supplies the PID at
    /// delivery time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Artifact bytes, base64 on disk.
    #[serde(rename = "base64Data", with = "base64_blob")]
    pub data: Vec<u8>,
    /// Object filename as it appeared in the bucket listing.
    pub filename: String,
    /// Decoded artifact length in bytes.
    pub file_size: u64,
    /// When the polling engine processed the artifact.
    pub processed_at: DateTime<Utc>,
    /// Provenance of the fetch.
    pub s3_metadata: S3Metadata,
    /// When the record hit the disk.
    pub saved_at: DateTime<Utc>,
    /// Absolute path the record was written to.
    pub file_path: String,
    /// Order summary captured at registration time, so retrieval can echo
    /// it back after the registration itself is long consumed. Absent on
    /// legacy records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

/// Where an artifact came from in the object store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Metadata {
    pub s3_key: String,
    pub s3_size: u64,
    /// Kept as the listing's string form; legacy records carry a variety of
    /// timestamp formats and the field is display-only.
    pub s3_last_modified: String,
}

impl InvoiceRecord {
    /// Whether `file_size` equals the decoded payload length. Checked
    /// opportunistically by tests and the read path.
    pub fn size_matches(&self) -> bool {
        self.data.len() as u64 == self.file_size
    }
}
