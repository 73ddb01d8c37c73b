use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A file held in quarantine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
   /// Row id assigned by the store
   pub id: i64,
   /// Where the file was found before it was quarantined
   pub original_path: String,
   /// Where the file now lives inside the quarantine directory
   pub quarantine_path: String,
   /// Name of the detection that triggered the quarantine
   pub threat_name: String,
   /// Size of the file in bytes
   pub file_size: u64,
   /// Hex-encoded SHA-256 of the file contents
   pub file_hash: String,
   /// When the threat was detected, with second precision
   #[serde(with = "time::serde::rfc3339")]
   pub detected_at: OffsetDateTime,
}

/// Fields for a new quarantine entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuarantineEntry {
   pub original_path: String,
   pub quarantine_path: String,
   pub threat_name: String,
   pub file_size: u64,
   pub file_hash: String,
   #[serde(with = "time::serde::rfc3339")]
   pub detected_at: OffsetDateTime,
}

impl NewQuarantineEntry {
   /// New entry detected now.
   pub fn new(
      original_path: impl Into<String>,
      quarantine_path: impl Into<String>,
      threat_name: impl Into<String>,
      file_size: u64,
      file_hash: impl Into<String>,
   ) -> Self {
      Self {
         original_path: original_path.into(),
         quarantine_path: quarantine_path.into(),
         threat_name: threat_name.into(),
         file_size,
         file_hash: file_hash.into(),
         detected_at: OffsetDateTime::now_utc(),
      }
   }

   /// Override the detection time.
   pub fn detected_at(mut self, detected_at: OffsetDateTime) -> Self {
      self.detected_at = detected_at;
      self
   }
}
