//! Bookkeeping embedded in every document

use bson::{doc, DateTime, Document};
use serde::{Deserialize, Serialize};

/// Write bookkeeping, separate from record timestamps: `updated_at` here is
/// the database wall clock, never the compare-and-set stamp
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_at: Option<DateTime>,
}

impl Metadata {
    pub const DELETED_FIELD: &'static str = "metadata.is_deleted";

    pub fn new() -> Self {
        Self {
            written_at: Some(DateTime::now()),
            ..Self::default()
        }
    }

    /// `$set` marking a document deleted
    pub fn tombstone() -> Document {
        let now = DateTime::now();
        doc! {
            "$set": {
                "metadata.is_deleted": true,
                "metadata.deleted_at": now,
                "metadata.written_at": now,
            }
        }
    }
}
