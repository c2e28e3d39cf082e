//! Represents a PDF attachment stored against a nomina row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata of a stored document, without its payload.
///
/// Listing and existence checks only ever load this shape; the blob is read
/// separately through [`Document`] so large rosters do not pull every file.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct DocumentMeta {
    /// Autoincrement row id.
    pub id: i64,

    /// Owner key (a national ID such as `12.345.678-K`).
    pub rut: String,

    /// Legacy integer link to the owning nomina row, when present.
    pub nomina_id: Option<i64>,

    /// Company the owner belongs to.
    pub empresa: String,

    /// File name as uploaded. Unique per `rut`.
    pub file_name: String,

    /// Payload size in bytes, derived from the stored blob.
    pub size_bytes: i64,

    /// When the document was uploaded.
    pub created_at: DateTime<Utc>,
}

/// A document together with its binary content.
#[derive(Clone, FromRow, Debug)]
pub struct Document {
    pub id: i64,
    pub rut: String,
    pub nomina_id: Option<i64>,
    pub empresa: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Input for creating a document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub rut: String,
    pub nomina_id: Option<i64>,
    pub empresa: String,
    pub file_name: String,
    pub content: Vec<u8>,
}
