use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Uploaded original, owned by the upload collaborator; the pipeline only reads it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceImage {
    pub id: String,
    pub user_id: String,
    /// Object store reference of the original bytes
    pub original_ref: String,
    pub original_size_bytes: i64,
    pub content_type: String,
    pub preset_used: Option<String>,
    pub created_at: DateTime<Utc>,
}
