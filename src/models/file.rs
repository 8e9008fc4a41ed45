//! Metadata projection of one object in the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of a remote object's metadata.
///
/// Built on each list call and discarded after the response; never cached.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Object name within the bucket.
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// MIME type recorded when the object was written.
    pub content_type: String,

    /// Last time the object was written.
    pub updated_at: DateTime<Utc>,
}

/// Content type assumed when the store has none recorded.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
