use serde::{Deserialize, Serialize};

/// Declares a new upload resource on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    /// Stable client-side identity of the file being uploaded.
    pub fingerprint: String,
    /// Total size of the upload in bytes.
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

/// Response to [`CreateRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    /// Resource identifier used for all subsequent operations.
    pub remote_url: String,
}

/// Queries the server's authoritative offset for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub remote_url: String,
}

/// Response to [`ProbeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResponse {
    /// Bytes the server has durably accepted so far.
    pub offset: u64,
    /// Total declared size of the resource.
    pub size: u64,
}

/// Appends one chunk of data at the given offset.
///
/// The `data` field is base64-encoded in JSON, matching byte-array
/// serialization on the server side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub remote_url: String,
    /// Client-side offset this chunk starts at. Must match the server's
    /// current offset or the append is rejected with an offset mismatch.
    pub offset: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Response to [`AppendRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    /// New confirmed offset after the append. Authoritative: the client
    /// must adopt this value rather than its locally expected one.
    pub offset: u64,
}

/// Serde adapter: `Vec<u8>` <-> base64 string.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
