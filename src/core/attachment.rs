//! File attachments for chat turns
//!
//! Attachments travel as base64 data URLs (`data:image/png;base64,...`), the
//! same form a browser file reader produces. The prefix is only metadata:
//! [`Attachment::payload`] strips it before anything is sent upstream.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

const BASE64_MARKER: &str = "base64,";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Base64 payload, optionally prefixed with a data URL header
    pub data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Attachment {name} is not valid base64: {source}")]
    InvalidPayload {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
}

impl Attachment {
    /// Encode raw bytes as a data URL attachment
    pub fn encode(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        let mime_type = mime_type.into();
        let data = format!(
            "data:{};{}{}",
            mime_type,
            BASE64_MARKER,
            BASE64_STANDARD.encode(bytes)
        );
        Self {
            name: name.into(),
            mime_type,
            data,
        }
    }

    /// Read a file from disk and encode it
    pub async fn from_path(path: &Path) -> Result<Self, EncodingError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| EncodingError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self::encode(name, mime_type_for(path), &bytes))
    }

    /// Encode an uploaded file. A missing or generic content type is
    /// replaced by one inferred from the file name.
    pub fn from_upload(name: impl Into<String>, content_type: Option<&str>, bytes: &[u8]) -> Self {
        let name = name.into();
        let mime_type = match content_type {
            Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => {
                mime.to_string()
            }
            _ => mime_type_for(&name),
        };
        Self::encode(name, mime_type, bytes)
    }

    /// The base64 payload without any data URL prefix
    pub fn payload(&self) -> &str {
        match self.data.find(BASE64_MARKER) {
            Some(pos) => &self.data[pos + BASE64_MARKER.len()..],
            None => &self.data,
        }
    }

    /// Decode the payload back into the original bytes
    pub fn decode(&self) -> Result<Vec<u8>, EncodingError> {
        BASE64_STANDARD
            .decode(self.payload())
            .map_err(|source| EncodingError::InvalidPayload {
                name: self.name.clone(),
                source,
            })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Infer the MIME type from a file name's extension
fn mime_type_for(path: impl AsRef<Path>) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}
